use anyhow::{Error, bail};
use sha2::{Digest, Sha256};
use tokio::io::ReadHalf;

use confidante_backend::settings::ResourceConflictPolicy;
use confidante_core::{
    error::{StanzaError, StreamError},
    xml::{Element, namespaces, stream_parser::StreamParser},
    xmpp::{
        compression::Decompressor,
        jid::Jid,
        stream::{Connection, XmppStream},
    },
};
use confidante_services::RouterHandle;

/// What a `<bind>` request ends up with. `Conflict` is not stream-fatal: per
/// the `disallow` policy the stream just keeps its current
/// (authenticated, unbound) state and waits for the client to retry with a
/// different resource.
pub enum BindOutcome {
    Bound(Jid),
    Conflict,
}

pub struct ResourceBindingNegotiator {
    _private: (),
}

impl ResourceBindingNegotiator {
    pub fn advertise_feature() -> Element {
        let mut bind = Element::new("bind", Some(namespaces::XMPP_BIND));
        bind.set_attribute("xmlns", None, namespaces::XMPP_BIND.to_string());
        bind.add_child(Element::new("required", Some(namespaces::XMPP_BIND)));

        bind
    }

    pub async fn negotiate_feature<C, P>(
        stream: &mut XmppStream<C, P>,
        element: &Element,
        entity: &Option<Jid>,
        router: &RouterHandle,
        resource_conflict: ResourceConflictPolicy,
        stream_id: &str,
    ) -> Result<BindOutcome, Error>
    where
        C: Connection,
        P: StreamParser<Decompressor<ReadHalf<C>>>,
    {
        if element.name != "iq" || !namespaces::is_client_namespace(element.namespace.as_deref()) {
            bail!("expected IQ stanza");
        }

        if element.attribute("type", None) != Some("set") {
            bail!("IQ stanza is not of type set");
        };

        let Some(request_id) = element.attribute("id", None) else {
            bail!("IQ stanza does not have an id");
        };

        let Some(bind_request) = element.find_child("bind", Some(namespaces::XMPP_BIND)) else {
            bail!("IQ stanza does not contain a bind request");
        };

        let requested_resource = match bind_request.find_child("resource", Some(namespaces::XMPP_BIND)) {
            Some(requested_resource) => requested_resource.text(),
            None => uuid::Uuid::new_v4().to_string(),
        };

        let Some(entity) = entity else {
            bail!("entity to bind is unknown");
        };
        let bare_entity = entity.to_bare();

        let existing = router.streams_matching_jid(&bare_entity);
        let conflicting = existing
            .iter()
            .find(|jid| jid.resource() == Some(requested_resource.as_str()))
            .cloned();

        let resource = match conflicting {
            None => requested_resource,
            Some(_) => match resource_conflict {
                ResourceConflictPolicy::Disallow => {
                    let mut bind_response = Element::new("iq", None);
                    bind_response.set_attribute("id", None, request_id.to_string());
                    bind_response.set_attribute("type", None, "error".to_string());
                    bind_response.add_child(StanzaError::Conflict.to_element());
                    stream.writer().write_xml_element(&bind_response).await?;
                    return Ok(BindOutcome::Conflict);
                }
                ResourceConflictPolicy::Override => {
                    let mut hasher = Sha256::new();
                    hasher.update(stream_id.as_bytes());
                    hex::encode(hasher.finalize())
                }
                ResourceConflictPolicy::Replace => {
                    let conflicting = conflicting.expect("conflict branch implies a match");
                    router
                        .disconnect_stream(&conflicting, StreamError::ResourceConstraint)
                        .await;
                    requested_resource
                }
            },
        };

        let bound_entity = bare_entity.with_resource(&resource)?;
        router.register_stream(&bound_entity);

        let mut bind_response = Element::new("iq", None);
        bind_response.set_attribute("id", None, request_id.to_string());
        bind_response.set_attribute("type", None, "result".to_string());
        bind_response.with_child("bind", Some(namespaces::XMPP_BIND), |bind| {
            bind.set_attribute("xmlns", None, namespaces::XMPP_BIND.to_string());
            bind.with_child("jid", None, |jid| {
                jid.add_text(format!("{}", bound_entity));
            });
        });

        stream.writer().write_xml_element(&bind_response).await?;

        Ok(BindOutcome::Bound(bound_entity))
    }
}

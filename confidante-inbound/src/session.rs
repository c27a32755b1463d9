use anyhow::{Error, bail};
use tokio::io::ReadHalf;

use confidante_core::xml::{Element, namespaces, stream_parser::StreamParser};
use confidante_core::xmpp::{
    compression::Decompressor,
    stream::{Connection, XmppStream},
};

/// `urn:ietf:params:xml:ns:xmpp-session`. RFC 3921 session establishment is
/// a no-op in modern deployments: the reply carries no payload, so this is
/// a pure state transition rather than something with internals to negotiate.
pub(super) struct SessionNegotiator {
    _private: (),
}

impl SessionNegotiator {
    pub fn advertise_feature() -> Element {
        let mut session = Element::new("session", Some(namespaces::XMPP_SESSION));
        session.set_attribute("xmlns", None::<String>, namespaces::XMPP_SESSION);

        session
    }

    pub async fn negotiate_feature<C, P>(stream: &mut XmppStream<C, P>, element: &Element) -> Result<(), Error>
    where
        C: Connection,
        P: StreamParser<Decompressor<ReadHalf<C>>>,
    {
        if element.name != "iq" || !namespaces::is_client_namespace(element.namespace.as_deref()) {
            bail!("expected IQ stanza");
        }

        if element.attribute("type", None) != Some("set") {
            bail!("IQ stanza is not of type set");
        }

        let Some(request_id) = element.attribute("id", None) else {
            bail!("IQ stanza does not have an id");
        };

        if element.find_child("session", Some(namespaces::XMPP_SESSION)).is_none() {
            bail!("IQ stanza does not contain a session request");
        }

        let mut session_response = Element::new("iq", None);
        session_response.set_attribute("id", None, request_id.to_string());
        session_response.set_attribute("type", None, "result".to_string());

        stream.writer().write_xml_element(&session_response).await?;

        Ok(())
    }
}

use std::collections::HashSet;

use anyhow::Error;
use tokio::io::ReadHalf;

use confidante_backend::settings::ModuleSettings;
use confidante_core::error::{StanzaError, StreamError};
use confidante_core::xml::stream_parser::StreamParser;
use confidante_core::xml::{Element, namespaces};
use confidante_core::xmpp::compression::Decompressor;
use confidante_core::xmpp::jid::Jid;
use confidante_core::xmpp::stanza::{Stanza, StanzaKind};
use confidante_core::xmpp::stream::{Connection, XmppStream};
use confidante_services::{DispatchContext, ErasedIqHandler, OfflineHook, RosterHook, RouterError, RouterHandle};

/// One-shot events latched per bound stream, so the roster/offline
/// fan-out on the first self-addressed presence only fires once.
#[derive(Debug, Hash, Eq, PartialEq, Clone, Copy)]
pub(crate) enum Latch {
    RosterDelivered,
    OfflineDelivered,
}

/// Whether the peer's claimed `from` matches the stream's bound identity,
/// per RFC 6120 §8.1.2.1: an absent `from` is filled in, a present one must
/// name the same node/domain and, if it names a resource, the bound one.
fn from_is_consistent(claimed: &Jid, bound: &Jid) -> bool {
    claimed.local() == bound.local()
        && claimed.domain() == bound.domain()
        && (claimed.resource().is_none() || claimed.resource() == bound.resource())
}

/// Session-established stanza dispatch (routing for a bound, authenticated
/// stream). Returns `Ok(true)` when a stream-fatal condition was hit and the
/// stream error + close have already been written; the caller should stop
/// its read loop without writing anything further.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn dispatch<C, P>(
    stream: &mut XmppStream<C, P>,
    element: Element,
    bound_jid: &Jid,
    router: &RouterHandle,
    iq_handlers: &[Box<dyn ErasedIqHandler>],
    roster_hook: &dyn RosterHook,
    offline_hook: &dyn OfflineHook,
    modules: &ModuleSettings,
    latches: &mut HashSet<Latch>,
    last_presence: &mut Option<Stanza>,
) -> Result<bool, Error>
where
    C: Connection,
    P: StreamParser<Decompressor<ReadHalf<C>>>,
{
    if !namespaces::is_client_namespace(element.namespace.as_deref()) {
        return close_with_stream_error(stream, StreamError::InvalidNamespace.to_element()).await;
    }

    let mut element = element;

    let from = match element.attribute("from", None) {
        None => bound_jid.clone(),
        Some(raw) => match raw.parse::<Jid>() {
            Ok(claimed) if from_is_consistent(&claimed, bound_jid) => claimed,
            _ => return close_with_stream_error(stream, StreamError::InvalidFrom.to_element()).await,
        },
    };
    element.set_attribute("from", None::<&str>, from.to_string());

    let to = match element.attribute("to", None) {
        Some(raw) => raw.parse::<Jid>().unwrap_or_else(|_| bound_jid.to_bare()),
        None => bound_jid.to_bare(),
    };
    element.set_attribute("to", None::<&str>, to.to_string());

    let stanza = match Stanza::from_element(element) {
        Ok(stanza) => stanza,
        Err(err) => {
            tracing::debug!(%err, "dropping malformed stanza");
            return Ok(false);
        }
    };

    if router.is_blocked_jid(&to, bound_jid.local().unwrap_or_default()).await {
        let reply = stanza.error_reply_with(StanzaError::blocked());
        stream.writer().write_xml_element(&reply.element).await?;
        return Ok(false);
    }

    match &stanza.kind {
        StanzaKind::Iq(iq_type) => {
            if !router.is_local_domain(to.domain()) {
                tracing::debug!(%to, "dropping iq addressed to a non-local domain");
                return Ok(false);
            }

            if to.full_with_user() {
                if let Err(RouterError::ResourceNotFound | RouterError::BlockedJid) =
                    router.route(stanza.clone()).await
                {
                    if iq_type.is_request() {
                        let reply = stanza.error_reply(StanzaError::ServiceUnavailable);
                        stream.writer().write_xml_element(&reply.element).await?;
                    }
                }
                return Ok(false);
            }

            for handler in iq_handlers {
                if handler.matches(&stanza) {
                    if let Some(reply) = handler.handle(&stanza, &DispatchContext { bound_jid }).await {
                        stream.writer().write_xml_element(&reply.element).await?;
                    }
                    return Ok(false);
                }
            }

            if iq_type.is_request() {
                let reply = stanza.error_reply(StanzaError::ServiceUnavailable);
                stream.writer().write_xml_element(&reply.element).await?;
            }
        }
        StanzaKind::Presence(_, priority) => {
            if to != bound_jid.to_bare() {
                let _ = router.route(stanza.clone()).await;
                return Ok(false);
            }

            *last_presence = Some(stanza.clone());

            if latches.insert(Latch::RosterDelivered) {
                roster_hook.deliver_pending_approvals(bound_jid).await;
                roster_hook.deliver_presences(bound_jid).await;
            }

            if priority.unwrap_or(0) >= 0 && latches.insert(Latch::OfflineDelivered) {
                offline_hook.deliver_queued(bound_jid).await;
            }
        }
        StanzaKind::Message(_) => {
            if !router.is_local_domain(to.domain()) {
                tracing::debug!(%to, "dropping message addressed to a non-local domain");
                return Ok(false);
            }

            match router.route(stanza.clone()).await {
                Ok(()) => {}
                Err(RouterError::NotAuthenticated) => {
                    if modules.enabled.contains("offline") {
                        let skip_due_to_policy = modules.offline_skip_chat_with_body
                            && (stanza.is_chat() || stanza.is_groupchat())
                            && stanza.has_body();
                        if !skip_due_to_policy {
                            offline_hook.archive(&stanza).await;
                        }
                    }
                }
                Err(RouterError::ResourceNotFound) => {
                    let mut retry = stanza.clone();
                    retry.to = Some(to.to_bare());
                    retry.element.set_attribute("to", None::<&str>, to.to_bare().to_string());
                    if let Err(err) = router.route(retry).await {
                        tracing::debug!(?err, "message retry to bare jid did not deliver");
                    }
                }
                Err(RouterError::NotExistingAccount) | Err(RouterError::BlockedJid) => {
                    let reply = stanza.error_reply(StanzaError::ServiceUnavailable);
                    stream.writer().write_xml_element(&reply.element).await?;
                }
            }
        }
    }

    Ok(false)
}

async fn close_with_stream_error<C, P>(stream: &mut XmppStream<C, P>, error: Element) -> Result<bool, Error>
where
    C: Connection,
    P: StreamParser<Decompressor<ReadHalf<C>>>,
{
    stream.writer().write_xml_element(&error).await?;
    stream.writer().write_stream_close().await?;
    Ok(true)
}

use std::future::Future;
use std::pin::Pin;

use confidante_core::xmpp::jid::Jid;
use confidante_core::xmpp::stanza::Stanza;

/// The roster/presence feature module's half of session-started dispatch.
/// Roster fan-out, subscription bookkeeping, and offline-presence replay are
/// external collaborators; the core only knows the three moments it must
/// hand off to them (first self-presence, and logout).
///
/// Type-erased (`Pin<Box<dyn Future>>`) rather than generic, the same way
/// [`crate::iq::ErasedIqHandler`] erases `IqHandler`: the actor holds this
/// behind a single `Arc<dyn RosterHook>`, picked once at startup from
/// whichever modules are enabled.
pub trait RosterHook: Send + Sync {
    /// Deliver any presence subscription requests/approvals that arrived
    /// while `bound_jid` was offline.
    fn deliver_pending_approvals<'a>(
        &'a self,
        bound_jid: &'a Jid,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

    /// Push the current presence of every contact in `bound_jid`'s roster.
    fn deliver_presences<'a>(
        &'a self,
        bound_jid: &'a Jid,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

    /// Broadcast an unavailable presence from `bound_jid` to its roster,
    /// used on logout bookkeeping when the connection dropped with an
    /// available presence still in effect.
    fn broadcast_unavailable<'a>(
        &'a self,
        bound_jid: &'a Jid,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
}

/// The offline-message module's half of session-started dispatch: archives a
/// message addressed to a bare JID with no bound stream, subject to the
/// chat/groupchat-with-body policy the dispatch rule describes, and replays
/// the queue back once the owner announces an available presence.
pub trait OfflineHook: Send + Sync {
    fn archive<'a>(&'a self, stanza: &'a Stanza) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

    /// Deliver everything archived for `bound_jid` since its last available
    /// presence. Triggered once per stream, on the first self-addressed
    /// presence with non-negative priority.
    fn deliver_queued<'a>(&'a self, bound_jid: &'a Jid) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
}

/// A no-op [`RosterHook`]/[`OfflineHook`] pair, wired in when the
/// corresponding module tag is absent from `Settings.modules.enabled`.
pub struct NoopHooks;

impl RosterHook for NoopHooks {
    fn deliver_pending_approvals<'a>(
        &'a self,
        _bound_jid: &'a Jid,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async {})
    }

    fn deliver_presences<'a>(
        &'a self,
        _bound_jid: &'a Jid,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async {})
    }

    fn broadcast_unavailable<'a>(
        &'a self,
        _bound_jid: &'a Jid,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async {})
    }
}

impl OfflineHook for NoopHooks {
    fn archive<'a>(&'a self, _stanza: &'a Stanza) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async {})
    }

    fn deliver_queued<'a>(&'a self, _bound_jid: &'a Jid) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async {})
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confidante_core::xml::{namespaces, Element};

    #[tokio::test]
    async fn noop_hooks_are_inert() {
        let hooks = NoopHooks;
        let jid: Jid = "juliet@capulet.lit/balcony".parse().unwrap();
        hooks.deliver_pending_approvals(&jid).await;
        hooks.deliver_presences(&jid).await;
        hooks.broadcast_unavailable(&jid).await;

        let element = Element::new("message", Some(namespaces::XMPP_CLIENT));
        let stanza = Stanza::from_element(element).unwrap();
        hooks.archive(&stanza).await;
        hooks.deliver_queued(&jid).await;
    }
}

use std::future::Future;

use confidante_core::xmpp::stanza::Stanza;

pub mod disco;
pub mod ping;

pub use disco::DiscoHandler;
pub use ping::PingHandler;

/// Context an `IqHandler` needs to build its reply: deliberately thin, since
/// the handlers themselves are external collaborators.
pub struct DispatchContext<'a> {
    pub bound_jid: &'a confidante_core::xmpp::jid::Jid,
}

/// One per feature module. `matches` decides whether
/// this handler owns the request; `handle` executes it and optionally
/// produces a reply. Handlers are tried in registration order and the
/// first match wins, so registration order is observable (disco first, so
/// later handlers can register their features into it).
pub trait IqHandler: Send + Sync {
    fn matches(&self, iq: &Stanza) -> bool;

    fn handle(
        &self,
        iq: &Stanza,
        ctx: &DispatchContext<'_>,
    ) -> impl Future<Output = Option<Stanza>> + Send;
}

/// Type-erased form of [`IqHandler`] so `InboundStream` can hold a
/// `Vec<Box<dyn ErasedIqHandler>>` of heterogeneous handlers in a fixed
/// registration order, since module registration order is observable.
pub trait ErasedIqHandler: Send + Sync {
    fn matches(&self, iq: &Stanza) -> bool;

    fn handle<'a>(
        &'a self,
        iq: &'a Stanza,
        ctx: &'a DispatchContext<'a>,
    ) -> std::pin::Pin<Box<dyn Future<Output = Option<Stanza>> + Send + 'a>>;
}

impl<T: IqHandler> ErasedIqHandler for T {
    fn matches(&self, iq: &Stanza) -> bool {
        IqHandler::matches(self, iq)
    }

    fn handle<'a>(
        &'a self,
        iq: &'a Stanza,
        ctx: &'a DispatchContext<'a>,
    ) -> std::pin::Pin<Box<dyn Future<Output = Option<Stanza>> + Send + 'a>> {
        Box::pin(IqHandler::handle(self, iq, ctx))
    }
}

pub mod hooks;
pub mod iq;
pub mod router;

pub use hooks::{NoopHooks, OfflineHook, RosterHook};
pub use iq::{DiscoHandler, DispatchContext, ErasedIqHandler, IqHandler, PingHandler};
pub use router::{Router, RouterError, RouterHandle, RouterMessage};

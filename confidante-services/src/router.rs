use std::collections::HashSet;
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

use confidante_backend::store::{BlocklistLookup, StoreHandle, UserRecord};
use confidante_core::error::StreamError;
use confidante_core::xmpp::jid::Jid;
use confidante_core::xmpp::stanza::Stanza;

/// Bound on the outbound channel each bound stream hands the router, per
/// the bound-stream actor inbox sizing.
const OUTBOUND_CHANNEL_BUFFER_SIZE: usize = 64;

/// What a bound stream's actor loop receives from the router: either a
/// stanza routed to it, or an order to tear itself down (used by the
/// `replace` resource-conflict policy to evict the stream it is taking over
/// the resource from).
#[derive(Debug, Clone)]
pub enum RouterMessage {
    Stanza(Stanza),
    Disconnect(StreamError),
}

/// Why `Router::route` couldn't deliver a stanza.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RouterError {
    #[error("recipient has no bound stream")]
    NotAuthenticated,
    #[error("recipient's bare JID is bound, but not the requested resource")]
    ResourceNotFound,
    #[error("recipient account does not exist")]
    NotExistingAccount,
    #[error("recipient has blocked the sender")]
    BlockedJid,
}

/// The process-wide registry of bound streams.
///
/// Grounded on `waddle-xmpp`'s `ConnectionRegistry` (`DashMap`-backed,
/// lock-free reads), generalized with a bare-JID index for resource-conflict
/// detection and the bare-JID fan-out presence/message delivery to an
/// unaddressed resource needs.
pub struct Router {
    connections: DashMap<Jid, mpsc::Sender<RouterMessage>>,
    by_bare: DashMap<Jid, DashSet<Jid>>,
    local_domains: HashSet<String>,
    default_domain: String,
    store: StoreHandle,
}

impl Router {
    pub fn new(default_domain: String, store: StoreHandle) -> Self {
        let mut local_domains = HashSet::new();
        local_domains.insert(default_domain.clone());

        Self {
            connections: DashMap::new(),
            by_bare: DashMap::new(),
            local_domains,
            default_domain,
            store,
        }
    }

    pub fn is_local_domain(&self, domain: &str) -> bool {
        self.local_domains.contains(domain)
    }

    pub fn default_local_domain(&self) -> &str {
        &self.default_domain
    }

    /// Reserves the bare-JID slot a binding stream is about to occupy, so a
    /// concurrent bind sees it when scanning for resource collisions.
    /// Called before the `<bind>` result is sent; does not yet make the
    /// stream routable (see [`Router::authenticate_stream`]).
    #[instrument(skip(self), fields(jid = %jid))]
    pub fn register_stream(&self, jid: &Jid) {
        self.by_bare
            .entry(jid.to_bare())
            .or_default()
            .insert(jid.clone());
    }

    /// Makes a bound stream routable: inserts its outbound channel into the
    /// full-JID table. Returns the receiving half the caller's actor should
    /// drain for stanzas (and disconnect orders) routed to it.
    #[instrument(skip(self), fields(jid = %jid))]
    pub fn authenticate_stream(&self, jid: Jid) -> mpsc::Receiver<RouterMessage> {
        let (tx, rx) = mpsc::channel(OUTBOUND_CHANNEL_BUFFER_SIZE);
        self.by_bare
            .entry(jid.to_bare())
            .or_default()
            .insert(jid.clone());
        self.connections.insert(jid, tx);
        rx
    }

    /// Orders the stream currently bound to `jid`, if any, to disconnect
    /// with the given stream error. Used by the `replace` resource-conflict
    /// policy to evict a conflicting resource before accepting a new bind.
    #[instrument(skip(self), fields(jid = %jid))]
    pub async fn disconnect_stream(&self, jid: &Jid, error: StreamError) -> bool {
        let Some(sender) = self.connections.get(jid).map(|entry| entry.value().clone()) else {
            return false;
        };
        sender.send(RouterMessage::Disconnect(error)).await.is_ok()
    }

    #[instrument(skip(self), fields(jid = %jid))]
    pub fn unregister_stream(&self, jid: &Jid) {
        self.connections.remove(jid);
        if let Some(siblings) = self.by_bare.get(&jid.to_bare()) {
            siblings.remove(jid);
            if siblings.is_empty() {
                drop(siblings);
                self.by_bare.remove(&jid.to_bare());
            }
        }
    }

    /// Full JIDs currently bound under `bare`'s bare JID, for resource
    /// collision detection and presence fan-out.
    pub fn streams_matching_jid(&self, bare: &Jid) -> Vec<Jid> {
        self.by_bare
            .get(&bare.to_bare())
            .map(|set| set.iter().map(|entry| entry.clone()).collect())
            .unwrap_or_default()
    }

    /// Pass-through to the backing store, so `confidante-inbound`'s logout
    /// bookkeeping doesn't need its own generic store parameter alongside
    /// the router.
    pub async fn record_logout(&self, jid: Jid, at: i64, status: Option<String>) -> Result<(), anyhow::Error> {
        self.store.record_logout(jid, at, status).await
    }

    pub async fn fetch_user(&self, jid: Jid) -> Result<UserRecord, anyhow::Error> {
        self.store.fetch_user(jid).await
    }

    pub async fn is_blocked_jid(&self, peer: &Jid, owner_username: &str) -> bool {
        if peer.is_server() && self.is_local_domain(peer.domain()) {
            // server bare JIDs on local domains are never blocked.
            return false;
        }

        self.store
            .is_blocked(peer.to_bare(), owner_username.to_string())
            .await
            .unwrap_or(false)
    }

    /// Delivers `stanza`: exact full-JID match when the
    /// destination names a resource, fan-out to every bound resource for a
    /// bare destination, `not_existing_account`/`not_authenticated`
    /// distinguished by whether the destination has ever been provisioned.
    #[instrument(skip(self, stanza), fields(to = ?stanza.to))]
    pub async fn route(&self, stanza: Stanza) -> Result<(), RouterError> {
        let to = stanza.to.clone().expect("dispatch always supplies a `to`");
        let from = stanza.from.clone();

        if let Some(from) = &from {
            if self.is_blocked_jid(from, to.local().unwrap_or_default()).await {
                return Err(RouterError::BlockedJid);
            }
        }

        if to.full_with_user() {
            return self.route_to_full_jid(&to, stanza).await;
        }

        self.route_to_bare_jid(&to, stanza).await
    }

    async fn route_to_full_jid(&self, to: &Jid, stanza: Stanza) -> Result<(), RouterError> {
        let sender = self.connections.get(to).map(|entry| entry.value().clone());
        let Some(sender) = sender else {
            return Err(RouterError::ResourceNotFound);
        };

        if sender.send(RouterMessage::Stanza(stanza)).await.is_err() {
            warn!(%to, "outbound channel closed, dropping stale connection entry");
            self.unregister_stream(to);
            return Err(RouterError::ResourceNotFound);
        }

        Ok(())
    }

    async fn route_to_bare_jid(&self, to: &Jid, stanza: Stanza) -> Result<(), RouterError> {
        let resources = self.streams_matching_jid(to);

        if resources.is_empty() {
            return match self.store.fetch_user(to.to_bare()).await {
                Ok(_) => Err(RouterError::NotAuthenticated),
                Err(_) => Err(RouterError::NotExistingAccount),
            };
        }

        let mut delivered = false;
        for full_jid in resources {
            if let Some(sender) = self.connections.get(&full_jid).map(|e| e.value().clone()) {
                if sender.send(RouterMessage::Stanza(stanza.clone())).await.is_ok() {
                    delivered = true;
                } else {
                    debug!(%full_jid, "dropping stale connection entry during bare-JID fan-out");
                    self.unregister_stream(&full_jid);
                }
            }
        }

        if delivered {
            Ok(())
        } else {
            Err(RouterError::NotAuthenticated)
        }
    }
}

/// A cheaply clonable handle to the process-wide [`Router`].
///
/// An explicit value injected at stream creation rather than process-global
/// state, so tests can instantiate isolated routers.
#[derive(Clone)]
pub struct RouterHandle(Arc<Router>);

impl RouterHandle {
    pub fn new(default_domain: String, store: StoreHandle) -> Self {
        Self(Arc::new(Router::new(default_domain, store)))
    }
}

impl std::ops::Deref for RouterHandle {
    type Target = Router;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use confidante_backend::store::StoreHandle;

    use super::*;

    fn test_store() -> StoreHandle {
        StoreHandle::new(confidante_backend::store::testing::FakeStoreBackend::default())
    }

    fn jid(s: &str) -> Jid {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn register_then_authenticate_makes_stream_routable() {
        let router = RouterHandle::new("localhost".to_string(), test_store());
        let full = jid("romeo@localhost/orchard");
        router.register_stream(&full);
        let mut rx = router.authenticate_stream(full.clone());

        let stanza = make_message(&full, &full);
        router.route(stanza.clone()).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert!(matches!(received, RouterMessage::Stanza(s) if s == stanza));
    }

    #[tokio::test]
    async fn disconnect_stream_reaches_the_bound_receiver() {
        let router = RouterHandle::new("localhost".to_string(), test_store());
        let full = jid("romeo@localhost/orchard");
        router.register_stream(&full);
        let mut rx = router.authenticate_stream(full.clone());

        assert!(router.disconnect_stream(&full, StreamError::ResourceConstraint).await);
        let received = rx.recv().await.unwrap();
        assert!(matches!(received, RouterMessage::Disconnect(StreamError::ResourceConstraint)));
    }

    #[tokio::test]
    async fn unbound_resource_is_resource_not_found() {
        let router = RouterHandle::new("localhost".to_string(), test_store());
        let bound = jid("romeo@localhost/orchard");
        router.register_stream(&bound);
        router.authenticate_stream(bound.clone());

        let unbound = jid("romeo@localhost/phone");
        let stanza = make_message(&bound, &unbound);

        let result = router.route(stanza).await;
        assert_eq!(result, Err(RouterError::ResourceNotFound));
    }

    #[tokio::test]
    async fn streams_matching_jid_lists_siblings() {
        let router = RouterHandle::new("localhost".to_string(), test_store());
        let a = jid("romeo@localhost/orchard");
        let b = jid("romeo@localhost/balcony");
        router.register_stream(&a);
        router.register_stream(&b);

        let mut matches = router.streams_matching_jid(&jid("romeo@localhost"));
        matches.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(matches, expected);
    }

    fn make_message(from: &Jid, to: &Jid) -> Stanza {
        use confidante_core::xml::{namespaces, Element};
        let mut element = Element::new("message", Some(namespaces::XMPP_CLIENT));
        element.set_attribute("from", None::<&str>, from.to_string());
        element.set_attribute("to", None::<&str>, to.to_string());
        Stanza::from_element(element).unwrap()
    }
}

use std::future::Future;

use anyhow::Error;
use tokio::{
    select,
    sync::{mpsc, oneshot},
};

use confidante_core::xmpp::jid::Jid;

pub use self::sqlite::SqliteStoreBackend;

mod fake;
mod sqlite;

/// A non-persistent [`StoreBackend`] for tests in this crate and in
/// downstream crates (`confidante-services`, `confidante-inbound`) that
/// need a `Storage` capability without a database.
#[cfg(any(test, feature = "testing"))]
pub mod testing {
    pub use super::fake::FakeStoreBackend;
}

#[derive(Debug, Clone, Copy)]
pub enum StoredPasswordKind {
    Argon2,
    ScramSha1,
    ScramSha256,
    DigestMd5,
}

/// A stored user record as the core needs to see it: bare JID plus the
/// bookkeeping fields the `users` table carries alongside the password. Password
/// hashes are fetched separately through `StoredPasswordLookup` since
/// most callers (presence/roster code) have no business touching them.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub bare_jid: Jid,
    pub logged_out_at: Option<i64>,
    /// The `<status/>` text of the last `unavailable` presence sent before
    /// the stream closed; `None` if the stream never sent one.
    pub logged_out_status: Option<String>,
}

enum Query {
    GetStoredPassword {
        jid: Jid,
        kind: StoredPasswordKind,
        result_tx: oneshot::Sender<Result<String, Error>>,
    },
    FetchUser {
        jid: Jid,
        result_tx: oneshot::Sender<Result<UserRecord, Error>>,
    },
    IsBlocked {
        peer: Jid,
        owner_username: String,
        result_tx: oneshot::Sender<Result<bool, Error>>,
    },
}

enum Command {
    AddUser {
        jid: Jid,
        stored_password_argon2: String,
        stored_password_scram_sha1: String,
        stored_password_scram_sha256: String,
        result_tx: oneshot::Sender<Result<(), Error>>,
    },
    RemoveUser {
        jid: Jid,
        result_tx: oneshot::Sender<Result<(), Error>>,
    },
    SetStoredPassword {
        jid: Jid,
        kind: StoredPasswordKind,
        stored_password: String,
        result_tx: oneshot::Sender<Result<(), Error>>,
    },
    RecordLogout {
        jid: Jid,
        at: i64,
        status: Option<String>,
        result_tx: oneshot::Sender<Result<(), Error>>,
    },
}

struct Store<B>
where
    B: StoreBackend,
{
    queries: mpsc::Receiver<Query>,
    commands: mpsc::Receiver<Command>,
    backend: B,
}

impl<B> Store<B>
where
    B: StoreBackend,
{
    async fn run(&mut self) {
        loop {
            select! {
                Some(query) = self.queries.recv() => {
                    self.handle_query(query).await;
                }
                Some(command) = self.commands.recv() => {
                    self.handle_command(command).await;
                }
                else => break,
            }
        }
    }

    async fn handle_query(&mut self, query: Query) {
        match query {
            Query::GetStoredPassword {
                jid,
                kind,
                result_tx,
            } => {
                let result = self.backend.get_stored_password(jid, kind).await;
                let _ = result_tx.send(result);
            }
            Query::FetchUser { jid, result_tx } => {
                let result = self.backend.fetch_user(jid).await;
                let _ = result_tx.send(result);
            }
            Query::IsBlocked {
                peer,
                owner_username,
                result_tx,
            } => {
                let result = self.backend.is_blocked(peer, owner_username).await;
                let _ = result_tx.send(result);
            }
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::AddUser {
                jid,
                stored_password_argon2,
                stored_password_scram_sha1,
                stored_password_scram_sha256,
                result_tx,
            } => {
                let result = self
                    .backend
                    .add_user(
                        jid,
                        stored_password_argon2,
                        stored_password_scram_sha1,
                        stored_password_scram_sha256,
                    )
                    .await;
                let _ = result_tx.send(result);
            }
            Command::RemoveUser { jid, result_tx } => {
                let result = self.backend.remove_user(jid).await;
                let _ = result_tx.send(result);
            }
            Command::SetStoredPassword {
                jid,
                kind,
                stored_password,
                result_tx,
            } => {
                let result = self
                    .backend
                    .set_stored_password(jid, kind, stored_password)
                    .await;
                let _ = result_tx.send(result);
            }
            Command::RecordLogout {
                jid,
                at,
                status,
                result_tx,
            } => {
                let result = self.backend.record_logout(jid, at, status).await;
                let _ = result_tx.send(result);
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoreHandle {
    queries: mpsc::Sender<Query>,
    commands: mpsc::Sender<Command>,
}

impl StoreHandle {
    pub fn new<B>(backend: B) -> Self
    where
        B: StoreBackend + Send + 'static,
    {
        let (queries_tx, queries_rx) = mpsc::channel(8);
        let (commands_tx, commands_rx) = mpsc::channel(8);
        let mut store = Store {
            queries: queries_rx,
            commands: commands_rx,
            backend,
        };
        tokio::spawn(async move {
            store.run().await;
        });

        StoreHandle {
            queries: queries_tx,
            commands: commands_tx,
        }
    }

    pub async fn add_user(
        &self,
        jid: Jid,
        stored_password_argon2: String,
        stored_password_scram_sha1: String,
        stored_password_scram_sha256: String,
    ) -> Result<(), Error> {
        let (result_tx, result_rx) = oneshot::channel();
        let msg = Command::AddUser {
            jid,
            stored_password_argon2,
            stored_password_scram_sha1,
            stored_password_scram_sha256,
            result_tx,
        };

        let _ = self.commands.send(msg).await;
        result_rx.await.expect("Store is gone")
    }

    pub async fn remove_user(&self, jid: Jid) -> Result<(), Error> {
        let (result_tx, result_rx) = oneshot::channel();
        let msg = Command::RemoveUser { jid, result_tx };

        let _ = self.commands.send(msg).await;
        result_rx.await.expect("Store is gone")
    }

    pub async fn get_stored_password(
        &self,
        jid: Jid,
        kind: StoredPasswordKind,
    ) -> Result<String, Error> {
        let (result_tx, result_rx) = oneshot::channel();
        let msg = Query::GetStoredPassword {
            jid,
            kind,
            result_tx,
        };

        let _ = self.queries.send(msg).await;
        result_rx.await.expect("Store is gone")
    }

    pub async fn set_stored_password(
        &self,
        jid: Jid,
        kind: StoredPasswordKind,
        stored_password: String,
    ) -> Result<(), Error> {
        let (result_tx, result_rx) = oneshot::channel();
        let msg = Command::SetStoredPassword {
            jid,
            kind,
            stored_password,
            result_tx,
        };

        let _ = self.commands.send(msg).await;
        result_rx.await.expect("Store is gone")
    }

    pub async fn fetch_user(&self, jid: Jid) -> Result<UserRecord, Error> {
        let (result_tx, result_rx) = oneshot::channel();
        let msg = Query::FetchUser { jid, result_tx };

        let _ = self.queries.send(msg).await;
        result_rx.await.expect("Store is gone")
    }

    pub async fn insert_or_update_user(&self, jid: Jid) -> Result<(), Error> {
        // Bookkeeping-only upsert: password hashes are set separately via
        // `set_stored_password`/`add_user`, this just ensures a row exists
        // so `record_logout`/`fetch_user` have somewhere to write.
        let empty = String::new();
        self.add_user(jid, empty.clone(), empty.clone(), empty).await
    }

    pub async fn record_logout(
        &self,
        jid: Jid,
        at: i64,
        status: Option<String>,
    ) -> Result<(), Error> {
        let (result_tx, result_rx) = oneshot::channel();
        let msg = Command::RecordLogout {
            jid,
            at,
            status,
            result_tx,
        };

        let _ = self.commands.send(msg).await;
        result_rx.await.expect("Store is gone")
    }

    pub async fn is_blocked(&self, peer: Jid, owner_username: String) -> Result<bool, Error> {
        let (result_tx, result_rx) = oneshot::channel();
        let msg = Query::IsBlocked {
            peer,
            owner_username,
            result_tx,
        };

        let _ = self.queries.send(msg).await;
        result_rx.await.expect("Store is gone")
    }
}

/// Looked up by the SASL mechanisms in `confidante-inbound`: each
/// mechanism asks for the stored-password representation it needs and
/// verifies locally, so this trait only ever hands back opaque strings.
pub trait StoredPasswordLookup: Clone + std::fmt::Debug {
    fn get_stored_password_argon2(
        &self,
        jid: Jid,
    ) -> impl Future<Output = Result<String, Error>> + Send;
    fn get_stored_password_scram_sha1(
        &self,
        jid: Jid,
    ) -> impl Future<Output = Result<String, Error>> + Send;
    fn get_stored_password_scram_sha256(
        &self,
        jid: Jid,
    ) -> impl Future<Output = Result<String, Error>> + Send;
    /// HA1 = `MD5(username:realm:password)`, hex-encoded, the only
    /// credential shape RFC 2831 DIGEST-MD5 can verify against without
    /// recovering the plaintext password.
    fn get_stored_password_digest_md5(
        &self,
        jid: Jid,
    ) -> impl Future<Output = Result<String, Error>> + Send;
}

impl StoredPasswordLookup for StoreHandle {
    fn get_stored_password_argon2(
        &self,
        jid: Jid,
    ) -> impl Future<Output = Result<String, Error>> + Send {
        self.get_stored_password(jid, StoredPasswordKind::Argon2)
    }

    fn get_stored_password_scram_sha1(
        &self,
        jid: Jid,
    ) -> impl Future<Output = Result<String, Error>> + Send {
        self.get_stored_password(jid, StoredPasswordKind::ScramSha1)
    }

    fn get_stored_password_scram_sha256(
        &self,
        jid: Jid,
    ) -> impl Future<Output = Result<String, Error>> + Send {
        self.get_stored_password(jid, StoredPasswordKind::ScramSha256)
    }

    fn get_stored_password_digest_md5(
        &self,
        jid: Jid,
    ) -> impl Future<Output = Result<String, Error>> + Send {
        self.get_stored_password(jid, StoredPasswordKind::DigestMd5)
    }
}

/// Asked by the router/blocking-command `IqHandler` before routing a
/// stanza between two bare JIDs. Blocklist membership is owned by the
/// recipient's account, hence `owner_username` rather than a JID: the
/// owner is always local.
pub trait BlocklistLookup: Clone + std::fmt::Debug {
    fn is_blocked(
        &self,
        peer: Jid,
        owner_username: String,
    ) -> impl Future<Output = Result<bool, Error>> + Send;
}

impl BlocklistLookup for StoreHandle {
    fn is_blocked(
        &self,
        peer: Jid,
        owner_username: String,
    ) -> impl Future<Output = Result<bool, Error>> + Send {
        StoreHandle::is_blocked(self, peer, owner_username)
    }
}

trait StoreBackend {
    fn add_user(
        &mut self,
        jid: Jid,
        stored_password_argon2: String,
        stored_password_scram_sha1: String,
        stored_password_scram_sha256: String,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    fn remove_user(&mut self, jid: Jid) -> impl Future<Output = Result<(), Error>> + Send;

    fn get_stored_password(
        &self,
        jid: Jid,
        kind: StoredPasswordKind,
    ) -> impl Future<Output = Result<String, Error>> + Send;

    fn set_stored_password(
        &mut self,
        jid: Jid,
        kind: StoredPasswordKind,
        stored_password: String,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    fn fetch_user(&self, jid: Jid) -> impl Future<Output = Result<UserRecord, Error>> + Send;

    fn record_logout(
        &mut self,
        jid: Jid,
        at: i64,
        status: Option<String>,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    fn is_blocked(
        &self,
        peer: Jid,
        owner_username: String,
    ) -> impl Future<Output = Result<bool, Error>> + Send;
}

#[cfg(test)]
mod test {
    use std::default::Default;

    use self::fake::FakeStoreBackend;

    use super::*;

    #[tokio::test]
    async fn test_store_query() {
        let stored_password_argon2 = "super secret password";
        let store = StoreHandle::new(FakeStoreBackend {
            stored_password_argon2: Some(stored_password_argon2.to_string()),
            ..Default::default()
        });
        let jid = "user@localhost/resource".parse::<Jid>().unwrap();
        let retrieved_password = store
            .get_stored_password(jid, StoredPasswordKind::Argon2)
            .await
            .unwrap();
        assert_eq!(stored_password_argon2, retrieved_password);
    }

    #[tokio::test]
    async fn record_logout_is_visible_in_fetch_user() {
        let store = StoreHandle::new(FakeStoreBackend::default());
        let jid = "user@localhost".parse::<Jid>().unwrap();
        store.insert_or_update_user(jid.clone()).await.unwrap();
        store
            .record_logout(jid.clone(), 1_700_000_000, Some("be right back".to_string()))
            .await
            .unwrap();

        let record = store.fetch_user(jid).await.unwrap();
        assert_eq!(record.logged_out_at, Some(1_700_000_000));
        assert_eq!(record.logged_out_status.as_deref(), Some("be right back"));
    }

    #[tokio::test]
    async fn unblocked_peer_is_not_blocked() {
        let store = StoreHandle::new(FakeStoreBackend::default());
        let peer = "romeo@montague.lit".parse::<Jid>().unwrap();
        let blocked = store.is_blocked(peer, "juliet".to_string()).await.unwrap();
        assert!(!blocked);
    }
}

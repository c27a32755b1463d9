use std::collections::HashSet;

use anyhow::{Error, anyhow};

use confidante_core::xmpp::jid::Jid;

use crate::store::{StoredPasswordKind, UserRecord};

use super::StoreBackend;

#[derive(Default)]
pub struct FakeStoreBackend {
    pub stored_password_argon2: Option<String>,
    pub stored_password_scram_sha1: Option<String>,
    pub stored_password_scram_sha256: Option<String>,
    pub stored_password_digest_md5: Option<String>,
    pub logged_out_at: Option<i64>,
    pub logged_out_status: Option<String>,
    pub blocked: HashSet<String>,
}

impl StoreBackend for FakeStoreBackend {
    async fn add_user(
        &mut self,
        _jid: Jid,
        stored_password_argon2: String,
        stored_password_scram_sha1: String,
        stored_password_scram_sha256: String,
    ) -> Result<(), Error> {
        if !stored_password_argon2.is_empty() {
            self.stored_password_argon2 = Some(stored_password_argon2);
        }
        if !stored_password_scram_sha1.is_empty() {
            self.stored_password_scram_sha1 = Some(stored_password_scram_sha1);
        }
        if !stored_password_scram_sha256.is_empty() {
            self.stored_password_scram_sha256 = Some(stored_password_scram_sha256);
        }

        Ok(())
    }

    async fn remove_user(&mut self, _jid: Jid) -> Result<(), Error> {
        self.stored_password_argon2 = None;
        self.stored_password_scram_sha1 = None;
        self.stored_password_scram_sha256 = None;
        self.stored_password_digest_md5 = None;
        self.logged_out_at = None;
        self.logged_out_status = None;

        Ok(())
    }

    async fn get_stored_password(
        &self,
        _jid: Jid,
        kind: StoredPasswordKind,
    ) -> Result<String, Error> {
        match kind {
            StoredPasswordKind::Argon2 => self
                .stored_password_argon2
                .clone()
                .ok_or(anyhow!("No password stored for kind {:?}", kind)),
            StoredPasswordKind::ScramSha1 => self
                .stored_password_scram_sha1
                .clone()
                .ok_or(anyhow!("No password stored for kind {:?}", kind)),
            StoredPasswordKind::ScramSha256 => self
                .stored_password_scram_sha256
                .clone()
                .ok_or(anyhow!("No password stored for kind {:?}", kind)),
            StoredPasswordKind::DigestMd5 => self
                .stored_password_digest_md5
                .clone()
                .ok_or(anyhow!("No password stored for kind {:?}", kind)),
        }
    }

    async fn set_stored_password(
        &mut self,
        _jid: Jid,
        kind: StoredPasswordKind,
        stored_password: String,
    ) -> Result<(), Error> {
        match kind {
            StoredPasswordKind::Argon2 => {
                self.stored_password_argon2 = Some(stored_password);
            }
            StoredPasswordKind::ScramSha1 => {
                self.stored_password_scram_sha1 = Some(stored_password);
            }
            StoredPasswordKind::ScramSha256 => {
                self.stored_password_scram_sha256 = Some(stored_password);
            }
            StoredPasswordKind::DigestMd5 => {
                self.stored_password_digest_md5 = Some(stored_password);
            }
        }

        Ok(())
    }

    async fn fetch_user(&self, jid: Jid) -> Result<UserRecord, Error> {
        Ok(UserRecord {
            bare_jid: jid.to_bare(),
            logged_out_at: self.logged_out_at,
            logged_out_status: self.logged_out_status.clone(),
        })
    }

    async fn record_logout(
        &mut self,
        _jid: Jid,
        at: i64,
        status: Option<String>,
    ) -> Result<(), Error> {
        self.logged_out_at = Some(at);
        self.logged_out_status = status;

        Ok(())
    }

    async fn is_blocked(&self, peer: Jid, owner_username: String) -> Result<bool, Error> {
        let _ = owner_username;
        Ok(self.blocked.contains(&peer.to_bare().to_string()))
    }
}

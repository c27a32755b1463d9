use std::{fmt::Display, str::FromStr};

use anyhow::Error;
use argon2::{
    Argon2,
    password_hash::{self, PasswordHash, PasswordVerifier, PasswordHasher, SaltString, rand_core::OsRng},
};

use confidante_core::xmpp::jid::Jid;
use confidante_backend::store::StoredPasswordLookup;

use super::{MechanismNegotiatorResult, StoredPassword};

#[derive(Debug)]
pub struct StoredPasswordArgon2 {
    pub hash: password_hash::PasswordHashString,
}

impl StoredPassword for StoredPasswordArgon2 {
    fn new(plaintext: &str) -> Result<Self, Error> {
        let salt = SaltString::generate(&mut OsRng);
        let argon2 = Argon2::default();
        let hash = argon2.hash_password(plaintext.as_bytes(), &salt)?.into();
        Ok(Self { hash })
    }
}

impl FromStr for StoredPasswordArgon2 {
    type Err = password_hash::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hash = password_hash::PasswordHashString::new(s)?;
        Ok(Self { hash })
    }
}

impl Display for StoredPasswordArgon2 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.hash)
    }
}

/// `PLAIN` per RFC 4616: a single message, `\0authzid\0authcid\0password`,
/// verified in one round against the stored Argon2 hash. No challenges.
pub struct PlainNegotiator<S> {
    resolved_domain: String,
    store: S,
}

impl<S> PlainNegotiator<S>
where
    S: StoredPasswordLookup + Send + Sync,
{
    pub fn new(resolved_domain: String, store: S) -> Self {
        Self {
            resolved_domain,
            store,
        }
    }

    pub async fn process(&mut self, payload: Vec<u8>) -> MechanismNegotiatorResult {
        match self.verify(payload).await {
            Ok(jid) => MechanismNegotiatorResult::Success(jid, None),
            Err(err) => MechanismNegotiatorResult::Failure(err),
        }
    }

    async fn verify(&mut self, payload: Vec<u8>) -> Result<Jid, Error> {
        let mut parts = payload.split(|&b| b == 0);
        let _authzid = parts.next();
        let authcid = parts
            .next()
            .ok_or_else(|| anyhow::anyhow!("PLAIN message missing authcid"))?;
        let password = parts
            .next()
            .ok_or_else(|| anyhow::anyhow!("PLAIN message missing password"))?;

        let authcid = std::str::from_utf8(authcid)?;
        let password = std::str::from_utf8(password)?;

        let jid = Jid::new(Some(authcid), &self.resolved_domain, None)?;

        let stored = self
            .store
            .get_stored_password_argon2(jid.clone())
            .await?;
        let hash = PasswordHash::new(&stored)?;
        Argon2::default().verify_password(password.as_bytes(), &hash)?;

        Ok(jid)
    }
}

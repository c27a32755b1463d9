use std::collections::HashMap;
use std::fmt::Display;

use anyhow::{Error, anyhow, bail};
use confidante_core::xmpp::jid::Jid;
use md5::{Digest, Md5};

use confidante_backend::store::StoredPasswordLookup;

use super::MechanismNegotiatorResult;
use super::common::generate_nonce;

/// A stored DIGEST-MD5 credential: `HA1 = MD5(username:realm:password)`,
/// hex-encoded. RFC 2831 only lets a server verify a response against this
/// exact precomputed hash, never against the plaintext password.
#[derive(Debug)]
pub struct StoredPasswordDigestMd5 {
    pub ha1_hex: String,
}

impl Display for StoredPasswordDigestMd5 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.ha1_hex)
    }
}

impl StoredPasswordDigestMd5 {
    pub fn compute(username: &str, realm: &str, plaintext: &str) -> Self {
        let mut hasher = Md5::new();
        hasher.update(format!("{username}:{realm}:{plaintext}").as_bytes());
        Self {
            ha1_hex: hex::encode(hasher.finalize()),
        }
    }
}

enum State {
    AwaitingResponse { nonce: String, realm: String },
    Done,
}

/// `DIGEST-MD5` per RFC 2831: one challenge, one response, no further
/// rounds. Disabled by default; an operator opts in per the configured
/// mechanism list because the protocol has been deprecated in favor of
/// SCRAM since RFC 6331.
pub struct DigestMd5Negotiator<S> {
    resolved_domain: String,
    store: S,
    state: State,
}

impl<S> DigestMd5Negotiator<S>
where
    S: StoredPasswordLookup + Send + Sync,
{
    pub fn new(resolved_domain: String, store: S) -> Self {
        let nonce = generate_nonce();
        let realm = resolved_domain.clone();
        Self {
            resolved_domain,
            store,
            state: State::AwaitingResponse { nonce, realm },
        }
    }

    pub async fn process(&mut self, payload: Vec<u8>) -> MechanismNegotiatorResult {
        match std::mem::replace(&mut self.state, State::Done) {
            State::AwaitingResponse { nonce, realm } if payload.is_empty() => {
                let challenge = format!(
                    r#"realm="{realm}",nonce="{nonce}",qop="auth",charset=utf-8,algorithm=md5-sess"#
                );
                self.state = State::AwaitingResponse { nonce, realm };
                MechanismNegotiatorResult::Challenge(challenge.into_bytes())
            }
            State::AwaitingResponse { nonce, realm } => {
                match self.verify(&payload, &nonce, &realm).await {
                    Ok(jid) => MechanismNegotiatorResult::Success(jid, None),
                    Err(err) => {
                        tracing::debug!(%err, "DIGEST-MD5 authentication failed");
                        MechanismNegotiatorResult::Failure(err)
                    }
                }
            }
            State::Done => MechanismNegotiatorResult::Failure(anyhow!(
                "DIGEST-MD5 exchange already completed"
            )),
        }
    }

    async fn verify(&mut self, payload: &[u8], nonce: &str, realm: &str) -> Result<Jid, Error> {
        let message = std::str::from_utf8(payload)?;
        let attrs = parse_digest_attrs(message);

        let username = required(&attrs, "username")?;
        let attr_nonce = required(&attrs, "nonce")?;
        let cnonce = required(&attrs, "cnonce")?;
        let nc = required(&attrs, "nc")?;
        let qop = attrs.get("qop").cloned().unwrap_or_else(|| "auth".to_string());
        let digest_uri = required(&attrs, "digest-uri")?;
        let response = required(&attrs, "response")?;

        if attr_nonce != nonce {
            bail!("DIGEST-MD5 response nonce does not match the issued challenge");
        }

        let jid = Jid::new(Some(&username), &self.resolved_domain, None)?;
        let ha1_hex = self.store.get_stored_password_digest_md5(jid.clone()).await?;

        let a1 = {
            let mut hasher = Md5::new();
            hasher.update(format!(":{nonce}:{cnonce}").as_bytes());
            let ha1_bytes = hex::decode(&ha1_hex)?;
            let mut combined = ha1_bytes;
            combined.extend_from_slice(&hasher.finalize());
            combined
        };
        let ha1 = hex::encode(Md5::digest(&a1));

        let a2 = format!("AUTHENTICATE:{digest_uri}");
        let ha2 = hex::encode(Md5::digest(a2.as_bytes()));

        let kd_input = format!("{ha1}:{nonce}:{nc}:{cnonce}:{qop}:{ha2}");
        let expected = hex::encode(Md5::digest(kd_input.as_bytes()));

        if expected != response {
            bail!("DIGEST-MD5 response digest mismatch");
        }

        Ok(jid)
    }
}

fn parse_digest_attrs(message: &str) -> HashMap<String, String> {
    let mut attrs = HashMap::new();
    for field in split_digest_fields(message) {
        if let Some((key, value)) = field.split_once('=') {
            let value = value.trim().trim_matches('"');
            attrs.insert(key.trim().to_string(), value.to_string());
        }
    }
    attrs
}

/// Splits on top-level commas only, respecting quoted-string values that may
/// themselves contain commas (RFC 2831's `digest-uri`, for example).
fn split_digest_fields(message: &str) -> Vec<&str> {
    let mut fields = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (i, c) in message.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                fields.push(&message[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    fields.push(&message[start..]);
    fields
}

fn required(attrs: &HashMap<String, String>, key: &str) -> Result<String, Error> {
    attrs
        .get(key)
        .cloned()
        .ok_or_else(|| anyhow!("DIGEST-MD5 response missing required attribute `{key}`"))
}

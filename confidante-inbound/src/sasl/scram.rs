use std::{
    fmt::{Display, Formatter},
    marker::PhantomData,
    num::NonZero,
    str::FromStr,
};

use anyhow::{Error, anyhow, bail};
use base64::prelude::*;
use confidante_core::xmpp::jid::Jid;
use digest::{Digest, FixedOutputReset, core_api::BlockSizeUser};

use confidante_backend::store::StoredPasswordLookup;

use super::common::{generate_nonce, h, hmac, parse_scram_attrs, required_attr, xor};
use super::{MechanismNegotiatorResult, StoredPassword};

const SCRAM_ITERATIONS: u32 = 4096;

#[derive(Debug, Clone)]
pub struct StoredPasswordScram<D> {
    iterations: NonZero<u32>,
    salt: Vec<u8>,
    stored_key: Vec<u8>,
    server_key: Vec<u8>,
    _digest_type: PhantomData<D>,
}

impl<D> StoredPassword for StoredPasswordScram<D>
where
    D: Digest + BlockSizeUser + FixedOutputReset + Clone,
{
    fn new(plaintext: &str) -> Result<Self, Error> {
        let salt = generate_salt();
        let salted_password = derive_salted_password::<D>(plaintext.as_bytes(), &salt, SCRAM_ITERATIONS);
        let (client_key, server_key) = derive_keys::<D>(&salted_password);
        let stored_key = h::<D>(&client_key);

        Ok(Self {
            iterations: NonZero::new(SCRAM_ITERATIONS).expect("iterations is a positive constant"),
            salt,
            stored_key,
            server_key,
            _digest_type: PhantomData,
        })
    }
}

impl<D> FromStr for StoredPasswordScram<D> {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('$').collect();

        if parts.len() != 6 {
            bail!("invalid SCRAM stored-password format");
        }

        let iterations = parts[2].parse::<NonZero<u32>>()?;
        let salt = BASE64_STANDARD.decode(parts[3])?;
        let stored_key = BASE64_STANDARD.decode(parts[4])?;
        let server_key = BASE64_STANDARD.decode(parts[5])?;

        if iterations.get() != SCRAM_ITERATIONS {
            bail!("SCRAM iteration count outdated, password must be reset");
        }

        Ok(Self {
            iterations,
            salt,
            stored_key,
            server_key,
            _digest_type: PhantomData,
        })
    }
}

impl<D> Display for StoredPasswordScram<D>
where
    D: MechanismDigest,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "${}${}${}${}${}",
            D::mechanism_name(false),
            self.iterations,
            BASE64_STANDARD.encode(&self.salt),
            BASE64_STANDARD.encode(&self.stored_key),
            BASE64_STANDARD.encode(&self.server_key),
        )
    }
}

pub trait MechanismDigest {
    fn mechanism_name(channel_binding: bool) -> &'static str;
    fn cb_name() -> &'static str;
    fn lookup_password<S>(
        jid: Jid,
        store: &S,
    ) -> impl std::future::Future<Output = Result<String, Error>> + Send
    where
        S: StoredPasswordLookup + Send + Sync;
}

impl MechanismDigest for sha1::Sha1 {
    fn mechanism_name(channel_binding: bool) -> &'static str {
        if channel_binding {
            "SCRAM-SHA-1-PLUS"
        } else {
            "SCRAM-SHA-1"
        }
    }

    fn cb_name() -> &'static str {
        "tls-exporter"
    }

    fn lookup_password<S>(
        jid: Jid,
        store: &S,
    ) -> impl std::future::Future<Output = Result<String, Error>> + Send
    where
        S: StoredPasswordLookup + Send + Sync,
    {
        store.get_stored_password_scram_sha1(jid)
    }
}

impl MechanismDigest for sha2::Sha256 {
    fn mechanism_name(channel_binding: bool) -> &'static str {
        if channel_binding {
            "SCRAM-SHA-256-PLUS"
        } else {
            "SCRAM-SHA-256"
        }
    }

    fn cb_name() -> &'static str {
        "tls-exporter"
    }

    fn lookup_password<S>(
        jid: Jid,
        store: &S,
    ) -> impl std::future::Future<Output = Result<String, Error>> + Send
    where
        S: StoredPasswordLookup + Send + Sync,
    {
        store.get_stored_password_scram_sha256(jid)
    }
}

fn generate_salt() -> Vec<u8> {
    use rand::RngCore;
    let mut salt = vec![0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

fn derive_salted_password<D>(password: &[u8], salt: &[u8], iterations: u32) -> Vec<u8>
where
    D: Digest + BlockSizeUser + FixedOutputReset + Clone,
{
    let mut output = vec![0u8; <D as Digest>::output_size()];
    pbkdf2::pbkdf2_hmac::<D>(password, salt, iterations, &mut output);
    output
}

/// `ClientKey = HMAC(SaltedPassword, "Client Key")`,
/// `ServerKey = HMAC(SaltedPassword, "Server Key")`, per RFC 5802 §3.
fn derive_keys<D>(salted_password: &[u8]) -> (Vec<u8>, Vec<u8>)
where
    D: Digest + BlockSizeUser + FixedOutputReset + Clone,
{
    let client_key = hmac::<D>(salted_password, b"Client Key");
    let server_key = hmac::<D>(salted_password, b"Server Key");
    (client_key, server_key)
}

enum State {
    AwaitingClientFirst,
    AwaitingClientFinal {
        username: String,
        client_first_bare: String,
        server_first: String,
        server_key: Vec<u8>,
        stored_key: Vec<u8>,
        combined_nonce: String,
        gs2_header: Vec<u8>,
    },
    Done,
}

/// A single SASL SCRAM exchange: `client-first` -> `server-first` ->
/// `client-final` -> `server-final`, per RFC 5802. Generic over the hash
/// family (`Sha1`/`Sha256`) so `SCRAM-SHA-1` and `SCRAM-SHA-256` share one
/// implementation.
pub struct ScramNegotiator<S, D> {
    resolved_domain: String,
    channel_binding: bool,
    expected_channel_binding_data: Option<Vec<u8>>,
    store: S,
    state: State,
    _digest_type: PhantomData<D>,
}

impl<S, D> ScramNegotiator<S, D>
where
    S: StoredPasswordLookup + Send + Sync,
    D: Digest + BlockSizeUser + FixedOutputReset + MechanismDigest + Clone + Send + Sync,
{
    pub fn new(
        resolved_domain: String,
        channel_binding: bool,
        expected_channel_binding_data: Option<Vec<u8>>,
        store: S,
    ) -> Result<Self, Error> {
        if channel_binding && expected_channel_binding_data.is_none() {
            bail!("channel binding requested but connection has no binding data");
        }

        Ok(Self {
            resolved_domain,
            channel_binding,
            expected_channel_binding_data,
            store,
            state: State::AwaitingClientFirst,
            _digest_type: PhantomData,
        })
    }

    pub async fn process(&mut self, payload: Vec<u8>) -> MechanismNegotiatorResult {
        match self.try_process(payload).await {
            Ok(result) => result,
            Err(err) => MechanismNegotiatorResult::Failure(err),
        }
    }

    async fn try_process(&mut self, payload: Vec<u8>) -> Result<MechanismNegotiatorResult, Error> {
        let message = String::from_utf8(payload)?;

        match std::mem::replace(&mut self.state, State::Done) {
            State::AwaitingClientFirst => self.handle_client_first(&message).await,
            State::AwaitingClientFinal {
                username,
                client_first_bare,
                server_first,
                server_key,
                stored_key,
                combined_nonce,
                gs2_header,
            } => {
                self.handle_client_final(
                    &message,
                    &username,
                    &client_first_bare,
                    &server_first,
                    &server_key,
                    &stored_key,
                    &combined_nonce,
                    &gs2_header,
                )
                .await
            }
            State::Done => bail!("SCRAM exchange already completed"),
        }
    }

    async fn handle_client_first(
        &mut self,
        message: &str,
    ) -> Result<MechanismNegotiatorResult, Error> {
        let (gs2_header, client_first_bare) = split_gs2_header(message)?;
        self.validate_gs2_header(&gs2_header)?;

        let attrs = parse_scram_attrs(client_first_bare);
        let username = required_attr(&attrs, 'n')?;
        let client_nonce = required_attr(&attrs, 'r')?;

        let jid = Jid::new(Some(&username), &self.resolved_domain, None)?;
        let stored_password = D::lookup_password(jid.clone(), &self.store).await?;
        let stored_password: StoredPasswordScram<D> = stored_password.parse()?;

        let server_nonce = generate_nonce();
        let combined_nonce = format!("{client_nonce}{server_nonce}");
        let server_first = format!(
            "r={combined_nonce},s={},i={}",
            BASE64_STANDARD.encode(&stored_password.salt),
            stored_password.iterations,
        );

        self.state = State::AwaitingClientFinal {
            username,
            client_first_bare: client_first_bare.to_string(),
            server_first: server_first.clone(),
            server_key: stored_password.server_key,
            stored_key: stored_password.stored_key,
            combined_nonce,
            gs2_header,
        };

        Ok(MechanismNegotiatorResult::Challenge(
            server_first.into_bytes(),
        ))
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_client_final(
        &mut self,
        message: &str,
        username: &str,
        client_first_bare: &str,
        server_first: &str,
        server_key: &[u8],
        stored_key: &[u8],
        combined_nonce: &str,
        gs2_header: &[u8],
    ) -> Result<MechanismNegotiatorResult, Error> {
        let attrs = parse_scram_attrs(message);
        let channel_binding_b64 = required_attr(&attrs, 'c')?;
        let nonce = required_attr(&attrs, 'r')?;
        let proof_b64 = required_attr(&attrs, 'p')?;

        if nonce != combined_nonce {
            bail!("SCRAM client-final nonce does not match the combined nonce");
        }

        let expected_cb_input = match &self.expected_channel_binding_data {
            Some(data) if self.channel_binding => {
                let mut input = gs2_header.to_vec();
                input.extend_from_slice(data);
                BASE64_STANDARD.encode(input)
            }
            _ => BASE64_STANDARD.encode(gs2_header),
        };

        if channel_binding_b64 != expected_cb_input {
            bail!("SCRAM channel-binding data does not match the connection");
        }

        let client_final_without_proof = format!("c={channel_binding_b64},r={nonce}");
        let auth_message =
            format!("{client_first_bare},{server_first},{client_final_without_proof}");

        let client_signature = hmac::<D>(stored_key, auth_message.as_bytes());
        let client_proof = BASE64_STANDARD.decode(&proof_b64)?;
        let recovered_client_key = xor(&client_signature, &client_proof);

        if h::<D>(&recovered_client_key) != stored_key {
            bail!("SCRAM proof verification failed");
        }

        let server_signature = hmac::<D>(server_key, auth_message.as_bytes());
        let server_final = format!("v={}", BASE64_STANDARD.encode(server_signature));

        let jid = Jid::new(Some(username), &self.resolved_domain, None)?;
        self.state = State::Done;

        Ok(MechanismNegotiatorResult::Success(
            jid,
            Some(server_final.into_bytes()),
        ))
    }

    fn validate_gs2_header(&self, gs2_header: &[u8]) -> Result<(), Error> {
        let header = std::str::from_utf8(gs2_header)?;
        let uses_channel_binding = header.starts_with(&format!("p={}", D::cb_name()));

        if uses_channel_binding != self.channel_binding {
            bail!("SCRAM channel-binding flag does not match the negotiated mechanism");
        }

        Ok(())
    }
}

/// Splits `gs2-header + client-first-message-bare` on the second comma of
/// the GS2 header (`n,,` / `y,,` / `p=cb-name,,`), returning the header
/// bytes (kept verbatim for the channel-binding check) and the bare part.
fn split_gs2_header(message: &str) -> Result<(Vec<u8>, &str), Error> {
    let mut parts = message.splitn(3, ',');
    let gs2_cb_flag = parts.next().ok_or_else(|| anyhow!("empty SCRAM message"))?;
    let gs2_authzid = parts
        .next()
        .ok_or_else(|| anyhow!("SCRAM message missing GS2 header"))?;
    let rest = parts
        .next()
        .ok_or_else(|| anyhow!("SCRAM message missing client-first-message-bare"))?;

    let header_len = gs2_cb_flag.len() + 1 + gs2_authzid.len() + 1;
    let gs2_header = message[..header_len].as_bytes().to_vec();

    Ok((gs2_header, rest))
}

use std::fmt::Display;

use anyhow::{Error, bail};
use base64::prelude::*;
use sha1::Sha1;
use sha2::Sha256;
use tokio::io::ReadHalf;
use tokio_stream::StreamExt;

use confidante_core::{
    error::SaslError,
    xml::{
        Element, namespaces,
        stream_parser::{Frame, StreamParser},
    },
    xmpp::{
        compression::Decompressor,
        jid::Jid,
        stream::{Connection, XmppStream},
    },
};
use confidante_backend::store::StoredPasswordLookup;

use crate::sasl::digest_md5::DigestMd5Negotiator;
use crate::sasl::external::ExternalNegotiator;
use crate::sasl::scram::ScramNegotiator;

pub use self::digest_md5::StoredPasswordDigestMd5;
pub use self::plain::StoredPasswordArgon2;
pub use self::scram::StoredPasswordScram;

mod common;
mod digest_md5;
mod external;
mod plain;
mod scram;

pub trait StoredPassword: std::str::FromStr + Display {
    fn new(plaintext: &str) -> Result<Self, Error>;
}

/// What a client ends up with after a full `<auth>` exchange. `Failed`
/// (mechanism rejected the credentials, or the client `<abort>`ed) is not a
/// stream-fatal condition: the stream just returns to
/// `connected` and waits for the client to try again.
pub(super) enum SaslOutcome {
    Authenticated(Jid),
    Failed,
}

pub(super) struct SaslNegotiator {
    _private: (),
}

impl SaslNegotiator {
    /// Renders the `<mechanisms>` feature, filtered and ordered to mirror
    /// `configured` exactly: mechanism list order in the advertised features
    /// mirrors configuration order.
    pub fn advertise_feature(
        configured: &[String],
        secure: bool,
        channel_binding_available: bool,
    ) -> Element {
        let mut mechanisms = Element::new("mechanisms", Some(namespaces::XMPP_SASL));
        mechanisms.set_attribute("xmlns", None::<String>, namespaces::XMPP_SASL);

        for name in configured {
            let Ok(mechanism) = Mechanism::try_from(name.as_str()) else {
                continue;
            };

            if Self::mechanism_available(&mechanism, secure, channel_binding_available) {
                mechanisms.add_child(mechanism.into());
            }
        }

        mechanisms
    }

    pub async fn negotiate_feature<C, P, S>(
        stream: &mut XmppStream<C, P>,
        element: &Element,
        resolved_domain: String,
        store: S,
    ) -> Result<SaslOutcome, Error>
    where
        C: Connection,
        P: StreamParser<Decompressor<ReadHalf<C>>>,
        S: StoredPasswordLookup + Send + Sync,
    {
        if !element.validate("auth", Some(namespaces::XMPP_SASL)) {
            bail!("expected auth element");
        }

        let mechanism = match element
            .attribute("mechanism", None)
            .and_then(|name| Mechanism::try_from(name).ok())
        {
            Some(mechanism) => mechanism,
            None => {
                stream
                    .writer()
                    .write_xml_element(&SaslError::InvalidMechanism.to_element())
                    .await?;
                return Ok(SaslOutcome::Failed);
            }
        };

        let channel_binding_data = stream.channel_binding().map(|cb| cb.to_vec());
        let mut negotiator = mechanism.negotiator(resolved_domain, channel_binding_data, store)?;
        let mut response_payload = BASE64_STANDARD
            .decode(element.text())
            .map_err(|_| SaslError::IncorrectEncoding)?;

        loop {
            let result = negotiator.process(response_payload).await;

            match result {
                MechanismNegotiatorResult::Challenge(challenge) => {
                    let challenge = BASE64_STANDARD.encode(challenge);
                    let mut xml = Element::new("challenge", Some(namespaces::XMPP_SASL));
                    xml.set_attribute("xmlns", None::<String>, namespaces::XMPP_SASL);
                    xml.add_text(challenge);

                    stream.writer().write_xml_element(&xml).await?;
                }
                MechanismNegotiatorResult::Success(jid, additional_data) => {
                    let mut xml = Element::new("success", Some(namespaces::XMPP_SASL));
                    xml.set_attribute("xmlns", None::<String>, namespaces::XMPP_SASL);
                    if let Some(additional_data) = additional_data {
                        xml.add_text(BASE64_STANDARD.encode(additional_data));
                    }

                    stream.writer().write_xml_element(&xml).await?;
                    return Ok(SaslOutcome::Authenticated(jid));
                }
                MechanismNegotiatorResult::Failure(err) => {
                    tracing::debug!(%err, "SASL mechanism negotiation failed");
                    let condition = err
                        .downcast_ref::<SaslError>()
                        .copied()
                        .unwrap_or(SaslError::NotAuthorized);

                    stream.writer().write_xml_element(&condition.to_element()).await?;
                    return Ok(SaslOutcome::Failed);
                }
            }

            let Some(Ok(Frame::XmlFragment(response))) = stream.reader().next().await else {
                bail!("expected xml fragment");
            };

            if response.validate("response", Some(namespaces::XMPP_SASL)) {
                response_payload = BASE64_STANDARD
                    .decode(response.text())
                    .map_err(|_| SaslError::IncorrectEncoding)?;
            } else if response.validate("abort", Some(namespaces::XMPP_SASL)) {
                stream
                    .writer()
                    .write_xml_element(&SaslError::Aborted.to_element())
                    .await?;
                return Ok(SaslOutcome::Failed);
            } else {
                bail!("unexpected element during SASL negotiation");
            }
        }
    }

    fn mechanism_available(mechanism: &Mechanism, secure: bool, channel_binding_available: bool) -> bool {
        match mechanism {
            Mechanism::External => secure,
            Mechanism::Plain => secure,
            Mechanism::DigestMd5 => true,
            Mechanism::ScramSha1 | Mechanism::ScramSha256 => true,
            Mechanism::ScramSha1Plus | Mechanism::ScramSha256Plus => channel_binding_available,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub(super) enum MechanismParseError {
    #[error("the SASL mechanism `{0}` is not supported")]
    Unsupported(String),
}

#[derive(Debug, Clone, Copy)]
enum Mechanism {
    External,
    Plain,
    DigestMd5,
    ScramSha1,
    ScramSha1Plus,
    ScramSha256,
    ScramSha256Plus,
}

impl Mechanism {
    fn negotiator<S>(
        &self,
        resolved_domain: String,
        channel_binding_data: Option<Vec<u8>>,
        store: S,
    ) -> Result<MechanismNegotiator<S>, Error>
    where
        S: StoredPasswordLookup + Send + Sync,
    {
        match self {
            Mechanism::External => Ok(MechanismNegotiator::External(ExternalNegotiator::new())),
            Mechanism::Plain => Ok(MechanismNegotiator::Plain(plain::PlainNegotiator::new(
                resolved_domain,
                store,
            ))),
            Mechanism::DigestMd5 => Ok(MechanismNegotiator::DigestMd5(DigestMd5Negotiator::new(
                resolved_domain,
                store,
            ))),
            Mechanism::ScramSha1 => ScramNegotiator::<S, Sha1>::new(resolved_domain, false, None, store)
                .map(MechanismNegotiator::ScramSha1),
            Mechanism::ScramSha1Plus => {
                ScramNegotiator::<S, Sha1>::new(resolved_domain, true, channel_binding_data, store)
                    .map(MechanismNegotiator::ScramSha1Plus)
            }
            Mechanism::ScramSha256 => {
                ScramNegotiator::<S, Sha256>::new(resolved_domain, false, None, store)
                    .map(MechanismNegotiator::ScramSha256)
            }
            Mechanism::ScramSha256Plus => {
                ScramNegotiator::<S, Sha256>::new(resolved_domain, true, channel_binding_data, store)
                    .map(MechanismNegotiator::ScramSha256Plus)
            }
        }
    }
}

impl TryFrom<&str> for Mechanism {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "EXTERNAL" => Ok(Mechanism::External),
            "PLAIN" => Ok(Mechanism::Plain),
            "DIGEST-MD5" => Ok(Mechanism::DigestMd5),
            "SCRAM-SHA-1" => Ok(Mechanism::ScramSha1),
            "SCRAM-SHA-1-PLUS" => Ok(Mechanism::ScramSha1Plus),
            "SCRAM-SHA-256" => Ok(Mechanism::ScramSha256),
            "SCRAM-SHA-256-PLUS" => Ok(Mechanism::ScramSha256Plus),
            _ => bail!(MechanismParseError::Unsupported(value.into())),
        }
    }
}

impl TryFrom<String> for Mechanism {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Mechanism::try_from(value.as_str())
    }
}

impl Display for Mechanism {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mechanism::External => write!(f, "EXTERNAL"),
            Mechanism::Plain => write!(f, "PLAIN"),
            Mechanism::DigestMd5 => write!(f, "DIGEST-MD5"),
            Mechanism::ScramSha1 => write!(f, "SCRAM-SHA-1"),
            Mechanism::ScramSha1Plus => write!(f, "SCRAM-SHA-1-PLUS"),
            Mechanism::ScramSha256 => write!(f, "SCRAM-SHA-256"),
            Mechanism::ScramSha256Plus => write!(f, "SCRAM-SHA-256-PLUS"),
        }
    }
}

impl From<Mechanism> for Element {
    fn from(mechanism: Mechanism) -> Self {
        let mut element = Element::new("mechanism", Some(namespaces::XMPP_SASL));
        element.add_text(mechanism.to_string());

        element
    }
}

enum MechanismNegotiatorResult {
    Challenge(Vec<u8>),
    Success(Jid, Option<Vec<u8>>),
    Failure(Error),
}

enum MechanismNegotiator<S> {
    External(ExternalNegotiator),
    Plain(plain::PlainNegotiator<S>),
    DigestMd5(DigestMd5Negotiator<S>),
    ScramSha1(ScramNegotiator<S, Sha1>),
    ScramSha1Plus(ScramNegotiator<S, Sha1>),
    ScramSha256(ScramNegotiator<S, Sha256>),
    ScramSha256Plus(ScramNegotiator<S, Sha256>),
}

impl<S> MechanismNegotiator<S>
where
    S: StoredPasswordLookup + Send + Sync,
{
    async fn process(&mut self, payload: Vec<u8>) -> MechanismNegotiatorResult {
        match self {
            MechanismNegotiator::External(negotiator) => negotiator.process(payload).await,
            MechanismNegotiator::Plain(negotiator) => negotiator.process(payload).await,
            MechanismNegotiator::DigestMd5(negotiator) => negotiator.process(payload).await,
            MechanismNegotiator::ScramSha1(negotiator) => negotiator.process(payload).await,
            MechanismNegotiator::ScramSha1Plus(negotiator) => negotiator.process(payload).await,
            MechanismNegotiator::ScramSha256(negotiator) => negotiator.process(payload).await,
            MechanismNegotiator::ScramSha256Plus(negotiator) => negotiator.process(payload).await,
        }
    }
}

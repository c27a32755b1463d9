use thiserror::Error;

use crate::xml::namespaces;
use crate::xml::Element;

/// A fatal, stream-level condition: the stream (and the connection backing
/// it) is closed after one of these is sent, per RFC 6120 §4.9.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum StreamError {
    #[error("invalid-xml")]
    InvalidXml,
    #[error("invalid-namespace")]
    InvalidNamespace,
    #[error("host-unknown")]
    HostUnknown,
    #[error("unsupported-version")]
    UnsupportedVersion,
    #[error("unsupported-stanza-type")]
    UnsupportedStanzaType,
    #[error("not-authorized")]
    NotAuthorized,
    #[error("invalid-from")]
    InvalidFrom,
    #[error("policy-violation")]
    PolicyViolation,
    #[error("connection-timeout")]
    ConnectionTimeout,
    #[error("resource-constraint")]
    ResourceConstraint,
    #[error("internal-server-error")]
    InternalServerError,
}

impl StreamError {
    pub fn condition(&self) -> &'static str {
        match self {
            Self::InvalidXml => "invalid-xml",
            Self::InvalidNamespace => "invalid-namespace",
            Self::HostUnknown => "host-unknown",
            Self::UnsupportedVersion => "unsupported-version",
            Self::UnsupportedStanzaType => "unsupported-stanza-type",
            Self::NotAuthorized => "not-authorized",
            Self::InvalidFrom => "invalid-from",
            Self::PolicyViolation => "policy-violation",
            Self::ConnectionTimeout => "connection-timeout",
            Self::ResourceConstraint => "resource-constraint",
            Self::InternalServerError => "internal-server-error",
        }
    }

    /// Builds the `<stream:error>` element carrying this condition.
    pub fn to_element(self) -> Element {
        let mut error = Element::new("error", Some(namespaces::XMPP_STREAMS));
        error.with_child(self.condition(), Some(namespaces::XMPP_STREAM_ERRORS), |_| {});
        error
    }
}

/// A recoverable, per-stanza condition: returned as an errored copy of the
/// originating stanza, with no stream state change.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum StanzaError {
    #[error("bad-request")]
    BadRequest,
    #[error("conflict")]
    Conflict,
    #[error("jid-malformed")]
    JidMalformed,
    #[error("not-acceptable")]
    NotAcceptable,
    #[error("not-allowed")]
    NotAllowed,
    #[error("service-unavailable")]
    ServiceUnavailable,
}

impl StanzaError {
    pub fn condition(&self) -> &'static str {
        match self {
            Self::BadRequest => "bad-request",
            Self::Conflict => "conflict",
            Self::JidMalformed => "jid-malformed",
            Self::NotAcceptable => "not-acceptable",
            Self::NotAllowed => "not-allowed",
            Self::ServiceUnavailable => "service-unavailable",
        }
    }

    /// `type` attribute recommended by RFC 6120 §8.3.2 for this condition.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::BadRequest | Self::JidMalformed | Self::NotAcceptable => "modify",
            Self::Conflict | Self::NotAllowed | Self::ServiceUnavailable => "cancel",
        }
    }

    pub fn to_element(self) -> Element {
        let mut error = Element::new("error", None);
        error.set_attribute("type", None::<&str>, self.error_type());
        error.with_child(self.condition(), Some(namespaces::XMPP_STANZA_ERRORS), |_| {});
        error
    }

    /// `<error type='cancel'><not-acceptable/><blocked .../></error>`, the
    /// shape required for a stanza addressed to a blocked JID.
    pub fn blocked() -> Element {
        let mut error = Element::new("error", None);
        error.set_attribute("type", None::<&str>, Self::NotAcceptable.error_type());
        error.with_child(
            Self::NotAcceptable.condition(),
            Some(namespaces::XMPP_STANZA_ERRORS),
            |_| {},
        );
        error.with_child("blocked", Some(namespaces::BLOCKING_ERRORS), |_| {});
        error
    }
}

/// SASL mechanism-level failures: carry a single child condition and reset
/// the authenticator without closing the stream.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SaslError {
    #[error("aborted")]
    Aborted,
    #[error("channel-binding-not-supported")]
    ChannelBindingNotSupported,
    #[error("encryption-required")]
    EncryptionRequired,
    #[error("incorrect-encoding")]
    IncorrectEncoding,
    #[error("invalid-mechanism")]
    InvalidMechanism,
    #[error("malformed-request")]
    MalformedRequest,
    #[error("mechanism-too-weak")]
    MechanismTooWeak,
    #[error("not-authorized")]
    NotAuthorized,
    #[error("temporary-auth-failure")]
    TemporaryAuthFailure,
}

impl SaslError {
    pub fn condition(&self) -> &'static str {
        match self {
            Self::Aborted => "aborted",
            Self::ChannelBindingNotSupported => "channel-binding-not-supported",
            Self::EncryptionRequired => "encryption-required",
            Self::IncorrectEncoding => "incorrect-encoding",
            Self::InvalidMechanism => "invalid-mechanism",
            Self::MalformedRequest => "malformed-request",
            Self::MechanismTooWeak => "mechanism-too-weak",
            Self::NotAuthorized => "not-authorized",
            Self::TemporaryAuthFailure => "temporary-auth-failure",
        }
    }

    pub fn to_element(self) -> Element {
        let mut failure = Element::new("failure", Some(namespaces::XMPP_SASL));
        failure.with_child(self.condition(), None, |_| {});
        failure
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_error_renders_condition_child() {
        let element = StreamError::HostUnknown.to_element();
        assert!(element.find_child("host-unknown", Some(namespaces::XMPP_STREAM_ERRORS)).is_some());
    }

    #[test]
    fn stanza_error_sets_type_attribute() {
        let element = StanzaError::ServiceUnavailable.to_element();
        assert_eq!(element.attribute("type", None), Some("cancel"));
    }

    #[test]
    fn sasl_error_renders_under_sasl_namespace() {
        let element = SaslError::NotAuthorized.to_element();
        assert!(element.validate("failure", Some(namespaces::XMPP_SASL)));
        assert!(element.find_child("not-authorized", None).is_some());
    }
}

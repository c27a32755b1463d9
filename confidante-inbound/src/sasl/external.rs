use anyhow::anyhow;

use confidante_core::error::SaslError;

use super::MechanismNegotiatorResult;

/// `EXTERNAL` per RFC 6120 §6.3.9: authentication derived from the
/// transport's own identity (a verified client certificate). No certificate
/// identity mapping is wired up, so every attempt fails
/// `temporary-auth-failure` rather than claiming an identity nobody vouched
/// for.
pub struct ExternalNegotiator {
    _private: (),
}

impl ExternalNegotiator {
    pub fn new() -> Self {
        Self { _private: () }
    }

    pub async fn process(&mut self, _payload: Vec<u8>) -> MechanismNegotiatorResult {
        MechanismNegotiatorResult::Failure(anyhow!(SaslError::TemporaryAuthFailure))
    }
}

//! Webhook subscription handshake.

use serde::Deserialize;
use subtle::ConstantTimeEq;

pub const VERIFICATION_FAILED_MESSAGE: &str = "hub.mode is not `subscribe`, or hub.verify_token does not match the provided environment's value";

const SUBSCRIBE_MODE: &str = "subscribe";

#[derive(Debug, Default, Deserialize)]
pub struct HandshakeQuery {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeOutcome {
    Accepted { challenge: String },
    Rejected,
}

#[derive(Clone)]
pub struct SubscriptionVerifier {
    verify_token: Option<String>,
}

impl SubscriptionVerifier {
    /// With no configured token every handshake is rejected.
    pub fn new(verify_token: Option<&str>) -> Self {
        Self {
            verify_token: verify_token.map(ToOwned::to_owned),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.verify_token.is_some()
    }

    pub fn verify(&self, query: &HandshakeQuery) -> HandshakeOutcome {
        let Some(expected) = self.verify_token.as_deref() else {
            return HandshakeOutcome::Rejected;
        };
        if query.mode.as_deref() != Some(SUBSCRIBE_MODE) {
            return HandshakeOutcome::Rejected;
        }
        let Some(provided) = query.verify_token.as_deref() else {
            return HandshakeOutcome::Rejected;
        };
        if !bool::from(provided.as_bytes().ct_eq(expected.as_bytes())) {
            return HandshakeOutcome::Rejected;
        }
        HandshakeOutcome::Accepted {
            challenge: query.challenge.clone().unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(mode: Option<&str>, token: Option<&str>, challenge: Option<&str>) -> HandshakeQuery {
        HandshakeQuery {
            mode: mode.map(ToOwned::to_owned),
            verify_token: token.map(ToOwned::to_owned),
            challenge: challenge.map(ToOwned::to_owned),
        }
    }

    #[test]
    fn matching_subscribe_echoes_challenge() {
        let verifier = SubscriptionVerifier::new(Some("s3cret"));
        assert_eq!(
            verifier.verify(&query(Some("subscribe"), Some("s3cret"), Some("xyz123"))),
            HandshakeOutcome::Accepted {
                challenge: "xyz123".to_string()
            }
        );
    }

    #[test]
    fn wrong_token_is_rejected() {
        let verifier = SubscriptionVerifier::new(Some("s3cret"));
        assert_eq!(
            verifier.verify(&query(Some("subscribe"), Some("guess"), Some("xyz123"))),
            HandshakeOutcome::Rejected
        );
        assert_eq!(
            verifier.verify(&query(Some("subscribe"), Some("s3cret-longer"), Some("x"))),
            HandshakeOutcome::Rejected
        );
    }

    #[test]
    fn mode_must_be_exactly_subscribe() {
        let verifier = SubscriptionVerifier::new(Some("s3cret"));
        for mode in ["unsubscribe", "SUBSCRIBE", " subscribe", ""] {
            assert_eq!(
                verifier.verify(&query(Some(mode), Some("s3cret"), Some("c"))),
                HandshakeOutcome::Rejected,
                "mode={mode:?}"
            );
        }
    }

    #[test]
    fn absent_parameters_are_rejected() {
        let verifier = SubscriptionVerifier::new(Some("s3cret"));
        assert_eq!(
            verifier.verify(&HandshakeQuery::default()),
            HandshakeOutcome::Rejected
        );
        assert_eq!(
            verifier.verify(&query(Some("subscribe"), None, Some("c"))),
            HandshakeOutcome::Rejected
        );
    }

    #[test]
    fn missing_challenge_echoes_empty_body() {
        let verifier = SubscriptionVerifier::new(Some("s3cret"));
        assert_eq!(
            verifier.verify(&query(Some("subscribe"), Some("s3cret"), None)),
            HandshakeOutcome::Accepted {
                challenge: String::new()
            }
        );
    }

    #[test]
    fn unconfigured_secret_rejects_everything() {
        let verifier = SubscriptionVerifier::new(None);
        assert!(!verifier.is_configured());
        assert_eq!(
            verifier.verify(&query(Some("subscribe"), Some(""), Some("c"))),
            HandshakeOutcome::Rejected
        );
    }
}

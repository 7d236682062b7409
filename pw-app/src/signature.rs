//! Request signature checks for webhook deliveries.
//!
//! A verifier runs on the raw body of every POST before anything is parsed.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureCheck {
    Accepted,
    Rejected(&'static str),
}

pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, raw_body: &[u8], signature_header: Option<&str>) -> SignatureCheck;

    /// Short label for startup logs.
    fn describe(&self) -> &'static str;
}

/// `X-Hub-Signature-256: sha256=<hex hmac of body keyed by the app secret>`.
pub struct HubSignatureVerifier {
    app_secret: Vec<u8>,
}

impl HubSignatureVerifier {
    pub fn new(app_secret: &str) -> Self {
        Self {
            app_secret: app_secret.as_bytes().to_vec(),
        }
    }

    fn digest(&self, raw_body: &[u8]) -> Option<Vec<u8>> {
        let mut mac = HmacSha256::new_from_slice(&self.app_secret).ok()?;
        mac.update(raw_body);
        Some(mac.finalize().into_bytes().to_vec())
    }
}

impl SignatureVerifier for HubSignatureVerifier {
    fn verify(&self, raw_body: &[u8], signature_header: Option<&str>) -> SignatureCheck {
        let Some(header) = signature_header.map(str::trim) else {
            return SignatureCheck::Rejected("missing signature header");
        };
        let Some(hex_digest) = header.strip_prefix("sha256=") else {
            return SignatureCheck::Rejected("unsupported signature scheme");
        };
        let Ok(provided) = hex::decode(hex_digest) else {
            return SignatureCheck::Rejected("signature is not hex");
        };
        let Some(expected) = self.digest(raw_body) else {
            return SignatureCheck::Rejected("signature key rejected");
        };
        if bool::from(expected.as_slice().ct_eq(provided.as_slice())) {
            SignatureCheck::Accepted
        } else {
            SignatureCheck::Rejected("signature mismatch")
        }
    }

    fn describe(&self) -> &'static str {
        "hmac-sha256"
    }
}

/// Accepts every delivery. Only installed when no app secret is configured.
pub struct UnsignedVerifier;

impl SignatureVerifier for UnsignedVerifier {
    fn verify(&self, _raw_body: &[u8], _signature_header: Option<&str>) -> SignatureCheck {
        SignatureCheck::Accepted
    }

    fn describe(&self) -> &'static str {
        "unsigned"
    }
}

pub fn verifier_for(app_secret: Option<&str>) -> Box<dyn SignatureVerifier> {
    match app_secret {
        Some(secret) => Box::new(HubSignatureVerifier::new(secret)),
        None => Box::new(UnsignedVerifier),
    }
}

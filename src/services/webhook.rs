//! Payment webhook authentication and event parsing.
//!
//! The provider signs each delivery with `Stripe-Signature: t=<unix>,v1=<hex>`
//! where the hex value is HMAC-SHA256 over `"<t>.<raw body>"` keyed with the
//! endpoint secret. Deliveries outside the tolerance window are rejected so a
//! captured request cannot be replayed later.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;

use crate::store::StoreError;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "Stripe-Signature";
pub const PAYMENT_SUCCEEDED: &str = "payment_intent.succeeded";

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("Missing signature header")]
    MissingSignature,
    #[error("Invalid signature")]
    SignatureInvalid,
    #[error("Malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: EventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub object: EventObject,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventObject {
    pub id: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl WebhookEvent {
    /// Booking id carried in the intent metadata, if present and numeric.
    pub fn booking_id(&self) -> Option<i64> {
        self.data.object.metadata.get("booking_id")?.trim().parse().ok()
    }

    pub fn intent_id(&self) -> &str {
        &self.data.object.id
    }
}

#[derive(Clone)]
pub struct WebhookVerifier {
    secret: String,
    tolerance_seconds: i64,
}

impl WebhookVerifier {
    pub fn new(secret: impl Into<String>, tolerance_seconds: i64) -> Self {
        Self { secret: secret.into(), tolerance_seconds }
    }

    /// Authenticates `payload` against the signature header and parses it.
    /// `now` is the current unix time in seconds.
    pub fn verify(&self, payload: &[u8], header: Option<&str>, now: i64) -> Result<WebhookEvent, WebhookError> {
        let header = header.filter(|h| !h.trim().is_empty()).ok_or(WebhookError::MissingSignature)?;
        let (timestamp, signatures) = parse_header(header).ok_or(WebhookError::SignatureInvalid)?;

        if now.abs_diff(timestamp) > self.tolerance_seconds.unsigned_abs() {
            return Err(WebhookError::SignatureInvalid);
        }

        let signed = signatures.iter().any(|candidate| {
            let Ok(expected) = hex::decode(candidate) else {
                return false;
            };
            keyed_mac(&self.secret, timestamp, payload)
                .map(|mac| mac.verify_slice(&expected).is_ok())
                .unwrap_or(false)
        });
        if !signed {
            return Err(WebhookError::SignatureInvalid);
        }

        Ok(serde_json::from_slice(payload)?)
    }
}

/// Builds a header value the verifier accepts. Used by tests and local tools
/// that replay provider events.
pub fn signature_header(secret: &str, payload: &[u8], timestamp: i64) -> Result<String, WebhookError> {
    let mac = keyed_mac(secret, timestamp, payload)?;
    Ok(format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes())))
}

fn keyed_mac(secret: &str, timestamp: i64, payload: &[u8]) -> Result<HmacSha256, WebhookError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| WebhookError::SignatureInvalid)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac)
}

fn parse_header(header: &str) -> Option<(i64, Vec<&str>)> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let (key, value) = part.trim().split_once('=')?;
        match key {
            "t" => timestamp = value.parse::<i64>().ok(),
            "v1" => signatures.push(value),
            _ => {}
        }
    }

    match (timestamp, signatures.is_empty()) {
        (Some(t), false) => Some((t, signatures)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test";
    const NOW: i64 = 1_750_000_000;

    fn payload() -> Vec<u8> {
        serde_json::json!({
            "id": "evt_1",
            "type": "payment_intent.succeeded",
            "data": { "object": { "id": "pi_1", "metadata": { "booking_id": "7" } } }
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn accepts_valid_signature() {
        let verifier = WebhookVerifier::new(SECRET, 300);
        let body = payload();
        let header = signature_header(SECRET, &body, NOW).unwrap();

        let event = verifier.verify(&body, Some(&header), NOW + 10).unwrap();
        assert_eq!(event.event_type, PAYMENT_SUCCEEDED);
        assert_eq!(event.intent_id(), "pi_1");
        assert_eq!(event.booking_id(), Some(7));
    }

    #[test]
    fn rejects_tampered_body() {
        let verifier = WebhookVerifier::new(SECRET, 300);
        let header = signature_header(SECRET, &payload(), NOW).unwrap();
        let tampered = payload().iter().map(|b| if *b == b'7' { b'8' } else { *b }).collect::<Vec<_>>();

        assert!(matches!(
            verifier.verify(&tampered, Some(&header), NOW),
            Err(WebhookError::SignatureInvalid)
        ));
    }

    #[test]
    fn rejects_wrong_secret_and_stale_timestamp() {
        let verifier = WebhookVerifier::new(SECRET, 300);
        let body = payload();

        let foreign = signature_header("whsec_other", &body, NOW).unwrap();
        assert!(matches!(verifier.verify(&body, Some(&foreign), NOW), Err(WebhookError::SignatureInvalid)));

        let old = signature_header(SECRET, &body, NOW - 301).unwrap();
        assert!(matches!(verifier.verify(&body, Some(&old), NOW), Err(WebhookError::SignatureInvalid)));
    }

    #[test]
    fn missing_or_garbled_header() {
        let verifier = WebhookVerifier::new(SECRET, 300);
        let body = payload();

        assert!(matches!(verifier.verify(&body, None, NOW), Err(WebhookError::MissingSignature)));
        assert!(matches!(verifier.verify(&body, Some("  "), NOW), Err(WebhookError::MissingSignature)));
        assert!(matches!(verifier.verify(&body, Some("t=abc,v1=00"), NOW), Err(WebhookError::SignatureInvalid)));
        assert!(matches!(verifier.verify(&body, Some("v1=zz"), NOW), Err(WebhookError::SignatureInvalid)));
        assert!(matches!(
            verifier.verify(&body, Some("t=-9223372036854775808,v1=00"), NOW),
            Err(WebhookError::SignatureInvalid)
        ));
        assert!(matches!(
            verifier.verify(&body, Some("t=9223372036854775807,v1=00"), -NOW),
            Err(WebhookError::SignatureInvalid)
        ));
    }

    #[test]
    fn any_v1_entry_may_match() {
        let verifier = WebhookVerifier::new(SECRET, 300);
        let body = payload();
        let good = signature_header(SECRET, &body, NOW).unwrap();
        let sig = good.split("v1=").nth(1).unwrap();
        let header = format!("t={NOW},v1=deadbeef,v1={sig}");

        assert!(verifier.verify(&body, Some(&header), NOW).is_ok());
    }

    #[test]
    fn signed_garbage_is_malformed() {
        let verifier = WebhookVerifier::new(SECRET, 300);
        let body = b"not json".to_vec();
        let header = signature_header(SECRET, &body, NOW).unwrap();

        assert!(matches!(verifier.verify(&body, Some(&header), NOW), Err(WebhookError::Malformed(_))));
    }
}

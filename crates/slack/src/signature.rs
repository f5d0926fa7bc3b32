//! Verification of Slack's `X-Slack-Signature` request signing scheme.
//!
//! Slack signs `v0:{timestamp}:{raw body}` with HMAC-SHA256 keyed by the app's
//! signing secret and sends `v0=<hex digest>` alongside the request timestamp.

use std::time::Duration;

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-slack-signature";
pub const TIMESTAMP_HEADER: &str = "x-slack-request-timestamp";
const SIGNATURE_VERSION: &str = "v0";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing `{0}` header")]
    MissingHeader(&'static str),
    #[error("request timestamp `{0}` is not a unix timestamp")]
    MalformedTimestamp(String),
    #[error("request timestamp is {age_secs}s away from server time")]
    StaleTimestamp { age_secs: u64 },
    #[error("signature header is not a `v0=` hex digest")]
    MalformedSignature,
    #[error("signature does not match request body")]
    Mismatch,
    #[error("signing secret cannot be used as an hmac key")]
    InvalidKey,
}

#[derive(Clone, Debug)]
pub struct SignatureVerifier {
    secret: SecretString,
    max_age: Duration,
}

impl SignatureVerifier {
    pub fn new(secret: SecretString, max_age: Duration) -> Self {
        Self { secret, max_age }
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Checks a request against its signature and timestamp headers.
    ///
    /// `now_unix` is injected so replay-window checks stay deterministic in tests.
    pub fn verify(
        &self,
        timestamp: Option<&str>,
        signature: Option<&str>,
        body: &[u8],
        now_unix: i64,
    ) -> Result<(), SignatureError> {
        let timestamp = timestamp.ok_or(SignatureError::MissingHeader(TIMESTAMP_HEADER))?;
        let signature = signature.ok_or(SignatureError::MissingHeader(SIGNATURE_HEADER))?;

        let issued_at = timestamp
            .trim()
            .parse::<i64>()
            .map_err(|_| SignatureError::MalformedTimestamp(timestamp.to_owned()))?;
        let age_secs = now_unix.abs_diff(issued_at);
        if age_secs > self.max_age.as_secs() {
            return Err(SignatureError::StaleTimestamp { age_secs });
        }

        let digest = signature
            .trim()
            .strip_prefix("v0=")
            .ok_or(SignatureError::MalformedSignature)
            .and_then(|hex_digest| {
                hex::decode(hex_digest).map_err(|_| SignatureError::MalformedSignature)
            })?;

        self.mac_for(timestamp.trim(), body)?
            .verify_slice(&digest)
            .map_err(|_| SignatureError::Mismatch)
    }

    /// Produces the `X-Slack-Signature` value Slack would send for this body.
    pub fn sign(&self, timestamp: &str, body: &[u8]) -> Result<String, SignatureError> {
        let digest = self.mac_for(timestamp, body)?.finalize().into_bytes();
        Ok(format!("{SIGNATURE_VERSION}={}", hex::encode(digest)))
    }

    fn mac_for(&self, timestamp: &str, body: &[u8]) -> Result<HmacSha256, SignatureError> {
        let mut mac = HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
            .map_err(|_| SignatureError::InvalidKey)?;
        mac.update(SIGNATURE_VERSION.as_bytes());
        mac.update(b":");
        mac.update(timestamp.as_bytes());
        mac.update(b":");
        mac.update(body);
        Ok(mac)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{SignatureError, SignatureVerifier, SIGNATURE_HEADER, TIMESTAMP_HEADER};

    const NOW: i64 = 1_730_000_000;

    fn verifier() -> SignatureVerifier {
        SignatureVerifier::new("8f742231b10e8888abcd99yyyzzz85a5".to_owned().into(), Duration::from_secs(300))
    }

    #[test]
    fn matches_slack_documented_example() {
        // Example from Slack's "Verifying requests from Slack" guide.
        let verifier = SignatureVerifier::new(
            "8f742231b10e8888abcd99yyyzzz85a5".to_owned().into(),
            Duration::from_secs(300),
        );
        let body = b"token=xyzz0WbapA4vBCDEFasx0q6G&team_id=T1DC2JH3J&team_domain=testteamnow&channel_id=G8PSS9T3V&channel_name=foobar&user_id=U2CERLKJA&user_name=roadrunner&command=%2Fwebhook-collect&text=&response_url=https%3A%2F%2Fhooks.slack.com%2Fcommands%2FT1DC2JH3J%2F397700885554%2F96rGlfmibIGlgcZRskXaIFfN&trigger_id=398738663015.47445629121.803a0bc887a14d10d2c447fce8b6703c";

        let signature = verifier.sign("1531420618", body).expect("sign");

        assert_eq!(
            signature,
            "v0=a2114d57b48eac39b9ad189dd8316235a7b4a8d21a10bd27519666489c69b503"
        );
        assert_eq!(verifier.verify(Some("1531420618"), Some(&signature), body, 1_531_420_618), Ok(()));
    }

    #[test]
    fn accepts_freshly_signed_request() {
        let verifier = verifier();
        let body = br#"{"type":"event_callback"}"#;
        let timestamp = NOW.to_string();
        let signature = verifier.sign(&timestamp, body).expect("sign");

        assert_eq!(verifier.verify(Some(&timestamp), Some(&signature), body, NOW + 10), Ok(()));
    }

    #[test]
    fn rejects_tampered_body() {
        let verifier = verifier();
        let timestamp = NOW.to_string();
        let signature = verifier.sign(&timestamp, b"original").expect("sign");

        assert_eq!(
            verifier.verify(Some(&timestamp), Some(&signature), b"tampered", NOW),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn rejects_signature_from_other_secret() {
        let other = SignatureVerifier::new("another-secret".to_owned().into(), Duration::from_secs(300));
        let timestamp = NOW.to_string();
        let signature = other.sign(&timestamp, b"body").expect("sign");

        assert_eq!(
            verifier().verify(Some(&timestamp), Some(&signature), b"body", NOW),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn rejects_requests_outside_replay_window() {
        let verifier = verifier();
        let timestamp = (NOW - 301).to_string();
        let signature = verifier.sign(&timestamp, b"body").expect("sign");

        assert_eq!(
            verifier.verify(Some(&timestamp), Some(&signature), b"body", NOW),
            Err(SignatureError::StaleTimestamp { age_secs: 301 })
        );

        let future = (NOW + 600).to_string();
        let signature = verifier.sign(&future, b"body").expect("sign");
        assert!(matches!(
            verifier.verify(Some(&future), Some(&signature), b"body", NOW),
            Err(SignatureError::StaleTimestamp { .. })
        ));
    }

    #[test]
    fn reports_missing_and_malformed_headers() {
        let verifier = verifier();
        let timestamp = NOW.to_string();

        assert_eq!(
            verifier.verify(None, Some("v0=00"), b"", NOW),
            Err(SignatureError::MissingHeader(TIMESTAMP_HEADER))
        );
        assert_eq!(
            verifier.verify(Some(&timestamp), None, b"", NOW),
            Err(SignatureError::MissingHeader(SIGNATURE_HEADER))
        );
        assert_eq!(
            verifier.verify(Some("yesterday"), Some("v0=00"), b"", NOW),
            Err(SignatureError::MalformedTimestamp("yesterday".to_owned()))
        );
        assert_eq!(
            verifier.verify(Some(&timestamp), Some("v1=abcd"), b"", NOW),
            Err(SignatureError::MalformedSignature)
        );
        assert_eq!(
            verifier.verify(Some(&timestamp), Some("v0=not-hex"), b"", NOW),
            Err(SignatureError::MalformedSignature)
        );
    }
}

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::Duration;
use time::OffsetDateTime;

type HmacSha256 = Hmac<Sha256>;

/// Clock skew tolerated for timestamps in the future
const MAX_FUTURE_SKEW_SECS: i64 = 60;

/// HMAC-SHA256 signer for webhook payloads.
///
/// The signed message is `"<unix-seconds>.<raw body>"`; the header value is
/// `t=<unix-seconds>,v1=<hex digest>`.
pub struct HmacSigner<'a> {
    secret: &'a str,
}

impl<'a> HmacSigner<'a> {
    pub fn new(secret: &'a str) -> Self {
        Self { secret }
    }

    /// Sign a body at the current time, returning the full header value
    pub fn sign(&self, body: &str) -> String {
        self.sign_at(OffsetDateTime::now_utc().unix_timestamp(), body)
    }

    /// Sign a body at a specific timestamp, returning the full header value
    pub fn sign_at(&self, timestamp: i64, body: &str) -> String {
        format_signature_header(timestamp, &self.digest(timestamp, body))
    }

    /// Hex digest over `"<timestamp>.<body>"`
    pub fn digest(&self, timestamp: i64, body: &str) -> String {
        let mut mac = match HmacSha256::new_from_slice(self.secret.as_bytes()) {
            Ok(mac) => mac,
            Err(_) => unreachable!("HMAC key can be of any size, as per crate documentation"),
        };

        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(body.as_bytes());

        hex::encode(mac.finalize().into_bytes())
    }

    /// Check `header` against the body and timestamp. Constant time in the digest.
    pub fn verify(&self, timestamp: i64, body: &str, header: &str) -> bool {
        let Ok(parsed) = parse_signature_header(header) else {
            return false;
        };

        if parsed.timestamp != timestamp {
            return false;
        }

        constant_time_eq(&self.digest(timestamp, body), &parsed.digest)
    }

    /// Receiver-side check that also rejects stale and future-dated signatures
    pub fn verify_fresh(&self, body: &str, header: &str, tolerance: Duration) -> Result<(), String> {
        let parsed = parse_signature_header(header)?;
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let age = now.saturating_sub(parsed.timestamp);

        if age > tolerance.as_secs() as i64 {
            return Err(format!(
                "Timestamp too old: {age} seconds (max: {})",
                tolerance.as_secs()
            ));
        }

        if parsed.timestamp > now + MAX_FUTURE_SKEW_SECS {
            return Err(format!(
                "Timestamp is in the future: {} seconds ahead",
                parsed.timestamp - now
            ));
        }

        if !self.verify(parsed.timestamp, body, header) {
            return Err("Invalid signature".to_string());
        }

        Ok(())
    }
}

/// Components of an `X-Webhook-Signature` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    pub timestamp: i64,
    pub digest: String,
}

/// Build the `X-Webhook-Signature` header value
pub fn format_signature_header(timestamp: i64, digest: &str) -> String {
    format!("t={timestamp},v1={digest}")
}

/// Parse `t=<unix-seconds>,v1=<digest>`
pub fn parse_signature_header(header: &str) -> Result<SignatureHeader, String> {
    let mut timestamp = None;
    let mut digest = None;

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => {
                timestamp = Some(
                    value
                        .parse::<i64>()
                        .map_err(|e| format!("Invalid signature timestamp '{value}': {e}"))?,
                );
            }
            Some(("v1", value)) => digest = Some(value.to_string()),
            _ => {}
        }
    }

    match (timestamp, digest) {
        (Some(timestamp), Some(digest)) => Ok(SignatureHeader { timestamp, digest }),
        _ => Err(format!("Invalid signature header format: {header}")),
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.bytes()
        .zip(b.bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

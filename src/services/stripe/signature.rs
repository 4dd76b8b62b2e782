use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("malformed signature header")]
    MalformedHeader,
    #[error("signature header has no timestamp")]
    MissingTimestamp,
    #[error("signature header has no v1 signature")]
    MissingSignature,
    #[error("signature timestamp outside tolerance")]
    TimestampOutOfTolerance,
    #[error("no signature matches the payload")]
    Mismatch,
}

struct SignatureHeader {
    timestamp: i64,
    signatures: Vec<Vec<u8>>,
}

fn parse_header(header: &str) -> Result<SignatureHeader, SignatureError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let (key, value) = part
            .split_once('=')
            .ok_or(SignatureError::MalformedHeader)?;
        match key.trim() {
            "t" => timestamp = value.trim().parse::<i64>().ok(),
            // Undecodable entries can never match; skip them.
            "v1" => {
                if let Ok(bytes) = hex::decode(value.trim()) {
                    signatures.push(bytes);
                }
            }
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::MissingTimestamp)?;
    if signatures.is_empty() {
        return Err(SignatureError::MissingSignature);
    }
    Ok(SignatureHeader {
        timestamp,
        signatures,
    })
}

fn expected_signature(secret: &str, timestamp: i64, payload: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length.
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return Vec::new(),
    };
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    mac.finalize().into_bytes().to_vec()
}

/// Checks a `Stripe-Signature` header against the raw request body.
///
/// The header carries `t=<unix seconds>` and one or more `v1=<hex hmac>` entries;
/// any matching `v1` is accepted. `now` is unix seconds.
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    tolerance_seconds: i64,
    now: i64,
) -> Result<(), SignatureError> {
    let parsed = parse_header(header)?;

    if (now - parsed.timestamp).abs() > tolerance_seconds {
        return Err(SignatureError::TimestampOutOfTolerance);
    }

    let expected = expected_signature(secret, parsed.timestamp, payload);
    let matched = parsed
        .signatures
        .iter()
        .any(|candidate| bool::from(candidate.as_slice().ct_eq(expected.as_slice())));

    if matched {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// Builds a header value the way the provider does. Used by tests and local tooling.
pub fn sign_payload(payload: &[u8], secret: &str, timestamp: i64) -> String {
    format!(
        "t={},v1={}",
        timestamp,
        hex::encode(expected_signature(secret, timestamp, payload))
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";
    const PAYLOAD: &[u8] = br#"{"id":"evt_1","type":"invoice.payment_failed","created":1700000000}"#;

    #[test]
    fn accepts_valid_signature() {
        let header = sign_payload(PAYLOAD, SECRET, 1_700_000_000);
        assert_eq!(
            verify_signature(PAYLOAD, &header, SECRET, 300, 1_700_000_100),
            Ok(())
        );
    }

    #[test]
    fn accepts_any_matching_v1_entry() {
        let valid = sign_payload(PAYLOAD, SECRET, 1_700_000_000);
        let v1 = valid.split_once("v1=").unwrap().1;
        let header = format!("t=1700000000,v1={},v1={v1},v0=ignored", "00".repeat(32));
        assert!(verify_signature(PAYLOAD, &header, SECRET, 300, 1_700_000_000).is_ok());
    }

    #[test]
    fn rejects_tampered_payload_and_wrong_secret() {
        let header = sign_payload(PAYLOAD, SECRET, 1_700_000_000);
        assert_eq!(
            verify_signature(b"{}", &header, SECRET, 300, 1_700_000_000),
            Err(SignatureError::Mismatch)
        );
        assert_eq!(
            verify_signature(PAYLOAD, &header, "whsec_other", 300, 1_700_000_000),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn rejects_old_and_future_timestamps() {
        let header = sign_payload(PAYLOAD, SECRET, 1_700_000_000);
        assert_eq!(
            verify_signature(PAYLOAD, &header, SECRET, 300, 1_700_000_301),
            Err(SignatureError::TimestampOutOfTolerance)
        );
        assert_eq!(
            verify_signature(PAYLOAD, &header, SECRET, 300, 1_699_999_000),
            Err(SignatureError::TimestampOutOfTolerance)
        );
    }

    #[test]
    fn rejects_malformed_headers() {
        assert_eq!(
            verify_signature(PAYLOAD, "garbage", SECRET, 300, 0),
            Err(SignatureError::MalformedHeader)
        );
        assert_eq!(
            verify_signature(PAYLOAD, "v1=abcd", SECRET, 300, 0),
            Err(SignatureError::MissingTimestamp)
        );
        assert_eq!(
            verify_signature(PAYLOAD, "t=0,v1=not-hex", SECRET, 300, 0),
            Err(SignatureError::MissingSignature)
        );
    }
}

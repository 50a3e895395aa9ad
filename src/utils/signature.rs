//! HMAC helpers for service-to-service calls (`X-AP-SIG` / `X-AP-TIMESTAMP`).

use actix_web::dev::ServiceRequest;
use actix_web::HttpMessage;
use hmac::{Hmac, Mac};
use log::warn;
use sha2::Sha256;
use subtle::ConstantTimeEq;

pub const SIG_HEADER: &str = "X-AP-SIG";
pub const TS_HEADER: &str = "X-AP-TIMESTAMP";

/// Maximum allowed clock skew (seconds)
const MAX_SKEW_SECS: i64 = 10;

type HmacSha = Hmac<Sha256>;

/// Hex HMAC-SHA256 over `timestamp || body`.
pub fn sign(secret: &str, timestamp: &str, body: &[u8]) -> Option<String> {
    let mut mac = HmacSha::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(timestamp.as_bytes());
    mac.update(body);
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Checks the signature headers of a request whose body has already been
/// buffered into the request extensions as `Vec<u8>`.
pub fn verify_hmac(req: &ServiceRequest, secret: &str, now: i64) -> bool {
    let header = |name: &str| req.headers().get(name).and_then(|h| h.to_str().ok());

    let Some(sig_str) = header(SIG_HEADER) else {
        return false;
    };
    if sig_str.len() != 64 {
        warn!("{SIG_HEADER} header format/length invalid");
        return false;
    }

    let Some(ts_str) = header(TS_HEADER) else {
        warn!("{TS_HEADER} header missing");
        return false;
    };
    let Ok(ts) = ts_str.parse::<i64>() else {
        warn!("{TS_HEADER} not parseable");
        return false;
    };
    if (ts - now).abs() > MAX_SKEW_SECS {
        warn!("{TS_HEADER} out of allowed skew (got {}, now {})", ts, now);
        return false;
    }

    let extensions = req.extensions();
    let body: &[u8] = extensions
        .get::<Vec<u8>>()
        .map(|v| v.as_slice())
        .unwrap_or(&[]);

    let valid = verify_hmac_bytes(secret, ts_str, body, sig_str);
    if !valid {
        warn!("HMAC signature mismatch");
    }
    valid
}

/// Constant-time comparison of a hex digest against `timestamp || body`.
pub fn verify_hmac_bytes(secret: &str, timestamp: &str, body: &[u8], sig_hex: &str) -> bool {
    if sig_hex.len() != 64 {
        return false;
    }
    let Ok(mut mac) = HmacSha::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(timestamp.as_bytes());
    mac.update(body);
    let calc = mac.finalize().into_bytes();
    match hex::decode(sig_hex) {
        Ok(given) => calc.ct_eq(&given).into(),
        Err(_) => false,
    }
}

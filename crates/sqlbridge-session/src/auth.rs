//! Challenge-response authentication
//!
//! The router declares a method and delivers a challenge; the bridge answers
//! deterministically from its configured secret. With a salt present the key
//! is base64(PBKDF2-HMAC-SHA256(secret, salt, iterations, keylen)), without
//! one the raw secret is the key; either way the signature is
//! base64(HMAC-SHA256(key, challenge nonce)). Any method other than
//! `wampcra` is fatal: the session does not join.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{Error, Result};
use crate::rpc::Challenge;

type HmacSha256 = Hmac<Sha256>;

/// Method this bridge can answer challenges for
pub const CHALLENGE_RESPONSE_METHOD: &str = "wampcra";

const DEFAULT_ITERATIONS: u32 = 1000;
const DEFAULT_KEYLEN: usize = 32;

/// Compute the signature for a challenge.
///
/// Deterministic for fixed inputs; an unrecognized method is an
/// authentication error.
pub fn compute_challenge_response(secret: &str, challenge: &Challenge) -> Result<String> {
    if challenge.method != CHALLENGE_RESPONSE_METHOD {
        return Err(Error::authentication(format!(
            "cannot compute a response for authentication method {:?}",
            challenge.method
        )));
    }

    let key = match &challenge.extra.salt {
        Some(salt) => derive_key(
            secret,
            salt,
            challenge.extra.iterations.unwrap_or(DEFAULT_ITERATIONS),
            challenge.extra.keylen.unwrap_or(DEFAULT_KEYLEN),
        ),
        None => secret.as_bytes().to_vec(),
    };

    Ok(sign(&key, challenge.extra.challenge.as_bytes()))
}

/// Salted key derivation: base64-encoded PBKDF2-HMAC-SHA256 output.
///
/// The base64 text itself is the signing key, so both ends derive the same
/// printable key material from the shared secret.
pub fn derive_key(secret: &str, salt: &str, iterations: u32, keylen: usize) -> Vec<u8> {
    let derived = pbkdf2_sha256(secret.as_bytes(), salt.as_bytes(), iterations, keylen);
    base64_encode(&derived).into_bytes()
}

fn sign(key: &[u8], message: &[u8]) -> String {
    base64_encode(&hmac_sha256(key, message))
}

/// PBKDF2-HMAC-SHA256 key derivation
fn pbkdf2_sha256(password: &[u8], salt: &[u8], iterations: u32, keylen: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(keylen.div_ceil(32) * 32);
    let blocks = keylen.div_ceil(32).max(1) as u32;

    for block in 1..=blocks {
        // U1 = PRF(Password, Salt || INT(block))
        let mut u = hmac_sha256(password, &[salt, &block.to_be_bytes()].concat());
        let mut t = u.clone();

        // Ui = PRF(Password, Ui-1)
        for _ in 1..iterations {
            u = hmac_sha256(password, &u);
            for (tb, ub) in t.iter_mut().zip(u.iter()) {
                *tb ^= ub;
            }
        }
        out.extend_from_slice(&t);
    }

    out.truncate(keylen);
    out
}

/// HMAC-SHA256
fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn base64_encode(data: &[u8]) -> String {
    use base64::{engine::general_purpose::STANDARD, Engine};
    STANDARD.encode(data)
}

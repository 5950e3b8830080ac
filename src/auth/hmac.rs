//! Keyed message authentication for the supported TSIG algorithms.

use hmac::{Hmac, Mac};
use md5::Md5;
use ring::hmac as ring_hmac;

use super::Algorithm;
use crate::error::AuthenticationError;

type HmacMd5 = Hmac<Md5>;

pub(crate) fn sign(
    algorithm: Algorithm,
    key: &[u8],
    data: &[u8],
) -> Result<Vec<u8>, AuthenticationError> {
    match ring_algorithm(algorithm) {
        Some(ring_algorithm) => {
            let key = ring_hmac::Key::new(ring_algorithm, key);
            Ok(ring_hmac::sign(&key, data).as_ref().to_vec())
        }
        None => {
            let mut mac = hmac_md5(key)?;
            mac.update(data);
            Ok(mac.finalize().into_bytes().to_vec())
        }
    }
}

pub(crate) fn verify(
    algorithm: Algorithm,
    key: &[u8],
    data: &[u8],
    mac: &[u8],
) -> Result<(), AuthenticationError> {
    let verified = match ring_algorithm(algorithm) {
        Some(ring_algorithm) => {
            let key = ring_hmac::Key::new(ring_algorithm, key);
            ring_hmac::verify(&key, data, mac).is_ok()
        }
        None => {
            let mut expected = hmac_md5(key)?;
            expected.update(data);
            expected.verify_slice(mac).is_ok()
        }
    };

    if verified {
        Ok(())
    } else {
        Err(AuthenticationError::BadSignature)
    }
}

fn ring_algorithm(algorithm: Algorithm) -> Option<ring_hmac::Algorithm> {
    match algorithm {
        Algorithm::HmacMd5 => None,
        Algorithm::HmacSha1 => Some(ring_hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY),
        Algorithm::HmacSha256 => Some(ring_hmac::HMAC_SHA256),
        Algorithm::HmacSha512 => Some(ring_hmac::HMAC_SHA512),
    }
}

// ring has no MD5, so hmac-md5 comes from RustCrypto.
fn hmac_md5(key: &[u8]) -> Result<HmacMd5, AuthenticationError> {
    HmacMd5::new_from_slice(key).map_err(|_| {
        AuthenticationError::UnsupportedAlgorithm(format!("{}-byte hmac-md5 key", key.len()))
    })
}

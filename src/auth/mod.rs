//! Authentication for dynamic updates.
//!
//! Two schemes are supported and at most one is active for a client:
//!
//! * [`StaticKey`]: a pre-shared TSIG key, signing locally with no network
//!   interaction.
//! * [`NegotiatedContext`]: a GSS-TSIG security context negotiated with the
//!   server before each signed exchange and released afterwards. See [`gss`].

use std::fmt;
use std::str::FromStr;

use data_encoding::BASE64;
use hickory_proto::dnssec::rdata::tsig::TsigAlgorithm;
use hickory_proto::rr::Name;
use zeroize::Zeroizing;

use crate::error::AuthenticationError;

pub mod gss;
mod hmac;
pub mod kerberos;
pub mod tkey;
pub mod tsig;

pub use self::gss::{
    ContextRegistry, Credential, GssContext, GssMechanism, NegotiatedContext,
    SecurityContextHandle, ServicePrincipal,
};
#[cfg(feature = "kerberos")]
pub use self::kerberos::KerberosMechanism;
pub use self::tsig::TsigKey;

/// The HMAC algorithms a static key can use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    HmacMd5,
    HmacSha1,
    HmacSha256,
    HmacSha512,
}

impl Algorithm {
    /// The algorithm name carried in the TSIG record.
    pub fn name(&self) -> &'static str {
        match self {
            Algorithm::HmacMd5 => "hmac-md5.sig-alg.reg.int.",
            Algorithm::HmacSha1 => "hmac-sha1.",
            Algorithm::HmacSha256 => "hmac-sha256.",
            Algorithm::HmacSha512 => "hmac-sha512.",
        }
    }

    pub fn tsig_algorithm(&self) -> TsigAlgorithm {
        match self {
            Algorithm::HmacMd5 => TsigAlgorithm::HmacMd5,
            Algorithm::HmacSha1 => TsigAlgorithm::HmacSha1,
            Algorithm::HmacSha256 => TsigAlgorithm::HmacSha256,
            Algorithm::HmacSha512 => TsigAlgorithm::HmacSha512,
        }
    }

    fn short_name(&self) -> &'static str {
        match self {
            Algorithm::HmacMd5 => "hmac-md5",
            Algorithm::HmacSha1 => "hmac-sha1",
            Algorithm::HmacSha256 => "hmac-sha256",
            Algorithm::HmacSha512 => "hmac-sha512",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

impl FromStr for Algorithm {
    type Err = AuthenticationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().trim_end_matches('.').to_ascii_lowercase();
        match normalized.as_str() {
            "hmac-md5" | "hmac-md5.sig-alg.reg.int" => Ok(Algorithm::HmacMd5),
            "hmac-sha1" => Ok(Algorithm::HmacSha1),
            "hmac-sha256" => Ok(Algorithm::HmacSha256),
            "hmac-sha512" => Ok(Algorithm::HmacSha512),
            _ => Err(AuthenticationError::UnsupportedAlgorithm(s.to_string())),
        }
    }
}

/// A pre-shared TSIG key.
#[derive(Clone)]
pub struct StaticKey {
    name: Name,
    algorithm: Algorithm,
    secret: Zeroizing<Vec<u8>>,
}

impl StaticKey {
    pub fn new(
        name: Name,
        secret: Vec<u8>,
        algorithm: Algorithm,
    ) -> Result<Self, AuthenticationError> {
        if !name.is_fqdn() {
            return Err(AuthenticationError::InvalidKeyName(name.to_string()));
        }
        Ok(Self {
            name,
            algorithm,
            secret: Zeroizing::new(secret),
        })
    }

    /// Build a key from its textual name and base64 secret, as found in
    /// configuration.
    pub fn from_base64(
        name: &str,
        secret: &str,
        algorithm: Algorithm,
    ) -> Result<Self, AuthenticationError> {
        if !name.ends_with('.') {
            return Err(AuthenticationError::InvalidKeyName(name.to_string()));
        }
        let name =
            Name::from_str(name).map_err(|_| AuthenticationError::InvalidKeyName(name.into()))?;
        let secret = BASE64
            .decode(secret.trim().as_bytes())
            .map_err(AuthenticationError::InvalidSecret)?;
        Self::new(name, secret, algorithm)
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }
}

impl TsigKey for StaticKey {
    fn key_name(&self) -> &Name {
        &self.name
    }

    fn tsig_algorithm(&self) -> TsigAlgorithm {
        self.algorithm.tsig_algorithm()
    }

    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, AuthenticationError> {
        hmac::sign(self.algorithm, &self.secret, data)
    }

    fn verify(&self, data: &[u8], mac: &[u8]) -> Result<(), AuthenticationError> {
        hmac::verify(self.algorithm, &self.secret, data, mac)
    }
}

impl fmt::Debug for StaticKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticKey")
            .field("name", &self.name)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

/// The authentication scheme configured for a client.
#[derive(Debug, Clone)]
pub enum Authentication {
    StaticKey(StaticKey),
    Negotiated(NegotiatedContext),
}

impl From<StaticKey> for Authentication {
    fn from(key: StaticKey) -> Self {
        Authentication::StaticKey(key)
    }
}

impl From<NegotiatedContext> for Authentication {
    fn from(context: NegotiatedContext) -> Self {
        Authentication::Negotiated(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn algorithm_names() {
        assert_eq!("HMAC-SHA256".parse::<Algorithm>().unwrap(), Algorithm::HmacSha256);
        assert_eq!("hmac-sha1.".parse::<Algorithm>().unwrap(), Algorithm::HmacSha1);
        assert_eq!(
            "hmac-md5.sig-alg.reg.int.".parse::<Algorithm>().unwrap(),
            Algorithm::HmacMd5
        );
        assert!(matches!(
            "hmac-sha384".parse::<Algorithm>(),
            Err(AuthenticationError::UnsupportedAlgorithm(_))
        ));
        assert_eq!(Algorithm::HmacMd5.name(), "hmac-md5.sig-alg.reg.int.");
    }

    #[test]
    fn algorithms_map_onto_tsig_names() {
        for algorithm in [
            Algorithm::HmacMd5,
            Algorithm::HmacSha1,
            Algorithm::HmacSha256,
            Algorithm::HmacSha512,
        ] {
            let mut expected = Name::from_str(algorithm.name()).unwrap();
            expected.set_fqdn(false);
            assert_eq!(algorithm.tsig_algorithm().to_name(), expected);
        }
    }

    #[test]
    fn key_names_must_be_qualified() {
        assert!(matches!(
            StaticKey::from_base64("update", "c2VjcmV0", Algorithm::HmacMd5),
            Err(AuthenticationError::InvalidKeyName(_))
        ));
        let key = StaticKey::from_base64("update.example.", "c2VjcmV0", Algorithm::HmacMd5).unwrap();
        assert_eq!(key.name().to_string(), "update.example.");
    }

    #[test]
    fn secrets_must_be_base64() {
        assert!(matches!(
            StaticKey::from_base64("update.", "not base64!", Algorithm::HmacSha512),
            Err(AuthenticationError::InvalidSecret(_))
        ));
    }

    #[test]
    fn debug_does_not_leak_the_secret() {
        let key = StaticKey::new(Name::root(), b"hunter2".to_vec(), Algorithm::HmacSha1).unwrap();
        let text = format!("{key:?}");
        assert!(!text.contains("hunter2"));
        assert!(!text.contains("104"));
    }
}

//! Salted credential hashing

use std::fmt;
use std::str::FromStr;

use ring::constant_time;
use ring::rand::{SecureRandom, SystemRandom};
use sha2::{Digest, Sha256};

use realmgate_common::error::{Error, Result};

const SALT_LEN: usize = 32;
const PBKDF2_ROUNDS: u32 = 4096;

/// Supported hashing schemes, identified by the tag stored with each credential
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    /// SHA-256 over salt || password
    Sha256,
    /// PBKDF2-HMAC-SHA256 with a fixed round count
    Pbkdf2Sha256,
}

impl HashAlgorithm {
    pub fn tag(self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "SHA-256",
            HashAlgorithm::Pbkdf2Sha256 => "PBKDF2-SHA256",
        }
    }

    fn digest(self, salt: &[u8], password: &[u8]) -> Vec<u8> {
        match self {
            HashAlgorithm::Sha256 => {
                let mut hasher = Sha256::new();
                hasher.update(salt);
                hasher.update(password);
                hasher.finalize().to_vec()
            }
            HashAlgorithm::Pbkdf2Sha256 => {
                let mut out = [0u8; 32];
                pbkdf2::pbkdf2_hmac::<Sha256>(password, salt, PBKDF2_ROUNDS, &mut out);
                out.to_vec()
            }
        }
    }
}

impl Default for HashAlgorithm {
    fn default() -> Self {
        HashAlgorithm::Pbkdf2Sha256
    }
}

impl FromStr for HashAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "SHA-256" => Ok(HashAlgorithm::Sha256),
            "PBKDF2-SHA256" => Ok(HashAlgorithm::Pbkdf2Sha256),
            other => Err(Error::Validation(format!("Unknown hash algorithm '{}'", other))),
        }
    }
}

/// A stored credential: algorithm tag, salt and hash
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    algorithm: HashAlgorithm,
    salt: Vec<u8>,
    hash: Vec<u8>,
}

impl Credential {
    /// Hash `password` under a fresh random salt
    pub fn create(password: &str, algorithm: HashAlgorithm) -> Result<Self> {
        let mut salt = vec![0u8; SALT_LEN];
        SystemRandom::new()
            .fill(&mut salt)
            .map_err(|_| Error::Internal("Failed to generate salt".to_string()))?;

        let hash = algorithm.digest(&salt, password.as_bytes());
        Ok(Self {
            algorithm,
            salt,
            hash,
        })
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Constant-time comparison against a presented password
    pub fn matches(&self, password: &str) -> bool {
        let candidate = self.algorithm.digest(&self.salt, password.as_bytes());
        constant_time::verify_slices_are_equal(&candidate, &self.hash).is_ok()
    }

    /// Parse the `algorithm,salt_hex,hash_hex` form
    pub fn parse(text: &str) -> Result<Self> {
        let parts: Vec<&str> = text.split(',').collect();
        if parts.len() != 3 {
            return Err(Error::Validation(format!(
                "Credential needs 3 comma-separated parts, found {}",
                parts.len()
            )));
        }

        let algorithm = parts[0].parse()?;
        let salt = hex::decode(parts[1])
            .map_err(|e| Error::Validation(format!("Invalid credential salt: {}", e)))?;
        let hash = hex::decode(parts[2])
            .map_err(|e| Error::Validation(format!("Invalid credential hash: {}", e)))?;
        if salt.is_empty() || hash.is_empty() {
            return Err(Error::Validation("Credential salt and hash must not be empty".to_string()));
        }

        Ok(Self {
            algorithm,
            salt,
            hash,
        })
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{}",
            self.algorithm.tag(),
            hex::encode(&self.salt),
            hex::encode(&self.hash)
        )
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(HashAlgorithm::Sha256)]
    #[case(HashAlgorithm::Pbkdf2Sha256)]
    fn test_create_and_match(#[case] algorithm: HashAlgorithm) {
        let credential = Credential::create("secret", algorithm).unwrap();
        assert!(credential.matches("secret"));
        assert!(!credential.matches("Secret"));
        assert!(!credential.matches(""));
    }

    #[test]
    fn test_salts_differ() {
        let a = Credential::create("secret", HashAlgorithm::Sha256).unwrap();
        let b = Credential::create("secret", HashAlgorithm::Sha256).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_text_form() {
        let credential = Credential::create("secret", HashAlgorithm::Pbkdf2Sha256).unwrap();
        let text = credential.to_string();
        assert!(text.starts_with("PBKDF2-SHA256,"));

        let parsed = Credential::parse(&text).unwrap();
        assert_eq!(parsed, credential);
        assert!(parsed.matches("secret"));
    }

    #[test]
    fn test_truncated_hash_never_matches() {
        let credential = Credential::create("secret", HashAlgorithm::Sha256).unwrap();
        let text = credential.to_string();
        let truncated = Credential::parse(&text[..text.len() - 2]).unwrap();
        assert!(!truncated.matches("secret"));
    }

    #[rstest]
    #[case("SHA-256,abcd")]
    #[case("MD5,abcd,abcd")]
    #[case("SHA-256,zz,abcd")]
    #[case("SHA-256,,abcd")]
    fn test_parse_rejects(#[case] text: &str) {
        assert!(matches!(Credential::parse(text), Err(Error::Validation(_))));
    }
}

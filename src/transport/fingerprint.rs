use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};

use crate::error::{Error, Result};

/// Hash algorithms accepted for certificate fingerprints, per the
/// 'Hash function Textual Names' registry used by RFC 4572 signaling.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FingerprintAlgorithm {
    #[serde(rename = "sha-1")]
    Sha1,
    #[serde(rename = "sha-256")]
    Sha256,
    #[serde(rename = "sha-384")]
    Sha384,
    #[serde(rename = "sha-512")]
    Sha512,
}

impl FingerprintAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            FingerprintAlgorithm::Sha1 => "sha-1",
            FingerprintAlgorithm::Sha256 => "sha-256",
            FingerprintAlgorithm::Sha384 => "sha-384",
            FingerprintAlgorithm::Sha512 => "sha-512",
        }
    }

    /// Digest size in bytes produced by this algorithm.
    pub fn digest_len(&self) -> usize {
        match self {
            FingerprintAlgorithm::Sha1 => 20,
            FingerprintAlgorithm::Sha256 => 32,
            FingerprintAlgorithm::Sha384 => 48,
            FingerprintAlgorithm::Sha512 => 64,
        }
    }
}

impl fmt::Display for FingerprintAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for FingerprintAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sha-1" => Ok(FingerprintAlgorithm::Sha1),
            "sha-256" => Ok(FingerprintAlgorithm::Sha256),
            "sha-384" => Ok(FingerprintAlgorithm::Sha384),
            "sha-512" => Ok(FingerprintAlgorithm::Sha512),
            _ => Err(Error::ErrUnsupportedFingerprintAlgorithm(s.to_string())),
        }
    }
}

/// Certificate fingerprint as exchanged via signaling: a hash algorithm name
/// plus the colon-separated lowercase hex digest of the certificate DER.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub algorithm: FingerprintAlgorithm,
    pub value: String,
}

impl Fingerprint {
    /// Computes the fingerprint of a DER-encoded certificate.
    pub fn from_certificate_der(algorithm: FingerprintAlgorithm, der: &[u8]) -> Self {
        Fingerprint {
            algorithm,
            value: format_digest(&compute_digest(algorithm, der)),
        }
    }

    /// Decodes the hex digest back into raw bytes.
    pub fn digest_bytes(&self) -> Result<Vec<u8>> {
        let bytes = hex::decode(self.value.replace(':', ""))
            .map_err(|_| Error::ErrMalformedFingerprint)?;
        validate_digest_len(self.algorithm, &bytes)?;
        Ok(bytes)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.algorithm, self.value)
    }
}

/// Digests `data` with the given algorithm.
pub fn compute_digest(algorithm: FingerprintAlgorithm, data: &[u8]) -> Vec<u8> {
    match algorithm {
        FingerprintAlgorithm::Sha1 => Sha1::digest(data).to_vec(),
        FingerprintAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
        FingerprintAlgorithm::Sha384 => Sha384::digest(data).to_vec(),
        FingerprintAlgorithm::Sha512 => Sha512::digest(data).to_vec(),
    }
}

/// Formats a raw digest as colon-separated lowercase hex (RFC 4572 syntax).
pub fn format_digest(digest: &[u8]) -> String {
    let values: Vec<String> = digest.iter().map(|x| format!("{x:02x}")).collect();
    values.join(":")
}

/// Checks that a raw digest has the exact length the algorithm produces.
pub fn validate_digest_len(algorithm: FingerprintAlgorithm, digest: &[u8]) -> Result<()> {
    let expected = algorithm.digest_len();
    if digest.len() != expected {
        return Err(Error::ErrInvalidFingerprintLength {
            algorithm,
            expected,
            actual: digest.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_algorithm_from_str() {
        let tests = vec![
            ("sha-1", Some(FingerprintAlgorithm::Sha1)),
            ("sha-256", Some(FingerprintAlgorithm::Sha256)),
            ("SHA-256", Some(FingerprintAlgorithm::Sha256)),
            ("sha-384", Some(FingerprintAlgorithm::Sha384)),
            ("sha-512", Some(FingerprintAlgorithm::Sha512)),
            ("md5", None),
            ("", None),
        ];

        for (name, expected) in tests {
            let got = name.parse::<FingerprintAlgorithm>().ok();
            assert_eq!(got, expected, "testCase: {name}");
        }
    }

    #[test]
    fn test_digest_round_trip() {
        let fp = Fingerprint::from_certificate_der(FingerprintAlgorithm::Sha256, b"certificate");
        let bytes = fp.digest_bytes().unwrap();
        assert_eq!(bytes.len(), 32);
        assert_eq!(format_digest(&bytes), fp.value);
    }

    #[test]
    fn test_validate_digest_len() {
        assert!(validate_digest_len(FingerprintAlgorithm::Sha256, &[0u8; 32]).is_ok());
        let err = validate_digest_len(FingerprintAlgorithm::Sha256, &[0u8; 20]).unwrap_err();
        assert!(err.is_fingerprint_format_error());
    }

    #[test]
    fn test_malformed_value() {
        let fp = Fingerprint {
            algorithm: FingerprintAlgorithm::Sha256,
            value: "zz:zz".to_string(),
        };
        assert!(fp.digest_bytes().is_err());
    }
}

//! Local certificate identity used to authenticate the DTLS handshake.
//!
//! Peers pin each other by certificate digest rather than by a CA chain, so
//! a freshly generated self-signed certificate per session is the normal
//! mode of operation.

use std::rc::Rc;

use openssl::asn1::Asn1Time;
use openssl::pkey::{PKey, PKeyRef, Private};
use openssl::x509::{X509, X509Ref};
use rcgen::{CertificateParams, KeyPair};

use crate::error::{Error, Result};
use crate::transport::fingerprint::{Fingerprint, FingerprintAlgorithm};

struct IdentityInner {
    certificate: X509,
    private_key: PKey<Private>,
    certificate_der: Vec<u8>,
}

/// A certificate plus private key. Cheap to clone; the handle is shared
/// between the transport that owns the identity and the TLS engine that
/// presents it during the handshake.
#[derive(Clone)]
pub struct DtlsIdentity(Rc<IdentityInner>);

impl DtlsIdentity {
    /// Generates a self-signed ECDSA P-256 identity.
    pub fn generate() -> Result<Self> {
        let key_pair = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256)?;
        let params = CertificateParams::new(vec!["dtls-transport".to_string()])?;
        let certificate = params.self_signed(&key_pair)?;
        Self::from_der(certificate.der(), &key_pair.serialize_der())
    }

    /// Builds an identity from a DER certificate and a PKCS#8 private key.
    pub fn from_der(certificate_der: &[u8], private_key_pkcs8: &[u8]) -> Result<Self> {
        let certificate = X509::from_der(certificate_der)?;
        let private_key = PKey::private_key_from_pkcs8(private_key_pkcs8)?;

        let now = Asn1Time::days_from_now(0)?;
        if certificate.not_after() < &*now {
            return Err(Error::ErrCertificateExpired);
        }

        Ok(DtlsIdentity(Rc::new(IdentityInner {
            certificate,
            private_key,
            certificate_der: certificate_der.to_vec(),
        })))
    }

    pub fn certificate(&self) -> &X509Ref {
        &self.0.certificate
    }

    pub fn private_key(&self) -> &PKeyRef<Private> {
        &self.0.private_key
    }

    pub fn certificate_der(&self) -> &[u8] {
        &self.0.certificate_der
    }

    /// Fingerprint of the certificate under the given algorithm.
    pub fn fingerprint(&self, algorithm: FingerprintAlgorithm) -> Fingerprint {
        Fingerprint::from_certificate_der(algorithm, &self.0.certificate_der)
    }

    /// Fingerprints suitable for signaling to the remote side.
    pub fn fingerprints(&self) -> Vec<Fingerprint> {
        vec![self.fingerprint(FingerprintAlgorithm::Sha256)]
    }

    /// Two identities are the same when their certificates match byte for
    /// byte.
    pub fn same_certificate(&self, other: &DtlsIdentity) -> bool {
        self.0.certificate_der == other.0.certificate_der
    }
}

impl std::fmt::Debug for DtlsIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DtlsIdentity")
            .field("fingerprint", &self.fingerprint(FingerprintAlgorithm::Sha256).value)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::transport::fingerprint::compute_digest;

    #[test]
    fn test_generate_identity() {
        let identity = DtlsIdentity::generate().unwrap();
        assert!(!identity.certificate_der().is_empty());

        let fp = identity.fingerprint(FingerprintAlgorithm::Sha256);
        let digest = compute_digest(FingerprintAlgorithm::Sha256, identity.certificate_der());
        assert_eq!(fp.digest_bytes().unwrap(), digest);
    }

    #[test]
    fn test_same_certificate() {
        let a = DtlsIdentity::generate().unwrap();
        let b = DtlsIdentity::generate().unwrap();
        assert!(a.same_certificate(&a.clone()));
        assert!(!a.same_certificate(&b));
    }
}

use thiserror::Error;

use crate::transport::fingerprint::FingerprintAlgorithm;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("local certificate already set")]
    ErrCertificateAlreadySet,
    #[error("identity already set")]
    ErrIdentityAlreadySet,
    #[error("identity not set")]
    ErrIdentityNotSet,
    #[error("certificate expired")]
    ErrCertificateExpired,
    #[error("dtls role already set")]
    ErrRoleAlreadySet,
    #[error("dtls role not set")]
    ErrRoleNotSet,
    #[error("dtls not activated for this transport")]
    ErrDtlsInactive,
    #[error("ssl session already started")]
    ErrSslAlreadyStarted,
    #[error("unsupported fingerprint algorithm: {0}")]
    ErrUnsupportedFingerprintAlgorithm(String),
    #[error("digest length {actual} does not match {algorithm} digest length {expected}")]
    ErrInvalidFingerprintLength {
        algorithm: FingerprintAlgorithm,
        expected: usize,
        actual: usize,
    },
    #[error("malformed fingerprint value")]
    ErrMalformedFingerprint,
    #[error("peer certificate verification failed")]
    ErrPeerCertificateVerificationFailed,
    #[error("handshake produced no remote certificate")]
    ErrNoRemoteCertificate,
    #[error("dtls handshake failed")]
    ErrHandshakeFailed,
    #[error("dtls connection not established")]
    ErrDtlsNotEstablished,
    #[error("operation would block")]
    ErrWouldBlock,
    #[error("transport is closed")]
    ErrTransportClosed,
    #[error("packet is not in rtp format")]
    ErrNotRtpPacket,

    #[error("ssl: {0}")]
    Ssl(#[from] openssl::error::ErrorStack),
    #[error("certificate: {0}")]
    Certificate(#[from] rcgen::Error),
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error describes a malformed fingerprint argument, as
    /// opposed to a well-formed digest that failed to match the peer
    /// certificate.
    pub fn is_fingerprint_format_error(&self) -> bool {
        matches!(
            self,
            Error::ErrUnsupportedFingerprintAlgorithm(_)
                | Error::ErrInvalidFingerprintLength { .. }
                | Error::ErrMalformedFingerprint
        )
    }
}

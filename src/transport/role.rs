use std::fmt;

use serde::{Deserialize, Serialize};

/// Which side of the DTLS handshake this transport plays.
///
/// Normally negotiated out of band along with the fingerprints. When the
/// role has not been set and a ClientHello arrives first, the transport
/// infers `Server`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DtlsRole {
    #[serde(rename = "client")]
    Client,
    #[serde(rename = "server")]
    Server,
}

impl fmt::Display for DtlsRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            DtlsRole::Client => write!(f, "client"),
            DtlsRole::Server => write!(f, "server"),
        }
    }
}

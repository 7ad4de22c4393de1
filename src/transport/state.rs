use std::fmt;

/// State of the DTLS transport as observed by upper layers.
///
/// The usual progression is `New -> Connecting -> Connected`. A failed
/// handshake or certificate verification lands in `Failed`; an intentional
/// shutdown or a close alert from the peer lands in `Closed`. Both are
/// terminal; recovery means tearing the transport down and renegotiating.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub enum DtlsTransportState {
    /// A local certificate is set but the handshake has not started.
    #[default]
    New,
    /// Handshake in progress, or complete but the peer certificate digest
    /// is still outstanding.
    Connecting,
    /// Handshake complete and the peer certificate verified.
    Connected,
    /// Closed intentionally or by the peer.
    Closed,
    /// Handshake or certificate verification failed.
    Failed,
}

impl fmt::Display for DtlsTransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            DtlsTransportState::New => "new",
            DtlsTransportState::Connecting => "connecting",
            DtlsTransportState::Connected => "connected",
            DtlsTransportState::Closed => "closed",
            DtlsTransportState::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_dtls_transport_state_string() {
        let tests = vec![
            (DtlsTransportState::New, "new"),
            (DtlsTransportState::Connecting, "connecting"),
            (DtlsTransportState::Connected, "connected"),
            (DtlsTransportState::Closed, "closed"),
            (DtlsTransportState::Failed, "failed"),
        ];

        for (state, expected_string) in tests {
            assert_eq!(state.to_string(), expected_string)
        }
    }
}

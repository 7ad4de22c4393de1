//! The TLS side of the transport: a pluggable engine trait plus the
//! packet-to-stream channel it reads and writes.
//!
//! The engine drives the handshake and post-handshake record layer of one
//! DTLS session as a sans-IO state machine. Trust is pinned by certificate
//! digest, which arrives out of band and possibly after the transport-layer
//! handshake has already finished; "keys established" and "trust
//! established" are therefore separate states.

use std::fmt;
use std::time::{Duration, Instant};

use bytes::BytesMut;

use crate::error::Result;
use crate::identity::DtlsIdentity;
use crate::srtp::SrtpProfile;
use crate::transport::fingerprint::FingerprintAlgorithm;
use crate::transport::role::DtlsRole;

pub mod channel;
pub mod openssl;

pub use self::channel::{ChannelState, PacketChannel};
pub use self::openssl::OpenSslEngine;

/// Engine lifecycle.
///
/// ```text
/// Uninitialized -> WaitingForChannel -> Handshaking -> ConnectedUnverified -> Connected
///                         |                 |                   |
///                         +--------> Error / Closed <-----------+
/// ```
///
/// `ConnectedUnverified` means the handshake produced session keys but the
/// peer certificate has not been checked against a digest yet; writes stay
/// blocked until verification succeeds.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    WaitingForChannel,
    Handshaking,
    ConnectedUnverified,
    Connected,
    Closed,
    Error,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            EngineState::Uninitialized => "uninitialized",
            EngineState::WaitingForChannel => "waiting-for-channel",
            EngineState::Handshaking => "handshaking",
            EngineState::ConnectedUnverified => "connected-unverified",
            EngineState::Connected => "connected",
            EngineState::Closed => "closed",
            EngineState::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Discrete notifications drained through [`TlsEngine::poll_event`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Transport-layer handshake finished; keys exist, trust may not.
    HandshakeComplete,
    /// Peer certificate matched the pinned digest.
    PeerVerified,
    /// Session ended cleanly (close_notify or local close).
    Closed,
    /// Session failed; see [`TlsEngine::error`].
    Failed,
}

/// A DTLS engine behind a trait so the transport depends only on the
/// capability set, not on a particular TLS library.
pub trait TlsEngine {
    fn state(&self) -> EngineState;

    /// May be called at most once, before [`TlsEngine::start`].
    fn set_identity(&mut self, identity: DtlsIdentity) -> Result<()>;

    /// Rejected once the underlying session exists.
    fn set_role(&mut self, role: DtlsRole) -> Result<()>;

    fn set_srtp_profiles(&mut self, profiles: &[SrtpProfile]) -> Result<()>;

    /// Records the digest the peer certificate must hash to. If the chain
    /// has already been presented, verification happens immediately:
    /// a mismatch moves the engine to `Error` and returns
    /// `ErrPeerCertificateVerificationFailed`, which is distinct from the
    /// format errors raised for an unknown algorithm or a wrong-length
    /// digest.
    fn set_peer_certificate_digest(
        &mut self,
        algorithm: FingerprintAlgorithm,
        digest: &[u8],
    ) -> Result<()>;

    /// First interval of the handshake retransmission timer.
    fn set_initial_retransmit_timeout(&mut self, timeout: Duration);

    /// Begins the session. Moves to `Handshaking` when the channel is
    /// already open, `WaitingForChannel` otherwise. Fails if called twice.
    fn start(&mut self, now: Instant) -> Result<()>;

    /// The underlying transport became writable; a deferred start proceeds.
    fn notify_channel_open(&mut self, now: Instant) -> Result<()>;

    /// Feeds one inbound DTLS record and advances the state machine.
    fn put_packet(&mut self, now: Instant, payload: BytesMut) -> Result<()>;

    /// Writes application data. Returns `ErrWouldBlock` while the handshake
    /// is still running and while the peer certificate is still unverified.
    fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// Next ciphertext packet for the wire.
    fn poll_transmit(&mut self) -> Option<BytesMut>;

    /// Next decrypted application packet.
    fn poll_plaintext(&mut self) -> Option<BytesMut>;

    fn poll_event(&mut self) -> Option<EngineEvent>;

    /// Fires the retransmission timer if it is due.
    fn handle_timeout(&mut self, now: Instant);

    /// Deadline of the armed retransmission timer, if any.
    fn poll_timeout(&self) -> Option<Instant>;

    /// Tears the session down, emitting a best-effort close alert, and
    /// closes the channel. The retransmission timer is stopped.
    fn close(&mut self);

    /// DER certificates presented by the peer; empty before the handshake
    /// captured them.
    fn peer_certificate_chain(&self) -> &[Vec<u8>];

    /// Derives keying material from the completed handshake.
    fn export_keying_material(
        &self,
        label: &str,
        context: Option<&[u8]>,
        length: usize,
    ) -> Result<Vec<u8>>;

    fn selected_srtp_profile(&self) -> Option<SrtpProfile>;

    fn ssl_cipher_suite(&self) -> Option<String>;

    /// Negotiated protocol version as the two wire bytes.
    fn ssl_version_bytes(&self) -> Option<[u8; 2]>;
}

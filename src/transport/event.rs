use std::time::Instant;

use bytes::BytesMut;

use crate::transport::state::DtlsTransportState;

/// Discrete state notifications drained through
/// [`DtlsTransport::poll_event`](crate::transport::DtlsTransport::poll_event).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DtlsTransportEvent {
    StateChange(DtlsTransportState),
    WritableChange(bool),
    ReceivingChange(bool),
}

/// A packet delivered to the upper layer, either decrypted application
/// data, an SRTP bypass packet, or raw passthrough traffic when DTLS is
/// inactive.
#[derive(Debug)]
pub struct ReceivedPacket {
    /// Arrival time of the raw packet this payload came from.
    pub now: Instant,
    pub message: BytesMut,
    /// True when the packet skipped the DTLS record layer as SRTP bypass.
    pub srtp_bypass: bool,
}

/// Per-send options mirroring the flags of the underlying packet transport.
#[derive(Debug, Default, Copy, Clone)]
pub struct PacketOptions {
    /// The payload is an already protected SRTP/RTCP packet and must skip
    /// DTLS record encryption.
    pub srtp_bypass: bool,
}

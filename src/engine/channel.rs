use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;

use bytes::BytesMut;
use log::{debug, warn};

/// Up to two raw packets may be queued for the TLS engine before it drains
/// one. The record layer normally consumes one packet per delivery; the
/// second slot tolerates a duplicate or near-simultaneous delivery and is
/// not a licence to pipeline packets two-deep.
pub(crate) const MAX_PENDING_PACKETS: usize = 2;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ChannelState {
    /// Created, but the underlying transport is not writable yet.
    Opening,
    Open,
    Closed,
}

struct ChannelInner {
    state: ChannelState,
    pending_packets: VecDeque<BytesMut>,
    outgoing_packets: VecDeque<BytesMut>,
}

/// Bridges a push-based packet transport to the pull-based byte-stream
/// interface the TLS engine reads and writes.
///
/// Inbound DTLS records are pushed with [`PacketChannel::on_packet_received`]
/// and read back one whole packet at a time through [`io::Read`]. Outbound
/// ciphertext written through [`io::Write`] is queued packet-per-write and
/// drained with [`PacketChannel::take_outgoing`] for delivery to the wire.
///
/// The handle is a cheap clone over shared single-threaded state, so the
/// TLS session can own one copy as its stream while the engine keeps
/// another for feeding and draining it.
#[derive(Clone)]
pub struct PacketChannel(Rc<RefCell<ChannelInner>>);

impl PacketChannel {
    pub fn new() -> Self {
        PacketChannel(Rc::new(RefCell::new(ChannelInner {
            state: ChannelState::Opening,
            pending_packets: VecDeque::new(),
            outgoing_packets: VecDeque::new(),
        })))
    }

    pub fn state(&self) -> ChannelState {
        self.0.borrow().state
    }

    pub fn is_open(&self) -> bool {
        self.0.borrow().state == ChannelState::Open
    }

    pub fn set_open(&self) {
        let mut inner = self.0.borrow_mut();
        if inner.state == ChannelState::Opening {
            inner.state = ChannelState::Open;
        }
    }

    /// Queues one inbound packet for the TLS engine. Over-capacity arrivals
    /// are logged but still queued; dropping them silently would stall the
    /// handshake on duplicate delivery.
    pub fn on_packet_received(&self, payload: BytesMut) {
        let mut inner = self.0.borrow_mut();
        if inner.state == ChannelState::Closed {
            debug!("discarding packet received on closed channel");
            return;
        }
        if inner.pending_packets.len() >= MAX_PENDING_PACKETS {
            warn!(
                "packet channel has {} pending packets, expected at most {}",
                inner.pending_packets.len() + 1,
                MAX_PENDING_PACKETS
            );
        }
        inner.pending_packets.push_back(payload);
    }

    /// Next ciphertext packet to hand to the wire, if any.
    pub fn take_outgoing(&self) -> Option<BytesMut> {
        self.0.borrow_mut().outgoing_packets.pop_front()
    }

    /// Idempotent. Pending inbound packets are discarded; already produced
    /// outgoing packets stay available for draining.
    pub fn close(&self) {
        let mut inner = self.0.borrow_mut();
        inner.state = ChannelState::Closed;
        inner.pending_packets.clear();
    }
}

impl io::Read for PacketChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut inner = self.0.borrow_mut();
        if let Some(packet) = inner.pending_packets.pop_front() {
            let n = packet.len().min(buf.len());
            if n < packet.len() {
                warn!("truncating {} byte packet to {} byte read", packet.len(), n);
            }
            buf[..n].copy_from_slice(&packet[..n]);
            Ok(n)
        } else if inner.state == ChannelState::Closed {
            Ok(0)
        } else {
            Err(io::Error::from(io::ErrorKind::WouldBlock))
        }
    }
}

impl io::Write for PacketChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self.0.borrow_mut();
        if inner.state == ChannelState::Closed {
            // Writes never fail from the engine's point of view; DTLS rides
            // a lossy transport and must tolerate the bytes going nowhere.
            debug!("dropping {} byte write on closed channel", buf.len());
            return Ok(buf.len());
        }
        inner.outgoing_packets.push_back(BytesMut::from(buf));
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Default for PacketChannel {
    fn default() -> Self {
        PacketChannel::new()
    }
}

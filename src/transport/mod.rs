//! DTLS over an ICE-style packet transport.
//!
//! [`DtlsTransport`] classifies every inbound packet as a DTLS record or an
//! RTP/SRTP bypass packet, drives a [`TlsEngine`] for the record layer, and
//! re-exposes a packet-transport surface to upper layers. It performs no
//! I/O: the embedding driver forwards wire packets through
//! [`DtlsTransport::handle_read`] / [`DtlsTransport::poll_transmit`], feeds
//! ICE state changes through the `handle_ice_*` methods, and fires timers
//! from [`DtlsTransport::poll_timeout`] / [`DtlsTransport::handle_timeout`].

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use log::{debug, warn};

use crate::engine::{EngineEvent, EngineState, OpenSslEngine, TlsEngine};
use crate::error::{Error, Result};
use crate::identity::DtlsIdentity;
use crate::srtp::{CryptoOptions, SrtpProfile};
use crate::transport::fingerprint::{format_digest, Fingerprint, FingerprintAlgorithm};
use crate::transport::role::DtlsRole;
use crate::transport::state::DtlsTransportState;

pub mod demux;
pub mod event;
pub mod fingerprint;
pub mod role;
pub mod state;

pub use self::event::{DtlsTransportEvent, PacketOptions, ReceivedPacket};

const MIN_HANDSHAKE_TIMEOUT: Duration = Duration::from_millis(50);
const MAX_HANDSHAKE_TIMEOUT: Duration = Duration::from_millis(3000);
const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_millis(100);

/// Initial handshake retransmission timeout, roughly twice the route RTT.
fn initial_handshake_timeout(rtt_estimate: Option<Duration>) -> Duration {
    match rtt_estimate {
        Some(rtt) => (2 * rtt).clamp(MIN_HANDSHAKE_TIMEOUT, MAX_HANDSHAKE_TIMEOUT),
        None => DEFAULT_HANDSHAKE_TIMEOUT,
    }
}

/// A DTLS transport multiplexed onto one ICE component.
///
/// Until a local certificate is set the transport is in passthrough mode
/// and forwards packets untouched in both directions, which supports
/// negotiations where DTLS turns out not to be used. Setting a certificate
/// activates DTLS; the remote fingerprint then triggers the handshake.
pub struct DtlsTransport {
    component: u16,
    crypto_options: CryptoOptions,
    srtp_profiles: Vec<SrtpProfile>,

    state: DtlsTransportState,
    dtls_active: bool,
    identity: Option<DtlsIdentity>,
    dtls_role: Option<DtlsRole>,
    remote_fingerprint: Option<(FingerprintAlgorithm, Vec<u8>)>,
    engine: Option<Box<dyn TlsEngine>>,
    cached_client_hello: Option<BytesMut>,

    ice_writable: bool,
    ice_receiving: bool,
    ice_rtt_estimate: Option<Duration>,
    writable: bool,
    receiving: bool,
    last_ice_error: Option<Error>,

    events: VecDeque<DtlsTransportEvent>,
    read_outs: VecDeque<ReceivedPacket>,
    transmits: VecDeque<BytesMut>,
}

impl DtlsTransport {
    pub fn new(component: u16, crypto_options: CryptoOptions) -> Self {
        let srtp_profiles = crypto_options.srtp_profiles();
        DtlsTransport {
            component,
            crypto_options,
            srtp_profiles,
            state: DtlsTransportState::New,
            dtls_active: false,
            identity: None,
            dtls_role: None,
            remote_fingerprint: None,
            engine: None,
            cached_client_hello: None,
            ice_writable: false,
            ice_receiving: false,
            ice_rtt_estimate: None,
            writable: false,
            receiving: false,
            last_ice_error: None,
            events: VecDeque::new(),
            read_outs: VecDeque::new(),
            transmits: VecDeque::new(),
        }
    }

    pub fn component(&self) -> u16 {
        self.component
    }

    pub fn dtls_state(&self) -> DtlsTransportState {
        self.state
    }

    /// Whether DTLS is in use on this transport (a local certificate is
    /// set and the peer has not signaled no-DTLS).
    pub fn is_dtls_active(&self) -> bool {
        self.dtls_active
    }

    pub fn writable(&self) -> bool {
        self.writable
    }

    pub fn receiving(&self) -> bool {
        self.receiving
    }

    /// Last transport-level error reported by the driver. Such errors do
    /// not change `dtls_state`; a higher layer decides whether to tear
    /// down.
    pub fn error(&self) -> Option<&Error> {
        self.last_ice_error.as_ref()
    }

    pub fn dtls_role(&self) -> Option<DtlsRole> {
        self.dtls_role
    }

    pub fn crypto_options(&self) -> &CryptoOptions {
        &self.crypto_options
    }

    /// SRTP profiles offered in the handshake, derived once at
    /// construction.
    pub fn srtp_profiles(&self) -> &[SrtpProfile] {
        &self.srtp_profiles
    }

    pub fn local_identity(&self) -> Option<&DtlsIdentity> {
        self.identity.as_ref()
    }

    /// Fingerprints of the local certificate for signaling.
    pub fn local_fingerprints(&self) -> Vec<Fingerprint> {
        self.identity
            .as_ref()
            .map(|identity| identity.fingerprints())
            .unwrap_or_default()
    }

    pub fn remote_fingerprint(&self) -> Option<Fingerprint> {
        self.remote_fingerprint
            .as_ref()
            .map(|(algorithm, digest)| Fingerprint {
                algorithm: *algorithm,
                value: format_digest(digest),
            })
    }

    /// DER certificate chain presented by the peer; empty until captured
    /// during the handshake.
    pub fn remote_ssl_certificates(&self) -> &[Vec<u8>] {
        self.engine
            .as_ref()
            .map(|engine| engine.peer_certificate_chain())
            .unwrap_or(&[])
    }

    /// Derives SRTP keying material from the completed handshake.
    pub fn export_keying_material(
        &self,
        label: &str,
        context: Option<&[u8]>,
        length: usize,
    ) -> Result<Vec<u8>> {
        let engine = self.engine.as_ref().ok_or(Error::ErrDtlsNotEstablished)?;
        engine.export_keying_material(label, context, length)
    }

    pub fn ssl_cipher_suite(&self) -> Option<String> {
        self.engine.as_ref().and_then(|engine| engine.ssl_cipher_suite())
    }

    pub fn srtp_crypto_suite(&self) -> Option<SrtpProfile> {
        self.engine
            .as_ref()
            .and_then(|engine| engine.selected_srtp_profile())
    }

    pub fn ssl_version_bytes(&self) -> Option<[u8; 2]> {
        self.engine
            .as_ref()
            .and_then(|engine| engine.ssl_version_bytes())
    }

    /// Sets the certificate identity presented in the handshake and
    /// activates DTLS. Setting the same certificate again is a harmless
    /// duplicate; a different certificate is rejected.
    pub fn set_local_identity(&mut self, identity: DtlsIdentity) -> Result<()> {
        if self.dtls_active {
            if let Some(existing) = &self.identity {
                if existing.same_certificate(&identity) {
                    debug!("ignoring duplicate local certificate");
                    return Ok(());
                }
            }
            return Err(Error::ErrCertificateAlreadySet);
        }
        self.identity = Some(identity);
        self.dtls_active = true;
        self.update_writable();
        self.update_receiving();
        Ok(())
    }

    /// Fixes the handshake role. Must happen before the session exists;
    /// re-setting the same role afterwards is accepted.
    pub fn set_dtls_role(&mut self, role: DtlsRole) -> Result<()> {
        if self.engine.is_some() {
            if self.dtls_role == Some(role) {
                return Ok(());
            }
            return Err(Error::ErrRoleAlreadySet);
        }
        self.dtls_role = Some(role);
        Ok(())
    }

    /// Records the expected digest of the peer certificate and, once
    /// possible, starts (or restarts) the handshake.
    ///
    /// An empty `algorithm` means the peer does not support DTLS: the
    /// transport falls back to passthrough and the call succeeds.
    ///
    /// Note the return value contract: a *well-formed* digest that fails
    /// verification against an already received peer certificate still
    /// returns `Ok(())`, with the
    /// failure surfaced as a transition to
    /// [`DtlsTransportState::Failed`]. Only malformed input (unknown
    /// algorithm, wrong digest length) returns `Err`. Callers that check
    /// only the return value will miss the `Failed` transition, so observe
    /// [`DtlsTransport::poll_event`] as well.
    pub fn set_remote_fingerprint(
        &mut self,
        algorithm: &str,
        digest: &[u8],
        now: Instant,
    ) -> Result<()> {
        // Unchanged fingerprint: tolerate the re-offer without restarting.
        if self.dtls_active && !algorithm.is_empty() {
            if let Some((existing_algorithm, existing_digest)) = &self.remote_fingerprint {
                if existing_algorithm.name() == algorithm && existing_digest.as_slice() == digest {
                    return Ok(());
                }
            }
        }

        if algorithm.is_empty() {
            debug_assert!(digest.is_empty());
            debug!("peer does not support dtls, falling back to passthrough");
            self.dtls_active = false;
            self.update_writable();
            self.update_receiving();
            return Ok(());
        }

        if !self.dtls_active {
            warn!("remote fingerprint offered before a local certificate was set");
            return Err(Error::ErrDtlsInactive);
        }

        let algorithm: FingerprintAlgorithm = algorithm.parse()?;
        fingerprint::validate_digest_len(algorithm, digest)?;

        let fingerprint_changing = self.remote_fingerprint.is_some();
        self.remote_fingerprint = Some((algorithm, digest.to_vec()));

        if self.engine.is_some() {
            if !fingerprint_changing {
                // The handshake ran ahead of the fingerprint; hand the
                // digest to the live session.
                let result = match self.engine.as_mut() {
                    Some(engine) => engine.set_peer_certificate_digest(algorithm, digest),
                    None => Ok(()),
                };
                return match result {
                    Ok(()) => {
                        self.pump_engine(now);
                        Ok(())
                    }
                    Err(err) if err.is_fingerprint_format_error() => Err(err),
                    Err(err) => {
                        warn!("peer certificate rejected: {err}");
                        self.set_dtls_state(DtlsTransportState::Failed);
                        Ok(())
                    }
                };
            }

            // Fingerprint changed mid-handshake: tear the session down and
            // start over from scratch.
            debug!("remote fingerprint changed, restarting dtls");
            self.engine = None;
            self.set_dtls_state(DtlsTransportState::New);
        }

        if let Err(err) = self.setup_dtls(now) {
            warn!("failed to set up dtls: {err}");
            self.set_dtls_state(DtlsTransportState::Failed);
            return Err(err);
        }
        self.maybe_start_dtls(now);
        Ok(())
    }

    /// Sends one packet to the peer. In passthrough mode the payload goes
    /// straight to the wire. Once connected, SRTP bypass packets (flagged
    /// by the caller and RTP-shaped by header inspection) skip the record
    /// layer; everything else is encrypted through the TLS engine. Sending
    /// is an error in every other state.
    pub fn send_packet(
        &mut self,
        data: &[u8],
        options: &PacketOptions,
        now: Instant,
    ) -> Result<usize> {
        if !self.dtls_active {
            self.transmits.push_back(BytesMut::from(data));
            return Ok(data.len());
        }
        match self.state {
            DtlsTransportState::Connected => {
                if options.srtp_bypass {
                    if !demux::is_rtp_packet(data) {
                        return Err(Error::ErrNotRtpPacket);
                    }
                    self.transmits.push_back(BytesMut::from(data));
                    Ok(data.len())
                } else {
                    let result = match self.engine.as_mut() {
                        Some(engine) => engine.write(data),
                        None => Err(Error::ErrDtlsNotEstablished),
                    };
                    self.pump_engine(now);
                    result
                }
            }
            DtlsTransportState::New | DtlsTransportState::Connecting => {
                Err(Error::ErrDtlsNotEstablished)
            }
            DtlsTransportState::Failed => Err(Error::ErrHandshakeFailed),
            DtlsTransportState::Closed => Err(Error::ErrTransportClosed),
        }
    }

    /// Processes one packet delivered by the ICE transport.
    pub fn handle_read(&mut self, now: Instant, payload: BytesMut) {
        if !self.dtls_active {
            self.read_outs.push_back(ReceivedPacket {
                now,
                message: payload,
                srtp_bypass: false,
            });
            return;
        }

        match self.state {
            DtlsTransportState::New => {
                if demux::is_dtls_client_hello(&payload) {
                    // The remote side may start before our fingerprint has
                    // arrived. Keep the most recent hello for replay.
                    debug!("caching dtls client hello until the handshake starts");
                    self.cached_client_hello = Some(payload);
                    if self.engine.is_none() && self.identity.is_some() {
                        if self.dtls_role.is_none() {
                            debug!("client hello received first, assuming server role");
                            self.dtls_role = Some(DtlsRole::Server);
                        }
                        if self.dtls_role == Some(DtlsRole::Server) {
                            if let Err(err) = self.setup_dtls(now) {
                                warn!("failed to set up dtls after client hello: {err}");
                                self.set_dtls_state(DtlsTransportState::Failed);
                                return;
                            }
                            self.maybe_start_dtls(now);
                        }
                    }
                } else {
                    warn!("dropping non-client-hello packet received before the handshake");
                }
            }
            DtlsTransportState::Connecting | DtlsTransportState::Connected => {
                if demux::is_dtls_packet(&payload) {
                    self.handle_dtls_packet(now, payload);
                } else if self.state == DtlsTransportState::Connected {
                    if demux::is_rtp_packet(&payload) {
                        self.read_outs.push_back(ReceivedPacket {
                            now,
                            message: payload,
                            srtp_bypass: true,
                        });
                    } else {
                        warn!("dropping packet that is neither dtls nor rtp");
                    }
                } else {
                    warn!("dropping non-dtls packet received before the handshake completed");
                }
            }
            DtlsTransportState::Failed | DtlsTransportState::Closed => {
                debug!("dropping packet received in state {}", self.state);
            }
        }
    }

    /// The ICE transport became writable or unwritable.
    pub fn handle_ice_writable_change(&mut self, now: Instant, writable: bool) {
        self.ice_writable = writable;
        if writable && self.dtls_active {
            self.maybe_start_dtls(now);
        }
        self.update_writable();
    }

    /// The ICE transport's receiving indication changed.
    pub fn handle_ice_receiving_change(&mut self, receiving: bool) {
        self.ice_receiving = receiving;
        self.update_receiving();
    }

    /// A new network route was selected; the RTT estimate seeds the
    /// handshake retransmission timeout.
    pub fn handle_route_change(&mut self, rtt_estimate: Option<Duration>) {
        self.ice_rtt_estimate = rtt_estimate;
    }

    /// A socket-level error from the ICE transport. Stored for
    /// [`DtlsTransport::error`]; does not affect the DTLS state.
    pub fn handle_ice_error(&mut self, error: Error) {
        self.last_ice_error = Some(error);
    }

    /// Next packet to hand to the ICE transport.
    pub fn poll_transmit(&mut self) -> Option<BytesMut> {
        self.transmits.pop_front()
    }

    /// Next packet for the upper layer.
    pub fn poll_read(&mut self) -> Option<ReceivedPacket> {
        self.read_outs.pop_front()
    }

    pub fn poll_event(&mut self) -> Option<DtlsTransportEvent> {
        self.events.pop_front()
    }

    /// Deadline of the handshake retransmission timer, if armed.
    pub fn poll_timeout(&self) -> Option<Instant> {
        self.engine.as_ref().and_then(|engine| engine.poll_timeout())
    }

    pub fn handle_timeout(&mut self, now: Instant) {
        if let Some(engine) = self.engine.as_mut() {
            engine.handle_timeout(now);
        }
        self.pump_engine(now);
    }

    /// Tears the session down, emitting a best-effort close alert, and
    /// moves to `Closed`.
    pub fn close(&mut self, now: Instant) {
        if self.state == DtlsTransportState::Closed {
            return;
        }
        if let Some(engine) = self.engine.as_mut() {
            engine.close();
        }
        self.pump_engine(now);
        self.set_dtls_state(DtlsTransportState::Closed);
    }

    fn setup_dtls(&mut self, now: Instant) -> Result<()> {
        let identity = self.identity.clone().ok_or(Error::ErrDtlsInactive)?;
        let role = self.dtls_role.ok_or(Error::ErrRoleNotSet)?;

        let mut engine: Box<dyn TlsEngine> = Box::new(OpenSslEngine::new());
        engine.set_identity(identity)?;
        engine.set_role(role)?;
        engine.set_srtp_profiles(&self.srtp_profiles)?;
        if let Some((algorithm, digest)) = self.remote_fingerprint.clone() {
            engine.set_peer_certificate_digest(algorithm, &digest)?;
        }
        engine.start(now)?;
        debug!("dtls session set up, role {role}");
        self.engine = Some(engine);
        Ok(())
    }

    /// Starts the handshake once both a session and a writable ICE
    /// transport exist, then replays a cached ClientHello when acting as
    /// the server. A hello cached on what turned out to be the client side
    /// is discarded; replaying it to ourselves would be nonsensical.
    fn maybe_start_dtls(&mut self, now: Instant) {
        if !self.ice_writable || self.engine.is_none() {
            return;
        }

        let waiting = self
            .engine
            .as_ref()
            .map(|engine| engine.state() == EngineState::WaitingForChannel)
            .unwrap_or(false);
        if waiting {
            let timeout = initial_handshake_timeout(self.ice_rtt_estimate);
            let mut start_error = None;
            if let Some(engine) = self.engine.as_mut() {
                engine.set_initial_retransmit_timeout(timeout);
                if let Err(err) = engine.notify_channel_open(now) {
                    start_error = Some(err);
                }
            }
            if let Some(err) = start_error {
                warn!("failed to start dtls handshake: {err}");
                self.set_dtls_state(DtlsTransportState::Failed);
                return;
            }
            debug!(
                "dtls handshake started, initial retransmit timeout {:?}",
                timeout
            );
            self.set_dtls_state(DtlsTransportState::Connecting);
        }

        if let Some(hello) = self.cached_client_hello.take() {
            if self.dtls_role == Some(DtlsRole::Server) {
                debug!("replaying cached client hello");
                let replay = match self.engine.as_mut() {
                    Some(engine) => engine.put_packet(now, hello),
                    None => Ok(()),
                };
                if let Err(err) = replay {
                    warn!("failed to replay cached client hello: {err}");
                }
            } else {
                warn!("discarding cached client hello, local role is client");
            }
        }
        self.pump_engine(now);
    }

    fn handle_dtls_packet(&mut self, now: Instant, payload: BytesMut) {
        if payload.len() > demux::MAX_DTLS_PACKET_LEN {
            warn!("dropping oversized dtls packet ({} bytes)", payload.len());
            return;
        }
        if !demux::has_valid_dtls_record_framing(&payload) {
            warn!("dropping dtls packet with invalid record framing");
            return;
        }
        let result = match self.engine.as_mut() {
            Some(engine) => engine.put_packet(now, payload),
            None => {
                warn!("dtls packet received without a session");
                return;
            }
        };
        if let Err(err) = result {
            warn!("failed to process dtls packet: {err}");
        }
        self.pump_engine(now);
    }

    /// Drains the engine's queues and reconciles its state with the
    /// transport state.
    fn pump_engine(&mut self, now: Instant) {
        let mut engine_events = vec![];
        {
            let Some(engine) = self.engine.as_mut() else {
                return;
            };
            while let Some(packet) = engine.poll_transmit() {
                self.transmits.push_back(packet);
            }
            while let Some(message) = engine.poll_plaintext() {
                self.read_outs.push_back(ReceivedPacket {
                    now,
                    message,
                    srtp_bypass: false,
                });
            }
            while let Some(event) = engine.poll_event() {
                engine_events.push(event);
            }
        }
        for event in engine_events {
            match event {
                EngineEvent::HandshakeComplete => {
                    debug!("dtls handshake complete");
                }
                EngineEvent::PeerVerified => {
                    self.set_dtls_state(DtlsTransportState::Connected);
                }
                EngineEvent::Failed => {
                    self.set_dtls_state(DtlsTransportState::Failed);
                }
                EngineEvent::Closed => {
                    self.set_dtls_state(DtlsTransportState::Closed);
                }
            }
        }
    }

    fn set_dtls_state(&mut self, state: DtlsTransportState) {
        if self.state == state {
            return;
        }
        debug!(
            "component {} dtls state {} -> {}",
            self.component, self.state, state
        );
        self.state = state;
        self.events.push_back(DtlsTransportEvent::StateChange(state));
        self.update_writable();
        self.update_receiving();
    }

    /// Writable is suppressed until encryption keys exist so upper layers
    /// do not start sending media over an unprotected path.
    fn update_writable(&mut self) {
        let writable = if self.dtls_active {
            self.ice_writable && self.state == DtlsTransportState::Connected
        } else {
            self.ice_writable
        };
        if writable != self.writable {
            self.writable = writable;
            self.events
                .push_back(DtlsTransportEvent::WritableChange(writable));
        }
    }

    fn update_receiving(&mut self) {
        if !self.dtls_active || self.state == DtlsTransportState::Connected {
            if self.ice_receiving != self.receiving {
                self.receiving = self.ice_receiving;
                self.events
                    .push_back(DtlsTransportEvent::ReceivingChange(self.receiving));
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn active_transport(role: Option<DtlsRole>) -> DtlsTransport {
        let mut transport = DtlsTransport::new(1, CryptoOptions::default());
        transport
            .set_local_identity(DtlsIdentity::generate().unwrap())
            .unwrap();
        if let Some(role) = role {
            transport.set_dtls_role(role).unwrap();
        }
        transport
    }

    fn rtp_packet() -> Vec<u8> {
        let mut packet = vec![0x80u8];
        packet.extend_from_slice(&[0u8; 11]);
        packet
    }

    #[test]
    fn test_passthrough_send_and_receive() {
        let now = Instant::now();
        let mut transport = DtlsTransport::new(1, CryptoOptions::default());
        assert!(!transport.is_dtls_active());

        let n = transport
            .send_packet(b"plain", &PacketOptions::default(), now)
            .unwrap();
        assert_eq!(n, 5);
        assert_eq!(transport.poll_transmit().unwrap().as_ref(), b"plain");

        transport.handle_read(now, BytesMut::from(&b"inbound"[..]));
        let received = transport.poll_read().unwrap();
        assert_eq!(received.message.as_ref(), b"inbound");
        assert!(!received.srtp_bypass);
    }

    #[test]
    fn test_send_rejected_before_connected() {
        let now = Instant::now();
        let mut transport = active_transport(Some(DtlsRole::Client));
        let err = transport
            .send_packet(b"data", &PacketOptions::default(), now)
            .unwrap_err();
        assert!(matches!(err, Error::ErrDtlsNotEstablished));
        assert!(transport.poll_transmit().is_none());
    }

    #[test]
    fn test_local_identity_duplicate_and_conflict() {
        let mut transport = DtlsTransport::new(1, CryptoOptions::default());
        let identity = DtlsIdentity::generate().unwrap();
        transport.set_local_identity(identity.clone()).unwrap();
        transport.set_local_identity(identity).unwrap();

        let err = transport
            .set_local_identity(DtlsIdentity::generate().unwrap())
            .unwrap_err();
        assert!(matches!(err, Error::ErrCertificateAlreadySet));
    }

    #[test]
    fn test_remote_fingerprint_requires_local_certificate() {
        let now = Instant::now();
        let mut transport = DtlsTransport::new(1, CryptoOptions::default());
        let err = transport
            .set_remote_fingerprint("sha-256", &[0u8; 32], now)
            .unwrap_err();
        assert!(matches!(err, Error::ErrDtlsInactive));
    }

    #[test]
    fn test_empty_fingerprint_deactivates_dtls() {
        let now = Instant::now();
        let mut transport = active_transport(Some(DtlsRole::Client));
        transport.set_remote_fingerprint("", &[], now).unwrap();
        assert!(!transport.is_dtls_active());

        // passthrough again
        transport
            .send_packet(b"plain", &PacketOptions::default(), now)
            .unwrap();
        assert!(transport.poll_transmit().is_some());
    }

    #[test]
    fn test_malformed_fingerprint_rejected_without_state_change() {
        let now = Instant::now();
        let mut transport = active_transport(Some(DtlsRole::Client));

        let err = transport
            .set_remote_fingerprint("md5", &[0u8; 16], now)
            .unwrap_err();
        assert!(err.is_fingerprint_format_error());

        let err = transport
            .set_remote_fingerprint("sha-256", &[0u8; 16], now)
            .unwrap_err();
        assert!(err.is_fingerprint_format_error());

        assert_eq!(transport.dtls_state(), DtlsTransportState::New);
    }

    #[test]
    fn test_role_fixed_once_session_exists() {
        let now = Instant::now();
        let mut transport = active_transport(Some(DtlsRole::Client));
        transport.handle_ice_writable_change(now, true);
        transport
            .set_remote_fingerprint("sha-256", &[0u8; 32], now)
            .unwrap();
        assert_eq!(transport.dtls_state(), DtlsTransportState::Connecting);

        transport.set_dtls_role(DtlsRole::Client).unwrap();
        let err = transport.set_dtls_role(DtlsRole::Server).unwrap_err();
        assert!(matches!(err, Error::ErrRoleAlreadySet));
    }

    #[test]
    fn test_client_hello_inference_and_replay() {
        let now = Instant::now();

        // a real client produces the hello
        let mut client = active_transport(Some(DtlsRole::Client));
        client.handle_ice_writable_change(now, true);
        client
            .set_remote_fingerprint("sha-256", &[0u8; 32], now)
            .unwrap();
        let hello = client.poll_transmit().expect("client flight");
        assert!(demux::is_dtls_client_hello(&hello));

        // the server has a certificate but neither role nor fingerprint yet
        let mut server = active_transport(None);
        server.handle_ice_writable_change(now, true);
        server.handle_read(now, hello);

        // the hello was cached, the role inferred, the handshake started
        // and the cached hello replayed, so the server responds
        assert_eq!(server.dtls_role(), Some(DtlsRole::Server));
        assert_eq!(server.dtls_state(), DtlsTransportState::Connecting);
        assert!(server.poll_transmit().is_some());
    }

    #[test]
    fn test_non_hello_packet_dropped_in_new_state() {
        let now = Instant::now();
        let mut transport = active_transport(Some(DtlsRole::Server));
        let mut packet = vec![23u8; demux::DTLS_RECORD_HEADER_LEN];
        packet[11] = 0;
        packet[12] = 0;
        transport.handle_read(now, BytesMut::from(&packet[..]));
        assert!(transport.poll_read().is_none());
        assert!(transport.poll_transmit().is_none());
    }

    #[test]
    fn test_writable_suppressed_until_connected() {
        let now = Instant::now();
        let mut transport = active_transport(Some(DtlsRole::Client));
        transport.handle_ice_writable_change(now, true);
        assert!(!transport.writable());

        let events: Vec<_> = std::iter::from_fn(|| transport.poll_event()).collect();
        assert!(!events
            .iter()
            .any(|e| matches!(e, DtlsTransportEvent::WritableChange(true))));
    }

    #[test]
    fn test_passthrough_mirrors_ice_writable() {
        let now = Instant::now();
        let mut transport = DtlsTransport::new(1, CryptoOptions::default());
        transport.handle_ice_writable_change(now, true);
        assert!(transport.writable());
        transport.handle_ice_receiving_change(true);
        assert!(transport.receiving());
    }

    #[test]
    fn test_bypass_requires_rtp_shape() {
        let now = Instant::now();
        let mut transport = DtlsTransport::new(1, CryptoOptions::default());
        // exercised fully in the integration tests; here only the
        // passthrough shortcut applies
        let n = transport
            .send_packet(&rtp_packet(), &PacketOptions { srtp_bypass: true }, now)
            .unwrap();
        assert_eq!(n, 12);
    }

    #[test]
    fn test_ice_error_does_not_change_state() {
        let mut transport = active_transport(Some(DtlsRole::Client));
        transport.handle_ice_error(Error::Other("socket closed".to_string()));
        assert!(transport.error().is_some());
        assert_eq!(transport.dtls_state(), DtlsTransportState::New);
    }
}

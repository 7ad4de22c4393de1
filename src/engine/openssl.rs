use std::mem;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use bytes::BytesMut;
use log::{debug, warn};
use openssl::ssl::{
    ErrorCode, HandshakeError, MidHandshakeSslStream, Ssl, SslContext, SslMethod, SslStream,
    SslVerifyMode,
};

use crate::engine::channel::PacketChannel;
use crate::engine::{EngineEvent, EngineState, TlsEngine};
use crate::error::{Error, Result};
use crate::identity::DtlsIdentity;
use crate::srtp::SrtpProfile;
use crate::transport::demux::MAX_DTLS_PACKET_LEN;
use crate::transport::fingerprint::{compute_digest, validate_digest_len, FingerprintAlgorithm};
use crate::transport::role::DtlsRole;

/// Retransmission intervals double per fired timer up to this cap.
const MAX_RETRANSMIT_INTERVAL: Duration = Duration::from_millis(3000);

/// Used when the owner never supplied a route-derived initial timeout.
const DEFAULT_INITIAL_RETRANSMIT_TIMEOUT: Duration = Duration::from_millis(100);

/// State shared with the certificate verification callback registered on
/// the OpenSSL context. The callback runs mid-handshake, from inside the
/// library, so this is the one place the engine keeps lock-guarded state.
#[derive(Default)]
struct VerifyState {
    expected: Option<(FingerprintAlgorithm, Vec<u8>)>,
    peer_chain: Vec<Vec<u8>>,
    rejected: bool,
}

fn lock(shared: &Mutex<VerifyState>) -> MutexGuard<'_, VerifyState> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

enum SslSession {
    /// Before `start`.
    Idle,
    /// Started while the channel was still opening; the configured session
    /// object waits for the transport to become writable.
    Configured { ssl: Ssl },
    Handshaking(MidHandshakeSslStream<PacketChannel>),
    Established(SslStream<PacketChannel>),
    Terminated,
}

/// The one concrete [`TlsEngine`]: OpenSSL's DTLS implementation driven in
/// non-blocking mode over a [`PacketChannel`].
pub struct OpenSslEngine {
    state: EngineState,
    role: Option<DtlsRole>,
    identity: Option<DtlsIdentity>,
    srtp_profiles: Vec<SrtpProfile>,
    expected_digest: Option<(FingerprintAlgorithm, Vec<u8>)>,
    verify: Arc<Mutex<VerifyState>>,
    channel: PacketChannel,
    session: SslSession,
    peer_chain: Vec<Vec<u8>>,
    plaintext: std::collections::VecDeque<BytesMut>,
    events: std::collections::VecDeque<EngineEvent>,
    retransmit_deadline: Option<Instant>,
    retransmit_interval: Duration,
}

impl OpenSslEngine {
    pub fn new() -> Self {
        OpenSslEngine {
            state: EngineState::Uninitialized,
            role: None,
            identity: None,
            srtp_profiles: vec![],
            expected_digest: None,
            verify: Arc::new(Mutex::new(VerifyState::default())),
            channel: PacketChannel::new(),
            session: SslSession::Idle,
            peer_chain: vec![],
            plaintext: std::collections::VecDeque::new(),
            events: std::collections::VecDeque::new(),
            retransmit_deadline: None,
            retransmit_interval: DEFAULT_INITIAL_RETRANSMIT_TIMEOUT,
        }
    }

    fn build_context(&self, role: DtlsRole, identity: &DtlsIdentity) -> Result<SslContext> {
        let mut builder = SslContext::builder(SslMethod::dtls())?;
        builder.set_certificate(identity.certificate())?;
        builder.set_private_key(identity.private_key())?;
        builder.check_private_key()?;

        if !self.srtp_profiles.is_empty() {
            let profiles: Vec<&str> = self
                .srtp_profiles
                .iter()
                .map(|p| p.openssl_name())
                .collect();
            builder.set_tlsext_use_srtp(&profiles.join(":"))?;
        }

        // Both sides present certificates; the server additionally demands
        // one from the client. Trust is pinned by digest, not by a CA
        // chain, so the callback replaces the default chain validation.
        let mode = match role {
            DtlsRole::Server => SslVerifyMode::PEER | SslVerifyMode::FAIL_IF_NO_PEER_CERT,
            DtlsRole::Client => SslVerifyMode::PEER,
        };
        let shared = Arc::clone(&self.verify);
        builder.set_verify_callback(mode, move |_preverified, store| {
            if store.error_depth() != 0 {
                return true;
            }
            let der = match store.current_cert().map(|cert| cert.to_der()) {
                Some(Ok(der)) => der,
                _ => return false,
            };
            let mut state = shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            let ok = match &state.expected {
                Some((algorithm, expected)) => &compute_digest(*algorithm, &der) == expected,
                // No digest yet: accept provisionally so the handshake can
                // proceed. Verification runs once the digest arrives.
                None => true,
            };
            if !ok {
                state.rejected = true;
            }
            state.peer_chain = vec![der];
            ok
        });

        Ok(builder.build())
    }

    fn begin_handshake(&mut self, ssl: Ssl, role: DtlsRole, now: Instant) {
        let stream = self.channel.clone();
        let result = match role {
            DtlsRole::Client => ssl.connect(stream),
            DtlsRole::Server => ssl.accept(stream),
        };
        self.on_handshake_result(result, now);
    }

    fn step_handshake(&mut self, now: Instant) {
        match mem::replace(&mut self.session, SslSession::Terminated) {
            SslSession::Handshaking(mid) => self.on_handshake_result(mid.handshake(), now),
            other => self.session = other,
        }
    }

    fn on_handshake_result(
        &mut self,
        result: std::result::Result<SslStream<PacketChannel>, HandshakeError<PacketChannel>>,
        now: Instant,
    ) {
        match result {
            Ok(stream) => self.complete_handshake(stream),
            Err(HandshakeError::WouldBlock(mid)) => {
                self.session = SslSession::Handshaking(mid);
                self.state = EngineState::Handshaking;
                // every step rearms the retransmission timer
                self.retransmit_deadline = Some(now + self.retransmit_interval);
            }
            Err(HandshakeError::Failure(mid)) => {
                warn!("dtls handshake failed: {}", mid.error());
                if lock(&self.verify).rejected {
                    self.fail(Error::ErrPeerCertificateVerificationFailed);
                } else {
                    self.fail(Error::ErrHandshakeFailed);
                }
            }
            Err(HandshakeError::SetupFailure(stack)) => {
                warn!("dtls handshake setup failed: {stack}");
                self.fail(Error::Ssl(stack));
            }
        }
    }

    fn complete_handshake(&mut self, stream: SslStream<PacketChannel>) {
        self.retransmit_deadline = None;

        let mut chain = vec![];
        {
            let ssl = stream.ssl();
            if let Some(leaf) = ssl.peer_certificate() {
                if let Ok(der) = leaf.to_der() {
                    chain.push(der);
                }
            }
            if let Some(stack) = ssl.peer_cert_chain() {
                for cert in stack.iter() {
                    if let Ok(der) = cert.to_der() {
                        if !chain.contains(&der) {
                            chain.push(der);
                        }
                    }
                }
            }
        }
        if chain.is_empty() {
            // Client auth is required, so a completed handshake with no
            // peer certificate means the TLS stack is misbehaving.
            debug_assert!(false, "handshake completed without a peer certificate");
            self.fail(Error::ErrNoRemoteCertificate);
            return;
        }

        self.peer_chain = chain;
        self.session = SslSession::Established(stream);
        self.events.push_back(EngineEvent::HandshakeComplete);

        match self.expected_digest.clone() {
            Some((algorithm, expected)) => {
                if compute_digest(algorithm, &self.peer_chain[0]) == expected {
                    debug!("dtls handshake complete, peer certificate verified");
                    self.state = EngineState::Connected;
                    self.events.push_back(EngineEvent::PeerVerified);
                } else {
                    self.fail(Error::ErrPeerCertificateVerificationFailed);
                    return;
                }
            }
            None => {
                debug!("dtls handshake complete, waiting for peer certificate digest");
                self.state = EngineState::ConnectedUnverified;
            }
        }

        self.drain_application_data();
    }

    fn drain_application_data(&mut self) {
        let mut closed_by_peer = false;
        let mut read_failure: Option<String> = None;

        if let SslSession::Established(stream) = &mut self.session {
            loop {
                let mut buf = [0u8; MAX_DTLS_PACKET_LEN];
                match stream.ssl_read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => self.plaintext.push_back(BytesMut::from(&buf[..n])),
                    Err(err) => {
                        match err.code() {
                            ErrorCode::WANT_READ | ErrorCode::WANT_WRITE => {}
                            ErrorCode::ZERO_RETURN => closed_by_peer = true,
                            _ => read_failure = Some(err.to_string()),
                        }
                        break;
                    }
                }
            }
        }

        if closed_by_peer {
            debug!("dtls session closed by peer");
            self.shutdown_session();
        } else if let Some(reason) = read_failure {
            warn!("ssl read error: {reason}");
            self.fail(Error::ErrHandshakeFailed);
        }
    }

    fn shutdown_session(&mut self) {
        self.retransmit_deadline = None;
        if let SslSession::Established(mut stream) =
            mem::replace(&mut self.session, SslSession::Terminated)
        {
            let _ = stream.shutdown();
        }
        self.channel.close();
        if !matches!(self.state, EngineState::Closed | EngineState::Error) {
            self.state = EngineState::Closed;
            self.events.push_back(EngineEvent::Closed);
        }
    }

    fn fail(&mut self, err: Error) {
        warn!("dtls engine failed: {err}");
        self.retransmit_deadline = None;
        self.session = SslSession::Terminated;
        self.channel.close();
        if self.state != EngineState::Error {
            self.state = EngineState::Error;
            self.events.push_back(EngineEvent::Failed);
        }
    }

    /// Session handle once negotiated parameters are readable.
    fn negotiated_ssl(&self) -> Option<&openssl::ssl::SslRef> {
        match (&self.session, self.state) {
            (
                SslSession::Established(stream),
                EngineState::Connected | EngineState::ConnectedUnverified,
            ) => Some(stream.ssl()),
            _ => None,
        }
    }
}

impl Default for OpenSslEngine {
    fn default() -> Self {
        OpenSslEngine::new()
    }
}

impl TlsEngine for OpenSslEngine {
    fn state(&self) -> EngineState {
        self.state
    }

    fn set_identity(&mut self, identity: DtlsIdentity) -> Result<()> {
        if self.identity.is_some() {
            return Err(Error::ErrIdentityAlreadySet);
        }
        self.identity = Some(identity);
        Ok(())
    }

    fn set_role(&mut self, role: DtlsRole) -> Result<()> {
        if !matches!(self.session, SslSession::Idle) {
            return Err(Error::ErrRoleAlreadySet);
        }
        self.role = Some(role);
        Ok(())
    }

    fn set_srtp_profiles(&mut self, profiles: &[SrtpProfile]) -> Result<()> {
        if !matches!(self.session, SslSession::Idle) {
            return Err(Error::ErrSslAlreadyStarted);
        }
        self.srtp_profiles = profiles.to_vec();
        Ok(())
    }

    fn set_peer_certificate_digest(
        &mut self,
        algorithm: FingerprintAlgorithm,
        digest: &[u8],
    ) -> Result<()> {
        validate_digest_len(algorithm, digest)?;
        self.expected_digest = Some((algorithm, digest.to_vec()));
        lock(&self.verify).expected = Some((algorithm, digest.to_vec()));

        // The handshake may have run ahead of the digest. If a chain is
        // already on record, settle verification now.
        let leaf = self
            .peer_chain
            .first()
            .cloned()
            .or_else(|| lock(&self.verify).peer_chain.first().cloned());
        if let Some(leaf) = leaf {
            if compute_digest(algorithm, &leaf) != digest {
                self.fail(Error::ErrPeerCertificateVerificationFailed);
                return Err(Error::ErrPeerCertificateVerificationFailed);
            }
            if self.state == EngineState::ConnectedUnverified {
                debug!("peer certificate verified against late digest");
                self.state = EngineState::Connected;
                self.events.push_back(EngineEvent::PeerVerified);
            }
        }
        Ok(())
    }

    fn set_initial_retransmit_timeout(&mut self, timeout: Duration) {
        self.retransmit_interval = timeout;
    }

    fn start(&mut self, now: Instant) -> Result<()> {
        if self.state != EngineState::Uninitialized {
            return Err(Error::ErrSslAlreadyStarted);
        }
        let role = self.role.ok_or(Error::ErrRoleNotSet)?;
        let identity = self.identity.clone().ok_or(Error::ErrIdentityNotSet)?;

        let context = self.build_context(role, &identity)?;
        let ssl = Ssl::new(&context)?;

        if self.channel.is_open() {
            self.begin_handshake(ssl, role, now);
        } else {
            self.session = SslSession::Configured { ssl };
            self.state = EngineState::WaitingForChannel;
        }
        Ok(())
    }

    fn notify_channel_open(&mut self, now: Instant) -> Result<()> {
        self.channel.set_open();
        if self.state == EngineState::WaitingForChannel {
            let role = self.role.ok_or(Error::ErrRoleNotSet)?;
            match mem::replace(&mut self.session, SslSession::Terminated) {
                SslSession::Configured { ssl } => self.begin_handshake(ssl, role, now),
                other => self.session = other,
            }
        }
        Ok(())
    }

    fn put_packet(&mut self, now: Instant, payload: BytesMut) -> Result<()> {
        match self.state {
            EngineState::Uninitialized | EngineState::Closed | EngineState::Error => {
                debug!("ignoring inbound packet in state {}", self.state);
                return Ok(());
            }
            _ => {}
        }
        self.channel.on_packet_received(payload);
        match self.state {
            EngineState::Handshaking => self.step_handshake(now),
            EngineState::ConnectedUnverified | EngineState::Connected => {
                self.drain_application_data()
            }
            // WaitingForChannel: stays queued until the channel opens
            _ => {}
        }
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        match self.state {
            EngineState::Connected => {}
            EngineState::WaitingForChannel
            | EngineState::Handshaking
            | EngineState::ConnectedUnverified => return Err(Error::ErrWouldBlock),
            _ => return Err(Error::ErrDtlsNotEstablished),
        }
        if data.is_empty() {
            return Ok(0);
        }
        let result = match &mut self.session {
            SslSession::Established(stream) => stream.ssl_write(data),
            _ => return Err(Error::ErrDtlsNotEstablished),
        };
        match result {
            Ok(n) => Ok(n),
            Err(err) if matches!(err.code(), ErrorCode::WANT_READ | ErrorCode::WANT_WRITE) => {
                Err(Error::ErrWouldBlock)
            }
            Err(err) => {
                warn!("ssl write error: {err}");
                Err(Error::ErrDtlsNotEstablished)
            }
        }
    }

    fn poll_transmit(&mut self) -> Option<BytesMut> {
        self.channel.take_outgoing()
    }

    fn poll_plaintext(&mut self) -> Option<BytesMut> {
        self.plaintext.pop_front()
    }

    fn poll_event(&mut self) -> Option<EngineEvent> {
        self.events.pop_front()
    }

    fn handle_timeout(&mut self, now: Instant) {
        let Some(deadline) = self.retransmit_deadline else {
            return;
        };
        if now < deadline {
            return;
        }
        if self.state != EngineState::Handshaking {
            self.retransmit_deadline = None;
            return;
        }
        self.retransmit_interval = (self.retransmit_interval * 2).min(MAX_RETRANSMIT_INTERVAL);
        debug!(
            "handshake retransmission timer fired, next interval {:?}",
            self.retransmit_interval
        );
        self.step_handshake(now);
    }

    fn poll_timeout(&self) -> Option<Instant> {
        self.retransmit_deadline
    }

    fn close(&mut self) {
        self.shutdown_session();
    }

    fn peer_certificate_chain(&self) -> &[Vec<u8>] {
        &self.peer_chain
    }

    fn export_keying_material(
        &self,
        label: &str,
        context: Option<&[u8]>,
        length: usize,
    ) -> Result<Vec<u8>> {
        let ssl = self.negotiated_ssl().ok_or(Error::ErrDtlsNotEstablished)?;
        let mut out = vec![0u8; length];
        ssl.export_keying_material(&mut out, label, context)?;
        Ok(out)
    }

    fn selected_srtp_profile(&self) -> Option<SrtpProfile> {
        self.negotiated_ssl()
            .and_then(|ssl| ssl.selected_srtp_profile())
            .and_then(|profile| SrtpProfile::from_openssl_name(profile.name()))
    }

    fn ssl_cipher_suite(&self) -> Option<String> {
        self.negotiated_ssl()
            .and_then(|ssl| ssl.current_cipher())
            .map(|cipher| cipher.name().to_string())
    }

    fn ssl_version_bytes(&self) -> Option<[u8; 2]> {
        self.negotiated_ssl()
            .and_then(|ssl| match ssl.version_str() {
                "DTLSv1" => Some([0xfe, 0xff]),
                "DTLSv1.2" => Some([0xfe, 0xfd]),
                _ => None,
            })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_identity_set_at_most_once() {
        let mut engine = OpenSslEngine::new();
        engine
            .set_identity(DtlsIdentity::generate().unwrap())
            .unwrap();
        let err = engine
            .set_identity(DtlsIdentity::generate().unwrap())
            .unwrap_err();
        assert!(matches!(err, Error::ErrIdentityAlreadySet));
    }

    #[test]
    fn test_start_requires_role_and_identity() {
        let mut engine = OpenSslEngine::new();
        assert!(matches!(
            engine.start(Instant::now()),
            Err(Error::ErrRoleNotSet)
        ));
        engine.set_role(DtlsRole::Client).unwrap();
        assert!(matches!(
            engine.start(Instant::now()),
            Err(Error::ErrIdentityNotSet)
        ));
    }

    #[test]
    fn test_start_twice_fails() {
        let mut engine = OpenSslEngine::new();
        engine.set_role(DtlsRole::Client).unwrap();
        engine
            .set_identity(DtlsIdentity::generate().unwrap())
            .unwrap();
        engine.start(Instant::now()).unwrap();
        assert_eq!(engine.state(), EngineState::WaitingForChannel);
        assert!(matches!(
            engine.start(Instant::now()),
            Err(Error::ErrSslAlreadyStarted)
        ));
    }

    #[test]
    fn test_negotiated_parameters_unavailable_before_connected() {
        let engine = OpenSslEngine::new();
        assert!(engine.selected_srtp_profile().is_none());
        assert!(engine.ssl_cipher_suite().is_none());
        assert!(engine.ssl_version_bytes().is_none());
        assert!(matches!(
            engine.export_keying_material("EXTRACTOR-dtls_srtp", None, 60),
            Err(Error::ErrDtlsNotEstablished)
        ));
    }

    #[test]
    fn test_digest_length_validated() {
        let mut engine = OpenSslEngine::new();
        let err = engine
            .set_peer_certificate_digest(FingerprintAlgorithm::Sha256, &[0u8; 16])
            .unwrap_err();
        assert!(err.is_fingerprint_format_error());
    }

    #[test]
    fn test_write_blocks_before_handshake() {
        let mut engine = OpenSslEngine::new();
        engine.set_role(DtlsRole::Client).unwrap();
        engine
            .set_identity(DtlsIdentity::generate().unwrap())
            .unwrap();
        engine.start(Instant::now()).unwrap();
        assert!(matches!(engine.write(b"data"), Err(Error::ErrWouldBlock)));
    }

    #[test]
    fn test_client_start_arms_retransmit_timer() {
        let mut engine = OpenSslEngine::new();
        engine.set_role(DtlsRole::Client).unwrap();
        engine
            .set_identity(DtlsIdentity::generate().unwrap())
            .unwrap();
        engine.set_initial_retransmit_timeout(Duration::from_millis(100));

        let now = Instant::now();
        engine.start(now).unwrap();
        engine.notify_channel_open(now).unwrap();
        assert_eq!(engine.state(), EngineState::Handshaking);
        // the first flight is waiting for the wire
        assert!(engine.poll_transmit().is_some());
        let deadline = engine.poll_timeout().unwrap();
        assert_eq!(deadline, now + Duration::from_millis(100));

        // firing the timer keeps the handshake alive and backs off
        engine.handle_timeout(deadline);
        let rearmed = engine.poll_timeout().unwrap();
        assert_eq!(rearmed, deadline + Duration::from_millis(200));
    }
}

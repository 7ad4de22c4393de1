#![warn(rust_2018_idioms)]
//! Sans-IO DTLS transport over ICE-style packet transports.
//!
//! The crate implements the protocol layer that turns an unreliable,
//! packet-oriented transport into an authenticated DTLS packet transport
//! with SRTP keying-material export:
//!
//! - [`DtlsTransport`] orchestrates the lifecycle: packet classification,
//!   certificate and fingerprint handling, role selection, and the state
//!   machine exposed to upper layers.
//! - [`engine::TlsEngine`] drives the handshake and record layer behind a
//!   trait; [`engine::OpenSslEngine`] is the concrete implementation on
//!   top of OpenSSL's DTLS stack.
//! - [`engine::PacketChannel`] bridges pushed raw packets to the
//!   byte-stream interface the TLS library consumes.
//!
//! Nothing here performs I/O or spawns threads. The embedding event loop
//! delivers inbound packets and timer fires, and drains outbound packets
//! and events; see the `handle_*` / `poll_*` methods on [`DtlsTransport`].

pub mod engine;
pub mod error;
pub mod identity;
pub mod srtp;
pub mod transport;

pub use error::{Error, Result};
pub use identity::DtlsIdentity;
pub use srtp::{CryptoOptions, SrtpOptions, SrtpProfile};
pub use transport::fingerprint::{Fingerprint, FingerprintAlgorithm};
pub use transport::role::DtlsRole;
pub use transport::state::DtlsTransportState;
pub use transport::{DtlsTransport, DtlsTransportEvent, PacketOptions, ReceivedPacket};

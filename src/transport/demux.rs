//! Packet classification for demuxing DTLS records from SRTP/RTP traffic
//! sharing one transport, following the first-byte ranges of RFC 7983.
//!
//! ```text
//!             +----------------+
//!             |      [20..63] -+--> DTLS
//!  packet --> |                |
//!             |    [128..191] -+--> RTP / RTCP
//!             +----------------+
//! ```

/// DTLS record header: type (1), version (2), epoch (2), sequence (6),
/// length (2).
pub const DTLS_RECORD_HEADER_LEN: usize = 13;

/// Largest raw packet accepted as DTLS input.
pub const MAX_DTLS_PACKET_LEN: usize = 2048;

/// Minimal RTP header.
pub const MIN_RTP_PACKET_LEN: usize = 12;

const DTLS_CONTENT_TYPE_HANDSHAKE: u8 = 22;
const DTLS_HANDSHAKE_TYPE_CLIENT_HELLO: u8 = 1;

/// Whether the packet plausibly carries DTLS records: long enough for a
/// record header and a content-type byte in the DTLS range.
pub fn is_dtls_packet(buf: &[u8]) -> bool {
    buf.len() >= DTLS_RECORD_HEADER_LEN && (20..=63).contains(&buf[0])
}

/// Whether the packet starts with a DTLS ClientHello handshake record.
pub fn is_dtls_client_hello(buf: &[u8]) -> bool {
    is_dtls_packet(buf)
        && buf.len() > DTLS_RECORD_HEADER_LEN
        && buf[0] == DTLS_CONTENT_TYPE_HANDSHAKE
        && buf[DTLS_RECORD_HEADER_LEN] == DTLS_HANDSHAKE_TYPE_CLIENT_HELLO
}

/// Whether the packet plausibly carries RTP: minimal header length and RTP
/// version 2 in the top two bits.
pub fn is_rtp_packet(buf: &[u8]) -> bool {
    buf.len() >= MIN_RTP_PACKET_LEN && (buf[0] & 0xC0) == 0x80
}

/// Walks the per-record length prefixes. Every record must be complete and
/// the walk must land exactly on the end of the packet; anything else is a
/// framing error and the packet never reaches the TLS engine.
pub fn has_valid_dtls_record_framing(buf: &[u8]) -> bool {
    let mut offset = 0usize;
    while offset < buf.len() {
        if buf.len() - offset < DTLS_RECORD_HEADER_LEN {
            return false;
        }
        let record_len =
            u16::from_be_bytes([buf[offset + 11], buf[offset + 12]]) as usize;
        offset += DTLS_RECORD_HEADER_LEN + record_len;
    }
    offset == buf.len()
}

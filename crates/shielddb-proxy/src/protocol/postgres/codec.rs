//! PostgreSQL packet framing (read/write)
//!
//! This module reads and writes length-prefixed PostgreSQL wire messages.
//! Reference: <https://www.postgresql.org/docs/current/protocol-message-formats.html>
//!
//! Two framings exist:
//! - **Startup phase** (client's first message after connect or after an SSL
//!   upgrade/deny): `[length: u32][payload]` with no type byte. The length
//!   includes itself.
//! - **Regular phase**: `[type: u8][length: u32][payload]`, length includes
//!   itself but not the type byte.
//!
//! Framing is exact: the number of bytes written for a packet always equals
//! the length announced in its (possibly recomputed) header. Payloads are
//! only reallocated when a mutator is invoked.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ProxyError, Result};

use super::constants::MSG_TERMINATE;
use super::messages::{BindPacket, ParsePacket};

// ============================================================================
// Constants
// ============================================================================

/// Maximum message size accepted by the proxy (100MB; the protocol itself
/// allows up to 1GB)
pub const MAX_MESSAGE_SIZE: u32 = 100 * 1024 * 1024;

/// Minimum message length (just the 4-byte length field)
pub const MIN_MESSAGE_LENGTH: u32 = 4;

// ============================================================================
// Packet
// ============================================================================

/// A framed protocol message.
///
/// `message_type` is `None` for startup-phase client messages, which carry
/// no type byte on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// The message type byte, if the message carries one
    pub message_type: Option<u8>,
    /// The payload, without the type byte and without the length field
    pub payload: Vec<u8>,
}

impl Packet {
    /// Create a typed packet.
    pub fn new(message_type: u8, payload: Vec<u8>) -> Self {
        Self {
            message_type: Some(message_type),
            payload,
        }
    }

    /// Create a startup-phase packet (no type byte).
    pub fn startup(payload: Vec<u8>) -> Self {
        Self {
            message_type: None,
            payload,
        }
    }

    /// The length field value for this packet: payload length plus the
    /// 4 bytes of the length field itself.
    pub fn frame_length(&self) -> u32 {
        self.payload.len() as u32 + 4
    }

    /// Whether this is the client's Terminate message.
    pub fn is_terminate(&self) -> bool {
        self.message_type == Some(MSG_TERMINATE)
    }

    /// Replace the payload, releasing the old buffer. The frame length is
    /// recomputed on the next write.
    pub fn replace_payload(&mut self, new_payload: Vec<u8>) {
        self.payload = new_payload;
    }

    /// Replace the SQL text of a simple Query packet.
    pub fn replace_query(&mut self, query: &str) {
        self.replace_payload(super::messages::encode_simple_query(query));
    }

    /// Replace the contents of a Parse packet.
    pub fn replace_parse(&mut self, parse: &ParsePacket) {
        self.replace_payload(parse.encode());
    }

    /// Replace the contents of a Bind packet.
    pub fn replace_bind(&mut self, bind: &BindPacket) {
        self.replace_payload(bind.encode());
    }
}

// ============================================================================
// Reading
// ============================================================================

async fn read_u8<R: AsyncRead + Unpin>(reader: &mut R) -> Result<u8> {
    let mut buf = [0u8; 1];
    reader.read_exact(&mut buf).await?;
    Ok(buf[0])
}

async fn read_u32_be<R: AsyncRead + Unpin>(reader: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf).await?;
    Ok(u32::from_be_bytes(buf))
}

fn validate_length(length: u32) -> Result<()> {
    if length < MIN_MESSAGE_LENGTH {
        return Err(ProxyError::Framing(format!(
            "Invalid message length: {}",
            length
        )));
    }
    if length > MAX_MESSAGE_SIZE {
        return Err(ProxyError::Framing(format!(
            "Message too large: {} bytes (max: {})",
            length, MAX_MESSAGE_SIZE
        )));
    }
    Ok(())
}

async fn read_payload<R: AsyncRead + Unpin>(reader: &mut R, length: u32) -> Result<Vec<u8>> {
    let payload_len = (length - 4) as usize;
    let mut payload = vec![0u8; payload_len];
    if payload_len > 0 {
        reader.read_exact(&mut payload).await.map_err(|e| {
            ProxyError::Framing(format!(
                "Short read: expected {} payload bytes: {}",
                payload_len, e
            ))
        })?;
    }
    Ok(payload)
}

/// Read a client packet.
///
/// In the startup phase the message has no type byte; the returned packet
/// carries `message_type: None`. In the regular phase a full typed message
/// is read.
pub async fn read_client_packet<R: AsyncRead + Unpin>(
    reader: &mut R,
    startup_phase: bool,
) -> Result<Packet> {
    if startup_phase {
        let length = read_u32_be(reader).await?;
        validate_length(length)?;
        let payload = read_payload(reader, length).await?;
        Ok(Packet::startup(payload))
    } else {
        read_packet(reader).await
    }
}

/// Read a typed message: type byte, length, payload.
pub async fn read_packet<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Packet> {
    let msg_type = read_u8(reader).await?;
    let length = read_u32_be(reader).await?;
    validate_length(length)?;
    let payload = read_payload(reader, length).await?;
    Ok(Packet::new(msg_type, payload))
}

/// Read only the message type byte.
///
/// Used exactly once per session, to inspect the server's single-byte
/// answer to a forwarded `SSLRequest` without consuming anything further.
pub async fn read_message_type<R: AsyncRead + Unpin>(reader: &mut R) -> Result<u8> {
    read_u8(reader).await
}

/// Read the remainder of a packet whose type byte was already consumed by
/// [`read_message_type`].
pub async fn read_packet_after_type<R: AsyncRead + Unpin>(
    reader: &mut R,
    msg_type: u8,
) -> Result<Packet> {
    let length = read_u32_be(reader).await?;
    validate_length(length)?;
    let payload = read_payload(reader, length).await?;
    Ok(Packet::new(msg_type, payload))
}

// ============================================================================
// Writing
// ============================================================================

/// Write a packet, recomputing the length field from the payload.
pub async fn write_packet<W: AsyncWrite + Unpin>(writer: &mut W, packet: &Packet) -> Result<()> {
    if let Some(msg_type) = packet.message_type {
        writer.write_all(&[msg_type]).await?;
    }
    writer
        .write_all(&packet.frame_length().to_be_bytes())
        .await?;
    if !packet.payload.is_empty() {
        writer.write_all(&packet.payload).await?;
    }
    writer.flush().await?;
    Ok(())
}

/// Write raw bytes, flushing. Used for single response bytes ('S'/'N') and
/// for the canonical proxy-generated packets.
pub async fn write_raw<W: AsyncWrite + Unpin>(writer: &mut W, bytes: &[u8]) -> Result<()> {
    writer.write_all(bytes).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::postgres::constants::{MSG_QUERY, MSG_TERMINATE};
    use std::io::Cursor;

    #[tokio::test]
    async fn test_read_write_round_trip() {
        let packet = Packet::new(MSG_QUERY, b"SELECT 1\0".to_vec());
        let mut buf = Vec::new();
        write_packet(&mut buf, &packet).await.unwrap();

        let mut cursor = Cursor::new(&buf);
        let decoded = read_packet(&mut cursor).await.unwrap();
        assert_eq!(decoded, packet);
        // Announced length equals payload + 4
        assert_eq!(buf[1..5], (packet.payload.len() as u32 + 4).to_be_bytes());
    }

    #[tokio::test]
    async fn test_read_startup_packet() {
        // SSLRequest: length 8, code 80877103
        let bytes: Vec<u8> = vec![0, 0, 0, 8, 0x04, 0xD2, 0x16, 0x2F];
        let mut cursor = Cursor::new(&bytes);
        let packet = read_client_packet(&mut cursor, true).await.unwrap();
        assert_eq!(packet.message_type, None);
        assert_eq!(packet.payload, vec![0x04, 0xD2, 0x16, 0x2F]);
        assert_eq!(packet.frame_length(), 8);
    }

    #[tokio::test]
    async fn test_startup_packet_write_preserves_framing() {
        let bytes: Vec<u8> = vec![0, 0, 0, 8, 0x04, 0xD2, 0x16, 0x2F];
        let mut cursor = Cursor::new(&bytes);
        let packet = read_client_packet(&mut cursor, true).await.unwrap();

        let mut out = Vec::new();
        write_packet(&mut out, &packet).await.unwrap();
        assert_eq!(out, bytes);
    }

    #[tokio::test]
    async fn test_length_underflow_is_framing_error() {
        let bytes: Vec<u8> = vec![b'Q', 0, 0, 0, 3];
        let mut cursor = Cursor::new(&bytes);
        let err = read_packet(&mut cursor).await.unwrap_err();
        assert!(matches!(err, ProxyError::Framing(_)));
    }

    #[tokio::test]
    async fn test_oversized_length_is_framing_error() {
        let mut bytes: Vec<u8> = vec![b'Q'];
        bytes.extend_from_slice(&(MAX_MESSAGE_SIZE + 1).to_be_bytes());
        let mut cursor = Cursor::new(&bytes);
        let err = read_packet(&mut cursor).await.unwrap_err();
        assert!(matches!(err, ProxyError::Framing(_)));
    }

    #[tokio::test]
    async fn test_short_payload_is_framing_error() {
        // Claims 10 payload bytes, carries 2
        let mut bytes: Vec<u8> = vec![b'Q', 0, 0, 0, 14];
        bytes.extend_from_slice(b"hi");
        let mut cursor = Cursor::new(&bytes);
        let err = read_packet(&mut cursor).await.unwrap_err();
        assert!(matches!(err, ProxyError::Framing(_)));
    }

    #[tokio::test]
    async fn test_read_message_type_then_rest() {
        let packet = Packet::new(b'R', vec![0, 0, 0, 0]);
        let mut buf = Vec::new();
        write_packet(&mut buf, &packet).await.unwrap();

        let mut cursor = Cursor::new(&buf);
        let msg_type = read_message_type(&mut cursor).await.unwrap();
        assert_eq!(msg_type, b'R');
        let rest = read_packet_after_type(&mut cursor, msg_type).await.unwrap();
        assert_eq!(rest, packet);
    }

    #[tokio::test]
    async fn test_replace_query_recomputes_length() {
        let mut packet = Packet::new(MSG_QUERY, b"SELECT 1\0".to_vec());
        packet.replace_query("SELECT 1, 2, 3");

        let mut buf = Vec::new();
        write_packet(&mut buf, &packet).await.unwrap();
        let announced = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
        assert_eq!(announced as usize, buf.len() - 1 - 4 + 4);
        assert_eq!(&buf[5..], b"SELECT 1, 2, 3\0");
    }

    #[test]
    fn test_terminate_detection() {
        let packet = Packet::new(MSG_TERMINATE, vec![]);
        assert!(packet.is_terminate());
        assert_eq!(packet.frame_length(), 4);
        let other = Packet::new(MSG_QUERY, vec![]);
        assert!(!other.is_terminate());
    }

    #[tokio::test]
    async fn test_empty_payload_packet() {
        let packet = Packet::new(b'Z', vec![b'I']);
        let mut buf = Vec::new();
        write_packet(&mut buf, &packet).await.unwrap();
        assert_eq!(buf, vec![b'Z', 0, 0, 0, 5, b'I']);
    }
}

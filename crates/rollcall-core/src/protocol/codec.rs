//! Binary codec for encoding and decoding Rollcall protocol messages.
//!
//! Wire format:
//! ```text
//! [version:1][msg_type:1][reserved:2][payload_len:4][seq:8][timestamp_us:8][payload:N]
//! ```
//! Total header size: 24 bytes. All multi-byte integers are big-endian.
//! Session codes travel as exactly [`CODE_LENGTH`] raw ASCII bytes; strings
//! carry a 2-byte length prefix.

use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use uuid::Uuid;

use crate::domain::attendance::CommitChannel;
use crate::domain::session::{SessionCode, CODE_LENGTH};
use crate::protocol::messages::{
    AdvertiseMessage, CodeConfirmMessage, CodeOfferMessage, CommitAckMessage,
    CommitRequestMessage, CommitStatus, ErrorMessage, EvictReason, EvictedMessage,
    JoinAckMessage, JoinRequestMessage, JoinVerdict, MessageType, ProtocolErrorCode,
    QueueUpdateMessage, RollcallMessage, SlotGrantedMessage, HEADER_SIZE, PROTOCOL_VERSION,
};

/// Errors that can occur during message encoding or decoding.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The byte slice is shorter than the minimum required length.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The message type byte in the header is not a recognized value.
    #[error("unknown message type: 0x{0:02X}")]
    UnknownMessageType(u8),

    /// The protocol version in the header is not supported.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// The payload could not be parsed (field value out of range, UTF-8 error, etc.).
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The encoded payload length field does not match the actual data available.
    #[error("payload length mismatch: header says {declared}, available is {available}")]
    PayloadLengthMismatch { declared: usize, available: usize },
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a [`RollcallMessage`] into a byte vector including the 24-byte header.
///
/// The sequence number is **not** set by this function – pass a pre-incremented
/// value from a [`crate::protocol::SequenceCounter`].
///
/// # Errors
///
/// Returns [`ProtocolError`] if serialization fails.
///
/// # Examples
///
/// ```rust
/// use rollcall_core::protocol::{encode_message, decode_message};
/// use rollcall_core::protocol::messages::RollcallMessage;
///
/// let msg = RollcallMessage::Cancel;
/// let bytes = encode_message(&msg, 0, 0).unwrap();
/// let (decoded, consumed) = decode_message(&bytes).unwrap();
/// assert_eq!(decoded, msg);
/// assert_eq!(consumed, bytes.len());
/// ```
pub fn encode_message(
    msg: &RollcallMessage,
    sequence_number: u64,
    timestamp_us: u64,
) -> Result<Vec<u8>, ProtocolError> {
    let payload = encode_payload(msg);
    let payload_len = payload.len() as u32;

    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());

    // Header: version (1) + msg_type (1) + reserved (2) + payload_len (4) +
    //         seq (8) + timestamp_us (8) = 24 bytes
    buf.push(PROTOCOL_VERSION);
    buf.push(msg.message_type() as u8);
    buf.push(0x00); // reserved
    buf.push(0x00); // reserved
    buf.extend_from_slice(&payload_len.to_be_bytes());
    buf.extend_from_slice(&sequence_number.to_be_bytes());
    buf.extend_from_slice(&timestamp_us.to_be_bytes());

    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Encodes a [`RollcallMessage`] using the current system time as the timestamp.
///
/// # Errors
///
/// Returns [`ProtocolError`] if serialization fails.
pub fn encode_message_now(
    msg: &RollcallMessage,
    sequence_number: u64,
) -> Result<Vec<u8>, ProtocolError> {
    let timestamp_us = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64;
    encode_message(msg, sequence_number, timestamp_us)
}

/// Decodes one [`RollcallMessage`] from the beginning of `bytes`.
///
/// Returns the decoded message and the total number of bytes consumed
/// (header + payload), so the caller can advance their read cursor.
///
/// # Errors
///
/// Returns [`ProtocolError`] if the bytes are malformed.
pub fn decode_message(bytes: &[u8]) -> Result<(RollcallMessage, usize), ProtocolError> {
    if bytes.len() < HEADER_SIZE {
        return Err(ProtocolError::InsufficientData {
            needed: HEADER_SIZE,
            available: bytes.len(),
        });
    }

    let version = bytes[0];
    if version != PROTOCOL_VERSION {
        return Err(ProtocolError::UnsupportedVersion(version));
    }

    let msg_type_byte = bytes[1];
    let msg_type = MessageType::try_from(msg_type_byte)
        .map_err(|_| ProtocolError::UnknownMessageType(msg_type_byte))?;

    // bytes[2..4] are reserved – ignored on decode

    let payload_len = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;

    let total_needed = HEADER_SIZE + payload_len;
    if bytes.len() < total_needed {
        return Err(ProtocolError::PayloadLengthMismatch {
            declared: payload_len,
            available: bytes.len() - HEADER_SIZE,
        });
    }

    let payload = &bytes[HEADER_SIZE..HEADER_SIZE + payload_len];
    let msg = decode_payload(msg_type, payload)?;
    Ok((msg, total_needed))
}

// ── Payload encoding ──────────────────────────────────────────────────────────

fn encode_payload(msg: &RollcallMessage) -> Vec<u8> {
    let mut buf = Vec::new();
    match msg {
        RollcallMessage::JoinRequest(m) => encode_join_request(&mut buf, m),
        RollcallMessage::JoinAck(m) => encode_join_ack(&mut buf, m),
        RollcallMessage::QueueUpdate(m) => encode_queue_update(&mut buf, m),
        RollcallMessage::SlotGranted(m) => encode_slot_granted(&mut buf, m),
        RollcallMessage::CodeOffer(m) => encode_code_offer(&mut buf, m),
        RollcallMessage::CodeConfirm(m) => encode_code_confirm(&mut buf, m),
        RollcallMessage::CommitRequest(m) => encode_commit_request(&mut buf, m),
        RollcallMessage::CommitAck(m) => encode_commit_ack(&mut buf, m),
        RollcallMessage::Evicted(m) => encode_evicted(&mut buf, m),
        RollcallMessage::Cancel => {} // empty payload
        RollcallMessage::Error(m) => encode_error(&mut buf, m),
        RollcallMessage::Advertise(m) => encode_advertise(&mut buf, m),
    }
    buf
}

// ── Payload decoding ──────────────────────────────────────────────────────────

fn decode_payload(msg_type: MessageType, payload: &[u8]) -> Result<RollcallMessage, ProtocolError> {
    match msg_type {
        MessageType::JoinRequest => {
            decode_join_request(payload).map(RollcallMessage::JoinRequest)
        }
        MessageType::JoinAck => decode_join_ack(payload).map(RollcallMessage::JoinAck),
        MessageType::QueueUpdate => {
            decode_queue_update(payload).map(RollcallMessage::QueueUpdate)
        }
        MessageType::SlotGranted => {
            decode_slot_granted(payload).map(RollcallMessage::SlotGranted)
        }
        MessageType::CodeOffer => decode_code_offer(payload).map(RollcallMessage::CodeOffer),
        MessageType::CodeConfirm => {
            decode_code_confirm(payload).map(RollcallMessage::CodeConfirm)
        }
        MessageType::CommitRequest => {
            decode_commit_request(payload).map(RollcallMessage::CommitRequest)
        }
        MessageType::CommitAck => decode_commit_ack(payload).map(RollcallMessage::CommitAck),
        MessageType::Evicted => decode_evicted(payload).map(RollcallMessage::Evicted),
        MessageType::Cancel => Ok(RollcallMessage::Cancel),
        MessageType::Error => decode_error(payload).map(RollcallMessage::Error),
        MessageType::Advertise => decode_advertise(payload).map(RollcallMessage::Advertise),
    }
}

// ── Per-message encode helpers ────────────────────────────────────────────────

fn encode_join_request(buf: &mut Vec<u8>, m: &JoinRequestMessage) {
    buf.extend_from_slice(m.participant_id.as_bytes());
    buf.push(m.protocol_version);
    write_length_prefixed_string(buf, &m.display_name);
}

fn encode_join_ack(buf: &mut Vec<u8>, m: &JoinAckMessage) {
    buf.push(m.verdict as u8);
    buf.extend_from_slice(&m.position.to_be_bytes());
    buf.extend_from_slice(&m.estimated_wait_secs.to_be_bytes());
    buf.push(m.reject_reason);
}

fn encode_queue_update(buf: &mut Vec<u8>, m: &QueueUpdateMessage) {
    buf.extend_from_slice(&m.position.to_be_bytes());
    buf.extend_from_slice(&m.estimated_wait_secs.to_be_bytes());
}

fn encode_slot_granted(buf: &mut Vec<u8>, m: &SlotGrantedMessage) {
    buf.extend_from_slice(&m.handshake_window_secs.to_be_bytes());
}

fn encode_code_offer(buf: &mut Vec<u8>, m: &CodeOfferMessage) {
    buf.extend_from_slice(m.session_id.as_bytes());
    buf.extend_from_slice(m.code.as_str().as_bytes());
    buf.extend_from_slice(&m.local_auth_window_secs.to_be_bytes());
}

fn encode_code_confirm(buf: &mut Vec<u8>, m: &CodeConfirmMessage) {
    buf.extend_from_slice(m.session_id.as_bytes());
    buf.push(if m.accepted { 0x01 } else { 0x00 });
}

fn encode_commit_request(buf: &mut Vec<u8>, m: &CommitRequestMessage) {
    buf.extend_from_slice(m.session_id.as_bytes());
    buf.extend_from_slice(m.participant_id.as_bytes());
    write_length_prefixed_string(buf, &m.display_name);
    buf.push(m.channel as u8);
}

fn encode_commit_ack(buf: &mut Vec<u8>, m: &CommitAckMessage) {
    buf.push(m.status as u8);
    buf.extend_from_slice(&m.recorded_at_secs.to_be_bytes());
    buf.push(m.fail_reason);
}

fn encode_evicted(buf: &mut Vec<u8>, m: &EvictedMessage) {
    buf.push(m.reason as u8);
    buf.push(if m.may_retry { 0x01 } else { 0x00 });
}

fn encode_error(buf: &mut Vec<u8>, m: &ErrorMessage) {
    buf.push(m.error_code as u8);
    write_length_prefixed_string(buf, &m.description);
}

fn encode_advertise(buf: &mut Vec<u8>, m: &AdvertiseMessage) {
    buf.extend_from_slice(m.service_id.as_bytes());
    buf.extend_from_slice(m.session_id.as_bytes());
    write_length_prefixed_string(buf, &m.host_name);
    buf.extend_from_slice(&m.session_port.to_be_bytes());
}

// ── Per-message decode helpers ────────────────────────────────────────────────

fn decode_join_request(p: &[u8]) -> Result<JoinRequestMessage, ProtocolError> {
    // 16 (uuid) + 1 (version) + 2 (name_len) + name
    require_len(p, 19, "JoinRequest")?;
    let participant_id = read_uuid(p, 0)?;
    let protocol_version = p[16];
    let (display_name, _) = read_length_prefixed_string(p, 17)?;
    Ok(JoinRequestMessage {
        participant_id,
        protocol_version,
        display_name,
    })
}

fn decode_join_ack(p: &[u8]) -> Result<JoinAckMessage, ProtocolError> {
    // 1 (verdict) + 2 (position) + 4 (wait) + 1 (reason) = 8
    require_len(p, 8, "JoinAck")?;
    let verdict = JoinVerdict::try_from(p[0])
        .map_err(|_| ProtocolError::MalformedPayload(format!("unknown join verdict: {}", p[0])))?;
    let position = u16::from_be_bytes([p[1], p[2]]);
    let estimated_wait_secs = u32::from_be_bytes([p[3], p[4], p[5], p[6]]);
    let reject_reason = p[7];
    Ok(JoinAckMessage {
        verdict,
        position,
        estimated_wait_secs,
        reject_reason,
    })
}

fn decode_queue_update(p: &[u8]) -> Result<QueueUpdateMessage, ProtocolError> {
    // 2 (position) + 4 (wait) = 6
    require_len(p, 6, "QueueUpdate")?;
    let position = u16::from_be_bytes([p[0], p[1]]);
    let estimated_wait_secs = u32::from_be_bytes([p[2], p[3], p[4], p[5]]);
    Ok(QueueUpdateMessage {
        position,
        estimated_wait_secs,
    })
}

fn decode_slot_granted(p: &[u8]) -> Result<SlotGrantedMessage, ProtocolError> {
    require_len(p, 4, "SlotGranted")?;
    let handshake_window_secs = u32::from_be_bytes([p[0], p[1], p[2], p[3]]);
    Ok(SlotGrantedMessage {
        handshake_window_secs,
    })
}

fn decode_code_offer(p: &[u8]) -> Result<CodeOfferMessage, ProtocolError> {
    // 16 (uuid) + CODE_LENGTH (code) + 4 (window)
    require_len(p, 16 + CODE_LENGTH + 4, "CodeOffer")?;
    let session_id = read_uuid(p, 0)?;
    let code = read_code(p, 16)?;
    let off = 16 + CODE_LENGTH;
    let local_auth_window_secs = u32::from_be_bytes([p[off], p[off + 1], p[off + 2], p[off + 3]]);
    Ok(CodeOfferMessage {
        session_id,
        code,
        local_auth_window_secs,
    })
}

fn decode_code_confirm(p: &[u8]) -> Result<CodeConfirmMessage, ProtocolError> {
    require_len(p, 17, "CodeConfirm")?;
    let session_id = read_uuid(p, 0)?;
    let accepted = p[16] != 0;
    Ok(CodeConfirmMessage {
        session_id,
        accepted,
    })
}

fn decode_commit_request(p: &[u8]) -> Result<CommitRequestMessage, ProtocolError> {
    // 16 + 16 (uuids) + 2 (name_len) + name + 1 (channel)
    require_len(p, 35, "CommitRequest")?;
    let session_id = read_uuid(p, 0)?;
    let participant_id = read_uuid(p, 16)?;
    let (display_name, next) = read_length_prefixed_string(p, 32)?;
    require_len(p, next + 1, "CommitRequest.channel")?;
    let channel = CommitChannel::try_from(p[next])
        .map_err(|_| ProtocolError::MalformedPayload(format!("unknown commit channel: {}", p[next])))?;
    Ok(CommitRequestMessage {
        session_id,
        participant_id,
        display_name,
        channel,
    })
}

fn decode_commit_ack(p: &[u8]) -> Result<CommitAckMessage, ProtocolError> {
    // 1 (status) + 8 (recorded_at) + 1 (reason) = 10
    require_len(p, 10, "CommitAck")?;
    let status = CommitStatus::try_from(p[0])
        .map_err(|_| ProtocolError::MalformedPayload(format!("unknown commit status: {}", p[0])))?;
    let recorded_at_secs = read_u64(p, 1)?;
    let fail_reason = p[9];
    Ok(CommitAckMessage {
        status,
        recorded_at_secs,
        fail_reason,
    })
}

fn decode_evicted(p: &[u8]) -> Result<EvictedMessage, ProtocolError> {
    require_len(p, 2, "Evicted")?;
    let reason = EvictReason::try_from(p[0])
        .map_err(|_| ProtocolError::MalformedPayload(format!("unknown evict reason: {}", p[0])))?;
    let may_retry = p[1] != 0;
    Ok(EvictedMessage { reason, may_retry })
}

fn decode_error(p: &[u8]) -> Result<ErrorMessage, ProtocolError> {
    require_len(p, 3, "Error")?;
    let error_code = match p[0] {
        0x01 => ProtocolErrorCode::ProtocolVersionMismatch,
        0x02 => ProtocolErrorCode::NotAdmitted,
        0x03 => ProtocolErrorCode::UnexpectedMessage,
        0x04 => ProtocolErrorCode::InvalidMessage,
        _ => ProtocolErrorCode::InternalError,
    };
    let (description, _) = read_length_prefixed_string(p, 1)?;
    Ok(ErrorMessage {
        error_code,
        description,
    })
}

fn decode_advertise(p: &[u8]) -> Result<AdvertiseMessage, ProtocolError> {
    // 16 + 16 (uuids) + 2 (name_len) + name + 2 (port)
    require_len(p, 36, "Advertise")?;
    let service_id = read_uuid(p, 0)?;
    let session_id = read_uuid(p, 16)?;
    let (host_name, next) = read_length_prefixed_string(p, 32)?;
    require_len(p, next + 2, "Advertise.session_port")?;
    let session_port = u16::from_be_bytes([p[next], p[next + 1]]);
    Ok(AdvertiseMessage {
        service_id,
        session_id,
        host_name,
        session_port,
    })
}

// ── Byte-level helpers ────────────────────────────────────────────────────────

fn require_len(buf: &[u8], needed: usize, context: &str) -> Result<(), ProtocolError> {
    if buf.len() < needed {
        Err(ProtocolError::MalformedPayload(format!(
            "{context}: need {needed} bytes, got {}",
            buf.len()
        )))
    } else {
        Ok(())
    }
}

fn read_u64(buf: &[u8], offset: usize) -> Result<u64, ProtocolError> {
    if buf.len() < offset + 8 {
        return Err(ProtocolError::InsufficientData {
            needed: offset + 8,
            available: buf.len(),
        });
    }
    Ok(u64::from_be_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
        buf[offset + 4],
        buf[offset + 5],
        buf[offset + 6],
        buf[offset + 7],
    ]))
}

fn read_uuid(buf: &[u8], offset: usize) -> Result<Uuid, ProtocolError> {
    if buf.len() < offset + 16 {
        return Err(ProtocolError::MalformedPayload(format!(
            "need 16 bytes for UUID at offset {offset}, got {}",
            buf.len().saturating_sub(offset)
        )));
    }
    let bytes: [u8; 16] = buf[offset..offset + 16]
        .try_into()
        .map_err(|_| ProtocolError::MalformedPayload("UUID slice conversion".to_string()))?;
    Ok(Uuid::from_bytes(bytes))
}

/// Reads exactly [`CODE_LENGTH`] bytes and validates them as a session code.
fn read_code(buf: &[u8], offset: usize) -> Result<SessionCode, ProtocolError> {
    if buf.len() < offset + CODE_LENGTH {
        return Err(ProtocolError::MalformedPayload(format!(
            "need {CODE_LENGTH} bytes for session code at offset {offset}, got {}",
            buf.len().saturating_sub(offset)
        )));
    }
    let raw = std::str::from_utf8(&buf[offset..offset + CODE_LENGTH])
        .map_err(|e| ProtocolError::MalformedPayload(format!("invalid UTF-8 in code: {e}")))?;
    SessionCode::parse(raw)
        .map_err(|e| ProtocolError::MalformedPayload(format!("invalid session code: {e}")))
}

/// Writes a 2-byte length prefix followed by the UTF-8 string bytes.
fn write_length_prefixed_string(buf: &mut Vec<u8>, s: &str) {
    let bytes = s.as_bytes();
    let len = bytes.len().min(u16::MAX as usize) as u16;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(&bytes[..len as usize]);
}

/// Reads a 2-byte length prefix and then that many UTF-8 bytes.
/// Returns the string and the offset of the byte after the string.
fn read_length_prefixed_string(buf: &[u8], offset: usize) -> Result<(String, usize), ProtocolError> {
    if buf.len() < offset + 2 {
        return Err(ProtocolError::MalformedPayload(format!(
            "need 2 bytes for string length at offset {offset}"
        )));
    }
    let len = u16::from_be_bytes([buf[offset], buf[offset + 1]]) as usize;
    let start = offset + 2;
    if buf.len() < start + len {
        return Err(ProtocolError::MalformedPayload(format!(
            "string of length {len} at offset {start} exceeds buffer"
        )));
    }
    let s = std::str::from_utf8(&buf[start..start + len])
        .map_err(|e| ProtocolError::MalformedPayload(format!("invalid UTF-8: {e}")))?
        .to_string();
    Ok((s, start + len))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

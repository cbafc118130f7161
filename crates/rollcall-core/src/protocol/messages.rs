//! All Rollcall protocol message types.
//!
//! One session connection carries the check-in handshake: the peer joins,
//! waits for the host's single transaction slot, receives the current
//! session code, confirms it, and commits attendance. Discovery runs over
//! a separate broadcast datagram ([`AdvertiseMessage`]).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::attendance::CommitChannel;
use crate::domain::session::SessionCode;

// ── Protocol constants ────────────────────────────────────────────────────────

/// Current protocol version byte.
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Total size of the common message header in bytes.
pub const HEADER_SIZE: usize = 24;

/// The one service identifier every Rollcall host advertises.
///
/// Peers filter discovery traffic on this id before anything else; it names
/// the service, never a session, so it is a compile-time constant.
pub const SERVICE_ID: Uuid = Uuid::from_u128(0x8c4f_9d52_6b1e_4a53_9e4d_2f7a_1c0b_3d11);

// ── Message type codes ────────────────────────────────────────────────────────

/// All message type codes defined in the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    // Session channel (0x00–0x3F)
    JoinRequest = 0x01,
    JoinAck = 0x02,
    QueueUpdate = 0x03,
    SlotGranted = 0x04,
    CodeOffer = 0x05,
    CodeConfirm = 0x06,
    CommitRequest = 0x07,
    CommitAck = 0x08,
    Evicted = 0x09,
    Cancel = 0x0A,
    Error = 0x0B,
    // Discovery (0x80–0x8F)
    Advertise = 0x80,
}

impl TryFrom<u8> for MessageType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x01 => Ok(MessageType::JoinRequest),
            0x02 => Ok(MessageType::JoinAck),
            0x03 => Ok(MessageType::QueueUpdate),
            0x04 => Ok(MessageType::SlotGranted),
            0x05 => Ok(MessageType::CodeOffer),
            0x06 => Ok(MessageType::CodeConfirm),
            0x07 => Ok(MessageType::CommitRequest),
            0x08 => Ok(MessageType::CommitAck),
            0x09 => Ok(MessageType::Evicted),
            0x0A => Ok(MessageType::Cancel),
            0x0B => Ok(MessageType::Error),
            0x80 => Ok(MessageType::Advertise),
            _ => Err(()),
        }
    }
}

// ── Common message header ─────────────────────────────────────────────────────

/// 24-byte header prepended to every message on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeader {
    /// Protocol version; always [`PROTOCOL_VERSION`].
    pub version: u8,
    /// Identifies the payload type.
    pub message_type: MessageType,
    /// Length of the payload in bytes (not including this header).
    pub payload_length: u32,
    /// Monotonically increasing per-connection counter.
    pub sequence_number: u64,
    /// Microseconds since Unix epoch at time of generation.
    pub timestamp_us: u64,
}

// ── Per-message payload structs ───────────────────────────────────────────────

/// JOIN_REQUEST (0x01): sent by a peer to ask for admission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRequestMessage {
    /// UUID v4 uniquely identifying the participant's device.
    pub participant_id: Uuid,
    /// Protocol version the peer speaks.
    pub protocol_version: u8,
    /// Name the participant wants on the attendance record.
    pub display_name: String,
}

/// Host's answer to a join, carried in [`JoinAckMessage::verdict`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum JoinVerdict {
    /// The slot was free; the handshake continues immediately.
    Admitted = 0x01,
    /// Queued behind earlier peers; a SLOT_GRANTED follows later.
    Queued = 0x02,
    /// Not accepted; see the reject reason.
    Rejected = 0x03,
}

impl TryFrom<u8> for JoinVerdict {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(JoinVerdict::Admitted),
            0x02 => Ok(JoinVerdict::Queued),
            0x03 => Ok(JoinVerdict::Rejected),
            _ => Err(()),
        }
    }
}

/// Reject reason codes used in [`JoinAckMessage::reject_reason`].
pub mod reject_reasons {
    /// Not rejected.
    pub const NONE: u8 = 0x00;
    /// The admission queue is at its depth limit.
    pub const QUEUE_FULL: u8 = 0x01;
    /// The session is no longer Active.
    pub const SESSION_ENDED: u8 = 0x02;
    /// The host could not service the request.
    pub const INTERNAL_ERROR: u8 = 0x03;
}

/// JOIN_ACK (0x02): host response to a JOIN_REQUEST.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinAckMessage {
    /// Admitted, queued, or rejected.
    pub verdict: JoinVerdict,
    /// Queue position when queued; for a queue-full rejection, the position
    /// the request would have held. 0 when admitted.
    pub position: u16,
    /// `position × average service time`, in whole seconds. Derived,
    /// display-only.
    pub estimated_wait_secs: u32,
    /// One of [`reject_reasons`] ([`reject_reasons::NONE`] unless rejected).
    pub reject_reason: u8,
}

/// QUEUE_UPDATE (0x03): pushed to waiting peers when the queue moves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueUpdateMessage {
    /// New 1-based position in the queue.
    pub position: u16,
    /// Updated wait estimate in whole seconds.
    pub estimated_wait_secs: u32,
}

/// SLOT_GRANTED (0x04): a queued peer now owns the transaction slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotGrantedMessage {
    /// Seconds the peer has to finish the whole handshake before eviction.
    pub handshake_window_secs: u32,
}

/// CODE_OFFER (0x05): host transmits the authoritative session code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeOfferMessage {
    /// Session the code belongs to.
    pub session_id: Uuid,
    /// The current rotating code.
    pub code: SessionCode,
    /// Seconds the peer has to complete local auth and commit.
    pub local_auth_window_secs: u32,
}

/// CODE_CONFIRM (0x06): peer accepts or disputes the offered code.
///
/// A peer that already holds a manually entered code compares it against
/// the offer and sets `accepted = false` on mismatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeConfirmMessage {
    /// Session being confirmed.
    pub session_id: Uuid,
    /// Whether the peer accepts the offered code.
    pub accepted: bool,
}

/// COMMIT_REQUEST (0x07): peer asks the host to record attendance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRequestMessage {
    /// Session being committed to.
    pub session_id: Uuid,
    /// The committing participant.
    pub participant_id: Uuid,
    /// Name for the attendance record.
    pub display_name: String,
    /// Which path carried this commit.
    pub channel: CommitChannel,
}

/// Outcome carried in [`CommitAckMessage::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum CommitStatus {
    /// A new record was created.
    Recorded = 0x01,
    /// A record for this (session, participant) already existed; the
    /// request was a retry and succeeds idempotently.
    AlreadyRecorded = 0x02,
    /// The commit failed; see the fail reason.
    Failed = 0x03,
}

impl TryFrom<u8> for CommitStatus {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(CommitStatus::Recorded),
            0x02 => Ok(CommitStatus::AlreadyRecorded),
            0x03 => Ok(CommitStatus::Failed),
            _ => Err(()),
        }
    }
}

/// Failure codes used in [`CommitAckMessage::fail_reason`].
pub mod commit_fail_reasons {
    /// Not failed.
    pub const NONE: u8 = 0x00;
    /// The durable write failed; the host keeps the in-memory entry.
    pub const PERSISTENCE: u8 = 0x01;
    /// The session ended before the commit was applied.
    pub const SESSION_ENDED: u8 = 0x02;
    /// The sender does not hold the transaction slot.
    pub const NOT_ADMITTED: u8 = 0x03;
}

/// COMMIT_ACK (0x08): host acknowledges a COMMIT_REQUEST.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitAckMessage {
    /// Recorded, already recorded, or failed.
    pub status: CommitStatus,
    /// Commit timestamp of the (new or existing) record; 0 on failure.
    pub recorded_at_secs: u64,
    /// One of [`commit_fail_reasons`].
    pub fail_reason: u8,
}

/// Why a peer was evicted, carried in [`EvictedMessage::reason`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum EvictReason {
    /// The overall handshake window lapsed.
    HandshakeTimeout = 0x01,
    /// The local-auth window lapsed while the peer held the slot.
    LocalAuthTimeout = 0x02,
    /// The host ended the session.
    SessionEnded = 0x03,
    /// The peer disputed the code, or presented a stale one.
    CodeMismatch = 0x04,
    /// The peer asked to cancel.
    Cancelled = 0x05,
}

impl TryFrom<u8> for EvictReason {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(EvictReason::HandshakeTimeout),
            0x02 => Ok(EvictReason::LocalAuthTimeout),
            0x03 => Ok(EvictReason::SessionEnded),
            0x04 => Ok(EvictReason::CodeMismatch),
            0x05 => Ok(EvictReason::Cancelled),
            _ => Err(()),
        }
    }
}

/// EVICTED (0x09): host removes a peer from the slot or queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvictedMessage {
    /// Why the peer lost its place.
    pub reason: EvictReason,
    /// Whether re-enqueueing is worthwhile (false once the session ended).
    pub may_retry: bool,
}

/// Protocol-level error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ProtocolErrorCode {
    ProtocolVersionMismatch = 0x01,
    NotAdmitted = 0x02,
    UnexpectedMessage = 0x03,
    InvalidMessage = 0x04,
    InternalError = 0x05,
}

/// ERROR (0x0B): error notification from either side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Protocol error code.
    pub error_code: ProtocolErrorCode,
    /// Human-readable description (for logging only, never end-user display).
    pub description: String,
}

/// ADVERTISE (0x80): host broadcasts session presence for discovery.
///
/// Deliberately carries no session code; the code only ever travels over
/// an admitted session connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvertiseMessage {
    /// Always [`SERVICE_ID`]; peers drop datagrams with any other value.
    pub service_id: Uuid,
    /// Id of the Active session behind this advert.
    pub session_id: Uuid,
    /// Human-readable host name for pick lists.
    pub host_name: String,
    /// TCP port the host's session service listens on.
    pub session_port: u16,
}

// ── Top-level message enum ────────────────────────────────────────────────────

/// All valid Rollcall messages, discriminated by type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RollcallMessage {
    JoinRequest(JoinRequestMessage),
    JoinAck(JoinAckMessage),
    QueueUpdate(QueueUpdateMessage),
    SlotGranted(SlotGrantedMessage),
    CodeOffer(CodeOfferMessage),
    CodeConfirm(CodeConfirmMessage),
    CommitRequest(CommitRequestMessage),
    CommitAck(CommitAckMessage),
    Evicted(EvictedMessage),
    Cancel,
    Error(ErrorMessage),
    Advertise(AdvertiseMessage),
}

impl RollcallMessage {
    /// Returns the [`MessageType`] discriminant for this message.
    pub fn message_type(&self) -> MessageType {
        match self {
            RollcallMessage::JoinRequest(_) => MessageType::JoinRequest,
            RollcallMessage::JoinAck(_) => MessageType::JoinAck,
            RollcallMessage::QueueUpdate(_) => MessageType::QueueUpdate,
            RollcallMessage::SlotGranted(_) => MessageType::SlotGranted,
            RollcallMessage::CodeOffer(_) => MessageType::CodeOffer,
            RollcallMessage::CodeConfirm(_) => MessageType::CodeConfirm,
            RollcallMessage::CommitRequest(_) => MessageType::CommitRequest,
            RollcallMessage::CommitAck(_) => MessageType::CommitAck,
            RollcallMessage::Evicted(_) => MessageType::Evicted,
            RollcallMessage::Cancel => MessageType::Cancel,
            RollcallMessage::Error(_) => MessageType::Error,
            RollcallMessage::Advertise(_) => MessageType::Advertise,
        }
    }
}

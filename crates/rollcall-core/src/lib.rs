//! # rollcall-core
//!
//! Shared library for Rollcall containing the wire protocol codec and the
//! domain entities of the attendance handshake.
//!
//! This crate is used by both the host and peer applications. It has zero
//! dependencies on OS APIs, UI frameworks, or network sockets.
//!
//! # Architecture overview (for beginners)
//!
//! Rollcall is a proximity-attendance system: a presenter device (the
//! "host") advertises a short-lived session code over the local network,
//! and participant devices ("peers") discover it, connect, prove they are
//! addressing the right host by exchanging the code, confirm the user's
//! identity locally, and commit one attendance record. The host services
//! one peer at a time through a FIFO admission queue.
//!
//! This crate (`rollcall-core`) is the shared foundation. It defines:
//!
//! - **`protocol`** – How bytes travel over the network. Messages are
//!   encoded into a compact binary format (24-byte header + payload) and
//!   decoded back into typed Rust structs on the other end.
//!
//! - **`domain`** – Pure business logic with no I/O. The most important
//!   pieces are the `SessionCode` (the rotating proof-of-proximity token),
//!   the `HandshakePhase` state machine shared by both roles, and the
//!   `AttendanceRecord` committed exactly once per participant.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `rollcall_core::SessionCode` instead of the full module path.
pub use domain::attendance::{AttendanceRecord, CommitChannel, CommitOutcome};
pub use domain::handshake::{
    BackoffPolicy, FailureReason, HandshakeContext, HandshakePhase, HandshakeRole,
    TransitionError,
};
pub use domain::session::{
    CodeParseError, ParticipantId, Session, SessionCode, SessionId, SessionStatus, CODE_LENGTH,
};
pub use protocol::codec::{decode_message, encode_message, encode_message_now, ProtocolError};
pub use protocol::messages::{RollcallMessage, SERVICE_ID};
pub use protocol::sequence::SequenceCounter;

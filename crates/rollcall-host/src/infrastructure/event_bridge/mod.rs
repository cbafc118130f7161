//! Event bridge: serialises session events for external consumers.
//!
//! The host binary is headless; its outward surface is a stream of JSON
//! event lines (consumed by dashboards, log shippers, or a wrapping UI) and
//! JSON responses to console commands.  This module owns both shapes.
//!
//! # Data Transfer Objects (DTOs)
//!
//! The application layer uses internal types (`Uuid`, `QueueTicket`,
//! `FinalizationReport`) that are either not JSON-friendly or carry more
//! than a consumer should see.  DTOs are flat structs/enums that:
//!
//! - Contain only JSON-serialisable fields (`String`, `u16`, `usize`, ...)
//! - Are versioned by shape: anything consuming the stream can match on the
//!   `type` tag without knowing Rust types.
//!
//! # `CommandResult<T>` wrapper
//!
//! Console commands (manual check-in) answer with `CommandResult<T>` rather
//! than `Result<T, E>` so every response has the same shape:
//! `{ success: bool, data: T | null, error: string | null }`.

use rollcall_core::CommitOutcome;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::application::session::SessionEvent;

// ── Data Transfer Objects ─────────────────────────────────────────────────────

/// JSON shape of one session event.
///
/// The `type` tag discriminates variants, e.g.
/// `{"type":"participant_joined","participant_id":"...","display_name":"Ada",...}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEventDto {
    SessionStarted {
        session_id: String,
        code: String,
        context_ref: String,
    },
    SessionEnded {
        session_id: String,
        committed: usize,
        unflushed: usize,
    },
    ParticipantJoined {
        session_id: String,
        participant_id: String,
        display_name: String,
        channel: String,
    },
    QueuePositionChanged {
        participant_id: String,
        position: u16,
        estimated_wait_secs: u32,
    },
    HandshakeFailed {
        participant_id: String,
        reason: String,
    },
    CodeRotated {
        session_id: String,
        code: String,
    },
}

impl From<&SessionEvent> for SessionEventDto {
    fn from(event: &SessionEvent) -> Self {
        match event {
            SessionEvent::SessionStarted { session } => SessionEventDto::SessionStarted {
                session_id: session.id.to_string(),
                code: session.code.as_str().to_string(),
                context_ref: session.context_ref.clone(),
            },
            SessionEvent::SessionEnded { session_id, report } => SessionEventDto::SessionEnded {
                session_id: session_id.to_string(),
                committed: report.committed,
                unflushed: report.unflushed,
            },
            SessionEvent::ParticipantJoined {
                session_id,
                participant_id,
                display_name,
                channel,
            } => SessionEventDto::ParticipantJoined {
                session_id: session_id.to_string(),
                participant_id: participant_id.to_string(),
                display_name: display_name.clone(),
                channel: format!("{channel:?}"),
            },
            SessionEvent::QueuePositionChanged {
                participant_id,
                position,
                estimated_wait_secs,
                ..
            } => SessionEventDto::QueuePositionChanged {
                participant_id: participant_id.to_string(),
                position: *position,
                estimated_wait_secs: *estimated_wait_secs,
            },
            SessionEvent::HandshakeFailed {
                participant_id,
                reason,
            } => SessionEventDto::HandshakeFailed {
                participant_id: participant_id.to_string(),
                reason: format!("{reason:?}"),
            },
            SessionEvent::CodeRotated { session_id, code } => SessionEventDto::CodeRotated {
                session_id: session_id.to_string(),
                code: code.as_str().to_string(),
            },
        }
    }
}

/// JSON shape of a manual check-in result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckInResultDto {
    pub session_id: String,
    pub participant_id: String,
    pub display_name: String,
    /// `"recorded"` on first commit, `"already_recorded"` on a repeat.
    pub status: String,
    pub recorded_at_secs: u64,
}

impl From<&CommitOutcome> for CheckInResultDto {
    fn from(outcome: &CommitOutcome) -> Self {
        let record = outcome.record();
        Self {
            session_id: record.session_id.to_string(),
            participant_id: record.participant_id.to_string(),
            display_name: record.display_name.clone(),
            status: if outcome.was_new() {
                "recorded".to_string()
            } else {
                "already_recorded".to_string()
            },
            recorded_at_secs: record.committed_at_secs,
        }
    }
}

/// Unified response wrapper for console commands.
#[derive(Debug, Serialize, Deserialize)]
pub struct CommandResult<T: Serialize> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> CommandResult<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

// ── Event pump ────────────────────────────────────────────────────────────────

/// Spawns a task that drains `events` and logs each one as a JSON line under
/// the `rollcall::events` target.  The task ends when the session actor and
/// every other sender are gone.
pub fn spawn_event_logger(mut events: mpsc::Receiver<SessionEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let dto = SessionEventDto::from(&event);
            match serde_json::to_string(&dto) {
                Ok(json) => info!(target: "rollcall::events", "{json}"),
                Err(e) => warn!("failed to serialize session event: {e}"),
            }
        }
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

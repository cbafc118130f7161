//! The check-in handshake state machine.
//!
//! One `HandshakeContext` exists per connection attempt. The same phase
//! type drives both sides of the wire: the peer walks every phase starting
//! at `Discovering`, the host mirrors the attempt starting at `Connecting`
//! (a host context is only created once a connection exists). Keeping a
//! single tagged type for both roles keeps the transition rules in one
//! place and lets either side be tested against a fake link.
//!
//! Phase order:
//!
//! ```text
//! Discovering -> Connecting -> CodeExchange -> LocalAuth -> Committing -> Done
//!      \______________\_____________\______________\____________\______ Failed(reason)
//! ```
//!
//! `Done` and `Failed` are terminal. A context that reaches a terminal
//! phase is discarded together with its queue ticket.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ── Phases ────────────────────────────────────────────────────────────────────

/// Why a handshake attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    /// Link-level failure: connect, read, or write error.
    Transport,
    /// The presented code did not match the session's current code, or the
    /// owning session has Ended.
    InvalidCode,
    /// A phase deadline lapsed (handshake window or local-auth window).
    TimedOut,
    /// The participant failed or dismissed the local identity check.
    AuthRejected,
    /// The host ended the session while the attempt was in flight.
    SessionEnded,
    /// The attendance record could not be durably written.
    Persistence,
    /// The user aborted the attempt.
    Cancelled,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureReason::Transport => "transport error",
            FailureReason::InvalidCode => "invalid code",
            FailureReason::TimedOut => "timed out",
            FailureReason::AuthRejected => "local auth rejected",
            FailureReason::SessionEnded => "session ended",
            FailureReason::Persistence => "persistence failure",
            FailureReason::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Which side of the wire a context is driving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeRole {
    Host,
    Peer,
}

/// The phases of one check-in attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandshakePhase {
    /// Peer only: scanning for host advertisements.
    Discovering,
    /// Link being established; on the host side, waiting for admission.
    Connecting,
    /// The authoritative session code travels host -> peer and is checked.
    CodeExchange,
    /// The participant confirms their identity on their own device.
    LocalAuth,
    /// The attendance record is being written through the ledger.
    Committing,
    /// Attendance recorded and acknowledged.
    Done,
    /// Attempt over without a commit; the reason says why.
    Failed(FailureReason),
}

impl HandshakePhase {
    /// Returns `true` for `Done` and `Failed`, which no transition leaves.
    pub fn is_terminal(&self) -> bool {
        matches!(self, HandshakePhase::Done | HandshakePhase::Failed(_))
    }
}

impl fmt::Display for HandshakePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakePhase::Discovering => f.write_str("Discovering"),
            HandshakePhase::Connecting => f.write_str("Connecting"),
            HandshakePhase::CodeExchange => f.write_str("CodeExchange"),
            HandshakePhase::LocalAuth => f.write_str("LocalAuth"),
            HandshakePhase::Committing => f.write_str("Committing"),
            HandshakePhase::Done => f.write_str("Done"),
            HandshakePhase::Failed(reason) => write!(f, "Failed({reason})"),
        }
    }
}

/// Raised when a caller asks for a transition the phase graph forbids.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("illegal handshake transition: {from} -> {to}")]
pub struct TransitionError {
    pub from: HandshakePhase,
    pub to: HandshakePhase,
}

// ── Per-attempt context ───────────────────────────────────────────────────────

/// Mutable state of one handshake attempt.
///
/// Owned by whichever component drives the attempt (the host's session
/// actor or the peer's check-in flow) and dropped once terminal.
#[derive(Debug, Clone)]
pub struct HandshakeContext {
    role: HandshakeRole,
    phase: HandshakePhase,
    retries: u8,
    reached_commit: bool,
    last_error: Option<FailureReason>,
}

impl HandshakeContext {
    /// A peer-side attempt, starting at `Discovering`.
    pub fn peer() -> Self {
        Self::new(HandshakeRole::Peer, HandshakePhase::Discovering)
    }

    /// A host-side mirror of an attempt, starting at `Connecting`.
    pub fn host() -> Self {
        Self::new(HandshakeRole::Host, HandshakePhase::Connecting)
    }

    fn new(role: HandshakeRole, phase: HandshakePhase) -> Self {
        HandshakeContext {
            role,
            phase,
            retries: 0,
            reached_commit: false,
            last_error: None,
        }
    }

    pub fn role(&self) -> HandshakeRole {
        self.role
    }

    pub fn phase(&self) -> HandshakePhase {
        self.phase
    }

    pub fn retries(&self) -> u8 {
        self.retries
    }

    pub fn last_error(&self) -> Option<FailureReason> {
        self.last_error
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Whether this attempt ever entered `Committing`.
    ///
    /// Errors strictly before the commit phase may re-enter discovery and
    /// queueing; errors at or after it end the attempt.
    pub fn has_reached_commit(&self) -> bool {
        self.reached_commit
    }

    /// Moves to `to` if the phase graph allows it.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] when `to` is not reachable from the
    /// current phase; the context is left unchanged.
    pub fn advance(&mut self, to: HandshakePhase) -> Result<(), TransitionError> {
        if !Self::may_transition(self.phase, to) {
            return Err(TransitionError {
                from: self.phase,
                to,
            });
        }
        if to == HandshakePhase::Committing {
            self.reached_commit = true;
        }
        if let HandshakePhase::Failed(reason) = to {
            self.last_error = Some(reason);
        }
        self.phase = to;
        Ok(())
    }

    /// Fails the attempt with `reason`, recording it as the last error.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] if the attempt is already terminal.
    pub fn fail(&mut self, reason: FailureReason) -> Result<(), TransitionError> {
        self.advance(HandshakePhase::Failed(reason))
    }

    /// Counts one retry of the current phase and returns the new total.
    pub fn record_retry(&mut self) -> u8 {
        self.retries = self.retries.saturating_add(1);
        self.retries
    }

    fn may_transition(from: HandshakePhase, to: HandshakePhase) -> bool {
        use HandshakePhase::*;
        match (from, to) {
            // Any live phase may fail.
            (f, Failed(_)) if !f.is_terminal() => true,
            (Discovering, Connecting) => true,
            (Connecting, CodeExchange) => true,
            (CodeExchange, LocalAuth) => true,
            (LocalAuth, Committing) => true,
            (Committing, Done) => true,
            _ => false,
        }
    }
}

// ── Backoff ───────────────────────────────────────────────────────────────────

/// Bounded exponential backoff for transport retries.
///
/// `delay_before(n)` yields the pause before try `n + 1`, doubling each
/// time; once `n` reaches the attempt cap it yields `None` and the caller
/// surfaces `Failed(Transport)`.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    /// Pause before the first retry.
    pub base: Duration,
    /// Total attempts allowed (first try included).
    pub attempt_cap: u8,
}

impl BackoffPolicy {
    pub fn new(base: Duration, attempt_cap: u8) -> Self {
        BackoffPolicy { base, attempt_cap }
    }

    /// Delay to wait after `attempts_made` tries have failed, or `None`
    /// when the cap is exhausted.
    pub fn delay_before(&self, attempts_made: u8) -> Option<Duration> {
        if attempts_made == 0 || attempts_made >= self.attempt_cap {
            return None;
        }
        let exponent = u32::from(attempts_made - 1);
        Some(self.base.saturating_mul(2u32.saturating_pow(exponent)))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy {
            base: Duration::from_millis(250),
            attempt_cap: 3,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_walks_full_happy_path() {
        let mut ctx = HandshakeContext::peer();
        assert_eq!(ctx.phase(), HandshakePhase::Discovering);

        ctx.advance(HandshakePhase::Connecting).unwrap();
        ctx.advance(HandshakePhase::CodeExchange).unwrap();
        ctx.advance(HandshakePhase::LocalAuth).unwrap();
        ctx.advance(HandshakePhase::Committing).unwrap();
        ctx.advance(HandshakePhase::Done).unwrap();

        assert!(ctx.is_terminal());
        assert!(ctx.has_reached_commit());
        assert_eq!(ctx.last_error(), None);
    }

    #[test]
    fn test_host_starts_at_connecting() {
        let ctx = HandshakeContext::host();
        assert_eq!(ctx.role(), HandshakeRole::Host);
        assert_eq!(ctx.phase(), HandshakePhase::Connecting);
    }

    #[test]
    fn test_phases_cannot_be_skipped() {
        let mut ctx = HandshakeContext::peer();
        let err = ctx.advance(HandshakePhase::CodeExchange).unwrap_err();
        assert_eq!(err.from, HandshakePhase::Discovering);
        assert_eq!(err.to, HandshakePhase::CodeExchange);
        // The context is unchanged after a rejected transition.
        assert_eq!(ctx.phase(), HandshakePhase::Discovering);
    }

    #[test]
    fn test_any_live_phase_may_fail() {
        let path = [
            HandshakePhase::Connecting,
            HandshakePhase::CodeExchange,
            HandshakePhase::LocalAuth,
            HandshakePhase::Committing,
        ];
        // Walk 0..=4 steps along the happy path, failing from each phase.
        for steps in 0..=path.len() {
            let mut ctx = HandshakeContext::peer();
            for next in &path[..steps] {
                ctx.advance(*next).unwrap();
            }
            ctx.fail(FailureReason::Transport).unwrap();
            assert_eq!(
                ctx.phase(),
                HandshakePhase::Failed(FailureReason::Transport)
            );
            assert_eq!(ctx.last_error(), Some(FailureReason::Transport));
        }
    }

    #[test]
    fn test_terminal_phases_reject_everything() {
        let mut done = HandshakeContext::peer();
        for next in [
            HandshakePhase::Connecting,
            HandshakePhase::CodeExchange,
            HandshakePhase::LocalAuth,
            HandshakePhase::Committing,
            HandshakePhase::Done,
        ] {
            done.advance(next).unwrap();
        }
        assert!(done.fail(FailureReason::Cancelled).is_err());

        let mut failed = HandshakeContext::peer();
        failed.fail(FailureReason::TimedOut).unwrap();
        assert!(failed.advance(HandshakePhase::Connecting).is_err());
        assert!(failed.fail(FailureReason::Transport).is_err());
    }

    #[test]
    fn test_commit_marker_set_on_entering_committing() {
        let mut ctx = HandshakeContext::peer();
        ctx.advance(HandshakePhase::Connecting).unwrap();
        ctx.advance(HandshakePhase::CodeExchange).unwrap();
        assert!(!ctx.has_reached_commit());
        ctx.advance(HandshakePhase::LocalAuth).unwrap();
        ctx.advance(HandshakePhase::Committing).unwrap();
        assert!(ctx.has_reached_commit());
        // The marker survives a failure in the commit phase.
        ctx.fail(FailureReason::Persistence).unwrap();
        assert!(ctx.has_reached_commit());
    }

    #[test]
    fn test_retry_counter() {
        let mut ctx = HandshakeContext::peer();
        assert_eq!(ctx.retries(), 0);
        assert_eq!(ctx.record_retry(), 1);
        assert_eq!(ctx.record_retry(), 2);
    }

    #[test]
    fn test_backoff_doubles_until_cap() {
        let policy = BackoffPolicy::new(Duration::from_millis(250), 3);

        // No delay "before try one" – the first attempt happens immediately.
        assert_eq!(policy.delay_before(0), None);
        assert_eq!(policy.delay_before(1), Some(Duration::from_millis(250)));
        assert_eq!(policy.delay_before(2), Some(Duration::from_millis(500)));
        // Cap reached: three attempts have been made, no more retries.
        assert_eq!(policy.delay_before(3), None);
    }

    #[test]
    fn test_backoff_default_caps_at_three_attempts() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.attempt_cap, 3);
        assert!(policy.delay_before(1).is_some());
        assert!(policy.delay_before(policy.attempt_cap).is_none());
    }
}

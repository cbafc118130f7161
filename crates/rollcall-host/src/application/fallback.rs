//! Manual fallback check-in.
//!
//! When a participant's device cannot complete the wireless handshake (no
//! radio, dead battery, flaky link), the host operator types the session
//! code and the participant's name instead.  The fallback walks the same
//! phases a wireless attempt walks, from code exchange through commit,
//! and lands in the same [`AttendanceLedger`], so a manual record is
//! structurally identical to a wireless one apart from its channel tag and
//! gets the same exactly-once guarantee.
//!
//! The fallback deliberately bypasses the admission queue: it holds no
//! transport connection and no handshake slot, so there is nothing to
//! serialise against.  Idempotency still holds because the ledger, not the
//! slot, is what enforces it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rollcall_core::{
    CodeParseError, CommitChannel, CommitOutcome, FailureReason, HandshakeContext,
    HandshakePhase, ParticipantId, SessionCode, TransitionError,
};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{info, warn};

use super::ledger::{AttendanceLedger, CommitError, StoreError};
use super::session::{now_secs, SessionEvent};

// ─────────────────────────────────────────────────────────────────────────────
// Local auth seam
// ─────────────────────────────────────────────────────────────────────────────

/// Outcome of the local identity check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthResult {
    Confirmed,
    Denied,
}

/// Trait for confirming the participant's identity during a manual
/// check-in (typically the host operator confirming face to face).
///
/// Test implementations script the outcome and its latency.
#[async_trait]
pub trait LocalAuthenticator: Send + Sync {
    async fn authenticate(&self) -> AuthResult;
}

// ─────────────────────────────────────────────────────────────────────────────
// Fallback channel
// ─────────────────────────────────────────────────────────────────────────────

/// Tunables for the manual path.
#[derive(Debug, Clone)]
pub struct FallbackConfig {
    /// Window for the identity confirmation, mirroring the wireless
    /// local-auth window.
    pub local_auth_window: Duration,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            local_auth_window: Duration::from_secs(20),
        }
    }
}

/// Error type for manual check-ins.
#[derive(Debug, Error)]
pub enum FallbackError {
    /// The typed code is not a well-formed session code.
    #[error("malformed code: {0}")]
    BadFormat(#[from] CodeParseError),
    /// No Active session currently carries the typed code.  Rotated-away
    /// and ended codes land here too.
    #[error("no active session accepts that code")]
    UnknownCode,
    /// The identity check was refused.
    #[error("local authentication rejected")]
    AuthRejected,
    /// The identity check did not finish inside the window.
    #[error("local authentication timed out")]
    AuthTimedOut,
    /// The session lookup failed at the store.
    #[error("session lookup failed: {0}")]
    Store(#[from] StoreError),
    /// The ledger accepted the record but could not write it durably.
    #[error(transparent)]
    Commit(#[from] CommitError),
    /// A phase transition the walk relies on was rejected.
    #[error("internal state error: {0}")]
    State(#[from] TransitionError),
}

/// The manual check-in channel.  Shares the ledger and the event stream
/// with the running session.
pub struct FallbackChannel {
    ledger: Arc<AttendanceLedger>,
    authenticator: Arc<dyn LocalAuthenticator>,
    events: mpsc::Sender<SessionEvent>,
    config: FallbackConfig,
}

impl FallbackChannel {
    pub fn new(
        ledger: Arc<AttendanceLedger>,
        authenticator: Arc<dyn LocalAuthenticator>,
        events: mpsc::Sender<SessionEvent>,
        config: FallbackConfig,
    ) -> Self {
        Self {
            ledger,
            authenticator,
            events,
            config,
        }
    }

    /// Checks a participant in by typed code.
    ///
    /// Validates the code format, resolves it to the Active session,
    /// confirms identity inside the local-auth window, then commits on the
    /// manual channel.  Duplicate check-ins (on either channel) return
    /// [`CommitOutcome::AlreadyRecorded`].
    ///
    /// # Errors
    ///
    /// See [`FallbackError`].  On [`FallbackError::Commit`] the record is
    /// resident in memory and still counts; the ledger retries the durable
    /// write at finalization.
    pub async fn check_in(
        &self,
        raw_code: &str,
        participant_id: ParticipantId,
        display_name: &str,
    ) -> Result<CommitOutcome, FallbackError> {
        let code = SessionCode::parse(raw_code)?;

        let mut context = HandshakeContext::host();
        context.advance(HandshakePhase::CodeExchange)?;

        let session = match self.ledger.store().find_active_session(&code).await? {
            Some(session) => session,
            None => {
                let _ = context.fail(FailureReason::InvalidCode);
                self.emit(SessionEvent::HandshakeFailed {
                    participant_id,
                    reason: FailureReason::InvalidCode,
                })
                .await;
                return Err(FallbackError::UnknownCode);
            }
        };

        context.advance(HandshakePhase::LocalAuth)?;
        match timeout(self.config.local_auth_window, self.authenticator.authenticate()).await {
            Ok(AuthResult::Confirmed) => {}
            Ok(AuthResult::Denied) => {
                let _ = context.fail(FailureReason::AuthRejected);
                self.emit(SessionEvent::HandshakeFailed {
                    participant_id,
                    reason: FailureReason::AuthRejected,
                })
                .await;
                return Err(FallbackError::AuthRejected);
            }
            Err(_) => {
                let _ = context.fail(FailureReason::TimedOut);
                self.emit(SessionEvent::HandshakeFailed {
                    participant_id,
                    reason: FailureReason::TimedOut,
                })
                .await;
                return Err(FallbackError::AuthTimedOut);
            }
        }

        context.advance(HandshakePhase::Committing)?;
        match self
            .ledger
            .commit(
                session.id,
                participant_id,
                display_name,
                CommitChannel::Manual,
                now_secs(),
            )
            .await
        {
            Ok(outcome) => {
                context.advance(HandshakePhase::Done)?;
                if outcome.was_new() {
                    info!(
                        participant = %participant_id,
                        name = %display_name,
                        "attendance recorded manually"
                    );
                    self.emit(SessionEvent::ParticipantJoined {
                        session_id: session.id,
                        participant_id,
                        display_name: display_name.to_string(),
                        channel: CommitChannel::Manual,
                    })
                    .await;
                }
                Ok(outcome)
            }
            Err(error) => {
                let _ = context.fail(FailureReason::Persistence);
                let CommitError::Persistence { record, source } = &error;
                warn!(
                    participant = %record.participant_id,
                    error = %source,
                    "manual attendance held in memory only, durable write failed"
                );
                // The resident entry still counts, exactly as on the
                // wireless path.
                self.emit(SessionEvent::ParticipantJoined {
                    session_id: session.id,
                    participant_id,
                    display_name: display_name.to_string(),
                    channel: CommitChannel::Manual,
                })
                .await;
                self.emit(SessionEvent::HandshakeFailed {
                    participant_id,
                    reason: FailureReason::Persistence,
                })
                .await;
                Err(error.into())
            }
        }
    }

    async fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event).await;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ledger::AttendanceStore;
    use rollcall_core::{AttendanceRecord, Session};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use uuid::Uuid;

    // ── Test doubles ──────────────────────────────────────────────────────────

    /// Store that knows exactly one active session.
    struct SingleSessionStore {
        session: Session,
        find_calls: AtomicUsize,
        fail_upserts: AtomicBool,
    }

    impl SingleSessionStore {
        fn new(session: Session) -> Self {
            Self {
                session,
                find_calls: AtomicUsize::new(0),
                fail_upserts: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl AttendanceStore for SingleSessionStore {
        async fn upsert_attendance(&self, _record: &AttendanceRecord) -> Result<(), StoreError> {
            if self.fail_upserts.load(Ordering::SeqCst) {
                return Err(StoreError::Io("injected failure".to_string()));
            }
            Ok(())
        }

        async fn find_active_session(
            &self,
            code: &SessionCode,
        ) -> Result<Option<Session>, StoreError> {
            self.find_calls.fetch_add(1, Ordering::SeqCst);
            if self.session.is_active() && self.session.code == *code {
                Ok(Some(self.session.clone()))
            } else {
                Ok(None)
            }
        }

        async fn save_session(&self, _session: &Session) -> Result<(), StoreError> {
            Ok(())
        }
    }

    struct ScriptedAuthenticator {
        result: AuthResult,
        delay: Duration,
    }

    impl ScriptedAuthenticator {
        fn approving() -> Self {
            Self {
                result: AuthResult::Confirmed,
                delay: Duration::ZERO,
            }
        }

        fn denying() -> Self {
            Self {
                result: AuthResult::Denied,
                delay: Duration::ZERO,
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                result: AuthResult::Confirmed,
                delay,
            }
        }
    }

    #[async_trait]
    impl LocalAuthenticator for ScriptedAuthenticator {
        async fn authenticate(&self) -> AuthResult {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.result
        }
    }

    struct Harness {
        fallback: FallbackChannel,
        ledger: Arc<AttendanceLedger>,
        store: Arc<SingleSessionStore>,
        events: mpsc::Receiver<SessionEvent>,
        session: Session,
    }

    fn harness(authenticator: ScriptedAuthenticator) -> Harness {
        let session = Session::new(SessionCode::parse("AB12CD").unwrap(), "course-101", 1_000);
        let store = Arc::new(SingleSessionStore::new(session.clone()));
        let ledger = Arc::new(AttendanceLedger::new(
            Arc::clone(&store) as Arc<dyn AttendanceStore>
        ));
        let (event_tx, event_rx) = mpsc::channel(16);
        let fallback = FallbackChannel::new(
            Arc::clone(&ledger),
            Arc::new(authenticator),
            event_tx,
            FallbackConfig::default(),
        );
        Harness {
            fallback,
            ledger,
            store,
            events: event_rx,
            session,
        }
    }

    // ── Happy path ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_manual_check_in_records_on_the_manual_channel() {
        // Arrange
        let mut h = harness(ScriptedAuthenticator::approving());
        let zoe = Uuid::new_v4();

        // Act: typed exactly as a person would, grouped and lowercased.
        let outcome = h.fallback.check_in("ab1-2cd", zoe, "Zoe").await.unwrap();

        // Assert
        assert!(outcome.was_new());
        let record = outcome.record();
        assert_eq!(record.session_id, h.session.id);
        assert_eq!(record.channel, CommitChannel::Manual);
        assert_eq!(record.display_name, "Zoe");
        match h.events.recv().await {
            Some(SessionEvent::ParticipantJoined { channel, .. }) => {
                assert_eq!(channel, CommitChannel::Manual);
            }
            other => panic!("expected ParticipantJoined, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_duplicate_manual_check_in_is_idempotent() {
        let h = harness(ScriptedAuthenticator::approving());
        let ray = Uuid::new_v4();

        let first = h.fallback.check_in("AB12CD", ray, "Ray").await.unwrap();
        let second = h.fallback.check_in("AB12CD", ray, "Ray").await.unwrap();

        assert!(first.was_new());
        assert!(!second.was_new());
        assert_eq!(h.ledger.len().await, 1);
    }

    #[tokio::test]
    async fn test_manual_duplicate_of_a_wireless_commit_is_detected() {
        // Arrange: the participant already checked in over the radio.
        let h = harness(ScriptedAuthenticator::approving());
        let ana = Uuid::new_v4();
        h.ledger
            .commit(h.session.id, ana, "Ana", CommitChannel::Wireless, 50)
            .await
            .unwrap();

        // Act
        let outcome = h.fallback.check_in("AB12CD", ana, "Ana").await.unwrap();

        // Assert: one record, the wireless one.
        assert!(!outcome.was_new());
        assert_eq!(outcome.record().channel, CommitChannel::Wireless);
        assert_eq!(h.ledger.len().await, 1);
    }

    // ── Rejections ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_malformed_code_never_reaches_the_store() {
        let h = harness(ScriptedAuthenticator::approving());

        let error = h
            .fallback
            .check_in("AB!", Uuid::new_v4(), "Eve")
            .await
            .unwrap_err();

        assert!(matches!(error, FallbackError::BadFormat(_)));
        assert_eq!(h.store.find_calls.load(Ordering::SeqCst), 0);
        assert!(h.ledger.is_empty().await);
    }

    #[tokio::test]
    async fn test_unknown_code_is_rejected() {
        let mut h = harness(ScriptedAuthenticator::approving());
        let ben = Uuid::new_v4();

        let error = h
            .fallback
            .check_in("ZZ99ZZ", ben, "Ben")
            .await
            .unwrap_err();

        assert!(matches!(error, FallbackError::UnknownCode));
        assert!(h.ledger.is_empty().await);
        match h.events.recv().await {
            Some(SessionEvent::HandshakeFailed { reason, .. }) => {
                assert_eq!(reason, FailureReason::InvalidCode);
            }
            other => panic!("expected HandshakeFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_denied_local_auth_leaves_no_record() {
        let mut h = harness(ScriptedAuthenticator::denying());

        let error = h
            .fallback
            .check_in("AB12CD", Uuid::new_v4(), "Mallory")
            .await
            .unwrap_err();

        assert!(matches!(error, FallbackError::AuthRejected));
        assert!(h.ledger.is_empty().await);
        match h.events.recv().await {
            Some(SessionEvent::HandshakeFailed { reason, .. }) => {
                assert_eq!(reason, FailureReason::AuthRejected);
            }
            other => panic!("expected HandshakeFailed, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_local_auth_times_out() {
        // Arrange: confirmation takes longer than the 20s window.
        let h = harness(ScriptedAuthenticator::slow(Duration::from_secs(30)));

        // Act
        let error = h
            .fallback
            .check_in("AB12CD", Uuid::new_v4(), "Slow")
            .await
            .unwrap_err();

        // Assert
        assert!(matches!(error, FallbackError::AuthTimedOut));
        assert!(h.ledger.is_empty().await);
    }

    // ── Persistence failures ──────────────────────────────────────────────────

    #[tokio::test]
    async fn test_persistence_failure_keeps_the_memory_entry() {
        // Arrange
        let mut h = harness(ScriptedAuthenticator::approving());
        h.store.fail_upserts.store(true, Ordering::SeqCst);
        let kim = Uuid::new_v4();

        // Act
        let error = h.fallback.check_in("AB12CD", kim, "Kim").await.unwrap_err();

        // Assert: the commit errored but the participant counts.
        assert!(matches!(error, FallbackError::Commit(_)));
        assert!(h.ledger.is_committed(h.session.id, kim).await);
        assert_eq!(h.ledger.unflushed_count().await, 1);
        match h.events.recv().await {
            Some(SessionEvent::ParticipantJoined { participant_id, .. }) => {
                assert_eq!(participant_id, kim);
            }
            other => panic!("expected ParticipantJoined, got {other:?}"),
        }
        match h.events.recv().await {
            Some(SessionEvent::HandshakeFailed { reason, .. }) => {
                assert_eq!(reason, FailureReason::Persistence);
            }
            other => panic!("expected HandshakeFailed, got {other:?}"),
        }
    }
}

//! AttendanceLedger: the idempotent record of who checked in.
//!
//! The ledger is the one place attendance is decided.  Both the wireless
//! handshake and the manual fallback end here, and both get the same
//! guarantee: exactly one [`AttendanceRecord`] per `(session, participant)`
//! pair, no matter how many commit attempts arrive, in which order, or on
//! which channel.
//!
//! # Architecture
//!
//! The ledger depends only on the [`AttendanceStore`] trait for durability.
//! Infrastructure provides a journal-backed implementation; tests record
//! calls or inject failures.
//!
//! Check-and-insert runs under the in-memory map lock, so concurrent
//! commits for the same pair can never both insert.  The durable write
//! happens *after* the insert and outside the lock: a slow or broken store
//! never weakens duplicate detection.  When the write fails the entry stays
//! resident, the commit reports [`CommitError::Persistence`], and
//! [`finalize`](AttendanceLedger::finalize) retries before reporting what
//! could not be saved.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rollcall_core::{
    AttendanceRecord, CommitChannel, CommitOutcome, ParticipantId, Session, SessionCode,
    SessionId,
};
use thiserror::Error;
use tokio::sync::Mutex;

// ─────────────────────────────────────────────────────────────────────────────
// Storage seam
// ─────────────────────────────────────────────────────────────────────────────

/// Error produced by an [`AttendanceStore`] implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("journal I/O failure: {0}")]
    Io(String),
    #[error("journal serialization failure: {0}")]
    Serialization(String),
}

/// Trait for the durable side of attendance.
///
/// Infrastructure implementations append to an on-disk journal; test
/// implementations record calls.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AttendanceStore: Send + Sync {
    /// Writes the durable copy of one attendance record.  Writing the same
    /// record twice must be harmless.
    async fn upsert_attendance(&self, record: &AttendanceRecord) -> Result<(), StoreError>;

    /// Looks up the session currently carrying `code`, if that session is
    /// still active.  Rotated-away and ended codes return `None`.
    async fn find_active_session(&self, code: &SessionCode)
        -> Result<Option<Session>, StoreError>;

    /// Persists the session row itself.  Called at start, on code rotation
    /// and when the session ends.
    async fn save_session(&self, session: &Session) -> Result<(), StoreError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Ledger
// ─────────────────────────────────────────────────────────────────────────────

/// Error type for ledger commits.
#[derive(Debug, Error)]
pub enum CommitError {
    /// The record was accepted into the in-memory ledger but the durable
    /// write failed.  The participant still counts as recorded; the entry
    /// is retried on [`AttendanceLedger::flush_pending`] and at
    /// finalization.
    #[error("attendance recorded in memory only; durable write failed: {source}")]
    Persistence {
        record: AttendanceRecord,
        #[source]
        source: StoreError,
    },
}

/// What [`AttendanceLedger::finalize`] found when the session closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinalizationReport {
    /// Records the ledger accepted over the session's lifetime.
    pub committed: usize,
    /// Records that could not be written durably even after the final
    /// retry.  These exist only in memory.
    pub unflushed: usize,
}

impl FinalizationReport {
    pub fn fully_flushed(&self) -> bool {
        self.unflushed == 0
    }
}

struct LedgerEntry {
    record: AttendanceRecord,
    flushed: bool,
}

type LedgerKey = (SessionId, ParticipantId);

/// The idempotent attendance ledger.  Shared between the session actor and
/// the manual fallback channel.
pub struct AttendanceLedger {
    store: Arc<dyn AttendanceStore>,
    entries: Mutex<HashMap<LedgerKey, LedgerEntry>>,
}

impl AttendanceLedger {
    pub fn new(store: Arc<dyn AttendanceStore>) -> Self {
        Self {
            store,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Handle to the backing store, for collaborators that share the same
    /// journal (session lookups for the fallback channel, session saves
    /// for the actor).
    pub fn store(&self) -> Arc<dyn AttendanceStore> {
        Arc::clone(&self.store)
    }

    /// Records attendance for `(session_id, participant_id)`.
    ///
    /// The first commit for a pair wins and creates the record; every later
    /// commit returns [`CommitOutcome::AlreadyRecorded`] with the original
    /// record, regardless of channel.
    ///
    /// # Errors
    ///
    /// Returns [`CommitError::Persistence`] when the durable write fails.
    /// The entry is kept in memory and still blocks duplicates.
    pub async fn commit(
        &self,
        session_id: SessionId,
        participant_id: ParticipantId,
        display_name: &str,
        channel: CommitChannel,
        committed_at_secs: u64,
    ) -> Result<CommitOutcome, CommitError> {
        let key = (session_id, participant_id);

        // Check-and-insert is atomic under the map lock.  A concurrent
        // commit for the same pair sees the entry immediately, even while
        // the durable write below is still in flight.
        let record = {
            let mut entries = self.entries.lock().await;
            if let Some(entry) = entries.get(&key) {
                return Ok(CommitOutcome::AlreadyRecorded(entry.record.clone()));
            }
            let record = AttendanceRecord {
                session_id,
                participant_id,
                display_name: display_name.to_string(),
                committed_at_secs,
                channel,
            };
            entries.insert(
                key,
                LedgerEntry {
                    record: record.clone(),
                    flushed: false,
                },
            );
            record
        };

        // The durable write runs outside the lock so a slow store cannot
        // stall duplicate detection.
        match self.store.upsert_attendance(&record).await {
            Ok(()) => {
                self.mark_flushed(key).await;
                Ok(CommitOutcome::Recorded(record))
            }
            Err(source) => Err(CommitError::Persistence { record, source }),
        }
    }

    /// Retries the durable write for every entry still held only in
    /// memory.  Returns how many remain unflushed afterwards.
    pub async fn flush_pending(&self) -> usize {
        let pending: Vec<(LedgerKey, AttendanceRecord)> = {
            let entries = self.entries.lock().await;
            entries
                .iter()
                .filter(|(_, entry)| !entry.flushed)
                .map(|(key, entry)| (*key, entry.record.clone()))
                .collect()
        };

        let mut remaining = 0;
        for (key, record) in pending {
            match self.store.upsert_attendance(&record).await {
                Ok(()) => self.mark_flushed(key).await,
                Err(_) => remaining += 1,
            }
        }
        remaining
    }

    /// Final flush at session end.  Reports totals so the caller can log
    /// any records that never reached the store.
    pub async fn finalize(&self) -> FinalizationReport {
        let unflushed = self.flush_pending().await;
        let committed = self.entries.lock().await.len();
        FinalizationReport {
            committed,
            unflushed,
        }
    }

    /// True when attendance for the pair has been recorded, flushed or not.
    pub async fn is_committed(&self, session_id: SessionId, participant_id: ParticipantId) -> bool {
        self.entries
            .lock()
            .await
            .contains_key(&(session_id, participant_id))
    }

    /// Number of records accepted so far.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Entries that still lack a durable copy.
    pub async fn unflushed_count(&self) -> usize {
        self.entries
            .lock()
            .await
            .values()
            .filter(|entry| !entry.flushed)
            .count()
    }

    /// All records for one session, ordered by commit time (ties broken by
    /// participant id so the order is stable).
    pub async fn records_for_session(&self, session_id: SessionId) -> Vec<AttendanceRecord> {
        let entries = self.entries.lock().await;
        let mut records: Vec<AttendanceRecord> = entries
            .values()
            .filter(|entry| entry.record.session_id == session_id)
            .map(|entry| entry.record.clone())
            .collect();
        records.sort_by_key(|r| (r.committed_at_secs, r.participant_id));
        records
    }

    async fn mark_flushed(&self, key: LedgerKey) {
        if let Some(entry) = self.entries.lock().await.get_mut(&key) {
            entry.flushed = true;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex as StdMutex;
    use tokio_test::assert_ok;
    use uuid::Uuid;

    // ── Test doubles ──────────────────────────────────────────────────────────

    #[derive(Default)]
    struct RecordingStore {
        upserts: StdMutex<Vec<AttendanceRecord>>,
        fail_upserts: AtomicBool,
    }

    impl RecordingStore {
        fn set_failing(&self, failing: bool) {
            self.fail_upserts.store(failing, Ordering::SeqCst);
        }

        fn upsert_count(&self) -> usize {
            self.upserts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl AttendanceStore for RecordingStore {
        async fn upsert_attendance(&self, record: &AttendanceRecord) -> Result<(), StoreError> {
            if self.fail_upserts.load(Ordering::SeqCst) {
                return Err(StoreError::Io("injected failure".to_string()));
            }
            self.upserts.lock().unwrap().push(record.clone());
            Ok(())
        }

        async fn find_active_session(
            &self,
            _code: &SessionCode,
        ) -> Result<Option<Session>, StoreError> {
            Ok(None)
        }

        async fn save_session(&self, _session: &Session) -> Result<(), StoreError> {
            Ok(())
        }
    }

    fn ledger_with_recording_store() -> (AttendanceLedger, Arc<RecordingStore>) {
        let store = Arc::new(RecordingStore::default());
        let ledger = AttendanceLedger::new(Arc::clone(&store) as Arc<dyn AttendanceStore>);
        (ledger, store)
    }

    // ── Idempotency ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_first_commit_records_and_later_commits_report_already_recorded() {
        // Arrange
        let (ledger, store) = ledger_with_recording_store();
        let session = Uuid::new_v4();
        let alice = Uuid::new_v4();

        // Act
        let first = ledger
            .commit(session, alice, "Alice", CommitChannel::Wireless, 100)
            .await
            .unwrap();
        let second = ledger
            .commit(session, alice, "Alice", CommitChannel::Wireless, 130)
            .await
            .unwrap();

        // Assert: one record, the original one, and one durable write.
        assert!(first.was_new());
        assert!(!second.was_new());
        assert_eq!(second.record().committed_at_secs, 100);
        assert_eq!(ledger.len().await, 1);
        assert_eq!(store.upsert_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_commits_for_one_pair_yield_exactly_one_record() {
        // Arrange
        let (ledger, store) = ledger_with_recording_store();
        let session = Uuid::new_v4();
        let bob = Uuid::new_v4();

        // Act: both commits race on the same pair.
        let (left, right) = tokio::join!(
            ledger.commit(session, bob, "Bob", CommitChannel::Wireless, 200),
            ledger.commit(session, bob, "Bob", CommitChannel::Manual, 200),
        );

        // Assert: exactly one of them created the record.
        let created = [left.unwrap().was_new(), right.unwrap().was_new()];
        assert_eq!(created.iter().filter(|new| **new).count(), 1);
        assert_eq!(ledger.len().await, 1);
        assert_eq!(store.upsert_count(), 1);
    }

    #[tokio::test]
    async fn test_commit_channel_of_the_first_commit_is_kept() {
        // Arrange
        let (ledger, _store) = ledger_with_recording_store();
        let session = Uuid::new_v4();
        let carol = Uuid::new_v4();

        // Act: wireless first, manual fallback second.
        ledger
            .commit(session, carol, "Carol", CommitChannel::Wireless, 300)
            .await
            .unwrap();
        let duplicate = ledger
            .commit(session, carol, "Carol", CommitChannel::Manual, 360)
            .await
            .unwrap();

        // Assert
        assert_eq!(duplicate.record().channel, CommitChannel::Wireless);
    }

    #[tokio::test]
    async fn test_distinct_pairs_each_get_their_own_record() {
        let (ledger, _store) = ledger_with_recording_store();
        let session_a = Uuid::new_v4();
        let session_b = Uuid::new_v4();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        ledger
            .commit(session_a, alice, "Alice", CommitChannel::Wireless, 1)
            .await
            .unwrap();
        ledger
            .commit(session_a, bob, "Bob", CommitChannel::Wireless, 2)
            .await
            .unwrap();
        ledger
            .commit(session_b, alice, "Alice", CommitChannel::Manual, 3)
            .await
            .unwrap();

        assert_eq!(ledger.len().await, 3);
        assert_eq!(ledger.records_for_session(session_a).await.len(), 2);
        assert_eq!(ledger.records_for_session(session_b).await.len(), 1);
    }

    // ── Persistence failures ──────────────────────────────────────────────────

    #[tokio::test]
    async fn test_failed_durable_write_keeps_the_entry_and_blocks_duplicates() {
        // Arrange
        let (ledger, store) = ledger_with_recording_store();
        store.set_failing(true);
        let session = Uuid::new_v4();
        let dave = Uuid::new_v4();

        // Act
        let result = ledger
            .commit(session, dave, "Dave", CommitChannel::Wireless, 400)
            .await;

        // Assert: the commit failed but the participant is recorded.
        let error = result.unwrap_err();
        let CommitError::Persistence { record, .. } = error;
        assert_eq!(record.participant_id, dave);
        assert!(ledger.is_committed(session, dave).await);
        assert_eq!(ledger.unflushed_count().await, 1);

        // A retry while the store is still down reports the existing entry.
        let retry = ledger
            .commit(session, dave, "Dave", CommitChannel::Wireless, 460)
            .await
            .unwrap();
        assert!(!retry.was_new());
    }

    #[tokio::test]
    async fn test_flush_pending_writes_entries_once_the_store_recovers() {
        // Arrange: one entry stranded in memory.
        let (ledger, store) = ledger_with_recording_store();
        store.set_failing(true);
        let session = Uuid::new_v4();
        let erin = Uuid::new_v4();
        let _ = ledger
            .commit(session, erin, "Erin", CommitChannel::Manual, 500)
            .await;
        assert_eq!(ledger.unflushed_count().await, 1);

        // Act: the store comes back.
        store.set_failing(false);
        let remaining = ledger.flush_pending().await;

        // Assert
        assert_eq!(remaining, 0);
        assert_eq!(ledger.unflushed_count().await, 0);
        assert_eq!(store.upsert_count(), 1);
    }

    #[tokio::test]
    async fn test_finalize_reports_what_never_reached_the_store() {
        // Arrange: the store never recovers.
        let (ledger, store) = ledger_with_recording_store();
        let session = Uuid::new_v4();
        let _ = ledger
            .commit(session, Uuid::new_v4(), "Frank", CommitChannel::Wireless, 600)
            .await
            .unwrap();
        store.set_failing(true);
        let _ = ledger
            .commit(session, Uuid::new_v4(), "Grace", CommitChannel::Wireless, 610)
            .await;

        // Act
        let report = ledger.finalize().await;

        // Assert
        assert_eq!(report.committed, 2);
        assert_eq!(report.unflushed, 1);
        assert!(!report.fully_flushed());
    }

    // ── Store interaction ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_duplicate_commits_upsert_exactly_once() {
        // Arrange: the mock rejects any second durable write.
        let mut store = MockAttendanceStore::new();
        store
            .expect_upsert_attendance()
            .times(1)
            .returning(|_| Ok(()));
        let ledger = AttendanceLedger::new(Arc::new(store));
        let session = Uuid::new_v4();
        let heidi = Uuid::new_v4();

        // Act + Assert
        let first = assert_ok!(
            ledger
                .commit(session, heidi, "Heidi", CommitChannel::Wireless, 700)
                .await
        );
        assert!(first.was_new());
        let second = assert_ok!(
            ledger
                .commit(session, heidi, "Heidi", CommitChannel::Wireless, 710)
                .await
        );
        assert!(!second.was_new());
    }

    #[tokio::test]
    async fn test_records_for_session_sorts_by_commit_time() {
        let (ledger, _store) = ledger_with_recording_store();
        let session = Uuid::new_v4();

        ledger
            .commit(session, Uuid::new_v4(), "Late", CommitChannel::Wireless, 900)
            .await
            .unwrap();
        ledger
            .commit(session, Uuid::new_v4(), "Early", CommitChannel::Wireless, 100)
            .await
            .unwrap();

        let records = ledger.records_for_session(session).await;
        assert_eq!(records[0].display_name, "Early");
        assert_eq!(records[1].display_name, "Late");
    }
}

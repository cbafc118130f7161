//! JSON-lines attendance journal, the durable side of the ledger.
//!
//! Two files live under the data directory:
//!
//! - `sessions.jsonl` – one row per session state change.  The last row for
//!   a session id is authoritative, so code rotation and session end are
//!   plain appends.
//! - `attendance.jsonl` – one row per (session, participant).  A re-flush
//!   after a failed write replaces the row instead of appending, keeping the
//!   file free of duplicates.
//!
//! All access is serialized through one internal lock; the ledger may issue
//! concurrent writes (the wireless and manual channels commit independently)
//! and a read-modify-write upsert must not lose rows.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rollcall_core::{AttendanceRecord, Session, SessionCode};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

use crate::application::ledger::{AttendanceStore, StoreError};

const SESSIONS_FILE: &str = "sessions.jsonl";
const ATTENDANCE_FILE: &str = "attendance.jsonl";

/// File-backed [`AttendanceStore`].
pub struct FileJournal {
    data_dir: PathBuf,
    /// Guards every file access.  A torn read during an upsert rewrite
    /// would otherwise be possible.
    file_lock: Mutex<()>,
}

impl FileJournal {
    /// Creates a journal rooted at `data_dir`.  The directory is created on
    /// first write.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            file_lock: Mutex::new(()),
        }
    }

    /// The directory holding the journal files.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn sessions_path(&self) -> PathBuf {
        self.data_dir.join(SESSIONS_FILE)
    }

    fn attendance_path(&self) -> PathBuf {
        self.data_dir.join(ATTENDANCE_FILE)
    }

    async fn ensure_dir(&self) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.data_dir)
            .await
            .map_err(|e| StoreError::Io(e.to_string()))
    }

    /// Reads all lines of `path`; a missing file reads as empty.
    async fn read_lines(path: &Path) -> Result<Vec<String>, StoreError> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Ok(content.lines().map(str::to_string).collect()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(StoreError::Io(e.to_string())),
        }
    }

    /// Parses journal rows, skipping lines that do not parse.  A torn tail
    /// line left by a crash must not brick the whole journal.
    fn parse_rows<T: serde::de::DeserializeOwned>(path: &Path, lines: &[String]) -> Vec<T> {
        let mut rows = Vec::with_capacity(lines.len());
        for (idx, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<T>(line) {
                Ok(row) => rows.push(row),
                Err(e) => {
                    warn!("skipping unparseable row {} of {}: {e}", idx + 1, path.display());
                }
            }
        }
        rows
    }

    async fn append_line(&self, path: &Path, line: &str) -> Result<(), StoreError> {
        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?;
        file.write_all(b"\n")
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?;
        file.flush()
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl AttendanceStore for FileJournal {
    async fn upsert_attendance(&self, record: &AttendanceRecord) -> Result<(), StoreError> {
        let _guard = self.file_lock.lock().await;
        self.ensure_dir().await?;

        let path = self.attendance_path();
        let lines = Self::read_lines(&path).await?;
        let mut rows: Vec<AttendanceRecord> = Self::parse_rows(&path, &lines);

        match rows.iter_mut().find(|row| {
            row.session_id == record.session_id && row.participant_id == record.participant_id
        }) {
            Some(existing) => *existing = record.clone(),
            None => rows.push(record.clone()),
        }

        let mut content = String::with_capacity(rows.len() * 128);
        for row in &rows {
            let line = serde_json::to_string(row)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            content.push_str(&line);
            content.push('\n');
        }
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| StoreError::Io(e.to_string()))
    }

    async fn find_active_session(
        &self,
        code: &SessionCode,
    ) -> Result<Option<Session>, StoreError> {
        let _guard = self.file_lock.lock().await;

        let path = self.sessions_path();
        let lines = Self::read_lines(&path).await?;
        let rows: Vec<Session> = Self::parse_rows(&path, &lines);

        // Later rows supersede earlier ones for the same session, so a
        // rotated-away or ended code stops matching as soon as the new row
        // lands.
        let mut latest: std::collections::HashMap<rollcall_core::SessionId, Session> =
            std::collections::HashMap::new();
        for row in rows {
            latest.insert(row.id, row);
        }

        Ok(latest
            .into_values()
            .find(|session| session.is_active() && session.code == *code))
    }

    async fn save_session(&self, session: &Session) -> Result<(), StoreError> {
        let _guard = self.file_lock.lock().await;
        self.ensure_dir().await?;

        let line = serde_json::to_string(session)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.append_line(&self.sessions_path(), &line).await
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::{CommitChannel, SessionStatus};
    use uuid::Uuid;

    struct TempJournal {
        journal: FileJournal,
        dir: PathBuf,
    }

    impl TempJournal {
        fn new() -> Self {
            let dir =
                std::env::temp_dir().join(format!("rollcall_journal_{}", Uuid::new_v4()));
            Self {
                journal: FileJournal::new(&dir),
                dir,
            }
        }
    }

    impl Drop for TempJournal {
        fn drop(&mut self) {
            std::fs::remove_dir_all(&self.dir).ok();
        }
    }

    fn record(session_id: Uuid, participant_id: Uuid, name: &str) -> AttendanceRecord {
        AttendanceRecord {
            session_id,
            participant_id,
            display_name: name.to_string(),
            committed_at_secs: 1_700_000_000,
            channel: CommitChannel::Wireless,
        }
    }

    fn session(code: &str) -> Session {
        Session::new(
            SessionCode::parse(code).expect("valid code"),
            "course-101",
            1_700_000_000,
        )
    }

    // ── Attendance upserts ────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_upsert_creates_the_journal_file() {
        // Arrange
        let tmp = TempJournal::new();
        let rec = record(Uuid::new_v4(), Uuid::new_v4(), "Ada");

        // Act
        tmp.journal.upsert_attendance(&rec).await.expect("upsert");

        // Assert
        let content = std::fs::read_to_string(tmp.dir.join(ATTENDANCE_FILE)).expect("file");
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 1);
        let parsed: AttendanceRecord = serde_json::from_str(lines[0]).expect("parse row");
        assert_eq!(parsed, rec);
    }

    #[tokio::test]
    async fn test_upsert_replaces_the_row_for_the_same_key() {
        // Arrange
        let tmp = TempJournal::new();
        let session_id = Uuid::new_v4();
        let participant_id = Uuid::new_v4();
        let first = record(session_id, participant_id, "Ada");
        let mut second = record(session_id, participant_id, "Ada L.");
        second.committed_at_secs += 5;

        // Act
        tmp.journal.upsert_attendance(&first).await.expect("first");
        tmp.journal.upsert_attendance(&second).await.expect("second");

        // Assert: one row, carrying the newer write.
        let content = std::fs::read_to_string(tmp.dir.join(ATTENDANCE_FILE)).expect("file");
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 1, "re-flush must replace, not append");
        let parsed: AttendanceRecord = serde_json::from_str(lines[0]).expect("parse row");
        assert_eq!(parsed.display_name, "Ada L.");
    }

    #[tokio::test]
    async fn test_upsert_keeps_rows_for_other_participants() {
        // Arrange
        let tmp = TempJournal::new();
        let session_id = Uuid::new_v4();

        // Act
        tmp.journal
            .upsert_attendance(&record(session_id, Uuid::new_v4(), "Ada"))
            .await
            .expect("first");
        tmp.journal
            .upsert_attendance(&record(session_id, Uuid::new_v4(), "Grace"))
            .await
            .expect("second");

        // Assert
        let content = std::fs::read_to_string(tmp.dir.join(ATTENDANCE_FILE)).expect("file");
        assert_eq!(content.lines().count(), 2);
    }

    // ── Session rows and code lookup ──────────────────────────────────────────

    #[tokio::test]
    async fn test_find_active_session_on_missing_file_returns_none() {
        // Arrange
        let tmp = TempJournal::new();
        let code = SessionCode::parse("AB12CD").unwrap();

        // Act / Assert
        let found = tmp.journal.find_active_session(&code).await.expect("find");
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_find_active_session_matches_saved_code() {
        // Arrange
        let tmp = TempJournal::new();
        let sess = session("AB12CD");
        tmp.journal.save_session(&sess).await.expect("save");

        // Act
        let found = tmp
            .journal
            .find_active_session(&SessionCode::parse("AB12CD").unwrap())
            .await
            .expect("find");

        // Assert
        assert_eq!(found, Some(sess));
    }

    #[tokio::test]
    async fn test_ended_session_row_supersedes_the_active_one() {
        // Arrange: the same session id saved Active, then Ended.
        let tmp = TempJournal::new();
        let sess = session("AB12CD");
        tmp.journal.save_session(&sess).await.expect("save active");
        let mut ended = sess.clone();
        ended.status = SessionStatus::Ended;
        tmp.journal.save_session(&ended).await.expect("save ended");

        // Act
        let found = tmp
            .journal
            .find_active_session(&SessionCode::parse("AB12CD").unwrap())
            .await
            .expect("find");

        // Assert
        assert!(found.is_none(), "an ended session's code must stop matching");
    }

    #[tokio::test]
    async fn test_rotation_row_invalidates_the_old_code() {
        // Arrange: the session rotates from AB12CD to XY99ZZ.
        let tmp = TempJournal::new();
        let sess = session("AB12CD");
        tmp.journal.save_session(&sess).await.expect("save");
        let mut rotated = sess.clone();
        rotated.code = SessionCode::parse("XY99ZZ").unwrap();
        tmp.journal.save_session(&rotated).await.expect("save rotated");

        // Act
        let old = tmp
            .journal
            .find_active_session(&SessionCode::parse("AB12CD").unwrap())
            .await
            .expect("find old");
        let new = tmp
            .journal
            .find_active_session(&SessionCode::parse("XY99ZZ").unwrap())
            .await
            .expect("find new");

        // Assert
        assert!(old.is_none(), "a rotated-away code must stop matching");
        assert_eq!(new, Some(rotated));
    }

    #[tokio::test]
    async fn test_torn_tail_line_does_not_brick_the_journal() {
        // Arrange: a valid row followed by half a row, as a crash would leave.
        let tmp = TempJournal::new();
        let sess = session("AB12CD");
        tmp.journal.save_session(&sess).await.expect("save");
        let path = tmp.dir.join(SESSIONS_FILE);
        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str("{\"id\":\"trunc");
        std::fs::write(&path, content).unwrap();

        // Act
        let found = tmp
            .journal
            .find_active_session(&SessionCode::parse("AB12CD").unwrap())
            .await
            .expect("find must not error");

        // Assert
        assert_eq!(found, Some(sess));
    }
}

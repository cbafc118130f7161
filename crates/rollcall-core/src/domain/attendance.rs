//! Attendance records and commit outcomes.

use serde::{Deserialize, Serialize};

use crate::domain::session::{ParticipantId, SessionId};

/// Which path carried the commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum CommitChannel {
    /// The discovered-and-connected wireless handshake.
    Wireless = 0x01,
    /// Manual code entry through the fallback surface.
    Manual = 0x02,
}

impl TryFrom<u8> for CommitChannel {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(CommitChannel::Wireless),
            0x02 => Ok(CommitChannel::Manual),
            _ => Err(()),
        }
    }
}

/// One committed attendance fact.
///
/// Created at most once per (session, participant) and never mutated.
/// Records from the wireless and manual paths are structurally identical;
/// only [`AttendanceRecord::channel`] differs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    /// Session the participant attended.
    pub session_id: SessionId,
    /// The attending participant's device id.
    pub participant_id: ParticipantId,
    /// Display name the participant presented at commit time.
    pub display_name: String,
    /// Seconds since the Unix epoch when the commit was accepted.
    pub committed_at_secs: u64,
    /// Path the commit travelled.
    pub channel: CommitChannel,
}

/// Result of an attendance commit.
///
/// A repeated commit for a key that already holds a record is not an
/// error: the caller gets the existing record back and cannot tell a
/// retried acknowledgement from a first success except by the variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// First commit for this (session, participant): a record was created.
    Recorded(AttendanceRecord),
    /// The key was already present; the existing record is returned.
    AlreadyRecorded(AttendanceRecord),
}

impl CommitOutcome {
    /// The record this outcome refers to, new or pre-existing.
    pub fn record(&self) -> &AttendanceRecord {
        match self {
            CommitOutcome::Recorded(record) => record,
            CommitOutcome::AlreadyRecorded(record) => record,
        }
    }

    /// `true` only for the first commit of the key.
    pub fn was_new(&self) -> bool {
        matches!(self, CommitOutcome::Recorded(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn sample_record() -> AttendanceRecord {
        AttendanceRecord {
            session_id: Uuid::new_v4(),
            participant_id: Uuid::new_v4(),
            display_name: "p1".to_string(),
            committed_at_secs: 1_700_000_000,
            channel: CommitChannel::Wireless,
        }
    }

    #[test]
    fn test_channel_byte_round_trip() {
        assert_eq!(CommitChannel::try_from(0x01), Ok(CommitChannel::Wireless));
        assert_eq!(CommitChannel::try_from(0x02), Ok(CommitChannel::Manual));
        assert_eq!(CommitChannel::try_from(0x03), Err(()));
    }

    #[test]
    fn test_outcome_exposes_record_and_novelty() {
        let record = sample_record();

        let first = CommitOutcome::Recorded(record.clone());
        assert!(first.was_new());
        assert_eq!(first.record(), &record);

        let repeat = CommitOutcome::AlreadyRecorded(record.clone());
        assert!(!repeat.was_new());
        assert_eq!(repeat.record(), &record);
    }
}

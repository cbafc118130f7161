//! FIFO admission queue with a single active handshake slot.
//!
//! # Why only one slot? (for beginners)
//!
//! The host walks each participant through a short interactive handshake
//! (code exchange, then a local authentication prompt on the participant's
//! device).  Running many of those at once multiplies radio chatter and
//! makes timeout behaviour unpredictable, so the host serialises them:
//! exactly one handshake is *active* at any moment and everyone else waits
//! in a strict FIFO queue.
//!
//! The controller is pure and synchronous.  It never spawns tasks and
//! never looks at the clock on its own; callers pass `Instant`s in and
//! react to the values handed back.  All mutation happens on the single
//! session actor task, so there is no locking here either.
//!
//! Timers live outside: the actor arms a sleep for each deadline and posts
//! the resulting command back to itself carrying the [`QueueTicket`] it was
//! armed for.  Because tickets are never reused, a timer that fires after
//! its handshake already finished simply no longer matches the active
//! ticket and is discarded.

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use rollcall_core::ParticipantId;
use thiserror::Error;

/// Weight of the newest sample in the exponential moving average of
/// handshake service times.
const EWMA_WEIGHT: f64 = 0.3;

// ─────────────────────────────────────────────────────────────────────────────
// Tickets
// ─────────────────────────────────────────────────────────────────────────────

/// Identifies one admission request for its whole lifetime.
///
/// Tickets are issued in strictly increasing order and never reused, which
/// is what makes stale deadline timers safe to ignore: a timer always names
/// the ticket it was armed for, and a ticket that has left the queue can
/// never come back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueueTicket(u64);

impl QueueTicket {
    /// Raw counter value, used in logs and event payloads.
    pub fn value(&self) -> u64 {
        self.0
    }

    /// Builds a ticket with a known value, for tests that need one without
    /// driving a controller.
    #[cfg(test)]
    pub(crate) fn from_value(value: u64) -> Self {
        QueueTicket(value)
    }
}

impl fmt::Display for QueueTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ticket #{}", self.0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration and errors
// ─────────────────────────────────────────────────────────────────────────────

/// Tunables for the admission queue.
#[derive(Debug, Clone)]
pub struct AdmissionConfig {
    /// Maximum concurrent requests the host tracks: the active slot plus
    /// everyone waiting in the queue.
    pub capacity: usize,
    /// How long an admitted participant has to finish the whole handshake
    /// before the slot is reclaimed.
    pub handshake_window: Duration,
    /// Seed for the average service time before any handshake has finished.
    pub service_time_seed: Duration,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            capacity: 8,
            handshake_window: Duration::from_secs(30),
            service_time_seed: Duration::from_secs(5),
        }
    }
}

/// Returned when the queue cannot take another request.
///
/// Carries the position the request *would* have occupied (always greater
/// than the capacity) and the wait that position would have implied, so the
/// peer can show a meaningful "try again later" message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "admission queue full: would be position {would_be_position} of capacity {capacity} \
     (~{estimated_wait_secs}s wait)"
)]
pub struct CapacityError {
    pub would_be_position: u16,
    pub capacity: usize,
    pub estimated_wait_secs: u32,
}

// ─────────────────────────────────────────────────────────────────────────────
// Queue entries
// ─────────────────────────────────────────────────────────────────────────────

/// A request waiting its turn in the FIFO queue.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub ticket: QueueTicket,
    pub participant_id: ParticipantId,
    pub enqueued_at: Instant,
}

/// The request currently holding the active slot.
#[derive(Debug, Clone)]
pub struct ActiveGrant {
    pub ticket: QueueTicket,
    pub participant_id: ParticipantId,
    pub admitted_at: Instant,
    /// When the handshake window runs out.  Informational; the actor arms
    /// its own timer when it receives the grant.
    pub deadline: Instant,
}

/// One queued request's position, as reported to waiting peers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedPosition {
    pub ticket: QueueTicket,
    pub participant_id: ParticipantId,
    /// 1-based position; position 1 is admitted next.
    pub position: u16,
    pub estimated_wait_secs: u32,
}

/// Everything evicted by [`AdmissionController::drain`].
#[derive(Debug, Default)]
pub struct DrainOutcome {
    pub active: Option<ActiveGrant>,
    pub queued: Vec<PendingRequest>,
}

impl DrainOutcome {
    /// Total number of requests the drain evicted.
    pub fn evicted_count(&self) -> usize {
        self.queued.len() + usize::from(self.active.is_some())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Controller
// ─────────────────────────────────────────────────────────────────────────────

/// The FIFO admission queue.  One per session, owned by the session actor.
#[derive(Debug)]
pub struct AdmissionController {
    config: AdmissionConfig,
    /// Next ticket counter.  Starts at 1 so ticket 0 never exists, which
    /// keeps "missing ticket" unambiguous in logs.
    next_ticket: u64,
    active: Option<ActiveGrant>,
    queue: VecDeque<PendingRequest>,
    avg_service: Duration,
}

impl AdmissionController {
    pub fn new(config: AdmissionConfig) -> Self {
        let avg_service = config.service_time_seed;
        Self {
            config,
            next_ticket: 1,
            active: None,
            queue: VecDeque::new(),
            avg_service,
        }
    }

    /// Adds a request to the back of the queue.
    ///
    /// Rejects with [`CapacityError`] when the slot plus queue already hold
    /// `capacity` requests.  Enqueueing never admits; callers follow up with
    /// [`admit_next`](Self::admit_next) to fill a free slot.
    pub fn enqueue(
        &mut self,
        participant_id: ParticipantId,
        now: Instant,
    ) -> Result<QueueTicket, CapacityError> {
        let occupied = self.occupancy();
        if occupied >= self.config.capacity {
            let would_be_position = clamp_position(occupied + 1);
            return Err(CapacityError {
                would_be_position,
                capacity: self.config.capacity,
                estimated_wait_secs: self.estimated_wait_secs(would_be_position),
            });
        }

        let ticket = QueueTicket(self.next_ticket);
        self.next_ticket += 1;
        self.queue.push_back(PendingRequest {
            ticket,
            participant_id,
            enqueued_at: now,
        });
        Ok(ticket)
    }

    /// Moves the head of the queue into the active slot, if the slot is free
    /// and anyone is waiting.  Returns the new grant so the caller can start
    /// the handshake and arm its deadline timer.
    pub fn admit_next(&mut self, now: Instant) -> Option<ActiveGrant> {
        if self.active.is_some() {
            return None;
        }
        let pending = self.queue.pop_front()?;
        let grant = ActiveGrant {
            ticket: pending.ticket,
            participant_id: pending.participant_id,
            admitted_at: now,
            deadline: now + self.config.handshake_window,
        };
        self.active = Some(grant.clone());
        Some(grant)
    }

    /// The grant currently holding the slot, if any.
    pub fn active(&self) -> Option<&ActiveGrant> {
        self.active.as_ref()
    }

    /// True when `ticket` holds the active slot right now.  Deadline timers
    /// check this before acting so that late timers become no-ops.
    pub fn is_active(&self, ticket: QueueTicket) -> bool {
        self.active.as_ref().map(|g| g.ticket) == Some(ticket)
    }

    /// Releases the slot after a successful handshake and folds the observed
    /// service time into the moving average.  Returns false if `ticket` no
    /// longer holds the slot.
    pub fn complete(&mut self, ticket: QueueTicket, now: Instant) -> bool {
        if !self.is_active(ticket) {
            return false;
        }
        if let Some(grant) = self.active.take() {
            let sample = now.saturating_duration_since(grant.admitted_at);
            self.avg_service = blend(self.avg_service, sample);
        }
        true
    }

    /// Releases the slot without updating the service average.  Used for
    /// timeouts, cancellations and evictions, which would otherwise poison
    /// the wait estimate with their full window length.
    pub fn release(&mut self, ticket: QueueTicket) -> bool {
        if !self.is_active(ticket) {
            return false;
        }
        self.active = None;
        true
    }

    /// Removes a waiting request from the queue.  Everyone behind it shifts
    /// forward one position.
    pub fn cancel_queued(&mut self, ticket: QueueTicket) -> Option<PendingRequest> {
        let index = self.queue.iter().position(|p| p.ticket == ticket)?;
        self.queue.remove(index)
    }

    /// 1-based queue position of a waiting request.  `None` when the ticket
    /// is not queued (it may be active, finished, or unknown).
    pub fn position(&self, ticket: QueueTicket) -> Option<u16> {
        self.queue
            .iter()
            .position(|p| p.ticket == ticket)
            .map(|index| clamp_position(index + 1))
    }

    /// Positions and wait estimates for every waiting request, in queue
    /// order.  The actor fans these out as queue updates after each change.
    pub fn queue_snapshot(&self) -> Vec<QueuedPosition> {
        self.queue
            .iter()
            .enumerate()
            .map(|(index, pending)| {
                let position = clamp_position(index + 1);
                QueuedPosition {
                    ticket: pending.ticket,
                    participant_id: pending.participant_id,
                    position,
                    estimated_wait_secs: self.estimated_wait_secs(position),
                }
            })
            .collect()
    }

    /// Estimated wait for a given 1-based position: position times the
    /// average handshake service time, rounded to whole seconds.
    pub fn estimated_wait_secs(&self, position: u16) -> u32 {
        let secs = self.avg_service.as_secs_f64() * f64::from(position);
        secs.round().min(f64::from(u32::MAX)) as u32
    }

    /// Current average handshake service time.
    pub fn average_service_time(&self) -> Duration {
        self.avg_service
    }

    /// Requests currently tracked: active slot plus queue.
    pub fn occupancy(&self) -> usize {
        self.queue.len() + usize::from(self.active.is_some())
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn slot_free(&self) -> bool {
        self.active.is_none()
    }

    /// Empties the slot and the queue in one step, returning everything that
    /// was evicted so the caller can notify each peer.  Used when the
    /// session ends.
    pub fn drain(&mut self) -> DrainOutcome {
        DrainOutcome {
            active: self.active.take(),
            queued: self.queue.drain(..).collect(),
        }
    }
}

/// Blends a new service-time sample into the running average.
fn blend(average: Duration, sample: Duration) -> Duration {
    let blended =
        average.as_secs_f64() * (1.0 - EWMA_WEIGHT) + sample.as_secs_f64() * EWMA_WEIGHT;
    Duration::from_secs_f64(blended)
}

fn clamp_position(raw: usize) -> u16 {
    raw.min(usize::from(u16::MAX)) as u16
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn controller() -> AdmissionController {
        AdmissionController::new(AdmissionConfig {
            capacity: 3,
            handshake_window: Duration::from_secs(30),
            service_time_seed: Duration::from_secs(5),
        })
    }

    fn participant() -> ParticipantId {
        Uuid::new_v4()
    }

    #[test]
    fn test_enqueue_then_admit_fills_the_slot() {
        // Arrange
        let mut queue = controller();
        let now = Instant::now();
        let alice = participant();

        // Act
        let ticket = queue.enqueue(alice, now).unwrap();
        let grant = queue.admit_next(now).unwrap();

        // Assert
        assert_eq!(grant.ticket, ticket);
        assert_eq!(grant.participant_id, alice);
        assert_eq!(grant.deadline, now + Duration::from_secs(30));
        assert!(queue.is_active(ticket));
        assert!(!queue.slot_free());
        assert_eq!(queue.queue_len(), 0);
    }

    #[test]
    fn test_admission_order_is_strictly_fifo() {
        // Arrange
        let mut queue = controller();
        let now = Instant::now();
        let first = queue.enqueue(participant(), now).unwrap();
        let second = queue.enqueue(participant(), now).unwrap();
        let third = queue.enqueue(participant(), now).unwrap();

        // Act + Assert: requests come out in the order they went in.
        assert_eq!(queue.admit_next(now).unwrap().ticket, first);
        assert!(queue.complete(first, now));
        assert_eq!(queue.admit_next(now).unwrap().ticket, second);
        assert!(queue.complete(second, now));
        assert_eq!(queue.admit_next(now).unwrap().ticket, third);
    }

    #[test]
    fn test_admit_next_is_a_no_op_while_the_slot_is_held() {
        let mut queue = controller();
        let now = Instant::now();
        queue.enqueue(participant(), now).unwrap();
        queue.enqueue(participant(), now).unwrap();
        queue.admit_next(now).unwrap();

        assert!(queue.admit_next(now).is_none());
        assert_eq!(queue.queue_len(), 1);
    }

    #[test]
    fn test_request_beyond_capacity_is_rejected_with_its_would_be_position() {
        // Arrange: capacity 3 fully occupied as one active + two queued.
        let mut queue = controller();
        let now = Instant::now();
        for _ in 0..3 {
            queue.enqueue(participant(), now).unwrap();
        }
        queue.admit_next(now).unwrap();
        assert_eq!(queue.occupancy(), 3);

        // Act
        let error = queue.enqueue(participant(), now).unwrap_err();

        // Assert: the reported position lies beyond the capacity, and the
        // wait estimate covers everyone ahead at the seeded 5s average.
        assert_eq!(error.would_be_position, 4);
        assert_eq!(error.capacity, 3);
        assert!(u32::from(error.would_be_position) > error.capacity as u32);
        assert_eq!(error.estimated_wait_secs, 20);
        assert_eq!(queue.occupancy(), 3, "rejected request must not be stored");
    }

    #[test]
    fn test_release_frees_the_slot_without_touching_the_average() {
        // Arrange
        let mut queue = controller();
        let now = Instant::now();
        let ticket = queue.enqueue(participant(), now).unwrap();
        queue.admit_next(now).unwrap();

        // Act: a timeout-style release, long after admission.
        let released = queue.release(ticket);

        // Assert
        assert!(released);
        assert!(queue.slot_free());
        assert_eq!(queue.average_service_time(), Duration::from_secs(5));
    }

    #[test]
    fn test_complete_blends_the_observed_service_time_into_the_average() {
        // Arrange
        let mut queue = controller();
        let t0 = Instant::now();
        let ticket = queue.enqueue(participant(), t0).unwrap();
        queue.admit_next(t0).unwrap();

        // Act: the handshake took 10 seconds against a 5 second seed.
        assert!(queue.complete(ticket, t0 + Duration::from_secs(10)));

        // Assert: 5 * 0.7 + 10 * 0.3 = 6.5 seconds.
        let average = queue.average_service_time().as_secs_f64();
        assert!((average - 6.5).abs() < 1e-9, "average was {average}");
        assert_eq!(queue.estimated_wait_secs(1), 7);
        assert_eq!(queue.estimated_wait_secs(2), 13);
    }

    #[test]
    fn test_stale_tickets_cannot_release_or_complete_the_slot() {
        // Arrange: admit and finish one request, then admit another.
        let mut queue = controller();
        let now = Instant::now();
        let old = queue.enqueue(participant(), now).unwrap();
        queue.admit_next(now).unwrap();
        queue.complete(old, now);
        let current = queue.enqueue(participant(), now).unwrap();
        queue.admit_next(now).unwrap();

        // Act + Assert: the old ticket, as a late timer would present it,
        // does nothing to the new occupant.
        assert!(!queue.release(old));
        assert!(!queue.complete(old, now));
        assert!(queue.is_active(current));
    }

    #[test]
    fn test_cancel_queued_shifts_positions_forward() {
        // Arrange
        let mut queue = controller();
        let now = Instant::now();
        let first = queue.enqueue(participant(), now).unwrap();
        let second = queue.enqueue(participant(), now).unwrap();
        let third = queue.enqueue(participant(), now).unwrap();
        assert_eq!(queue.position(second), Some(2));

        // Act
        let cancelled = queue.cancel_queued(second).unwrap();

        // Assert
        assert_eq!(cancelled.ticket, second);
        assert_eq!(queue.position(first), Some(1));
        assert_eq!(queue.position(third), Some(2));
        assert!(queue.cancel_queued(second).is_none(), "already removed");
    }

    #[test]
    fn test_queue_snapshot_reports_one_based_positions_and_waits() {
        let mut queue = controller();
        let now = Instant::now();
        queue.enqueue(participant(), now).unwrap();
        queue.admit_next(now).unwrap();
        let waiting_a = queue.enqueue(participant(), now).unwrap();
        let waiting_b = queue.enqueue(participant(), now).unwrap();

        let snapshot = queue.queue_snapshot();

        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].ticket, waiting_a);
        assert_eq!(snapshot[0].position, 1);
        assert_eq!(snapshot[0].estimated_wait_secs, 5);
        assert_eq!(snapshot[1].ticket, waiting_b);
        assert_eq!(snapshot[1].position, 2);
        assert_eq!(snapshot[1].estimated_wait_secs, 10);
    }

    #[test]
    fn test_drain_evicts_the_slot_and_the_whole_queue() {
        // Arrange
        let mut queue = controller();
        let now = Instant::now();
        let active = queue.enqueue(participant(), now).unwrap();
        queue.admit_next(now).unwrap();
        queue.enqueue(participant(), now).unwrap();
        queue.enqueue(participant(), now).unwrap();

        // Act
        let outcome = queue.drain();

        // Assert
        assert_eq!(outcome.evicted_count(), 3);
        assert_eq!(outcome.active.as_ref().map(|g| g.ticket), Some(active));
        assert_eq!(outcome.queued.len(), 2);
        assert!(queue.slot_free());
        assert_eq!(queue.queue_len(), 0);
        assert_eq!(queue.occupancy(), 0);
    }

    #[test]
    fn test_tickets_are_never_reused() {
        // Arrange
        let mut queue = controller();
        let now = Instant::now();

        // Act: churn the queue through enqueue/cancel/admit cycles.
        let a = queue.enqueue(participant(), now).unwrap();
        queue.cancel_queued(a).unwrap();
        let b = queue.enqueue(participant(), now).unwrap();
        queue.admit_next(now).unwrap();
        queue.release(b);
        let c = queue.enqueue(participant(), now).unwrap();

        // Assert: strictly increasing, no value handed out twice.
        assert!(a.value() < b.value());
        assert!(b.value() < c.value());
    }

    #[test]
    fn test_wait_estimate_uses_the_seed_before_any_handshake_finishes() {
        let queue = controller();

        assert_eq!(queue.estimated_wait_secs(1), 5);
        assert_eq!(queue.estimated_wait_secs(2), 10);
        assert_eq!(queue.estimated_wait_secs(4), 20);
    }
}

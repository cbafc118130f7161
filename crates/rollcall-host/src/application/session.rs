//! The session actor: single writer for everything mutable about a session.
//!
//! # Why an actor? (for beginners)
//!
//! A running session has a lot of moving state: the current code, the
//! admission queue, per-connection handshake contexts, armed deadline
//! timers.  Sharing that behind locks invites ordering bugs (two peers
//! admitted at once, a timer evicting a peer that just committed).  Instead
//! the host funnels *every* state change through one task that owns the
//! state outright and processes one [`SessionCommand`] at a time.  Network
//! readers, timers and the embedding application only ever talk to the
//! actor through its command channel.
//!
//! Deadline timers follow the same rule: a timer is just a spawned sleep
//! that posts `DeadlineExpired` back to the actor, tagged with the
//! [`QueueTicket`] it was armed for.  Tickets are never reused, so a timer
//! that fires after its handshake already finished no longer matches the
//! active ticket and is ignored.  Timers are never cancelled, only
//! outlived.
//!
//! The actor publishes [`SessionEvent`]s for the embedding application
//! (UI, logging) and speaks the wire protocol through the [`HostLink`]
//! trait, so the whole session lifecycle is testable against a fake link.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use rollcall_core::{
    protocol::messages::{
        commit_fail_reasons, reject_reasons, CodeOfferMessage, CommitAckMessage,
        CommitRequestMessage, CommitStatus, ErrorMessage, EvictReason, EvictedMessage,
        JoinAckMessage, JoinVerdict, ProtocolErrorCode, QueueUpdateMessage, RollcallMessage,
        SlotGrantedMessage, PROTOCOL_VERSION,
    },
    CommitChannel, FailureReason, HandshakeContext, HandshakePhase, ParticipantId, Session,
    SessionCode, SessionId, SessionStatus,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::admission::{ActiveGrant, AdmissionConfig, AdmissionController, QueueTicket};
use super::ledger::{AttendanceLedger, AttendanceStore, CommitError, FinalizationReport};

/// Identifies one accepted transport connection.  Assigned by the link
/// layer, opaque to the actor.
pub type ConnId = u64;

// ─────────────────────────────────────────────────────────────────────────────
// Link seam
// ─────────────────────────────────────────────────────────────────────────────

/// Error type for outbound link operations.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("connection {0} is gone")]
    ConnectionClosed(ConnId),
    #[error("send failed: {0}")]
    Io(String),
}

/// Trait for the host side of the wire.
///
/// Infrastructure implementations write framed messages to TCP sockets;
/// test implementations record calls.
#[async_trait]
pub trait HostLink: Send + Sync {
    /// Sends one message on `conn`.
    async fn send(&self, conn: ConnId, message: RollcallMessage) -> Result<(), LinkError>;

    /// Closes `conn`.  Closing an unknown connection is a no-op.
    async fn close(&self, conn: ConnId);
}

// ─────────────────────────────────────────────────────────────────────────────
// Events and commands
// ─────────────────────────────────────────────────────────────────────────────

/// Events the session publishes to the embedding application.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    SessionStarted {
        session: Session,
    },
    SessionEnded {
        session_id: SessionId,
        report: FinalizationReport,
    },
    /// Attendance was recorded, on either channel.
    ParticipantJoined {
        session_id: SessionId,
        participant_id: ParticipantId,
        display_name: String,
        channel: CommitChannel,
    },
    /// A waiting peer's queue position changed (including its first
    /// assignment).
    QueuePositionChanged {
        ticket: QueueTicket,
        participant_id: ParticipantId,
        position: u16,
        estimated_wait_secs: u32,
    },
    HandshakeFailed {
        participant_id: ParticipantId,
        reason: FailureReason,
    },
    /// The advertised code was replaced; earlier codes stop validating.
    CodeRotated {
        session_id: SessionId,
        code: SessionCode,
    },
}

/// Which deadline a timer was armed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadlineKind {
    /// The whole-handshake window granted with the slot.
    Handshake,
    /// The local-auth window armed when the peer confirms the code.
    LocalAuth,
}

/// Commands processed by the session actor, one at a time.
#[derive(Debug)]
pub enum SessionCommand {
    /// A peer sent JOIN_REQUEST on `conn`.
    Join {
        conn: ConnId,
        participant_id: ParticipantId,
        protocol_version: u8,
        display_name: String,
    },
    /// A peer answered the code offer.
    CodeConfirmed {
        conn: ConnId,
        session_id: SessionId,
        accepted: bool,
    },
    /// A peer asked to commit attendance.
    CommitRequested {
        conn: ConnId,
        request: CommitRequestMessage,
    },
    /// A peer asked to abort its attempt.
    Cancelled { conn: ConnId },
    /// The transport dropped.
    Disconnected { conn: ConnId },
    /// A deadline timer fired.  Ignored unless `ticket` still holds the
    /// active slot.
    DeadlineExpired { ticket: QueueTicket, kind: DeadlineKind },
    /// Replace the session code with a fresh one.
    RotateCode,
    /// Read-only state snapshot, also used as an ordering barrier in tests.
    Query {
        reply: oneshot::Sender<SessionSnapshot>,
    },
    /// End the session: drain the queue, flush the ledger, report.
    Stop {
        reply: oneshot::Sender<FinalizationReport>,
    },
}

/// Point-in-time view of the actor's state.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub session: Session,
    pub active_participant: Option<ParticipantId>,
    pub queue_len: usize,
    pub attendance_count: usize,
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration and service
// ─────────────────────────────────────────────────────────────────────────────

/// Tunables for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Active slot plus queue depth.
    pub queue_capacity: usize,
    /// Whole-handshake window granted with the slot.
    pub handshake_window: Duration,
    /// Window for the participant's local identity check.
    pub local_auth_window: Duration,
    /// Seed for wait estimates before any handshake completes.
    pub service_time_seed: Duration,
    /// Code rotation period; `None` keeps the starting code for the whole
    /// session.
    pub code_rotation: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 8,
            handshake_window: Duration::from_secs(30),
            local_auth_window: Duration::from_secs(20),
            service_time_seed: Duration::from_secs(5),
            code_rotation: Some(Duration::from_secs(300)),
        }
    }
}

/// Error type for session lifecycle operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    /// Only one session may run at a time.
    #[error("a session is already active")]
    AlreadyActive,
    #[error("no session is active")]
    NotActive,
    #[error("the session task is gone")]
    Closed,
}

/// Cheap handle to a running session.  Clonable; the link layer holds one
/// for posting commands and the fallback channel shares its event sender.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    session_id: SessionId,
    commands: mpsc::Sender<SessionCommand>,
    events: mpsc::Sender<SessionEvent>,
}

impl SessionHandle {
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Sender the link layer uses to post decoded peer messages.
    pub fn commands(&self) -> mpsc::Sender<SessionCommand> {
        self.commands.clone()
    }

    /// Event sender for collaborators that publish into the same stream
    /// (the manual fallback channel).
    pub fn events(&self) -> mpsc::Sender<SessionEvent> {
        self.events.clone()
    }

    /// Current state of the session.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Closed`] once the session has stopped.
    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(SessionCommand::Query { reply })
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    /// Ends the session.  Everyone still in the slot or queue is evicted
    /// with `SessionEnded`, the ledger is flushed, and the report says what
    /// was committed and what could not be written durably.
    pub async fn stop(&self) -> Result<FinalizationReport, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(SessionCommand::Stop { reply })
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)
    }
}

/// Owns the one-active-session rule and spawns the actor task.
#[derive(Default)]
pub struct SessionService {
    active: Option<SessionHandle>,
}

impl SessionService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a session with `code` and begins accepting joins.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::AlreadyActive`] while another session runs.
    pub fn start(
        &mut self,
        code: SessionCode,
        context_ref: impl Into<String>,
        link: Arc<dyn HostLink>,
        ledger: Arc<AttendanceLedger>,
        config: SessionConfig,
    ) -> Result<(SessionHandle, mpsc::Receiver<SessionEvent>), SessionError> {
        if self.active.is_some() {
            return Err(SessionError::AlreadyActive);
        }

        let session = Session::new(code, context_ref, now_secs());
        let (command_tx, command_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::channel(64);

        let handle = SessionHandle {
            session_id: session.id,
            commands: command_tx.clone(),
            events: event_tx.clone(),
        };

        let admission = AdmissionController::new(AdmissionConfig {
            capacity: config.queue_capacity,
            handshake_window: config.handshake_window,
            service_time_seed: config.service_time_seed,
        });

        let actor = SessionActor {
            store: ledger.store(),
            session,
            config,
            admission,
            ledger,
            link,
            events: event_tx,
            commands: command_tx,
            conns: HashMap::new(),
            tickets: HashMap::new(),
        };
        tokio::spawn(actor.run(command_rx));

        self.active = Some(handle.clone());
        Ok((handle, event_rx))
    }

    /// Handle to the running session, if any.
    pub fn active_handle(&self) -> Option<&SessionHandle> {
        self.active.as_ref()
    }

    /// Stops the running session and frees the service for the next one.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotActive`] when nothing is running.
    pub async fn stop(&mut self) -> Result<FinalizationReport, SessionError> {
        let handle = self.active.take().ok_or(SessionError::NotActive)?;
        handle.stop().await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Actor
// ─────────────────────────────────────────────────────────────────────────────

/// Handshake state for one connection.
struct PeerConn {
    participant_id: ParticipantId,
    display_name: String,
    ticket: QueueTicket,
    context: HandshakeContext,
    /// Last queue position reported to this peer, so updates only go out
    /// when the position actually changes.
    last_position: Option<u16>,
}

struct SessionActor {
    session: Session,
    config: SessionConfig,
    admission: AdmissionController,
    ledger: Arc<AttendanceLedger>,
    store: Arc<dyn AttendanceStore>,
    link: Arc<dyn HostLink>,
    events: mpsc::Sender<SessionEvent>,
    /// Self-handle for deadline timers and the rotation ticker.
    commands: mpsc::Sender<SessionCommand>,
    conns: HashMap<ConnId, PeerConn>,
    tickets: HashMap<QueueTicket, ConnId>,
}

impl SessionActor {
    async fn run(mut self, mut commands: mpsc::Receiver<SessionCommand>) {
        info!(
            session = %self.session.id,
            code = %self.session.code.grouped(),
            "session started"
        );
        self.persist_session().await;
        self.emit(SessionEvent::SessionStarted {
            session: self.session.clone(),
        })
        .await;

        if let Some(every) = self.config.code_rotation {
            let tx = self.commands.clone();
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(every).await;
                    if tx.send(SessionCommand::RotateCode).await.is_err() {
                        break;
                    }
                }
            });
        }

        while let Some(command) = commands.recv().await {
            match command {
                SessionCommand::Join {
                    conn,
                    participant_id,
                    protocol_version,
                    display_name,
                } => {
                    self.handle_join(conn, participant_id, protocol_version, display_name)
                        .await
                }
                SessionCommand::CodeConfirmed {
                    conn,
                    session_id,
                    accepted,
                } => self.handle_code_confirmed(conn, session_id, accepted).await,
                SessionCommand::CommitRequested { conn, request } => {
                    self.handle_commit_requested(conn, request).await
                }
                SessionCommand::Cancelled { conn } => self.handle_cancelled(conn).await,
                SessionCommand::Disconnected { conn } => self.handle_disconnected(conn).await,
                SessionCommand::DeadlineExpired { ticket, kind } => {
                    self.handle_deadline(ticket, kind).await
                }
                SessionCommand::RotateCode => self.handle_rotate_code().await,
                SessionCommand::Query { reply } => {
                    let _ = reply.send(self.snapshot().await);
                }
                SessionCommand::Stop { reply } => {
                    let report = self.shutdown().await;
                    let _ = reply.send(report);
                    break;
                }
            }
        }
    }

    // ── Join and admission ────────────────────────────────────────────────────

    async fn handle_join(
        &mut self,
        conn: ConnId,
        participant_id: ParticipantId,
        protocol_version: u8,
        display_name: String,
    ) {
        if protocol_version != PROTOCOL_VERSION {
            warn!(conn, version = protocol_version, "protocol version mismatch");
            self.send(
                conn,
                RollcallMessage::Error(ErrorMessage {
                    error_code: ProtocolErrorCode::ProtocolVersionMismatch,
                    description: format!(
                        "host speaks version {PROTOCOL_VERSION}, peer sent {protocol_version}"
                    ),
                }),
            )
            .await;
            self.link.close(conn).await;
            return;
        }

        if self.conns.contains_key(&conn) {
            self.send(
                conn,
                RollcallMessage::Error(ErrorMessage {
                    error_code: ProtocolErrorCode::UnexpectedMessage,
                    description: "connection already joined".to_string(),
                }),
            )
            .await;
            return;
        }

        let ticket = match self.admission.enqueue(participant_id, Instant::now()) {
            Ok(ticket) => ticket,
            Err(rejection) => {
                info!(
                    participant = %participant_id,
                    position = rejection.would_be_position,
                    "join rejected, queue full"
                );
                self.send(
                    conn,
                    RollcallMessage::JoinAck(JoinAckMessage {
                        verdict: JoinVerdict::Rejected,
                        position: rejection.would_be_position,
                        estimated_wait_secs: rejection.estimated_wait_secs,
                        reject_reason: reject_reasons::QUEUE_FULL,
                    }),
                )
                .await;
                self.link.close(conn).await;
                return;
            }
        };

        self.conns.insert(
            conn,
            PeerConn {
                participant_id,
                display_name: display_name.clone(),
                ticket,
                context: HandshakeContext::host(),
                last_position: None,
            },
        );
        self.tickets.insert(ticket, conn);
        debug!(participant = %participant_id, name = %display_name, %ticket, "join accepted");

        if self.admission.slot_free() {
            // The queue was empty, so the new ticket is admitted right away.
            if let Some(grant) = self.admission.admit_next(Instant::now()) {
                self.send(
                    conn,
                    RollcallMessage::JoinAck(JoinAckMessage {
                        verdict: JoinVerdict::Admitted,
                        position: 0,
                        estimated_wait_secs: 0,
                        reject_reason: reject_reasons::NONE,
                    }),
                )
                .await;
                self.begin_handshake(&grant).await;
            }
            return;
        }

        // Slot busy: report the queue position.
        let position = self.admission.position(ticket).unwrap_or(u16::MAX);
        let estimated_wait_secs = self.admission.estimated_wait_secs(position);
        if let Some(state) = self.conns.get_mut(&conn) {
            state.last_position = Some(position);
        }
        self.send(
            conn,
            RollcallMessage::JoinAck(JoinAckMessage {
                verdict: JoinVerdict::Queued,
                position,
                estimated_wait_secs,
                reject_reason: reject_reasons::NONE,
            }),
        )
        .await;
        self.emit(SessionEvent::QueuePositionChanged {
            ticket,
            participant_id,
            position,
            estimated_wait_secs,
        })
        .await;
    }

    /// Starts the code exchange for a freshly granted slot.  Returns false
    /// when the peer is already gone and the slot was re-released.
    async fn begin_handshake(&mut self, grant: &ActiveGrant) -> bool {
        let Some(&conn) = self.tickets.get(&grant.ticket) else {
            self.admission.release(grant.ticket);
            return false;
        };

        if let Some(state) = self.conns.get_mut(&conn) {
            if let Err(error) = state.context.advance(HandshakePhase::CodeExchange) {
                warn!(conn, %error, "connection in unexpected phase at slot grant");
            }
        }

        self.arm_deadline(grant.ticket, DeadlineKind::Handshake, self.config.handshake_window);
        self.send(
            conn,
            RollcallMessage::CodeOffer(CodeOfferMessage {
                session_id: self.session.id,
                code: self.session.code.clone(),
                local_auth_window_secs: secs_u32(self.config.local_auth_window),
            }),
        )
        .await;
        info!(participant = %grant.participant_id, ticket = %grant.ticket, "slot granted, code offered");
        true
    }

    /// Fills a freed slot from the queue head and tells everyone still
    /// waiting where they now stand.
    async fn pump_admissions(&mut self) {
        while let Some(grant) = self.admission.admit_next(Instant::now()) {
            if let Some(&conn) = self.tickets.get(&grant.ticket) {
                self.send(
                    conn,
                    RollcallMessage::SlotGranted(SlotGrantedMessage {
                        handshake_window_secs: secs_u32(self.config.handshake_window),
                    }),
                )
                .await;
            }
            if self.begin_handshake(&grant).await {
                break;
            }
            // Peer vanished before its grant; the slot is free again, try
            // the next ticket in line.
        }
        self.broadcast_queue_positions().await;
    }

    async fn broadcast_queue_positions(&mut self) {
        for queued in self.admission.queue_snapshot() {
            let Some(&conn) = self.tickets.get(&queued.ticket) else {
                continue;
            };
            let changed = self
                .conns
                .get_mut(&conn)
                .map(|state| {
                    let changed = state.last_position != Some(queued.position);
                    state.last_position = Some(queued.position);
                    changed
                })
                .unwrap_or(false);
            if !changed {
                continue;
            }
            self.send(
                conn,
                RollcallMessage::QueueUpdate(QueueUpdateMessage {
                    position: queued.position,
                    estimated_wait_secs: queued.estimated_wait_secs,
                }),
            )
            .await;
            self.emit(SessionEvent::QueuePositionChanged {
                ticket: queued.ticket,
                participant_id: queued.participant_id,
                position: queued.position,
                estimated_wait_secs: queued.estimated_wait_secs,
            })
            .await;
        }
    }

    // ── Code exchange and local auth ──────────────────────────────────────────

    async fn handle_code_confirmed(&mut self, conn: ConnId, session_id: SessionId, accepted: bool) {
        let Some((ticket, participant_id)) = self
            .conns
            .get(&conn)
            .map(|state| (state.ticket, state.participant_id))
        else {
            self.send(
                conn,
                RollcallMessage::Error(ErrorMessage {
                    error_code: ProtocolErrorCode::NotAdmitted,
                    description: "no handshake on this connection".to_string(),
                }),
            )
            .await;
            return;
        };

        if !self.admission.is_active(ticket) {
            // Confirm raced with an eviction; the peer has an EVICTED on
            // the wire already.
            debug!(%ticket, "late CODE_CONFIRM ignored");
            return;
        }

        if session_id != self.session.id || !accepted {
            info!(participant = %participant_id, "peer disputed the offered code");
            self.fail_attempt(
                conn,
                FailureReason::InvalidCode,
                Some((EvictReason::CodeMismatch, false)),
            )
            .await;
            return;
        }

        let advanced = self
            .conns
            .get_mut(&conn)
            .map(|state| state.context.advance(HandshakePhase::LocalAuth));
        match advanced {
            Some(Ok(())) => {
                self.arm_deadline(ticket, DeadlineKind::LocalAuth, self.config.local_auth_window);
                debug!(participant = %participant_id, "code confirmed, local auth window armed");
            }
            Some(Err(error)) => {
                warn!(conn, %error, "out-of-order CODE_CONFIRM");
                self.send(
                    conn,
                    RollcallMessage::Error(ErrorMessage {
                        error_code: ProtocolErrorCode::UnexpectedMessage,
                        description: "CODE_CONFIRM outside the code exchange".to_string(),
                    }),
                )
                .await;
            }
            None => {}
        }
    }

    // ── Commit ────────────────────────────────────────────────────────────────

    async fn handle_commit_requested(&mut self, conn: ConnId, request: CommitRequestMessage) {
        let Some((ticket, participant_id, phase, reached_commit)) =
            self.conns.get(&conn).map(|state| {
                (
                    state.ticket,
                    state.participant_id,
                    state.context.phase(),
                    state.context.has_reached_commit(),
                )
            })
        else {
            self.send(
                conn,
                RollcallMessage::Error(ErrorMessage {
                    error_code: ProtocolErrorCode::NotAdmitted,
                    description: "no handshake on this connection".to_string(),
                }),
            )
            .await;
            return;
        };

        if request.session_id != self.session.id {
            self.send(
                conn,
                RollcallMessage::CommitAck(CommitAckMessage {
                    status: CommitStatus::Failed,
                    recorded_at_secs: 0,
                    fail_reason: commit_fail_reasons::SESSION_ENDED,
                }),
            )
            .await;
            return;
        }
        if request.participant_id != participant_id {
            self.send(
                conn,
                RollcallMessage::Error(ErrorMessage {
                    error_code: ProtocolErrorCode::InvalidMessage,
                    description: "participant id does not match this connection".to_string(),
                }),
            )
            .await;
            return;
        }

        let holds_slot = self.admission.is_active(ticket);
        let first_commit = phase == HandshakePhase::LocalAuth && holds_slot;
        // A peer whose COMMIT_ACK got lost resends the request after its
        // slot was already released; the idempotent ledger answers it.
        let ack_lapse_retry = reached_commit;
        if !first_commit && !ack_lapse_retry {
            self.send(
                conn,
                RollcallMessage::CommitAck(CommitAckMessage {
                    status: CommitStatus::Failed,
                    recorded_at_secs: 0,
                    fail_reason: commit_fail_reasons::NOT_ADMITTED,
                }),
            )
            .await;
            return;
        }

        if first_commit {
            if let Some(state) = self.conns.get_mut(&conn) {
                let _ = state.context.advance(HandshakePhase::Committing);
            }
        }

        let result = self
            .ledger
            .commit(
                self.session.id,
                request.participant_id,
                &request.display_name,
                request.channel,
                now_secs(),
            )
            .await;

        match result {
            Ok(outcome) => {
                if let Some(state) = self.conns.get_mut(&conn) {
                    if state.context.phase() == HandshakePhase::Committing {
                        let _ = state.context.advance(HandshakePhase::Done);
                    }
                }
                let record = outcome.record();
                let status = if outcome.was_new() {
                    CommitStatus::Recorded
                } else {
                    CommitStatus::AlreadyRecorded
                };
                self.send(
                    conn,
                    RollcallMessage::CommitAck(CommitAckMessage {
                        status,
                        recorded_at_secs: record.committed_at_secs,
                        fail_reason: commit_fail_reasons::NONE,
                    }),
                )
                .await;
                if outcome.was_new() {
                    info!(
                        participant = %record.participant_id,
                        name = %record.display_name,
                        "attendance recorded"
                    );
                    self.emit(SessionEvent::ParticipantJoined {
                        session_id: self.session.id,
                        participant_id: record.participant_id,
                        display_name: record.display_name.clone(),
                        channel: record.channel,
                    })
                    .await;
                }
                if holds_slot {
                    self.admission.complete(ticket, Instant::now());
                    self.pump_admissions().await;
                }
                // The connection stays open so a lost ack can be re-served;
                // the peer closes once satisfied.
            }
            Err(CommitError::Persistence { record, source }) => {
                warn!(
                    participant = %record.participant_id,
                    error = %source,
                    "attendance held in memory only, durable write failed"
                );
                if let Some(state) = self.conns.get_mut(&conn) {
                    let _ = state.context.fail(FailureReason::Persistence);
                }
                self.send(
                    conn,
                    RollcallMessage::CommitAck(CommitAckMessage {
                        status: CommitStatus::Failed,
                        recorded_at_secs: 0,
                        fail_reason: commit_fail_reasons::PERSISTENCE,
                    }),
                )
                .await;
                // The in-memory entry is resident and blocks duplicates, so
                // the participant still counts as joined.
                self.emit(SessionEvent::ParticipantJoined {
                    session_id: self.session.id,
                    participant_id: record.participant_id,
                    display_name: record.display_name.clone(),
                    channel: record.channel,
                })
                .await;
                self.emit(SessionEvent::HandshakeFailed {
                    participant_id,
                    reason: FailureReason::Persistence,
                })
                .await;
                if holds_slot {
                    self.admission.release(ticket);
                    self.pump_admissions().await;
                }
            }
        }
    }

    // ── Failure paths ─────────────────────────────────────────────────────────

    async fn handle_cancelled(&mut self, conn: ConnId) {
        self.fail_attempt(
            conn,
            FailureReason::Cancelled,
            Some((EvictReason::Cancelled, true)),
        )
        .await;
    }

    async fn handle_disconnected(&mut self, conn: ConnId) {
        self.fail_attempt(conn, FailureReason::Transport, None).await;
    }

    async fn handle_deadline(&mut self, ticket: QueueTicket, kind: DeadlineKind) {
        if !self.admission.is_active(ticket) {
            debug!(%ticket, ?kind, "stale deadline timer ignored");
            return;
        }
        let Some(&conn) = self.tickets.get(&ticket) else {
            self.admission.release(ticket);
            return;
        };
        let evict_reason = match kind {
            DeadlineKind::Handshake => EvictReason::HandshakeTimeout,
            DeadlineKind::LocalAuth => EvictReason::LocalAuthTimeout,
        };
        info!(%ticket, ?kind, "deadline lapsed, evicting");
        self.fail_attempt(conn, FailureReason::TimedOut, Some((evict_reason, true)))
            .await;
    }

    /// Tears down one connection's attempt: terminal phase, slot or queue
    /// release, optional EVICTED notification, close, event, and admission
    /// of whoever is next.
    async fn fail_attempt(
        &mut self,
        conn: ConnId,
        reason: FailureReason,
        evict: Option<(EvictReason, bool)>,
    ) {
        let Some(mut state) = self.conns.remove(&conn) else {
            return;
        };
        self.tickets.remove(&state.ticket);

        let was_live = !state.context.is_terminal();
        if was_live {
            let _ = state.context.fail(reason);
        }

        if self.admission.is_active(state.ticket) {
            self.admission.release(state.ticket);
        } else {
            self.admission.cancel_queued(state.ticket);
        }

        if let Some((evict_reason, may_retry)) = evict {
            self.send(
                conn,
                RollcallMessage::Evicted(EvictedMessage {
                    reason: evict_reason,
                    may_retry,
                }),
            )
            .await;
        }
        self.link.close(conn).await;

        if was_live {
            info!(
                participant = %state.participant_id,
                name = %state.display_name,
                %reason,
                "handshake failed"
            );
            self.emit(SessionEvent::HandshakeFailed {
                participant_id: state.participant_id,
                reason,
            })
            .await;
        }

        self.pump_admissions().await;
    }

    // ── Rotation, snapshot, shutdown ──────────────────────────────────────────

    async fn handle_rotate_code(&mut self) {
        self.session.code = SessionCode::generate();
        info!(code = %self.session.code.grouped(), "session code rotated");
        self.persist_session().await;
        self.emit(SessionEvent::CodeRotated {
            session_id: self.session.id,
            code: self.session.code.clone(),
        })
        .await;
    }

    async fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session: self.session.clone(),
            active_participant: self.admission.active().map(|grant| grant.participant_id),
            queue_len: self.admission.queue_len(),
            attendance_count: self.ledger.len().await,
        }
    }

    async fn shutdown(&mut self) -> FinalizationReport {
        self.session.status = SessionStatus::Ended;

        // Evict everyone still in flight, slot and queue alike.
        let drained = self.admission.drain();
        let tickets: Vec<QueueTicket> = drained
            .active
            .iter()
            .map(|grant| grant.ticket)
            .chain(drained.queued.iter().map(|pending| pending.ticket))
            .collect();
        for ticket in tickets {
            let Some(conn) = self.tickets.remove(&ticket) else {
                continue;
            };
            let Some(mut state) = self.conns.remove(&conn) else {
                continue;
            };
            let _ = state.context.fail(FailureReason::SessionEnded);
            self.send(
                conn,
                RollcallMessage::Evicted(EvictedMessage {
                    reason: EvictReason::SessionEnded,
                    may_retry: false,
                }),
            )
            .await;
            self.link.close(conn).await;
            self.emit(SessionEvent::HandshakeFailed {
                participant_id: state.participant_id,
                reason: FailureReason::SessionEnded,
            })
            .await;
        }

        // Close lingering post-commit connections.
        let lingering: Vec<ConnId> = self.conns.keys().copied().collect();
        for conn in lingering {
            self.conns.remove(&conn);
            self.link.close(conn).await;
        }

        self.persist_session().await;
        let report = self.ledger.finalize().await;
        if report.unflushed > 0 {
            warn!(
                unflushed = report.unflushed,
                "attendance records held in memory only at shutdown"
            );
        }
        info!(
            committed = report.committed,
            unflushed = report.unflushed,
            "session ended"
        );
        self.emit(SessionEvent::SessionEnded {
            session_id: self.session.id,
            report,
        })
        .await;
        report
    }

    // ── Plumbing ──────────────────────────────────────────────────────────────

    fn arm_deadline(&self, ticket: QueueTicket, kind: DeadlineKind, after: Duration) {
        let tx = self.commands.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = tx
                .send(SessionCommand::DeadlineExpired { ticket, kind })
                .await;
        });
    }

    async fn send(&self, conn: ConnId, message: RollcallMessage) {
        if let Err(error) = self.link.send(conn, message).await {
            // The read pump will notice the dead socket and post
            // Disconnected; cleanup happens there.
            debug!(conn, %error, "send failed, awaiting disconnect");
        }
    }

    async fn emit(&self, event: SessionEvent) {
        if self.events.send(event).await.is_err() {
            debug!("event receiver dropped");
        }
    }

    async fn persist_session(&self) {
        if let Err(error) = self.store.save_session(&self.session).await {
            warn!(%error, "failed to persist session row");
        }
    }
}

pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

fn secs_u32(duration: Duration) -> u32 {
    duration.as_secs().min(u64::from(u32::MAX)) as u32
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

//! The wireless check-in use case.
//!
//! `CheckInFlow` drives the participant's half of the check-in
//! conversation: join (or wait in the queue), receive and confirm the
//! session code, pass the local identity check, and commit the attendance
//! record.  It owns a peer-side [`HandshakeContext`] per attempt and walks
//! it phase by phase, so the flow can only move the way the shared phase
//! graph allows.
//!
//! The transport and the confirmation prompt sit behind the [`PeerLink`]
//! and [`LocalAuthenticator`] traits and are injected at construction
//! time; the infrastructure layer provides the TCP and mock
//! implementations.
//!
//! # Retry rules
//!
//! A failed attempt is retried (with exponential backoff, bounded by the
//! configured attempt cap) only when the error is transient *and* the
//! attempt had not yet entered the commit phase.  Once a CommitRequest
//! may have left the device, a fresh attempt could double-report; the
//! host's ledger would swallow the duplicate, but the flow still stops
//! and lets the caller decide.  A Rejected verdict is never retried
//! automatically: the projected queue position is surfaced instead so
//! the participant can choose to try again later.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rollcall_core::protocol::messages::{
    commit_fail_reasons, reject_reasons, CodeConfirmMessage, CodeOfferMessage,
    CommitRequestMessage, CommitStatus, ErrorMessage, EvictReason, EvictedMessage,
    JoinAckMessage, JoinRequestMessage, JoinVerdict, PROTOCOL_VERSION,
};
use rollcall_core::{
    BackoffPolicy, CommitChannel, FailureReason, HandshakeContext, HandshakePhase, ParticipantId,
    RollcallMessage, SessionCode, SessionId, TransitionError,
};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, warn};

/// Buffered check-in events before the consumer must drain.
const EVENT_BUFFER: usize = 32;

// ─────────────────────────────────────────────────────────────────────────────
// Link seam
// ─────────────────────────────────────────────────────────────────────────────

/// Error type for the peer's transport.
#[derive(Debug, Error)]
pub enum LinkError {
    /// The TCP connect to the host's session port failed.
    #[error("failed to connect to {addr}: {source}")]
    ConnectFailed {
        addr: SocketAddr,
        source: std::io::Error,
    },
    /// A read or write on the established link failed.
    #[error("link i/o error: {0}")]
    Io(String),
    /// Bytes arrived that do not decode as a protocol message.
    #[error("protocol violation: {0}")]
    Protocol(String),
    /// The host closed the connection.
    #[error("connection closed by host")]
    Closed,
}

/// One established connection to a host.
///
/// Implementations frame and encode outgoing messages and decode incoming
/// ones; the flow never touches raw bytes.
#[async_trait]
pub trait PeerChannel: Send {
    async fn send(&mut self, message: RollcallMessage) -> Result<(), LinkError>;
    async fn recv(&mut self) -> Result<RollcallMessage, LinkError>;
    async fn close(&mut self);
}

/// Dials the host chosen during discovery.
///
/// Kept separate from [`PeerChannel`] so each retry attempt gets a fresh
/// connection.
#[async_trait]
pub trait PeerLink: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn PeerChannel>, LinkError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Local auth seam
// ─────────────────────────────────────────────────────────────────────────────

/// Outcome of the local identity check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthResult {
    Confirmed,
    Denied,
}

/// Trait for the participant's on-device identity confirmation (a screen
/// prompt, a biometric check).  The window for answering is dictated by
/// the host in the CODE_OFFER; the flow enforces it with a timeout around
/// this call.
#[async_trait]
pub trait LocalAuthenticator: Send + Sync {
    async fn authenticate(&self) -> AuthResult;
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Tunables and identity for one participant's check-in.
#[derive(Debug, Clone)]
pub struct CheckInConfig {
    /// Stable identifier of this device's participant.
    pub participant_id: ParticipantId,
    /// Name shown on the host's roster.
    pub display_name: String,
    /// Code the participant read off the host's screen.  `None` trusts
    /// whatever the host offers (discovery already pinned the host).
    pub expected_code: Option<SessionCode>,
    /// Connection retry policy across attempts.
    pub backoff: BackoffPolicy,
    /// How long to wait for any single host reply outside the queue.
    pub response_window: Duration,
    /// Longest the peer will sit in the admission queue.
    pub queue_wait_cap: Duration,
    /// How long to wait for a COMMIT_ACK before re-sending the commit.
    pub ack_window: Duration,
    /// Re-sends of an unacknowledged CommitRequest (first send excluded).
    pub commit_resend_cap: u8,
}

impl CheckInConfig {
    /// A config with the stock windows for the given participant.
    pub fn new(participant_id: ParticipantId, display_name: impl Into<String>) -> Self {
        Self {
            participant_id,
            display_name: display_name.into(),
            expected_code: None,
            backoff: BackoffPolicy::default(),
            response_window: Duration::from_secs(10),
            queue_wait_cap: Duration::from_secs(120),
            ack_window: Duration::from_secs(5),
            commit_resend_cap: 2,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────────────────

/// Progress notifications emitted while a check-in runs.
///
/// The binary logs these; a UI would render them.
#[derive(Debug, Clone)]
pub enum CheckInEvent {
    /// A connection attempt is starting (1-based).
    AttemptStarted { attempt: u8 },
    /// The host queued this peer behind earlier arrivals.
    Queued { position: u16, estimated_wait_secs: u32 },
    /// The queue position changed while waiting.
    QueueMoved { position: u16, estimated_wait_secs: u32 },
    /// The host granted the check-in slot.
    SlotGranted,
    /// The host offered the session code.
    CodeOffered { code: SessionCode },
    /// The offered code did not match what the participant expected.
    CodeDisputed { offered: SessionCode },
    /// The participant confirmed their identity locally.
    AuthConfirmed,
    /// The host acknowledged the attendance record.
    Committed {
        already_recorded: bool,
        recorded_at_secs: u64,
    },
    /// The host evicted this attempt.
    Evicted { reason: EvictReason, may_retry: bool },
    /// The host rejected the join outright; the projected position says
    /// what waiting would have looked like.
    Rejected { position: u16, estimated_wait_secs: u32 },
    /// An attempt ended without a commit.
    AttemptFailed {
        reason: FailureReason,
        will_retry: bool,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Error type for a check-in run.
#[derive(Debug, Error)]
pub enum CheckInError {
    /// The link failed while connecting, reading, or writing.
    #[error("transport failure: {0}")]
    Transport(LinkError),
    /// The host refused admission; the queue was full.
    #[error("join rejected (projected position {position}, estimated wait {estimated_wait_secs}s)")]
    Rejected {
        position: u16,
        estimated_wait_secs: u32,
    },
    /// The queue wait cap lapsed before a slot was granted.
    #[error("no slot granted within {0:?}")]
    QueueWaitExceeded(Duration),
    /// The offered code did not match the expected one; the offer was
    /// disputed and the attempt abandoned.
    #[error("offered code {offered} does not match expected {expected}")]
    CodeMismatch {
        offered: SessionCode,
        expected: SessionCode,
    },
    /// The participant denied the local identity check.
    #[error("local authentication rejected")]
    AuthRejected,
    /// A host reply did not arrive inside its window.
    #[error("host reply missing after {0:?}")]
    TimedOut(Duration),
    /// The host evicted the attempt.
    #[error("evicted by the host: {reason:?}")]
    Evicted { reason: EvictReason, may_retry: bool },
    /// The session ended before the check-in completed.
    #[error("the session has ended")]
    SessionEnded,
    /// The host could not durably record the attendance.  The host keeps
    /// the record in memory and still counts the participant; re-running
    /// later returns AlreadyRecorded.
    #[error("the host could not durably record the attendance")]
    Persistence,
    /// Every re-send of the commit went unanswered.  The commit may or
    /// may not have landed; a later re-run resolves it idempotently.
    #[error("no commit ack after {resends} re-sends")]
    CommitUnacknowledged { resends: u8 },
    /// The host sent something the protocol does not allow here.
    #[error("protocol violation: {0}")]
    Protocol(String),
    /// A phase transition the walk relies on was rejected.
    #[error("internal state error: {0}")]
    State(#[from] TransitionError),
}

impl CheckInError {
    /// Whether a fresh attempt is worth making.
    ///
    /// Transient transport and timing failures are; verdicts (rejection,
    /// dispute, denial) and host-side terminal states are not.  Evictions
    /// follow the host's `may_retry` flag.
    pub fn retryable(&self) -> bool {
        match self {
            CheckInError::Transport(_)
            | CheckInError::TimedOut(_)
            | CheckInError::QueueWaitExceeded(_) => true,
            CheckInError::Evicted { may_retry, .. } => *may_retry,
            _ => false,
        }
    }

    /// The domain failure this error pins on the handshake context.
    ///
    /// `None` for [`CheckInError::Rejected`]: a rejected join never
    /// started a handshake, so there is no attempt to fail.
    pub fn failure_reason(&self) -> Option<FailureReason> {
        let reason = match self {
            CheckInError::Transport(_) => FailureReason::Transport,
            CheckInError::Rejected { .. } => return None,
            CheckInError::QueueWaitExceeded(_) => FailureReason::TimedOut,
            CheckInError::CodeMismatch { .. } => FailureReason::InvalidCode,
            CheckInError::AuthRejected => FailureReason::AuthRejected,
            CheckInError::TimedOut(_) => FailureReason::TimedOut,
            CheckInError::SessionEnded => FailureReason::SessionEnded,
            CheckInError::Persistence => FailureReason::Persistence,
            CheckInError::CommitUnacknowledged { .. } => FailureReason::TimedOut,
            CheckInError::Protocol(_) => FailureReason::Transport,
            CheckInError::State(_) => FailureReason::Transport,
            CheckInError::Evicted { reason, .. } => match reason {
                EvictReason::HandshakeTimeout | EvictReason::LocalAuthTimeout => {
                    FailureReason::TimedOut
                }
                EvictReason::SessionEnded => FailureReason::SessionEnded,
                EvictReason::CodeMismatch => FailureReason::InvalidCode,
                EvictReason::Cancelled => FailureReason::Cancelled,
            },
        };
        Some(reason)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Receipt
// ─────────────────────────────────────────────────────────────────────────────

/// Proof of a completed check-in.
#[derive(Debug, Clone)]
pub struct CheckInReceipt {
    pub session_id: SessionId,
    pub participant_id: ParticipantId,
    /// Host-side commit timestamp (unix seconds).  On a duplicate this is
    /// the original record's timestamp, not the retry's.
    pub recorded_at_secs: u64,
    /// `true` when the host already held a record for this participant.
    pub already_recorded: bool,
    /// Connection attempts used, the successful one included.
    pub attempts: u8,
}

// ─────────────────────────────────────────────────────────────────────────────
// The flow
// ─────────────────────────────────────────────────────────────────────────────

/// The check-in use case.
///
/// Construct with [`CheckInFlow::new`], then call [`CheckInFlow::run`]
/// once.  Progress events arrive on the receiver returned by `new`.
pub struct CheckInFlow {
    link: Arc<dyn PeerLink>,
    authenticator: Arc<dyn LocalAuthenticator>,
    config: CheckInConfig,
    events: mpsc::Sender<CheckInEvent>,
}

impl CheckInFlow {
    pub fn new(
        link: Arc<dyn PeerLink>,
        authenticator: Arc<dyn LocalAuthenticator>,
        config: CheckInConfig,
    ) -> (Self, mpsc::Receiver<CheckInEvent>) {
        let (events, receiver) = mpsc::channel(EVENT_BUFFER);
        (
            Self {
                link,
                authenticator,
                config,
                events,
            },
            receiver,
        )
    }

    /// Runs the check-in to completion.
    ///
    /// Retries transient failures per the configured backoff; see the
    /// module docs for the exact rules.
    ///
    /// # Errors
    ///
    /// Returns the final attempt's [`CheckInError`] once no retry is
    /// possible.
    pub async fn run(self) -> Result<CheckInReceipt, CheckInError> {
        let attempt_cap = self.config.backoff.attempt_cap.max(1);
        let mut attempts_made: u8 = 0;
        loop {
            attempts_made += 1;
            info!(attempt = attempts_made, attempt_cap, "starting check-in attempt");
            self.emit(CheckInEvent::AttemptStarted {
                attempt: attempts_made,
            })
            .await;

            let mut context = HandshakeContext::peer();
            let error = match self.attempt(&mut context).await {
                Ok(mut receipt) => {
                    receipt.attempts = attempts_made;
                    return Ok(receipt);
                }
                Err(error) => error,
            };

            let will_retry =
                error.retryable() && !context.has_reached_commit() && attempts_made < attempt_cap;

            match &error {
                CheckInError::Rejected {
                    position,
                    estimated_wait_secs,
                } => {
                    info!(
                        position = *position,
                        estimated_wait_secs = *estimated_wait_secs,
                        "join rejected, not retrying"
                    );
                    self.emit(CheckInEvent::Rejected {
                        position: *position,
                        estimated_wait_secs: *estimated_wait_secs,
                    })
                    .await;
                }
                other => {
                    if let Some(reason) = other.failure_reason() {
                        if !context.is_terminal() {
                            let _ = context.fail(reason);
                        }
                        warn!(%reason, will_retry, "check-in attempt failed");
                        self.emit(CheckInEvent::AttemptFailed { reason, will_retry })
                            .await;
                    }
                }
            }

            if !will_retry {
                return Err(error);
            }
            if let Some(delay) = self.config.backoff.delay_before(attempts_made) {
                debug!(?delay, "backing off before the next attempt");
                tokio::time::sleep(delay).await;
            }
        }
    }

    /// One full walk of the peer-side handshake.
    async fn attempt(
        &self,
        context: &mut HandshakeContext,
    ) -> Result<CheckInReceipt, CheckInError> {
        // ── Connect and join ──────────────────────────────────────────────
        let mut channel = self.link.connect().await.map_err(CheckInError::Transport)?;
        context.advance(HandshakePhase::Connecting)?;

        channel
            .send(RollcallMessage::JoinRequest(JoinRequestMessage {
                participant_id: self.config.participant_id,
                protocol_version: PROTOCOL_VERSION,
                display_name: self.config.display_name.clone(),
            }))
            .await
            .map_err(CheckInError::Transport)?;

        // ── Admission ─────────────────────────────────────────────────────
        let ack = self.await_join_ack(&mut channel).await?;
        match ack.verdict {
            JoinVerdict::Admitted => {
                debug!("slot was free, admitted immediately");
                self.emit(CheckInEvent::SlotGranted).await;
            }
            JoinVerdict::Queued => {
                info!(
                    position = ack.position,
                    estimated_wait_secs = ack.estimated_wait_secs,
                    "queued behind earlier peers"
                );
                self.emit(CheckInEvent::Queued {
                    position: ack.position,
                    estimated_wait_secs: ack.estimated_wait_secs,
                })
                .await;
                self.wait_for_slot(&mut channel).await?;
            }
            JoinVerdict::Rejected => {
                if ack.reject_reason == reject_reasons::SESSION_ENDED {
                    return Err(CheckInError::SessionEnded);
                }
                return Err(CheckInError::Rejected {
                    position: ack.position,
                    estimated_wait_secs: ack.estimated_wait_secs,
                });
            }
        }

        // ── Code exchange ─────────────────────────────────────────────────
        let offer = self.await_code_offer(&mut channel).await?;
        context.advance(HandshakePhase::CodeExchange)?;
        if let Some(expected) = &self.config.expected_code {
            if *expected != offer.code {
                warn!(offered = %offer.code, expected = %expected, "disputing offered code");
                self.emit(CheckInEvent::CodeDisputed {
                    offered: offer.code.clone(),
                })
                .await;
                // Best effort: the host evicts and closes on a dispute.
                let _ = channel
                    .send(RollcallMessage::CodeConfirm(CodeConfirmMessage {
                        session_id: offer.session_id,
                        accepted: false,
                    }))
                    .await;
                channel.close().await;
                return Err(CheckInError::CodeMismatch {
                    offered: offer.code,
                    expected: expected.clone(),
                });
            }
        }
        self.emit(CheckInEvent::CodeOffered {
            code: offer.code.clone(),
        })
        .await;
        channel
            .send(RollcallMessage::CodeConfirm(CodeConfirmMessage {
                session_id: offer.session_id,
                accepted: true,
            }))
            .await
            .map_err(CheckInError::Transport)?;
        context.advance(HandshakePhase::LocalAuth)?;

        // ── Local auth ────────────────────────────────────────────────────
        // The host dictates the window; it is enforcing the same deadline
        // on its side and will evict on lapse.
        let window = Duration::from_secs(u64::from(offer.local_auth_window_secs));
        match timeout(window, self.authenticator.authenticate()).await {
            Err(_) => {
                let _ = channel.send(RollcallMessage::Cancel).await;
                return Err(CheckInError::TimedOut(window));
            }
            Ok(AuthResult::Denied) => {
                info!("participant denied the identity check, cancelling");
                let _ = channel.send(RollcallMessage::Cancel).await;
                return Err(CheckInError::AuthRejected);
            }
            Ok(AuthResult::Confirmed) => {
                self.emit(CheckInEvent::AuthConfirmed).await;
            }
        }
        context.advance(HandshakePhase::Committing)?;

        // ── Commit ────────────────────────────────────────────────────────
        self.commit(&mut channel, context, &offer).await
    }

    /// Waits for the host's verdict on the JoinRequest.
    async fn await_join_ack(
        &self,
        channel: &mut Box<dyn PeerChannel>,
    ) -> Result<JoinAckMessage, CheckInError> {
        loop {
            match recv_within(channel, self.config.response_window).await? {
                RollcallMessage::JoinAck(ack) => return Ok(ack),
                RollcallMessage::Evicted(evicted) => return Err(self.evicted(evicted).await),
                RollcallMessage::Error(error) => return Err(host_error(error)),
                other => warn!(
                    "ignoring unexpected {:?} while awaiting the join verdict",
                    other.message_type()
                ),
            }
        }
    }

    /// Sits in the admission queue until a SlotGranted arrives or the
    /// queue wait cap lapses.
    async fn wait_for_slot(&self, channel: &mut Box<dyn PeerChannel>) -> Result<(), CheckInError> {
        let deadline = Instant::now() + self.config.queue_wait_cap;
        loop {
            let message = match timeout_at(deadline, channel.recv()).await {
                Err(_) => return Err(CheckInError::QueueWaitExceeded(self.config.queue_wait_cap)),
                Ok(Err(error)) => return Err(CheckInError::Transport(error)),
                Ok(Ok(message)) => message,
            };
            match message {
                RollcallMessage::QueueUpdate(update) => {
                    debug!(
                        position = update.position,
                        estimated_wait_secs = update.estimated_wait_secs,
                        "queue position changed"
                    );
                    self.emit(CheckInEvent::QueueMoved {
                        position: update.position,
                        estimated_wait_secs: update.estimated_wait_secs,
                    })
                    .await;
                }
                RollcallMessage::SlotGranted(_) => {
                    info!("slot granted");
                    self.emit(CheckInEvent::SlotGranted).await;
                    return Ok(());
                }
                RollcallMessage::Evicted(evicted) => return Err(self.evicted(evicted).await),
                RollcallMessage::Error(error) => return Err(host_error(error)),
                other => warn!(
                    "ignoring unexpected {:?} while queued",
                    other.message_type()
                ),
            }
        }
    }

    /// Waits for the CodeOffer that follows admission.
    async fn await_code_offer(
        &self,
        channel: &mut Box<dyn PeerChannel>,
    ) -> Result<CodeOfferMessage, CheckInError> {
        loop {
            match recv_within(channel, self.config.response_window).await? {
                RollcallMessage::CodeOffer(offer) => return Ok(offer),
                // A queue update that raced the grant; stale, drop it.
                RollcallMessage::QueueUpdate(_) | RollcallMessage::SlotGranted(_) => {}
                RollcallMessage::Evicted(evicted) => return Err(self.evicted(evicted).await),
                RollcallMessage::Error(error) => return Err(host_error(error)),
                other => warn!(
                    "ignoring unexpected {:?} while awaiting the code offer",
                    other.message_type()
                ),
            }
        }
    }

    /// Sends the CommitRequest and waits for its ack, re-sending on
    /// silence up to the resend cap.  The host's commit is idempotent on
    /// (session, participant), so a re-send can never double-count.
    async fn commit(
        &self,
        channel: &mut Box<dyn PeerChannel>,
        context: &mut HandshakeContext,
        offer: &CodeOfferMessage,
    ) -> Result<CheckInReceipt, CheckInError> {
        let request = CommitRequestMessage {
            session_id: offer.session_id,
            participant_id: self.config.participant_id,
            display_name: self.config.display_name.clone(),
            channel: CommitChannel::Wireless,
        };
        channel
            .send(RollcallMessage::CommitRequest(request.clone()))
            .await
            .map_err(CheckInError::Transport)?;

        let mut resends: u8 = 0;
        loop {
            let message = match timeout(self.config.ack_window, channel.recv()).await {
                Err(_) => {
                    if resends >= self.config.commit_resend_cap {
                        return Err(CheckInError::CommitUnacknowledged { resends });
                    }
                    resends += 1;
                    context.record_retry();
                    warn!(resends, "commit ack missing, re-sending the commit");
                    channel
                        .send(RollcallMessage::CommitRequest(request.clone()))
                        .await
                        .map_err(CheckInError::Transport)?;
                    continue;
                }
                Ok(Err(error)) => return Err(CheckInError::Transport(error)),
                Ok(Ok(message)) => message,
            };
            match message {
                RollcallMessage::CommitAck(ack) => match ack.status {
                    CommitStatus::Recorded | CommitStatus::AlreadyRecorded => {
                        let already_recorded = ack.status == CommitStatus::AlreadyRecorded;
                        context.advance(HandshakePhase::Done)?;
                        info!(
                            recorded_at_secs = ack.recorded_at_secs,
                            already_recorded, "attendance committed"
                        );
                        self.emit(CheckInEvent::Committed {
                            already_recorded,
                            recorded_at_secs: ack.recorded_at_secs,
                        })
                        .await;
                        channel.close().await;
                        return Ok(CheckInReceipt {
                            session_id: offer.session_id,
                            participant_id: self.config.participant_id,
                            recorded_at_secs: ack.recorded_at_secs,
                            already_recorded,
                            attempts: 1,
                        });
                    }
                    CommitStatus::Failed => {
                        return Err(match ack.fail_reason {
                            commit_fail_reasons::PERSISTENCE => CheckInError::Persistence,
                            commit_fail_reasons::SESSION_ENDED => CheckInError::SessionEnded,
                            other => CheckInError::Protocol(format!(
                                "commit refused with reason {other:#04x}"
                            )),
                        });
                    }
                },
                RollcallMessage::Evicted(evicted) => return Err(self.evicted(evicted).await),
                RollcallMessage::Error(error) => return Err(host_error(error)),
                other => warn!(
                    "ignoring unexpected {:?} while awaiting the commit ack",
                    other.message_type()
                ),
            }
        }
    }

    /// Surfaces a host eviction as an event and an error.
    async fn evicted(&self, message: EvictedMessage) -> CheckInError {
        warn!(
            reason = ?message.reason,
            may_retry = message.may_retry,
            "evicted by the host"
        );
        self.emit(CheckInEvent::Evicted {
            reason: message.reason,
            may_retry: message.may_retry,
        })
        .await;
        CheckInError::Evicted {
            reason: message.reason,
            may_retry: message.may_retry,
        }
    }

    async fn emit(&self, event: CheckInEvent) {
        if self.events.send(event).await.is_err() {
            debug!("event receiver dropped");
        }
    }
}

/// Receives one message with a per-reply deadline.
async fn recv_within(
    channel: &mut Box<dyn PeerChannel>,
    window: Duration,
) -> Result<RollcallMessage, CheckInError> {
    match timeout(window, channel.recv()).await {
        Ok(Ok(message)) => Ok(message),
        Ok(Err(error)) => Err(CheckInError::Transport(error)),
        Err(_) => Err(CheckInError::TimedOut(window)),
    }
}

/// Maps a host ERROR message to a terminal protocol error.
fn host_error(message: ErrorMessage) -> CheckInError {
    CheckInError::Protocol(format!(
        "{:?}: {}",
        message.error_code, message.description
    ))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

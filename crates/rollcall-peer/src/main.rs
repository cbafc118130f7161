//! Rollcall peer entry point.
//!
//! Scans the local network for an advertising host, connects to the first
//! one heard, and runs a single wireless check-in with a mock
//! confirmation prompt standing in for the on-device identity check.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ start_host_scanner   -- UDP listener thread yielding DiscoveredHost
//!  └─ pick a host          -- first announcement wins; Ctrl-C aborts
//!  └─ CheckInFlow::run     -- TCP handshake, code exchange, commit
//!       └─ event logger    -- progress lines while the flow runs
//! ```
//!
//! # Usage
//!
//! ```text
//! rollcall-peer "Ada Lovelace" [AB1-2CD]
//! ```
//!
//! The optional second argument is the code the participant read off the
//! host's screen; when present the flow disputes any offer that differs.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::{bail, Context};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use rollcall_core::SessionCode;
use rollcall_peer::application::check_in::{
    CheckInConfig, CheckInEvent, CheckInFlow, LocalAuthenticator, PeerLink,
};
use rollcall_peer::infrastructure::link::TcpPeerLink;
use rollcall_peer::infrastructure::local_auth::MockLocalAuthenticator;
use rollcall_peer::infrastructure::scanner::start_host_scanner;

/// UDP port hosts advertise on.
const SCAN_PORT: u16 = 47700;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging.  Level is overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Arguments ─────────────────────────────────────────────────────────────
    let mut args = std::env::args().skip(1);
    let display_name = args.next().unwrap_or_else(|| "Anonymous".to_string());
    let expected_code = match args.next() {
        Some(raw) => Some(SessionCode::parse(&raw).context("invalid session code argument")?),
        None => None,
    };

    // A real deployment would persist the device's participant id; the demo
    // accepts one through the environment so repeat runs can exercise the
    // duplicate path.
    let participant_id = std::env::var("ROLLCALL_PARTICIPANT_ID")
        .ok()
        .and_then(|raw| Uuid::parse_str(&raw).ok())
        .unwrap_or_else(Uuid::new_v4);

    info!("Rollcall peer starting as {display_name} ({participant_id})");

    // ── Discovery ─────────────────────────────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    let mut hosts = start_host_scanner(SCAN_PORT, Arc::clone(&running))
        .context("failed to start the host scanner")?;

    info!("scanning for session announcements on UDP {SCAN_PORT}");
    let host = tokio::select! {
        found = hosts.recv() => match found {
            Some(host) => host,
            None => bail!("scanner stopped before any host was found"),
        },
        _ = tokio::signal::ctrl_c() => {
            running.store(false, Ordering::Relaxed);
            bail!("cancelled while scanning");
        }
    };
    // Announcements carry no signal strength; over UDP the first host heard
    // is the one answering fastest, which is the best proxy available.
    running.store(false, Ordering::Relaxed);

    let addr = host.session_addr();
    info!(
        "joining session {} ({}) at {addr}",
        host.session_id, host.host_name
    );

    // ── Check-in ──────────────────────────────────────────────────────────────
    let link: Arc<dyn PeerLink> = Arc::new(TcpPeerLink::new(addr));
    let authenticator = MockLocalAuthenticator::approving();

    let mut config = CheckInConfig::new(participant_id, display_name.clone());
    config.expected_code = expected_code;

    let (flow, events) = CheckInFlow::new(
        link,
        authenticator as Arc<dyn LocalAuthenticator>,
        config,
    );
    let event_logger = spawn_event_logger(events);

    let outcome = tokio::select! {
        outcome = flow.run() => outcome,
        _ = tokio::signal::ctrl_c() => {
            warn!("shutdown signal received, abandoning the attempt");
            let _ = event_logger.await;
            return Ok(());
        }
    };

    let receipt = outcome.context("check-in failed")?;
    let _ = event_logger.await;

    if receipt.already_recorded {
        println!(
            "{display_name} was already checked in to session {} (recorded at {})",
            receipt.session_id, receipt.recorded_at_secs
        );
    } else {
        println!(
            "{display_name} checked in to session {} (recorded at {}, {} attempt(s))",
            receipt.session_id, receipt.recorded_at_secs, receipt.attempts
        );
    }
    Ok(())
}

/// Logs each progress event as it happens.  Ends when the flow drops its
/// sender.
fn spawn_event_logger(mut events: mpsc::Receiver<CheckInEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                CheckInEvent::AttemptStarted { attempt } => {
                    info!("attempt {attempt} starting");
                }
                CheckInEvent::Queued {
                    position,
                    estimated_wait_secs,
                } => {
                    info!("queued at position {position}, estimated wait {estimated_wait_secs}s");
                }
                CheckInEvent::QueueMoved {
                    position,
                    estimated_wait_secs,
                } => {
                    info!("moved to position {position}, estimated wait {estimated_wait_secs}s");
                }
                CheckInEvent::SlotGranted => info!("check-in slot granted"),
                CheckInEvent::CodeOffered { code } => {
                    info!("host offered code {}", code.grouped());
                }
                CheckInEvent::CodeDisputed { offered } => {
                    warn!("host offered {}, which is not the expected code", offered.grouped());
                }
                CheckInEvent::AuthConfirmed => info!("identity confirmed"),
                CheckInEvent::Committed {
                    already_recorded,
                    recorded_at_secs,
                } => {
                    if already_recorded {
                        info!("already on the roster (recorded at {recorded_at_secs})");
                    } else {
                        info!("attendance recorded at {recorded_at_secs}");
                    }
                }
                CheckInEvent::Evicted { reason, may_retry } => {
                    warn!("evicted: {reason:?} (retry allowed: {may_retry})");
                }
                CheckInEvent::Rejected {
                    position,
                    estimated_wait_secs,
                } => {
                    warn!(
                        "join rejected; joining later would mean position {position}, \
                         about {estimated_wait_secs}s of waiting"
                    );
                }
                CheckInEvent::AttemptFailed { reason, will_retry } => {
                    warn!("attempt failed ({reason}); retrying: {will_retry}");
                }
            }
        }
    })
}

//! Rollcall host entry point.
//!
//! Wires together the session actor, the TCP session service, the UDP
//! advertiser, the attendance journal and the manual check-in console.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load_config()           -- TOML config or defaults
//!  └─ FileJournal + AttendanceLedger
//!  └─ SessionService::start   -- actor task owning all session state
//!       ├─ start_session_listener  (TCP accept loop + per-peer read pumps)
//!       ├─ start_advertiser        (UDP broadcast thread)
//!       ├─ spawn_event_logger      (JSON event lines)
//!       └─ run_console             (manual check-ins from stdin)
//! ```

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use rollcall_core::{ParticipantId, SessionCode};
use rollcall_host::application::fallback::{
    AuthResult, FallbackChannel, FallbackConfig, LocalAuthenticator,
};
use rollcall_host::application::ledger::{AttendanceLedger, AttendanceStore};
use rollcall_host::application::session::{HostLink, SessionService};
use rollcall_host::infrastructure::event_bridge::{
    spawn_event_logger, CheckInResultDto, CommandResult,
};
use rollcall_host::infrastructure::link::{
    start_advertiser, start_session_listener, AdvertiserConfig, ListenerConfig, TcpHostLink,
};
use rollcall_host::infrastructure::storage::{
    load_config, resolve_data_dir, AppConfig, FileJournal,
};

/// Local auth for console check-ins.  The operator typing the line is the
/// identity check, so every attempt confirms.
struct OperatorPresence;

#[async_trait]
impl LocalAuthenticator for OperatorPresence {
    async fn authenticate(&self) -> AuthResult {
        AuthResult::Confirmed
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging.  Level is overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Rollcall host starting");

    // ── Configuration ─────────────────────────────────────────────────────────
    let config = match load_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!("could not load config, using defaults: {e}");
            AppConfig::default()
        }
    };
    let data_dir = resolve_data_dir(&config).context("no data directory available")?;

    // ── Storage and ledger ────────────────────────────────────────────────────
    let journal = Arc::new(FileJournal::new(&data_dir));
    let ledger = Arc::new(AttendanceLedger::new(
        Arc::clone(&journal) as Arc<dyn AttendanceStore>,
    ));
    info!("attendance journal at {}", data_dir.display());

    // ── Session actor ─────────────────────────────────────────────────────────
    let link = TcpHostLink::new();
    let mut service = SessionService::new();
    let code = SessionCode::generate();
    let (handle, events) = service
        .start(
            code.clone(),
            config.session.context_ref.clone(),
            Arc::clone(&link) as Arc<dyn HostLink>,
            Arc::clone(&ledger),
            config.session.to_session_config(),
        )
        .context("failed to start session")?;

    println!("Session code: {}", code.grouped());

    // ── Network services ──────────────────────────────────────────────────────
    let bind_address: IpAddr = config
        .network
        .bind_address
        .parse()
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    let listener = start_session_listener(
        ListenerConfig {
            bind_address,
            session_port: config.network.session_port,
        },
        handle.commands(),
        Arc::clone(&link),
    )
    .await
    .context("failed to start session listener")?;

    let running = Arc::new(AtomicBool::new(true));
    let advertiser = start_advertiser(
        AdvertiserConfig {
            advertise_port: config.network.advertise_port,
            session_port: listener.local_addr.port(),
            host_name: config.host.host_name.clone(),
            interval: Duration::from_millis(config.network.advertise_interval_ms),
            ..AdvertiserConfig::default()
        },
        handle.session_id(),
        Arc::clone(&running),
    )
    .context("failed to start advertiser")?;

    // ── Event pump ────────────────────────────────────────────────────────────
    let event_logger = spawn_event_logger(events);

    // ── Manual check-in console ───────────────────────────────────────────────
    let fallback = FallbackChannel::new(
        Arc::clone(&ledger),
        Arc::new(OperatorPresence),
        handle.events(),
        FallbackConfig {
            local_auth_window: Duration::from_secs(config.session.local_auth_window_secs),
        },
    );

    info!("Rollcall host ready.  Type `CODE Name` to check a participant in manually; Ctrl-C ends the session.");

    tokio::select! {
        _ = run_console(&fallback) => {
            info!("console input closed");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    // ── Shutdown ──────────────────────────────────────────────────────────────
    running.store(false, Ordering::Relaxed);
    listener.shutdown();

    match service.stop().await {
        Ok(report) => {
            info!(
                "session ended: {} attendance record(s), {} unflushed",
                report.committed, report.unflushed
            );
            if !report.fully_flushed() {
                error!(
                    "{} record(s) could not be written durably and exist only in this process's memory",
                    report.unflushed
                );
            }
        }
        Err(e) => warn!("session was already gone at shutdown: {e}"),
    }

    // Release the remaining event senders so the logger can drain and end.
    drop(fallback);
    drop(handle);
    let _ = event_logger.await;
    if advertiser.join().is_err() {
        warn!("advertiser thread panicked");
    }

    info!("Rollcall host stopped");
    Ok(())
}

/// Reads `CODE Name` lines from stdin and checks participants in on the
/// manual channel.  Returns when stdin closes.
async fn run_console(fallback: &FallbackChannel) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    // Console check-ins have no device id.  Each distinct name gets one
    // generated id for the life of the process, so re-entering a name is
    // recognised as a duplicate rather than a second attendance.
    let mut participant_ids: HashMap<String, ParticipantId> = HashMap::new();

    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let parsed = line
            .split_once(char::is_whitespace)
            .map(|(code, name)| (code, name.trim()))
            .filter(|(_, name)| !name.is_empty());
        let Some((raw_code, name)) = parsed else {
            print_result(&CommandResult::<CheckInResultDto>::err(
                "usage: CODE Name  (e.g. `AB1-2CD Ada Lovelace`)",
            ));
            continue;
        };

        let participant_id = *participant_ids
            .entry(name.to_string())
            .or_insert_with(ParticipantId::new_v4);

        let result = match fallback.check_in(raw_code, participant_id, name).await {
            Ok(outcome) => CommandResult::ok(CheckInResultDto::from(&outcome)),
            Err(e) => CommandResult::err(e.to_string()),
        };
        print_result(&result);
    }
}

fn print_result<T: serde::Serialize>(result: &CommandResult<T>) {
    match serde_json::to_string(result) {
        Ok(json) => println!("{json}"),
        Err(e) => error!("failed to serialize command result: {e}"),
    }
}

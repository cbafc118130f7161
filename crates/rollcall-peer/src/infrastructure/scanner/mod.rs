//! UDP session scanner.
//!
//! The peer binds a UDP socket on the advertise port (default 47700) and
//! collects the ADVERTISE datagrams that hosts broadcast once a second.
//! On receiving a valid one it:
//!
//! 1. Checks the service id, dropping datagrams from unrelated software
//!    that happens to share the port.
//! 2. Resolves the host's TCP endpoint from the datagram's source address
//!    and the advertised session port.
//! 3. Emits a [`DiscoveredHost`] on the internal channel, once per
//!    session, so the application layer can pick one and connect.
//!
//! The scanner runs as a blocking loop on a dedicated thread to keep the
//! synchronous socket I/O off the Tokio runtime.
//!
//! The datagram never carries the session code.  Discovery only tells the
//! peer where to connect; proximity is proven later, over TCP, by the
//! code exchange.
//!
//! # Read timeout
//!
//! The socket is configured with a 500 ms read timeout, so `recv_from`
//! blocks for at most half a second before returning a timeout error.  On
//! each timeout the loop re-checks the `running` flag and exits cleanly
//! when the application is shutting down.

use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rollcall_core::{decode_message, RollcallMessage, SessionId, SERVICE_ID};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Error type for scanner startup.
#[derive(Debug, Error)]
pub enum ScanError {
    /// The UDP socket could not be bound.
    #[error("failed to bind scan socket on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// A host learned from an ADVERTISE datagram.
#[derive(Debug, Clone)]
pub struct DiscoveredHost {
    /// The session the host is running.
    pub session_id: SessionId,
    /// The human-readable name the host advertised.
    pub host_name: String,
    /// The source address the datagram arrived from.
    pub source: SocketAddr,
    /// The TCP port the host's session service listens on.
    pub session_port: u16,
}

impl DiscoveredHost {
    /// The TCP endpoint to dial for this host.
    pub fn session_addr(&self) -> SocketAddr {
        SocketAddr::new(self.source.ip(), self.session_port)
    }
}

/// Binds a UDP socket on `scan_port` and spawns a background thread that
/// collects incoming ADVERTISE datagrams.
///
/// Returns a receiver yielding each discovered session once.
///
/// # Errors
///
/// Returns [`ScanError::BindFailed`] if the socket cannot be bound.
pub fn start_host_scanner(
    scan_port: u16,
    running: Arc<AtomicBool>,
) -> Result<mpsc::Receiver<DiscoveredHost>, ScanError> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, scan_port));
    let socket = UdpSocket::bind(addr).map_err(|source| ScanError::BindFailed { addr, source })?;
    socket
        .set_read_timeout(Some(Duration::from_millis(500)))
        .ok();

    let (tx, rx) = mpsc::channel(64);

    std::thread::Builder::new()
        .name("rollcall-scan".to_string())
        .spawn(move || scan_loop(socket, tx, running))
        .expect("failed to spawn scanner thread");

    info!("host scanner listening on UDP {addr}");
    Ok(rx)
}

/// The main receive loop executed on the scanner thread.
fn scan_loop(socket: UdpSocket, tx: mpsc::Sender<DiscoveredHost>, running: Arc<AtomicBool>) {
    let mut buf = vec![0u8; 4096];
    // Hosts re-advertise every second; report each session once.
    let mut seen: HashSet<SessionId> = HashSet::new();

    while running.load(Ordering::Relaxed) {
        let (len, src) = match socket.recv_from(&mut buf) {
            Ok(pair) => pair,
            Err(e) if is_timeout_error(&e) => continue,
            Err(e) => {
                error!("scan recv error: {e}");
                continue;
            }
        };

        let datagram = &buf[..len];
        match decode_message(datagram) {
            Ok((RollcallMessage::Advertise(msg), _)) => {
                if msg.service_id != SERVICE_ID {
                    debug!(
                        "ignoring advertise for foreign service {} from {src}",
                        msg.service_id
                    );
                    continue;
                }
                if !seen.insert(msg.session_id) {
                    continue;
                }

                info!(
                    "discovered session {} ({}) at {src}, service on port {}",
                    msg.session_id, msg.host_name, msg.session_port
                );
                let host = DiscoveredHost {
                    session_id: msg.session_id,
                    host_name: msg.host_name,
                    source: src,
                    session_port: msg.session_port,
                };

                if tx.blocking_send(host).is_err() {
                    // Receiver dropped – the application is done scanning.
                    break;
                }
            }
            Ok((other, _)) => {
                warn!(
                    "unexpected message on scan port from {src}: {:?}",
                    other.message_type()
                );
            }
            Err(e) => {
                debug!("failed to decode scan datagram from {src}: {e}");
            }
        }
    }

    info!("host scanner stopped");
}

/// Returns `true` for OS timeout / would-block errors that should be retried.
fn is_timeout_error(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}

// ── Tests ─────────────────────────────────────────────────────────────────────

//! UDP session advertiser.
//!
//! While a session is active the host broadcasts one ADVERTISE datagram per
//! interval on the advertise port.  Peers listen on that port, filter on the
//! service id and pick a host without the participant typing anything.  The
//! datagram deliberately carries no session code; the code only travels over
//! an admitted TCP connection.
//!
//! # Why a dedicated thread? (for beginners)
//!
//! The advertiser uses a blocking `std::net::UdpSocket` on its own OS thread
//! instead of an async task.  Broadcast sends are fire-and-forget and happen
//! once a second; there is nothing to `await` and no backpressure to manage.
//! A plain thread with a shutdown flag is simpler to reason about than an
//! async task would be, and it keeps the Tokio runtime free for the session
//! actor and the TCP connections.
//!
//! The thread wakes every 250 ms to re-check the shutdown flag, so stopping
//! the advertiser takes at most a quarter of a second.

use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rollcall_core::{
    encode_message_now,
    protocol::messages::AdvertiseMessage,
    RollcallMessage, SequenceCounter, SessionId, SERVICE_ID,
};
use thiserror::Error;
use tracing::{error, info, trace, warn};

/// Error type for advertiser startup.
#[derive(Debug, Error)]
pub enum AdvertiseError {
    /// The send socket could not be bound.
    #[error("bind failed on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    /// `SO_BROADCAST` could not be enabled on the socket.
    #[error("could not enable broadcast on the advertise socket: {0}")]
    BroadcastUnavailable(#[source] std::io::Error),
}

/// Configuration for the session advertiser.
#[derive(Debug, Clone)]
pub struct AdvertiserConfig {
    /// UDP port peers listen on for ADVERTISE datagrams.
    pub advertise_port: u16,
    /// TCP port carried in the datagram, where the session service listens.
    pub session_port: u16,
    /// Human-readable host name shown in peer pick lists.
    pub host_name: String,
    /// Delay between consecutive datagrams.
    pub interval: Duration,
    /// Destination address.  The broadcast address by default; tests and
    /// point-to-point setups override it with a unicast address.
    pub destination: Ipv4Addr,
}

impl Default for AdvertiserConfig {
    fn default() -> Self {
        Self {
            advertise_port: 47700,
            session_port: 47701,
            host_name: "rollcall-host".to_string(),
            interval: Duration::from_millis(1000),
            destination: Ipv4Addr::BROADCAST,
        }
    }
}

/// Starts the advertiser thread for `session_id`.
///
/// Returns the thread's handle once the socket is bound and the loop is
/// running.  The thread keeps broadcasting until `running` is set to
/// `false`; callers join the handle after clearing the flag.
///
/// # Errors
///
/// Returns [`AdvertiseError`] if the socket cannot be bound or broadcast
/// cannot be enabled on it.
pub fn start_advertiser(
    config: AdvertiserConfig,
    session_id: SessionId,
    running: Arc<AtomicBool>,
) -> Result<std::thread::JoinHandle<()>, AdvertiseError> {
    let bind_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0));
    let socket =
        UdpSocket::bind(bind_addr).map_err(|source| AdvertiseError::BindFailed {
            addr: bind_addr,
            source,
        })?;
    socket
        .set_broadcast(true)
        .map_err(AdvertiseError::BroadcastUnavailable)?;

    info!(
        "advertising session {session_id} to {}:{} every {:?}",
        config.destination, config.advertise_port, config.interval
    );

    let handle = std::thread::Builder::new()
        .name("rollcall-advertise".to_string())
        .spawn(move || advertise_loop(socket, config, session_id, running))
        .expect("failed to spawn advertiser thread");

    Ok(handle)
}

/// Broadcast loop body, running on the advertiser thread.
fn advertise_loop(
    socket: UdpSocket,
    config: AdvertiserConfig,
    session_id: SessionId,
    running: Arc<AtomicBool>,
) {
    let seq = SequenceCounter::new();
    let destination = SocketAddr::from((config.destination, config.advertise_port));

    while running.load(Ordering::Relaxed) {
        let msg = RollcallMessage::Advertise(AdvertiseMessage {
            service_id: SERVICE_ID,
            session_id,
            host_name: config.host_name.clone(),
            session_port: config.session_port,
        });

        match encode_message_now(&msg, seq.next()) {
            Ok(bytes) => {
                if let Err(e) = socket.send_to(&bytes, destination) {
                    warn!("failed to send advertise datagram: {e}");
                } else {
                    trace!("advertised session {session_id} ({} bytes)", bytes.len());
                }
            }
            Err(e) => error!("failed to encode advertise message: {e}"),
        }

        sleep_while_running(config.interval, &running);
    }

    info!("session advertiser stopped");
}

/// Sleeps for `total`, waking every 250 ms to honour the shutdown flag.
fn sleep_while_running(total: Duration, running: &AtomicBool) {
    const SLICE: Duration = Duration::from_millis(250);

    let mut remaining = total;
    while !remaining.is_zero() && running.load(Ordering::Relaxed) {
        let step = remaining.min(SLICE);
        std::thread::sleep(step);
        remaining = remaining.saturating_sub(step);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::decode_message;
    use uuid::Uuid;

    #[test]
    fn test_default_config_uses_expected_ports() {
        // Arrange / Act
        let cfg = AdvertiserConfig::default();

        // Assert
        assert_eq!(cfg.advertise_port, 47700);
        assert_eq!(cfg.session_port, 47701);
        assert_eq!(cfg.interval, Duration::from_millis(1000));
        assert_eq!(cfg.destination, Ipv4Addr::BROADCAST);
    }

    #[test]
    fn test_advertiser_sends_decodable_datagrams() {
        // Arrange: a listener on an ephemeral loopback port stands in for a
        // scanning peer.  The destination override turns the broadcast into a
        // unicast send so the test does not depend on the host's routing.
        let listener = UdpSocket::bind("127.0.0.1:0").expect("bind listener");
        listener
            .set_read_timeout(Some(Duration::from_secs(2)))
            .expect("set timeout");
        let listen_port = listener.local_addr().expect("local addr").port();

        let session_id = Uuid::new_v4();
        let config = AdvertiserConfig {
            advertise_port: listen_port,
            session_port: 50123,
            host_name: "room-312".to_string(),
            interval: Duration::from_millis(50),
            destination: Ipv4Addr::LOCALHOST,
        };
        let running = Arc::new(AtomicBool::new(true));

        // Act
        start_advertiser(config, session_id, Arc::clone(&running)).expect("start advertiser");
        let mut buf = [0u8; 512];
        let (len, _from) = listener.recv_from(&mut buf).expect("datagram within timeout");
        running.store(false, Ordering::Relaxed);

        // Assert
        let (msg, consumed) = decode_message(&buf[..len]).expect("decodable datagram");
        assert_eq!(consumed, len, "datagram must contain exactly one message");
        match msg {
            RollcallMessage::Advertise(adv) => {
                assert_eq!(adv.service_id, SERVICE_ID);
                assert_eq!(adv.session_id, session_id);
                assert_eq!(adv.host_name, "room-312");
                assert_eq!(adv.session_port, 50123);
            }
            other => panic!("expected Advertise, got {other:?}"),
        }
    }

    #[test]
    fn test_sleep_while_running_returns_early_when_flag_cleared() {
        // Arrange
        let running = AtomicBool::new(false);
        let start = std::time::Instant::now();

        // Act: with the flag already cleared, a 10 s sleep must return at once.
        sleep_while_running(Duration::from_secs(10), &running);

        // Assert
        assert!(
            start.elapsed() < Duration::from_millis(200),
            "sleep must not wait out the full interval after shutdown"
        );
    }

    #[test]
    fn test_sleep_while_running_waits_out_short_intervals() {
        // Arrange
        let running = AtomicBool::new(true);
        let start = std::time::Instant::now();

        // Act
        sleep_while_running(Duration::from_millis(60), &running);

        // Assert
        assert!(start.elapsed() >= Duration::from_millis(55));
    }
}

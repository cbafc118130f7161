//! TCP session service: accepts peer connections and bridges them to the
//! session actor.
//!
//! Architecture:
//! - [`start_session_listener`] binds the session port and spawns an accept
//!   loop.  Every accepted socket gets a connection id.
//! - The read half of each socket is pumped by its own task, which decodes
//!   frames and forwards them to the actor as [`SessionCommand`]s.  When the
//!   stream ends the pump posts [`SessionCommand::Disconnected`].
//! - The write halves live in [`TcpHostLink`], the [`HostLink`]
//!   implementation the actor sends through.
//!
//! Framing follows the protocol header: each frame is a 24-byte header whose
//! bytes 4..8 carry the payload length, followed by that many payload bytes.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rollcall_core::{
    decode_message, encode_message_now,
    protocol::messages::HEADER_SIZE,
    RollcallMessage, SequenceCounter,
};
use thiserror::Error;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpListener,
    },
    sync::{mpsc, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::application::session::{ConnId, HostLink, LinkError, SessionCommand};

/// Upper bound accepted for a declared payload length.  Real payloads are a
/// few hundred bytes at most; anything larger is a corrupt or hostile frame.
const MAX_PAYLOAD_BYTES: usize = 64 * 1024;

/// Error type for session service startup.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The session port could not be bound.
    #[error("bind failed on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Configuration for the TCP session listener.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Address to bind.  `0.0.0.0` accepts peers on all interfaces.
    pub bind_address: IpAddr,
    /// TCP port for peer session connections.  Port 0 binds an ephemeral
    /// port, reported through [`SessionListener::local_addr`].
    pub session_port: u16,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            session_port: 47701,
        }
    }
}

// ── Outbound half ─────────────────────────────────────────────────────────────

/// Write half of one peer connection plus its outbound sequence counter.
struct ConnWriter {
    write_half: OwnedWriteHalf,
    seq: SequenceCounter,
}

/// [`HostLink`] implementation that frames messages onto peer TCP sockets.
///
/// Connection ids are assigned by the accept loop.  Each connection carries
/// its own sequence counter so peers can spot reordering per stream.
pub struct TcpHostLink {
    writers: Mutex<HashMap<ConnId, ConnWriter>>,
}

impl TcpHostLink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            writers: Mutex::new(HashMap::new()),
        })
    }

    /// Adopts the write half of a newly accepted socket.
    async fn register(&self, conn: ConnId, write_half: OwnedWriteHalf) {
        let mut writers = self.writers.lock().await;
        writers.insert(
            conn,
            ConnWriter {
                write_half,
                seq: SequenceCounter::new(),
            },
        );
    }

    /// Drops the write half after the read pump has finished.
    async fn deregister(&self, conn: ConnId) {
        let mut writers = self.writers.lock().await;
        writers.remove(&conn);
    }

    /// Number of currently registered connections.
    pub async fn connection_count(&self) -> usize {
        self.writers.lock().await.len()
    }
}

#[async_trait]
impl HostLink for TcpHostLink {
    async fn send(&self, conn: ConnId, message: RollcallMessage) -> Result<(), LinkError> {
        let mut writers = self.writers.lock().await;
        let writer = writers
            .get_mut(&conn)
            .ok_or(LinkError::ConnectionClosed(conn))?;

        let bytes = encode_message_now(&message, writer.seq.next())
            .map_err(|e| LinkError::Io(e.to_string()))?;
        writer
            .write_half
            .write_all(&bytes)
            .await
            .map_err(|e| LinkError::Io(e.to_string()))?;
        Ok(())
    }

    async fn close(&self, conn: ConnId) {
        let mut writers = self.writers.lock().await;
        if let Some(writer) = writers.remove(&conn) {
            let mut write_half = writer.write_half;
            // Shutdown flushes queued bytes and sends FIN; the peer's read
            // loop observes EOF and tears down its side.
            let _ = write_half.shutdown().await;
        }
    }
}

// ── Listener ──────────────────────────────────────────────────────────────────

/// Running session listener.
pub struct SessionListener {
    /// The actually bound address (resolves port 0).
    pub local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

impl SessionListener {
    /// Stops accepting new connections.  Established connections keep
    /// running until the session actor closes them.
    pub fn shutdown(&self) {
        self.accept_task.abort();
    }
}

/// Binds the session port and starts accepting peer connections.
///
/// Every decoded inbound message is forwarded on `commands`; outbound
/// traffic flows through `link`, which must be the same instance handed to
/// the session actor.
///
/// # Errors
///
/// Returns [`ServiceError::BindFailed`] if the port cannot be bound.
pub async fn start_session_listener(
    config: ListenerConfig,
    commands: mpsc::Sender<SessionCommand>,
    link: Arc<TcpHostLink>,
) -> Result<SessionListener, ServiceError> {
    let addr = SocketAddr::from((config.bind_address, config.session_port));
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ServiceError::BindFailed { addr, source })?;
    let local_addr = listener
        .local_addr()
        .map_err(|source| ServiceError::BindFailed { addr, source })?;

    info!("session service listening on {local_addr}");

    let accept_task = tokio::spawn(async move {
        let mut next_conn: ConnId = 1;
        loop {
            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    let conn = next_conn;
                    next_conn += 1;
                    debug!("accepted peer connection {conn} from {peer_addr}");

                    let (read_half, write_half) = stream.into_split();
                    link.register(conn, write_half).await;

                    let commands = commands.clone();
                    let link = Arc::clone(&link);
                    tokio::spawn(async move {
                        read_pump(conn, read_half, &commands).await;
                        link.deregister(conn).await;
                        let _ = commands.send(SessionCommand::Disconnected { conn }).await;
                        debug!("peer connection {conn} closed");
                    });
                }
                Err(e) => {
                    warn!("accept failed: {e}");
                    // Pause so a persistent accept error cannot spin the loop.
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    });

    Ok(SessionListener {
        local_addr,
        accept_task,
    })
}

/// Reads frames from one peer until EOF, a framing violation, or actor
/// shutdown, forwarding each decoded message as a command.
async fn read_pump(
    conn: ConnId,
    mut reader: OwnedReadHalf,
    commands: &mpsc::Sender<SessionCommand>,
) {
    loop {
        let mut frame = vec![0u8; HEADER_SIZE];
        if let Err(e) = reader.read_exact(&mut frame).await {
            if e.kind() != std::io::ErrorKind::UnexpectedEof {
                debug!("read error on connection {conn}: {e}");
            }
            break;
        }

        // Payload length sits at header bytes 4..8 (big-endian u32).
        let payload_len =
            u32::from_be_bytes([frame[4], frame[5], frame[6], frame[7]]) as usize;
        if payload_len > MAX_PAYLOAD_BYTES {
            warn!("connection {conn} declared a {payload_len}-byte payload; dropping it");
            break;
        }

        frame.resize(HEADER_SIZE + payload_len, 0);
        if payload_len > 0 {
            if let Err(e) = reader.read_exact(&mut frame[HEADER_SIZE..]).await {
                debug!("payload read error on connection {conn}: {e}");
                break;
            }
        }

        match decode_message(&frame) {
            Ok((message, _consumed)) => {
                let Some(command) = command_for(conn, message) else {
                    continue;
                };
                if commands.send(command).await.is_err() {
                    // The actor is gone; the session is over.
                    break;
                }
            }
            Err(e) => {
                warn!("undecodable frame from connection {conn}: {e}");
            }
        }
    }
}

/// Maps a decoded peer message to the actor command it triggers.
///
/// Host-to-peer message types arriving from a peer are protocol violations;
/// they are logged and dropped rather than fed to the actor.
fn command_for(conn: ConnId, message: RollcallMessage) -> Option<SessionCommand> {
    match message {
        RollcallMessage::JoinRequest(m) => Some(SessionCommand::Join {
            conn,
            participant_id: m.participant_id,
            protocol_version: m.protocol_version,
            display_name: m.display_name,
        }),
        RollcallMessage::CodeConfirm(m) => Some(SessionCommand::CodeConfirmed {
            conn,
            session_id: m.session_id,
            accepted: m.accepted,
        }),
        RollcallMessage::CommitRequest(m) => {
            Some(SessionCommand::CommitRequested { conn, request: m })
        }
        RollcallMessage::Cancel => Some(SessionCommand::Cancelled { conn }),
        other => {
            debug!(
                "ignoring unexpected {:?} from connection {conn}",
                other.message_type()
            );
            None
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::protocol::messages::{
        CodeConfirmMessage, JoinAckMessage, JoinRequestMessage, JoinVerdict, reject_reasons,
    };
    use tokio::net::TcpStream;
    use uuid::Uuid;

    fn join_request(participant_id: Uuid) -> RollcallMessage {
        RollcallMessage::JoinRequest(JoinRequestMessage {
            participant_id,
            protocol_version: rollcall_core::protocol::messages::PROTOCOL_VERSION,
            display_name: "Ada".to_string(),
        })
    }

    // ── command_for mapping ───────────────────────────────────────────────────

    #[test]
    fn test_command_for_maps_join_request() {
        // Arrange
        let participant_id = Uuid::new_v4();

        // Act
        let command = command_for(7, join_request(participant_id));

        // Assert
        match command {
            Some(SessionCommand::Join {
                conn,
                participant_id: got,
                display_name,
                ..
            }) => {
                assert_eq!(conn, 7);
                assert_eq!(got, participant_id);
                assert_eq!(display_name, "Ada");
            }
            other => panic!("expected Join, got {other:?}"),
        }
    }

    #[test]
    fn test_command_for_maps_code_confirm() {
        // Arrange
        let session_id = Uuid::new_v4();
        let msg = RollcallMessage::CodeConfirm(CodeConfirmMessage {
            session_id,
            accepted: false,
        });

        // Act / Assert
        match command_for(3, msg) {
            Some(SessionCommand::CodeConfirmed {
                conn,
                session_id: got,
                accepted,
            }) => {
                assert_eq!(conn, 3);
                assert_eq!(got, session_id);
                assert!(!accepted);
            }
            other => panic!("expected CodeConfirmed, got {other:?}"),
        }
    }

    #[test]
    fn test_command_for_drops_host_to_peer_messages() {
        // A JoinAck can only legitimately travel host → peer.
        let msg = RollcallMessage::JoinAck(JoinAckMessage {
            verdict: JoinVerdict::Admitted,
            position: 0,
            estimated_wait_secs: 0,
            reject_reason: reject_reasons::NONE,
        });

        assert!(command_for(1, msg).is_none());
    }

    // ── Listener and pump over real sockets ───────────────────────────────────

    #[tokio::test]
    async fn test_listener_forwards_join_and_disconnect_commands() {
        // Arrange
        let (command_tx, mut command_rx) = mpsc::channel(16);
        let link = TcpHostLink::new();
        let config = ListenerConfig {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            session_port: 0,
        };
        let listener = start_session_listener(config, command_tx, Arc::clone(&link))
            .await
            .expect("listener starts");

        let participant_id = Uuid::new_v4();
        let mut stream = TcpStream::connect(listener.local_addr)
            .await
            .expect("connect");
        let bytes = encode_message_now(&join_request(participant_id), 0).expect("encode");

        // Act
        stream.write_all(&bytes).await.expect("send join");
        let first = command_rx.recv().await.expect("join command");
        drop(stream);
        let second = command_rx.recv().await.expect("disconnect command");

        // Assert
        match first {
            SessionCommand::Join {
                conn,
                participant_id: got,
                ..
            } => {
                assert_eq!(conn, 1, "first accepted connection gets id 1");
                assert_eq!(got, participant_id);
            }
            other => panic!("expected Join, got {other:?}"),
        }
        assert!(matches!(second, SessionCommand::Disconnected { conn: 1 }));
        assert_eq!(
            link.connection_count().await,
            0,
            "writer must be dropped after disconnect"
        );

        listener.shutdown();
    }

    #[tokio::test]
    async fn test_link_send_frames_messages_onto_the_socket() {
        // Arrange: hand-roll an accept so the write half can be registered
        // under a known connection id.
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let link = TcpHostLink::new();

        let mut client = TcpStream::connect(addr).await.expect("connect");
        let (server_stream, _) = listener.accept().await.expect("accept");
        let (_server_read, server_write) = server_stream.into_split();
        link.register(9, server_write).await;

        // Act
        link.send(9, RollcallMessage::Cancel).await.expect("send");

        let mut frame = vec![0u8; HEADER_SIZE];
        client.read_exact(&mut frame).await.expect("read header");
        let payload_len =
            u32::from_be_bytes([frame[4], frame[5], frame[6], frame[7]]) as usize;
        frame.resize(HEADER_SIZE + payload_len, 0);
        if payload_len > 0 {
            client
                .read_exact(&mut frame[HEADER_SIZE..])
                .await
                .expect("read payload");
        }

        // Assert
        let (msg, _) = decode_message(&frame).expect("decode");
        assert_eq!(msg, RollcallMessage::Cancel);
    }

    #[tokio::test]
    async fn test_link_close_sends_fin_and_forgets_the_connection() {
        // Arrange
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let link = TcpHostLink::new();

        let mut client = TcpStream::connect(addr).await.expect("connect");
        let (server_stream, _) = listener.accept().await.expect("accept");
        let (_server_read, server_write) = server_stream.into_split();
        link.register(4, server_write).await;

        // Act
        link.close(4).await;

        // Assert: the peer observes EOF, and further sends fail fast.
        let mut buf = [0u8; 8];
        let n = client.read(&mut buf).await.expect("read after close");
        assert_eq!(n, 0, "peer must see EOF after close");

        let err = link.send(4, RollcallMessage::Cancel).await.unwrap_err();
        assert!(matches!(err, LinkError::ConnectionClosed(4)));
    }

    #[tokio::test]
    async fn test_send_to_unknown_connection_fails() {
        // Arrange
        let link = TcpHostLink::new();

        // Act
        let err = link.send(42, RollcallMessage::Cancel).await.unwrap_err();

        // Assert
        assert!(matches!(err, LinkError::ConnectionClosed(42)));
    }

    #[tokio::test]
    async fn test_listener_reports_bind_conflict() {
        // Arrange: occupy a port, then try to bind the listener to it.
        let occupier = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let taken_port = occupier.local_addr().expect("addr").port();
        let (command_tx, _command_rx) = mpsc::channel(4);
        let config = ListenerConfig {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            session_port: taken_port,
        };

        // Act
        let result = start_session_listener(config, command_tx, TcpHostLink::new()).await;

        // Assert
        match result {
            Err(ServiceError::BindFailed { addr, .. }) => {
                assert_eq!(addr.port(), taken_port);
            }
            Ok(_) => panic!("binding an occupied port must fail"),
        }
    }

    #[tokio::test]
    async fn test_pump_drops_oversized_frames() {
        // Arrange
        let (command_tx, mut command_rx) = mpsc::channel(4);
        let link = TcpHostLink::new();
        let config = ListenerConfig {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            session_port: 0,
        };
        let listener = start_session_listener(config, command_tx, link)
            .await
            .expect("listener starts");
        let mut stream = TcpStream::connect(listener.local_addr)
            .await
            .expect("connect");

        // Act: a syntactically valid header declaring a huge payload.
        let mut frame = encode_message_now(&RollcallMessage::Cancel, 0).expect("encode");
        frame[4..8].copy_from_slice(&(u32::MAX).to_be_bytes());
        stream.write_all(&frame).await.expect("send bogus frame");

        // Assert: the connection is dropped without a decoded command.
        let command = command_rx.recv().await.expect("command");
        assert!(
            matches!(command, SessionCommand::Disconnected { .. }),
            "expected Disconnected, got {command:?}"
        );

        listener.shutdown();
    }
}

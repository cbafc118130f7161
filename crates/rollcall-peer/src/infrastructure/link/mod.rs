//! TCP peer link: the wire between this peer and a host's session service.
//!
//! [`TcpPeerLink`] implements the application layer's `PeerLink` seam.
//! Each `connect` dials a fresh socket and hands back a
//! [`TcpPeerChannel`] that frames outgoing messages and decodes incoming
//! ones, so the check-in flow never touches raw bytes.
//!
//! Framing follows the protocol header: each frame is a 24-byte header
//! whose bytes 4..8 carry the payload length, followed by that many
//! payload bytes.

use std::net::SocketAddr;

use async_trait::async_trait;
use rollcall_core::{
    decode_message, encode_message_now, protocol::messages::HEADER_SIZE, RollcallMessage,
    SequenceCounter,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
};
use tracing::debug;

use crate::application::check_in::{LinkError, PeerChannel, PeerLink};

/// Upper bound accepted for a declared payload length.  Real payloads are a
/// few hundred bytes at most; anything larger is a corrupt or hostile frame.
const MAX_PAYLOAD_BYTES: usize = 64 * 1024;

/// Dials a fixed host endpoint, usually taken from a scanner result.
pub struct TcpPeerLink {
    addr: SocketAddr,
}

impl TcpPeerLink {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }
}

#[async_trait]
impl PeerLink for TcpPeerLink {
    async fn connect(&self) -> Result<Box<dyn PeerChannel>, LinkError> {
        let stream =
            TcpStream::connect(self.addr)
                .await
                .map_err(|source| LinkError::ConnectFailed {
                    addr: self.addr,
                    source,
                })?;
        debug!("connected to host at {}", self.addr);

        let (read_half, write_half) = stream.into_split();
        Ok(Box::new(TcpPeerChannel {
            read_half,
            write_half,
            seq: SequenceCounter::new(),
        }))
    }
}

/// One framed TCP connection to a host.
pub struct TcpPeerChannel {
    read_half: OwnedReadHalf,
    write_half: OwnedWriteHalf,
    seq: SequenceCounter,
}

#[async_trait]
impl PeerChannel for TcpPeerChannel {
    async fn send(&mut self, message: RollcallMessage) -> Result<(), LinkError> {
        let bytes = encode_message_now(&message, self.seq.next())
            .map_err(|e| LinkError::Io(e.to_string()))?;
        self.write_half
            .write_all(&bytes)
            .await
            .map_err(|e| LinkError::Io(e.to_string()))?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<RollcallMessage, LinkError> {
        let mut frame = vec![0u8; HEADER_SIZE];
        read_exact_or_closed(&mut self.read_half, &mut frame).await?;

        // Payload length sits at header bytes 4..8 (big-endian u32).
        let payload_len = u32::from_be_bytes([frame[4], frame[5], frame[6], frame[7]]) as usize;
        if payload_len > MAX_PAYLOAD_BYTES {
            return Err(LinkError::Protocol(format!(
                "declared payload of {payload_len} bytes exceeds the frame limit"
            )));
        }

        frame.resize(HEADER_SIZE + payload_len, 0);
        if payload_len > 0 {
            read_exact_or_closed(&mut self.read_half, &mut frame[HEADER_SIZE..]).await?;
        }

        let (message, _consumed) =
            decode_message(&frame).map_err(|e| LinkError::Protocol(e.to_string()))?;
        Ok(message)
    }

    async fn close(&mut self) {
        // Shutdown flushes queued bytes and sends FIN; the host's read
        // pump observes EOF and reports the disconnect to the actor.
        let _ = self.write_half.shutdown().await;
    }
}

/// Fills `buf` from the read half, mapping a clean EOF to [`LinkError::Closed`].
async fn read_exact_or_closed(reader: &mut OwnedReadHalf, buf: &mut [u8]) -> Result<(), LinkError> {
    reader.read_exact(buf).await.map(|_| ()).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            LinkError::Closed
        } else {
            LinkError::Io(e.to_string())
        }
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

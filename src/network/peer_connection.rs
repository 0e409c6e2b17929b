//! Peer Connection Management
//! A registered link to one peer, and the worker that drains its inbound frames.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::WireError;
use crate::network::address::PeerAddress;
use crate::network::message::Message;
use crate::network::wire;
use crate::node::NodeContext;

pub type PeerWriter = BufWriter<Box<dyn AsyncWrite + Send + Unpin>>;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionDirection {
    Inbound,
    Outbound,
}

impl fmt::Display for ConnectionDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionDirection::Inbound => write!(f, "inbound"),
            ConnectionDirection::Outbound => write!(f, "outbound"),
        }
    }
}

/// Write side of a live link plus the token that stops its worker.
///
/// The registry holds an `Arc` to this for fan-out; the worker owns the read half.
pub struct PeerConnection {
    id: u64,
    addr: PeerAddress,
    direction: ConnectionDirection,
    writer: Mutex<PeerWriter>,
    cancel: CancellationToken,
    frames_sent: AtomicU64,
}

impl PeerConnection {
    pub fn new<W>(
        addr: PeerAddress,
        direction: ConnectionDirection,
        writer: W,
        cancel: CancellationToken,
    ) -> Arc<Self>
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let boxed: Box<dyn AsyncWrite + Send + Unpin> = Box::new(writer);
        Arc::new(Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            addr,
            direction,
            writer: Mutex::new(BufWriter::new(boxed)),
            cancel,
            frames_sent: AtomicU64::new(0),
        })
    }

    /// Unique per connection, so a stale worker never evicts a newer link to the same address.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn addr(&self) -> &PeerAddress {
        &self.addr
    }

    pub fn direction(&self) -> ConnectionDirection {
        self.direction
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    pub async fn send_frame(&self, frame: &[u8]) -> Result<(), WireError> {
        let mut writer = self.writer.lock().await;
        wire::write_frame(&mut *writer, frame).await?;
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub async fn send(&self, message: &Message) -> Result<(), WireError> {
        let frame = wire::serialize_frame(message)?;
        self.send_frame(&frame).await
    }

    /// Signal the worker to stop. The worker closes the stream on its way out.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    async fn shutdown_writer(&self) {
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            trace!("Shutdown of stream to {} failed: {}", self.addr, e);
        }
    }
}

impl fmt::Debug for PeerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerConnection")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("direction", &self.direction)
            .finish()
    }
}

/// Receive loop for one registered connection.
///
/// Runs until end-of-stream, an undecodable frame, or cancellation. On exit
/// the connection is evicted from the registry; the disconnect callback fires
/// only if this worker was the one to evict it.
pub(crate) async fn run_worker<R>(conn: Arc<PeerConnection>, mut reader: R, ctx: Arc<NodeContext>)
where
    R: AsyncRead + Unpin + Send,
{
    let addr = conn.addr().clone();
    let max_frame_size = ctx.settings.max_frame_size;
    debug!("📥 Worker started for {} ({})", addr, conn.direction());

    let reason = loop {
        let result = tokio::select! {
            _ = conn.cancel.cancelled() => break "closed locally",
            result = wire::read_message(&mut reader, max_frame_size) => result,
        };

        match result {
            Ok(Some(Message::HandshakeResponse(hello))) => {
                let added = ctx.registry.merge_known(hello.known_peers);
                debug!(
                    "🤝 Handshake response from {} ({}), learned {} peer(s)",
                    addr, hello.nickname, added
                );
            }
            Ok(Some(Message::Handshake(_))) => {
                debug!("Ignoring repeated handshake from {}", addr);
            }
            Ok(Some(message)) => {
                ctx.router.deliver(message, Some(&addr)).await;
            }
            Ok(None) => break "end of stream",
            Err(e) => {
                warn!("⚠️ Bad frame from {}: {}", addr, e);
                break "decode failure";
            }
        }
    };

    info!("🔌 Peer {} disconnected ({})", addr, reason);
    conn.close();
    conn.shutdown_writer().await;
    ctx.router.evict(&conn);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::wire::DEFAULT_MAX_FRAME_SIZE;

    #[tokio::test]
    async fn test_send_writes_frames() {
        let (local, mut remote) = tokio::io::duplex(4096);
        let conn = PeerConnection::new(
            PeerAddress::new("127.0.0.1", 9001),
            ConnectionDirection::Outbound,
            local,
            CancellationToken::new(),
        );

        let msg = Message::chat("hello");
        conn.send(&msg).await.unwrap();
        assert_eq!(conn.frames_sent(), 1);

        let received = wire::read_message(&mut remote, DEFAULT_MAX_FRAME_SIZE)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, msg);
    }

    #[tokio::test]
    async fn test_send_to_dropped_peer_fails() {
        let (local, remote) = tokio::io::duplex(64);
        drop(remote);
        let conn = PeerConnection::new(
            PeerAddress::new("127.0.0.1", 9001),
            ConnectionDirection::Inbound,
            local,
            CancellationToken::new(),
        );

        assert!(conn.send(&Message::chat("lost")).await.is_err());
        assert_eq!(conn.frames_sent(), 0);
    }

    #[test]
    fn test_ids_are_distinct() {
        let make = || {
            let (local, _remote) = tokio::io::duplex(8);
            PeerConnection::new(
                PeerAddress::new("127.0.0.1", 9001),
                ConnectionDirection::Inbound,
                local,
                CancellationToken::new(),
            )
        };
        assert_ne!(make().id(), make().id());
    }

    #[test]
    fn test_close_cancels() {
        let (local, _remote) = tokio::io::duplex(8);
        let token = CancellationToken::new();
        let conn = PeerConnection::new(
            PeerAddress::new("127.0.0.1", 9001),
            ConnectionDirection::Inbound,
            local,
            token.clone(),
        );
        assert!(!conn.is_closed());
        conn.close();
        assert!(token.is_cancelled());
    }
}

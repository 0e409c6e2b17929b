//! Connection handshake.
//!
//! The initiator sends `handshake` (nickname, listening port, known peers)
//! and starts its worker straight away without waiting for the reply. The
//! acceptor registers the initiator under `(remote ip, declared port)`, since
//! the declared port is where that node accepts connections, then answers
//! with `handshake_response` and merges the initiator's peer list.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::error::MeshError;
use crate::network::address::{local_ip, LocalAddress, PeerAddress};
use crate::network::message::{Hello, Message};
use crate::network::peer_connection::{run_worker, ConnectionDirection, PeerConnection};
use crate::network::wire;
use crate::node::NodeContext;

/// Active side: dial `target`, announce ourselves, and start the worker.
pub(crate) async fn initiate(
    ctx: &Arc<NodeContext>,
    target: PeerAddress,
    my_port: u16,
    nickname: &str,
) -> Result<String, MeshError> {
    let fallback_local = LocalAddress::new(local_ip().to_string(), my_port);
    if ctx.registry.is_local(&target) || fallback_local.matches(&target) {
        return Err(MeshError::SelfConnect);
    }
    if ctx.registry.is_connected(&target) {
        return Err(MeshError::AlreadyConnected(target));
    }

    info!("🔗 Connecting to {}", target);
    let stream = TcpStream::connect((target.host(), target.port()))
        .await
        .map_err(|source| MeshError::Connect {
            addr: target.clone(),
            source,
        })?;
    if let Err(e) = stream.set_nodelay(true) {
        warn!("Failed to set TCP_NODELAY: {}", e);
    }
    let (reader, writer) = stream.into_split();

    let conn = PeerConnection::new(
        target.clone(),
        ConnectionDirection::Outbound,
        writer,
        ctx.shutdown.child_token(),
    );

    let hello = Message::handshake(nickname, my_port, ctx.registry.known_peers());
    conn.send(&hello)
        .await
        .map_err(|e| MeshError::Handshake(format!("failed to send handshake to {}: {}", target, e)))?;

    if !ctx.registry.add_connected(conn.clone()) {
        conn.close();
        return Err(MeshError::AlreadyConnected(target));
    }

    tokio::spawn(run_worker(conn, reader, ctx.clone()));
    ctx.events.on_peer_count_changed();

    Ok(format!("Connected to {}", target))
}

/// Passive side, run on its own task per accepted stream. Failures drop the
/// stream without registering anything.
pub(crate) async fn accept_inbound(ctx: Arc<NodeContext>, stream: TcpStream, remote: SocketAddr) {
    match accept(&ctx, stream, remote).await {
        Ok(addr) => debug!("🤝 Handshake with {} complete", addr),
        Err(e) => debug!("🚫 Dropped inbound connection from {}: {}", remote, e),
    }
}

async fn accept(
    ctx: &Arc<NodeContext>,
    stream: TcpStream,
    remote: SocketAddr,
) -> Result<PeerAddress, MeshError> {
    if let Err(e) = stream.set_nodelay(true) {
        warn!("Failed to set TCP_NODELAY: {}", e);
    }
    let (mut reader, writer) = stream.into_split();

    let hello = receive_hello(ctx, &mut reader).await?;

    let port = hello.listening_port.unwrap_or(remote.port());
    let addr = PeerAddress::new(remote.ip().to_string(), port);
    if ctx.registry.is_local(&addr) {
        return Err(MeshError::SelfConnect);
    }

    let conn = PeerConnection::new(
        addr.clone(),
        ConnectionDirection::Inbound,
        writer,
        ctx.shutdown.child_token(),
    );
    if !ctx.registry.add_connected(conn.clone()) {
        return Err(MeshError::AlreadyConnected(addr));
    }

    let my_port = ctx.listening_port().unwrap_or_default();
    let response = Message::handshake_response(&ctx.nickname(), my_port, ctx.registry.known_peers());
    if let Err(e) = conn.send(&response).await {
        ctx.registry.remove_connection(&addr, conn.id());
        conn.close();
        return Err(MeshError::Handshake(format!("failed to reply to {}: {}", addr, e)));
    }

    let learned = ctx.registry.merge_known(hello.known_peers);
    info!(
        "🤝 {} joined from {} ({} new known peer(s))",
        hello.nickname, addr, learned
    );

    tokio::spawn(run_worker(conn, reader, ctx.clone()));
    ctx.events.on_peer_joined(&hello.nickname, addr.host(), addr.port());
    ctx.events.on_peer_count_changed();

    Ok(addr)
}

async fn receive_hello<R>(ctx: &NodeContext, reader: &mut R) -> Result<Hello, MeshError>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let max_frame_size = ctx.settings.max_frame_size;
    let first = match ctx.settings.handshake_timeout {
        Some(limit) => tokio::time::timeout(limit, wire::read_message(reader, max_frame_size))
            .await
            .map_err(|_| MeshError::Handshake(format!("no handshake within {:?}", limit)))?,
        None => wire::read_message(reader, max_frame_size).await,
    };

    match first? {
        Some(Message::Handshake(hello)) => Ok(hello),
        Some(other) => Err(MeshError::Handshake(format!(
            "expected handshake, got {}",
            other.kind()
        ))),
        None => Err(MeshError::Handshake(
            "connection closed before handshake".to_string(),
        )),
    }
}

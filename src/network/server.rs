use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpSocket};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::MeshError;
use crate::network::handshake;
use crate::node::NodeContext;

pub const DEFAULT_BACKLOG: u32 = 10;

/// Accepts inbound links and hands each one to the handshake on its own task.
pub struct MeshListener {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl MeshListener {
    pub fn bind(host: &str, port: u16, backlog: u32) -> Result<Self, MeshError> {
        let bind_err = |source| MeshError::Bind { port, source };

        let ip: IpAddr = if host.is_empty() {
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        } else {
            host.parse().map_err(|_| {
                MeshError::Config(format!("invalid listen address: {}", host))
            })?
        };
        let socket = match ip {
            IpAddr::V4(_) => TcpSocket::new_v4(),
            IpAddr::V6(_) => TcpSocket::new_v6(),
        }
        .map_err(bind_err)?;
        socket.set_reuseaddr(true).map_err(bind_err)?;
        socket.bind(SocketAddr::new(ip, port)).map_err(bind_err)?;

        let listener = socket.listen(backlog).map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;

        Ok(Self {
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept until `shutdown` fires. In-flight handshakes are left to finish on their own.
    pub(crate) async fn run(self, ctx: Arc<NodeContext>, shutdown: CancellationToken) {
        info!("🌐 Accepting peers on {}", self.local_addr);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, remote)) => {
                        debug!("🔌 New peer connection from: {}", remote);
                        tokio::spawn(handshake::accept_inbound(ctx.clone(), stream, remote));
                    }
                    Err(e) => {
                        // Usually fd exhaustion or an aborted connection; keep listening
                        warn!("Accept failed on {}: {}", self.local_addr, e);
                        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                    }
                }
            }
        }

        info!("🛑 Listener on {} stopped", self.local_addr);
    }
}

//! Mesh node: the API a front end drives.
//!
//! Owns the peer registry, the flood router and the listener task. Every
//! operation is safe to call concurrently from any task.

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{MeshError, WireError};
use crate::events::MeshEvents;
use crate::network::address::{local_ip, LocalAddress, PeerAddress};
use crate::network::dedup_filter::{MessageCache, DEFAULT_DEDUP_CAPACITY};
use crate::network::handshake;
use crate::network::message::Message;
use crate::network::peer_registry::{PeerListing, PeerRegistry};
use crate::network::router::{Delivery, FloodRouter};
use crate::network::server::{MeshListener, DEFAULT_BACKLOG};
use crate::network::wire::{self, DEFAULT_MAX_FRAME_SIZE, FRAME_HEADER_LEN};

#[derive(Clone, Debug)]
pub struct NodeSettings {
    pub nickname: String,
    pub listen_host: String,
    pub backlog: u32,
    pub dedup_capacity: usize,
    pub max_frame_size: u32,
    /// `None` waits for a handshake indefinitely.
    pub handshake_timeout: Option<Duration>,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            nickname: "Anonymous".to_string(),
            listen_host: "0.0.0.0".to_string(),
            backlog: DEFAULT_BACKLOG,
            dedup_capacity: DEFAULT_DEDUP_CAPACITY,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            handshake_timeout: None,
        }
    }
}

impl From<&Config> for NodeSettings {
    fn from(config: &Config) -> Self {
        let timeout = config.network.handshake_timeout_secs;
        Self {
            nickname: config.node.nickname.clone(),
            listen_host: config.network.listen_address.clone(),
            backlog: config.network.backlog,
            dedup_capacity: config.network.dedup_capacity,
            max_frame_size: config.network.max_frame_size,
            handshake_timeout: (timeout > 0).then(|| Duration::from_secs(timeout)),
        }
    }
}

/// State shared by the listener, handshakes and connection workers.
pub(crate) struct NodeContext {
    pub(crate) settings: NodeSettings,
    pub(crate) registry: Arc<PeerRegistry>,
    pub(crate) router: FloodRouter,
    pub(crate) events: Arc<dyn MeshEvents>,
    pub(crate) shutdown: CancellationToken,
    nickname: RwLock<String>,
}

impl NodeContext {
    pub(crate) fn nickname(&self) -> String {
        self.nickname.read().clone()
    }

    pub(crate) fn listening_port(&self) -> Option<u16> {
        self.registry.local().map(|local| local.port())
    }
}

struct ListenerHandle {
    port: u16,
    task: JoinHandle<()>,
}

pub struct MeshNode {
    ctx: Arc<NodeContext>,
    listener: Mutex<Option<ListenerHandle>>,
}

impl MeshNode {
    pub fn new(settings: NodeSettings, events: Arc<dyn MeshEvents>) -> Self {
        let registry = Arc::new(PeerRegistry::new());
        let router = FloodRouter::new(
            registry.clone(),
            MessageCache::new(settings.dedup_capacity),
            events.clone(),
        );

        Self {
            ctx: Arc::new(NodeContext {
                nickname: RwLock::new(settings.nickname.clone()),
                settings,
                registry,
                router,
                events,
                shutdown: CancellationToken::new(),
            }),
            listener: Mutex::new(None),
        }
    }

    /// Bind `port` (0 picks a free one) and start accepting peers.
    pub async fn start_listening(&self, port: u16) -> Result<String, MeshError> {
        self.ensure_running()?;
        if let Some(existing) = self.listener.lock().as_ref() {
            return Err(MeshError::AlreadyListening(existing.port));
        }

        let listener = MeshListener::bind(
            &self.ctx.settings.listen_host,
            port,
            self.ctx.settings.backlog,
        )?;
        let port = listener.local_addr().port();
        let ip = local_ip().to_string();
        self.ctx
            .registry
            .set_local(LocalAddress::new(ip.clone(), port));

        let mut slot = self.listener.lock();
        if let Some(existing) = slot.as_ref() {
            // Lost a race with a concurrent call; our socket closes on drop
            return Err(MeshError::AlreadyListening(existing.port));
        }
        let task = tokio::spawn(listener.run(self.ctx.clone(), self.ctx.shutdown.child_token()));
        *slot = Some(ListenerHandle { port, task });

        info!("🚀 Listening on {}:{}", ip, port);
        Ok(format!("Listening on {}:{}", ip, port))
    }

    pub fn listening_port(&self) -> Option<u16> {
        self.listener.lock().as_ref().map(|l| l.port)
    }

    /// Dial a peer. `my_port` and `my_nickname` go into our handshake.
    pub async fn connect(
        &self,
        host: &str,
        port: u16,
        my_port: u16,
        my_nickname: &str,
    ) -> Result<String, MeshError> {
        self.ensure_running()?;
        if self.ctx.registry.local().is_none() {
            self.ctx
                .registry
                .set_local(LocalAddress::new(local_ip().to_string(), my_port));
        }
        self.set_nickname(my_nickname);

        handshake::initiate(&self.ctx, PeerAddress::new(host, port), my_port, my_nickname).await
    }

    /// Flood an already formatted chat line. Returns how many neighbors it was written to.
    pub async fn broadcast_chat(&self, formatted_text: &str) -> usize {
        self.originate(Message::chat(formatted_text)).await
    }

    /// Announce a nickname change and adopt `new` for future handshakes.
    pub async fn broadcast_nickname_change(&self, old: &str, new: &str) -> usize {
        self.set_nickname(new);
        self.originate(Message::nickname_change(old, new)).await
    }

    pub async fn broadcast_file(&self, filename: &str, data: &[u8]) -> Result<String, MeshError> {
        self.ensure_running()?;
        if self.ctx.registry.count() == 0 {
            return Err(MeshError::NoPeers);
        }

        // Receivers drop the link on an oversized frame, so refuse it here
        let message = Message::file_transfer(filename, data);
        let payload_len = wire::serialize_frame(&message)?.len() - FRAME_HEADER_LEN;
        let max = self.ctx.settings.max_frame_size;
        if payload_len > max as usize {
            return Err(WireError::FrameTooLarge {
                len: payload_len,
                max,
            }
            .into());
        }

        let relayed = self.originate(message).await;
        Ok(format!("File {} sent to {} peer(s)", filename, relayed))
    }

    /// Gossip our known-peer set to the mesh.
    pub async fn announce_peers(&self) -> usize {
        let known = self.ctx.registry.known_peers();
        self.originate(Message::peer_list_update(known)).await
    }

    async fn originate(&self, message: Message) -> usize {
        if self.ctx.shutdown.is_cancelled() {
            return 0;
        }
        match self.ctx.router.deliver(message, None).await {
            Delivery::Accepted { relayed } => relayed,
            Delivery::Duplicate | Delivery::LocalOnly => 0,
        }
    }

    pub fn peer_count(&self) -> usize {
        self.ctx.registry.count()
    }

    pub fn peer_listing(&self) -> PeerListing {
        self.ctx.registry.listing()
    }

    pub fn known_peers(&self) -> Vec<PeerAddress> {
        self.ctx.registry.known_peers()
    }

    pub fn connected_peers(&self) -> Vec<PeerAddress> {
        self.ctx.registry.connected_peers()
    }

    pub fn nickname(&self) -> String {
        self.ctx.nickname()
    }

    pub fn set_nickname(&self, nickname: &str) {
        *self.ctx.nickname.write() = nickname.to_string();
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.ctx.registry
    }

    pub fn is_shut_down(&self) -> bool {
        self.ctx.shutdown.is_cancelled()
    }

    /// Stop the listener, close every connection and clear the registry.
    /// Safe to call more than once.
    pub async fn shutdown(&self) {
        if self.ctx.shutdown.is_cancelled() {
            return;
        }
        self.ctx.shutdown.cancel();

        let listener = self.listener.lock().take();
        if let Some(listener) = listener {
            let _ = listener.task.await;
        }

        let closed = self.ctx.router.evict_all();
        debug!("Closed {} connection(s)", closed);
        info!("🛑 Mesh node shut down");
    }

    fn ensure_running(&self) -> Result<(), MeshError> {
        if self.ctx.shutdown.is_cancelled() {
            Err(MeshError::ShutDown)
        } else {
            Ok(())
        }
    }
}

impl Drop for MeshNode {
    fn drop(&mut self) {
        self.ctx.shutdown.cancel();
    }
}

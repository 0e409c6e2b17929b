//! Flood routing.
//!
//! Local origination and relay share one path: a message is recorded in the
//! dedup cache, handed to the front end (relayed messages only), then written
//! unchanged to every connected peer except the one it came from. A repeat id
//! stops here, which is what breaks loops in a cyclic mesh.

use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::events::MeshEvents;
use crate::network::address::PeerAddress;
use crate::network::dedup_filter::MessageCache;
use crate::network::message::{Message, MessageKind};
use crate::network::peer_connection::PeerConnection;
use crate::network::peer_registry::PeerRegistry;
use crate::network::wire;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// Id already seen; nothing delivered or relayed.
    Duplicate,
    /// Accepted; `relayed` is the number of peers it was written to.
    Accepted { relayed: usize },
    /// No id to dedup on (handshakes, legacy peer lists); processed locally only.
    LocalOnly,
}

pub struct FloodRouter {
    registry: Arc<PeerRegistry>,
    cache: MessageCache,
    events: Arc<dyn MeshEvents>,
}

impl FloodRouter {
    pub fn new(registry: Arc<PeerRegistry>, cache: MessageCache, events: Arc<dyn MeshEvents>) -> Self {
        Self {
            registry,
            cache,
            events,
        }
    }

    /// Deliver `message` once and flood it onward.
    ///
    /// `arrived_from` is `None` for messages this node originated; those skip
    /// the local callback since the front end produced them.
    pub async fn deliver(&self, message: Message, arrived_from: Option<&PeerAddress>) -> Delivery {
        let Some(id) = message.id() else {
            if let Message::PeerListUpdate(update) = message {
                let added = self.registry.merge_known(update.peers);
                debug!("📋 Merged legacy peer list, {} new address(es)", added);
            } else {
                debug!("Not routing {} message", message.kind());
            }
            return Delivery::LocalOnly;
        };

        if self.cache.check_and_insert(id) {
            trace!("🔁 Dropping duplicate {} {}", message.kind(), id);
            return Delivery::Duplicate;
        }

        if arrived_from.is_some() {
            self.deliver_locally(&message);
        } else if let Message::PeerListUpdate(update) = &message {
            // Gossip we originated may still carry addresses worth remembering
            self.registry.merge_known(update.peers.iter().cloned());
        }

        let relayed = self.rebroadcast(&message, arrived_from).await;
        Delivery::Accepted { relayed }
    }

    fn deliver_locally(&self, message: &Message) {
        match message {
            Message::Chat(chat) => {
                self.events
                    .on_message_received(&chat.message, MessageKind::Chat);
            }
            Message::NicknameChange(change) => {
                let text = format!(
                    "{} changed nickname to {}",
                    change.old_nickname, change.new_nickname
                );
                self.events
                    .on_message_received(&text, MessageKind::NicknameChange);
            }
            Message::FileTransfer(file) => {
                self.events.on_file_received(&file.filename, &file.file_data);
            }
            Message::PeerListUpdate(update) => {
                let added = self.registry.merge_known(update.peers.iter().cloned());
                debug!("📋 Merged peer list update, {} new address(es)", added);
            }
            Message::Handshake(_) | Message::HandshakeResponse(_) => {}
        }
    }

    /// Write `message` to every connected peer but `exclude`. A peer whose
    /// write fails is evicted; the rest still get the message.
    async fn rebroadcast(&self, message: &Message, exclude: Option<&PeerAddress>) -> usize {
        let targets: Vec<_> = self
            .registry
            .snapshot_connected()
            .into_iter()
            .filter(|(addr, _)| Some(addr) != exclude)
            .collect();

        if targets.is_empty() {
            return 0;
        }

        let frame = match wire::serialize_frame(message) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Failed to serialize broadcast message: {}", e);
                return 0;
            }
        };

        debug!("📡 Flooding {} to {} peer(s)", message.kind(), targets.len());
        let mut sent = 0;
        for (addr, conn) in targets {
            match conn.send_frame(&frame).await {
                Ok(()) => sent += 1,
                Err(e) => {
                    warn!("Failed to send to {}: {}", addr, e);
                    self.evict(&conn);
                }
            }
        }
        sent
    }

    /// Remove `conn` from the registry and report the disconnect. Returns
    /// false if it was already gone, so each connection is reported once.
    pub fn evict(&self, conn: &PeerConnection) -> bool {
        conn.close();
        if self
            .registry
            .remove_connection(conn.addr(), conn.id())
            .is_none()
        {
            return false;
        }

        self.report_disconnect(conn);
        true
    }

    /// Empty the registry at shutdown, closing and reporting every connection.
    /// Workers that exit afterwards find nothing left to evict.
    pub fn evict_all(&self) -> usize {
        let connections = self.registry.clear();
        for conn in &connections {
            conn.close();
            self.report_disconnect(conn);
        }
        connections.len()
    }

    fn report_disconnect(&self, conn: &PeerConnection) {
        let addr = conn.addr();
        self.events.on_peer_disconnected(addr.host(), addr.port());
        self.events.on_peer_count_changed();
    }
}

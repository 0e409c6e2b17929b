//! Notifications from the mesh core to whatever front end drives it.
//!
//! Callbacks run on tokio worker threads, possibly several at once. A UI
//! implementation has to marshal onto its own thread itself.

use tokio::sync::mpsc;
use tracing::info;

use crate::network::address::PeerAddress;
use crate::network::message::MessageKind;

pub trait MeshEvents: Send + Sync {
    /// An inbound peer completed its handshake.
    fn on_peer_joined(&self, _nickname: &str, _host: &str, _port: u16) {}

    fn on_peer_disconnected(&self, _host: &str, _port: u16) {}

    /// First sighting of a chat line or nickname change relayed from a peer.
    fn on_message_received(&self, _text: &str, _kind: MessageKind) {}

    /// `encoded` is the base64 file body exactly as it came off the wire.
    fn on_file_received(&self, _filename: &str, _encoded: &str) {}

    fn on_peer_count_changed(&self) {}
}

/// Discards every event.
impl MeshEvents for () {}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MeshEvent {
    PeerJoined { nickname: String, addr: PeerAddress },
    PeerDisconnected { addr: PeerAddress },
    MessageReceived { text: String, kind: MessageKind },
    FileReceived { filename: String, file_data: String },
    PeerCountChanged,
}

/// Forwards callbacks into a channel so a front end can consume them from its own loop.
pub struct ChannelEvents {
    tx: mpsc::UnboundedSender<MeshEvent>,
}

impl ChannelEvents {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MeshEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn emit(&self, event: MeshEvent) {
        // Receiver gone means the front end is shutting down
        let _ = self.tx.send(event);
    }
}

impl MeshEvents for ChannelEvents {
    fn on_peer_joined(&self, nickname: &str, host: &str, port: u16) {
        self.emit(MeshEvent::PeerJoined {
            nickname: nickname.to_string(),
            addr: PeerAddress::new(host, port),
        });
    }

    fn on_peer_disconnected(&self, host: &str, port: u16) {
        self.emit(MeshEvent::PeerDisconnected {
            addr: PeerAddress::new(host, port),
        });
    }

    fn on_message_received(&self, text: &str, kind: MessageKind) {
        self.emit(MeshEvent::MessageReceived {
            text: text.to_string(),
            kind,
        });
    }

    fn on_file_received(&self, filename: &str, encoded: &str) {
        self.emit(MeshEvent::FileReceived {
            filename: filename.to_string(),
            file_data: encoded.to_string(),
        });
    }

    fn on_peer_count_changed(&self) {
        self.emit(MeshEvent::PeerCountChanged);
    }
}

/// Writes each event to the log. Used by the headless daemon.
pub struct LogEvents;

impl MeshEvents for LogEvents {
    fn on_peer_joined(&self, nickname: &str, host: &str, port: u16) {
        info!("👋 {} joined from {}:{}", nickname, host, port);
    }

    fn on_peer_disconnected(&self, host: &str, port: u16) {
        info!("👋 Peer {}:{} disconnected", host, port);
    }

    fn on_message_received(&self, text: &str, kind: MessageKind) {
        match kind {
            MessageKind::NicknameChange => info!("[System] {}", text),
            _ => info!("{}", text),
        }
    }

    fn on_file_received(&self, filename: &str, encoded: &str) {
        // Four base64 chars encode three bytes
        info!(
            "📁 Received file {} (~{} bytes)",
            filename,
            encoded.len() / 4 * 3
        );
    }
}

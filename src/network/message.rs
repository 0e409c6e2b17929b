//! Mesh protocol messages.
//!
//! Every frame carries one JSON object tagged by `"type"`. Floodable kinds
//! carry a `message_id` assigned once by the originating node; relays forward
//! the object untouched so the id and timestamp survive every hop.

use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::network::address::PeerAddress;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    Handshake(Hello),
    HandshakeResponse(Hello),
    #[serde(rename = "chat_message")]
    Chat(ChatMessage),
    NicknameChange(NicknameChange),
    FileTransfer(FileTransfer),
    PeerListUpdate(PeerListUpdate),
}

/// Identity and peer list exchanged when a connection opens.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Hello {
    #[serde(default = "unknown")]
    pub nickname: String,
    /// Port the sender accepts connections on. Older peers call it `my_port`.
    #[serde(
        alias = "my_port",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub listening_port: Option<u16>,
    #[serde(default)]
    pub known_peers: Vec<PeerAddress>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub message_id: String,
    pub timestamp: f64,
    /// Already formatted display text.
    #[serde(default)]
    pub message: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NicknameChange {
    pub message_id: String,
    pub timestamp: f64,
    #[serde(default = "unknown")]
    pub old_nickname: String,
    #[serde(default = "unknown")]
    pub new_nickname: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FileTransfer {
    pub message_id: String,
    pub timestamp: f64,
    #[serde(default = "unknown_filename")]
    pub filename: String,
    /// Base64 (standard alphabet) file contents.
    #[serde(default)]
    pub file_data: String,
}

impl FileTransfer {
    pub fn decode_data(&self) -> Result<Vec<u8>, base64::DecodeError> {
        general_purpose::STANDARD.decode(self.file_data.as_bytes())
    }
}

/// Gossip of known addresses. Updates without an id are merge-only and
/// never relayed.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PeerListUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
    #[serde(default)]
    pub peers: Vec<PeerAddress>,
}

fn unknown() -> String {
    "Unknown".to_string()
}

fn unknown_filename() -> String {
    "unknown".to_string()
}

/// Fresh globally unique id for a locally originated message.
pub fn new_message_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Seconds since the Unix epoch with microsecond precision.
pub fn now_timestamp() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

impl Message {
    pub fn handshake(nickname: &str, listening_port: u16, known_peers: Vec<PeerAddress>) -> Self {
        Message::Handshake(Hello {
            nickname: nickname.to_string(),
            listening_port: Some(listening_port),
            known_peers,
        })
    }

    pub fn handshake_response(
        nickname: &str,
        listening_port: u16,
        known_peers: Vec<PeerAddress>,
    ) -> Self {
        Message::HandshakeResponse(Hello {
            nickname: nickname.to_string(),
            listening_port: Some(listening_port),
            known_peers,
        })
    }

    pub fn chat(text: impl Into<String>) -> Self {
        Message::Chat(ChatMessage {
            message_id: new_message_id(),
            timestamp: now_timestamp(),
            message: text.into(),
        })
    }

    pub fn nickname_change(old: impl Into<String>, new: impl Into<String>) -> Self {
        Message::NicknameChange(NicknameChange {
            message_id: new_message_id(),
            timestamp: now_timestamp(),
            old_nickname: old.into(),
            new_nickname: new.into(),
        })
    }

    pub fn file_transfer(filename: impl Into<String>, data: &[u8]) -> Self {
        Message::FileTransfer(FileTransfer {
            message_id: new_message_id(),
            timestamp: now_timestamp(),
            filename: filename.into(),
            file_data: general_purpose::STANDARD.encode(data),
        })
    }

    pub fn peer_list_update(peers: Vec<PeerAddress>) -> Self {
        Message::PeerListUpdate(PeerListUpdate {
            message_id: Some(new_message_id()),
            timestamp: Some(now_timestamp()),
            peers,
        })
    }

    /// Dedup key. `None` for handshakes and legacy peer list updates.
    pub fn id(&self) -> Option<&str> {
        match self {
            Message::Handshake(_) | Message::HandshakeResponse(_) => None,
            Message::Chat(m) => Some(&m.message_id),
            Message::NicknameChange(m) => Some(&m.message_id),
            Message::FileTransfer(m) => Some(&m.message_id),
            Message::PeerListUpdate(m) => m.message_id.as_deref(),
        }
    }

    pub fn timestamp(&self) -> Option<f64> {
        match self {
            Message::Handshake(_) | Message::HandshakeResponse(_) => None,
            Message::Chat(m) => Some(m.timestamp),
            Message::NicknameChange(m) => Some(m.timestamp),
            Message::FileTransfer(m) => Some(m.timestamp),
            Message::PeerListUpdate(m) => m.timestamp,
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Handshake(_) => MessageKind::Handshake,
            Message::HandshakeResponse(_) => MessageKind::HandshakeResponse,
            Message::Chat(_) => MessageKind::Chat,
            Message::NicknameChange(_) => MessageKind::NicknameChange,
            Message::FileTransfer(_) => MessageKind::FileTransfer,
            Message::PeerListUpdate(_) => MessageKind::PeerListUpdate,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Handshake,
    HandshakeResponse,
    Chat,
    NicknameChange,
    FileTransfer,
    PeerListUpdate,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Handshake => "handshake",
            MessageKind::HandshakeResponse => "handshake_response",
            MessageKind::Chat => "chat_message",
            MessageKind::NicknameChange => "nickname_change",
            MessageKind::FileTransfer => "file_transfer",
            MessageKind::PeerListUpdate => "peer_list_update",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_chat_wire_shape() {
        let msg = Message::chat("[12:00:00] bob: hi");
        let value = serde_json::to_value(&msg).unwrap();

        assert_eq!(value["type"], "chat_message");
        assert_eq!(value["message"], "[12:00:00] bob: hi");
        assert!(value["message_id"].is_string());
        assert!(value["timestamp"].is_f64());
    }

    #[test]
    fn test_accepts_legacy_handshake_fields() {
        let raw = json!({
            "type": "handshake",
            "nickname": "alice",
            "my_port": 9001,
            "known_peers": [["10.0.0.2", 9002]]
        });
        let msg: Message = serde_json::from_value(raw).unwrap();

        match msg {
            Message::Handshake(hello) => {
                assert_eq!(hello.nickname, "alice");
                assert_eq!(hello.listening_port, Some(9001));
                assert_eq!(hello.known_peers, vec![PeerAddress::new("10.0.0.2", 9002)]);
            }
            other => panic!("Wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_handshake_defaults() {
        let msg: Message = serde_json::from_value(json!({ "type": "handshake" })).unwrap();
        match msg {
            Message::Handshake(hello) => {
                assert_eq!(hello.nickname, "Unknown");
                assert_eq!(hello.listening_port, None);
                assert!(hello.known_peers.is_empty());
            }
            other => panic!("Wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_ids_are_unique_and_stable() {
        let a = Message::chat("x");
        let b = Message::chat("x");
        assert_ne!(a.id(), b.id());

        let relayed = a.clone();
        assert_eq!(relayed.id(), a.id());
        assert_eq!(relayed.timestamp(), a.timestamp());
    }

    #[test]
    fn test_legacy_peer_list_update_has_no_id() {
        let raw = json!({ "type": "peer_list_update", "peers": [["10.0.0.9", 9100]] });
        let msg: Message = serde_json::from_value(raw).unwrap();
        assert_eq!(msg.kind(), MessageKind::PeerListUpdate);
        assert!(msg.id().is_none());

        assert!(Message::peer_list_update(vec![]).id().is_some());
    }

    #[test]
    fn test_file_data_is_base64() {
        let msg = Message::file_transfer("notes.txt", b"\x00\x01binary\xff");
        match msg {
            Message::FileTransfer(ft) => {
                assert!(ft.file_data.is_ascii());
                assert_eq!(ft.decode_data().unwrap(), b"\x00\x01binary\xff");
            }
            other => panic!("Wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_rejected() {
        let raw = json!({ "type": "ping" });
        assert!(serde_json::from_value::<Message>(raw).is_err());
    }
}

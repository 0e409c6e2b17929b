use thiserror::Error;

use crate::network::address::PeerAddress;

#[derive(Error, Debug)]
pub enum MeshError {
    #[error("Cannot connect to yourself")]
    SelfConnect,

    #[error("Already connected to {0}")]
    AlreadyConnected(PeerAddress),

    #[error("Failed to connect to peer {addr}: {source}")]
    Connect {
        addr: PeerAddress,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to start listening on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("Already listening on port {0}")]
    AlreadyListening(u16),

    #[error("No peers connected. Connect to peers first.")]
    NoPeers,

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Node is shut down")]
    ShutDown,

    #[error("Wire error: {0}")]
    Wire(#[from] WireError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum WireError {
    #[error("Frame too large: {len} bytes (max: {max})")]
    FrameTooLarge { len: usize, max: u32 },

    #[error("Failed to serialize message: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("Failed to deserialize message: {0}")]
    Deserialize(#[source] serde_json::Error),

    #[error("Stream error: {0}")]
    Io(#[from] std::io::Error),
}

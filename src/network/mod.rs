pub mod address;
pub mod dedup_filter;
pub mod handshake;
pub mod message;
pub mod peer_connection;
pub mod peer_registry;
pub mod router;
pub mod server;
pub mod wire;

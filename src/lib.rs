//! Mesh core for a decentralized group chat.
//!
//! Nodes dial each other directly, exchange peer lists on connect, and flood
//! chat lines, nickname changes and files to the whole mesh with id-based
//! loop suppression. The presentation layer plugs in through [`MeshEvents`].

pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod network;
pub mod node;
pub mod shutdown;

pub use config::Config;
pub use error::{MeshError, WireError};
pub use events::{ChannelEvents, LogEvents, MeshEvent, MeshEvents};
pub use network::address::PeerAddress;
pub use network::message::{Message, MessageKind};
pub use network::peer_registry::PeerListing;
pub use node::{MeshNode, NodeSettings};

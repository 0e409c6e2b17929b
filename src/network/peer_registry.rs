use crate::network::address::{LocalAddress, PeerAddress};
use crate::network::peer_connection::PeerConnection;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

#[derive(Default)]
struct RegistryState {
    connected: HashMap<PeerAddress, Arc<PeerConnection>>,
    known: HashSet<PeerAddress>,
    local: Option<LocalAddress>,
}

impl RegistryState {
    fn is_local(&self, addr: &PeerAddress) -> bool {
        self.local.as_ref().is_some_and(|local| local.matches(addr))
    }
}

/// Known peer addresses and the subset with a live connection.
///
/// Both sets sit behind one lock so connect, disconnect and broadcast
/// snapshots never observe a half-removed peer. The lock is never held across
/// network I/O: fan-out works on a snapshot of `Arc<PeerConnection>`s.
///
/// Invariants: every connected address is also known, and the local
/// listening address is in neither set.
pub struct PeerRegistry {
    state: RwLock<RegistryState>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
        }
    }

    /// Record our own listening address and purge anything matching it.
    pub fn set_local(&self, local: LocalAddress) {
        let mut state = self.state.write();
        state.known.retain(|addr| !local.matches(addr));
        state.connected.retain(|addr, _| !local.matches(addr));
        state.local = Some(local);
    }

    pub fn local(&self) -> Option<LocalAddress> {
        self.state.read().local.clone()
    }

    pub fn is_local(&self, addr: &PeerAddress) -> bool {
        self.state.read().is_local(addr)
    }

    /// Register a live connection. Returns false (leaving the registry
    /// untouched) if the address is already connected or is our own.
    pub fn add_connected(&self, conn: Arc<PeerConnection>) -> bool {
        let mut state = self.state.write();
        let addr = conn.addr().clone();

        if state.is_local(&addr) || state.connected.contains_key(&addr) {
            return false;
        }

        state.known.insert(addr.clone());
        state.connected.insert(addr.clone(), conn);
        debug!("✅ Registered peer connection: {}", addr);
        true
    }

    /// Drop `addr` from both sets, returning its connection if it had one.
    pub fn remove(&self, addr: &PeerAddress) -> Option<Arc<PeerConnection>> {
        let mut state = self.state.write();
        state.known.remove(addr);
        let removed = state.connected.remove(addr);
        if removed.is_some() {
            debug!("🔌 Unregistered peer connection: {}", addr);
        }
        removed
    }

    /// Like [`remove`](Self::remove), but only if `addr` is still bound to connection `id`.
    pub fn remove_connection(&self, addr: &PeerAddress, id: u64) -> Option<Arc<PeerConnection>> {
        let mut state = self.state.write();
        match state.connected.get(addr) {
            Some(conn) if conn.id() == id => {}
            _ => return None,
        }
        state.known.remove(addr);
        let removed = state.connected.remove(addr);
        debug!("🔌 Unregistered peer connection: {}", addr);
        removed
    }

    /// Add gossiped addresses, skipping our own. Returns how many were new.
    pub fn merge_known<I>(&self, addrs: I) -> usize
    where
        I: IntoIterator<Item = PeerAddress>,
    {
        let mut state = self.state.write();
        let mut added = 0;
        for addr in addrs {
            if state.is_local(&addr) {
                continue;
            }
            if state.known.insert(addr) {
                added += 1;
            }
        }
        added
    }

    /// Connected peers ordered by address, for broadcast iteration.
    pub fn snapshot_connected(&self) -> Vec<(PeerAddress, Arc<PeerConnection>)> {
        let state = self.state.read();
        let mut peers: Vec<_> = state
            .connected
            .iter()
            .map(|(addr, conn)| (addr.clone(), conn.clone()))
            .collect();
        peers.sort_by(|a, b| a.0.cmp(&b.0));
        peers
    }

    pub fn count(&self) -> usize {
        self.state.read().connected.len()
    }

    pub fn is_connected(&self, addr: &PeerAddress) -> bool {
        self.state.read().connected.contains_key(addr)
    }

    pub fn is_known(&self, addr: &PeerAddress) -> bool {
        self.state.read().known.contains(addr)
    }

    pub fn known_peers(&self) -> Vec<PeerAddress> {
        let mut known: Vec<_> = self.state.read().known.iter().cloned().collect();
        known.sort();
        known
    }

    pub fn connected_peers(&self) -> Vec<PeerAddress> {
        let mut connected: Vec<_> = self.state.read().connected.keys().cloned().collect();
        connected.sort();
        connected
    }

    pub fn listing(&self) -> PeerListing {
        let state = self.state.read();
        let mut connected: Vec<_> = state.connected.keys().cloned().collect();
        connected.sort();
        let mut known: Vec<_> = state
            .known
            .iter()
            .map(|addr| (addr.clone(), state.connected.contains_key(addr)))
            .collect();
        known.sort();
        PeerListing { connected, known }
    }

    /// Empty both sets, handing back every connection so the caller can close it.
    pub fn clear(&self) -> Vec<Arc<PeerConnection>> {
        let mut state = self.state.write();
        state.known.clear();
        state.connected.drain().map(|(_, conn)| conn).collect()
    }
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time view of the registry for display.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerListing {
    pub connected: Vec<PeerAddress>,
    /// Every known address, flagged with whether it is currently connected.
    pub known: Vec<(PeerAddress, bool)>,
}

impl fmt::Display for PeerListing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Connected Peers:")?;
        for addr in &self.connected {
            writeln!(f, "  • {}", addr)?;
        }
        writeln!(f)?;
        writeln!(f, "Known Peers:")?;
        for (addr, connected) in &self.known {
            let status = if *connected { "Connected" } else { "Disconnected" };
            writeln!(f, "  • {} ({})", addr, status)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::peer_connection::ConnectionDirection;
    use tokio_util::sync::CancellationToken;

    fn conn(host: &str, port: u16) -> Arc<PeerConnection> {
        let (local, _remote) = tokio::io::duplex(64);
        PeerConnection::new(
            PeerAddress::new(host, port),
            ConnectionDirection::Inbound,
            local,
            CancellationToken::new(),
        )
    }

    fn assert_subset(registry: &PeerRegistry) {
        for addr in registry.connected_peers() {
            assert!(registry.is_known(&addr), "{} connected but not known", addr);
        }
    }

    #[test]
    fn test_add_and_remove() {
        let registry = PeerRegistry::new();
        let a = conn("10.0.0.1", 9001);

        assert!(registry.add_connected(a.clone()));
        assert_eq!(registry.count(), 1);
        assert!(registry.is_known(a.addr()));
        assert_subset(&registry);

        let removed = registry.remove(a.addr()).unwrap();
        assert_eq!(removed.id(), a.id());
        assert_eq!(registry.count(), 0);
        assert!(!registry.is_known(a.addr()));
        assert!(registry.remove(a.addr()).is_none());
    }

    #[test]
    fn test_duplicate_connection_rejected() {
        let registry = PeerRegistry::new();
        let first = conn("10.0.0.1", 9001);
        let second = conn("10.0.0.1", 9001);

        assert!(registry.add_connected(first.clone()));
        assert!(!registry.add_connected(second));

        let (_, kept) = registry.snapshot_connected().pop().unwrap();
        assert_eq!(kept.id(), first.id());
    }

    #[test]
    fn test_self_never_registered() {
        let registry = PeerRegistry::new();
        registry.set_local(LocalAddress::new("192.168.1.5", 9001));

        assert!(!registry.add_connected(conn("192.168.1.5", 9001)));
        assert!(!registry.add_connected(conn("127.0.0.1", 9001)));
        assert_eq!(
            registry.merge_known(vec![
                PeerAddress::new("192.168.1.5", 9001),
                PeerAddress::new("192.168.1.6", 9001),
            ]),
            1
        );
        assert_eq!(registry.known_peers(), vec![PeerAddress::new("192.168.1.6", 9001)]);
    }

    #[test]
    fn test_set_local_purges_existing_entries() {
        let registry = PeerRegistry::new();
        registry.merge_known(vec![PeerAddress::new("127.0.0.1", 9001)]);
        registry.set_local(LocalAddress::new("10.0.0.9", 9001));
        assert!(registry.known_peers().is_empty());
    }

    #[test]
    fn test_merge_known_keeps_subset_invariant() {
        let registry = PeerRegistry::new();
        registry.add_connected(conn("10.0.0.1", 9001));
        let added = registry.merge_known(vec![
            PeerAddress::new("10.0.0.1", 9001),
            PeerAddress::new("10.0.0.2", 9002),
            PeerAddress::new("10.0.0.2", 9002),
        ]);

        assert_eq!(added, 1);
        assert_eq!(registry.known_peers().len(), 2);
        assert_eq!(registry.count(), 1);
        assert_subset(&registry);
    }

    #[test]
    fn test_remove_connection_checks_identity() {
        let registry = PeerRegistry::new();
        let stale = conn("10.0.0.1", 9001);
        let fresh = conn("10.0.0.1", 9001);

        registry.add_connected(stale.clone());
        registry.remove(stale.addr());
        registry.add_connected(fresh.clone());

        assert!(registry.remove_connection(stale.addr(), stale.id()).is_none());
        assert!(registry.is_connected(fresh.addr()));
        assert!(registry.remove_connection(fresh.addr(), fresh.id()).is_some());
        assert!(!registry.is_known(fresh.addr()));
    }

    #[test]
    fn test_snapshot_is_ordered() {
        let registry = PeerRegistry::new();
        registry.add_connected(conn("10.0.0.3", 9001));
        registry.add_connected(conn("10.0.0.1", 9001));
        registry.add_connected(conn("10.0.0.2", 9001));

        let hosts: Vec<_> = registry
            .snapshot_connected()
            .into_iter()
            .map(|(addr, _)| addr.host().to_string())
            .collect();
        assert_eq!(hosts, vec!["10.0.0.1", "10.0.0.2", "10.0.0.3"]);
    }

    #[test]
    fn test_clear_returns_connections() {
        let registry = PeerRegistry::new();
        registry.add_connected(conn("10.0.0.1", 9001));
        registry.add_connected(conn("10.0.0.2", 9001));
        registry.merge_known(vec![PeerAddress::new("10.0.0.3", 9001)]);

        assert_eq!(registry.clear().len(), 2);
        assert_eq!(registry.count(), 0);
        assert!(registry.known_peers().is_empty());
    }

    #[test]
    fn test_listing_display() {
        let registry = PeerRegistry::new();
        registry.add_connected(conn("10.0.0.1", 9001));
        registry.merge_known(vec![PeerAddress::new("10.0.0.2", 9002)]);

        let listing = registry.listing();
        assert_eq!(listing.connected, vec![PeerAddress::new("10.0.0.1", 9001)]);
        assert_eq!(
            listing.known,
            vec![
                (PeerAddress::new("10.0.0.1", 9001), true),
                (PeerAddress::new("10.0.0.2", 9002), false),
            ]
        );

        let text = listing.to_string();
        assert!(text.contains("Connected Peers:\n  • 10.0.0.1:9001\n"));
        assert!(text.contains("  • 10.0.0.2:9002 (Disconnected)"));
        assert!(text.contains("  • 10.0.0.1:9001 (Connected)"));
    }
}

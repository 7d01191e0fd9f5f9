//! Connection Registry

use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{ConnectionInfo, ConnectionRecord};

/// Registered connections keyed by remote endpoint
///
/// Mutated by the accept loop and reader exits, read by broadcasts and
/// disposal. All access goes through a single `RwLock`; iteration always
/// works on a cloned snapshot so no lock is held across socket I/O.
pub struct ConnectionRegistry<W = OwnedWriteHalf> {
    connections: RwLock<HashMap<String, Arc<ConnectionRecord<W>>>>,
}

impl<W> Default for ConnectionRegistry<W> {
    fn default() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }
}

impl<W> ConnectionRegistry<W>
where
    W: tokio::io::AsyncWrite + Unpin + Send,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a record under its endpoint key
    ///
    /// Returns the record it displaced, if any. The caller owns closing it.
    pub async fn insert(
        &self,
        record: Arc<ConnectionRecord<W>>,
    ) -> Option<Arc<ConnectionRecord<W>>> {
        let mut connections = self.connections.write().await;
        connections.insert(record.key().to_string(), record)
    }

    /// Remove the entry for `key` only if it still belongs to record `id`
    pub async fn remove_if_current(&self, key: &str, id: Uuid) -> Option<Arc<ConnectionRecord<W>>> {
        let mut connections = self.connections.write().await;
        match connections.get(key) {
            Some(existing) if existing.id() == id => connections.remove(key),
            _ => None,
        }
    }

    pub async fn get(&self, key: &str) -> Option<Arc<ConnectionRecord<W>>> {
        self.connections.read().await.get(key).cloned()
    }

    /// Records registered at this instant
    pub async fn snapshot(&self) -> Vec<Arc<ConnectionRecord<W>>> {
        self.connections.read().await.values().cloned().collect()
    }

    /// Remove and return every record
    pub async fn drain(&self) -> Vec<Arc<ConnectionRecord<W>>> {
        let mut connections = self.connections.write().await;
        connections.drain().map(|(_, record)| record).collect()
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.connections.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub async fn info(&self) -> Vec<ConnectionInfo> {
        let mut info: Vec<ConnectionInfo> = self
            .connections
            .read()
            .await
            .values()
            .map(|record| record.info())
            .collect();
        info.sort_by(|a, b| a.connected_at.cmp(&b.connected_at));
        info
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use tokio::io::DuplexStream;
    use tokio_util::sync::CancellationToken;

    fn record(peer: &str) -> (Arc<ConnectionRecord<DuplexStream>>, DuplexStream) {
        let (client, server_side) = tokio::io::duplex(64);
        let peer: SocketAddr = peer.parse().unwrap();
        (
            Arc::new(ConnectionRecord::new(peer, client, CancellationToken::new())),
            server_side,
        )
    }

    #[tokio::test]
    async fn test_insert_and_snapshot() {
        let registry = ConnectionRegistry::new();
        let (a, _a) = record("127.0.0.1:5001");
        let (b, _b) = record("127.0.0.1:5002");

        assert!(registry.insert(a).await.is_none());
        assert!(registry.insert(b).await.is_none());

        assert_eq!(registry.len().await, 2);
        assert_eq!(registry.snapshot().await.len(), 2);
        assert_eq!(registry.keys().await, vec!["127.0.0.1:5001", "127.0.0.1:5002"]);
    }

    #[tokio::test]
    async fn test_duplicate_key_returns_displaced_record() {
        let registry = ConnectionRegistry::new();
        let (first, _first) = record("10.0.0.1:7000");
        let (second, _second) = record("10.0.0.1:7000");
        let first_id = first.id();

        registry.insert(first).await;
        let displaced = registry.insert(second.clone()).await.unwrap();
        assert_eq!(displaced.id(), first_id);
        assert_eq!(registry.get("10.0.0.1:7000").await.unwrap().id(), second.id());
    }

    #[tokio::test]
    async fn test_remove_if_current_ignores_stale_id() {
        let registry = ConnectionRegistry::new();
        let (old, _old) = record("10.0.0.1:7000");
        let (new, _new) = record("10.0.0.1:7000");
        let old_id = old.id();

        registry.insert(old).await;
        registry.insert(new.clone()).await;

        assert!(registry.remove_if_current("10.0.0.1:7000", old_id).await.is_none());
        assert_eq!(registry.len().await, 1);
        assert!(registry.remove_if_current("10.0.0.1:7000", new.id()).await.is_some());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_drain_empties_registry() {
        let registry = ConnectionRegistry::new();
        let (a, _a) = record("127.0.0.1:5001");
        registry.insert(a).await;

        let drained = registry.drain().await;
        assert_eq!(drained.len(), 1);
        assert!(registry.is_empty().await);
        assert!(registry.info().await.is_empty());
    }
}

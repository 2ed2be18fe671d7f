use crate::connection::BackendConnection;
use crate::language_detector::Language;
use std::sync::Arc;
use uuid::Uuid;

/// What the pool wants the supervisor to do to satisfy a checkout.
#[derive(Debug)]
pub enum PoolSelection {
    Reuse(Arc<BackendConnection>),
    /// Spare capacity: start a fresh backend.
    Spawn,
    /// Full with nothing healthy: shut this one down and respawn in its place.
    Evict(Arc<BackendConnection>),
}

/// Bounded set of connections for one language.
///
/// Callers hold the per-language lock around every mutation, so a pool never
/// sees two concurrent writers.
#[derive(Debug)]
pub struct ConnectionPool {
    pub language: Language,
    max_size: usize,
    connections: Vec<Arc<BackendConnection>>,
    active: Option<Uuid>,
}

impl ConnectionPool {
    pub fn new(language: Language, max_size: usize) -> Self {
        Self {
            language,
            max_size: max_size.max(1),
            connections: Vec::new(),
            active: None,
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn connections(&self) -> &[Arc<BackendConnection>] {
        &self.connections
    }

    pub fn active(&self) -> Option<Arc<BackendConnection>> {
        let id = self.active?;
        self.get(id)
    }

    pub fn get(&self, id: Uuid) -> Option<Arc<BackendConnection>> {
        self.connections.iter().find(|c| c.id == id).cloned()
    }

    /// Active healthy connection first, then any healthy pooled one, then
    /// spare capacity, and finally the least recently heard-from connection.
    pub fn select(&mut self) -> PoolSelection {
        if let Some(active) = self.active() {
            if active.is_healthy() {
                return PoolSelection::Reuse(active);
            }
        }

        if let Some(healthy) = self.connections.iter().find(|c| c.is_healthy()).cloned() {
            self.active = Some(healthy.id);
            return PoolSelection::Reuse(healthy);
        }

        if self.connections.len() < self.max_size {
            return PoolSelection::Spawn;
        }

        match self
            .connections
            .iter()
            .min_by_key(|c| c.last_heartbeat())
            .cloned()
        {
            Some(oldest) => PoolSelection::Evict(oldest),
            None => PoolSelection::Spawn,
        }
    }

    /// Add a freshly started connection and make it active.
    /// Returns false when the pool is already full.
    pub fn insert(&mut self, connection: Arc<BackendConnection>) -> bool {
        if self.connections.len() >= self.max_size {
            return false;
        }
        self.active = Some(connection.id);
        self.connections.push(connection);
        true
    }

    /// Swap a connection in place, keeping its slot (used for restarts).
    pub fn replace(&mut self, connection: Arc<BackendConnection>) -> bool {
        match self.connections.iter_mut().find(|c| c.id == connection.id) {
            Some(slot) => {
                *slot = connection;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: Uuid) -> Option<Arc<BackendConnection>> {
        let index = self.connections.iter().position(|c| c.id == id)?;
        if self.active == Some(id) {
            self.active = None;
        }
        Some(self.connections.remove(index))
    }

    pub fn drain(&mut self) -> Vec<Arc<BackendConnection>> {
        self.active = None;
        std::mem::take(&mut self.connections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend_registry::BackendConfig;
    use crate::transport::{BackendTransport, TransportError};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::time::Duration;

    struct Alive;

    #[async_trait]
    impl BackendTransport for Alive {
        async fn request(
            &self,
            _method: &str,
            _params: Value,
            _timeout: Duration,
        ) -> std::result::Result<Value, TransportError> {
            Ok(Value::Null)
        }

        async fn notify(&self, _method: &str, _params: Value) -> std::result::Result<(), TransportError> {
            Ok(())
        }

        async fn shutdown(&self) -> anyhow::Result<()> {
            Ok(())
        }

        fn is_alive(&self) -> bool {
            true
        }
    }

    fn connection() -> Arc<BackendConnection> {
        let config = BackendConfig::new(Language::Go, "gopls", "gopls", &[]);
        Arc::new(BackendConnection::new(
            Uuid::new_v4(),
            &config,
            None,
            Arc::new(Alive),
            Value::Null,
            0,
        ))
    }

    #[test]
    fn test_select_prefers_active_then_spawns() {
        let mut pool = ConnectionPool::new(Language::Go, 2);
        assert!(matches!(pool.select(), PoolSelection::Spawn));

        let first = connection();
        assert!(pool.insert(first.clone()));
        match pool.select() {
            PoolSelection::Reuse(conn) => assert_eq!(conn.id, first.id),
            other => panic!("expected reuse, got {:?}", other),
        }

        first.mark_error("down");
        assert!(matches!(pool.select(), PoolSelection::Spawn));
    }

    #[test]
    fn test_select_evicts_oldest_heartbeat_when_full() {
        let mut pool = ConnectionPool::new(Language::Go, 2);
        let older = connection();
        std::thread::sleep(Duration::from_millis(5));
        let newer = connection();
        pool.insert(older.clone());
        pool.insert(newer.clone());
        assert!(!pool.insert(connection()));
        assert_eq!(pool.len(), 2);

        older.mark_error("down");
        newer.mark_error("down");
        newer.touch();

        match pool.select() {
            PoolSelection::Evict(conn) => assert_eq!(conn.id, older.id),
            other => panic!("expected eviction, got {:?}", other),
        }
    }

    #[test]
    fn test_remove_clears_active() {
        let mut pool = ConnectionPool::new(Language::Go, 3);
        let conn = connection();
        pool.insert(conn.clone());
        assert!(pool.remove(conn.id).is_some());
        assert!(pool.active().is_none());
        assert!(pool.is_empty());
    }
}

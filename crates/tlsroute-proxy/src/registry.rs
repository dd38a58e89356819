//! Live set of active connections for one session

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct Inner {
    connections: HashMap<u64, CancellationToken>,
    closed: bool,
}

/// Tracks the completion signal of every active connection so shutdown can
/// force-close them. The lock is only held for map updates; tokens are
/// cancelled after it is released.
#[derive(Default)]
pub struct ConnectionRegistry {
    next_id: AtomicU64,
    inner: Mutex<Inner>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection. Returns `None` once the registry is closed;
    /// the caller must then drop the connection.
    pub fn register(&self, done: CancellationToken) -> Option<u64> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.closed {
            return None;
        }
        inner.connections.insert(id, done);
        Some(id)
    }

    pub fn remove(&self, id: u64) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.connections.remove(&id);
    }

    /// Close the registry and cancel every registered connection.
    /// Returns how many were cancelled; later calls return 0.
    pub fn close_all(&self) -> usize {
        let drained: Vec<CancellationToken> = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.closed = true;
            inner.connections.drain().map(|(_, token)| token).collect()
        };

        for token in &drained {
            token.cancel();
        }
        drained.len()
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .connections
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_remove() {
        let registry = ConnectionRegistry::new();
        let a = registry.register(CancellationToken::new()).unwrap();
        let b = registry.register(CancellationToken::new()).unwrap();
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);

        registry.remove(a);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_close_all_cancels_each_connection_once() {
        let registry = ConnectionRegistry::new();
        let tokens: Vec<_> = (0..3).map(|_| CancellationToken::new()).collect();
        for token in &tokens {
            registry.register(token.clone()).unwrap();
        }

        assert_eq!(registry.close_all(), 3);
        assert!(tokens.iter().all(|t| t.is_cancelled()));
        assert!(registry.is_empty());

        assert_eq!(registry.close_all(), 0);
    }

    #[test]
    fn test_register_after_close_is_refused() {
        let registry = ConnectionRegistry::new();
        registry.close_all();
        assert!(registry.register(CancellationToken::new()).is_none());
    }
}

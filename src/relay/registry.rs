//! Set of live clients
//!
//! One mutex guards membership. Iteration snapshots the members and
//! releases the lock before calling back, so a slow callback never holds
//! up admissions or removals.

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::debug;

use super::client::{ClientHandle, ClientId};

#[derive(Debug, Default)]
pub struct Registry {
    clients: Mutex<HashMap<ClientId, ClientHandle>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client. Returns false if it is already present.
    pub fn add(&self, client: ClientHandle) -> bool {
        let id = client.id();
        let added = {
            let mut clients = self.clients.lock();
            if clients.contains_key(&id) {
                false
            } else {
                clients.insert(id, client);
                true
            }
        };
        if added {
            debug!(client_id = %id, "Client registered");
        }
        added
    }

    /// Unregister a client. Removing an absent client is a no-op.
    pub fn remove(&self, id: ClientId) -> Option<ClientHandle> {
        let removed = self.clients.lock().remove(&id);
        if removed.is_some() {
            debug!(client_id = %id, "Client unregistered");
        }
        removed
    }

    /// Call `f` for every client that was a member when the call started
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&ClientHandle),
    {
        for client in self.snapshot() {
            f(&client);
        }
    }

    /// Clone the current member handles
    pub fn snapshot(&self) -> Vec<ClientHandle> {
        self.clients.lock().values().cloned().collect()
    }

    pub fn contains(&self, id: ClientId) -> bool {
        self.clients.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Unregister and close every client; used on shutdown
    pub fn close_all(&self) -> usize {
        let drained: Vec<ClientHandle> = self.clients.lock().drain().map(|(_, c)| c).collect();
        for client in &drained {
            client.close();
        }
        drained.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_add_and_remove() {
        let registry = Registry::new();
        let client = ClientHandle::new(4);

        assert!(registry.add(client.clone()));
        assert!(!registry.add(client.clone()));
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(client.id()));

        assert!(registry.remove(client.id()).is_some());
        assert!(registry.remove(client.id()).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_for_each_visits_every_member() {
        let registry = Registry::new();
        let clients: Vec<_> = (0..5).map(|_| ClientHandle::new(4)).collect();
        for c in &clients {
            registry.add(c.clone());
        }

        let mut seen = Vec::new();
        registry.for_each(|c| seen.push(c.id()));
        seen.sort_by_key(|id| id.to_string());

        let mut expected: Vec<_> = clients.iter().map(|c| c.id()).collect();
        expected.sort_by_key(|id| id.to_string());
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_for_each_does_not_hold_lock() {
        let registry = Registry::new();
        let first = ClientHandle::new(4);
        registry.add(first.clone());

        // Mutating from inside the callback would deadlock if the lock were held
        let late = ClientHandle::new(4);
        let mut visits = 0;
        registry.for_each(|c| {
            visits += 1;
            registry.remove(c.id());
            registry.add(late.clone());
        });

        assert_eq!(visits, 1);
        assert!(!registry.contains(first.id()));
        assert!(registry.contains(late.id()));
    }

    #[test]
    fn test_close_all() {
        let registry = Registry::new();
        let a = ClientHandle::new(4);
        let b = ClientHandle::new(4);
        registry.add(a.clone());
        registry.add(b.clone());

        assert_eq!(registry.close_all(), 2);
        assert!(registry.is_empty());
        assert!(a.is_closed());
        assert!(b.is_closed());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_membership_changes() {
        let registry = Arc::new(Registry::new());
        let mut tasks = Vec::new();

        for _ in 0..16 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                let mut kept = Vec::new();
                for i in 0..50 {
                    let client = ClientHandle::new(1);
                    registry.add(client.clone());
                    registry.for_each(|_| {});
                    if i % 2 == 0 {
                        registry.remove(client.id());
                        registry.remove(client.id());
                    } else {
                        kept.push(client.id());
                    }
                    tokio::task::yield_now().await;
                }
                kept
            }));
        }

        let mut kept = Vec::new();
        for task in tasks {
            kept.extend(task.await.unwrap());
        }

        assert_eq!(registry.len(), kept.len());
        assert!(kept.iter().all(|id| registry.contains(*id)));
    }
}

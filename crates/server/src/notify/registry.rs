//! Live push connections and the owner scope each one is bound to.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use tokio::sync::mpsc;

pub type ConnectionId = u64;

struct Connection {
    tx: mpsc::UnboundedSender<String>,
    owner: Option<i64>,
}

#[derive(Default)]
struct Inner {
    conns: HashMap<ConnectionId, Connection>,
    by_owner: HashMap<i64, HashSet<ConnectionId>>,
}

impl Inner {
    fn leave(&mut self, id: ConnectionId, owner: i64) {
        if let Some(members) = self.by_owner.get_mut(&owner) {
            members.remove(&id);
            if members.is_empty() {
                self.by_owner.remove(&owner);
            }
        }
    }
}

/// Connection table shared by the socket handlers and the bus.
///
/// A connection is registered unauthenticated and receives nothing from the
/// bus until `bind` places it in an owner scope. A connection belongs to at
/// most one scope at a time.
pub struct ConnectionRegistry {
    next_id: AtomicU64,
    inner: RwLock<Inner>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            inner: RwLock::new(Inner::default()),
        }
    }

    pub fn register(&self, tx: mpsc::UnboundedSender<String>) -> ConnectionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        match self.inner.write() {
            Ok(mut inner) => {
                inner.conns.insert(id, Connection { tx, owner: None });
            }
            Err(e) => tracing::error!("RwLock poisoned registering connection: {e}"),
        }
        id
    }

    /// Move connection `id` into `owner`'s scope, leaving any previous one.
    ///
    /// Returns the previous owner, if the connection had one. Binding an
    /// unknown connection is a no-op.
    pub fn bind(&self, id: ConnectionId, owner: i64) -> Option<i64> {
        let mut inner = match self.inner.write() {
            Ok(inner) => inner,
            Err(e) => {
                tracing::error!("RwLock poisoned binding connection: {e}");
                return None;
            }
        };
        let previous = match inner.conns.get_mut(&id) {
            Some(conn) => conn.owner.replace(owner),
            None => return None,
        };
        if let Some(prev) = previous {
            inner.leave(id, prev);
        }
        inner.by_owner.entry(owner).or_default().insert(id);
        previous
    }

    pub fn unregister(&self, id: ConnectionId) {
        match self.inner.write() {
            Ok(mut inner) => {
                if let Some(conn) = inner.conns.remove(&id) {
                    if let Some(owner) = conn.owner {
                        inner.leave(id, owner);
                    }
                }
            }
            Err(e) => tracing::error!("RwLock poisoned unregistering connection: {e}"),
        }
    }

    /// Senders of every connection bound to `owner`.
    pub fn senders_for(&self, owner: i64) -> Vec<mpsc::UnboundedSender<String>> {
        match self.inner.read() {
            Ok(inner) => inner
                .by_owner
                .get(&owner)
                .into_iter()
                .flatten()
                .filter_map(|id| inner.conns.get(id).map(|c| c.tx.clone()))
                .collect(),
            Err(e) => {
                tracing::error!("RwLock poisoned reading connections: {e}");
                Vec::new()
            }
        }
    }

    pub fn owner_of(&self, id: ConnectionId) -> Option<i64> {
        match self.inner.read() {
            Ok(inner) => inner.conns.get(&id).and_then(|c| c.owner),
            Err(_) => None,
        }
    }

    /// Total live connections, authenticated or not.
    pub fn connected(&self) -> usize {
        match self.inner.read() {
            Ok(inner) => inner.conns.len(),
            Err(_) => 0,
        }
    }

    pub fn subscribers(&self, owner: i64) -> usize {
        match self.inner.read() {
            Ok(inner) => inner.by_owner.get(&owner).map_or(0, HashSet::len),
            Err(_) => 0,
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

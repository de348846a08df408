use std::{
    collections::{HashMap, HashSet},
    net::{IpAddr, SocketAddr},
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use crate::session::SessionHandle;

/// Address → session map shared by every handler.
///
/// `try_insert` and `remove` must each be atomic; handshake correctness
/// relies on nothing else.
pub trait PeerRegistry: Send + Sync {
    /// Publishes `session` unless `addr` is taken, in which case the
    /// existing session is returned and nothing changes.
    fn try_insert(
        &self,
        addr: SocketAddr,
        session: Arc<SessionHandle>,
    ) -> Option<Arc<SessionHandle>>;

    fn get(&self, addr: &SocketAddr) -> Option<Arc<SessionHandle>>;

    fn remove(&self, addr: &SocketAddr) -> Option<Arc<SessionHandle>>;

    /// Removes `session` only if it is still the one registered for its
    /// address.
    fn remove_session(&self, session: &Arc<SessionHandle>) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_banned(&self, addr: &SocketAddr) -> bool;

    fn sessions(&self) -> Vec<Arc<SessionHandle>>;
}

/// [`PeerRegistry`] over a locked `HashMap`, with an IP ban list.
#[derive(Debug, Default)]
pub struct InMemoryPeerRegistry {
    sessions: RwLock<HashMap<SocketAddr, Arc<SessionHandle>>>,
    banned: RwLock<HashSet<IpAddr>>,
}

impl InMemoryPeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ban(&self, ip: IpAddr) {
        write(&self.banned).insert(ip);
        tracing::debug!(%ip, "address banned");
    }

    pub fn unban(&self, ip: &IpAddr) -> bool {
        write(&self.banned).remove(ip)
    }
}

impl PeerRegistry for InMemoryPeerRegistry {
    fn try_insert(
        &self,
        addr: SocketAddr,
        session: Arc<SessionHandle>,
    ) -> Option<Arc<SessionHandle>> {
        let mut sessions = write(&self.sessions);
        if let Some(existing) = sessions.get(&addr) {
            return Some(existing.clone());
        }
        sessions.insert(addr, session);
        None
    }

    fn get(&self, addr: &SocketAddr) -> Option<Arc<SessionHandle>> {
        read(&self.sessions).get(addr).cloned()
    }

    fn remove(&self, addr: &SocketAddr) -> Option<Arc<SessionHandle>> {
        write(&self.sessions).remove(addr)
    }

    fn remove_session(&self, session: &Arc<SessionHandle>) -> bool {
        let mut sessions = write(&self.sessions);
        let addr = session.remote_addr();
        match sessions.get(&addr) {
            Some(current) if Arc::ptr_eq(current, session) => {
                sessions.remove(&addr);
                true
            }
            _ => false,
        }
    }

    fn len(&self) -> usize {
        read(&self.sessions).len()
    }

    fn is_banned(&self, addr: &SocketAddr) -> bool {
        read(&self.banned).contains(&addr.ip())
    }

    fn sessions(&self) -> Vec<Arc<SessionHandle>> {
        read(&self.sessions).values().cloned().collect()
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

//! Correlation of forwarded queries with the clients that sent them.

use moka::sync::Cache;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub struct PendingQuery {
    pub requester: SocketAddr,
    pub registered_at: Instant,
}

/// Outstanding forwards keyed by query id. Entries expire after `ttl` so an
/// upstream that never answers does not leak them.
pub struct PendingQueries {
    entries: Cache<u16, PendingQuery>,
    ttl: Duration,
}

impl PendingQueries {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Cache::builder()
                .max_capacity(usize::from(u16::MAX) as u64 + 1)
                .time_to_live(ttl)
                .build(),
            ttl,
        }
    }

    /// Records `requester` as the owner of `id`, replacing any older entry.
    pub fn register(&self, id: u16, requester: SocketAddr) {
        if let Some(prev) = self.live(id) {
            if prev.requester != requester {
                tracing::warn!("TxID: {:#06x} reused by {} while pending for {}, replacing", id, requester, prev.requester);
            }
        }
        self.entries.insert(id, PendingQuery { requester, registered_at: Instant::now() });
    }

    /// Removes and returns the requester waiting on `id`, if still live.
    pub fn take(&self, id: u16) -> Option<SocketAddr> {
        let entry = self.entries.remove(&id)?;
        (entry.registered_at.elapsed() < self.ttl).then_some(entry.requester)
    }

    pub fn contains(&self, id: u16) -> bool { self.live(id).is_some() }

    /// Entry count as of moka's last housekeeping, possibly stale.
    pub fn approx_len(&self) -> u64 { self.entries.entry_count() }

    fn live(&self, id: u16) -> Option<PendingQuery> {
        self.entries.get(&id).filter(|e| e.registered_at.elapsed() < self.ttl)
    }
}

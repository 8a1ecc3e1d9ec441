//! Fingerprint-keyed result cache shared by every evaluation.
//!
//! Entry lifecycle:
//!
//! ```text
//! absent ──claim──► Pending ──commit(Ok)──► Ready(handle)
//!                      │    ──commit(Err)─► Failed(error)
//!                      └────abandon──────► absent
//! ```
//!
//! `claim` is the atomic check-and-set used by the scheduler: exactly one
//! caller becomes the owner of a pending entry, every other caller sees it in
//! flight and may block in [`ResultCache::wait`] until it settles. This is
//! what guarantees at most one concurrent execution per fingerprint, across
//! evaluations.

use super::error::ExecutionError;
use super::fingerprint::Fingerprint;
use super::id::NodeId;
use super::node::ResultHandle;
use super::node_type::NodeKind;
use crate::config::CacheConfig;
use crate::engine::Interrupt;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// How often a blocked reader re-checks its interrupt flag.
const WAIT_POLL: Duration = Duration::from_millis(25);

#[derive(Debug, Clone, PartialEq)]
pub enum CacheState {
    Pending,
    Ready(ResultHandle),
    Failed(ExecutionError),
}

#[derive(Debug, Clone)]
struct CacheEntry {
    state: CacheState,
    /// Node and kind that created the entry.
    node: NodeId,
    kind: NodeKind,
    cost: usize,
    last_access: u64,
}

/// Outcome of [`ResultCache::claim`].
#[derive(Debug, Clone, PartialEq)]
pub enum Claim {
    /// A ready result.
    Hit(ResultHandle),
    /// A recorded failure that is not retried.
    Failed(ExecutionError),
    /// The caller now owns a pending entry and must commit or abandon it.
    Owner,
    /// Another execution owns the pending entry.
    InFlight,
}

/// Outcome of [`ResultCache::wait`].
#[derive(Debug, Clone, PartialEq)]
pub enum WaitOutcome {
    Ready(ResultHandle),
    Failed(ExecutionError),
    /// The owner abandoned the entry; claim again.
    Abandoned,
    /// The caller's interrupt fired first.
    Interrupted,
}

/// Counters since creation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub used_bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub corruptions: u64,
    pub evictions: u64,
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<Fingerprint, CacheEntry>,
    tick: u64,
    used_bytes: usize,
}

impl CacheInner {
    fn touch(&mut self, fingerprint: &Fingerprint) {
        self.tick += 1;
        let tick = self.tick;
        if let Some(entry) = self.entries.get_mut(fingerprint) {
            entry.last_access = tick;
        }
    }

    fn remove(&mut self, fingerprint: &Fingerprint) -> Option<CacheEntry> {
        let entry = self.entries.remove(fingerprint)?;
        self.used_bytes = self.used_bytes.saturating_sub(entry.cost);
        Some(entry)
    }

    fn insert(&mut self, fingerprint: Fingerprint, entry: CacheEntry) {
        self.remove(&fingerprint);
        self.used_bytes += entry.cost;
        self.entries.insert(fingerprint, entry);
    }
}

/// Thread-safe result cache.
#[derive(Debug)]
pub struct ResultCache {
    inner: Mutex<CacheInner>,
    settled: Condvar,
    config: CacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
    corruptions: AtomicU64,
    evictions: AtomicU64,
}

impl ResultCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            settled: Condvar::new(),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            corruptions: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Ready result for `fingerprint`, refreshing its recency.
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<ResultHandle> {
        let mut inner = self.lock();
        let handle = match inner.entries.get(fingerprint) {
            Some(CacheEntry {
                state: CacheState::Ready(handle),
                ..
            }) => handle.clone(),
            _ => return None,
        };
        inner.touch(fingerprint);
        Some(handle)
    }

    /// Current state of an entry.
    pub fn state(&self, fingerprint: &Fingerprint) -> Option<CacheState> {
        self.lock().entries.get(fingerprint).map(|e| e.state.clone())
    }

    /// True when a claim would not lead to an execution.
    pub fn is_reusable(&self, fingerprint: &Fingerprint) -> bool {
        match self.lock().entries.get(fingerprint).map(|e| &e.state) {
            Some(CacheState::Ready(_)) => true,
            Some(CacheState::Failed(_)) => !self.config.retry_failed,
            _ => false,
        }
    }

    /// Store a ready result directly.
    pub fn put(&self, fingerprint: Fingerprint, node: NodeId, kind: NodeKind, handle: ResultHandle) {
        let mut inner = self.lock();
        inner.tick += 1;
        let entry = CacheEntry {
            cost: handle.cost,
            state: CacheState::Ready(handle),
            node,
            kind,
            last_access: inner.tick,
        };
        inner.insert(fingerprint, entry);
        drop(inner);
        self.settled.notify_all();
    }

    /// Atomically look up `fingerprint` and, if nothing usable is there,
    /// mark it pending on behalf of `node`.
    pub fn claim(&self, fingerprint: Fingerprint, node: NodeId, kind: NodeKind) -> Claim {
        let mut inner = self.lock();

        if let Some(entry) = inner.entries.get(&fingerprint) {
            if entry.kind != kind {
                tracing::warn!(
                    "Cache entry {} was made by {} ({}), requested by {} ({}); recomputing",
                    fingerprint.short(),
                    entry.node,
                    entry.kind.id(),
                    node,
                    kind.id()
                );
                self.corruptions.fetch_add(1, Ordering::Relaxed);
                inner.remove(&fingerprint);
            } else {
                match &entry.state {
                    CacheState::Pending => return Claim::InFlight,
                    CacheState::Ready(handle) => {
                        let handle = handle.clone();
                        inner.touch(&fingerprint);
                        self.hits.fetch_add(1, Ordering::Relaxed);
                        return Claim::Hit(handle);
                    }
                    CacheState::Failed(error) if !self.config.retry_failed => {
                        let error = error.clone();
                        inner.touch(&fingerprint);
                        return Claim::Failed(error);
                    }
                    CacheState::Failed(_) => {
                        tracing::debug!("Retrying failed entry {}", fingerprint.short());
                        inner.remove(&fingerprint);
                    }
                }
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        inner.tick += 1;
        let entry = CacheEntry {
            state: CacheState::Pending,
            node,
            kind,
            cost: 0,
            last_access: inner.tick,
        };
        inner.insert(fingerprint, entry);
        Claim::Owner
    }

    /// Settle a pending entry with the outcome of its execution.
    pub fn commit(&self, fingerprint: Fingerprint, result: Result<ResultHandle, ExecutionError>) {
        let mut inner = self.lock();
        inner.tick += 1;
        let tick = inner.tick;
        let (node, kind) = match inner.entries.get(&fingerprint) {
            Some(entry) => (entry.node, entry.kind),
            None => {
                tracing::debug!("Commit for {} without a pending entry", fingerprint.short());
                drop(inner);
                self.settled.notify_all();
                return;
            }
        };
        let (state, cost) = match result {
            Ok(handle) => {
                let cost = handle.cost;
                (CacheState::Ready(handle), cost)
            }
            Err(error) => (CacheState::Failed(error), 0),
        };
        inner.insert(
            fingerprint,
            CacheEntry {
                state,
                node,
                kind,
                cost,
                last_access: tick,
            },
        );
        drop(inner);
        self.settled.notify_all();
    }

    /// Drop a pending entry without a result (interrupted execution).
    pub fn abandon(&self, fingerprint: &Fingerprint) {
        let mut inner = self.lock();
        if matches!(
            inner.entries.get(fingerprint).map(|e| &e.state),
            Some(CacheState::Pending)
        ) {
            inner.remove(fingerprint);
        }
        drop(inner);
        self.settled.notify_all();
    }

    /// Block until the entry for `fingerprint` is no longer pending.
    pub fn wait(&self, fingerprint: &Fingerprint, interrupt: &Interrupt) -> WaitOutcome {
        let mut inner = self.lock();
        loop {
            match inner.entries.get(fingerprint).map(|e| &e.state) {
                Some(CacheState::Pending) => {}
                Some(CacheState::Ready(handle)) => {
                    let handle = handle.clone();
                    inner.touch(fingerprint);
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return WaitOutcome::Ready(handle);
                }
                Some(CacheState::Failed(error)) => return WaitOutcome::Failed(error.clone()),
                None => return WaitOutcome::Abandoned,
            }
            if interrupt.is_triggered() {
                return WaitOutcome::Interrupted;
            }
            inner = match self.settled.wait_timeout(inner, WAIT_POLL) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    pub fn remove(&self, fingerprint: &Fingerprint) -> bool {
        let removed = self.lock().remove(fingerprint).is_some();
        self.settled.notify_all();
        removed
    }

    /// Drop settled entries whose fingerprint is not live. Pending entries
    /// belong to running executions and are kept.
    pub fn invalidate_not_in(&self, live: &HashSet<Fingerprint>) -> usize {
        let mut inner = self.lock();
        let dead: Vec<Fingerprint> = inner
            .entries
            .iter()
            .filter(|(fp, e)| !live.contains(fp) && !matches!(e.state, CacheState::Pending))
            .map(|(fp, _)| *fp)
            .collect();
        for fp in &dead {
            inner.remove(fp);
        }
        if !dead.is_empty() {
            tracing::debug!("Invalidated {} dead cache entries", dead.len());
        }
        dead.len()
    }

    /// Evict ready entries until the total cost is at most `budget`.
    ///
    /// Entries outside `protected` go first, least recently used first; the
    /// protected ones follow in the same order if that is not enough.
    /// Pending entries are never evicted.
    pub fn evict_under(&self, budget: usize, protected: &HashSet<Fingerprint>) -> usize {
        let mut inner = self.lock();
        if inner.used_bytes <= budget {
            return 0;
        }
        let mut candidates: Vec<(bool, u64, Fingerprint)> = inner
            .entries
            .iter()
            .filter(|(_, e)| matches!(e.state, CacheState::Ready(_)))
            .map(|(fp, e)| (protected.contains(fp), e.last_access, *fp))
            .collect();
        candidates.sort();

        let mut evicted = 0;
        for (_, _, fp) in candidates {
            if inner.used_bytes <= budget {
                break;
            }
            inner.remove(&fp);
            evicted += 1;
        }
        self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
        if evicted > 0 {
            tracing::debug!(
                "Evicted {} cache entries, {} bytes in use",
                evicted,
                inner.used_bytes
            );
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn used_bytes(&self) -> usize {
        self.lock().used_bytes
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.retain(|_, e| matches!(e.state, CacheState::Pending));
        inner.used_bytes = 0;
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            entries: inner.entries.len(),
            used_bytes: inner.used_bytes,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            corruptions: self.corruptions.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

//! Admission Gate (Rate Limiting)
//!
//! Fixed-window request counter per caller identity. The counting logic lives in
//! [`AdmissionGate`]; window storage sits behind the [`WindowStore`] trait so the in-memory map
//! can be swapped for a shared store without touching the gate.
//!
//! # Concurrency
//! A store must give exclusive access to one key's window for the duration of an update, so
//! concurrent requests from the same caller never lose increments. [`MemoryWindowStore`] uses a
//! sharded `DashMap`: updates to different callers only contend when they hash to the same shard
//! and never wait on each other's decisions.
//!
//! State is advisory and per-process: it is never persisted and there is no cross-process
//! coordination.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::RateLimitSettings;

/// Request counter for one caller identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitWindow {
    pub window_start: Instant,
    pub request_count: u32,
}

/// Gate decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Request admitted; `remaining` more fit in the current window
    Admitted { remaining: u32 },

    /// Window exhausted; the current window ends after `retry_after`
    Rejected { retry_after: Duration },
}

impl Admission {
    #[must_use]
    pub const fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted { .. })
    }
}

/// Storage for per-identity windows
pub trait WindowStore: Send + Sync {
    /// Run `update` on the window stored under `key` while holding exclusive access to it
    ///
    /// The closure sees `None` for an unknown key. Whatever it leaves in the slot is stored;
    /// leaving `None` removes the key.
    fn update(
        &self,
        key: &str,
        update: &mut dyn FnMut(&mut Option<RateLimitWindow>) -> Admission,
    ) -> Admission;

    /// Drop every window for which `keep` returns false
    fn retain(&self, keep: &mut dyn FnMut(&RateLimitWindow) -> bool);

    /// Number of tracked identities
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory window store
#[derive(Debug, Default)]
pub struct MemoryWindowStore {
    windows: DashMap<String, RateLimitWindow>,
}

impl MemoryWindowStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current window for `key`, if any
    #[must_use]
    pub fn get(&self, key: &str) -> Option<RateLimitWindow> {
        self.windows.get(key).map(|w| *w)
    }
}

impl WindowStore for MemoryWindowStore {
    fn update(
        &self,
        key: &str,
        update: &mut dyn FnMut(&mut Option<RateLimitWindow>) -> Admission,
    ) -> Admission {
        // The entry guard holds the shard lock until the slot is written back.
        match self.windows.entry(key.to_owned()) {
            Entry::Occupied(mut entry) => {
                let mut slot = Some(*entry.get());
                let decision = update(&mut slot);
                match slot {
                    Some(window) => *entry.get_mut() = window,
                    None => {
                        entry.remove();
                    }
                }
                decision
            }
            Entry::Vacant(entry) => {
                let mut slot = None;
                let decision = update(&mut slot);
                if let Some(window) = slot {
                    entry.insert(window);
                }
                decision
            }
        }
    }

    fn retain(&self, keep: &mut dyn FnMut(&RateLimitWindow) -> bool) {
        self.windows.retain(|_, window| keep(window));
    }

    fn len(&self) -> usize {
        self.windows.len()
    }
}

/// Per-identity rate limiter
#[derive(Clone)]
pub struct AdmissionGate {
    window: Duration,
    max_requests: u32,
    store: Arc<dyn WindowStore>,
}

impl std::fmt::Debug for AdmissionGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionGate")
            .field("window", &self.window)
            .field("max_requests", &self.max_requests)
            .field("tracked", &self.store.len())
            .finish()
    }
}

impl AdmissionGate {
    /// Gate backed by a fresh in-memory store
    #[must_use]
    pub fn new(settings: RateLimitSettings) -> Self {
        Self::with_store(settings, Arc::new(MemoryWindowStore::new()))
    }

    /// Gate backed by an injected store
    #[must_use]
    pub fn with_store(settings: RateLimitSettings, store: Arc<dyn WindowStore>) -> Self {
        Self {
            window: Duration::from_secs(settings.window_secs),
            max_requests: settings.max_requests,
            store,
        }
    }

    /// Decide whether `caller` may make a request now
    pub fn check(&self, caller: &str) -> Admission {
        self.check_at(caller, Instant::now())
    }

    /// Decide whether `caller` may make a request at `now`
    ///
    /// - no window, or the window has run its full duration: start a new window at 1
    /// - count below the maximum: increment and admit
    /// - otherwise reject without counting
    pub fn check_at(&self, caller: &str, now: Instant) -> Admission {
        let window = self.window;
        let max_requests = self.max_requests;

        self.store.update(caller, &mut |slot: &mut Option<RateLimitWindow>| {
            if let Some(current) = slot.as_mut() {
                let elapsed = now.saturating_duration_since(current.window_start);
                if elapsed < window {
                    if current.request_count < max_requests {
                        current.request_count += 1;
                        return Admission::Admitted {
                            remaining: max_requests - current.request_count,
                        };
                    }
                    return Admission::Rejected { retry_after: window.saturating_sub(elapsed) };
                }
            }

            *slot = Some(RateLimitWindow { window_start: now, request_count: 1 });
            Admission::Admitted { remaining: max_requests.saturating_sub(1) }
        })
    }

    /// Drop windows that have run their full duration; returns how many were dropped
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Instant::now())
    }

    pub fn purge_expired_at(&self, now: Instant) -> usize {
        let before = self.store.len();
        let window = self.window;
        self.store.retain(&mut |w: &RateLimitWindow| now.saturating_duration_since(w.window_start) < window);
        before.saturating_sub(self.store.len())
    }

    /// Number of identities currently tracked
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.store.len()
    }
}

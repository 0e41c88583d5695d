// ABOUTME: Sliding-window failed-attempt counter for the authorize credential stage
// ABOUTME: In-memory DashMap keyed by (client, username), cleared on success
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Latchkey Identity

use dashmap::DashMap;
use std::time::{Duration, Instant};

/// Tracks failed credential attempts per (client, username) key within a
/// sliding window. Purely in-memory: a restart forgets all counts, which
/// is acceptable for a brute-force brake.
pub struct AttemptCounter {
    attempts: DashMap<String, Vec<Instant>>,
    limit: u32,
    window: Duration,
}

impl AttemptCounter {
    #[must_use]
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            attempts: DashMap::new(),
            limit,
            window,
        }
    }

    fn key(client_id: &str, username: &str) -> String {
        format!("{client_id}:{username}")
    }

    /// Window start, or `None` when the window reaches past the start of
    /// the monotonic clock (large window, recently booted host). With no
    /// cutoff every recorded attempt counts as recent.
    fn cutoff(&self) -> Option<Instant> {
        Instant::now().checked_sub(self.window)
    }

    fn within_window(cutoff: Option<Instant>, at: Instant) -> bool {
        cutoff.is_none_or(|c| at > c)
    }

    /// Whether another attempt is allowed right now.
    #[must_use]
    pub fn is_allowed(&self, client_id: &str, username: &str) -> bool {
        let key = Self::key(client_id, username);
        let cutoff = self.cutoff();
        match self.attempts.get(&key) {
            Some(entry) => {
                let recent = entry
                    .iter()
                    .filter(|t| Self::within_window(cutoff, **t))
                    .count();
                recent < self.limit as usize
            }
            None => true,
        }
    }

    /// Record a failed attempt, pruning entries older than the window.
    pub fn record_failure(&self, client_id: &str, username: &str) {
        let key = Self::key(client_id, username);
        let cutoff = self.cutoff();
        let mut entry = self.attempts.entry(key).or_default();
        entry.retain(|t| Self::within_window(cutoff, *t));
        entry.push(Instant::now());
    }

    /// Forget all failures for a key after a successful login.
    pub fn clear(&self, client_id: &str, username: &str) {
        self.attempts.remove(&Self::key(client_id, username));
    }
}

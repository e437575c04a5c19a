// Copyright 2025 Scamandrios Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Snapshot of a pool's lifetime counters.
///
/// Counters only grow; take two snapshots and subtract to get a rate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Sessions opened, initial connects and reconnects alike
    pub connections_created: u64,
    pub connections_closed: u64,
    pub acquire_attempts: u64,
    /// Acquires that found no healthy host
    pub acquire_failures: u64,
    /// Calls or idle checks that took a host out of rotation
    pub transport_failures: u64,
    /// Calls replayed on another host after a transport failure
    pub retries: u64,
    /// Host connect attempts, the initial ones included
    pub reconnect_attempts: u64,
    pub reconnect_successes: u64,
    pub quarantines: u64,
    pub uptime_ms: u64,
}

/// Atomic counters behind [`PoolStats`].
pub(crate) struct PoolMetrics {
    started_at: Instant,
    pub connections_created: AtomicU64,
    pub connections_closed: AtomicU64,
    pub acquire_attempts: AtomicU64,
    pub acquire_failures: AtomicU64,
    pub transport_failures: AtomicU64,
    pub retries: AtomicU64,
    pub reconnect_attempts: AtomicU64,
    pub reconnect_successes: AtomicU64,
    pub quarantines: AtomicU64,
}

impl PoolMetrics {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            connections_created: AtomicU64::new(0),
            connections_closed: AtomicU64::new(0),
            acquire_attempts: AtomicU64::new(0),
            acquire_failures: AtomicU64::new(0),
            transport_failures: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            reconnect_attempts: AtomicU64::new(0),
            reconnect_successes: AtomicU64::new(0),
            quarantines: AtomicU64::new(0),
        }
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PoolStats {
        PoolStats {
            connections_created: self.connections_created.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            acquire_attempts: self.acquire_attempts.load(Ordering::Relaxed),
            acquire_failures: self.acquire_failures.load(Ordering::Relaxed),
            transport_failures: self.transport_failures.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            reconnect_successes: self.reconnect_successes.load(Ordering::Relaxed),
            quarantines: self.quarantines.load(Ordering::Relaxed),
            uptime_ms: self.started_at.elapsed().as_millis() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let metrics = PoolMetrics::new();
        PoolMetrics::incr(&metrics.acquire_attempts);
        PoolMetrics::incr(&metrics.acquire_attempts);
        PoolMetrics::add(&metrics.connections_created, 3);
        PoolMetrics::incr(&metrics.quarantines);

        let stats = metrics.snapshot();
        assert_eq!(stats.acquire_attempts, 2);
        assert_eq!(stats.connections_created, 3);
        assert_eq!(stats.quarantines, 1);
        assert_eq!(stats.acquire_failures, 0);
    }

    #[test]
    fn test_stats_serialize() {
        let stats = PoolStats {
            retries: 4,
            ..Default::default()
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["retries"], 4);
        assert_eq!(json["connections_closed"], 0);
    }
}

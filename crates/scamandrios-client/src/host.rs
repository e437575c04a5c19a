use crate::address::HostAddress;
use crate::config::PoolConfig;
use crate::connection::Connection;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Where a host is in its connect / fail / reconnect cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HostState {
    /// Waiting for a connect attempt, or with one in flight
    Pending,
    /// Has ready connections and takes part in selection
    Connected,
    /// Lost its connections; reconnect scheduled after backoff
    Unhealthy,
    /// Failed too often in a row; only an administrative action brings it back
    Quarantined,
}

impl fmt::Display for HostState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HostState::Pending => "pending",
            HostState::Connected => "connected",
            HostState::Unhealthy => "unhealthy",
            HostState::Quarantined => "quarantined",
        };
        f.write_str(name)
    }
}

/// Point-in-time view of one configured host.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostStatus {
    pub addr: HostAddress,
    pub state: HostState,
    pub consecutive_failures: u32,
    pub healthy_connections: usize,
    /// Time left until the next scheduled reconnect, if one is scheduled
    pub retry_in_ms: Option<u64>,
    pub last_error: Option<String>,
}

/// Per-host bookkeeping.
pub(crate) struct HostSlot {
    addr: HostAddress,
    state: HostState,
    connections: Vec<Arc<Connection>>,
    next_connection: usize,
    consecutive_failures: u32,
    retry_at: Option<Instant>,
    generation: u64,
    reconnecting: bool,
    last_error: Option<String>,
}

impl HostSlot {
    fn new(addr: HostAddress, generation: u64) -> Self {
        Self {
            addr,
            state: HostState::Pending,
            connections: Vec::new(),
            next_connection: 0,
            consecutive_failures: 0,
            retry_at: None,
            generation,
            reconnecting: false,
            last_error: None,
        }
    }

    pub(crate) fn addr(&self) -> &HostAddress {
        &self.addr
    }

    pub(crate) fn state(&self) -> HostState {
        self.state
    }

    pub(crate) fn take_connections(&mut self) -> Vec<Arc<Connection>> {
        self.next_connection = 0;
        std::mem::take(&mut self.connections)
    }

    fn healthy_connections(&self) -> usize {
        self.connections.iter().filter(|c| c.is_ready()).count()
    }

    fn next_ready(&mut self) -> Option<Arc<Connection>> {
        let n = self.connections.len();
        for step in 0..n {
            let idx = (self.next_connection + step) % n;
            if self.connections[idx].is_ready() {
                self.next_connection = (idx + 1) % n;
                return Some(Arc::clone(&self.connections[idx]));
            }
        }
        None
    }

    /// Counts a failure, drops every connection and schedules the next
    /// attempt, or quarantines the host once the limit is reached.
    fn record_failure(
        &mut self,
        config: &PoolConfig,
        now: Instant,
        reason: String,
    ) -> Vec<Arc<Connection>> {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.reconnecting = false;
        self.last_error = Some(reason);

        if self.consecutive_failures >= config.max_consecutive_failures.max(1) {
            self.state = HostState::Quarantined;
            self.retry_at = None;
        } else {
            self.state = HostState::Unhealthy;
            self.retry_at = Some(now + config.backoff_delay(self.consecutive_failures));
        }

        self.take_connections()
    }

    fn record_success(&mut self, connections: Vec<Arc<Connection>>) {
        self.state = HostState::Connected;
        self.connections = connections;
        self.next_connection = 0;
        self.consecutive_failures = 0;
        self.retry_at = None;
        self.reconnecting = false;
        self.last_error = None;
    }

    fn is_due(&self, now: Instant) -> bool {
        if self.reconnecting {
            return false;
        }
        match self.state {
            HostState::Pending => true,
            HostState::Unhealthy => self.retry_at.map_or(true, |at| at <= now),
            HostState::Connected | HostState::Quarantined => false,
        }
    }

    fn status(&self, now: Instant) -> HostStatus {
        HostStatus {
            addr: self.addr.clone(),
            state: self.state,
            consecutive_failures: self.consecutive_failures,
            healthy_connections: self.healthy_connections(),
            retry_in_ms: self
                .retry_at
                .map(|at| at.saturating_duration_since(now).as_millis() as u64),
            last_error: self.last_error.clone(),
        }
    }
}

/// Result of [`HostTable::select`].
#[derive(Default)]
pub(crate) struct Selection {
    pub connection: Option<Arc<Connection>>,
    /// Connections pulled out of rotation while looking; close them
    pub discarded: Vec<Arc<Connection>>,
    /// Hosts found with a failed connection during this pass, and the state
    /// each was moved to
    pub failed_hosts: Vec<(HostAddress, HostState)>,
}

/// What happened to a host after a failure was reported against it.
pub(crate) struct FailureOutcome {
    pub discarded: Vec<Arc<Connection>>,
    pub quarantined: bool,
    pub retry_in: Option<Duration>,
}

/// How a finished reconnect attempt was applied.
pub(crate) enum ReconnectOutcome {
    Recovered,
    Failed { retry_in: Duration },
    Quarantined,
    /// The host was removed, reset or re-added while the attempt ran
    Stale(Vec<Arc<Connection>>),
}

/// The configured hosts, in order, plus the round-robin cursor.
pub(crate) struct HostTable {
    slots: Vec<HostSlot>,
    cursor: usize,
    next_generation: u64,
}

impl HostTable {
    pub(crate) fn new(hosts: Vec<HostAddress>) -> Self {
        let mut table = Self {
            slots: Vec::with_capacity(hosts.len()),
            cursor: 0,
            next_generation: 1,
        };
        for addr in hosts {
            table.insert(addr);
        }
        table
    }

    fn bump_generation(&mut self) -> u64 {
        let generation = self.next_generation;
        self.next_generation += 1;
        generation
    }

    pub(crate) fn hosts(&self) -> Vec<HostAddress> {
        self.slots.iter().map(|s| s.addr.clone()).collect()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    fn position(&self, addr: &HostAddress) -> Option<usize> {
        self.slots.iter().position(|s| &s.addr == addr)
    }

    pub(crate) fn get(&self, addr: &HostAddress) -> Option<&HostSlot> {
        self.slots.iter().find(|s| &s.addr == addr)
    }

    /// Appends a pending host. Returns false if it is already configured.
    pub(crate) fn insert(&mut self, addr: HostAddress) -> bool {
        if self.position(&addr).is_some() {
            return false;
        }
        let generation = self.bump_generation();
        self.slots.push(HostSlot::new(addr, generation));
        true
    }

    pub(crate) fn remove(&mut self, addr: &HostAddress) -> Option<HostSlot> {
        let idx = self.position(addr)?;
        let slot = self.slots.remove(idx);

        if idx < self.cursor {
            self.cursor -= 1;
        }
        if self.cursor >= self.slots.len() {
            self.cursor = 0;
        }
        Some(slot)
    }

    /// Puts a host back to `pending` with a clean failure count, cancelling
    /// any reconnect already in flight.
    pub(crate) fn reset(&mut self, addr: &HostAddress) -> Option<Vec<Arc<Connection>>> {
        let generation = self.bump_generation();
        let slot = self.slots.iter_mut().find(|s| &s.addr == addr)?;
        slot.generation = generation;
        slot.state = HostState::Pending;
        slot.consecutive_failures = 0;
        slot.retry_at = None;
        slot.reconnecting = false;
        slot.last_error = None;
        Some(slot.take_connections())
    }

    /// Picks the next ready connection, starting at the cursor and skipping
    /// hosts that are not connected.
    pub(crate) fn select(&mut self, config: &PoolConfig, now: Instant) -> Selection {
        let mut selection = Selection::default();
        let n = self.slots.len();

        for step in 0..n {
            let idx = (self.cursor + step) % n;
            let slot = &mut self.slots[idx];
            if slot.state != HostState::Connected {
                continue;
            }

            if slot.connections.iter().any(|c| !c.is_ready()) {
                let reason = "connection failed while idle".to_string();
                selection
                    .discarded
                    .extend(slot.record_failure(config, now, reason));
                selection.failed_hosts.push((slot.addr.clone(), slot.state));
                continue;
            }

            if let Some(connection) = slot.next_ready() {
                self.cursor = (idx + 1) % n;
                selection.connection = Some(connection);
                return selection;
            }
        }

        selection
    }

    /// Takes a host out of rotation because `connection` failed.
    ///
    /// Returns `None` if the connection no longer belongs to a connected host,
    /// i.e. the failure was already handled.
    pub(crate) fn fail_connection(
        &mut self,
        connection: &Connection,
        reason: String,
        config: &PoolConfig,
        now: Instant,
    ) -> Option<FailureOutcome> {
        let slot = self
            .slots
            .iter_mut()
            .find(|s| &s.addr == connection.addr())?;

        let owned = slot.connections.iter().any(|c| c.id() == connection.id());
        if slot.state != HostState::Connected || !owned {
            return None;
        }

        let discarded = slot.record_failure(config, now, reason);
        Some(FailureOutcome {
            discarded,
            quarantined: slot.state == HostState::Quarantined,
            retry_in: slot.retry_at.map(|at| at.saturating_duration_since(now)),
        })
    }

    /// Claims every host whose reconnect is due. Returns `(addr, generation)`
    /// tickets to hand back to [`finish_reconnect`](Self::finish_reconnect).
    pub(crate) fn claim_due(&mut self, now: Instant) -> Vec<(HostAddress, u64)> {
        self.slots
            .iter_mut()
            .filter(|s| s.is_due(now))
            .map(|s| {
                s.state = HostState::Pending;
                s.reconnecting = true;
                (s.addr.clone(), s.generation)
            })
            .collect()
    }

    /// Claims one host for a reconnect regardless of backoff or quarantine.
    /// `None` if the host is unknown, connected, or already reconnecting.
    pub(crate) fn claim(&mut self, addr: &HostAddress) -> Option<u64> {
        let slot = self.slots.iter_mut().find(|s| &s.addr == addr)?;
        if slot.reconnecting || slot.state == HostState::Connected {
            return None;
        }
        slot.state = HostState::Pending;
        slot.reconnecting = true;
        Some(slot.generation)
    }

    pub(crate) fn finish_reconnect(
        &mut self,
        addr: &HostAddress,
        generation: u64,
        result: Result<Vec<Arc<Connection>>, String>,
        config: &PoolConfig,
        now: Instant,
    ) -> ReconnectOutcome {
        let slot = match self.slots.iter_mut().find(|s| &s.addr == addr) {
            Some(slot) if slot.generation == generation && slot.reconnecting => slot,
            _ => return ReconnectOutcome::Stale(result.unwrap_or_default()),
        };

        match result {
            Ok(connections) => {
                slot.record_success(connections);
                ReconnectOutcome::Recovered
            }
            Err(reason) => {
                // nothing was installed, so there is nothing to discard
                slot.record_failure(config, now, reason);
                match (slot.state, slot.retry_at) {
                    (HostState::Quarantined, _) => ReconnectOutcome::Quarantined,
                    (_, Some(at)) => ReconnectOutcome::Failed {
                        retry_in: at.saturating_duration_since(now),
                    },
                    _ => ReconnectOutcome::Failed {
                        retry_in: Duration::ZERO,
                    },
                }
            }
        }
    }

    /// Empties every slot. Used on pool close.
    pub(crate) fn drain(&mut self) -> Vec<Arc<Connection>> {
        self.slots
            .iter_mut()
            .flat_map(|s| s.take_connections())
            .collect()
    }

    pub(crate) fn statuses(&self, now: Instant) -> Vec<HostStatus> {
        self.slots.iter().map(|s| s.status(now)).collect()
    }

}

/// Removes duplicate addresses, keeping the first occurrence.
pub(crate) fn dedupe(hosts: Vec<HostAddress>) -> Vec<HostAddress> {
    let mut seen = HashSet::new();
    hosts.into_iter().filter(|h| seen.insert(h.clone())).collect()
}

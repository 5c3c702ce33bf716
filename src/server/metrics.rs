//! Relay metrics collection.
//!
//! Aggregate counters only; nothing identifies a client or a target.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::proxy::CloseReason;
use crate::server::session::SessionOutcome;

/// Relay metrics collector.
pub struct ServerMetrics {
    /// Start time
    start_time: Instant,
    /// Sessions accepted
    total_sessions: AtomicU64,
    /// Sessions currently running
    active_sessions: AtomicU64,
    /// Bytes written towards targets
    bytes_upstream: AtomicU64,
    /// Bytes written towards clients
    bytes_downstream: AtomicU64,
    /// Sessions aborted for malformed or unauthenticated input
    protocol_errors: AtomicU64,
    /// Sessions closed by an idle timer
    idle_timeouts: AtomicU64,
    /// Sessions aborted by resolve, connect or transport failure
    transport_errors: AtomicU64,
}

impl ServerMetrics {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            total_sessions: AtomicU64::new(0),
            active_sessions: AtomicU64::new(0),
            bytes_upstream: AtomicU64::new(0),
            bytes_downstream: AtomicU64::new(0),
            protocol_errors: AtomicU64::new(0),
            idle_timeouts: AtomicU64::new(0),
            transport_errors: AtomicU64::new(0),
        }
    }

    /// Count a newly accepted session.
    pub fn session_started(&self) {
        self.total_sessions.fetch_add(1, Ordering::Relaxed);
        self.active_sessions.fetch_add(1, Ordering::Relaxed);
    }

    /// Fold a finished session into the totals.
    pub fn session_finished(&self, outcome: &SessionOutcome) {
        self.active_sessions.fetch_sub(1, Ordering::Relaxed);
        self.bytes_upstream
            .fetch_add(outcome.client_to_target, Ordering::Relaxed);
        self.bytes_downstream
            .fetch_add(outcome.target_to_client, Ordering::Relaxed);
        match outcome.reason {
            CloseReason::ProtocolError(_) => {
                self.protocol_errors.fetch_add(1, Ordering::Relaxed);
            }
            CloseReason::IdleTimeout => {
                self.idle_timeouts.fetch_add(1, Ordering::Relaxed);
            }
            CloseReason::Failed(_) => {
                self.transport_errors.fetch_add(1, Ordering::Relaxed);
            }
            CloseReason::Finished | CloseReason::Shutdown => {}
        }
    }

    /// Get uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Get total sessions.
    pub fn total_sessions(&self) -> u64 {
        self.total_sessions.load(Ordering::Relaxed)
    }

    /// Get active sessions.
    pub fn active_sessions(&self) -> u64 {
        self.active_sessions.load(Ordering::Relaxed)
    }

    /// Get a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        // Active before total: a concurrent start can then only raise total
        let active_sessions = self.active_sessions();
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            total_sessions: self.total_sessions(),
            active_sessions,
            bytes_upstream: self.bytes_upstream.load(Ordering::Relaxed),
            bytes_downstream: self.bytes_downstream.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
            idle_timeouts: self.idle_timeouts.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
        }
    }

    /// Format metrics as a simple text report.
    pub fn format_report(&self) -> String {
        let snapshot = self.snapshot();

        format!(
            r#"Relay Metrics
=============
Uptime: {} seconds

Sessions:
  Total:  {}
  Active: {}

Traffic:
  Upstream:   {} bytes
  Downstream: {} bytes

Closed abnormally:
  Protocol Errors:  {}
  Idle Timeouts:    {}
  Transport Errors: {}
"#,
            snapshot.uptime_secs,
            snapshot.total_sessions,
            snapshot.active_sessions,
            snapshot.bytes_upstream,
            snapshot.bytes_downstream,
            snapshot.protocol_errors,
            snapshot.idle_timeouts,
            snapshot.transport_errors,
        )
    }
}

impl Default for ServerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of all metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Seconds since the collector was created
    pub uptime_secs: u64,
    /// Sessions accepted
    pub total_sessions: u64,
    /// Sessions running at snapshot time
    pub active_sessions: u64,
    /// Bytes written towards targets
    pub bytes_upstream: u64,
    /// Bytes written towards clients
    pub bytes_downstream: u64,
    /// Sessions aborted for malformed or unauthenticated input
    pub protocol_errors: u64,
    /// Sessions closed by an idle timer
    pub idle_timeouts: u64,
    /// Sessions aborted by resolve, connect or transport failure
    pub transport_errors: u64,
}

impl MetricsSnapshot {
    /// Share of finished sessions that ended abnormally.
    pub fn abort_rate(&self) -> f64 {
        let finished = self.total_sessions.saturating_sub(self.active_sessions);
        if finished == 0 {
            0.0
        } else {
            (self.protocol_errors + self.idle_timeouts + self.transport_errors) as f64 / finished as f64
        }
    }

    /// Calculate throughput in bytes per second.
    pub fn throughput_bps(&self) -> f64 {
        if self.uptime_secs == 0 {
            0.0
        } else {
            (self.bytes_upstream + self.bytes_downstream) as f64 / self.uptime_secs as f64
        }
    }
}

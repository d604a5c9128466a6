//! Observability and Metrics
//!
//! Per-session counters for frames, handshakes and dispatch health.
//!
//! Uses atomic counters for thread-safe metrics collection. There is no global
//! instance; each `Session` owns one and exposes it through `Session::metrics()`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};

/// Metrics collector for one session
#[derive(Debug)]
pub struct Metrics {
    /// Total connections opened
    pub connections_total: AtomicU64,
    /// Frames read off the socket
    pub frames_received: AtomicU64,
    /// Frames written to the socket
    pub frames_sent: AtomicU64,
    /// Plaintext bytes received
    pub bytes_received: AtomicU64,
    /// Plaintext bytes sent
    pub bytes_sent: AtomicU64,
    /// Encrypt requests answered
    pub handshakes_total: AtomicU64,
    /// Encrypt results accepted
    pub handshakes_success: AtomicU64,
    /// Encrypt results refused by the server
    pub handshakes_rejected: AtomicU64,
    /// Multi containers unpacked
    pub multi_expanded: AtomicU64,
    /// Multi containers dropped for bad compression
    pub decompression_failures: AtomicU64,
    /// Handler invocations that returned an error
    pub handler_failures: AtomicU64,
    /// Connections torn down by a fatal error
    pub fatal_errors: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            connections_total: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            frames_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            handshakes_total: AtomicU64::new(0),
            handshakes_success: AtomicU64::new(0),
            handshakes_rejected: AtomicU64::new(0),
            multi_expanded: AtomicU64::new(0),
            decompression_failures: AtomicU64::new(0),
            handler_failures: AtomicU64::new(0),
            fatal_errors: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn connection_opened(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_received(&self, byte_count: usize) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received
            .fetch_add(byte_count as u64, Ordering::Relaxed);
    }

    pub fn frame_sent(&self, byte_count: usize) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count as u64, Ordering::Relaxed);
    }

    pub fn handshake_attempt(&self) {
        self.handshakes_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_success(&self) {
        self.handshakes_success.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_rejected(&self) {
        self.handshakes_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn multi_expanded(&self) {
        self.multi_expanded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decompression_failure(&self) {
        self.decompression_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handler_failures(&self, count: usize) {
        self.handler_failures
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn fatal_error(&self) {
        self.fatal_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            handshakes_total: self.handshakes_total.load(Ordering::Relaxed),
            handshakes_success: self.handshakes_success.load(Ordering::Relaxed),
            handshakes_rejected: self.handshakes_rejected.load(Ordering::Relaxed),
            multi_expanded: self.multi_expanded.load(Ordering::Relaxed),
            decompression_failures: self.decompression_failures.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            fatal_errors: self.fatal_errors.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            connections_total = snapshot.connections_total,
            frames_received = snapshot.frames_received,
            frames_sent = snapshot.frames_sent,
            bytes_received = snapshot.bytes_received,
            bytes_sent = snapshot.bytes_sent,
            handshakes_total = snapshot.handshakes_total,
            handshakes_success = snapshot.handshakes_success,
            handshakes_rejected = snapshot.handshakes_rejected,
            multi_expanded = snapshot.multi_expanded,
            decompression_failures = snapshot.decompression_failures,
            handler_failures = snapshot.handler_failures,
            fatal_errors = snapshot.fatal_errors,
            uptime_seconds = snapshot.uptime_seconds,
            "Session metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub connections_total: u64,
    pub frames_received: u64,
    pub frames_sent: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub handshakes_total: u64,
    pub handshakes_success: u64,
    pub handshakes_rejected: u64,
    pub multi_expanded: u64,
    pub decompression_failures: u64,
    pub handler_failures: u64,
    pub fatal_errors: u64,
    pub uptime_seconds: u64,
}

/// Timer for measuring operation duration
pub struct Timer {
    start: Instant,
    operation: &'static str,
}

impl Timer {
    /// Start timing an operation
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        debug!(
            operation = self.operation,
            duration_ms = duration.as_millis(),
            "Operation completed"
        );
    }
}

//! Prometheus metrics for monitoring.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Metrics collector.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Total requests processed
    pub requests_total: AtomicU64,
    /// Requests answered with a result
    pub requests_success: AtomicU64,
    /// Requests answered with an error
    pub requests_failed: AtomicU64,
    /// Notifications received
    pub notifications_total: AtomicU64,
    /// Tool calls
    pub tool_calls: AtomicU64,
    /// Sessions created
    pub sessions_created: AtomicU64,
    /// Tasks that reached a terminal state
    pub tasks_finished: AtomicU64,
    /// Tasks cancelled by a client
    pub tasks_cancelled: AtomicU64,
    /// Request latency sum, microseconds
    pub latency_us_total: AtomicU64,
}

impl Metrics {
    /// Create a new metrics collector.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Increment requests total.
    pub fn inc_requests(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment successful requests.
    pub fn inc_success(&self) {
        self.requests_success.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment failed requests.
    pub fn inc_failed(&self) {
        self.requests_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment notifications received.
    pub fn inc_notifications(&self) {
        self.notifications_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment tool calls.
    pub fn inc_tool_calls(&self) {
        self.tool_calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment sessions created.
    pub fn inc_sessions(&self) {
        self.sessions_created.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment tasks that reached a terminal state.
    pub fn inc_tasks_finished(&self) {
        self.tasks_finished.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment tasks cancelled by a client.
    pub fn inc_tasks_cancelled(&self) {
        self.tasks_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    /// Add a request latency sample.
    pub fn observe_latency(&self, timer: &Timer) {
        self.latency_us_total
            .fetch_add(timer.elapsed_us(), Ordering::Relaxed);
    }

    /// Get all metrics as a snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            requests_success: self.requests_success.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            notifications_total: self.notifications_total.load(Ordering::Relaxed),
            tool_calls: self.tool_calls.load(Ordering::Relaxed),
            sessions_created: self.sessions_created.load(Ordering::Relaxed),
            tasks_finished: self.tasks_finished.load(Ordering::Relaxed),
            tasks_cancelled: self.tasks_cancelled.load(Ordering::Relaxed),
            latency_us_total: self.latency_us_total.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus format.
    pub fn to_prometheus(&self) -> String {
        let s = self.snapshot();
        format!(
            r#"# HELP agent_bridge_requests_total Total number of requests
# TYPE agent_bridge_requests_total counter
agent_bridge_requests_total {}

# HELP agent_bridge_requests_success Successful requests
# TYPE agent_bridge_requests_success counter
agent_bridge_requests_success {}

# HELP agent_bridge_requests_failed Failed requests
# TYPE agent_bridge_requests_failed counter
agent_bridge_requests_failed {}

# HELP agent_bridge_notifications_total Notifications received
# TYPE agent_bridge_notifications_total counter
agent_bridge_notifications_total {}

# HELP agent_bridge_tool_calls Tool calls count
# TYPE agent_bridge_tool_calls counter
agent_bridge_tool_calls {}

# HELP agent_bridge_sessions_created Sessions created
# TYPE agent_bridge_sessions_created counter
agent_bridge_sessions_created {}

# HELP agent_bridge_tasks_finished Tasks that reached a terminal state
# TYPE agent_bridge_tasks_finished counter
agent_bridge_tasks_finished {}

# HELP agent_bridge_tasks_cancelled Tasks cancelled by clients
# TYPE agent_bridge_tasks_cancelled counter
agent_bridge_tasks_cancelled {}

# HELP agent_bridge_request_latency_microseconds_sum Total request latency
# TYPE agent_bridge_request_latency_microseconds_sum counter
agent_bridge_request_latency_microseconds_sum {}
"#,
            s.requests_total,
            s.requests_success,
            s.requests_failed,
            s.notifications_total,
            s.tool_calls,
            s.sessions_created,
            s.tasks_finished,
            s.tasks_cancelled,
            s.latency_us_total
        )
    }
}

/// Metrics snapshot.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub requests_success: u64,
    pub requests_failed: u64,
    pub notifications_total: u64,
    pub tool_calls: u64,
    pub sessions_created: u64,
    pub tasks_finished: u64,
    pub tasks_cancelled: u64,
    pub latency_us_total: u64,
}

/// Timer for measuring durations.
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed time in microseconds.
    pub fn elapsed_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }

    /// Get elapsed time in milliseconds.
    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = Metrics::new();
        metrics.inc_requests();
        metrics.inc_requests();
        metrics.inc_failed();
        metrics.inc_tool_calls();

        let s = metrics.snapshot();
        assert_eq!(s.requests_total, 2);
        assert_eq!(s.requests_failed, 1);
        assert_eq!(s.tool_calls, 1);
        assert_eq!(s.requests_success, 0);
    }

    #[test]
    fn test_prometheus_export() {
        let metrics = Metrics::new();
        metrics.inc_sessions();
        let text = metrics.to_prometheus();
        assert!(text.contains("# TYPE agent_bridge_requests_total counter"));
        assert!(text.contains("agent_bridge_sessions_created 1"));
    }

    #[test]
    fn test_latency_accumulates() {
        let metrics = Metrics::new();
        let timer = Timer::start();
        std::thread::sleep(std::time::Duration::from_millis(2));
        metrics.observe_latency(&timer);
        assert!(metrics.snapshot().latency_us_total >= 2000);
        assert!(timer.elapsed_ms() >= 2);
    }
}

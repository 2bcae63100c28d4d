//! Health signal layered atop a child's lifecycle state (spec §9, supplemental):
//! a sliding-window error rate plus a rolling stderr buffer, ported from the
//! teacher's server health tracking and reused as-is since the model transfers
//! unchanged — only the thing being tracked (a child process, not a managed
//! MCP server) is renamed.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Four-state health model, orthogonal to `ChildState` (spec §4.1): a child
/// can be `Ready` and still be `Degraded` or `Unhealthy` if its recent calls
/// are failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    /// Insufficient samples to determine health (fewer than 5).
    Starting,
    /// Error rate below 5%.
    Healthy,
    /// Error rate between 5% and 50%.
    Degraded,
    /// Error rate above 50%.
    Unhealthy,
}

/// Tracks call success/error events in a sliding time window to compute
/// health state.
pub struct ErrorRateTracker {
    window: VecDeque<(Instant, bool)>,
    window_duration: Duration,
}

impl ErrorRateTracker {
    pub fn new(window_duration: Duration) -> Self {
        Self {
            window: VecDeque::new(),
            window_duration,
        }
    }

    pub fn record_success(&mut self) {
        self.window.push_back((Instant::now(), false));
        self.prune();
    }

    pub fn record_error(&mut self) {
        self.window.push_back((Instant::now(), true));
        self.prune();
    }

    pub fn health_state(&self) -> HealthState {
        let total = self.window.len();
        if total < 5 {
            return HealthState::Starting;
        }

        let errors = self.window.iter().filter(|(_, is_err)| *is_err).count();
        let error_rate = errors as f64 / total as f64;

        if error_rate < 0.05 {
            HealthState::Healthy
        } else if error_rate <= 0.50 {
            HealthState::Degraded
        } else {
            HealthState::Unhealthy
        }
    }

    fn prune(&mut self) {
        let cutoff = Instant::now() - self.window_duration;
        while let Some((ts, _)) = self.window.front() {
            if *ts < cutoff {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.window.len()
    }
}

/// Rolling buffer for a child's stderr output, surfaced in diagnostics (spec
/// §6.5 `/status`).
pub struct StderrBuffer {
    lines: VecDeque<String>,
    capacity: usize,
}

impl StderrBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            capacity,
        }
    }

    pub fn push(&mut self, line: String) {
        if self.lines.len() >= self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    pub fn lines(&self) -> &VecDeque<String> {
        &self.lines
    }
}

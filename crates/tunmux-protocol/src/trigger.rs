//! Bundle flush trigger policy.
//!
//! After every successful append, and on every scheduling tick, the policy
//! decides whether the in-progress bundle must be flushed now.

use std::time::{Duration, Instant};

use tunmux_core::{config::MuxConfig, constants::RAISED_PACKET_COUNT_LIMIT};

/// Why a bundle was flushed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushReason {
    /// The configured packet count was reached.
    CountLimit,
    /// The accumulated size crossed the threshold.
    SizeThreshold,
    /// Too long since the last flush.
    Timeout,
    /// The polling period expired.
    Period,
}

/// Snapshot of the in-progress bundle the policy is evaluated against.
#[derive(Clone, Copy, Debug)]
pub struct TriggerState {
    /// Packets currently stored in the bundle.
    pub packet_count: usize,
    /// Flush-time size of the bundle.
    pub accumulated_size: usize,
    /// When the bundle was last flushed (or the session started).
    pub last_flush: Instant,
}

/// Flush decision policy, normalized from the operator configuration.
///
/// With no limit configured the policy preserves unbuffered behavior by
/// flushing every single packet (count limit 1). Configuring any of
/// size/timeout/period/count raises the count ceiling to a large constant
/// so the configured condition governs. A timeout shorter than the period
/// is ineffective, since the period always fires first.
#[derive(Clone, Debug)]
pub struct TriggerPolicy {
    count_limit: usize,
    size_threshold: Option<usize>,
    timeout: Option<Duration>,
    period: Option<Duration>,
}

impl TriggerPolicy {
    /// Builds the policy from the operator configuration.
    pub fn from_config(config: &MuxConfig) -> Self {
        let any_limit = config.packet_count_limit.is_some()
            || config.size_threshold.is_some()
            || config.timeout.is_some()
            || config.period.is_some();
        let count_limit = config
            .packet_count_limit
            .unwrap_or(if any_limit { RAISED_PACKET_COUNT_LIMIT } else { 1 });
        Self {
            count_limit,
            size_threshold: config.size_threshold,
            timeout: config.timeout,
            period: config.period,
        }
    }

    /// Pure flush decision; an empty bundle never flushes.
    pub fn should_flush(&self, state: &TriggerState, now: Instant) -> Option<FlushReason> {
        if state.packet_count == 0 {
            return None;
        }
        if state.packet_count >= self.count_limit {
            return Some(FlushReason::CountLimit);
        }
        if let Some(threshold) = self.size_threshold {
            if state.accumulated_size > threshold {
                return Some(FlushReason::SizeThreshold);
            }
        }
        let elapsed = now.saturating_duration_since(state.last_flush);
        // Period before timeout: when both are due the period fires first.
        if let Some(period) = self.period {
            if elapsed >= period {
                return Some(FlushReason::Period);
            }
        }
        if let Some(timeout) = self.timeout {
            if elapsed > timeout {
                return Some(FlushReason::Timeout);
            }
        }
        None
    }

    /// Earliest instant at which a time-driven flush could fire, for the
    /// surrounding loop to compute its scheduling tick.
    pub fn next_deadline(&self, last_flush: Instant) -> Option<Instant> {
        let period_deadline = self.period.map(|p| last_flush + p);
        let timeout_deadline = self.timeout.map(|t| last_flush + t);
        match (period_deadline, timeout_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        }
    }
}

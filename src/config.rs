//! Kernel-wide tunables.
//!
//! Plain struct with `Default`, no builder machinery -- there's nothing
//! here that benefits from one.

/// Ticks a thread may run before the reschedule algorithm considers
/// boosting starved lower-priority threads.
pub const DEFAULT_PRIORITY_BOOST_THRESHOLD_TICKS: u64 = 2_000_000;

/// Priority floor a boosted thread is raised to (lower number = higher
/// priority in the 3DS scheme, 0..=63).
pub const DEFAULT_PRIORITY_BOOST_FLOOR: u8 = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    /// Enables the starvation-avoidance priority boost in the reschedule
    /// algorithm. On by default: leaving it off is observably wrong for
    /// long-running guest code, since a low-priority thread can then be
    /// starved indefinitely by a tight high-priority loop.
    pub priority_boost_enabled: bool,
    pub priority_boost_threshold_ticks: u64,
    pub priority_boost_floor: u8,
    /// Maximum simultaneous sessions accepted by a single server port.
    pub max_sessions_per_port: u32,
    /// Maximum number of open handles per process handle table.
    pub max_handles_per_process: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        KernelConfig {
            priority_boost_enabled: true,
            priority_boost_threshold_ticks: DEFAULT_PRIORITY_BOOST_THRESHOLD_TICKS,
            priority_boost_floor: DEFAULT_PRIORITY_BOOST_FLOOR,
            max_sessions_per_port: 64,
            max_handles_per_process: 4096,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_constants() {
        let cfg = KernelConfig::default();
        assert_eq!(cfg.priority_boost_threshold_ticks, 2_000_000);
        assert_eq!(cfg.priority_boost_floor, 40);
        assert!(cfg.priority_boost_enabled);
    }
}

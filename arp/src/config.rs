//! Engine configuration

use std::time::Duration;

use crate::constants::{ANNOUNCE_NUM, ANNOUNCE_WAIT, PROBE_MAX, PROBE_MIN, PROBE_NUM};

/// Who puts announcements on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AcdMode {
    /// We send every probe and announcement ourselves.
    #[default]
    Userspace,
    /// The kernel announces addresses on its own (RFC 5227 aware stacks).
    /// Announcements are still counted and timed so callers see the same
    /// callbacks at the same moments.
    Kernel,
}

/// Timing and strategy parameters for conflict detection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcdConfig {
    pub mode: AcdMode,
    /// Number of probes sent before the address is considered free
    pub probe_num: u32,
    /// Lower bound of the random delay between probes
    pub probe_min: Duration,
    /// Upper bound (exclusive) of the random delay between probes
    pub probe_max: Duration,
    /// Delay after the last probe, and between announcements
    pub announce_wait: Duration,
    /// Number of announcements sent once the address is claimed
    pub announce_num: u32,
}

impl Default for AcdConfig {
    fn default() -> Self {
        Self {
            mode: AcdMode::Userspace,
            probe_num: PROBE_NUM,
            probe_min: PROBE_MIN,
            probe_max: PROBE_MAX,
            announce_wait: ANNOUNCE_WAIT,
            announce_num: ANNOUNCE_NUM,
        }
    }
}

impl AcdConfig {
    /// RFC 5227 defaults with announcements left to the kernel.
    pub fn kernel_assisted() -> Self {
        Self {
            mode: AcdMode::Kernel,
            ..Self::default()
        }
    }

    pub fn with_mode(mut self, mode: AcdMode) -> Self {
        self.mode = mode;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_rfc5227() {
        let config = AcdConfig::default();
        assert_eq!(config.mode, AcdMode::Userspace);
        assert_eq!(config.probe_num, 3);
        assert_eq!(config.probe_min, Duration::from_secs(1));
        assert_eq!(config.probe_max, Duration::from_secs(2));
        assert_eq!(config.announce_wait, Duration::from_secs(2));
        assert_eq!(config.announce_num, 2);
    }

    #[test]
    fn kernel_assisted_keeps_timings() {
        let config = AcdConfig::kernel_assisted();
        assert_eq!(config.mode, AcdMode::Kernel);
        assert_eq!(config, AcdConfig::default().with_mode(AcdMode::Kernel));
    }
}

//! Timing configuration for device workers.

use std::time::Duration;

use crate::api::models::ScanInterval;
use crate::types::constants::{scan_interval, timeouts};

/// Timeouts and polling intervals used by device workers.
///
/// Every bounded wait the workers perform reads its limit from here, so
/// tests and slow hardware can stretch or shrink them.
///
/// # Example
///
/// ```
/// use nmd::TimeoutConfig;
/// use std::time::Duration;
///
/// let config = TimeoutConfig::new()
///     .with_association_pause(Duration::from_secs(3))
///     .with_dhcp_timeout(Duration::from_secs(30));
/// assert_eq!(config.dhcp_timeout, Duration::from_secs(30));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutConfig {
    /// Link stability polls per second.
    pub link_polls_per_sec: u32,
    /// Stable polls that must be exceeded before a link is declared.
    pub link_required_ticks: u32,
    /// Association wait for cards with at most 14 channels.
    pub association_pause: Duration,
    /// Association wait for cards with more channels to sweep.
    pub association_pause_long: Duration,
    /// Unseen APs older than this are evicted.
    pub ap_max_age: Duration,
    /// Delay between triggering a scan and reading results.
    pub scan_result_wait: Duration,
    pub scan_retry_interval: Duration,
    pub scan_retry_ceiling: Duration,
    /// Interval and count for interface up/down polling.
    pub iface_poll_interval: Duration,
    pub iface_poll_tries: u32,
    /// How often a cancelling caller checks whether the worker has stopped.
    pub cancel_poll_interval: Duration,
    /// Upper bound on a DHCP transaction before it counts as timed out.
    pub dhcp_timeout: Duration,
    pub scan_interval_init: Duration,
    pub scan_interval_active: Duration,
    pub scan_interval_inactive: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            link_polls_per_sec: timeouts::LINK_POLLS_PER_SEC,
            link_required_ticks: timeouts::LINK_REQUIRED_TICKS,
            association_pause: timeouts::association_pause(),
            association_pause_long: timeouts::association_pause_long(),
            ap_max_age: timeouts::ap_max_age(),
            scan_result_wait: timeouts::scan_result_wait(),
            scan_retry_interval: timeouts::scan_retry_interval(),
            scan_retry_ceiling: timeouts::scan_retry_ceiling(),
            iface_poll_interval: timeouts::iface_poll_interval(),
            iface_poll_tries: timeouts::IFACE_POLL_TRIES,
            cancel_poll_interval: timeouts::cancel_poll_interval(),
            dhcp_timeout: timeouts::dhcp_ceiling(),
            scan_interval_init: scan_interval::INIT,
            scan_interval_active: scan_interval::ACTIVE,
            scan_interval_inactive: scan_interval::INACTIVE,
        }
    }
}

impl TimeoutConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_link_polling(mut self, polls_per_sec: u32, required_ticks: u32) -> Self {
        self.link_polls_per_sec = polls_per_sec.max(1);
        self.link_required_ticks = required_ticks.max(1);
        self
    }

    pub fn with_association_pause(mut self, pause: Duration) -> Self {
        self.association_pause = pause;
        self
    }

    pub fn with_association_pause_long(mut self, pause: Duration) -> Self {
        self.association_pause_long = pause;
        self
    }

    pub fn with_ap_max_age(mut self, age: Duration) -> Self {
        self.ap_max_age = age;
        self
    }

    pub fn with_scan_result_wait(mut self, wait: Duration) -> Self {
        self.scan_result_wait = wait;
        self
    }

    pub fn with_cancel_poll_interval(mut self, interval: Duration) -> Self {
        self.cancel_poll_interval = interval;
        self
    }

    pub fn with_dhcp_timeout(mut self, timeout: Duration) -> Self {
        self.dhcp_timeout = timeout;
        self
    }

    pub fn with_scan_intervals(mut self, init: Duration, active: Duration, inactive: Duration) -> Self {
        self.scan_interval_init = init;
        self.scan_interval_active = active;
        self.scan_interval_inactive = inactive;
        self
    }

    /// Interval between link stability polls.
    pub(crate) fn link_poll_interval(&self) -> Duration {
        Duration::from_secs(1) / self.link_polls_per_sec.max(1)
    }

    /// Shortest link wait that can still observe the required stable ticks twice.
    pub(crate) fn link_min_timeout(&self) -> Duration {
        let ticks_per_required = (self.link_polls_per_sec / self.link_required_ticks.max(1)).max(1);
        Duration::from_secs(u64::from(2 * ticks_per_required))
    }

    /// Delay before the next scan at the given cadence.
    pub fn scan_interval(&self, interval: ScanInterval) -> Duration {
        match interval {
            ScanInterval::Init => self.scan_interval_init,
            ScanInterval::Active => self.scan_interval_active,
            ScanInterval::Inactive => self.scan_interval_inactive,
        }
    }

    /// How long to wait for association, by number of supported frequencies.
    pub(crate) fn association_pause_for(&self, num_freqs: usize) -> Duration {
        if num_freqs > crate::types::constants::limits::BASIC_FREQ_COUNT {
            self.association_pause_long
        } else {
            self.association_pause
        }
    }
}

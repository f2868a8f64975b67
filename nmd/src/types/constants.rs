//! Constants for wireless-extension scan data and device timing.
//!
//! Command codes and flag bits match the values the kernel's wireless
//! extensions place in scan result streams. Timing values mirror the
//! pacing the device worker has always used for link and scan polling.

/// Wireless-extension event command codes found in scan result streams.
pub mod wext_cmd {
    pub const SIOCGIWFREQ: u16 = 0x8B05;
    pub const SIOCGIWMODE: u16 = 0x8B07;
    pub const SIOCGIWAP: u16 = 0x8B15;
    pub const SIOCGIWESSID: u16 = 0x8B1B;
    pub const SIOCGIWENCODE: u16 = 0x8B2B;
    pub const IWEVQUAL: u16 = 0x8C01;
    pub const IWEVCUSTOM: u16 = 0x8C02;
    pub const IWEVGENIE: u16 = 0x8C05;
}

/// Scan stream layout.
pub mod wext_layout {
    /// Event header: `len: u16` followed by `cmd: u16`.
    pub const EVENT_HEADER_LEN: usize = 4;
    /// Point payload header: `length: u16` followed by `flags: u16`.
    pub const POINT_HEADER_LEN: usize = 4;
    /// `sockaddr` family field preceding the hardware address.
    pub const SOCKADDR_FAMILY_LEN: usize = 2;
    pub const FREQ_PAYLOAD_LEN: usize = 8;
    pub const QUAL_PAYLOAD_LEN: usize = 4;
    pub const MODE_PAYLOAD_LEN: usize = 4;
}

/// Wireless-extension operating modes.
pub mod wext_mode {
    pub const ADHOC: u32 = 1;
    pub const INFRA: u32 = 2;
    pub const MASTER: u32 = 3;
}

/// Flag bits carried by `SIOCGIWENCODE` point events.
pub mod encode_flags {
    pub const DISABLED: u16 = 0x8000;
}

/// Information element tags and prefixes.
pub mod ie {
    pub const WPA_TAG: u8 = 0xdd;
    pub const RSN_TAG: u8 = 0x30;
    /// OUI + type prefix identifying a WPA vendor IE.
    pub const WPA_OUI: [u8; 4] = [0x00, 0x50, 0xf2, 0x01];
    pub const MAX_WPA_IE_LEN: usize = 40;
    pub const CUSTOM_WPA_PREFIX: &str = "wpa_ie=";
    pub const CUSTOM_RSN_PREFIX: &str = "rsn_ie=";
}

/// Size limits imposed by the hardware.
pub mod limits {
    pub const MAX_ESSID_LEN: usize = 32;
    /// Some drivers report hidden networks with this literal essid.
    pub const HIDDEN_ESSID: &str = "<hidden>";
    /// Initial scan result buffer size.
    pub const SCAN_BUFFER_INITIAL: usize = 4096;
    /// Scan result buffers never grow past this.
    pub const SCAN_BUFFER_MAX: usize = 100_000;
    /// Cards that support more than this many frequencies scan slower.
    pub const BASIC_FREQ_COUNT: usize = 14;
    pub const MAX_FAILED_LINK_CHECKS: u32 = 3;
    pub const MAX_INVALID_STRENGTH_READS: u32 = 3;
    /// Minimum bitrate (kb/s) applied to ad-hoc networks.
    pub const ADHOC_MIN_BITRATE: i32 = 11_000;
}

/// 802.11 frequency plan, in MHz.
pub mod frequency {
    pub const BAND_2_4_START: u32 = 2412;
    pub const BAND_2_4_END: u32 = 2472;
    pub const BAND_2_4_CH14: u32 = 2484;
    pub const BAND_5_START: u32 = 5170;
    pub const BAND_5_END: u32 = 5825;
    pub const CHANNEL_SPACING: u32 = 5;
}

/// Essids routers ship with by default.
pub const MANUFACTURER_DEFAULT_ESSIDS: &[&str] = &[
    "linksys",
    "linksys-a",
    "linksys-g",
    "default",
    "belkin54g",
    "NETGEAR",
    "o2DSL",
    "WLAN",
    "ALICE-WLAN",
];

/// Default timing values.
///
/// These feed [`TimeoutConfig`](crate::TimeoutConfig)'s defaults.
pub mod timeouts {
    use std::time::Duration;

    /// Link stability polls per second.
    pub const LINK_POLLS_PER_SEC: u32 = 30;

    /// Consecutive stable polls that must be exceeded to declare a link.
    pub const LINK_REQUIRED_TICKS: u32 = 10;

    const ASSOCIATION_PAUSE_SECS: u64 = 5;
    const ASSOCIATION_PAUSE_LONG_SECS: u64 = 8;
    const AP_MAX_AGE_SECS: u64 = 180;
    const SCAN_RESULT_WAIT_MS: u64 = 250;
    const SCAN_RETRY_INTERVAL_MS: u64 = 100;
    const SCAN_RETRY_CEILING_SECS: u64 = 20;
    const IFACE_POLL_INTERVAL_MS: u64 = 5;
    pub const IFACE_POLL_TRIES: u32 = 400;
    const CANCEL_POLL_INTERVAL_MS: u64 = 50;
    pub const CANCEL_LOG_EVERY: u32 = 20;
    const DHCP_CEILING_SECS: u64 = 45;

    /// Time a card needs to try associating with an AP.
    pub fn association_pause() -> Duration {
        Duration::from_secs(ASSOCIATION_PAUSE_SECS)
    }

    /// Association pause for cards that scan many channels.
    pub fn association_pause_long() -> Duration {
        Duration::from_secs(ASSOCIATION_PAUSE_LONG_SECS)
    }

    pub fn ap_max_age() -> Duration {
        Duration::from_secs(AP_MAX_AGE_SECS)
    }

    pub fn scan_result_wait() -> Duration {
        Duration::from_millis(SCAN_RESULT_WAIT_MS)
    }

    pub fn scan_retry_interval() -> Duration {
        Duration::from_millis(SCAN_RETRY_INTERVAL_MS)
    }

    pub fn scan_retry_ceiling() -> Duration {
        Duration::from_secs(SCAN_RETRY_CEILING_SECS)
    }

    pub fn iface_poll_interval() -> Duration {
        Duration::from_millis(IFACE_POLL_INTERVAL_MS)
    }

    pub fn cancel_poll_interval() -> Duration {
        Duration::from_millis(CANCEL_POLL_INTERVAL_MS)
    }

    pub fn dhcp_ceiling() -> Duration {
        Duration::from_secs(DHCP_CEILING_SECS)
    }
}

/// Periodic scan intervals.
pub mod scan_interval {
    use std::time::Duration;

    pub const INIT: Duration = Duration::from_secs(10);
    pub const ACTIVE: Duration = Duration::from_secs(20);
    pub const INACTIVE: Duration = Duration::from_secs(120);
}

//! Per-device state.
//!
//! [`Device`] is owned by the device's worker task and mutated only
//! there. The few fields read from outside the worker (the AP list,
//! live signal strength, last scan time) live in [`DeviceShared`]
//! behind a single lock.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::api::config::TimeoutConfig;
use crate::api::models::{
    ActivationStage, DeviceCapabilities, DeviceKind, DeviceStatus, Ipv4Config, MacAddr,
    QualityCalibration, ScanInterval,
};
use crate::backend::{DeviceBackend, LinkHardware, Providers, WirelessHardware};
use crate::core::activation::ActivationRequest;
use crate::core::ap_list::ApList;
use crate::core::history::NetworkHistory;
use crate::monitoring::events::EventSink;

/// Describes a discovered interface to hand over to a [`DeviceManager`](crate::DeviceManager).
#[derive(Debug, Clone)]
pub struct DeviceDescriptor {
    pub iface: String,
    pub backend: DeviceBackend,
    pub capabilities: DeviceCapabilities,
    /// `false` for interfaces configured with static addressing.
    pub use_dhcp: bool,
}

impl DeviceDescriptor {
    pub fn wired(iface: impl Into<String>, hw: Arc<dyn LinkHardware>) -> Self {
        Self {
            iface: iface.into(),
            backend: DeviceBackend::Wired(hw),
            capabilities: DeviceCapabilities::NM_SUPPORTED | DeviceCapabilities::CARRIER_DETECT,
            use_dhcp: true,
        }
    }

    pub fn wireless(iface: impl Into<String>, radio: Arc<dyn WirelessHardware>) -> Self {
        Self {
            iface: iface.into(),
            backend: DeviceBackend::Wireless(radio),
            capabilities: DeviceCapabilities::NM_SUPPORTED | DeviceCapabilities::WIRELESS_SCAN,
            use_dhcp: true,
        }
    }

    pub fn with_capabilities(mut self, capabilities: DeviceCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_static_config(mut self) -> Self {
        self.use_dhcp = false;
        self
    }
}

/// State read outside the worker.
#[derive(Debug)]
pub(crate) struct WirelessShared {
    pub ap_list: ApList,
    pub strength: Option<u8>,
    pub last_scan: Option<Instant>,
}

#[derive(Debug)]
pub(crate) struct DeviceShared {
    wireless: Option<Mutex<WirelessShared>>,
    /// Held across a scan and across signal strength reads.
    pub scan_lock: tokio::sync::Mutex<()>,
    /// Cancellation flag of the current activation request.
    cancel: Mutex<Option<Arc<AtomicBool>>>,
}

impl DeviceShared {
    pub(crate) fn new(kind: DeviceKind, ap_max_age: Duration) -> Self {
        let wireless = (kind == DeviceKind::Wireless).then(|| {
            Mutex::new(WirelessShared {
                ap_list: ApList::with_max_age(ap_max_age),
                strength: None,
                last_scan: None,
            })
        });
        Self {
            wireless,
            scan_lock: tokio::sync::Mutex::new(()),
            cancel: Mutex::new(None),
        }
    }

    pub(crate) fn set_cancel_flag(&self, flag: Arc<AtomicBool>) {
        *self.cancel.lock().unwrap_or_else(PoisonError::into_inner) = Some(flag);
    }

    /// Raises the current request's cancellation flag.
    ///
    /// Returns `false` if no request was ever started.
    pub(crate) fn request_cancel(&self) -> bool {
        let guard = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(flag) => {
                flag.store(true, Ordering::Release);
                true
            }
            None => false,
        }
    }

    /// Locks the wireless state. `None` for wired devices.
    pub(crate) fn wireless(&self) -> Option<MutexGuard<'_, WirelessShared>> {
        self.wireless
            .as_ref()
            .map(|m| m.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Wireless-only device state.
pub(crate) struct WirelessState {
    pub radio: Arc<dyn WirelessHardware>,
    pub scan_interval: ScanInterval,
    pub failed_link_count: u32,
    pub calibration: QualityCalibration,
    /// Supported frequencies in GHz.
    pub frequencies: Vec<f64>,
    pub invalid_strength_counter: u32,
}

/// Process-wide switches every worker consults before scanning.
#[derive(Debug)]
pub(crate) struct Switches {
    wireless_enabled: AtomicBool,
    asleep: AtomicBool,
}

impl Default for Switches {
    fn default() -> Self {
        Self {
            wireless_enabled: AtomicBool::new(true),
            asleep: AtomicBool::new(false),
        }
    }
}

impl Switches {
    pub(crate) fn wireless_enabled(&self) -> bool {
        self.wireless_enabled.load(Ordering::Acquire)
    }

    pub(crate) fn set_wireless_enabled(&self, enabled: bool) {
        self.wireless_enabled.store(enabled, Ordering::Release);
    }

    pub(crate) fn asleep(&self) -> bool {
        self.asleep.load(Ordering::Acquire)
    }

    pub(crate) fn set_asleep(&self, asleep: bool) {
        self.asleep.store(asleep, Ordering::Release);
    }
}

/// Everything a worker needs besides its own device.
#[derive(Clone)]
pub(crate) struct WorkerEnv {
    pub providers: Providers,
    pub history: Arc<NetworkHistory>,
    pub events: EventSink,
    pub config: TimeoutConfig,
    pub switches: Arc<Switches>,
}

pub(crate) struct Device {
    pub iface: String,
    pub kind: DeviceKind,
    pub caps: DeviceCapabilities,
    pub backend: DeviceBackend,
    pub use_dhcp: bool,
    pub link_active: bool,
    pub hw_address: Option<MacAddr>,
    pub ip4_address: Option<Ipv4Addr>,
    pub ip4_config: Option<Ipv4Config>,
    pub act_request: Option<ActivationRequest>,
    pub wireless: Option<WirelessState>,
    pub shared: Arc<DeviceShared>,
}

impl Device {
    pub(crate) fn new(desc: DeviceDescriptor, shared: Arc<DeviceShared>) -> Self {
        let kind = desc.backend.kind();
        let wireless = desc.backend.radio().map(|radio| WirelessState {
            radio: Arc::clone(radio),
            scan_interval: ScanInterval::Active,
            failed_link_count: 0,
            calibration: QualityCalibration::default(),
            frequencies: Vec::new(),
            invalid_strength_counter: 0,
        });
        Self {
            iface: desc.iface,
            kind,
            caps: desc.capabilities,
            backend: desc.backend,
            use_dhcp: desc.use_dhcp,
            link_active: false,
            hw_address: None,
            ip4_address: None,
            ip4_config: None,
            act_request: None,
            wireless,
            shared,
        }
    }

    pub(crate) fn link(&self) -> &dyn LinkHardware {
        self.backend.link()
    }

    /// The radio, for wireless devices.
    pub(crate) fn radio(&self) -> Option<Arc<dyn WirelessHardware>> {
        self.wireless.as_ref().map(|w| Arc::clone(&w.radio))
    }

    pub(crate) fn supports_scan(&self) -> bool {
        self.caps.contains(DeviceCapabilities::WIRELESS_SCAN)
    }

    pub(crate) fn is_activating(&self) -> bool {
        self.act_request
            .as_ref()
            .is_some_and(|req| req.stage.is_activating())
    }

    pub(crate) fn is_activated(&self) -> bool {
        self.act_request
            .as_ref()
            .is_some_and(|req| req.stage == ActivationStage::Activated)
    }

    /// Essid of the current activation target.
    pub(crate) fn target_essid(&self) -> Option<String> {
        self.act_request
            .as_ref()
            .and_then(|req| req.ap.as_ref())
            .and_then(|ap| ap.essid.clone())
    }

    pub(crate) fn num_frequencies(&self) -> usize {
        self.wireless.as_ref().map_or(0, |w| w.frequencies.len())
    }

    pub(crate) fn status(&self) -> DeviceStatus {
        DeviceStatus {
            iface: self.iface.clone(),
            kind: self.kind,
            capabilities: self.caps,
            stage: self.act_request.as_ref().map(|req| req.stage),
            link_active: self.link_active,
            hw_address: self.hw_address,
            ip4_address: self.ip4_address,
            essid: self.target_essid(),
        }
    }
}

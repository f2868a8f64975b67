//! Hardware access traits.

use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::sync::Arc;

use crate::api::models::{
    AuthMethod, DeviceKind, HardwareError, MacAddr, NetworkMode, Quality, QualityCalibration,
};

/// Link-layer access shared by every device kind.
#[async_trait]
pub trait LinkHardware: Send + Sync {
    /// Whether a cable is plugged in. Only meaningful for carrier-detecting devices.
    async fn carrier(&self) -> Result<bool, HardwareError>;

    async fn hw_address(&self) -> Result<Option<MacAddr>, HardwareError>;

    async fn ip4_address(&self) -> Result<Option<Ipv4Addr>, HardwareError>;
}

/// What a wireless card reports about its own capabilities.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RadioRange {
    pub calibration: QualityCalibration,
    /// Supported frequencies in GHz.
    pub frequencies: Vec<f64>,
}

/// Wireless-extension style access to a radio.
///
/// Frequencies are in GHz, with `0.0` meaning "auto". Bitrates are in
/// kb/s, with `0` meaning "auto".
#[async_trait]
pub trait WirelessHardware: LinkHardware {
    async fn range(&self) -> Result<RadioRange, HardwareError>;

    async fn trigger_scan(&self) -> Result<(), HardwareError>;

    /// Reads the raw scan event stream into a buffer of at most `capacity` bytes.
    ///
    /// Returns [`HardwareError::Again`] while results are pending and
    /// [`HardwareError::TooBig`] if they do not fit.
    async fn read_scan_results(&self, capacity: usize) -> Result<Vec<u8>, HardwareError>;

    async fn essid(&self) -> Result<Option<String>, HardwareError>;

    async fn set_essid(&self, essid: &str) -> Result<(), HardwareError>;

    async fn frequency(&self) -> Result<f64, HardwareError>;

    async fn set_frequency(&self, ghz: f64) -> Result<(), HardwareError>;

    async fn bitrate(&self) -> Result<i32, HardwareError>;

    async fn set_bitrate(&self, kbps: i32) -> Result<(), HardwareError>;

    async fn mode(&self) -> Result<NetworkMode, HardwareError>;

    async fn set_mode(&self, mode: NetworkMode) -> Result<(), HardwareError>;

    /// Installs a hex key with the given authentication method, or clears it with `None`.
    async fn set_enc_key(&self, key: Option<&str>, auth: AuthMethod) -> Result<(), HardwareError>;

    /// The AP the card is associated with, if any.
    async fn association(&self) -> Result<Option<MacAddr>, HardwareError>;

    async fn quality(&self) -> Result<Quality, HardwareError>;
}

/// The hardware behind a managed device. Its variant fixes the device kind.
#[derive(Clone)]
pub enum DeviceBackend {
    Wired(Arc<dyn LinkHardware>),
    Wireless(Arc<dyn WirelessHardware>),
}

impl DeviceBackend {
    pub fn kind(&self) -> DeviceKind {
        match self {
            DeviceBackend::Wired(_) => DeviceKind::Wired,
            DeviceBackend::Wireless(_) => DeviceKind::Wireless,
        }
    }

    pub(crate) fn link(&self) -> &dyn LinkHardware {
        match self {
            DeviceBackend::Wired(hw) => hw.as_ref(),
            DeviceBackend::Wireless(radio) => radio.as_ref(),
        }
    }

    pub(crate) fn radio(&self) -> Option<&Arc<dyn WirelessHardware>> {
        match self {
            DeviceBackend::Wired(_) => None,
            DeviceBackend::Wireless(radio) => Some(radio),
        }
    }
}

impl std::fmt::Debug for DeviceBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DeviceBackend::{}", self.kind())
    }
}

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::net::Ipv4Addr;
use std::time::Instant;
use thiserror::Error;
use uuid::Uuid;

use crate::types::constants::{MANUFACTURER_DEFAULT_ESSIDS, limits};

/// A 48-bit hardware (MAC) address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    /// Returns `false` for addresses drivers use to mean "no address".
    ///
    /// All-zero, broadcast, and the `44:44:44:44:44:44` / `00:30:B4:00:00:00`
    /// placeholders some firmware reports while unassociated are rejected.
    pub fn is_valid(&self) -> bool {
        const PLACEHOLDERS: [[u8; 6]; 4] = [
            [0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
            [0xff, 0xff, 0xff, 0xff, 0xff, 0xff],
            [0x44, 0x44, 0x44, 0x44, 0x44, 0x44],
            [0x00, 0x30, 0xb4, 0x00, 0x00, 0x00],
        ];
        !PLACEHOLDERS.contains(&self.0)
    }
}

impl Display for MacAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let b = self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

/// Authentication method used when associating with an access point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AuthMethod {
    #[default]
    None,
    OpenSystem,
    SharedKey,
}

impl Display for AuthMethod {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::None => write!(f, "none"),
            AuthMethod::OpenSystem => write!(f, "Open System"),
            AuthMethod::SharedKey => write!(f, "Shared Key"),
        }
    }
}

/// Wireless operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NetworkMode {
    #[default]
    Infrastructure,
    AdHoc,
}

impl Display for NetworkMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            NetworkMode::Infrastructure => write!(f, "Infra"),
            NetworkMode::AdHoc => write!(f, "Adhoc"),
        }
    }
}

/// How an [`EncKey`]'s source text should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EncKeyType {
    /// Hex digits, passed to the hardware unchanged.
    Hex,
    /// Printable passphrase, hex-encoded byte for byte.
    Ascii,
}

/// A WEP-style encryption key as entered by the user or remembered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncKey {
    pub source: String,
    pub kind: EncKeyType,
}

impl EncKey {
    pub fn hex(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            kind: EncKeyType::Hex,
        }
    }

    pub fn ascii(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            kind: EncKeyType::Ascii,
        }
    }

    /// Returns the key in the hex form the hardware expects.
    ///
    /// Returns `None` for empty keys or hex keys with non-hex digits.
    pub fn hashed(&self) -> Option<String> {
        if self.source.is_empty() {
            return None;
        }
        match self.kind {
            EncKeyType::Hex => self
                .source
                .chars()
                .all(|c| c.is_ascii_hexdigit())
                .then(|| self.source.to_ascii_lowercase()),
            EncKeyType::Ascii => Some(self.source.bytes().map(|b| format!("{b:02x}")).collect()),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.hashed().is_some()
    }
}

/// One observed or user-declared wireless network.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessPoint {
    /// Network name; `None` for hidden networks not yet matched to history.
    pub essid: Option<String>,
    pub address: Option<MacAddr>,
    pub encrypted: bool,
    pub auth_method: AuthMethod,
    pub mode: NetworkMode,
    /// Signal strength, 0-100.
    pub strength: u8,
    /// Center frequency in GHz; `0.0` when unknown.
    pub frequency: f64,
    pub wpa_ie: Option<Vec<u8>>,
    pub rsn_ie: Option<Vec<u8>>,
    pub last_seen: Option<Instant>,
    /// Timestamp (seconds since the epoch) the network was last used, from history.
    pub timestamp: Option<u64>,
    pub enc_key: Option<EncKey>,
    pub user_created: bool,
    pub artificial: bool,
    pub invalid: bool,
}

impl Default for AccessPoint {
    fn default() -> Self {
        Self {
            essid: None,
            address: None,
            encrypted: false,
            auth_method: AuthMethod::None,
            mode: NetworkMode::Infrastructure,
            strength: 0,
            frequency: 0.0,
            wpa_ie: None,
            rsn_ie: None,
            last_seen: None,
            timestamp: None,
            enc_key: None,
            user_created: false,
            artificial: false,
            invalid: false,
        }
    }
}

impl AccessPoint {
    /// Creates an access point record for a scan sighting of `address`.
    pub fn new(address: MacAddr) -> Self {
        Self {
            address: Some(address),
            ..Self::default()
        }
    }

    /// Creates a placeholder for a network that was named but not seen in a scan.
    pub fn artificial(essid: impl Into<String>, key: Option<EncKey>) -> Self {
        let encrypted = key.is_some();
        Self {
            essid: Some(essid.into()),
            encrypted,
            auth_method: if encrypted {
                AuthMethod::OpenSystem
            } else {
                AuthMethod::None
            },
            enc_key: key,
            artificial: true,
            ..Self::default()
        }
    }

    /// Creates a user-declared ad-hoc network.
    pub fn user_created(essid: impl Into<String>, key: Option<EncKey>) -> Self {
        let encrypted = key.is_some();
        Self {
            essid: Some(essid.into()),
            encrypted,
            auth_method: if encrypted {
                AuthMethod::SharedKey
            } else {
                AuthMethod::None
            },
            mode: NetworkMode::AdHoc,
            enc_key: key,
            user_created: true,
            ..Self::default()
        }
    }

    pub fn essid_str(&self) -> &str {
        self.essid.as_deref().unwrap_or("")
    }

    pub fn valid_address(&self) -> Option<MacAddr> {
        self.address.filter(MacAddr::is_valid)
    }

    pub fn has_valid_key(&self) -> bool {
        self.enc_key.as_ref().is_some_and(EncKey::is_valid)
    }

    /// An encrypted AP with no usable key needs one from the user.
    pub fn needs_key(&self) -> bool {
        self.encrypted && !self.has_valid_key()
    }

    pub fn has_manufacturer_default_essid(&self) -> bool {
        self.essid
            .as_deref()
            .is_some_and(|e| MANUFACTURER_DEFAULT_ESSIDS.contains(&e))
    }

    /// Returns `true` if `other` describes the same network as `self`.
    ///
    /// Two valid hardware addresses decide on their own. Otherwise the
    /// essids must match, which is how hidden networks get paired with
    /// the names history knows them by.
    pub fn is_same_network(&self, other: &AccessPoint) -> bool {
        match (self.valid_address(), other.valid_address()) {
            (Some(a), Some(b)) => a == b,
            _ => self.essid.is_some() && self.essid == other.essid,
        }
    }
}

impl Display for AccessPoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match (&self.essid, self.address) {
            (Some(essid), Some(addr)) => write!(f, "{essid} ({addr})"),
            (Some(essid), None) => write!(f, "{essid}"),
            (None, Some(addr)) => write!(f, "<hidden> ({addr})"),
            (None, None) => write!(f, "<unknown>"),
        }
    }
}

bitflags! {
    /// Validity bits of a driver-reported quality sample.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct QualityFlags: u8 {
        const QUAL_UPDATED = 0x01;
        const LEVEL_UPDATED = 0x02;
        const NOISE_UPDATED = 0x04;
        const QUAL_INVALID = 0x10;
        const LEVEL_INVALID = 0x20;
        const NOISE_INVALID = 0x40;
    }
}

/// A driver-native signal quality triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Quality {
    pub qual: u8,
    pub level: u8,
    pub noise: u8,
    pub updated: QualityFlags,
}

/// Quality ranges a card reports for itself, used to scale samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QualityCalibration {
    pub max: Quality,
    pub avg: Quality,
}

bitflags! {
    /// Capabilities of a managed device.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DeviceCapabilities: u32 {
        const NM_SUPPORTED = 0x01;
        const CARRIER_DETECT = 0x02;
        const WIRELESS_SCAN = 0x04;
    }
}

/// Whether a device is wired or wireless. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceKind {
    Wired,
    Wireless,
}

impl Display for DeviceKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Wired => write!(f, "wired"),
            DeviceKind::Wireless => write!(f, "wireless"),
        }
    }
}

/// An IPv4 configuration produced by DHCP, static config, or link-local generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ipv4Config {
    pub address: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub broadcast: Ipv4Addr,
    pub gateway: Option<Ipv4Addr>,
    pub nameservers: Vec<Ipv4Addr>,
    pub domains: Vec<String>,
}

impl Ipv4Config {
    /// Builds a config from an address and prefix length, deriving netmask and broadcast.
    pub fn with_prefix(address: Ipv4Addr, prefix_len: u8, gateway: Option<Ipv4Addr>) -> Self {
        let prefix_len = prefix_len.min(32);
        let mask = if prefix_len == 0 {
            0
        } else {
            u32::MAX << (32 - u32::from(prefix_len))
        };
        let broadcast = u32::from(address) | !mask;
        Self {
            address,
            netmask: Ipv4Addr::from(mask),
            broadcast: Ipv4Addr::from(broadcast),
            gateway,
            nameservers: Vec::new(),
            domains: Vec::new(),
        }
    }

    /// Builds a link-local (169.254/16) config with no gateway.
    pub fn link_local(address: Ipv4Addr) -> Self {
        Self {
            address,
            netmask: Ipv4Addr::new(255, 255, 0, 0),
            broadcast: Ipv4Addr::new(169, 254, 255, 255),
            gateway: None,
            nameservers: Vec::new(),
            domains: Vec::new(),
        }
    }

    pub fn prefix_len(&self) -> u8 {
        u32::from(self.netmask).leading_ones() as u8
    }
}

/// Stages of an activation attempt.
///
/// Ordered as they normally occur; `Activated`, `Failed` and `Cancelled`
/// are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ActivationStage {
    DevicePrepare,
    DeviceConfigure,
    NeedUserKey,
    IpConfigStart,
    IpConfigGet,
    IpConfigCommit,
    Activated,
    Failed,
    Cancelled,
}

impl ActivationStage {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ActivationStage::Activated | ActivationStage::Failed | ActivationStage::Cancelled
        )
    }

    /// Returns `true` while the activation is still in progress.
    pub fn is_activating(self) -> bool {
        !self.is_terminal()
    }
}

impl Display for ActivationStage {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ActivationStage::DevicePrepare => write!(f, "device prepare"),
            ActivationStage::DeviceConfigure => write!(f, "device configure"),
            ActivationStage::NeedUserKey => write!(f, "need user key"),
            ActivationStage::IpConfigStart => write!(f, "IP configure start"),
            ActivationStage::IpConfigGet => write!(f, "IP configure get"),
            ActivationStage::IpConfigCommit => write!(f, "IP configure commit"),
            ActivationStage::Activated => write!(f, "activated"),
            ActivationStage::Failed => write!(f, "failed"),
            ActivationStage::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// What an activation should bring the device onto.
#[derive(Debug, Clone)]
pub enum ActivationTarget {
    /// Wired devices carry no target network.
    Wired,
    /// A specific access point, typically from [`best_candidate`](crate::DeviceManager::best_candidate).
    AccessPoint(AccessPoint),
    /// A network named by the user, which may not be in the current scan.
    Essid { essid: String, key: Option<EncKey> },
    /// A new ad-hoc network hosted by this device.
    CreateAdHoc { essid: String, key: Option<EncKey> },
    /// Whatever candidate selection picks right now.
    Best,
}

impl ActivationTarget {
    /// Requests made on the user's behalf are held onto more stubbornly.
    pub fn is_user_requested(&self) -> bool {
        matches!(
            self,
            ActivationTarget::Essid { .. } | ActivationTarget::CreateAdHoc { .. }
        )
    }
}

/// How often a wireless device rescans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanInterval {
    /// Frequent scans while the device looks for its first network.
    Init,
    /// Regular scans while the device is in use.
    Active,
    /// Rare scans while nothing needs the device.
    Inactive,
}

impl Display for ScanInterval {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ScanInterval::Init => write!(f, "init"),
            ScanInterval::Active => write!(f, "active"),
            ScanInterval::Inactive => write!(f, "inactive"),
        }
    }
}

/// A network remembered from previous use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RememberedNetwork {
    pub essid: String,
    /// Seconds since the epoch this network was last used.
    pub timestamp: u64,
    pub trusted: bool,
    pub auth_method: AuthMethod,
    pub key: Option<EncKey>,
    /// Hardware addresses the user has connected to under this essid.
    pub user_addresses: Vec<MacAddr>,
}

impl RememberedNetwork {
    pub fn new(essid: impl Into<String>, timestamp: u64) -> Self {
        Self {
            essid: essid.into(),
            timestamp,
            trusted: false,
            auth_method: AuthMethod::None,
            key: None,
            user_addresses: Vec::new(),
        }
    }

    pub fn trusted(mut self, trusted: bool) -> Self {
        self.trusted = trusted;
        self
    }

    pub fn with_key(mut self, key: EncKey, auth_method: AuthMethod) -> Self {
        self.key = Some(key);
        self.auth_method = auth_method;
        self
    }

    pub fn with_user_address(mut self, addr: MacAddr) -> Self {
        self.user_addresses.push(addr);
        self
    }
}

/// Snapshot of a device's externally visible state.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceStatus {
    pub iface: String,
    pub kind: DeviceKind,
    pub capabilities: DeviceCapabilities,
    /// Stage of the current or most recent activation.
    pub stage: Option<ActivationStage>,
    pub link_active: bool,
    pub hw_address: Option<MacAddr>,
    pub ip4_address: Option<Ipv4Addr>,
    /// Essid of the activation target, wireless only.
    pub essid: Option<String>,
}

impl DeviceStatus {
    pub fn is_activating(&self) -> bool {
        self.stage.is_some_and(ActivationStage::is_activating)
    }
}

/// Out-of-band notifications for the bus-facing layer.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    DeviceAdded {
        iface: String,
        kind: DeviceKind,
    },
    DeviceRemoved {
        iface: String,
    },
    LinkChanged {
        iface: String,
        active: bool,
    },
    StageChanged {
        iface: String,
        request: Uuid,
        stage: ActivationStage,
    },
    NetworkAppeared {
        iface: String,
        essid: Option<String>,
        address: Option<MacAddr>,
    },
    NetworkDisappeared {
        iface: String,
        essid: Option<String>,
        address: Option<MacAddr>,
    },
    NetworkStrengthChanged {
        iface: String,
        essid: Option<String>,
        address: Option<MacAddr>,
        strength: u8,
    },
    DeviceStrengthChanged {
        iface: String,
        strength: Option<u8>,
    },
}

/// A key request handed to the [`KeyPrompter`](crate::backend::KeyPrompter).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRequest {
    pub request_id: Uuid,
    pub iface: String,
    pub essid: String,
    /// `true` when a previously supplied key did not work.
    pub retry: bool,
}

/// What the user answered to a [`KeyRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyResponse {
    Key(EncKey),
    Cancelled,
}

/// Completion of a DHCP transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DhcpOutcome {
    Bound(Ipv4Config),
    TimedOut,
}

/// Errors from the hardware access layer.
///
/// These are transient: the caller logs them and carries on.
#[derive(Debug, Error)]
pub enum HardwareError {
    /// Results are not ready yet; try again shortly.
    #[error("resource temporarily unavailable")]
    Again,

    /// The supplied buffer is too small for the scan results.
    #[error("scan results do not fit in {0} bytes")]
    TooBig(usize),

    #[error("operation not supported: {0}")]
    NotSupported(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("hardware request failed: {0}")]
    Failed(String),
}

/// Errors from decoding a raw scan buffer.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ScanError {
    /// An event claims more bytes than remain in the buffer.
    #[error("event at offset {offset} overruns the buffer ({len} bytes claimed)")]
    Truncated { offset: usize, len: usize },

    /// An event is too short for its command's fixed payload.
    #[error("malformed event 0x{cmd:04X} at offset {offset}")]
    Malformed { cmd: u16, offset: usize },
}

/// Errors from external collaborators (DHCP, IP installer).
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Hardware(#[from] HardwareError),
}

/// Errors returned by the public [`DeviceManager`](crate::DeviceManager) API.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// No managed device has this interface name.
    #[error("no such device: {0}")]
    NoSuchDevice(String),

    /// A device with this interface name is already managed.
    #[error("device already managed: {0}")]
    AlreadyManaged(String),

    /// The operation needs a wireless device.
    #[error("device {0} is not wireless")]
    NotWireless(String),

    /// The target does not fit the device kind.
    #[error("activation target does not match device {0}")]
    TargetMismatch(String),

    /// An activation is already in flight on this device.
    #[error("device {0} is already activating")]
    AlreadyActivating(String),

    /// Candidate selection found nothing to activate.
    #[error("no suitable network found")]
    NoCandidate,

    /// The essid is empty or longer than the hardware allows.
    #[error("invalid essid: {0:?}")]
    InvalidEssid(String),

    /// The key is empty or not in the form its type requires.
    #[error("invalid encryption key")]
    InvalidKey,

    /// The device's worker task has exited.
    #[error("worker for {0} is gone")]
    WorkerGone(String),

    #[error("hardware error: {0}")]
    Hardware(#[from] HardwareError),

    #[error("scan decode error: {0}")]
    Scan(#[from] ScanError),
}

/// Checks an essid against the hardware's length limit.
pub(crate) fn validate_essid(essid: &str) -> Result<(), DeviceError> {
    if essid.is_empty() || essid.len() > limits::MAX_ESSID_LEN {
        return Err(DeviceError::InvalidEssid(essid.to_string()));
    }
    Ok(())
}

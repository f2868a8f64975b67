//! In-memory collaborators for driving a `DeviceManager` in tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::future;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use nmd::{
    AuthMethod, AutoIpGenerator, DeviceEvent, DhcpOutcome, DhcpProvider, HardwareError,
    IpConfigInstaller, Ipv4Config, KeyPrompter, KeyRequest, KeyResponse, LinkHardware, MacAddr,
    NetworkMode, ProviderError, Providers, Quality, QualityCalibration, RadioRange,
    StaticConfigProvider, WirelessHardware,
};

pub const HOME_ADDR: MacAddr = MacAddr([0x00, 0x11, 0x22, 0x33, 0x44, 0x01]);
pub const OFFICE_ADDR: MacAddr = MacAddr([0x00, 0x11, 0x22, 0x33, 0x44, 0x02]);
pub const CAFE_ADDR: MacAddr = MacAddr([0x00, 0x11, 0x22, 0x33, 0x44, 0x03]);

/// A network the fake radio can associate with.
#[derive(Debug, Clone)]
pub struct FakeNetwork {
    pub essid: String,
    pub address: MacAddr,
    /// GHz.
    pub frequency: f64,
    /// Auth method the network accepts; `None` for open networks.
    pub required_auth: Option<AuthMethod>,
    /// Encrypted, but associates with any auth method once a key is set.
    pub accept_any_auth: bool,
}

impl FakeNetwork {
    pub fn open(essid: &str, address: MacAddr, frequency: f64) -> Self {
        Self {
            essid: essid.to_string(),
            address,
            frequency,
            required_auth: None,
            accept_any_auth: false,
        }
    }

    pub fn encrypted(essid: &str, address: MacAddr, frequency: f64, auth: AuthMethod) -> Self {
        Self {
            required_auth: Some(auth),
            ..Self::open(essid, address, frequency)
        }
    }

    pub fn encrypted_any_auth(essid: &str, address: MacAddr, frequency: f64) -> Self {
        Self {
            accept_any_auth: true,
            ..Self::encrypted(essid, address, frequency, AuthMethod::OpenSystem)
        }
    }
}

/// Canned reply to a scan result read.
#[derive(Debug, Clone, Copy)]
pub enum ScanReply {
    Again,
    Fail,
}

#[derive(Debug)]
pub struct RadioState {
    pub essid: String,
    pub mode: NetworkMode,
    pub frequency: f64,
    pub bitrate: i32,
    pub key: Option<String>,
    pub auth: AuthMethod,
    pub networks: Vec<FakeNetwork>,
    pub scan_buffer: Vec<u8>,
    pub scan_replies: VecDeque<ScanReply>,
    pub scans_triggered: usize,
    pub read_capacities: Vec<usize>,
    pub quality: Option<Quality>,
    pub range: RadioRange,
    /// Every `set_essid` call, in order.
    pub essid_writes: Vec<String>,
    /// Every `set_enc_key` call as (key, auth), in order.
    pub key_writes: Vec<(Option<String>, AuthMethod)>,
}

/// A wireless card that associates with whichever configured network
/// matches its essid and auth settings.
#[derive(Debug)]
pub struct FakeRadio {
    pub state: Mutex<RadioState>,
}

impl FakeRadio {
    pub fn new(networks: Vec<FakeNetwork>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(RadioState {
                essid: String::new(),
                mode: NetworkMode::Infrastructure,
                frequency: 0.0,
                bitrate: 0,
                key: None,
                auth: AuthMethod::None,
                networks,
                scan_buffer: Vec::new(),
                scan_replies: VecDeque::new(),
                scans_triggered: 0,
                read_capacities: Vec::new(),
                quality: Some(Quality {
                    qual: 60,
                    ..Quality::default()
                }),
                range: RadioRange {
                    calibration: calibration(),
                    frequencies: vec![2.412, 2.437, 2.462],
                },
                essid_writes: Vec::new(),
                key_writes: Vec::new(),
            }),
        })
    }

    pub fn set_scan_buffer(&self, buf: Vec<u8>) {
        self.state.lock().unwrap().scan_buffer = buf;
    }

    pub fn queue_scan_replies(&self, replies: &[ScanReply]) {
        self.state.lock().unwrap().scan_replies.extend(replies.iter().copied());
    }

    pub fn with_state<T>(&self, f: impl FnOnce(&mut RadioState) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }

    fn associated_network(state: &RadioState) -> Option<&FakeNetwork> {
        if state.essid.is_empty() {
            return None;
        }
        state.networks.iter().find(|net| {
            net.essid == state.essid
                && match net.required_auth {
                    None => state.key.is_none(),
                    Some(auth) => {
                        state.key.is_some() && (net.accept_any_auth || state.auth == auth)
                    }
                }
        })
    }
}

pub fn calibration() -> QualityCalibration {
    QualityCalibration {
        max: Quality {
            qual: 100,
            ..Quality::default()
        },
        avg: Quality::default(),
    }
}

#[async_trait]
impl LinkHardware for FakeRadio {
    async fn carrier(&self) -> Result<bool, HardwareError> {
        Ok(true)
    }

    async fn hw_address(&self) -> Result<Option<MacAddr>, HardwareError> {
        Ok(Some(MacAddr([0x02, 0, 0, 0, 0, 0x10])))
    }

    async fn ip4_address(&self) -> Result<Option<Ipv4Addr>, HardwareError> {
        Ok(None)
    }
}

#[async_trait]
impl WirelessHardware for FakeRadio {
    async fn range(&self) -> Result<RadioRange, HardwareError> {
        Ok(self.state.lock().unwrap().range.clone())
    }

    async fn trigger_scan(&self) -> Result<(), HardwareError> {
        self.state.lock().unwrap().scans_triggered += 1;
        Ok(())
    }

    async fn read_scan_results(&self, capacity: usize) -> Result<Vec<u8>, HardwareError> {
        let mut state = self.state.lock().unwrap();
        state.read_capacities.push(capacity);
        match state.scan_replies.pop_front() {
            Some(ScanReply::Again) => return Err(HardwareError::Again),
            Some(ScanReply::Fail) => return Err(HardwareError::Failed("scan failed".into())),
            None => {}
        }
        if state.scan_buffer.len() > capacity {
            return Err(HardwareError::TooBig(capacity));
        }
        Ok(state.scan_buffer.clone())
    }

    async fn essid(&self) -> Result<Option<String>, HardwareError> {
        let state = self.state.lock().unwrap();
        Ok((!state.essid.is_empty()).then(|| state.essid.clone()))
    }

    async fn set_essid(&self, essid: &str) -> Result<(), HardwareError> {
        let mut state = self.state.lock().unwrap();
        state.essid = essid.to_string();
        state.essid_writes.push(essid.to_string());
        Ok(())
    }

    async fn frequency(&self) -> Result<f64, HardwareError> {
        let state = self.state.lock().unwrap();
        Ok(Self::associated_network(&state).map_or(state.frequency, |net| net.frequency))
    }

    async fn set_frequency(&self, ghz: f64) -> Result<(), HardwareError> {
        self.state.lock().unwrap().frequency = ghz;
        Ok(())
    }

    async fn bitrate(&self) -> Result<i32, HardwareError> {
        Ok(self.state.lock().unwrap().bitrate)
    }

    async fn set_bitrate(&self, kbps: i32) -> Result<(), HardwareError> {
        self.state.lock().unwrap().bitrate = kbps;
        Ok(())
    }

    async fn mode(&self) -> Result<NetworkMode, HardwareError> {
        Ok(self.state.lock().unwrap().mode)
    }

    async fn set_mode(&self, mode: NetworkMode) -> Result<(), HardwareError> {
        self.state.lock().unwrap().mode = mode;
        Ok(())
    }

    async fn set_enc_key(&self, key: Option<&str>, auth: AuthMethod) -> Result<(), HardwareError> {
        let mut state = self.state.lock().unwrap();
        let key = key.map(str::to_string);
        state.key = key.clone();
        state.auth = auth;
        state.key_writes.push((key, auth));
        Ok(())
    }

    async fn association(&self) -> Result<Option<MacAddr>, HardwareError> {
        let state = self.state.lock().unwrap();
        Ok(Self::associated_network(&state).map(|net| net.address))
    }

    async fn quality(&self) -> Result<Quality, HardwareError> {
        self.state
            .lock()
            .unwrap()
            .quality
            .ok_or_else(|| HardwareError::Failed("no quality".into()))
    }
}

/// A wired card whose carrier the test controls.
#[derive(Debug, Default)]
pub struct FakeWired {
    pub carrier: Mutex<bool>,
}

impl FakeWired {
    pub fn new(carrier: bool) -> Arc<Self> {
        Arc::new(Self {
            carrier: Mutex::new(carrier),
        })
    }
}

#[async_trait]
impl LinkHardware for FakeWired {
    async fn carrier(&self) -> Result<bool, HardwareError> {
        Ok(*self.carrier.lock().unwrap())
    }

    async fn hw_address(&self) -> Result<Option<MacAddr>, HardwareError> {
        Ok(Some(MacAddr([0x02, 0, 0, 0, 0, 0x20])))
    }

    async fn ip4_address(&self) -> Result<Option<Ipv4Addr>, HardwareError> {
        Ok(None)
    }
}

#[derive(Debug, Clone)]
pub enum DhcpBehavior {
    Bind(Ipv4Config),
    TimeOut,
    Hang,
}

/// Answers DHCP transactions from a queue; the last answer repeats.
#[derive(Debug)]
pub struct FakeDhcp {
    pub behaviors: Mutex<VecDeque<DhcpBehavior>>,
    pub started: Mutex<usize>,
    pub cancelled: Mutex<usize>,
}

impl FakeDhcp {
    pub fn new(behaviors: Vec<DhcpBehavior>) -> Arc<Self> {
        Arc::new(Self {
            behaviors: Mutex::new(behaviors.into()),
            started: Mutex::new(0),
            cancelled: Mutex::new(0),
        })
    }

    fn next(&self) -> DhcpBehavior {
        let mut queue = self.behaviors.lock().unwrap();
        if queue.len() > 1 {
            queue.pop_front().unwrap()
        } else {
            queue.front().cloned().unwrap_or(DhcpBehavior::TimeOut)
        }
    }
}

#[async_trait]
impl DhcpProvider for FakeDhcp {
    async fn begin_transaction(&self, _iface: &str) -> Result<DhcpOutcome, ProviderError> {
        *self.started.lock().unwrap() += 1;
        match self.next() {
            DhcpBehavior::Bind(config) => Ok(DhcpOutcome::Bound(config)),
            DhcpBehavior::TimeOut => Ok(DhcpOutcome::TimedOut),
            DhcpBehavior::Hang => future::pending().await,
        }
    }

    async fn cancel_transaction(&self, _iface: &str) {
        *self.cancelled.lock().unwrap() += 1;
    }
}

#[derive(Debug, Default)]
pub struct FakeStatic {
    pub config: Option<Ipv4Config>,
}

#[async_trait]
impl StaticConfigProvider for FakeStatic {
    async fn get_config(&self, _iface: &str) -> Option<Ipv4Config> {
        self.config.clone()
    }
}

#[derive(Debug, Default)]
pub struct FakeAutoIp {
    pub config: Option<Ipv4Config>,
    pub generated: Mutex<usize>,
}

#[async_trait]
impl AutoIpGenerator for FakeAutoIp {
    async fn generate(&self, _iface: &str) -> Option<Ipv4Config> {
        *self.generated.lock().unwrap() += 1;
        self.config.clone()
    }
}

#[derive(Debug, Clone)]
pub enum PromptBehavior {
    Answer(KeyResponse),
    Hang,
}

/// Records key requests and answers them from a queue; the last answer repeats.
#[derive(Debug)]
pub struct FakePrompter {
    pub behaviors: Mutex<VecDeque<PromptBehavior>>,
    pub requests: Mutex<Vec<KeyRequest>>,
    pub cancelled: Mutex<Vec<KeyRequest>>,
}

impl FakePrompter {
    pub fn new(behaviors: Vec<PromptBehavior>) -> Arc<Self> {
        Arc::new(Self {
            behaviors: Mutex::new(behaviors.into()),
            requests: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
        })
    }

    fn next(&self) -> PromptBehavior {
        let mut queue = self.behaviors.lock().unwrap();
        if queue.len() > 1 {
            queue.pop_front().unwrap()
        } else {
            queue
                .front()
                .cloned()
                .unwrap_or(PromptBehavior::Answer(KeyResponse::Cancelled))
        }
    }
}

#[async_trait]
impl KeyPrompter for FakePrompter {
    async fn request_key(&self, request: &KeyRequest) -> KeyResponse {
        self.requests.lock().unwrap().push(request.clone());
        match self.next() {
            PromptBehavior::Answer(response) => response,
            PromptBehavior::Hang => future::pending().await,
        }
    }

    async fn cancel_request(&self, request: &KeyRequest) {
        self.cancelled.lock().unwrap().push(request.clone());
    }
}

/// Tracks interface up state and the configs committed to each interface.
#[derive(Debug, Default)]
pub struct FakeInstaller {
    pub up: Mutex<HashSet<String>>,
    pub commits: Mutex<Vec<(String, Ipv4Config)>>,
    pub flushes: Mutex<Vec<String>>,
    pub fail_commit: Mutex<bool>,
}

#[async_trait]
impl IpConfigInstaller for FakeInstaller {
    async fn commit(&self, iface: &str, config: &Ipv4Config) -> Result<(), ProviderError> {
        if *self.fail_commit.lock().unwrap() {
            return Err(ProviderError::Failed("route install failed".into()));
        }
        self.commits
            .lock()
            .unwrap()
            .push((iface.to_string(), config.clone()));
        Ok(())
    }

    async fn flush(&self, iface: &str) -> Result<(), ProviderError> {
        self.flushes.lock().unwrap().push(iface.to_string());
        Ok(())
    }

    async fn query_link(&self, iface: &str) -> Result<bool, HardwareError> {
        Ok(self.up.lock().unwrap().contains(iface))
    }

    async fn set_interface_up(&self, iface: &str, up: bool) -> Result<(), HardwareError> {
        let mut set = self.up.lock().unwrap();
        if up {
            set.insert(iface.to_string());
        } else {
            set.remove(iface);
        }
        Ok(())
    }
}

/// All fake collaborators, kept around so tests can inspect them.
pub struct Fakes {
    pub dhcp: Arc<FakeDhcp>,
    pub static_config: Arc<FakeStatic>,
    pub autoip: Arc<FakeAutoIp>,
    pub prompter: Arc<FakePrompter>,
    pub installer: Arc<FakeInstaller>,
}

impl Fakes {
    pub fn new(dhcp: Vec<DhcpBehavior>, prompts: Vec<PromptBehavior>) -> Self {
        Self {
            dhcp: FakeDhcp::new(dhcp),
            static_config: Arc::new(FakeStatic {
                config: Some(Ipv4Config::with_prefix(
                    Ipv4Addr::new(10, 0, 0, 5),
                    24,
                    Some(Ipv4Addr::new(10, 0, 0, 1)),
                )),
            }),
            autoip: Arc::new(FakeAutoIp {
                config: Some(link_local()),
                generated: Mutex::new(0),
            }),
            prompter: FakePrompter::new(prompts),
            installer: Arc::new(FakeInstaller::default()),
        }
    }

    pub fn providers(&self) -> Providers {
        Providers::new(
            self.dhcp.clone(),
            self.static_config.clone(),
            self.autoip.clone(),
            self.prompter.clone(),
            self.installer.clone(),
        )
    }
}

pub fn home_lease() -> Ipv4Config {
    Ipv4Config::with_prefix(
        Ipv4Addr::new(192, 168, 1, 50),
        24,
        Some(Ipv4Addr::new(192, 168, 1, 1)),
    )
}

pub fn office_lease() -> Ipv4Config {
    Ipv4Config::with_prefix(
        Ipv4Addr::new(172, 16, 4, 20),
        16,
        Some(Ipv4Addr::new(172, 16, 0, 1)),
    )
}

pub fn link_local() -> Ipv4Config {
    Ipv4Config::link_local(Ipv4Addr::new(169, 254, 10, 20))
}

/// Builds raw scan buffers the way a wireless-extension driver lays them out.
#[derive(Debug, Default)]
pub struct ScanBuffer {
    buf: Vec<u8>,
}

impl ScanBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn event(mut self, cmd: u16, payload: &[u8]) -> Self {
        let len = (4 + payload.len()) as u16;
        self.buf.extend_from_slice(&len.to_le_bytes());
        self.buf.extend_from_slice(&cmd.to_le_bytes());
        self.buf.extend_from_slice(payload);
        self
    }

    fn point(self, cmd: u16, flags: u16, data: &[u8]) -> Self {
        let mut payload = Vec::new();
        payload.extend_from_slice(&(data.len() as u16).to_le_bytes());
        payload.extend_from_slice(&flags.to_le_bytes());
        payload.extend_from_slice(data);
        self.event(cmd, &payload)
    }

    pub fn ap(self, addr: MacAddr) -> Self {
        let mut payload = vec![0x01, 0x00];
        payload.extend_from_slice(&addr.0);
        payload.extend_from_slice(&[0; 8]);
        self.event(0x8B15, &payload)
    }

    pub fn essid(self, essid: &str) -> Self {
        self.point(0x8B1B, 1, essid.as_bytes())
    }

    pub fn freq_mhz(self, mhz: i32) -> Self {
        let mut payload = Vec::new();
        payload.extend_from_slice(&mhz.to_le_bytes());
        payload.extend_from_slice(&6i16.to_le_bytes());
        payload.extend_from_slice(&[0, 0]);
        self.event(0x8B05, &payload)
    }

    pub fn quality(self, qual: u8) -> Self {
        self.event(0x8C01, &[qual, 0, 0, 0])
    }

    pub fn encrypted(self) -> Self {
        self.point(0x8B2B, 0x0001, &[])
    }

    pub fn infrastructure(self) -> Self {
        self.event(0x8B07, &2u32.to_le_bytes())
    }

    /// Appends an event header that claims more bytes than remain.
    pub fn truncated(mut self) -> Self {
        self.buf.extend_from_slice(&64u16.to_le_bytes());
        self.buf.extend_from_slice(&0x8B1Bu16.to_le_bytes());
        self.buf.extend_from_slice(&[0; 4]);
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.buf
    }
}

/// Scan record for an AP with essid, frequency and quality.
pub fn sighting(buf: ScanBuffer, addr: MacAddr, essid: &str, mhz: i32, qual: u8) -> ScanBuffer {
    buf.ap(addr).infrastructure().essid(essid).freq_mhz(mhz).quality(qual)
}

/// Drains every event currently queued on a receiver.
pub fn drain(rx: &mut tokio::sync::broadcast::Receiver<DeviceEvent>) -> Vec<DeviceEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Stage changes for `iface`, in order.
pub fn stages(events: &[DeviceEvent], iface: &str) -> Vec<nmd::ActivationStage> {
    events
        .iter()
        .filter_map(|event| match event {
            DeviceEvent::StageChanged {
                iface: i, stage, ..
            } if i == iface => Some(*stage),
            _ => None,
        })
        .collect()
}

/// Lets worker tasks run until they go idle.
///
/// With the clock paused, sleeping lets tokio auto-advance through any
/// timers the workers are waiting on.
pub async fn settle(for_at_least: Duration) {
    tokio::time::sleep(for_at_least).await;
}

/// Example scanning for wireless networks and joining the best one.
///
/// The hardware and DHCP client here are simulated: a radio that sees two
/// open networks and a DHCP server that always answers. A real daemon
/// plugs ioctl/netlink and DHCP client implementations into the same traits.
use async_trait::async_trait;
use nmd::{
    ActivationTarget, AuthMethod, AutoIpGenerator, DeviceDescriptor, DeviceManager, DhcpOutcome,
    DhcpProvider, HardwareError, IpConfigInstaller, Ipv4Config, KeyPrompter, KeyRequest,
    KeyResponse, LinkHardware, MacAddr, NetworkMode, ProviderError, Providers, Quality,
    QualityCalibration, RadioRange, StaticConfigProvider, TimeoutConfig, WirelessHardware,
};
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

const SIOCGIWFREQ: u16 = 0x8B05;
const SIOCGIWMODE: u16 = 0x8B07;
const SIOCGIWAP: u16 = 0x8B15;
const SIOCGIWESSID: u16 = 0x8B1B;
const IWEVQUAL: u16 = 0x8C01;

struct SimNetwork {
    essid: &'static str,
    address: MacAddr,
    mhz: i32,
    quality: u8,
}

static NETWORKS: [SimNetwork; 2] = [
    SimNetwork {
        essid: "home",
        address: MacAddr([0x00, 0x11, 0x22, 0x33, 0x44, 0x01]),
        mhz: 2437,
        quality: 80,
    },
    SimNetwork {
        essid: "cafe",
        address: MacAddr([0x00, 0x11, 0x22, 0x33, 0x44, 0x02]),
        mhz: 2462,
        quality: 45,
    },
];

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn push_event(buf: &mut Vec<u8>, cmd: u16, payload: &[u8]) {
    let len = (4 + payload.len()) as u16;
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(&cmd.to_le_bytes());
    buf.extend_from_slice(payload);
}

/// Lays the simulated networks out as a wireless-extension scan stream.
fn scan_stream() -> Vec<u8> {
    let mut buf = Vec::new();
    for net in &NETWORKS {
        let mut addr = vec![0x01, 0x00];
        addr.extend_from_slice(&net.address.0);
        addr.extend_from_slice(&[0; 8]);
        push_event(&mut buf, SIOCGIWAP, &addr);

        push_event(&mut buf, SIOCGIWMODE, &2u32.to_le_bytes());

        let mut essid = Vec::new();
        essid.extend_from_slice(&(net.essid.len() as u16).to_le_bytes());
        essid.extend_from_slice(&1u16.to_le_bytes());
        essid.extend_from_slice(net.essid.as_bytes());
        push_event(&mut buf, SIOCGIWESSID, &essid);

        let mut freq = Vec::new();
        freq.extend_from_slice(&net.mhz.to_le_bytes());
        freq.extend_from_slice(&6i16.to_le_bytes());
        freq.extend_from_slice(&[0, 0]);
        push_event(&mut buf, SIOCGIWFREQ, &freq);

        push_event(&mut buf, IWEVQUAL, &[net.quality, 0, 0, 0]);
    }
    buf
}

#[derive(Default)]
struct SimRadio {
    essid: Mutex<String>,
    mode: Mutex<NetworkMode>,
}

impl SimRadio {
    fn associated(&self) -> Option<&'static SimNetwork> {
        let essid = lock(&self.essid);
        NETWORKS.iter().find(|net| net.essid == essid.as_str())
    }
}

#[async_trait]
impl LinkHardware for SimRadio {
    async fn carrier(&self) -> Result<bool, HardwareError> {
        Ok(true)
    }

    async fn hw_address(&self) -> Result<Option<MacAddr>, HardwareError> {
        Ok(Some(MacAddr([0x02, 0x00, 0x00, 0x00, 0x00, 0x10])))
    }

    async fn ip4_address(&self) -> Result<Option<Ipv4Addr>, HardwareError> {
        Ok(None)
    }
}

#[async_trait]
impl WirelessHardware for SimRadio {
    async fn range(&self) -> Result<RadioRange, HardwareError> {
        Ok(RadioRange {
            calibration: QualityCalibration {
                max: Quality {
                    qual: 100,
                    ..Quality::default()
                },
                avg: Quality::default(),
            },
            frequencies: vec![2.412, 2.437, 2.462],
        })
    }

    async fn trigger_scan(&self) -> Result<(), HardwareError> {
        Ok(())
    }

    async fn read_scan_results(&self, capacity: usize) -> Result<Vec<u8>, HardwareError> {
        let buf = scan_stream();
        if buf.len() > capacity {
            return Err(HardwareError::TooBig(capacity));
        }
        Ok(buf)
    }

    async fn essid(&self) -> Result<Option<String>, HardwareError> {
        let essid = lock(&self.essid);
        Ok((!essid.is_empty()).then(|| essid.clone()))
    }

    async fn set_essid(&self, essid: &str) -> Result<(), HardwareError> {
        *lock(&self.essid) = essid.to_string();
        Ok(())
    }

    async fn frequency(&self) -> Result<f64, HardwareError> {
        Ok(self
            .associated()
            .map_or(0.0, |net| f64::from(net.mhz) / 1000.0))
    }

    async fn set_frequency(&self, _ghz: f64) -> Result<(), HardwareError> {
        Ok(())
    }

    async fn bitrate(&self) -> Result<i32, HardwareError> {
        Ok(54_000)
    }

    async fn set_bitrate(&self, _kbps: i32) -> Result<(), HardwareError> {
        Ok(())
    }

    async fn mode(&self) -> Result<NetworkMode, HardwareError> {
        Ok(*lock(&self.mode))
    }

    async fn set_mode(&self, mode: NetworkMode) -> Result<(), HardwareError> {
        *lock(&self.mode) = mode;
        Ok(())
    }

    async fn set_enc_key(&self, _key: Option<&str>, _auth: AuthMethod) -> Result<(), HardwareError> {
        Ok(())
    }

    async fn association(&self) -> Result<Option<MacAddr>, HardwareError> {
        Ok(self.associated().map(|net| net.address))
    }

    async fn quality(&self) -> Result<Quality, HardwareError> {
        let qual = self.associated().map_or(0, |net| net.quality);
        Ok(Quality {
            qual,
            ..Quality::default()
        })
    }
}

struct SimDhcp;

#[async_trait]
impl DhcpProvider for SimDhcp {
    async fn begin_transaction(&self, iface: &str) -> Result<DhcpOutcome, ProviderError> {
        println!("DHCP: leasing 192.168.1.50/24 to {iface}");
        Ok(DhcpOutcome::Bound(Ipv4Config::with_prefix(
            Ipv4Addr::new(192, 168, 1, 50),
            24,
            Some(Ipv4Addr::new(192, 168, 1, 1)),
        )))
    }

    async fn cancel_transaction(&self, _iface: &str) {}
}

struct NoStaticConfig;

#[async_trait]
impl StaticConfigProvider for NoStaticConfig {
    async fn get_config(&self, _iface: &str) -> Option<Ipv4Config> {
        None
    }
}

struct LinkLocal;

#[async_trait]
impl AutoIpGenerator for LinkLocal {
    async fn generate(&self, _iface: &str) -> Option<Ipv4Config> {
        Some(Ipv4Config::link_local(Ipv4Addr::new(169, 254, 7, 7)))
    }
}

/// Open networks never ask, so any prompt is declined.
struct DeclinePrompts;

#[async_trait]
impl KeyPrompter for DeclinePrompts {
    async fn request_key(&self, request: &KeyRequest) -> KeyResponse {
        println!("Declining key request for {}", request.essid);
        KeyResponse::Cancelled
    }

    async fn cancel_request(&self, _request: &KeyRequest) {}
}

#[derive(Default)]
struct PrintingInstaller {
    up: Mutex<HashSet<String>>,
}

#[async_trait]
impl IpConfigInstaller for PrintingInstaller {
    async fn commit(&self, iface: &str, config: &Ipv4Config) -> Result<(), ProviderError> {
        println!(
            "Installing {}/{} on {iface}",
            config.address,
            config.prefix_len()
        );
        Ok(())
    }

    async fn flush(&self, iface: &str) -> Result<(), ProviderError> {
        println!("Flushing addresses on {iface}");
        Ok(())
    }

    async fn query_link(&self, iface: &str) -> Result<bool, HardwareError> {
        Ok(lock(&self.up).contains(iface))
    }

    async fn set_interface_up(&self, iface: &str, up: bool) -> Result<(), HardwareError> {
        let mut set = lock(&self.up);
        if up {
            set.insert(iface.to_string());
        } else {
            set.remove(iface);
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> nmd::Result<()> {
    let providers = Providers::new(
        Arc::new(SimDhcp),
        Arc::new(NoStaticConfig),
        Arc::new(LinkLocal),
        Arc::new(DeclinePrompts),
        Arc::new(PrintingInstaller::default()),
    );
    // The simulated radio associates instantly
    let config = TimeoutConfig::new().with_association_pause(Duration::from_secs(1));
    let manager = DeviceManager::with_config(providers, config);

    let mut events = manager.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            println!("event: {event:?}");
        }
    });

    manager
        .add_device(DeviceDescriptor::wireless("wlan0", Arc::new(SimRadio::default())))
        .await?;

    if !manager.request_scan("wlan0").await? {
        println!("Scan was skipped");
    }
    println!("Visible networks:");
    for ap in manager.access_points("wlan0")? {
        println!(
            "  {:<8} {:>3}%  {:.3} GHz  {}",
            ap.essid_str(),
            ap.strength,
            ap.frequency,
            if ap.encrypted { "encrypted" } else { "open" }
        );
    }

    let request = manager.activate("wlan0", ActivationTarget::Best).await?;
    println!("Activation {request} started");

    while manager.status("wlan0")?.is_activating() {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    let status = manager.status("wlan0")?;
    println!(
        "wlan0: {:?} on {} with address {:?}",
        status.stage,
        status.essid.as_deref().unwrap_or("-"),
        status.ip4_address
    );

    manager.shutdown().await;
    Ok(())
}

use log::{debug, info};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use uuid::Uuid;

use crate::Result;
use crate::api::config::TimeoutConfig;
use crate::api::models::{
    AccessPoint, ActivationTarget, DeviceError, DeviceEvent, DeviceStatus, ScanInterval,
};
use crate::backend::Providers;
use crate::core::device::{DeviceDescriptor, Switches, WorkerEnv};
use crate::core::history::NetworkHistory;
use crate::core::worker::{self, Command, WorkerHandle};
use crate::monitoring::events::EventSink;
use crate::types::constants::timeouts;

struct ManagedDevice {
    handle: WorkerHandle,
    task: JoinHandle<()>,
}

/// Registry of managed network devices.
///
/// Every device added here gets its own worker task, which runs
/// activations and periodic scans for that device. The manager itself
/// only routes requests to workers and reads the little state workers
/// publish (status, AP list, signal strength).
///
/// # Example
///
/// ```no_run
/// use nmd::{ActivationTarget, DeviceDescriptor, DeviceManager, Providers, WirelessHardware};
/// use std::sync::Arc;
///
/// # async fn example(providers: Providers, radio: Arc<dyn WirelessHardware>) -> nmd::Result<()> {
/// let manager = DeviceManager::new(providers);
/// manager.add_device(DeviceDescriptor::wireless("wlan0", radio)).await?;
///
/// // Let the device pick the best known network
/// manager.activate("wlan0", ActivationTarget::Best).await?;
///
/// for ap in manager.access_points("wlan0")? {
///     println!("{} ({}%)", ap.essid_str(), ap.strength);
/// }
/// # Ok(())
/// # }
/// ```
///
/// # Events
///
/// Link changes, stage changes and AP list changes are published on a
/// broadcast channel; see [`DeviceManager::subscribe`].
#[derive(Clone)]
pub struct DeviceManager {
    devices: Arc<RwLock<HashMap<String, ManagedDevice>>>,
    env: WorkerEnv,
}

impl std::fmt::Debug for DeviceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceManager")
            .field("devices", &self.interfaces())
            .field("config", &self.env.config)
            .finish_non_exhaustive()
    }
}

impl DeviceManager {
    /// Creates a manager with default timeouts and an empty network history.
    pub fn new(providers: Providers) -> Self {
        Self::with_config(providers, TimeoutConfig::default())
    }

    /// Creates a manager with custom timeouts.
    pub fn with_config(providers: Providers, config: TimeoutConfig) -> Self {
        Self {
            devices: Arc::new(RwLock::new(HashMap::new())),
            env: WorkerEnv {
                providers,
                history: Arc::new(NetworkHistory::new()),
                events: EventSink::default(),
                config,
                switches: Arc::new(Switches::default()),
            },
        }
    }

    /// Remembered networks and the session blacklist, shared by all devices.
    pub fn history(&self) -> Arc<NetworkHistory> {
        Arc::clone(&self.env.history)
    }

    pub fn config(&self) -> &TimeoutConfig {
        &self.env.config
    }

    /// Subscribes to device events.
    ///
    /// A receiver that falls behind loses the oldest events.
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.env.events.subscribe()
    }

    fn interfaces(&self) -> Vec<String> {
        let devices = self.devices.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = devices.keys().cloned().collect();
        names.sort();
        names
    }

    fn handle(&self, iface: &str) -> Result<WorkerHandle> {
        let devices = self.devices.read().unwrap_or_else(PoisonError::into_inner);
        devices
            .get(iface)
            .map(|managed| managed.handle.clone())
            .ok_or_else(|| DeviceError::NoSuchDevice(iface.to_string()))
    }

    fn wireless_handle(&self, iface: &str) -> Result<WorkerHandle> {
        let handle = self.handle(iface)?;
        if handle.shared.wireless().is_none() {
            return Err(DeviceError::NotWireless(iface.to_string()));
        }
        Ok(handle)
    }

    /// Starts managing a device and spawns its worker.
    pub async fn add_device(&self, desc: DeviceDescriptor) -> Result<()> {
        let iface = desc.iface.clone();
        let kind = desc.backend.kind();
        {
            let mut devices = self.devices.write().unwrap_or_else(PoisonError::into_inner);
            if devices.contains_key(&iface) {
                return Err(DeviceError::AlreadyManaged(iface));
            }
            let (handle, task) = worker::spawn(desc, self.env.clone());
            devices.insert(iface.clone(), ManagedDevice { handle, task });
        }
        info!("Added {kind} device {iface}");
        self.env.events.emit(DeviceEvent::DeviceAdded { iface, kind });
        Ok(())
    }

    /// Stops managing a device. Any activation in flight is cancelled.
    pub async fn remove_device(&self, iface: &str) -> Result<()> {
        let managed = {
            let mut devices = self.devices.write().unwrap_or_else(PoisonError::into_inner);
            devices
                .remove(iface)
                .ok_or_else(|| DeviceError::NoSuchDevice(iface.to_string()))?
        };
        // Stops a running stage at its next cancellation check, before
        // the worker gets to read the shutdown.
        managed.handle.shared.request_cancel();
        // A worker that already exited has nothing left to shut down.
        let _ = managed.handle.tx.send(Command::Shutdown).await;
        if let Err(e) = managed.task.await {
            debug!("Worker for {iface} ended abnormally: {e}");
        }
        info!("Removed device {iface}");
        self.env.events.emit(DeviceEvent::DeviceRemoved {
            iface: iface.to_string(),
        });
        Ok(())
    }

    /// Statuses of every managed device, ordered by interface name.
    pub fn devices(&self) -> Vec<DeviceStatus> {
        let devices = self.devices.read().unwrap_or_else(PoisonError::into_inner);
        let mut statuses: Vec<DeviceStatus> = devices
            .values()
            .map(|managed| managed.handle.status.borrow().clone())
            .collect();
        statuses.sort_by(|a, b| a.iface.cmp(&b.iface));
        statuses
    }

    pub fn status(&self, iface: &str) -> Result<DeviceStatus> {
        Ok(self.handle(iface)?.status.borrow().clone())
    }

    /// Starts activating `iface` towards `target`.
    ///
    /// An activation already in flight on the device is cancelled first.
    /// Returns once the request is created; progress is reported through
    /// [`DeviceEvent::StageChanged`] and [`DeviceManager::status`].
    ///
    /// # Errors
    ///
    /// - [`DeviceError::TargetMismatch`] for a wired target on a wireless
    ///   device or the other way round
    /// - [`DeviceError::NoCandidate`] if [`ActivationTarget::Best`] finds nothing
    /// - [`DeviceError::InvalidEssid`] / [`DeviceError::InvalidKey`] for
    ///   malformed named networks
    pub async fn activate(&self, iface: &str, target: ActivationTarget) -> Result<Uuid> {
        let handle = self.handle(iface)?;
        if handle.status.borrow().is_activating() {
            self.cancel_activation(iface).await?;
        }
        handle
            .request(iface, |reply| Command::Activate { target, reply })
            .await?
    }

    /// Cancels the activation in flight on `iface` and waits for the worker
    /// to honour it.
    ///
    /// The worker notices the cancellation at its next stage boundary or
    /// poll tick. This waits as long as that takes.
    pub async fn cancel_activation(&self, iface: &str) -> Result<()> {
        let handle = self.handle(iface)?;
        if !handle.shared.request_cancel() {
            return Ok(());
        }
        handle
            .tx
            .send(Command::Cancel)
            .await
            .map_err(|_| DeviceError::WorkerGone(iface.to_string()))?;

        let mut tries: u32 = 0;
        while handle.status.borrow().is_activating() {
            sleep(self.env.config.cancel_poll_interval).await;
            tries += 1;
            if tries % timeouts::CANCEL_LOG_EVERY == 0 {
                debug!("Still waiting for {iface} to cancel its activation ({tries} polls)");
            }
            if handle.tx.is_closed() {
                return Err(DeviceError::WorkerGone(iface.to_string()));
            }
        }
        Ok(())
    }

    /// Tears down the device's activation and leaves it unconfigured.
    pub async fn deactivate(&self, iface: &str) -> Result<()> {
        let handle = self.handle(iface)?;
        handle
            .request(iface, |reply| Command::Deactivate { reply })
            .await
    }

    /// Visible access points on a wireless device, strongest first.
    pub fn access_points(&self, iface: &str) -> Result<Vec<AccessPoint>> {
        let handle = self.wireless_handle(iface)?;
        let shared = handle
            .shared
            .wireless()
            .ok_or_else(|| DeviceError::NotWireless(iface.to_string()))?;
        Ok(shared
            .ap_list
            .sorted_by_strength()
            .into_iter()
            .cloned()
            .collect())
    }

    /// The AP the device would pick right now, if any.
    pub async fn best_candidate(&self, iface: &str) -> Result<Option<AccessPoint>> {
        let handle = self.wireless_handle(iface)?;
        handle
            .request(iface, |reply| Command::BestCandidate { reply })
            .await
    }

    /// Live signal strength of the current connection, as a percentage.
    pub fn signal_strength(&self, iface: &str) -> Result<Option<u8>> {
        let handle = self.wireless_handle(iface)?;
        Ok(handle.shared.wireless().and_then(|shared| shared.strength))
    }

    /// When results of the last successful scan were merged.
    pub fn last_scan(&self, iface: &str) -> Result<Option<Instant>> {
        let handle = self.wireless_handle(iface)?;
        Ok(handle.shared.wireless().and_then(|shared| shared.last_scan))
    }

    /// Scans now instead of waiting for the next scheduled scan.
    ///
    /// Returns `false` if the scan was skipped or its results were unusable.
    pub async fn request_scan(&self, iface: &str) -> Result<bool> {
        let handle = self.wireless_handle(iface)?;
        handle.request(iface, |reply| Command::Scan { reply }).await
    }

    /// Re-probes the link, as after a carrier change notification.
    pub async fn probe_link(&self, iface: &str) -> Result<bool> {
        let handle = self.handle(iface)?;
        handle.request(iface, |reply| Command::ProbeLink { reply }).await
    }

    /// Sets the scan cadence of one wireless device, or of all of them.
    pub async fn set_scan_interval(&self, iface: Option<&str>, interval: ScanInterval) -> Result<()> {
        let handles = match iface {
            Some(iface) => vec![self.wireless_handle(iface)?],
            None => {
                let devices = self.devices.read().unwrap_or_else(PoisonError::into_inner);
                devices
                    .values()
                    .filter(|managed| managed.handle.shared.wireless().is_some())
                    .map(|managed| managed.handle.clone())
                    .collect()
            }
        };
        for handle in handles {
            let iface = handle.status.borrow().iface.clone();
            handle
                .tx
                .send(Command::SetScanInterval(interval))
                .await
                .map_err(|_| DeviceError::WorkerGone(iface))?;
        }
        Ok(())
    }

    /// Turns wireless scanning on or off for every device.
    pub fn set_wireless_enabled(&self, enabled: bool) {
        info!("Wireless {}", if enabled { "enabled" } else { "disabled" });
        self.env.switches.set_wireless_enabled(enabled);
    }

    pub fn wireless_enabled(&self) -> bool {
        self.env.switches.wireless_enabled()
    }

    /// Marks the system asleep or awake. Sleeping devices do not scan.
    pub fn set_asleep(&self, asleep: bool) {
        info!("{}", if asleep { "Going to sleep" } else { "Waking up" });
        self.env.switches.set_asleep(asleep);
    }

    /// Stops every worker.
    pub async fn shutdown(&self) {
        for iface in self.interfaces() {
            if let Err(e) = self.remove_device(&iface).await {
                debug!("Could not remove {iface} during shutdown: {e}");
            }
        }
    }
}

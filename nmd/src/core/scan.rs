//! Periodic wireless scanning.
//!
//! A scan borrows the card: it is forced into infrastructure mode at auto
//! frequency for the duration and restored afterwards. The scan lock is
//! held for that whole window so link checks and strength reads never see
//! the card mid-scan. Decoded results are merged into the device's AP
//! list, which then ages out anything not seen recently.

use log::{debug, info, warn};
use std::sync::Arc;
use tokio::time::{Instant, sleep};

use crate::api::models::{
    AccessPoint, DeviceCapabilities, DeviceEvent, HardwareError, NetworkMode, ScanInterval,
};
use crate::backend::WirelessHardware;
use crate::core::ap_list::MergeOutcome;
use crate::core::device::{Device, WorkerEnv};
use crate::core::scan_decode::parse_scan_results;
use crate::core::state_wait::{self, WaitOutcome};
use crate::types::constants::limits;

/// What a scan pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScanPass {
    /// Results were read, decoded and merged.
    Scanned,
    /// Nothing was scanned this time; try again later.
    Skipped,
    /// The device cannot scan at all. Do not reschedule.
    Unsupported,
}

fn set_interval(dev: &mut Device, interval: ScanInterval) {
    if let Some(wireless) = dev.wireless.as_mut()
        && wireless.scan_interval != interval
    {
        debug!("Scan interval for {} now {interval}", dev.iface);
        wireless.scan_interval = interval;
    }
}

/// Runs one scan pass, honouring the global switches and device state.
pub(crate) async fn scan(dev: &mut Device, env: &WorkerEnv) -> ScanPass {
    let Some(radio) = dev.radio() else {
        return ScanPass::Unsupported;
    };
    if !dev.caps.contains(DeviceCapabilities::NM_SUPPORTED) || !dev.supports_scan() {
        return ScanPass::Unsupported;
    }

    if !env.switches.wireless_enabled() || env.switches.asleep() || dev.is_activating() {
        set_interval(dev, ScanInterval::Init);
        return ScanPass::Skipped;
    }

    // Multi-band cards take long enough to sweep that scanning would drop
    // the connection; only scan them while disconnected.
    if dev.num_frequencies() > limits::BASIC_FREQ_COUNT && dev.is_activated() {
        set_interval(dev, ScanInterval::Active);
        return ScanPass::Skipped;
    }

    let Some(buf) = acquire_results(dev, env, radio.as_ref()).await else {
        return ScanPass::Skipped;
    };

    let calibration = dev
        .wireless
        .as_ref()
        .map(|w| w.calibration)
        .unwrap_or_default();
    match parse_scan_results(&buf, &calibration) {
        Ok(aps) => {
            debug!("Scan on {} found {} access points", dev.iface, aps.len());
            merge_results(dev, env, aps);
            ScanPass::Scanned
        }
        Err(e) => {
            warn!("Discarding scan results from {}: {e}", dev.iface);
            ScanPass::Skipped
        }
    }
}

/// Saved card settings a scan overrides.
struct SavedRadio {
    mode: Option<NetworkMode>,
    frequency: Option<f64>,
    bitrate: Option<i32>,
}

impl SavedRadio {
    async fn save(radio: &dyn WirelessHardware) -> Self {
        let mode = radio.mode().await.ok();
        if mode == Some(NetworkMode::AdHoc) {
            Self {
                mode,
                frequency: radio.frequency().await.ok(),
                bitrate: radio.bitrate().await.ok(),
            }
        } else {
            Self {
                mode,
                frequency: None,
                bitrate: None,
            }
        }
    }

    async fn restore(self, radio: &dyn WirelessHardware, iface: &str) {
        if let Some(mode) = self.mode
            && let Err(e) = radio.set_mode(mode).await
        {
            warn!("{iface}: could not restore mode after scan: {e}");
        }
        if let Some(freq) = self.frequency
            && let Err(e) = radio.set_frequency(freq).await
        {
            warn!("{iface}: could not restore frequency after scan: {e}");
        }
        if let Some(rate) = self.bitrate
            && let Err(e) = radio.set_bitrate(rate).await
        {
            warn!("{iface}: could not restore bitrate after scan: {e}");
        }
    }
}

/// Triggers a scan and reads the raw results with the scan lock held.
async fn acquire_results(
    dev: &mut Device,
    env: &WorkerEnv,
    radio: &dyn WirelessHardware,
) -> Option<Vec<u8>> {
    let shared = Arc::clone(&dev.shared);
    let Ok(_guard) = shared.scan_lock.try_lock() else {
        debug!("Scan on {} already in progress", dev.iface);
        return None;
    };

    if state_wait::bring_up_wait(dev, env, None).await != WaitOutcome::Done {
        return None;
    }

    let saved = SavedRadio::save(radio).await;
    if let Err(e) = radio.set_mode(NetworkMode::Infrastructure).await {
        debug!("{}: could not switch to infrastructure mode for scan: {e}", dev.iface);
    }
    if let Err(e) = radio.set_frequency(0.0).await {
        debug!("{}: could not clear frequency for scan: {e}", dev.iface);
    }

    let results = match radio.trigger_scan().await {
        Ok(()) => {
            sleep(env.config.scan_result_wait).await;
            read_results(radio, env, &dev.iface).await
        }
        Err(e) => {
            warn!("Could not trigger scan on {}: {e}", dev.iface);
            None
        }
    };

    saved.restore(radio, &dev.iface).await;
    results
}

/// Reads scan results, growing the buffer and waiting out "not ready".
async fn read_results(radio: &dyn WirelessHardware, env: &WorkerEnv, iface: &str) -> Option<Vec<u8>> {
    let mut capacity = limits::SCAN_BUFFER_INITIAL;
    let started = Instant::now();

    loop {
        match radio.read_scan_results(capacity).await {
            Ok(buf) => return Some(buf),
            Err(HardwareError::TooBig(_)) if capacity < limits::SCAN_BUFFER_MAX => {
                capacity = (capacity * 2).min(limits::SCAN_BUFFER_MAX);
                debug!("Scan results on {iface} need more room, retrying with {capacity} bytes");
            }
            Err(HardwareError::Again) if started.elapsed() < env.config.scan_retry_ceiling => {
                sleep(env.config.scan_retry_interval).await;
            }
            Err(e) => {
                warn!("Could not read scan results on {iface}: {e}");
                return None;
            }
        }
    }
}

fn appeared(iface: &str, ap: &AccessPoint) -> DeviceEvent {
    DeviceEvent::NetworkAppeared {
        iface: iface.to_string(),
        essid: ap.essid.clone(),
        address: ap.valid_address(),
    }
}

/// Merges decoded APs into the device's list and ages out stale ones.
fn merge_results(dev: &Device, env: &WorkerEnv, aps: Vec<AccessPoint>) {
    let now = Instant::now().into_std();
    let keep = dev.target_essid();
    let mut events = Vec::new();

    {
        let Some(mut shared) = dev.shared.wireless() else {
            return;
        };
        for mut ap in aps {
            ap.last_seen = Some(now);
            if ap.essid.is_none()
                && let Some(addr) = ap.valid_address()
                && let Some(essid) = env.history.essid_for_address(&addr)
            {
                debug!("Hidden access point {addr} is {essid}");
                ap.essid = Some(essid);
            }

            let sighting = ap.clone();
            match shared.ap_list.upsert(ap) {
                MergeOutcome::Added => events.push(appeared(&dev.iface, &sighting)),
                MergeOutcome::StrengthChanged => {
                    events.push(DeviceEvent::NetworkStrengthChanged {
                        iface: dev.iface.clone(),
                        essid: sighting.essid.clone(),
                        address: sighting.valid_address(),
                        strength: sighting.strength,
                    });
                }
                MergeOutcome::Renamed(previous) => {
                    events.push(DeviceEvent::NetworkDisappeared {
                        iface: dev.iface.clone(),
                        essid: previous,
                        address: sighting.valid_address(),
                    });
                    events.push(appeared(&dev.iface, &sighting));
                }
                MergeOutcome::Refreshed => {}
            }
        }

        shared.ap_list.apply_history(&env.history);
        for gone in shared.ap_list.evict_stale(now, keep.as_deref()) {
            info!("{}: network {gone} disappeared", dev.iface);
            events.push(DeviceEvent::NetworkDisappeared {
                iface: dev.iface.clone(),
                essid: gone.essid.clone(),
                address: gone.valid_address(),
            });
        }
        shared.last_scan = Some(now);
    }

    for event in events {
        env.events.emit(event);
    }
}

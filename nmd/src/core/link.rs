//! Link probing for wired and wireless devices.
//!
//! Wired devices report carrier. Wireless devices have a link when the
//! card is associated with the AP the device is supposed to be on; a few
//! missed checks in a row are tolerated before the link counts as lost.

use log::{debug, info};
use std::sync::Arc;

use crate::api::models::{AccessPoint, DeviceCapabilities, DeviceEvent, DeviceKind};
use crate::core::ap_list::Incumbent;
use crate::core::device::{Device, WorkerEnv};
use crate::core::state_wait::{self, is_associated};
use crate::types::constants::limits;
use crate::util::utils::{qual_to_percent, try_log};

/// Reads carrier. Devices that cannot detect carrier always have a link.
pub(crate) async fn probe_wired_link(dev: &Device) -> bool {
    if !dev.caps.contains(DeviceCapabilities::CARRIER_DETECT) {
        return true;
    }
    match dev.link().carrier().await {
        Ok(carrier) => carrier,
        Err(e) => {
            debug!("Could not read carrier for {}: {e}", dev.iface);
            false
        }
    }
}

/// Whether the card is associated with `ap`.
///
/// A miss only counts as "no link" after several consecutive misses;
/// until then `default_link` is reported.
pub(crate) async fn link_to_specific_ap(
    dev: &mut Device,
    ap: &AccessPoint,
    default_link: bool,
) -> bool {
    let shared = Arc::clone(&dev.shared);
    let Some(wireless) = dev.wireless.as_mut() else {
        return false;
    };
    let radio = Arc::clone(&wireless.radio);

    // Scans flip the card to infra mode at auto frequency; don't look mid-scan.
    let _scan_guard = shared.scan_lock.lock().await;

    if is_associated(radio.as_ref()).await
        && let Ok(Some(current)) = radio.essid().await
        && ap.essid.as_deref() == Some(current.as_str())
    {
        wireless.failed_link_count = 0;
        return true;
    }

    wireless.failed_link_count += 1;
    if wireless.failed_link_count < limits::MAX_FAILED_LINK_CHECKS {
        default_link
    } else {
        false
    }
}

/// Picks the AP the device should be on.
///
/// Returns `None` if the device cannot scan and has no link, since such
/// devices only join networks the user picks.
pub(crate) async fn best_ap(dev: &mut Device, env: &WorkerEnv) -> Option<AccessPoint> {
    dev.wireless.as_ref()?;
    if !dev.supports_scan() && !dev.link_active {
        return None;
    }

    let current = dev.act_request.as_ref().and_then(|req| {
        req.ap
            .clone()
            .map(|ap| (ap, req.user_requested))
    });
    let sticky = match &current {
        Some((ap, user_requested)) => {
            ap.user_created || *user_requested || link_to_specific_ap(dev, ap, true).await
        }
        None => false,
    };

    let mut shared = dev.shared.wireless()?;
    shared.ap_list.apply_history(&env.history);
    let incumbent = current.as_ref().map(|(ap, _)| Incumbent { ap, sticky });
    shared.ap_list.best_candidate(incumbent, &env.history)
}

/// Probes for a link to whatever AP candidate selection prefers.
async fn probe_wireless_link(dev: &mut Device, env: &WorkerEnv) -> bool {
    match best_ap(dev, env).await {
        Some(ap) => link_to_specific_ap(dev, &ap, true).await,
        None => false,
    }
}

/// Probes link state, bringing the interface up first if needed.
pub(crate) async fn probe_link_state(dev: &mut Device, env: &WorkerEnv) -> bool {
    if !state_wait::is_up(dev, env).await {
        state_wait::set_up_down(dev, env, true).await;
    }
    match dev.kind {
        DeviceKind::Wireless => {
            let link = probe_wireless_link(dev, env).await;
            update_signal_strength(dev, env).await;
            link
        }
        DeviceKind::Wired => probe_wired_link(dev).await,
    }
}

/// Records a new link state and reports it if it changed.
pub(crate) fn set_link_active(dev: &mut Device, env: &WorkerEnv, active: bool) {
    if dev.link_active == active {
        return;
    }
    info!(
        "Link {} on {}",
        if active { "up" } else { "down" },
        dev.iface
    );
    dev.link_active = active;
    env.events.emit(DeviceEvent::LinkChanged {
        iface: dev.iface.clone(),
        active,
    });
}

async fn read_strength(dev: &Device) -> Option<u8> {
    let wireless = dev.wireless.as_ref()?;
    let sample = try_log!(
        wireless.radio.quality().await,
        format!("Could not read signal quality for {}", dev.iface)
    );
    qual_to_percent(&sample, &wireless.calibration)
}

/// Refreshes the device's live signal strength.
///
/// Skipped while a scan holds the card. An unreadable sample keeps the
/// previous value a few times before the strength is reported unknown.
pub(crate) async fn update_signal_strength(dev: &mut Device, env: &WorkerEnv) {
    let shared = Arc::clone(&dev.shared);
    let Ok(_scan_guard) = shared.scan_lock.try_lock() else {
        return;
    };
    if dev.wireless.is_none() {
        return;
    }

    let reading = if dev.act_request.is_some() {
        read_strength(dev).await
    } else {
        None
    };

    let Some(wireless) = dev.wireless.as_mut() else {
        return;
    };
    let Some(mut state) = shared.wireless() else {
        return;
    };
    let strength = match reading {
        None if dev.act_request.is_some()
            && wireless.invalid_strength_counter < limits::MAX_INVALID_STRENGTH_READS =>
        {
            wireless.invalid_strength_counter += 1;
            state.strength
        }
        None => {
            wireless.invalid_strength_counter = 0;
            None
        }
        Some(value) => {
            wireless.invalid_strength_counter = 0;
            Some(value)
        }
    };

    if state.strength != strength {
        state.strength = strength;
        drop(state);
        env.events.emit(DeviceEvent::DeviceStrengthChanged {
            iface: dev.iface.clone(),
            strength,
        });
    }
}

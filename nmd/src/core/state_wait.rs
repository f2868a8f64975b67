//! Bounded waits on hardware state.
//!
//! Interface up/down transitions and wireless association are observed by
//! polling the hardware at short intervals. Every wait here has an upper
//! bound, and the waits that run during activation check the request's
//! cancellation flag at each poll.

use futures::{FutureExt, select};
use log::{debug, info, warn};
use std::pin::pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::sleep;

use crate::api::config::TimeoutConfig;
use crate::backend::WirelessHardware;
use crate::core::device::{Device, WorkerEnv};
use crate::util::utils::ghz_to_mhz;

/// How a bounded wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitOutcome {
    Done,
    TimedOut,
    Cancelled,
}

/// Result of waiting for a stable wireless link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LinkWait {
    Linked,
    NoLink,
    Cancelled,
}

fn cancelled(cancel: Option<&AtomicBool>) -> bool {
    cancel.is_some_and(|c| c.load(Ordering::Acquire))
}

pub(crate) async fn is_up(dev: &Device, env: &WorkerEnv) -> bool {
    match env.providers.installer.query_link(&dev.iface).await {
        Ok(up) => up,
        Err(e) => {
            warn!("Could not read interface flags for {}: {e}", dev.iface);
            false
        }
    }
}

/// Sets the interface up or down and refreshes a missing hardware address.
///
/// Some cards reload firmware on the way up and only then report their address.
pub(crate) async fn set_up_down(dev: &mut Device, env: &WorkerEnv, up: bool) {
    if let Err(e) = env.providers.installer.set_interface_up(&dev.iface, up).await {
        warn!("Could not set {} {}: {e}", dev.iface, if up { "up" } else { "down" });
    }
    if !dev.hw_address.is_some_and(|a| a.is_valid()) {
        match dev.link().hw_address().await {
            Ok(addr) => dev.hw_address = addr,
            Err(e) => debug!("No hardware address for {} yet: {e}", dev.iface),
        }
    }
}

async fn wait_for_up_state(
    dev: &Device,
    env: &WorkerEnv,
    want_up: bool,
    cancel: Option<&AtomicBool>,
) -> WaitOutcome {
    for _ in 0..env.config.iface_poll_tries {
        if cancelled(cancel) {
            return WaitOutcome::Cancelled;
        }
        if is_up(dev, env).await == want_up {
            return WaitOutcome::Done;
        }
        sleep(env.config.iface_poll_interval).await;
    }
    WaitOutcome::TimedOut
}

/// Brings the interface up and waits for it to report up.
pub(crate) async fn bring_up_wait(
    dev: &mut Device,
    env: &WorkerEnv,
    cancel: Option<&AtomicBool>,
) -> WaitOutcome {
    set_up_down(dev, env, true).await;
    let outcome = wait_for_up_state(dev, env, true, cancel).await;
    if outcome != WaitOutcome::Done {
        info!("Failed to bring up device {} ({outcome:?})", dev.iface);
    }
    outcome
}

/// Brings the interface down and waits for it to report down.
pub(crate) async fn bring_down_wait(
    dev: &mut Device,
    env: &WorkerEnv,
    cancel: Option<&AtomicBool>,
) -> WaitOutcome {
    set_up_down(dev, env, false).await;
    let outcome = wait_for_up_state(dev, env, false, cancel).await;
    if outcome != WaitOutcome::Done {
        info!("Failed to bring down device {} ({outcome:?})", dev.iface);
    }
    outcome
}

/// Whether the radio reports a valid associated AP address.
pub(crate) async fn is_associated(radio: &dyn WirelessHardware) -> bool {
    match radio.association().await {
        Ok(addr) => addr.is_some_and(|a| a.is_valid()),
        Err(e) => {
            debug!("Could not read association: {e}");
            false
        }
    }
}

async fn associated_with(radio: &dyn WirelessHardware, essid: &str) -> bool {
    if !is_associated(radio).await {
        return false;
    }
    matches!(radio.essid().await, Ok(Some(current)) if current == essid)
}

/// Gives a freshly configured card time to associate.
///
/// Polls for up to twice `pause`. Returns whether the card ended up
/// associated with `essid`.
pub(crate) async fn wait_for_association(
    radio: &dyn WirelessHardware,
    essid: &str,
    pause: Duration,
) -> bool {
    const CYCLES: u32 = 200;
    let interval = pause / (CYCLES / 2);
    for _ in 0..CYCLES {
        if associated_with(radio, essid).await {
            return true;
        }
        sleep(interval).await;
    }
    false
}

/// Waits for the card to hold a stable association with `essid`.
///
/// Each poll checks that the frequency is unchanged since the last poll,
/// the card is associated, and the essid matches. Consecutive good polls
/// build up a stability count that any change resets. The wait ends when
/// the count reaches twice the required ticks, on timeout, or when the
/// request is cancelled. A link is declared if the count exceeds the
/// required ticks.
pub(crate) async fn wait_for_link(
    radio: &dyn WirelessHardware,
    essid: &str,
    timeout: Duration,
    cancel: &AtomicBool,
    config: &TimeoutConfig,
) -> LinkWait {
    let timeout = timeout.max(config.link_min_timeout());
    let required = config.link_required_ticks;
    let interval = config.link_poll_interval();
    let mut stable = 0u32;
    let mut last_mhz = 0u32;

    debug!("Waiting up to {timeout:?} for a stable link to {essid}");
    let mut deadline = pin!(sleep(timeout).fuse());

    loop {
        select! {
            _ = deadline => {
                debug!("Link wait for {essid} timed out after {stable} stable polls");
                break;
            }
            _ = sleep(interval).fuse() => {
                if cancel.load(Ordering::Acquire) {
                    return LinkWait::Cancelled;
                }
                let mhz = match radio.frequency().await {
                    Ok(ghz) => ghz_to_mhz(ghz),
                    Err(e) => {
                        debug!("Could not read frequency: {e}");
                        0
                    }
                };
                if mhz == last_mhz && associated_with(radio, essid).await {
                    stable += 1;
                } else {
                    stable = 0;
                    last_mhz = mhz;
                }
                if stable >= 2 * required {
                    break;
                }
            }
        }
    }

    if stable > required {
        LinkWait::Linked
    } else {
        LinkWait::NoLink
    }
}

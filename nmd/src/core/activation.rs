//! Staged device activation.
//!
//! An activation walks a device through prepare, configure, and the three
//! IP stages. Each stage runs as its own step of the worker loop so the
//! cancellation flag is seen between stages. DHCP and user key prompts
//! suspend the request: the stage function returns [`Step::Suspend`] and
//! the worker feeds the result back in through [`resume_dhcp`] or
//! [`resume_key`].
//!
//! Two edges go backwards. A wireless link that will not come up with
//! open-system authentication is retried with shared-key, both inside
//! device configure and after a DHCP timeout. A key arriving from the
//! user re-enters device configure.

use log::{debug, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

use crate::api::models::{
    AccessPoint, ActivationStage, ActivationTarget, AuthMethod, DeviceError, DeviceEvent,
    DeviceKind, DhcpOutcome, EncKey, HardwareError, Ipv4Config, KeyRequest, KeyResponse,
    NetworkMode, ProviderError, ScanInterval, validate_essid,
};
use crate::core::device::{Device, WorkerEnv};
use crate::core::link;
use crate::core::state_wait::{self, LinkWait, WaitOutcome};
use crate::types::constants::limits;
use crate::util::utils::{channel_from_freq, freq_from_channel, ghz_to_mhz};

/// One attempt to bring a device into service.
#[derive(Debug)]
pub(crate) struct ActivationRequest {
    pub id: Uuid,
    /// Target network, wireless only.
    pub ap: Option<AccessPoint>,
    pub stage: ActivationStage,
    pub user_requested: bool,
    /// Set once by whoever cancels; never cleared.
    pub cancel: Arc<AtomicBool>,
    pub dhcp_config: Option<Ipv4Config>,
    pub ip4_config: Option<Ipv4Config>,
    pub key_request: Option<KeyRequest>,
}

impl ActivationRequest {
    pub(crate) fn new(ap: Option<AccessPoint>, user_requested: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            ap,
            stage: ActivationStage::DevicePrepare,
            user_requested,
            cancel: Arc::new(AtomicBool::new(false)),
            dhcp_config: None,
            ip4_config: None,
            key_request: None,
        }
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }
}

/// What the worker does after running a stage.
#[derive(Debug)]
pub(crate) enum Step {
    /// Run the request's (new) current stage.
    Continue,
    /// Wait for an external result, then call the matching resume function.
    Suspend(Suspension),
    /// The request is terminal or gone.
    Done,
}

#[derive(Debug, Clone)]
pub(crate) enum Suspension {
    Dhcp,
    UserKey(KeyRequest),
}

fn set_stage(dev: &mut Device, env: &WorkerEnv, stage: ActivationStage) {
    let Some(req) = dev.act_request.as_mut() else {
        return;
    };
    req.stage = stage;
    info!("Activation ({}) stage: {stage}", dev.iface);
    env.events.emit(DeviceEvent::StageChanged {
        iface: dev.iface.clone(),
        request: req.id,
        stage,
    });
}

fn warn_on_err(result: Result<(), HardwareError>, iface: &str, what: &str) {
    if let Err(e) = result {
        warn!("{iface}: could not {what}: {e}");
    }
}

fn target_ap(dev: &Device) -> Option<AccessPoint> {
    dev.act_request.as_ref().and_then(|req| req.ap.clone())
}

fn target_ap_mut(dev: &mut Device) -> Option<&mut AccessPoint> {
    dev.act_request.as_mut().and_then(|req| req.ap.as_mut())
}

fn cancel_flag(dev: &Device) -> Arc<AtomicBool> {
    dev.act_request
        .as_ref()
        .map_or_else(|| Arc::new(AtomicBool::new(true)), |req| Arc::clone(&req.cancel))
}

/// Resolves a target into the AP an activation should use.
async fn resolve_target(
    dev: &mut Device,
    env: &WorkerEnv,
    target: ActivationTarget,
) -> Result<(Option<AccessPoint>, bool), DeviceError> {
    let user_requested = target.is_user_requested();
    match (dev.kind, target) {
        (DeviceKind::Wired, ActivationTarget::Wired) => Ok((None, false)),
        (DeviceKind::Wired, _) | (DeviceKind::Wireless, ActivationTarget::Wired) => {
            Err(DeviceError::TargetMismatch(dev.iface.clone()))
        }
        (DeviceKind::Wireless, ActivationTarget::AccessPoint(ap)) => Ok((Some(ap), false)),
        (DeviceKind::Wireless, ActivationTarget::Best) => link::best_ap(dev, env)
            .await
            .map(|ap| (Some(ap), false))
            .ok_or(DeviceError::NoCandidate),
        (DeviceKind::Wireless, ActivationTarget::Essid { essid, key }) => {
            validate_essid(&essid)?;
            if key.as_ref().is_some_and(|k| !k.is_valid()) {
                return Err(DeviceError::InvalidKey);
            }
            Ok((Some(activation_ap(dev, env, &essid, key)), user_requested))
        }
        (DeviceKind::Wireless, ActivationTarget::CreateAdHoc { essid, key }) => {
            validate_essid(&essid)?;
            if key.as_ref().is_some_and(|k| !k.is_valid()) {
                return Err(DeviceError::InvalidKey);
            }
            let ap = AccessPoint::user_created(essid, key);
            if let Some(mut shared) = dev.shared.wireless() {
                shared.ap_list.upsert(ap.clone());
            }
            Ok((Some(ap), user_requested))
        }
    }
}

/// Finds or synthesizes the AP for a network the user named.
///
/// A network missing from the scan gets an artificial entry, encrypted
/// if the user supplied a key. Remembered key and auth are applied, then
/// the user's key on top.
fn activation_ap(
    dev: &mut Device,
    env: &WorkerEnv,
    essid: &str,
    key: Option<EncKey>,
) -> AccessPoint {
    let mut ap = match dev.shared.wireless() {
        Some(mut shared) => match shared.ap_list.by_essid(essid) {
            Some(found) => found.clone(),
            None => {
                debug!("Creating artificial access point for {essid}");
                let ap = AccessPoint::artificial(essid, key.clone());
                shared.ap_list.upsert(ap.clone());
                ap
            }
        },
        None => AccessPoint::artificial(essid, key.clone()),
    };
    env.history.unblacklist(essid);
    env.history.apply_to(&mut ap);
    if let Some(key) = key {
        ap.enc_key = Some(key);
    }
    ap
}

/// Creates a request for `target` and schedules its first stage.
pub(crate) async fn begin(
    dev: &mut Device,
    env: &WorkerEnv,
    target: ActivationTarget,
) -> Result<Uuid, DeviceError> {
    if dev.is_activating() {
        return Err(DeviceError::AlreadyActivating(dev.iface.clone()));
    }
    let (ap, user_requested) = resolve_target(dev, env, target).await?;
    if let Some(ap) = &ap {
        info!("Activation ({}) requested for {ap}", dev.iface);
    } else {
        info!("Activation ({}) requested", dev.iface);
    }

    let req = ActivationRequest::new(ap, user_requested);
    let id = req.id;
    dev.shared.set_cancel_flag(Arc::clone(&req.cancel));
    dev.act_request = Some(req);
    set_stage(dev, env, ActivationStage::DevicePrepare);
    Ok(id)
}

/// Runs the request's current stage.
pub(crate) async fn run_stage(dev: &mut Device, env: &WorkerEnv) -> Step {
    let Some(req) = dev.act_request.as_ref() else {
        return Step::Done;
    };
    let stage = req.stage;
    if stage.is_terminal() {
        return Step::Done;
    }
    if req.is_cancelled() {
        return handle_cancel(dev, env).await;
    }

    debug!("Activation ({}) running stage: {stage}", dev.iface);
    match stage {
        ActivationStage::DevicePrepare => device_prepare(dev, env).await,
        ActivationStage::DeviceConfigure => device_configure(dev, env).await,
        ActivationStage::NeedUserKey => match req.key_request.clone() {
            Some(key_req) => Step::Suspend(Suspension::UserKey(key_req)),
            None => request_user_key(dev, env, false),
        },
        ActivationStage::IpConfigStart => ip_config_start(dev, env),
        ActivationStage::IpConfigGet => ip_config_get(dev, env).await,
        ActivationStage::IpConfigCommit => ip_config_commit(dev, env).await,
        ActivationStage::Activated | ActivationStage::Failed | ActivationStage::Cancelled => {
            Step::Done
        }
    }
}

/// Picks the authentication method to start with.
///
/// Encrypted networks use the method last remembered for them, or
/// open-system. Open networks use none.
fn initial_auth_method(ap: &AccessPoint, env: &WorkerEnv) -> AuthMethod {
    if !ap.encrypted {
        return AuthMethod::None;
    }
    let auth = ap
        .essid
        .as_deref()
        .and_then(|essid| env.history.get(essid))
        .map_or(ap.auth_method, |remembered| remembered.auth_method);
    match auth {
        AuthMethod::OpenSystem | AuthMethod::SharedKey => auth,
        AuthMethod::None => AuthMethod::OpenSystem,
    }
}

async fn device_prepare(dev: &mut Device, env: &WorkerEnv) -> Step {
    if dev.kind == DeviceKind::Wireless {
        let Some(ap) = target_ap_mut(dev) else {
            warn!("Wireless activation on {} without a target network", dev.iface);
            return fail(dev, env).await;
        };
        // Cards that hide non-broadcasting APs from scans leave us guessing
        // whether an artificial AP is encrypted until a key shows up.
        if ap.artificial && (ap.encrypted || ap.has_valid_key()) {
            ap.encrypted = true;
            ap.auth_method = AuthMethod::OpenSystem;
        }
        let auth = initial_auth_method(ap, env);
        ap.auth_method = auth;
    }
    set_stage(dev, env, ActivationStage::DeviceConfigure);
    Step::Continue
}

async fn device_configure(dev: &mut Device, env: &WorkerEnv) -> Step {
    let cancel = cancel_flag(dev);
    if !state_wait::is_up(dev, env).await
        && state_wait::bring_up_wait(dev, env, Some(&*cancel)).await == WaitOutcome::Cancelled
    {
        return handle_cancel(dev, env).await;
    }
    if cancel.load(Ordering::Acquire) {
        return handle_cancel(dev, env).await;
    }

    match dev.kind {
        DeviceKind::Wired => {
            set_stage(dev, env, ActivationStage::IpConfigStart);
            Step::Continue
        }
        DeviceKind::Wireless => match target_ap(dev) {
            Some(ap) if ap.user_created => configure_adhoc(dev, env).await,
            Some(_) => configure_wireless(dev, env, &cancel).await,
            None => fail(dev, env).await,
        },
    }
}

async fn configure_wireless(dev: &mut Device, env: &WorkerEnv, cancel: &AtomicBool) -> Step {
    let Some(radio) = dev.radio() else {
        return fail(dev, env).await;
    };

    if target_ap(dev).is_some_and(|ap| ap.needs_key()) {
        info!(
            "Activation ({}/wireless): access point is encrypted but no key is available",
            dev.iface
        );
        return request_user_key(dev, env, false);
    }

    loop {
        if cancel.load(Ordering::Acquire) {
            return handle_cancel(dev, env).await;
        }
        let Some(ap) = target_ap(dev) else {
            return fail(dev, env).await;
        };

        set_wireless_config(dev, env, &ap).await;

        let pause = env.config.association_pause_for(dev.num_frequencies());
        let outcome =
            state_wait::wait_for_link(radio.as_ref(), ap.essid_str(), pause, cancel, &env.config)
                .await;
        match outcome {
            LinkWait::Cancelled => return handle_cancel(dev, env).await,
            LinkWait::Linked => {
                info!(
                    "Activation ({}/wireless): connected to access point {}",
                    dev.iface,
                    ap.essid_str()
                );
                set_stage(dev, env, ActivationStage::IpConfigStart);
                return Step::Continue;
            }
            LinkWait::NoLink => match ap.auth_method {
                AuthMethod::OpenSystem => {
                    info!(
                        "Activation ({}/wireless): no link with Open System authentication, trying Shared Key",
                        dev.iface
                    );
                    if let Some(ap) = target_ap_mut(dev) {
                        ap.auth_method = AuthMethod::SharedKey;
                    }
                }
                AuthMethod::SharedKey => {
                    info!(
                        "Activation ({}/wireless): no link with Shared Key authentication, asking for a new key",
                        dev.iface
                    );
                    return request_user_key(dev, env, true);
                }
                AuthMethod::None => {
                    warn!(
                        "Activation ({}/wireless): no link to unencrypted network {}",
                        dev.iface,
                        ap.essid_str()
                    );
                    return fail(dev, env).await;
                }
            },
        }
    }
}

/// Picks a 2.4 GHz frequency for a new ad-hoc network.
///
/// The first supported channel nobody is using wins. If every channel is
/// taken, the one with the fewest networks on it is used.
fn pick_adhoc_frequency(supported: &[f64], in_use: &[f64]) -> Option<f64> {
    let mut channels: Vec<u16> = supported
        .iter()
        .filter_map(|&ghz| channel_from_freq(ghz_to_mhz(ghz)))
        .filter(|ch| (1..=14).contains(ch))
        .collect();
    if channels.is_empty() {
        channels = (1..=11).collect();
    }
    channels.sort_unstable();
    channels.dedup();

    let crowding = |ch: u16| {
        in_use
            .iter()
            .filter(|&&ghz| channel_from_freq(ghz_to_mhz(ghz)) == Some(ch))
            .count()
    };
    let channel = channels
        .iter()
        .copied()
        .find(|&ch| crowding(ch) == 0)
        .or_else(|| channels.iter().copied().min_by_key(|&ch| crowding(ch)))?;
    freq_from_channel(channel).map(|mhz| f64::from(mhz) / 1000.0)
}

async fn configure_adhoc(dev: &mut Device, env: &WorkerEnv) -> Step {
    let supported = dev
        .wireless
        .as_ref()
        .map(|w| w.frequencies.clone())
        .unwrap_or_default();
    let in_use: Vec<f64> = dev
        .shared
        .wireless()
        .map(|shared| {
            shared
                .ap_list
                .iter()
                .filter(|ap| !ap.user_created)
                .map(|ap| ap.frequency)
                .collect()
        })
        .unwrap_or_default();

    let Some(freq) = pick_adhoc_frequency(&supported, &in_use) else {
        warn!("Activation ({}/wireless): no usable ad-hoc channel", dev.iface);
        return fail(dev, env).await;
    };
    let Some(ap) = target_ap_mut(dev) else {
        return fail(dev, env).await;
    };
    ap.frequency = freq;
    ap.auth_method = if ap.encrypted {
        AuthMethod::SharedKey
    } else {
        AuthMethod::None
    };
    let ap = ap.clone();
    info!(
        "Activation ({}/wireless adhoc): creating network {} at {freq:.3} GHz",
        dev.iface,
        ap.essid_str()
    );

    set_wireless_config(dev, env, &ap).await;

    if cancel_flag(dev).load(Ordering::Acquire) {
        return handle_cancel(dev, env).await;
    }
    set_stage(dev, env, ActivationStage::IpConfigStart);
    Step::Continue
}

/// Pushes the AP's settings to the card.
async fn set_wireless_config(dev: &mut Device, env: &WorkerEnv, ap: &AccessPoint) {
    let Some(radio) = dev.radio() else {
        return;
    };
    if let Some(wireless) = dev.wireless.as_mut() {
        wireless.failed_link_count = 0;
    }

    state_wait::bring_down_wait(dev, env, None).await;
    state_wait::bring_up_wait(dev, env, None).await;

    let iface = dev.iface.clone();
    warn_on_err(radio.set_mode(NetworkMode::Infrastructure).await, &iface, "reset mode");
    warn_on_err(radio.set_mode(ap.mode).await, &iface, "set mode");
    warn_on_err(radio.set_bitrate(0).await, &iface, "set bitrate");

    let fixed_freq = ap.user_created || (ap.frequency > 0.0 && ap.mode == NetworkMode::AdHoc);
    let freq = if fixed_freq { ap.frequency } else { 0.0 };
    warn_on_err(radio.set_frequency(freq).await, &iface, "set frequency");

    let mut auth = ap.auth_method;
    match ap.enc_key.as_ref().and_then(EncKey::hashed) {
        Some(key) if ap.encrypted => {
            if auth == AuthMethod::None {
                warn!("{iface}: encrypted network with no auth method, using Open System");
                auth = AuthMethod::OpenSystem;
            }
            warn_on_err(radio.set_enc_key(Some(&key), auth).await, &iface, "set key");
        }
        _ => {
            auth = AuthMethod::None;
            warn_on_err(radio.set_enc_key(None, auth).await, &iface, "clear key");
        }
    }
    warn_on_err(radio.set_essid(ap.essid_str()).await, &iface, "set essid");

    info!(
        "Activation ({iface}/wireless): using essid '{}', with {auth} authentication",
        ap.essid_str()
    );

    let pause = env.config.association_pause_for(dev.num_frequencies());
    if !state_wait::wait_for_association(radio.as_ref(), ap.essid_str(), pause).await {
        debug!("{iface}: not associated yet after configuring");
    }

    if ap.mode == NetworkMode::AdHoc {
        match radio.bitrate().await {
            Ok(rate) if rate > 0 => {}
            _ => warn_on_err(
                radio.set_bitrate(limits::ADHOC_MIN_BITRATE).await,
                &iface,
                "set ad-hoc bitrate",
            ),
        }
    }
}

fn request_user_key(dev: &mut Device, env: &WorkerEnv, retry: bool) -> Step {
    let Some(req) = dev.act_request.as_mut() else {
        return Step::Done;
    };
    let key_req = KeyRequest {
        request_id: req.id,
        iface: dev.iface.clone(),
        essid: req.ap.as_ref().map(|ap| ap.essid_str().to_string()).unwrap_or_default(),
        retry,
    };
    req.key_request = Some(key_req.clone());
    set_stage(dev, env, ActivationStage::NeedUserKey);
    Step::Suspend(Suspension::UserKey(key_req))
}

/// Feeds the user's answer to a key request back into the activation.
pub(crate) async fn resume_key(dev: &mut Device, env: &WorkerEnv, response: KeyResponse) -> Step {
    let Some(req) = dev.act_request.as_mut() else {
        return Step::Done;
    };
    req.key_request = None;
    if req.is_cancelled() {
        return handle_cancel(dev, env).await;
    }

    match response {
        KeyResponse::Key(key) => {
            let Some(ap) = req.ap.as_mut() else {
                return fail(dev, env).await;
            };
            ap.auth_method = AuthMethod::OpenSystem;
            ap.enc_key = Some(key);
            if let Some(essid) = ap.essid.as_deref() {
                env.history.set_auth_method(essid, AuthMethod::OpenSystem);
            }
            set_stage(dev, env, ActivationStage::DeviceConfigure);
            Step::Continue
        }
        KeyResponse::Cancelled => {
            info!("Activation ({}): user cancelled key entry", dev.iface);
            fail(dev, env).await
        }
    }
}

fn ip_config_start(dev: &mut Device, env: &WorkerEnv) -> Step {
    let user_created = target_ap(dev).is_some_and(|ap| ap.user_created);
    if dev.use_dhcp && !user_created {
        info!("Activation ({}): beginning DHCP transaction", dev.iface);
        return Step::Suspend(Suspension::Dhcp);
    }
    set_stage(dev, env, ActivationStage::IpConfigGet);
    Step::Continue
}

/// Feeds a finished DHCP transaction back into the activation.
pub(crate) async fn resume_dhcp(
    dev: &mut Device,
    env: &WorkerEnv,
    result: Result<DhcpOutcome, ProviderError>,
) -> Step {
    let Some(req) = dev.act_request.as_mut() else {
        return Step::Done;
    };
    if req.is_cancelled() {
        return handle_cancel(dev, env).await;
    }
    match result {
        Ok(DhcpOutcome::Bound(config)) => {
            req.dhcp_config = Some(config);
            set_stage(dev, env, ActivationStage::IpConfigGet);
            Step::Continue
        }
        Ok(DhcpOutcome::TimedOut) => ip_config_timeout(dev, env).await,
        Err(e) => {
            warn!("Activation ({}): DHCP transaction failed: {e}", dev.iface);
            fail(dev, env).await
        }
    }
}

async fn ip_config_get(dev: &mut Device, env: &WorkerEnv) -> Step {
    let user_created = target_ap(dev).is_some_and(|ap| ap.user_created);
    let config = if user_created {
        env.providers.autoip.generate(&dev.iface).await
    } else if dev.use_dhcp {
        dev.act_request.as_mut().and_then(|req| req.dhcp_config.take())
    } else {
        env.providers.static_config.get_config(&dev.iface).await
    };

    match config {
        Some(config) => store_config(dev, env, config),
        None => {
            warn!("Activation ({}): could not get IP configuration", dev.iface);
            fail(dev, env).await
        }
    }
}

fn store_config(dev: &mut Device, env: &WorkerEnv, config: Ipv4Config) -> Step {
    debug!(
        "Activation ({}): got {}/{}",
        dev.iface,
        config.address,
        config.prefix_len()
    );
    if let Some(req) = dev.act_request.as_mut() {
        req.ip4_config = Some(config);
    }
    set_stage(dev, env, ActivationStage::IpConfigCommit);
    Step::Continue
}

/// Handles a DHCP timeout.
///
/// Wired and open wireless networks fall back to a link-local address.
/// An encrypted network that may have associated with the wrong
/// authentication tries shared-key next, then asks for a new key.
async fn ip_config_timeout(dev: &mut Device, env: &WorkerEnv) -> Step {
    set_stage(dev, env, ActivationStage::IpConfigGet);
    info!("Activation ({}): DHCP timed out", dev.iface);

    if let Some(ap) = target_ap(dev).filter(|ap| ap.encrypted) {
        match ap.auth_method {
            AuthMethod::OpenSystem => {
                info!(
                    "Activation ({}/wireless): Open System authentication may be wrong, trying Shared Key",
                    dev.iface
                );
                if let Some(ap) = target_ap_mut(dev) {
                    ap.auth_method = AuthMethod::SharedKey;
                }
                set_stage(dev, env, ActivationStage::DeviceConfigure);
                return Step::Continue;
            }
            AuthMethod::SharedKey => return request_user_key(dev, env, true),
            AuthMethod::None => {}
        }
    }

    match env.providers.autoip.generate(&dev.iface).await {
        Some(config) => store_config(dev, env, config),
        None => {
            warn!("Activation ({}): no link-local address available", dev.iface);
            fail(dev, env).await
        }
    }
}

async fn ip_config_commit(dev: &mut Device, env: &WorkerEnv) -> Step {
    let Some(config) = dev.act_request.as_ref().and_then(|req| req.ip4_config.clone()) else {
        return fail(dev, env).await;
    };
    dev.ip4_config = Some(config.clone());

    if let Err(e) = env.providers.installer.commit(&dev.iface, &config).await {
        warn!("Activation ({}): could not apply IP configuration: {e}", dev.iface);
        return fail(dev, env).await;
    }

    dev.ip4_address = match dev.link().ip4_address().await {
        Ok(Some(addr)) => Some(addr),
        Ok(None) => Some(config.address),
        Err(e) => {
            debug!("Could not read back address of {}: {e}", dev.iface);
            Some(config.address)
        }
    };
    if let Ok(Some(addr)) = dev.link().hw_address().await {
        dev.hw_address = Some(addr);
    }

    if let Some(essid) = target_ap(dev).and_then(|ap| ap.essid) {
        env.history.mark_used(&essid);
    }
    set_stage(dev, env, ActivationStage::Activated);
    let link = link::probe_link_state(dev, env).await;
    link::set_link_active(dev, env, link);
    Step::Done
}

/// Ends the activation as failed and leaves the card unconfigured.
async fn fail(dev: &mut Device, env: &WorkerEnv) -> Step {
    if let Some(radio) = dev.radio() {
        warn_on_err(radio.set_essid("").await, &dev.iface, "clear essid");
        warn_on_err(radio.set_enc_key(None, AuthMethod::None).await, &dev.iface, "clear key");
        if !state_wait::is_up(dev, env).await {
            state_wait::set_up_down(dev, env, true).await;
        }
    }
    if let Some(ap) = target_ap(dev).filter(|ap| !ap.user_created)
        && let Some(essid) = ap.essid.as_deref()
    {
        env.history.blacklist(essid);
    }
    set_stage(dev, env, ActivationStage::Failed);
    Step::Done
}

/// Tells whoever the request is waiting on to stop, then ends it as cancelled.
pub(crate) async fn handle_cancel(dev: &mut Device, env: &WorkerEnv) -> Step {
    let Some(req) = dev.act_request.as_mut() else {
        return Step::Done;
    };
    req.cancel.store(true, Ordering::Release);
    match req.stage {
        ActivationStage::NeedUserKey => {
            if let Some(key_req) = req.key_request.take() {
                env.providers.key_prompter.cancel_request(&key_req).await;
            }
        }
        ActivationStage::IpConfigStart => {
            env.providers.dhcp.cancel_transaction(&dev.iface).await;
        }
        _ => {}
    }
    info!("Activation ({}) cancelled", dev.iface);
    set_stage(dev, env, ActivationStage::Cancelled);
    Step::Done
}

/// Tears down any activation and returns the device to an idle state.
pub(crate) async fn deactivate(dev: &mut Device, env: &WorkerEnv) {
    if dev.is_activating() {
        handle_cancel(dev, env).await;
    }
    info!("Deactivating device {}", dev.iface);
    dev.act_request = None;

    if let Err(e) = env.providers.installer.flush(&dev.iface).await {
        warn!("Could not flush addresses on {}: {e}", dev.iface);
    }
    dev.ip4_config = None;
    dev.ip4_address = None;

    if let Some(radio) = dev.radio() {
        warn_on_err(radio.set_essid("").await, &dev.iface, "clear essid");
        warn_on_err(radio.set_enc_key(None, AuthMethod::None).await, &dev.iface, "clear key");
        warn_on_err(
            radio.set_mode(NetworkMode::Infrastructure).await,
            &dev.iface,
            "reset mode",
        );
        if let Some(wireless) = dev.wireless.as_mut() {
            wireless.scan_interval = ScanInterval::Active;
        }
        if let Some(mut shared) = dev.shared.wireless() {
            shared.strength = None;
        }
    }
}

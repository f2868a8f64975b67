//! The per-device worker task.
//!
//! Each managed device gets one tokio task that owns its [`Device`] and is
//! the only place that state changes. The task waits on three things at
//! once: commands from the [`DeviceManager`](crate::DeviceManager), the
//! activation's outstanding DHCP transaction or key prompt, and the next
//! scheduled scan.

use futures::future::BoxFuture;
use log::{debug, info, warn};
use std::future;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until, timeout};
use uuid::Uuid;

use crate::api::models::{
    AccessPoint, ActivationTarget, DeviceError, DeviceStatus, DhcpOutcome, KeyResponse,
    NetworkMode, ProviderError, ScanInterval,
};
use crate::backend::{RadioRange, WirelessHardware};
use crate::core::activation::{self, Step, Suspension};
use crate::core::device::{Device, DeviceDescriptor, DeviceShared, WorkerEnv};
use crate::core::link;
use crate::core::scan::{self, ScanPass};
use crate::core::state_wait;
use crate::util::utils::try_log;

const COMMAND_QUEUE: usize = 32;

pub(crate) enum Command {
    Activate {
        target: ActivationTarget,
        reply: oneshot::Sender<Result<Uuid, DeviceError>>,
    },
    /// Wakes the worker after the cancellation flag was raised.
    Cancel,
    Deactivate {
        reply: oneshot::Sender<()>,
    },
    Scan {
        reply: oneshot::Sender<bool>,
    },
    ProbeLink {
        reply: oneshot::Sender<bool>,
    },
    BestCandidate {
        reply: oneshot::Sender<Option<AccessPoint>>,
    },
    SetScanInterval(ScanInterval),
    Shutdown,
}

/// An external result the activation is suspended on.
enum Resumption {
    Dhcp(Result<DhcpOutcome, ProviderError>),
    Key(KeyResponse),
}

type Pending = BoxFuture<'static, Resumption>;

enum Wake {
    Command(Option<Command>),
    Resumed(Resumption),
    ScanDue,
}

/// The manager's side of a running worker.
#[derive(Clone)]
pub(crate) struct WorkerHandle {
    pub tx: mpsc::Sender<Command>,
    pub status: watch::Receiver<DeviceStatus>,
    pub shared: Arc<DeviceShared>,
}

impl WorkerHandle {
    /// Sends a command that expects a reply and waits for it.
    pub(crate) async fn request<T>(
        &self,
        iface: &str,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, DeviceError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| DeviceError::WorkerGone(iface.to_string()))?;
        rx.await.map_err(|_| DeviceError::WorkerGone(iface.to_string()))
    }
}

/// Spawns the worker for a newly managed device.
pub(crate) fn spawn(desc: DeviceDescriptor, env: WorkerEnv) -> (WorkerHandle, JoinHandle<()>) {
    let shared = Arc::new(DeviceShared::new(desc.backend.kind(), env.config.ap_max_age));
    let dev = Device::new(desc, Arc::clone(&shared));
    let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
    let (status_tx, status) = watch::channel(dev.status());
    let task = tokio::spawn(run(dev, env, rx, status_tx));
    (WorkerHandle { tx, status, shared }, task)
}

async fn read_range(radio: &dyn WirelessHardware, iface: &str) -> Option<RadioRange> {
    let range = try_log!(radio.range().await, format!("Could not read range of {iface}"));
    Some(range)
}

/// Brings a freshly added device into a known state.
async fn initialize(dev: &mut Device, env: &WorkerEnv) {
    if !state_wait::is_up(dev, env).await {
        state_wait::bring_up_wait(dev, env, None).await;
    }
    if let Ok(addr) = dev.link().hw_address().await {
        dev.hw_address = addr;
    }
    if let Ok(addr) = dev.link().ip4_address().await {
        dev.ip4_address = addr;
    }

    if let Some(radio) = dev.radio() {
        if let Some(range) = read_range(radio.as_ref(), &dev.iface).await
            && let Some(wireless) = dev.wireless.as_mut()
        {
            debug!(
                "{}: {} supported frequencies",
                dev.iface,
                range.frequencies.len()
            );
            wireless.calibration = range.calibration;
            wireless.frequencies = range.frequencies;
        }
        if let Err(e) = radio.set_mode(NetworkMode::Infrastructure).await {
            warn!("{}: could not set infrastructure mode: {e}", dev.iface);
        }
    }

    let link = link::probe_link_state(dev, env).await;
    link::set_link_active(dev, env, link);
    info!("Now managing {} device {}", dev.kind, dev.iface);
}

fn suspend(dev: &Device, env: &WorkerEnv, suspension: Suspension) -> Pending {
    match suspension {
        Suspension::Dhcp => {
            let dhcp = Arc::clone(&env.providers.dhcp);
            let iface = dev.iface.clone();
            let ceiling = env.config.dhcp_timeout;
            Box::pin(async move {
                match timeout(ceiling, dhcp.begin_transaction(&iface)).await {
                    Ok(result) => Resumption::Dhcp(result),
                    Err(_) => {
                        debug!("DHCP on {iface} ran past {ceiling:?}");
                        dhcp.cancel_transaction(&iface).await;
                        Resumption::Dhcp(Ok(DhcpOutcome::TimedOut))
                    }
                }
            })
        }
        Suspension::UserKey(request) => {
            let prompter = Arc::clone(&env.providers.key_prompter);
            Box::pin(async move { Resumption::Key(prompter.request_key(&request).await) })
        }
    }
}

/// Runs stages until the activation finishes or suspends.
async fn drive(
    dev: &mut Device,
    env: &WorkerEnv,
    status: &watch::Sender<DeviceStatus>,
    mut step: Step,
) -> Option<Pending> {
    loop {
        status.send_replace(dev.status());
        match step {
            Step::Continue => step = activation::run_stage(dev, env).await,
            Step::Suspend(suspension) => return Some(suspend(dev, env, suspension)),
            Step::Done => return None,
        }
    }
}

async fn wait_pending(pending: &mut Option<Pending>) -> Resumption {
    match pending {
        Some(fut) => fut.await,
        None => future::pending().await,
    }
}

async fn wait_scan(next: Option<Instant>) {
    match next {
        Some(at) => sleep_until(at).await,
        None => future::pending().await,
    }
}

fn schedule_scan(dev: &Device, env: &WorkerEnv) -> Option<Instant> {
    let interval = dev.wireless.as_ref()?.scan_interval;
    Some(Instant::now() + env.config.scan_interval(interval))
}

/// Runs a scan pass and picks the time of the next one.
async fn scan_and_reschedule(dev: &mut Device, env: &WorkerEnv) -> (ScanPass, Option<Instant>) {
    let pass = scan::scan(dev, env).await;
    link::update_signal_strength(dev, env).await;
    let next = match pass {
        ScanPass::Unsupported => None,
        ScanPass::Scanned | ScanPass::Skipped => schedule_scan(dev, env),
    };
    (pass, next)
}

async fn run(
    mut dev: Device,
    env: WorkerEnv,
    mut rx: mpsc::Receiver<Command>,
    status: watch::Sender<DeviceStatus>,
) {
    initialize(&mut dev, &env).await;
    status.send_replace(dev.status());

    let mut pending: Option<Pending> = None;
    let mut next_scan = (dev.wireless.is_some() && dev.supports_scan()).then(Instant::now);

    loop {
        let wake = tokio::select! {
            cmd = rx.recv() => Wake::Command(cmd),
            resumed = wait_pending(&mut pending) => Wake::Resumed(resumed),
            () = wait_scan(next_scan) => Wake::ScanDue,
        };

        match wake {
            Wake::Command(None | Some(Command::Shutdown)) => break,
            Wake::Command(Some(cmd)) => {
                handle_command(&mut dev, &env, &status, cmd, &mut pending, &mut next_scan).await;
            }
            Wake::Resumed(resumed) => {
                let step = match resumed {
                    Resumption::Dhcp(result) => activation::resume_dhcp(&mut dev, &env, result).await,
                    Resumption::Key(response) => activation::resume_key(&mut dev, &env, response).await,
                };
                pending = drive(&mut dev, &env, &status, step).await;
            }
            Wake::ScanDue => {
                let (_, next) = scan_and_reschedule(&mut dev, &env).await;
                next_scan = next;
            }
        }
        status.send_replace(dev.status());
    }

    if dev.is_activating() {
        drop(pending.take());
        activation::handle_cancel(&mut dev, &env).await;
        status.send_replace(dev.status());
    }
    info!("Stopped managing device {}", dev.iface);
}

async fn handle_command(
    dev: &mut Device,
    env: &WorkerEnv,
    status: &watch::Sender<DeviceStatus>,
    cmd: Command,
    pending: &mut Option<Pending>,
    next_scan: &mut Option<Instant>,
) {
    match cmd {
        Command::Activate { target, reply } => {
            // The manager's status snapshot can lag behind; a request
            // still in flight here is replaced, never refused.
            if dev.is_activating() {
                drop(pending.take());
                activation::handle_cancel(dev, env).await;
            } else if dev.is_activated() {
                activation::deactivate(dev, env).await;
            }
            let result = activation::begin(dev, env, target).await;
            let started = result.is_ok();
            // The caller may have given up waiting; the activation runs regardless.
            let _ = reply.send(result);
            if started {
                *pending = drive(dev, env, status, Step::Continue).await;
            }
        }
        Command::Cancel => {
            if dev.is_activating() {
                // Dropping the pending future abandons the DHCP or key wait;
                // the collaborator is told to abort by the cancel itself.
                drop(pending.take());
                activation::handle_cancel(dev, env).await;
            }
        }
        Command::Deactivate { reply } => {
            drop(pending.take());
            activation::deactivate(dev, env).await;
            *next_scan = schedule_scan(dev, env).filter(|_| dev.supports_scan());
            let _ = reply.send(());
        }
        Command::Scan { reply } => {
            let (pass, next) = scan_and_reschedule(dev, env).await;
            *next_scan = next;
            let _ = reply.send(pass == ScanPass::Scanned);
        }
        Command::ProbeLink { reply } => {
            let active = link::probe_link_state(dev, env).await;
            link::set_link_active(dev, env, active);
            let _ = reply.send(active);
        }
        Command::BestCandidate { reply } => {
            let _ = reply.send(link::best_ap(dev, env).await);
        }
        Command::SetScanInterval(interval) => {
            if let Some(wireless) = dev.wireless.as_mut() {
                wireless.scan_interval = interval;
                if dev.supports_scan() {
                    *next_scan = schedule_scan(dev, env);
                }
            }
        }
        Command::Shutdown => {}
    }
}

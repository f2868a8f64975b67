//! A Rust library for managing network devices on a Linux host.
//!
//! This crate drives each managed interface through a staged activation
//! (device prepare, device configure, IP configuration, commit) while
//! continuously scanning wireless media and keeping a ranked list of
//! visible access points:
//!
//! - Per-device worker tasks that own all device state
//! - Cancellable activation with auth fallbacks and user key prompts
//! - Wireless-extension scan decoding and AP list aging
//! - Candidate selection from remembered and trusted networks
//!
//! # Example
//!
//! ```no_run
//! use nmd::{ActivationTarget, DeviceDescriptor, DeviceManager, EncKey, Providers, WirelessHardware};
//! use std::sync::Arc;
//!
//! # async fn example(providers: Providers, radio: Arc<dyn WirelessHardware>) -> nmd::Result<()> {
//! let manager = DeviceManager::new(providers);
//! manager.add_device(DeviceDescriptor::wireless("wlan0", radio)).await?;
//!
//! // Join a network by name
//! manager
//!     .activate(
//!         "wlan0",
//!         ActivationTarget::Essid {
//!             essid: "office".into(),
//!             key: Some(EncKey::ascii("secret")),
//!         },
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Collaborators
//!
//! Hardware access, DHCP, static configuration, link-local addressing,
//! key prompting and address installation are all supplied by the caller
//! through the traits in [`backend`]. The crate itself never touches a
//! socket or spawns a process.
//!
//! # Error Handling
//!
//! Registry operations return `Result<T, DeviceError>`. Failures inside an
//! activation never surface as errors: they end the activation in the
//! `Failed` stage, which is reported through [`DeviceEvent::StageChanged`].
//!
//! # Logging
//!
//! This crate uses the [`log`](https://docs.rs/log) facade for logging. To see
//! log output, add a logging implementation like `env_logger`. For example:

//! ```no_run,ignore
//! env_logger::init();
//! // ...
//! ```

// Internal implementation modules
mod core;
mod monitoring;
mod types;
mod util;

// Public API modules
pub mod api;
pub mod backend;

// Re-exported public API
pub use api::config::TimeoutConfig;
pub use api::device_manager::DeviceManager;
pub use api::models::{
    AccessPoint, ActivationStage, ActivationTarget, AuthMethod, DeviceCapabilities, DeviceError,
    DeviceEvent, DeviceKind, DeviceStatus, DhcpOutcome, EncKey, EncKeyType, HardwareError,
    Ipv4Config, KeyRequest, KeyResponse, MacAddr, NetworkMode, ProviderError, Quality,
    QualityCalibration, QualityFlags, RememberedNetwork, ScanError, ScanInterval,
};
pub use backend::{
    AutoIpGenerator, DeviceBackend, DhcpProvider, IpConfigInstaller, KeyPrompter, LinkHardware,
    Providers, RadioRange, StaticConfigProvider, WirelessHardware,
};
pub use crate::core::ap_list::{ApList, Incumbent, MergeOutcome};
pub use crate::core::device::DeviceDescriptor;
pub use crate::core::history::NetworkHistory;

/// A specialized `Result` type for device operations.
pub type Result<T> = std::result::Result<T, DeviceError>;

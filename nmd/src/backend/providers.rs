//! External providers consulted during activation.

use async_trait::async_trait;
use std::sync::Arc;

use crate::api::models::{
    DhcpOutcome, HardwareError, Ipv4Config, KeyRequest, KeyResponse, ProviderError,
};

/// Runs DHCP transactions for an interface.
#[async_trait]
pub trait DhcpProvider: Send + Sync {
    /// Starts a transaction and resolves once it binds or times out.
    ///
    /// An `Err` means the transaction could not be started at all.
    async fn begin_transaction(&self, iface: &str) -> Result<DhcpOutcome, ProviderError>;

    async fn cancel_transaction(&self, iface: &str);
}

/// Supplies statically configured addresses.
#[async_trait]
pub trait StaticConfigProvider: Send + Sync {
    async fn get_config(&self, iface: &str) -> Option<Ipv4Config>;
}

/// Produces link-local configurations for ad-hoc networks and DHCP fallback.
#[async_trait]
pub trait AutoIpGenerator: Send + Sync {
    async fn generate(&self, iface: &str) -> Option<Ipv4Config>;
}

/// Asks the user for an encryption key.
#[async_trait]
pub trait KeyPrompter: Send + Sync {
    /// Resolves with the user's key, or [`KeyResponse::Cancelled`].
    async fn request_key(&self, request: &KeyRequest) -> KeyResponse;

    async fn cancel_request(&self, request: &KeyRequest);
}

/// Installs IP configuration and controls interface state.
#[async_trait]
pub trait IpConfigInstaller: Send + Sync {
    /// Installs addresses and routes.
    async fn commit(&self, iface: &str, config: &Ipv4Config) -> Result<(), ProviderError>;

    /// Removes all addresses and routes.
    async fn flush(&self, iface: &str) -> Result<(), ProviderError>;

    /// Whether the interface is administratively up.
    async fn query_link(&self, iface: &str) -> Result<bool, HardwareError>;

    async fn set_interface_up(&self, iface: &str, up: bool) -> Result<(), HardwareError>;
}

/// The set of providers every device worker shares.
#[derive(Clone)]
pub struct Providers {
    pub dhcp: Arc<dyn DhcpProvider>,
    pub static_config: Arc<dyn StaticConfigProvider>,
    pub autoip: Arc<dyn AutoIpGenerator>,
    pub key_prompter: Arc<dyn KeyPrompter>,
    pub installer: Arc<dyn IpConfigInstaller>,
}

impl Providers {
    pub fn new(
        dhcp: Arc<dyn DhcpProvider>,
        static_config: Arc<dyn StaticConfigProvider>,
        autoip: Arc<dyn AutoIpGenerator>,
        key_prompter: Arc<dyn KeyPrompter>,
        installer: Arc<dyn IpConfigInstaller>,
    ) -> Self {
        Self {
            dhcp,
            static_config,
            autoip,
            key_prompter,
            installer,
        }
    }
}

impl std::fmt::Debug for Providers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Providers").finish_non_exhaustive()
    }
}

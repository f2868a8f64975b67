//! Remembered networks and the per-session blacklist.
//!
//! History is shared by every device worker and by the caller that owns
//! the [`DeviceManager`](crate::DeviceManager). Locks are held only for
//! the duration of a lookup or update, never across an `.await`.

use log::debug;
use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock};

use crate::api::models::{AccessPoint, AuthMethod, MacAddr, RememberedNetwork};
use crate::util::utils::epoch_secs;

#[derive(Debug, Default)]
pub struct NetworkHistory {
    remembered: RwLock<HashMap<String, RememberedNetwork>>,
    blacklist: RwLock<HashSet<String>>,
}

impl NetworkHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a remembered network.
    pub fn remember(&self, network: RememberedNetwork) {
        let mut map = self.remembered.write().unwrap_or_else(PoisonError::into_inner);
        map.insert(network.essid.clone(), network);
    }

    pub fn forget(&self, essid: &str) -> Option<RememberedNetwork> {
        let mut map = self.remembered.write().unwrap_or_else(PoisonError::into_inner);
        map.remove(essid)
    }

    pub fn get(&self, essid: &str) -> Option<RememberedNetwork> {
        let map = self.remembered.read().unwrap_or_else(PoisonError::into_inner);
        map.get(essid).cloned()
    }

    pub fn remembered(&self) -> Vec<RememberedNetwork> {
        let map = self.remembered.read().unwrap_or_else(PoisonError::into_inner);
        map.values().cloned().collect()
    }

    /// Finds the essid a hidden AP is known by, from addresses the user connected to.
    pub fn essid_for_address(&self, addr: &MacAddr) -> Option<String> {
        let map = self.remembered.read().unwrap_or_else(PoisonError::into_inner);
        map.values()
            .find(|n| n.user_addresses.contains(addr))
            .map(|n| n.essid.clone())
    }

    /// Records the authentication method that worked (or should be tried) for `essid`.
    pub fn set_auth_method(&self, essid: &str, auth: AuthMethod) {
        let mut map = self.remembered.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(network) = map.get_mut(essid) {
            network.auth_method = auth;
        }
    }

    /// Stamps a remembered network as just connected.
    pub fn mark_used(&self, essid: &str) {
        let mut map = self.remembered.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(network) = map.get_mut(essid) {
            network.timestamp = epoch_secs();
        }
    }

    /// Copies the remembered key, auth method and timestamp onto `ap`, and
    /// flags it invalid while its essid is blacklisted.
    ///
    /// Returns `false` if the network is not remembered.
    pub fn apply_to(&self, ap: &mut AccessPoint) -> bool {
        let Some(essid) = ap.essid.as_deref() else {
            return false;
        };
        ap.invalid = self.is_blacklisted(essid);
        let map = self.remembered.read().unwrap_or_else(PoisonError::into_inner);
        let Some(network) = map.get(essid) else {
            return false;
        };
        if let Some(key) = &network.key {
            ap.enc_key = Some(key.clone());
            ap.auth_method = network.auth_method;
        }
        ap.timestamp = Some(network.timestamp);
        true
    }

    pub fn blacklist(&self, essid: &str) {
        debug!("Blacklisting network {essid} for this session");
        let mut set = self.blacklist.write().unwrap_or_else(PoisonError::into_inner);
        set.insert(essid.to_string());
    }

    pub fn unblacklist(&self, essid: &str) {
        let mut set = self.blacklist.write().unwrap_or_else(PoisonError::into_inner);
        set.remove(essid);
    }

    pub fn is_blacklisted(&self, essid: &str) -> bool {
        let set = self.blacklist.read().unwrap_or_else(PoisonError::into_inner);
        set.contains(essid)
    }
}

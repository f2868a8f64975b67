//! Per-device list of visible access points.
//!
//! The list is the sole owner of the access points a wireless device has
//! seen. Scans feed it through [`ApList::upsert`], aging removes entries
//! that stopped showing up, and candidate selection picks the network the
//! device should be on.

use log::debug;
use std::time::{Duration, Instant};

use crate::api::models::{AccessPoint, AuthMethod, MacAddr, NetworkMode};
use crate::core::history::NetworkHistory;
use crate::types::constants::timeouts;

/// What [`ApList::upsert`] did with a sighting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The AP was not listed before.
    Added,
    /// An existing entry now reports a different strength.
    StrengthChanged,
    /// An existing entry changed its essid; carries the previous one.
    Renamed(Option<String>),
    /// An existing entry was refreshed with nothing notable changing.
    Refreshed,
}

/// The AP the device is currently on, as seen by candidate selection.
#[derive(Debug, Clone, Copy)]
pub struct Incumbent<'a> {
    pub ap: &'a AccessPoint,
    /// User-created, user-requested, or confirmed linked by the hardware.
    pub sticky: bool,
}

#[derive(Debug, Clone)]
pub struct ApList {
    aps: Vec<AccessPoint>,
    max_age: Duration,
}

impl Default for ApList {
    fn default() -> Self {
        Self::with_max_age(timeouts::ap_max_age())
    }
}

impl ApList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_age(max_age: Duration) -> Self {
        Self {
            aps: Vec::new(),
            max_age,
        }
    }

    pub fn len(&self) -> usize {
        self.aps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aps.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AccessPoint> {
        self.aps.iter()
    }

    pub fn to_vec(&self) -> Vec<AccessPoint> {
        self.aps.clone()
    }

    pub fn by_essid(&self, essid: &str) -> Option<&AccessPoint> {
        self.aps.iter().find(|ap| ap.essid.as_deref() == Some(essid))
    }

    pub fn by_address(&self, addr: &MacAddr) -> Option<&AccessPoint> {
        self.aps.iter().find(|ap| ap.valid_address() == Some(*addr))
    }

    /// Entries sorted strongest first.
    pub fn sorted_by_strength(&self) -> Vec<&AccessPoint> {
        let mut sorted: Vec<&AccessPoint> = self.aps.iter().collect();
        sorted.sort_by(|a, b| b.strength.cmp(&a.strength));
        sorted
    }

    fn position_for(&self, candidate: &AccessPoint) -> Option<usize> {
        if let Some(addr) = candidate.valid_address()
            && let Some(i) = self.aps.iter().position(|ap| ap.valid_address() == Some(addr))
        {
            return Some(i);
        }
        // Falls back to the essid when either side lacks an address.
        self.aps.iter().position(|ap| ap.is_same_network(candidate))
    }

    /// Inserts `candidate` or merges it into the entry it matches.
    ///
    /// Entries match by hardware address first, then by essid where one
    /// side has no usable address.
    pub fn upsert(&mut self, candidate: AccessPoint) -> MergeOutcome {
        let Some(i) = self.position_for(&candidate) else {
            debug!("New access point {candidate}");
            self.aps.push(candidate);
            return MergeOutcome::Added;
        };

        let candidate_address = candidate.valid_address();
        let existing = &mut self.aps[i];
        let strength_changed = existing.strength != candidate.strength;
        existing.strength = candidate.strength;

        if existing.encrypted != candidate.encrypted {
            existing.auth_method = candidate.auth_method;
        } else if candidate.encrypted && existing.auth_method == AuthMethod::None {
            existing.auth_method = AuthMethod::OpenSystem;
        }
        existing.encrypted = candidate.encrypted;
        existing.mode = candidate.mode;
        if candidate.frequency > 0.0 {
            existing.frequency = candidate.frequency;
        }
        if candidate.wpa_ie.is_some() {
            existing.wpa_ie = candidate.wpa_ie;
        }
        if candidate.rsn_ie.is_some() {
            existing.rsn_ie = candidate.rsn_ie;
        }
        if candidate.last_seen.is_some() {
            existing.last_seen = candidate.last_seen;
        }
        if existing.valid_address().is_none() && candidate_address.is_some() {
            existing.address = candidate.address;
        }
        existing.artificial = false;

        match candidate.essid {
            Some(new) if existing.essid.as_deref() != Some(new.as_str()) => {
                let previous = existing.essid.replace(new);
                MergeOutcome::Renamed(previous)
            }
            _ if strength_changed => MergeOutcome::StrengthChanged,
            _ => MergeOutcome::Refreshed,
        }
    }

    /// Removes entries unseen for longer than the max age.
    ///
    /// User-created entries and the entry named `keep_essid` (the network
    /// the device is associated with) are never removed. Entries that were
    /// never seen in a scan count as stale.
    pub fn evict_stale(&mut self, now: Instant, keep_essid: Option<&str>) -> Vec<AccessPoint> {
        let max_age = self.max_age;
        let (kept, evicted): (Vec<_>, Vec<_>) = std::mem::take(&mut self.aps)
            .into_iter()
            .partition(|ap| {
                if ap.user_created {
                    return true;
                }
                if keep_essid.is_some() && ap.essid.as_deref() == keep_essid {
                    return true;
                }
                ap.last_seen
                    .is_some_and(|seen| now.saturating_duration_since(seen) <= max_age)
            });
        self.aps = kept;
        for ap in &evicted {
            debug!("Access point {ap} aged out");
        }
        evicted
    }

    pub fn remove_by_essid(&mut self, essid: &str) -> Option<AccessPoint> {
        let i = self
            .aps
            .iter()
            .position(|ap| ap.essid.as_deref() == Some(essid))?;
        Some(self.aps.remove(i))
    }

    /// Copies remembered keys, auth methods and timestamps onto listed
    /// entries, and flags blacklisted ones invalid.
    pub fn apply_history(&mut self, history: &NetworkHistory) {
        for ap in &mut self.aps {
            history.apply_to(ap);
        }
    }

    /// Picks the AP the device should associate with.
    ///
    /// Entries flagged invalid are never picked; refresh the flags with
    /// [`ApList::apply_history`] first.
    ///
    /// A sticky incumbent that is still listed and not invalid wins.
    /// Otherwise remembered networks are ranked by their last-used
    /// timestamp, with any trusted network beating every untrusted one.
    /// Manufacturer-default essids only count if the user connected to
    /// that exact hardware address before. When nothing listed is
    /// remembered, the strongest open infrastructure network is used.
    pub fn best_candidate(
        &self,
        incumbent: Option<Incumbent<'_>>,
        history: &NetworkHistory,
    ) -> Option<AccessPoint> {
        if let Some(inc) = incumbent.filter(|inc| inc.sticky)
            && let Some(essid) = inc.ap.essid.as_deref()
            && self.by_essid(essid).is_some_and(|listed| !listed.invalid)
        {
            return Some(inc.ap.clone());
        }

        let mut best_trusted: Option<(u64, &AccessPoint)> = None;
        let mut best_untrusted: Option<(u64, &AccessPoint)> = None;

        for ap in self.aps.iter().filter(|ap| !ap.invalid) {
            let Some(essid) = ap.essid.as_deref() else {
                continue;
            };
            let Some(remembered) = history.get(essid) else {
                continue;
            };
            if ap.has_manufacturer_default_essid()
                && !ap
                    .valid_address()
                    .is_some_and(|addr| remembered.user_addresses.contains(&addr))
            {
                continue;
            }

            let slot = if remembered.trusted {
                &mut best_trusted
            } else {
                &mut best_untrusted
            };
            if slot.is_none_or(|(ts, _)| remembered.timestamp > ts) {
                *slot = Some((remembered.timestamp, ap));
            }
        }

        if let Some((_, ap)) = best_trusted.or(best_untrusted) {
            let mut chosen = ap.clone();
            history.apply_to(&mut chosen);
            return Some(chosen);
        }

        self.aps
            .iter()
            .filter(|ap| !ap.invalid && ap.essid.is_some())
            .filter(|ap| !ap.encrypted && ap.mode == NetworkMode::Infrastructure)
            .filter(|ap| !ap.has_manufacturer_default_essid())
            .max_by_key(|ap| ap.strength)
            .cloned()
    }
}

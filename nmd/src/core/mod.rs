//! Core internal logic for device management.
//!
//! This module contains the per-device state, the activation state
//! machine, scanning and AP list management, link probing, and the
//! worker task that drives them.

pub(crate) mod activation;
pub(crate) mod ap_list;
pub(crate) mod device;
pub(crate) mod history;
pub(crate) mod link;
pub(crate) mod scan;
pub(crate) mod scan_decode;
pub(crate) mod state_wait;
pub(crate) mod worker;

//! Public API module.
//!
//! This module contains the user-facing API for the `nmd` crate: value
//! types and errors, timing configuration, and the device registry.

pub mod config;
pub mod device_manager;
pub mod models;

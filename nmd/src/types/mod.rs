//! Type definitions and constants.
//!
//! This module contains wireless-extension constants, limits and timeouts.

pub(crate) mod constants;

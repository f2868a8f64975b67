//! Conversion helpers shared by the scan decoder and the link prober.

pub(crate) mod utils;

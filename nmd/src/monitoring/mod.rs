//! Device event delivery.
//!
//! Workers report link changes, activation stage changes and access point
//! churn here; the bus-facing layer subscribes through
//! [`DeviceManager::subscribe`](crate::DeviceManager::subscribe).

pub(crate) mod events;

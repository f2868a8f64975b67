//! Collaborator seams.
//!
//! The device workers talk to hardware and to the rest of the daemon
//! only through these traits. Production code wires in ioctl/netlink and
//! DHCP client implementations; tests wire in in-memory fakes.

mod hardware;
mod providers;

pub use hardware::{DeviceBackend, LinkHardware, RadioRange, WirelessHardware};
pub use providers::{
    AutoIpGenerator, DhcpProvider, IpConfigInstaller, KeyPrompter, Providers,
    StaticConfigProvider,
};

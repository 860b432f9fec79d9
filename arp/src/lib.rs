//! ARP address conflict detection (RFC 5227) for DHCP and IPv4 link-local
//! clients.
//!
//! Before an address is used it is probed: ARP requests with a zero sender
//! address ask whether anyone already holds it. Once claimed it is announced
//! with gratuitous requests, and from then on inbound ARP is watched for other
//! hosts using or probing for it.
//!
//! The engine is single threaded and does no I/O of its own. A [`Capture`]
//! implementation moves frames and an [`EventLoop`] implementation schedules
//! timers; on Linux [`PacketSocket`] and [`TimerQueue`] provide both.

pub mod capture;
pub mod config;
pub mod constants;
pub mod eloop;
mod engine;
mod error;
pub mod iface;
pub mod packet;
mod state;

pub use self::capture::{ArpFilter, Capture, CaptureHandle, ReadOutcome};
#[cfg(target_os = "linux")]
pub use self::capture::PacketSocket;
pub use self::config::{AcdConfig, AcdMode};
pub use self::eloop::{ArpTimer, EventLoop, TimerQueue};
pub use self::engine::{AcdEvent, AddrFlags, AddressChange, Arp};
pub use self::error::ArpError;
#[cfg(target_os = "linux")]
pub use self::iface::lookup_interface;
pub use self::iface::{HwAddr, Interface};
pub use self::packet::ArpMessage;
pub use self::state::{ArpContext, Hooks, ProbeId, ProbeState};

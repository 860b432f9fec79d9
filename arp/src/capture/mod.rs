//! Link-layer capture seam
//!
//! The engine never touches sockets directly. It opens, reads from, writes to
//! and closes a capture handle through [`Capture`], one handle per interface.

use std::fmt;
use std::io;

use crate::iface::Interface;

mod filter;
#[cfg(target_os = "linux")]
mod linux;

pub use self::filter::{ArpFilter, BpfInsn, MAX_FILTER_ADDRS};
#[cfg(target_os = "linux")]
pub use self::linux::PacketSocket;

/// An open capture handle (a file descriptor on Unix)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CaptureHandle(pub i32);

impl fmt::Display for CaptureHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fd {}", self.0)
    }
}

/// Result of one read from a capture handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOutcome {
    /// Bytes copied into the caller's buffer (may be zero)
    pub len: usize,
    /// Nothing more is pending on the handle right now
    pub end_of_batch: bool,
}

/// Raw packet capture and transmit facility
pub trait Capture {
    /// Open a handle on `ifp` that only passes frames accepted by `filter`.
    fn open(&mut self, ifp: &Interface, filter: &ArpFilter) -> io::Result<CaptureHandle>;

    /// Replace the filter on an open handle.
    fn set_filter(&mut self, handle: CaptureHandle, filter: &ArpFilter) -> io::Result<()>;

    fn close(&mut self, handle: CaptureHandle);

    /// Send `frame` to the link-layer broadcast address.
    fn send(
        &mut self,
        ifp: &Interface,
        handle: CaptureHandle,
        ethertype: u16,
        frame: &[u8],
    ) -> io::Result<usize>;

    /// Read the next pending frame into `buf`.
    fn read(
        &mut self,
        ifp: &Interface,
        handle: CaptureHandle,
        buf: &mut [u8],
    ) -> io::Result<ReadOutcome>;

    /// Whether the attached filter already rejects frames that are not IPv4
    /// ARP requests or replies of the interface's family. When this returns
    /// `false` the engine checks those fields itself.
    fn validates_fields(&self) -> bool {
        false
    }
}

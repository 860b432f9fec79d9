//! Error type shared by the codec, the capture layer and the engine

use std::collections::TryReserveError;

use crate::state::ProbeId;

/// Errors that can occur while running address conflict detection
#[derive(thiserror::Error, Debug)]
pub enum ArpError {
    /// The frame does not fit in an `ARP_LEN` buffer. This is a configuration
    /// problem with the interface and retrying will not help.
    #[error("ARP frame needs {needed} bytes but the buffer holds {capacity}")]
    Capacity { needed: usize, capacity: usize },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{ifname}: failed to open ARP capture: {source}")]
    Open {
        ifname: String,
        #[source]
        source: std::io::Error,
    },
    #[error("unknown interface {0}")]
    UnknownInterface(String),
    #[error("no ARP state {0}")]
    UnknownProbe(ProbeId),
    #[error("failed to allocate ARP state: {0}")]
    Alloc(#[from] TryReserveError),
    #[error("interface '{0}' not found")]
    InterfaceNotFound(String),
    #[cfg(target_os = "linux")]
    #[error("netlink error: {0}")]
    Netlink(#[from] rtnetlink::Error),
}

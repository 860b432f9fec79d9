//! Per-address probe state and per-interface ARP context

use std::fmt;
use std::net::Ipv4Addr;

use crate::capture::CaptureHandle;
use crate::config::AcdMode;

/// Identifies one probe state for as long as it lives. Ids are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProbeId(pub(crate) u64);

impl fmt::Display for ProbeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Which callbacks the owner of a probe state wants delivered.
///
/// Events for hooks that are not set are skipped silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Hooks {
    pub conflict: bool,
    pub probed: bool,
    pub announced: bool,
    pub destroyed: bool,
}

impl Hooks {
    pub fn none() -> Self {
        Hooks::default()
    }

    pub fn all() -> Self {
        Hooks {
            conflict: true,
            probed: true,
            announced: true,
            destroyed: true,
        }
    }

    pub fn on_conflict(mut self) -> Self {
        self.conflict = true;
        self
    }

    pub fn on_probed(mut self) -> Self {
        self.probed = true;
        self
    }

    pub fn on_announced(mut self) -> Self {
        self.announced = true;
        self
    }

    pub fn on_destroyed(mut self) -> Self {
        self.destroyed = true;
        self
    }
}

/// One address under conflict detection on one interface
#[derive(Debug, Clone)]
pub struct ProbeState {
    id: ProbeId,
    ifname: String,
    addr: Ipv4Addr,
    pub(crate) failed: Option<Ipv4Addr>,
    pub(crate) probes: u32,
    pub(crate) claims: u32,
    pub(crate) hooks: Hooks,
}

impl ProbeState {
    pub(crate) fn new(id: ProbeId, ifname: &str, addr: Ipv4Addr) -> Self {
        ProbeState {
            id,
            ifname: ifname.to_string(),
            addr,
            failed: None,
            probes: 0,
            claims: 0,
            hooks: Hooks::none(),
        }
    }

    pub fn id(&self) -> ProbeId {
        self.id
    }

    pub fn ifname(&self) -> &str {
        &self.ifname
    }

    /// The address being probed, claimed or defended
    pub fn addr(&self) -> Ipv4Addr {
        self.addr
    }

    /// The address involved in the most recent conflict, if any
    pub fn failed(&self) -> Option<Ipv4Addr> {
        self.failed
    }

    /// Probes sent in the current probe sequence
    pub fn probes(&self) -> u32 {
        self.probes
    }

    /// Announcements made in the current announce sequence
    pub fn claims(&self) -> u32 {
        self.claims
    }

    pub fn hooks(&self) -> Hooks {
        self.hooks
    }

    pub fn set_hooks(&mut self, hooks: Hooks) {
        self.hooks = hooks;
    }
}

/// ARP state for one interface: its capture handle and its probe states in
/// creation order.
#[derive(Debug)]
pub struct ArpContext {
    pub(crate) handle: Option<CaptureHandle>,
    pub(crate) mode: AcdMode,
    pub(crate) states: Vec<ProbeState>,
}

impl ArpContext {
    pub(crate) fn new(mode: AcdMode) -> Self {
        ArpContext {
            handle: None,
            mode,
            states: Vec::new(),
        }
    }

    /// The open capture handle, if any
    pub fn handle(&self) -> Option<CaptureHandle> {
        self.handle
    }

    pub fn mode(&self) -> AcdMode {
        self.mode
    }

    pub fn states(&self) -> &[ProbeState] {
        &self.states
    }

    pub(crate) fn position(&self, id: ProbeId) -> Option<usize> {
        self.states.iter().position(|s| s.id == id)
    }

    pub(crate) fn addrs(&self) -> Vec<Ipv4Addr> {
        self.states.iter().map(|s| s.addr).collect()
    }
}

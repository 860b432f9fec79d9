//! RFC 5227 address conflict detection engine
//!
//! [`Arp`] owns the interface table, one capture handle per interface that
//! has probe states, and every probe state. It runs entirely inside event
//! loop callbacks: the loop hands back due timers through
//! [`Arp::handle_timer`] and read readiness through [`Arp::handle_readable`].
//! Everything the owner of a probe state needs to hear about is queued as an
//! [`AcdEvent`] and drained with [`Arp::poll_event`].

use std::collections::VecDeque;
use std::io;
use std::net::Ipv4Addr;
use std::time::Duration;

use log::{debug, error, info, trace, warn};
use rand::Rng;

use crate::capture::{ArpFilter, Capture, CaptureHandle};
use crate::config::{AcdConfig, AcdMode};
use crate::constants::{ARP_LEN, ETHERTYPE_ARP};
use crate::eloop::{ArpTimer, EventLoop};
use crate::error::ArpError;
use crate::iface::Interface;
use crate::packet::{build_request, is_from_self, parse, ArpMessage};
use crate::state::{ArpContext, ProbeId, ProbeState};

/// Callbacks for the owner of a probe state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcdEvent {
    /// Another host uses or probes for the address. `message` is the frame
    /// that showed it, or `None` when the kernel reported the conflict.
    Conflict {
        id: ProbeId,
        message: Option<ArpMessage>,
    },
    /// Probing finished and nobody objected.
    Probed(ProbeId),
    /// The last announcement went out.
    Announced(ProbeId),
    /// The probe state was freed.
    Destroyed { id: ProbeId, addr: Ipv4Addr },
}

/// Kind of kernel address notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressChange {
    Added,
    Deleted,
}

/// Duplicate address detection flags the kernel reports for an address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AddrFlags {
    /// The kernel found another host using the address
    pub duplicated: bool,
    /// The kernel has not finished checking the address
    pub tentative: bool,
}

/// Address conflict detection over ARP for a set of interfaces
pub struct Arp<C, L> {
    config: AcdConfig,
    capture: C,
    eloop: L,
    interfaces: Vec<Interface>,
    events: VecDeque<AcdEvent>,
    next_id: u64,
}

impl<C: Capture, L: EventLoop> Arp<C, L> {
    pub fn new(config: AcdConfig, capture: C, eloop: L) -> Self {
        Arp {
            config,
            capture,
            eloop,
            interfaces: Vec::new(),
            events: VecDeque::new(),
            next_id: 0,
        }
    }

    pub fn config(&self) -> &AcdConfig {
        &self.config
    }

    pub fn capture(&self) -> &C {
        &self.capture
    }

    pub fn capture_mut(&mut self) -> &mut C {
        &mut self.capture
    }

    pub fn event_loop(&self) -> &L {
        &self.eloop
    }

    pub fn event_loop_mut(&mut self) -> &mut L {
        &mut self.eloop
    }

    /// Next callback for probe state owners, in the order they happened.
    pub fn poll_event(&mut self) -> Option<AcdEvent> {
        self.events.pop_front()
    }

    /// Add an interface, replacing (and tearing down) any with the same name.
    pub fn add_interface(&mut self, ifp: Interface) {
        if let Some(idx) = self.iface_index(ifp.name()) {
            self.drop_interface(ifp.name());
            self.interfaces[idx] = ifp;
        } else {
            debug!("{}: added interface", ifp.name());
            self.interfaces.push(ifp);
        }
    }

    /// Drop all ARP state on an interface and forget it.
    pub fn remove_interface(&mut self, ifname: &str) -> Option<Interface> {
        let idx = self.iface_index(ifname)?;
        self.drop_interface(ifname);
        Some(self.interfaces.remove(idx))
    }

    pub fn interface(&self, ifname: &str) -> Option<&Interface> {
        self.interfaces.iter().find(|ifp| ifp.name() == ifname)
    }

    pub fn interfaces(&self) -> impl Iterator<Item = &Interface> {
        self.interfaces.iter()
    }

    fn iface_index(&self, ifname: &str) -> Option<usize> {
        self.interfaces.iter().position(|ifp| ifp.name() == ifname)
    }

    fn require_iface(&self, ifname: &str) -> Result<usize, ArpError> {
        self.iface_index(ifname)
            .ok_or_else(|| ArpError::UnknownInterface(ifname.to_string()))
    }

    /// Interface index and position within its context of a probe state
    fn locate(&self, id: ProbeId) -> Option<(usize, usize)> {
        self.interfaces.iter().enumerate().find_map(|(idx, ifp)| {
            ifp.arp
                .as_ref()
                .and_then(|ctx| ctx.position(id))
                .map(|pos| (idx, pos))
        })
    }

    pub fn state(&self, id: ProbeId) -> Option<&ProbeState> {
        let (idx, pos) = self.locate(id)?;
        self.interfaces[idx].arp.as_ref().map(|ctx| &ctx.states[pos])
    }

    pub fn state_mut(&mut self, id: ProbeId) -> Option<&mut ProbeState> {
        let (idx, pos) = self.locate(id)?;
        self.interfaces[idx]
            .arp
            .as_mut()
            .map(|ctx| &mut ctx.states[pos])
    }

    /// Open the interface's capture handle if it is not open already.
    ///
    /// The handle is registered with the event loop for readability.
    pub fn open(&mut self, ifname: &str) -> Result<CaptureHandle, ArpError> {
        let idx = self.require_iface(ifname)?;
        if let Some(handle) = self.interfaces[idx].arp.as_ref().and_then(|ctx| ctx.handle) {
            return Ok(handle);
        }

        let ifp = &self.interfaces[idx];
        let filter = filter_for(ifp);
        match self.capture.open(ifp, &filter) {
            Ok(handle) => {
                self.eloop.add_reader(handle, ifname);
                let mode = self.config.mode;
                self.interfaces[idx]
                    .arp
                    .get_or_insert_with(|| ArpContext::new(mode))
                    .handle = Some(handle);
                debug!("{}: ARP capture open on {}", ifname, handle);
                Ok(handle)
            }
            Err(source) => {
                error!("{}: failed to open ARP capture: {}", ifname, source);
                Err(ArpError::Open {
                    ifname: ifname.to_string(),
                    source,
                })
            }
        }
    }

    /// Stop watching and release the interface's capture handle.
    pub fn close(&mut self, ifname: &str) {
        if let Some(idx) = self.iface_index(ifname) {
            self.close_index(idx);
        }
    }

    /// Release the capture handle. A context left with no probe states goes
    /// with it.
    fn close_index(&mut self, idx: usize) {
        let ifp = &mut self.interfaces[idx];
        if let Some(handle) = ifp.arp.as_mut().and_then(|ctx| ctx.handle.take()) {
            self.eloop.remove_reader(handle);
            self.capture.close(handle);
            debug!("{}: ARP capture closed", ifp.name());
        }
        if ifp.arp.as_ref().map_or(false, |ctx| ctx.states.is_empty()) {
            ifp.arp = None;
        }
    }

    fn refresh_filter(&mut self, idx: usize) {
        let ifp = &self.interfaces[idx];
        if let Some(handle) = ifp.arp.as_ref().and_then(|ctx| ctx.handle) {
            if let Err(e) = self.capture.set_filter(handle, &filter_for(ifp)) {
                warn!("{}: failed to update ARP filter: {}", ifp.name(), e);
            }
        }
    }

    /// Broadcast an ARP request from `ifname` for `tip` on behalf of `sip`.
    pub fn request(&mut self, ifname: &str, sip: Ipv4Addr, tip: Ipv4Addr) -> Result<usize, ArpError> {
        let idx = self.require_iface(ifname)?;
        self.send_request(idx, sip, tip)
    }

    fn send_request(&mut self, idx: usize, sip: Ipv4Addr, tip: Ipv4Addr) -> Result<usize, ArpError> {
        let ifp = &self.interfaces[idx];
        let frame = build_request(ifp, sip, tip)?;
        let handle = ifp
            .arp
            .as_ref()
            .and_then(|ctx| ctx.handle)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "ARP capture is not open"))?;
        Ok(self.capture.send(ifp, handle, ETHERTYPE_ARP, frame.as_bytes())?)
    }

    pub fn find(&self, ifname: &str, addr: Ipv4Addr) -> Option<ProbeId> {
        self.interface(ifname)?
            .arp
            .as_ref()?
            .states
            .iter()
            .find(|s| s.addr() == addr)
            .map(|s| s.id())
    }

    /// Start tracking `addr` on `ifname`.
    ///
    /// Returns the existing probe state if the address is already tracked.
    pub fn new_state(&mut self, ifname: &str, addr: Ipv4Addr) -> Result<ProbeId, ArpError> {
        let idx = self.require_iface(ifname)?;
        if let Some(id) = self.find(ifname, addr) {
            return Ok(id);
        }

        self.next_id += 1;
        let id = ProbeId(self.next_id);
        let mode = self.config.mode;
        let ifp = &mut self.interfaces[idx];
        let created = ifp.arp.is_none();
        let ctx = ifp.arp.get_or_insert_with(|| ArpContext::new(mode));
        if let Err(e) = ctx.states.try_reserve(1) {
            error!("{}: failed to allocate ARP state: {}", ifname, e);
            if created {
                ifp.arp = None;
            }
            return Err(e.into());
        }
        ctx.states.push(ProbeState::new(id, ifname, addr));
        debug!("{}: tracking {} as ARP state {}", ifname, addr, id);

        self.refresh_filter(idx);
        Ok(id)
    }

    /// Stop any pending probe or announcement without freeing the state.
    pub fn cancel(&mut self, id: ProbeId) {
        self.eloop.cancel_timeouts(id);
    }

    /// Free a probe state. Freeing the last one on an interface releases the
    /// interface's capture handle and context.
    pub fn free(&mut self, id: ProbeId) {
        let Some((idx, pos)) = self.locate(id) else {
            return;
        };
        self.eloop.cancel_timeouts(id);

        let ifp = &mut self.interfaces[idx];
        let Some(ctx) = ifp.arp.as_mut() else {
            return;
        };
        let state = ctx.states.remove(pos);
        let empty = ctx.states.is_empty();
        if state.hooks.destroyed {
            self.events.push_back(AcdEvent::Destroyed {
                id,
                addr: state.addr(),
            });
        }

        if empty {
            self.close_index(idx);
            self.interfaces[idx].arp = None;
        } else {
            self.refresh_filter(idx);
        }
    }

    /// Free every probe state on the same interface as `id`, except `id`.
    pub fn free_but(&mut self, id: ProbeId) {
        let Some((idx, _)) = self.locate(id) else {
            return;
        };
        for other in self.state_ids(idx) {
            if other != id {
                self.free(other);
            }
        }
    }

    /// Free every probe state on `ifname` and close its context, even if it
    /// had no probe states.
    pub fn drop_interface(&mut self, ifname: &str) {
        let Some(idx) = self.iface_index(ifname) else {
            return;
        };
        for id in self.state_ids(idx) {
            self.free(id);
        }
        self.close_index(idx);
        self.interfaces[idx].arp = None;
    }

    fn state_ids(&self, idx: usize) -> Vec<ProbeId> {
        self.interfaces[idx]
            .arp
            .as_ref()
            .map(|ctx| ctx.states.iter().map(|s| s.id()).collect())
            .unwrap_or_default()
    }

    /// Begin probing for the state's address.
    ///
    /// Sends `probe_num` probes separated by random delays, then reports
    /// [`AcdEvent::Probed`] after `announce_wait` of silence. If the capture
    /// cannot be opened nothing is scheduled.
    pub fn probe(&mut self, id: ProbeId) -> Result<(), ArpError> {
        let (idx, _) = self.locate(id).ok_or(ArpError::UnknownProbe(id))?;
        let ifname = self.interfaces[idx].name().to_string();
        self.open(&ifname)?;
        self.refresh_filter(idx);

        self.eloop.cancel_timeouts(id);
        if let Some(state) = self.state_mut(id) {
            state.probes = 0;
            info!("🔍 {}: probing for {}", ifname, state.addr());
        }
        self.probe_step(id);
        Ok(())
    }

    fn probe_delay(&self) -> Duration {
        let (min, max) = (self.config.probe_min, self.config.probe_max);
        if max <= min {
            return min;
        }
        let mut rng = rand::thread_rng();
        rng.gen_range(min..max)
    }

    fn probe_step(&mut self, id: ProbeId) {
        let Some((idx, _)) = self.locate(id) else {
            return;
        };
        let probe_num = self.config.probe_num;
        let Some(state) = self.state_mut(id) else {
            return;
        };
        state.probes += 1;
        let (probes, addr) = (state.probes, state.addr());

        let ifname = self.interfaces[idx].name().to_string();
        if let Err(e) = self.send_request(idx, Ipv4Addr::UNSPECIFIED, addr) {
            error!("{}: failed to send ARP probe: {}", ifname, e);
        }

        let (delay, next) = if probes < probe_num {
            (self.probe_delay(), ArpTimer::Probe(id))
        } else {
            (self.config.announce_wait, ArpTimer::Probed(id))
        };
        self.eloop.add_timeout(delay, next);
        debug!(
            "{}: ARP probing {} ({} of {}), next in {:.1} seconds",
            ifname,
            addr,
            probes,
            probe_num,
            delay.as_secs_f64()
        );
    }

    /// Announce the state's address: `announce_num` gratuitous requests
    /// `announce_wait` apart, then [`AcdEvent::Announced`].
    ///
    /// In kernel-assisted mode nothing is sent but the timing is identical.
    pub fn announce(&mut self, id: ProbeId) -> Result<(), ArpError> {
        let (idx, _) = self.locate(id).ok_or(ArpError::UnknownProbe(id))?;
        let mode = self.interfaces[idx]
            .arp
            .as_ref()
            .map_or(self.config.mode, |ctx| ctx.mode);
        if mode == AcdMode::Userspace {
            let ifname = self.interfaces[idx].name().to_string();
            self.open(&ifname)?;
        }

        self.eloop.cancel_timeouts(id);
        if let Some(state) = self.state_mut(id) {
            state.claims = 0;
        }
        self.announce_step(id);
        Ok(())
    }

    fn announce_step(&mut self, id: ProbeId) {
        let Some((idx, _)) = self.locate(id) else {
            return;
        };
        let announce_num = self.config.announce_num;
        let wait = self.config.announce_wait;
        let Some(state) = self.state_mut(id) else {
            return;
        };
        state.claims += 1;
        let (claims, addr) = (state.claims, state.addr());

        let ifp = &self.interfaces[idx];
        let ifname = ifp.name().to_string();
        let mode = ifp.arp.as_ref().map_or(self.config.mode, |ctx| ctx.mode);

        let next = if claims < announce_num {
            ArpTimer::Announce(id)
        } else {
            ArpTimer::Announced(id)
        };
        self.eloop.add_timeout(wait, next);

        if mode == AcdMode::Kernel {
            debug!(
                "{}: kernel announces {} ({} of {})",
                ifname, addr, claims, announce_num
            );
            return;
        }
        if claims < announce_num {
            debug!(
                "{}: ARP announcing {} ({} of {}), next in {}.0 seconds",
                ifname,
                addr,
                claims,
                announce_num,
                wait.as_secs()
            );
        } else {
            debug!(
                "{}: ARP announcing {} ({} of {})",
                ifname, addr, claims, announce_num
            );
        }
        if let Err(e) = self.send_request(idx, addr, addr) {
            error!("{}: failed to send ARP announcement: {}", ifname, e);
        }
    }

    /// Run a timer previously scheduled through the event loop. Timers for
    /// states that no longer exist are ignored.
    pub fn handle_timer(&mut self, timer: ArpTimer) {
        match timer {
            ArpTimer::Probe(id) => self.probe_step(id),
            ArpTimer::Announce(id) => self.announce_step(id),
            ArpTimer::Probed(id) => {
                if let Some(state) = self.state(id) {
                    if state.hooks.probed {
                        self.events.push_back(AcdEvent::Probed(id));
                    }
                }
            }
            ArpTimer::Announced(id) => {
                if let Some(state) = self.state(id) {
                    if state.hooks.announced {
                        self.events.push_back(AcdEvent::Announced(id));
                    } else {
                        // Stay registered for ongoing conflict detection.
                        trace!("{}: {} announced", state.ifname(), state.addr());
                    }
                }
            }
        }
    }

    /// Drain the interface's capture handle.
    ///
    /// A read error closes the handle; nothing more is read on the interface
    /// until a probe or announcement opens it again.
    pub fn handle_readable(&mut self, ifname: &str) {
        let Some(idx) = self.iface_index(ifname) else {
            return;
        };
        let mut buf = [0u8; ARP_LEN];
        loop {
            let ifp = &self.interfaces[idx];
            let Some(handle) = ifp.arp.as_ref().and_then(|ctx| ctx.handle) else {
                break;
            };
            let outcome = match self.capture.read(ifp, handle, &mut buf) {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("{}: ARP read failed: {}", ifname, e);
                    self.close_index(idx);
                    return;
                }
            };
            if outcome.len > 0 {
                let len = outcome.len.min(buf.len());
                self.dispatch(idx, &buf[..len]);
            }
            if outcome.end_of_batch {
                break;
            }
        }
    }

    /// Run conflict detection on one frame received on `ifname`.
    pub fn handle_packet(&mut self, ifname: &str, data: &[u8]) {
        if let Some(idx) = self.iface_index(ifname) {
            self.dispatch(idx, data);
        }
    }

    fn dispatch(&mut self, idx: usize, data: &[u8]) {
        let Some(msg) = parse(data) else {
            trace!("{}: discarding malformed ARP frame", self.interfaces[idx].name());
            return;
        };
        let ifp = &self.interfaces[idx];
        if !self.capture.validates_fields() && !msg.is_acd_candidate(ifp.family()) {
            return;
        }
        if is_from_self(&msg, &self.interfaces) {
            trace!("{}: ignoring ARP from self", ifp.name());
            return;
        }

        let Some(ctx) = self.interfaces[idx].arp.as_mut() else {
            return;
        };
        for state in ctx
            .states
            .iter_mut()
            .filter(|s| msg.sip == s.addr() || msg.tip == s.addr())
        {
            state.failed = Some(state.addr());
            if state.hooks.conflict {
                self.events.push_back(AcdEvent::Conflict {
                    id: state.id(),
                    message: Some(msg.clone()),
                });
            }
        }
    }

    /// Feed a kernel address notification into conflict detection.
    ///
    /// A duplicated address is reported as a conflict with no message; an
    /// address the kernel has finished checking is reported as probed.
    /// Deletions are left to the owner of the probe state.
    pub fn handle_address(
        &mut self,
        ifname: &str,
        addr: Ipv4Addr,
        change: AddressChange,
        flags: AddrFlags,
    ) {
        if change != AddressChange::Added {
            return;
        }
        let Some(ctx) = self
            .iface_index(ifname)
            .and_then(|idx| self.interfaces[idx].arp.as_mut())
        else {
            return;
        };
        for state in ctx.states.iter_mut().filter(|s| s.addr() == addr) {
            if flags.duplicated {
                state.failed = Some(addr);
                if state.hooks.conflict {
                    self.events.push_back(AcdEvent::Conflict {
                        id: state.id(),
                        message: None,
                    });
                }
            } else if !flags.tentative && state.hooks.probed {
                self.events.push_back(AcdEvent::Probed(state.id()));
            }
        }
    }

    /// Log a conflict for a probe state.
    pub fn report_conflicted(&self, id: ProbeId, message: Option<&ArpMessage>) {
        let Some(state) = self.state(id) else {
            return;
        };
        let failed = state.failed().unwrap_or(state.addr());
        match message {
            Some(msg) => error!(
                "{}: hardware address {} claims {}",
                state.ifname(),
                msg.sha,
                failed
            ),
            None => error!("{}: DAD detected {}", state.ifname(), failed),
        }
    }
}

fn filter_for(ifp: &Interface) -> ArpFilter {
    ArpFilter::new(
        ifp,
        ifp.arp.as_ref().map(ArpContext::addrs).unwrap_or_default(),
    )
}

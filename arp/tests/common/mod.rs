//! Recording fakes for the capture and event loop seams
#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::net::Ipv4Addr;
use std::time::Duration;

use dhcp_arp::packet::build_request;
use dhcp_arp::{
    AcdConfig, AcdEvent, Arp, ArpFilter, ArpTimer, Capture, CaptureHandle, EventLoop, Interface,
    ProbeId, ReadOutcome,
};
use eui48::MacAddress;

pub const ETH0: &str = "eth0";

#[derive(Debug, Clone)]
pub struct Sent {
    pub ifname: String,
    pub handle: CaptureHandle,
    pub ethertype: u16,
    pub frame: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct FakeCapture {
    next_fd: i32,
    pub open: Vec<CaptureHandle>,
    pub opened: usize,
    pub closed: Vec<CaptureHandle>,
    pub sent: Vec<Sent>,
    pub filters: Vec<ArpFilter>,
    pub inbound: VecDeque<io::Result<Vec<u8>>>,
    pub fail_open: bool,
    pub fail_send: bool,
    pub validates: bool,
}

impl FakeCapture {
    pub fn last_filter(&self) -> Option<&ArpFilter> {
        self.filters.last()
    }

    pub fn queue(&mut self, frame: Vec<u8>) {
        self.inbound.push_back(Ok(frame));
    }
}

impl Capture for FakeCapture {
    fn open(&mut self, _ifp: &Interface, filter: &ArpFilter) -> io::Result<CaptureHandle> {
        if self.fail_open {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "not permitted"));
        }
        self.next_fd += 1;
        let handle = CaptureHandle(100 + self.next_fd);
        self.open.push(handle);
        self.opened += 1;
        self.filters.push(filter.clone());
        Ok(handle)
    }

    fn set_filter(&mut self, handle: CaptureHandle, filter: &ArpFilter) -> io::Result<()> {
        assert!(self.open.contains(&handle), "filter set on closed {}", handle);
        self.filters.push(filter.clone());
        Ok(())
    }

    fn close(&mut self, handle: CaptureHandle) {
        self.open.retain(|h| *h != handle);
        self.closed.push(handle);
    }

    fn send(
        &mut self,
        ifp: &Interface,
        handle: CaptureHandle,
        ethertype: u16,
        frame: &[u8],
    ) -> io::Result<usize> {
        if self.fail_send {
            return Err(io::Error::new(io::ErrorKind::Other, "link down"));
        }
        self.sent.push(Sent {
            ifname: ifp.name().to_string(),
            handle,
            ethertype,
            frame: frame.to_vec(),
        });
        Ok(frame.len())
    }

    fn read(
        &mut self,
        _ifp: &Interface,
        _handle: CaptureHandle,
        buf: &mut [u8],
    ) -> io::Result<ReadOutcome> {
        match self.inbound.pop_front() {
            Some(Ok(frame)) => {
                let len = frame.len().min(buf.len());
                buf[..len].copy_from_slice(&frame[..len]);
                Ok(ReadOutcome {
                    len,
                    end_of_batch: self.inbound.is_empty(),
                })
            }
            Some(Err(e)) => Err(e),
            None => Ok(ReadOutcome {
                len: 0,
                end_of_batch: true,
            }),
        }
    }

    fn validates_fields(&self) -> bool {
        self.validates
    }
}

#[derive(Debug, Default)]
pub struct FakeLoop {
    pub pending: VecDeque<(Duration, ArpTimer)>,
    pub scheduled: Vec<(Duration, ArpTimer)>,
    pub readers: Vec<(CaptureHandle, String)>,
    pub cancelled: Vec<ProbeId>,
}

impl EventLoop for FakeLoop {
    fn add_reader(&mut self, handle: CaptureHandle, ifname: &str) {
        self.readers.push((handle, ifname.to_string()));
    }

    fn remove_reader(&mut self, handle: CaptureHandle) {
        self.readers.retain(|(h, _)| *h != handle);
    }

    fn add_timeout(&mut self, delay: Duration, timer: ArpTimer) {
        self.pending.push_back((delay, timer));
        self.scheduled.push((delay, timer));
    }

    fn cancel_timeouts(&mut self, id: ProbeId) {
        self.pending.retain(|(_, t)| t.id() != id);
        self.cancelled.push(id);
    }
}

pub type TestArp = Arp<FakeCapture, FakeLoop>;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn mac(last: u8) -> MacAddress {
    MacAddress::new([0x02, 0x00, 0x5e, 0x10, 0x00, last])
}

pub fn eth0() -> Interface {
    Interface::ethernet(ETH0, 2, mac(0x01))
}

pub fn setup_with(config: AcdConfig) -> TestArp {
    init_logger();
    let mut arp = Arp::new(config, FakeCapture::default(), FakeLoop::default());
    arp.add_interface(eth0());
    arp
}

pub fn setup() -> TestArp {
    setup_with(AcdConfig::default())
}

/// A frame from a host that is not us
pub fn peer_frame(sip: Ipv4Addr, tip: Ipv4Addr) -> Vec<u8> {
    let peer = Interface::ethernet("peer", 9, mac(0x99));
    build_request(&peer, sip, tip).unwrap().as_bytes().to_vec()
}

/// Fire the oldest pending timer, as the event loop would.
pub fn fire_next(arp: &mut TestArp) -> Option<(Duration, ArpTimer)> {
    let (delay, timer) = arp.event_loop_mut().pending.pop_front()?;
    arp.handle_timer(timer);
    Some((delay, timer))
}

pub fn events(arp: &mut TestArp) -> Vec<AcdEvent> {
    std::iter::from_fn(|| arp.poll_event()).collect()
}

pub fn addr(last: u8) -> Ipv4Addr {
    Ipv4Addr::new(192, 168, 1, last)
}

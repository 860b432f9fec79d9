//! ARP wire format: building requests and parsing inbound frames

use std::net::Ipv4Addr;

use bytes::BufMut;

use crate::constants::{
    ARPOP_REPLY, ARPOP_REQUEST, ARP_HDR_LEN, ARP_LEN, ETHERTYPE_IP, IPV4_ADDR_LEN,
};
use crate::error::ArpError;
use crate::iface::{HwAddr, Interface};

/// Checks there is room left in `dst` for a frame of `$needed` bytes.
macro_rules! check_remaining(
    ($dst:expr, $needed:expr) => (
        if $dst.remaining_mut() < $needed {
            return Err(ArpError::Capacity {
                needed: $needed,
                capacity: $dst.remaining_mut(),
            });
        }
    )
);

/// An encoded ARP frame, ready for the capture layer
#[derive(Clone)]
pub struct ArpFrame {
    buf: [u8; ARP_LEN],
    len: usize,
}

impl ArpFrame {
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

/// Encoded size of a request from `ifp`
pub fn request_len(ifp: &Interface) -> usize {
    ARP_HDR_LEN + 2 * (ifp.hwlen() + IPV4_ADDR_LEN)
}

/// Write an ARP REQUEST from `ifp` asking for `tip` on behalf of `sip` into
/// `dst`, returning the number of bytes written.
///
/// # Errors
/// [`ArpError::Capacity`] if `dst` is too small, in which case nothing is
/// written.
pub fn write_request(
    ifp: &Interface,
    sip: Ipv4Addr,
    tip: Ipv4Addr,
    mut dst: &mut [u8],
) -> Result<usize, ArpError> {
    let len = request_len(ifp);
    check_remaining!(dst, len);
    let hwlen = u8::try_from(ifp.hwlen()).map_err(|_| ArpError::Capacity {
        needed: len,
        capacity: ARP_LEN,
    })?;

    dst.put_u16(ifp.family());
    dst.put_u16(ETHERTYPE_IP);
    dst.put_u8(hwlen);
    dst.put_u8(IPV4_ADDR_LEN as u8);
    dst.put_u16(ARPOP_REQUEST);
    dst.put_slice(ifp.hwaddr());
    dst.put_slice(&sip.octets());
    dst.put_bytes(0, hwlen as usize);
    dst.put_slice(&tip.octets());
    Ok(len)
}

/// Build an ARP REQUEST from `ifp` asking for `tip` on behalf of `sip`.
///
/// A probe uses `sip = 0.0.0.0`; an announcement uses `sip == tip`. Fails
/// with [`ArpError::Capacity`] if the hardware address does not fit in
/// `ARP_LEN`.
pub fn build_request(ifp: &Interface, sip: Ipv4Addr, tip: Ipv4Addr) -> Result<ArpFrame, ArpError> {
    let mut buf = [0u8; ARP_LEN];
    let len = write_request(ifp, sip, tip, &mut buf[..])?;
    Ok(ArpFrame { buf, len })
}

/// The addresses carried by one inbound ARP frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArpMessage {
    /// Hardware type from the header
    pub htype: u16,
    /// Protocol type from the header
    pub ptype: u16,
    pub op: u16,
    /// Sender hardware address
    pub sha: HwAddr,
    /// Sender protocol address
    pub sip: Ipv4Addr,
    /// Target hardware address
    pub tha: HwAddr,
    /// Target protocol address
    pub tip: Ipv4Addr,
}

impl ArpMessage {
    /// Checks normally done by the capture filter: IPv4 over `family`, and only
    /// requests or replies.
    pub fn is_acd_candidate(&self, family: u16) -> bool {
        self.htype == family
            && self.ptype == ETHERTYPE_IP
            && (self.op == ARPOP_REQUEST || self.op == ARPOP_REPLY)
    }
}

/// Parse an inbound ARP frame.
///
/// Returns `None` for anything too short, with inconsistent lengths, or with a
/// protocol address that is not 4 bytes long. Inbound ARP comes from untrusted
/// peers, so these frames are dropped rather than reported.
pub fn parse(data: &[u8]) -> Option<ArpMessage> {
    if data.len() < ARP_HDR_LEN {
        return None;
    }
    let htype = u16::from_be_bytes([data[0], data[1]]);
    let ptype = u16::from_be_bytes([data[2], data[3]]);
    let hln = data[4] as usize;
    let pln = data[5] as usize;
    let op = u16::from_be_bytes([data[6], data[7]]);

    if pln != IPV4_ADDR_LEN {
        return None;
    }

    let hw_s = ARP_HDR_LEN;
    let hw_t = hw_s + hln + pln;
    if hw_t + hln + pln > data.len() {
        return None;
    }

    let sha = HwAddr::from_slice(&data[hw_s..hw_s + hln])?;
    let tha = HwAddr::from_slice(&data[hw_t..hw_t + hln])?;
    Some(ArpMessage {
        htype,
        ptype,
        op,
        sha,
        sip: read_ipv4(&data[hw_s + hln..]),
        tha,
        tip: read_ipv4(&data[hw_t + hln..]),
    })
}

fn read_ipv4(data: &[u8]) -> Ipv4Addr {
    Ipv4Addr::new(data[0], data[1], data[2], data[3])
}

/// Whether `msg` was sent by any of our own interfaces, not only the one it
/// arrived on.
pub fn is_from_self<'a, I>(msg: &ArpMessage, interfaces: I) -> bool
where
    I: IntoIterator<Item = &'a Interface>,
{
    interfaces
        .into_iter()
        .any(|ifp| ifp.hwaddr() == msg.sha.as_bytes())
}

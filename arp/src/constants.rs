//! Protocol numbers and RFC 5227 timing parameters

use std::time::Duration;

/// Hardware type for Ethernet (`ARPHRD_ETHER`).
pub const ARPHRD_ETHER: u16 = 1;
/// EtherType carried by ARP frames.
pub const ETHERTYPE_ARP: u16 = 0x0806;
/// Protocol type for IPv4.
pub const ETHERTYPE_IP: u16 = 0x0800;

pub const ARPOP_REQUEST: u16 = 1;
pub const ARPOP_REPLY: u16 = 2;

/// Fixed part of every ARP packet: hrd, pro, hln, pln, op.
pub const ARP_HDR_LEN: usize = 8;
/// Length of an IPv4 protocol address.
pub const IPV4_ADDR_LEN: usize = 4;
/// Largest hardware address we handle (InfiniBand uses 20 bytes).
pub const HWADDR_LEN: usize = 20;
/// Largest ARP frame we ever build or read.
pub const ARP_LEN: usize = ARP_HDR_LEN + 2 * IPV4_ADDR_LEN + 2 * HWADDR_LEN;

// RFC 5227 section 1.1
pub const PROBE_NUM: u32 = 3;
pub const PROBE_MIN: Duration = Duration::from_secs(1);
pub const PROBE_MAX: Duration = Duration::from_secs(2);
pub const ANNOUNCE_WAIT: Duration = Duration::from_secs(2);
pub const ANNOUNCE_NUM: u32 = 2;

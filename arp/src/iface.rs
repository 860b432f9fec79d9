//! Network interfaces as seen by the ARP engine

use std::fmt;

use eui48::MacAddress;

use crate::constants::{ARPHRD_ETHER, HWADDR_LEN};
use crate::state::ArpContext;

#[cfg(target_os = "linux")]
use {
    crate::error::ArpError,
    futures::stream::TryStreamExt,
    rtnetlink::{new_connection, packet_route::link::LinkAttribute},
};

/// A hardware address of up to `HWADDR_LEN` bytes
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct HwAddr {
    len: u8,
    bytes: [u8; HWADDR_LEN],
}

impl HwAddr {
    /// Returns `None` when `addr` is longer than `HWADDR_LEN`.
    pub fn from_slice(addr: &[u8]) -> Option<Self> {
        if addr.len() > HWADDR_LEN {
            return None;
        }
        let mut bytes = [0u8; HWADDR_LEN];
        bytes[..addr.len()].copy_from_slice(addr);
        Some(HwAddr {
            len: addr.len() as u8,
            bytes,
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl From<MacAddress> for HwAddr {
    fn from(mac: MacAddress) -> Self {
        let mut bytes = [0u8; HWADDR_LEN];
        bytes[..6].copy_from_slice(mac.as_bytes());
        HwAddr { len: 6, bytes }
    }
}

impl fmt::Display for HwAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.as_bytes().iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl fmt::Debug for HwAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HwAddr({})", self)
    }
}

/// A network interface known to the engine.
///
/// Interfaces are owned by the engine's interface table. Each one owns at most
/// one [`ArpContext`], created when the first probe state is added for it and
/// dropped together with its last probe state.
#[derive(Debug)]
pub struct Interface {
    name: String,
    index: u32,
    family: u16,
    hwaddr: Vec<u8>,
    pub(crate) arp: Option<ArpContext>,
}

impl Interface {
    pub fn new(name: impl Into<String>, index: u32, family: u16, hwaddr: &[u8]) -> Self {
        Interface {
            name: name.into(),
            index,
            family,
            hwaddr: hwaddr.to_vec(),
            arp: None,
        }
    }

    pub fn ethernet(name: impl Into<String>, index: u32, mac: MacAddress) -> Self {
        Self::new(name, index, ARPHRD_ETHER, mac.as_bytes())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Kernel interface index
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Link-layer family (`ARPHRD_*`)
    pub fn family(&self) -> u16 {
        self.family
    }

    pub fn hwaddr(&self) -> &[u8] {
        &self.hwaddr
    }

    pub fn hwlen(&self) -> usize {
        self.hwaddr.len()
    }

    /// The interface's ARP context, if any probe state lives on it.
    pub fn arp(&self) -> Option<&ArpContext> {
        self.arp.as_ref()
    }
}

/// Look up a network interface by name over netlink
#[cfg(target_os = "linux")]
pub async fn lookup_interface(interface_name: &str) -> Result<Interface, ArpError> {
    let (connection, handle, _) = new_connection()?;
    tokio::spawn(connection);

    let mut links = handle
        .link()
        .get()
        .match_name(interface_name.to_string())
        .execute();

    if let Some(link) = links.try_next().await? {
        let family = u16::from(link.header.link_layer_type);
        return match link_hwaddr(&link.attributes) {
            Some(address) => Ok(Interface::new(
                interface_name,
                link.header.index,
                family,
                address,
            )),
            None => Err(ArpError::InterfaceNotFound(format!(
                "{} (no hardware address)",
                interface_name
            ))),
        };
    }

    Err(ArpError::InterfaceNotFound(interface_name.to_string()))
}

#[cfg(target_os = "linux")]
fn link_hwaddr(attrs: &[LinkAttribute]) -> Option<&[u8]> {
    attrs.iter().find_map(|attr| match attr {
        LinkAttribute::Address(address) => Some(address.as_slice()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hwaddr_display() {
        let mac = MacAddress::new([0x00, 0x11, 0x22, 0xaa, 0xbb, 0xcc]);
        assert_eq!(HwAddr::from(mac).to_string(), "00:11:22:aa:bb:cc");
        assert_eq!(HwAddr::from_slice(&[]).unwrap().to_string(), "");
    }

    #[test]
    fn hwaddr_rejects_oversized() {
        assert!(HwAddr::from_slice(&[0u8; HWADDR_LEN]).is_some());
        assert!(HwAddr::from_slice(&[0u8; HWADDR_LEN + 1]).is_none());
    }

    #[test]
    fn ethernet_interface() {
        let ifp = Interface::ethernet("eth0", 2, MacAddress::new([2, 0, 0, 0, 0, 1]));
        assert_eq!(ifp.family(), ARPHRD_ETHER);
        assert_eq!(ifp.hwlen(), 6);
        assert!(ifp.arp().is_none());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn hardware_address_from_link_attributes() {
        let attrs = vec![
            LinkAttribute::IfName("eth0".to_string()),
            LinkAttribute::Mtu(1500),
            LinkAttribute::Address(vec![2, 0, 0, 0, 0, 1]),
            LinkAttribute::Broadcast(vec![0xff; 6]),
        ];
        assert_eq!(link_hwaddr(&attrs), Some(&[2u8, 0, 0, 0, 0, 1][..]));
        assert_eq!(link_hwaddr(&attrs[..2]), None);
    }
}

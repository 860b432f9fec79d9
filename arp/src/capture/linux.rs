//! `AF_PACKET` capture for Linux

use std::io;
use std::mem;

use log::debug;

use super::{ArpFilter, Capture, CaptureHandle, ReadOutcome};
use crate::constants::ETHERTYPE_ARP;
use crate::iface::Interface;

/// Cooked (`SOCK_DGRAM`) packet sockets: reads start at the ARP header and
/// sends get a broadcast link-layer header from the kernel.
#[derive(Debug, Default)]
pub struct PacketSocket;

impl PacketSocket {
    pub fn new() -> Self {
        PacketSocket
    }
}

fn attach_filter(fd: i32, filter: &ArpFilter) -> io::Result<()> {
    let mut insns: Vec<libc::sock_filter> = filter
        .program()
        .iter()
        .map(|i| libc::sock_filter {
            code: i.code,
            jt: i.jt,
            jf: i.jf,
            k: i.k,
        })
        .collect();
    let prog = libc::sock_fprog {
        len: insns.len() as libc::c_ushort,
        filter: insns.as_mut_ptr(),
    };
    let rc = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ATTACH_FILTER,
            &prog as *const libc::sock_fprog as *const libc::c_void,
            mem::size_of::<libc::sock_fprog>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn link_addr(ifp: &Interface, protocol: u16) -> io::Result<libc::sockaddr_ll> {
    let mut addr: libc::sockaddr_ll = unsafe { mem::zeroed() };
    addr.sll_family = libc::AF_PACKET as u16;
    addr.sll_protocol = protocol.to_be();
    addr.sll_ifindex = ifp.index() as i32;

    let hwlen = ifp.hwlen();
    if hwlen > addr.sll_addr.len() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{}: hardware address too long for sockaddr_ll", ifp.name()),
        ));
    }
    addr.sll_halen = hwlen as u8;
    addr.sll_addr[..hwlen].fill(0xff);
    Ok(addr)
}

impl Capture for PacketSocket {
    fn open(&mut self, ifp: &Interface, filter: &ArpFilter) -> io::Result<CaptureHandle> {
        let fd = unsafe {
            libc::socket(
                libc::AF_PACKET,
                libc::SOCK_DGRAM | libc::SOCK_CLOEXEC | libc::SOCK_NONBLOCK,
                0,
            )
        };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }

        // Protocol 0 receives nothing until bound, so no frame from another
        // interface or without the filter is ever queued.
        let bound = attach_filter(fd, filter).and_then(|_| {
            let addr = link_addr(ifp, ETHERTYPE_ARP)?;
            let rc = unsafe {
                libc::bind(
                    fd,
                    &addr as *const libc::sockaddr_ll as *const libc::sockaddr,
                    mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
                )
            };
            if rc < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });

        if let Err(e) = bound {
            unsafe {
                libc::close(fd);
            }
            return Err(e);
        }

        debug!("{}: opened ARP packet socket {}", ifp.name(), fd);
        Ok(CaptureHandle(fd))
    }

    fn set_filter(&mut self, handle: CaptureHandle, filter: &ArpFilter) -> io::Result<()> {
        attach_filter(handle.0, filter)
    }

    fn close(&mut self, handle: CaptureHandle) {
        unsafe {
            libc::close(handle.0);
        }
    }

    fn send(
        &mut self,
        ifp: &Interface,
        handle: CaptureHandle,
        ethertype: u16,
        frame: &[u8],
    ) -> io::Result<usize> {
        let addr = link_addr(ifp, ethertype)?;
        let sent = unsafe {
            libc::sendto(
                handle.0,
                frame.as_ptr() as *const libc::c_void,
                frame.len(),
                0,
                &addr as *const libc::sockaddr_ll as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        };
        if sent < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(sent as usize)
    }

    fn read(
        &mut self,
        _ifp: &Interface,
        handle: CaptureHandle,
        buf: &mut [u8],
    ) -> io::Result<ReadOutcome> {
        let received = unsafe {
            libc::recv(
                handle.0,
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
                0,
            )
        };
        if received < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                return Ok(ReadOutcome {
                    len: 0,
                    end_of_batch: true,
                });
            }
            return Err(err);
        }
        // The socket is non-blocking, so keep reading until it runs dry.
        Ok(ReadOutcome {
            len: received as usize,
            end_of_batch: false,
        })
    }

    fn validates_fields(&self) -> bool {
        true
    }
}

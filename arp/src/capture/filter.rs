//! ARP capture filter, compiled to classic BPF

use std::net::Ipv4Addr;

use crate::constants::{
    ARPOP_REPLY, ARPOP_REQUEST, ARP_HDR_LEN, ARP_LEN, ETHERTYPE_IP, IPV4_ADDR_LEN,
};
use crate::iface::Interface;

/// Past this many addresses the filter stops matching addresses and passes
/// every valid ARP frame. Keeps all jumps within BPF's 8-bit offsets.
pub const MAX_FILTER_ADDRS: usize = 32;

const BPF_LD_W_ABS: u16 = 0x20;
const BPF_LD_H_ABS: u16 = 0x28;
const BPF_LD_B_ABS: u16 = 0x30;
const BPF_JEQ_K: u16 = 0x15;
const BPF_RET_K: u16 = 0x06;

/// One classic BPF instruction, laid out like `struct sock_filter`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BpfInsn {
    pub code: u16,
    pub jt: u8,
    pub jf: u8,
    pub k: u32,
}

/// What frames an interface's capture handle should pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArpFilter {
    pub family: u16,
    pub hwlen: u8,
    /// Addresses under conflict detection on the interface
    pub addrs: Vec<Ipv4Addr>,
}

#[derive(Clone, Copy)]
enum Jump {
    Next,
    Skip(u8),
    Accept,
    Drop,
}

struct Asm {
    insns: Vec<(u16, Jump, Jump, u32)>,
}

impl Asm {
    fn load(&mut self, code: u16, offset: usize) {
        self.insns.push((code, Jump::Next, Jump::Next, offset as u32));
    }

    fn jeq(&mut self, k: u32, jt: Jump, jf: Jump) {
        self.insns.push((BPF_JEQ_K, jt, jf, k));
    }

    fn finish(self) -> Vec<BpfInsn> {
        let accept = self.insns.len();
        let drop = accept + 1;
        let mut prog: Vec<BpfInsn> = self
            .insns
            .iter()
            .enumerate()
            .map(|(pc, &(code, jt, jf, k))| {
                let resolve = |j: Jump| -> u8 {
                    let target = match j {
                        Jump::Next => pc + 1,
                        Jump::Skip(n) => pc + 1 + n as usize,
                        Jump::Accept => accept,
                        Jump::Drop => drop,
                    };
                    (target - (pc + 1)) as u8
                };
                BpfInsn {
                    code,
                    jt: resolve(jt),
                    jf: resolve(jf),
                    k,
                }
            })
            .collect();
        prog.push(BpfInsn {
            code: BPF_RET_K,
            jt: 0,
            jf: 0,
            k: ARP_LEN as u32,
        });
        prog.push(BpfInsn {
            code: BPF_RET_K,
            jt: 0,
            jf: 0,
            k: 0,
        });
        prog
    }
}

impl ArpFilter {
    pub fn new(ifp: &Interface, addrs: Vec<Ipv4Addr>) -> Self {
        ArpFilter {
            family: ifp.family(),
            hwlen: ifp.hwlen().min(u8::MAX as usize) as u8,
            addrs,
        }
    }

    /// Whether the compiled program tests sender/target addresses
    pub fn matches_addresses(&self) -> bool {
        !self.addrs.is_empty() && self.addrs.len() <= MAX_FILTER_ADDRS
    }

    /// Compile to a program for a socket that delivers the ARP header at
    /// offset 0 (no link-layer header).
    pub fn program(&self) -> Vec<BpfInsn> {
        let mut asm = Asm { insns: Vec::new() };

        asm.load(BPF_LD_H_ABS, 0);
        asm.jeq(self.family as u32, Jump::Next, Jump::Drop);
        asm.load(BPF_LD_H_ABS, 2);
        asm.jeq(ETHERTYPE_IP as u32, Jump::Next, Jump::Drop);
        asm.load(BPF_LD_B_ABS, 4);
        asm.jeq(self.hwlen as u32, Jump::Next, Jump::Drop);
        asm.load(BPF_LD_B_ABS, 5);
        asm.jeq(IPV4_ADDR_LEN as u32, Jump::Next, Jump::Drop);
        asm.load(BPF_LD_H_ABS, 6);
        asm.jeq(ARPOP_REQUEST as u32, Jump::Skip(1), Jump::Next);
        asm.jeq(ARPOP_REPLY as u32, Jump::Next, Jump::Drop);

        if self.matches_addresses() {
            let hwlen = self.hwlen as usize;
            let sip = ARP_HDR_LEN + hwlen;
            let tip = sip + IPV4_ADDR_LEN + hwlen;

            asm.load(BPF_LD_W_ABS, sip);
            for addr in &self.addrs {
                asm.jeq(u32::from(*addr), Jump::Accept, Jump::Next);
            }
            asm.load(BPF_LD_W_ABS, tip);
            let last = self.addrs.len() - 1;
            for (i, addr) in self.addrs.iter().enumerate() {
                let miss = if i == last { Jump::Drop } else { Jump::Next };
                asm.jeq(u32::from(*addr), Jump::Accept, miss);
            }
        }

        asm.finish()
    }
}

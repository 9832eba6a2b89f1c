//! Packet admission filter.
//!
//! Decides whether a port accepts a frame based on the destination address,
//! the port's own address, its interface flags and its multicast filter. The
//! hashed filter is the 64-bit logical address filter (LADRF) of the LANCE
//! family of adapters, so the hash has to be reproduced bit for bit.

use core::fmt;

use crate::packet::MacAddr;
use crate::VnetError;

bitflags::bitflags! {
    /// Interface flags relevant to frame admission and administrative state.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct IfFlags: u32 {
        const UP        = 0x0001;
        const BROADCAST = 0x0002;
        const RUNNING   = 0x0040;
        const PROMISC   = 0x0100;
        const ALLMULTI  = 0x0200;
        const MULTICAST = 0x1000;
    }
}

impl Default for IfFlags {
    fn default() -> Self {
        IfFlags::UP | IfFlags::RUNNING | IfFlags::BROADCAST | IfFlags::MULTICAST
    }
}

impl fmt::Display for IfFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        let mut first = true;
        for (name, _) in self.iter_names() {
            if !first {
                f.write_str(",")?;
            }
            f.write_str(name)?;
            first = false;
        }
        Ok(())
    }
}

const CRC_POLYNOMIAL_BE: u32 = 0x04C1_1DB7;

/// Six-bit LADRF index for `addr`.
///
/// The address is shifted LSB first through a big-endian CRC-32 generator;
/// the index is the low six bits of the CRC read in reverse order.
pub fn ladrf_hash(addr: &MacAddr) -> u8 {
    let mut crc: u32 = 0xFFFF_FFFF;
    for &byte in addr.0.iter() {
        let mut c = byte;
        for _ in 0..8 {
            let msb = (crc >> 31) & 1;
            let feedback = (msb ^ u32::from(c)) & 1;
            crc <<= 1;
            if feedback != 0 {
                crc ^= CRC_POLYNOMIAL_BE;
            }
            c >>= 1;
        }
    }

    let mut hash = crc & 1;
    for _ in 0..5 {
        crc >>= 1;
        hash = (hash << 1) | (crc & 1);
    }
    hash as u8
}

/// The 64-bit hashed logical multicast filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Ladrf(pub [u8; 8]);

impl Ladrf {
    pub const ALL: Ladrf = Ladrf([0xFF; 8]);

    pub fn from_addrs<'a>(addrs: impl IntoIterator<Item = &'a MacAddr>) -> Self {
        let mut ladrf = Ladrf::default();
        for addr in addrs {
            ladrf.add(addr);
        }
        ladrf
    }

    pub fn add(&mut self, addr: &MacAddr) {
        let hash = ladrf_hash(addr);
        self.0[usize::from(hash >> 3)] |= 1 << (hash & 0x07);
    }

    pub fn contains(&self, addr: &MacAddr) -> bool {
        let hash = ladrf_hash(addr);
        self.0[usize::from(hash >> 3)] & (1 << (hash & 0x07)) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }
}

impl fmt::Display for Ladrf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

/// Exact-match multicast list. When non-empty it is authoritative.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExactFilter {
    addrs: Vec<MacAddr>,
}

impl ExactFilter {
    pub const MAX_ADDRS: usize = 32;

    pub fn new(addrs: &[MacAddr]) -> Result<Self, VnetError> {
        if addrs.len() > Self::MAX_ADDRS {
            return Err(VnetError::InvalidArgument("too many exact multicast addresses"));
        }
        Ok(Self { addrs: addrs.to_vec() })
    }

    pub fn len(&self) -> usize {
        self.addrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }

    pub fn addrs(&self) -> &[MacAddr] {
        &self.addrs
    }

    pub fn contains(&self, addr: &MacAddr) -> bool {
        self.addrs.iter().any(|a| a == addr)
    }
}

fn multicast_allowed(dest: &MacAddr, exact: &ExactFilter, ladrf: &Ladrf) -> bool {
    if !exact.is_empty() {
        return exact.contains(dest);
    }
    ladrf.contains(dest)
}

/// Admission decision for a frame addressed to `dest` arriving at a port.
pub fn matches(
    dest: &MacAddr,
    port_addr: &MacAddr,
    exact: &ExactFilter,
    ladrf: &Ladrf,
    flags: IfFlags,
) -> bool {
    flags.contains(IfFlags::PROMISC)
        || dest == port_addr
        || (dest.is_broadcast() && flags.contains(IfFlags::BROADCAST))
        || (dest.is_multicast()
            && (flags.contains(IfFlags::ALLMULTI) || multicast_allowed(dest, exact, ladrf)))
}

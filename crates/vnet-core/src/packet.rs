use core::fmt;
use core::str::FromStr;
use std::sync::Arc;

use crate::{VnetError, ETH_ALEN, ETH_HLEN};

/// 48-bit IEEE 802 hardware address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct MacAddr(pub [u8; ETH_ALEN]);

impl MacAddr {
    pub const BROADCAST: MacAddr = MacAddr([0xFF; ETH_ALEN]);
    pub const ZERO: MacAddr = MacAddr([0x00; ETH_ALEN]);

    pub const fn new(bytes: [u8; ETH_ALEN]) -> Self {
        MacAddr(bytes)
    }

    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        let bytes: [u8; ETH_ALEN] = slice.get(..ETH_ALEN)?.try_into().ok()?;
        Some(MacAddr(bytes))
    }

    pub fn octets(&self) -> [u8; ETH_ALEN] {
        self.0
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    /// Group bit set. Broadcast counts as multicast.
    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }

    pub fn is_unicast(&self) -> bool {
        !self.is_multicast()
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for MacAddr {
    type Err = VnetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; ETH_ALEN];
        let mut parts = s.split(|c| c == ':' || c == '-');
        for byte in bytes.iter_mut() {
            let part = parts.next().ok_or(VnetError::InvalidArgument("mac address too short"))?;
            *byte = u8::from_str_radix(part, 16)
                .map_err(|_| VnetError::InvalidArgument("mac address octet is not hex"))?;
        }
        if parts.next().is_some() {
            return Err(VnetError::InvalidArgument("mac address too long"));
        }
        Ok(MacAddr(bytes))
    }
}

impl From<[u8; ETH_ALEN]> for MacAddr {
    fn from(bytes: [u8; ETH_ALEN]) -> Self {
        MacAddr(bytes)
    }
}

/// An Ethernet frame travelling through the fabric.
///
/// The buffer is immutable and shared: `clone()` hands out another reference
/// to the same bytes, the way a socket buffer clone shares its data. Paths
/// that need to rewrite a frame take an owned copy with [`Packet::to_vec`]
/// and wrap the result in a fresh `Packet`, so a frame that another path may
/// still be looking at is never modified.
#[derive(Clone)]
pub struct Packet {
    data: Arc<[u8]>,
}

impl Packet {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data: data.into() }
    }

    pub fn from_slice(data: &[u8]) -> Self {
        Self { data: Arc::from(data) }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Owned, mutable copy of the frame contents.
    pub fn to_vec(&self) -> Vec<u8> {
        self.data.to_vec()
    }

    /// True when both handles refer to the same underlying buffer.
    pub fn is_clone_of(&self, other: &Packet) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    pub fn dest(&self) -> Option<MacAddr> {
        MacAddr::from_slice(&self.data)
    }

    pub fn source(&self) -> Option<MacAddr> {
        MacAddr::from_slice(self.data.get(ETH_ALEN..)?)
    }

    /// The raw type/length field of the outer Ethernet header.
    pub fn ether_type(&self) -> Option<u16> {
        let b = self.data.get(12..ETH_HLEN)?;
        Some(u16::from_be_bytes([b[0], b[1]]))
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("len", &self.len())
            .field("dest", &self.dest())
            .field("source", &self.source())
            .finish()
    }
}

impl From<Vec<u8>> for Packet {
    fn from(data: Vec<u8>) -> Self {
        Packet::new(data)
    }
}

impl AsRef<[u8]> for Packet {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

#![forbid(unsafe_code)]

//! MAC substitution for bridging over uplinks that only accept frames
//! carrying the adapter's own hardware address.
//!
//! Frames leaving a guest get their source rewritten to the wireless MAC,
//! and the guest's (IP, MAC) pair is remembered. Frames arriving from the
//! uplink get their destination rewritten back to the guest that owns the
//! destination IP.

pub mod cache;
pub mod checksum;
pub mod frame;
mod from_host;
mod to_host;

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use spin::Mutex;
use vnet_core::MacAddr;
use vnet_hal::{PacketOrigin, TickSource};

pub use cache::{is_recordable, IpMacCache, CACHE_BUCKETS, CACHE_MAX_ENTRIES};
pub use checksum::{adjust_checksum, internet_checksum, patch_mac_fix_checksum};

/// A field lay beyond the end of the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TooShort;

/// What the bridge should do with a frame after inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Pass the original frame unchanged.
    Forward,
    Drop,
    /// Pass this rewritten copy instead of the original.
    Rewrite(Vec<u8>),
}

/// Top bit set on every reading, so values taken after a wrap compress
/// below fresh ones.
const TICK_MARK: u32 = 0x8000_0000;

/// Per-adapter substitution state.
pub struct SmacState {
    wireless_mac: MacAddr,
    cache: Mutex<IpMacCache>,
    forward_unknown: AtomicBool,
    clock: Arc<dyn TickSource>,
}

impl SmacState {
    pub fn new(wireless_mac: MacAddr, clock: Arc<dyn TickSource>) -> Self {
        Self {
            wireless_mac,
            cache: Mutex::new(IpMacCache::default()),
            forward_unknown: AtomicBool::new(false),
            clock,
        }
    }

    pub fn wireless_mac(&self) -> MacAddr {
        self.wireless_mac
    }

    /// Frames whose destination is not in the cache are forwarded unmodified
    /// when set, dropped otherwise.
    pub fn set_forward_unknown(&self, forward: bool) {
        self.forward_unknown.store(forward, Ordering::Relaxed);
    }

    pub fn forward_unknown(&self) -> bool {
        self.forward_unknown.load(Ordering::Relaxed)
    }

    fn now(&self) -> u32 {
        self.clock.ticks() | TICK_MARK
    }

    /// Remember that `ip` is owned by guest `mac`. Unspecified, broadcast
    /// and multicast addresses are ignored.
    pub fn record(&self, ip: IpAddr, mac: MacAddr) {
        if !is_recordable(&ip) || mac.is_multicast() {
            return;
        }
        let now = self.now();
        self.cache.lock().insert(ip, mac, now);
    }

    pub fn lookup(&self, ip: &IpAddr) -> Option<MacAddr> {
        self.cache.lock().lookup(ip)
    }

    pub fn entry_count(&self) -> usize {
        self.cache.lock().len()
    }

    /// Cache contents as `(ip, mac, last_access)`, oldest first.
    pub fn entries(&self) -> Vec<(IpAddr, MacAddr, u32)> {
        self.cache.lock().entries()
    }

    pub fn flush(&self) {
        self.cache.lock().clear();
    }

    /// Multi-line dump of the cache for diagnostics.
    pub fn dump(&self) -> String {
        let mut out = format!(
            "smac {} entries {} forward-unknown {}\n",
            self.wireless_mac,
            self.entry_count(),
            self.forward_unknown()
        );
        for (ip, mac, stamp) in self.entries() {
            out.push_str(&format!("  {ip} -> {mac} @{stamp:08x}\n"));
        }
        out
    }

    fn unknown_policy(&self) -> Verdict {
        if self.forward_unknown() {
            Verdict::Forward
        } else {
            Verdict::Drop
        }
    }

    /// Inspect a frame travelling from a guest toward the wireless uplink.
    pub fn check_packet_to_host(&self, frame: &[u8]) -> Verdict {
        to_host::check(self, frame)
    }

    /// Inspect a frame travelling from the wireless uplink toward the guests.
    pub fn check_packet_from_host(&self, frame: &[u8], origin: PacketOrigin) -> Verdict {
        from_host::check(self, frame, origin)
    }
}

impl core::fmt::Debug for SmacState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SmacState")
            .field("wireless_mac", &self.wireless_mac)
            .field("entries", &self.entry_count())
            .field("forward_unknown", &self.forward_unknown())
            .finish()
    }
}

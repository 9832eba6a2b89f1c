use std::net::IpAddr;

use vnet_core::MacAddr;

pub const CACHE_BUCKETS: usize = 256;
pub const CACHE_MAX_ENTRIES: usize = 20;

/// Folds every octet of the address into a bucket index.
fn bucket_of(ip: &IpAddr) -> usize {
    let folded = match ip {
        IpAddr::V4(v4) => v4.octets().iter().fold(0u8, |acc, b| acc ^ b),
        IpAddr::V6(v6) => v6.octets().iter().fold(0u8, |acc, b| acc ^ b),
    };
    usize::from(folded) % CACHE_BUCKETS
}

/// Addresses that never identify a single guest.
pub fn is_recordable(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => !(v4.is_unspecified() || v4.is_broadcast() || v4.is_multicast()),
        IpAddr::V6(v6) => !(v6.is_unspecified() || v6.is_multicast()),
    }
}

#[derive(Debug, Clone)]
struct Entry {
    ip: IpAddr,
    mac: MacAddr,
    last_access: u32,
}

/// IP to guest-MAC table with bounded size and LRU eviction.
///
/// The most recently inserted address is held as the cached entry. Adding it
/// again hits a fast path that leaves its timestamp alone. The timestamp is
/// written when another address takes its place.
#[derive(Debug)]
pub struct IpMacCache {
    buckets: Vec<Vec<Entry>>,
    cached: Option<IpAddr>,
    count: usize,
    max_entries: usize,
    last_tick: u32,
}

impl Default for IpMacCache {
    fn default() -> Self {
        Self::new(CACHE_MAX_ENTRIES)
    }
}

impl IpMacCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            buckets: vec![Vec::new(); CACHE_BUCKETS],
            cached: None,
            count: 0,
            max_entries: max_entries.max(1),
            last_tick: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Record that `ip` belongs to `mac` at time `now`.
    pub fn insert(&mut self, ip: IpAddr, mac: MacAddr, now: u32) {
        self.observe(now);

        if self.cached == Some(ip) {
            if let Some(entry) = self.find_mut(&ip) {
                entry.mac = mac;
                return;
            }
        }

        if let Some(prev) = self.cached.replace(ip) {
            if let Some(entry) = self.find_mut(&prev) {
                entry.last_access = now;
            }
        }

        if let Some(entry) = self.find_mut(&ip) {
            entry.mac = mac;
            entry.last_access = now;
            return;
        }

        self.buckets[bucket_of(&ip)].push(Entry { ip, mac, last_access: now });
        self.count += 1;
        if self.count > self.max_entries {
            self.evict_oldest();
        }
    }

    /// Does not refresh the entry's age.
    pub fn lookup(&self, ip: &IpAddr) -> Option<MacAddr> {
        self.buckets[bucket_of(ip)].iter().find(|e| e.ip == *ip).map(|e| e.mac)
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        self.lookup(ip).is_some()
    }

    /// Snapshot as `(ip, mac, last_access)`, oldest first.
    pub fn entries(&self) -> Vec<(IpAddr, MacAddr, u32)> {
        let mut out: Vec<_> = self
            .buckets
            .iter()
            .flatten()
            .map(|e| (e.ip, e.mac, e.last_access))
            .collect();
        out.sort_by_key(|&(_, _, t)| t);
        out
    }

    pub fn clear(&mut self) {
        for bucket in &mut self.buckets {
            bucket.clear();
        }
        self.cached = None;
        self.count = 0;
    }

    fn find_mut(&mut self, ip: &IpAddr) -> Option<&mut Entry> {
        self.buckets[bucket_of(ip)].iter_mut().find(|e| e.ip == *ip)
    }

    /// Handle the tick source wrapping: age every stamp by halving it so the
    /// relative order survives and new readings compare newer.
    fn observe(&mut self, now: u32) {
        if now < self.last_tick {
            for entry in self.buckets.iter_mut().flatten() {
                entry.last_access >>= 1;
            }
        }
        self.last_tick = now;
    }

    fn evict_oldest(&mut self) {
        let cached = self.cached;
        let victim = self
            .buckets
            .iter()
            .enumerate()
            .flat_map(|(b, bucket)| bucket.iter().enumerate().map(move |(i, e)| (b, i, e)))
            .filter(|(_, _, e)| Some(e.ip) != cached)
            .min_by_key(|(_, _, e)| e.last_access)
            .map(|(b, i, _)| (b, i));

        if let Some((b, i)) = victim {
            let gone = self.buckets[b].swap_remove(i);
            self.count -= 1;
            log::trace!("smac cache evicted {} ({})", gone.ip, gone.mac);
        }
    }
}

use core::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use spin::RwLock;
use vnet_core::Packet;
use vnet_event::Mechanism;

/// Bridge reachability as seen through a jack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeStatus {
    NotBridged,
    Up,
    Down,
    /// Some bridges behind a hub are up, others down.
    PartiallyDown,
}

impl BridgeStatus {
    /// Fold two statuses seen behind the same hub.
    pub fn combine(self, other: BridgeStatus) -> BridgeStatus {
        use BridgeStatus::*;
        match (self, other) {
            (NotBridged, s) | (s, NotBridged) => s,
            (Up, Up) => Up,
            (Down, Down) => Down,
            _ => PartiallyDown,
        }
    }
}

impl fmt::Display for BridgeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BridgeStatus::NotBridged => "not-bridged",
            BridgeStatus::Up => "bridged-up",
            BridgeStatus::Down => "bridged-down",
            BridgeStatus::PartiallyDown => "partially-down",
        })
    }
}

/// Behaviour of whatever owns a jack. Every hook has a no-op default.
pub trait JackOps: Send + Sync {
    /// A frame sent by the peer of `jack`.
    fn receive(&self, _jack: &Jack, _packet: Packet) {}

    /// Continue a cycle walk that entered through `jack`. Returns true when
    /// the walk found a cycle.
    fn cycle_detect(&self, _jack: &Jack, _walk: &mut CycleWalk) -> bool {
        false
    }

    /// The number of ports behind the peer of `jack` changed.
    fn ports_changed(&self, _jack: &Jack) {}

    fn is_bridged(&self, _jack: &Jack) -> BridgeStatus {
        BridgeStatus::NotBridged
    }

    /// Event mechanism reachable through this owner, if it has one.
    fn events(&self) -> Option<Arc<Mechanism>> {
        None
    }

    /// Last reference to `jack` is going away.
    fn free(&self, _jack: &Jack) {}
}

pub(crate) struct Link {
    pub(crate) peer: Option<Arc<Jack>>,
    pub(crate) enabled: bool,
}

/// One end of a virtual cable.
///
/// The peer link is only written under the topology mutex; the forwarding
/// path reads it without touching that mutex.
pub struct Jack {
    name: String,
    index: usize,
    pub(crate) link: RwLock<Link>,
    num_ports: AtomicUsize,
    ops: Weak<dyn JackOps>,
}

impl Jack {
    pub(crate) fn new(name: String, index: usize, num_ports: usize, ops: Weak<dyn JackOps>) -> Self {
        Self {
            name,
            index,
            link: RwLock::new(Link { peer: None, enabled: false }),
            num_ports: AtomicUsize::new(num_ports),
            ops,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Position within the owner. Hub slot number for hub jacks.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn peer(&self) -> Option<Arc<Jack>> {
        self.link.read().peer.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.link.read().peer.is_some()
    }

    pub fn peer_name(&self) -> Option<String> {
        self.link.read().peer.as_ref().map(|p| p.name.clone())
    }

    /// Ports reachable through this jack, as advertised to its peer.
    pub fn num_ports(&self) -> usize {
        self.num_ports.load(Ordering::Acquire)
    }

    /// Returns the previous count.
    pub(crate) fn set_num_ports(&self, n: usize) -> usize {
        self.num_ports.swap(n, Ordering::AcqRel)
    }

    pub fn peer_num_ports(&self) -> usize {
        self.link.read().peer.as_ref().map_or(0, |p| p.num_ports())
    }

    /// Forward `packet` to the peer. Dropped when unconnected or disabled.
    pub fn send(&self, packet: Packet) {
        let peer = {
            let link = self.link.read();
            if link.enabled {
                link.peer.clone()
            } else {
                None
            }
        };
        if let Some(peer) = peer {
            peer.deliver(packet);
        }
    }

    fn deliver(&self, packet: Packet) {
        if let Some(ops) = self.ops.upgrade() {
            ops.receive(self, packet);
        }
    }

    pub(crate) fn notify_ports_changed(&self) {
        if let Some(ops) = self.ops.upgrade() {
            ops.ports_changed(self);
        }
    }

    /// Bridge status of this jack's owner, looking away from this jack.
    pub fn is_bridged(&self) -> BridgeStatus {
        self.ops.upgrade().map_or(BridgeStatus::NotBridged, |ops| ops.is_bridged(self))
    }

    pub fn events(&self) -> Option<Arc<Mechanism>> {
        self.ops.upgrade().and_then(|ops| ops.events())
    }
}

impl Drop for Jack {
    fn drop(&mut self) {
        if let Some(ops) = self.ops.upgrade() {
            ops.free(self);
        }
    }
}

impl fmt::Debug for Jack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Jack")
            .field("name", &self.name)
            .field("peer", &self.peer_name())
            .field("num_ports", &self.num_ports())
            .finish()
    }
}

/// State of one connectivity walk. Hubs mark themselves with the walk's
/// generation; host-facing nodes record the interface they sit on.
#[derive(Debug)]
pub struct CycleWalk {
    generation: u32,
    interfaces: Vec<String>,
}

impl CycleWalk {
    pub(crate) fn new(generation: u32) -> Self {
        Self { generation, interfaces: Vec::new() }
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Walk into the owner of `jack`. True when a cycle was found.
    pub fn visit(&mut self, jack: &Jack) -> bool {
        match jack.ops.upgrade() {
            Some(ops) => ops.cycle_detect(jack, self),
            None => false,
        }
    }

    /// Record a host interface reached by the walk. True when the same
    /// interface was already reached, which would loop frames through the host.
    pub fn visit_interface(&mut self, name: &str) -> bool {
        if self.interfaces.iter().any(|n| n == name) {
            return true;
        }
        self.interfaces.push(name.to_string());
        false
    }
}

use core::fmt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use log::{debug, info};
use spin::Mutex;
use vnet_core::{Packet, VnetError, VnetResult};
use vnet_event::Mechanism;

use crate::jack::{BridgeStatus, CycleWalk, Jack, JackOps};

/// Hubs are found either by virtual network number or by a 20-byte group id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HubId {
    Vnet(u32),
    Pvn([u8; 20]),
}

impl HubId {
    /// Low byte used when deriving per-hub addresses.
    pub fn number(&self) -> u8 {
        match self {
            HubId::Vnet(n) => (*n & 0xFF) as u8,
            HubId::Pvn(id) => id[0],
        }
    }
}

impl fmt::Display for HubId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HubId::Vnet(n) => write!(f, "hub{n}"),
            HubId::Pvn(id) => {
                f.write_str("pvn")?;
                for b in &id[..4] {
                    write!(f, "{b:02x}")?;
                }
                Ok(())
            }
        }
    }
}

#[derive(Default)]
struct Slot {
    jack: Weak<Jack>,
    used: bool,
}

/// Fan-out node: a frame entering one slot leaves through every other slot.
pub struct Hub {
    id: HubId,
    slots: Mutex<Vec<Slot>>,
    generation: AtomicU32,
    mechanism: Arc<Mechanism>,
    registry: Weak<HubRegistry>,
    me: Weak<Hub>,
}

impl Hub {
    fn new(id: HubId, ports: usize, registry: Weak<HubRegistry>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            id,
            slots: Mutex::new((0..ports).map(|_| Slot::default()).collect()),
            generation: AtomicU32::new(0),
            mechanism: Mechanism::new(),
            registry,
            me: me.clone(),
        })
    }

    pub fn id(&self) -> HubId {
        self.id
    }

    pub fn name(&self) -> String {
        self.id.to_string()
    }

    pub fn mechanism(&self) -> &Arc<Mechanism> {
        &self.mechanism
    }

    pub fn capacity(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn used_slots(&self) -> usize {
        self.slots.lock().iter().filter(|s| s.used).count()
    }

    /// Live slot jacks, in slot order.
    pub fn jacks(&self) -> Vec<Arc<Jack>> {
        self.slots.lock().iter().filter(|s| s.used).filter_map(|s| s.jack.upgrade()).collect()
    }

    fn claim_slot(&self) -> VnetResult<Arc<Jack>> {
        let mut slots = self.slots.lock();
        let (index, slot) = slots
            .iter_mut()
            .enumerate()
            .find(|(_, s)| !s.used)
            .ok_or(VnetError::HubFull)?;
        let ops: Weak<dyn JackOps> = self.me.clone();
        let jack = Arc::new(Jack::new(format!("{}.{}", self.id, index), index, 0, ops));
        slot.jack = Arc::downgrade(&jack);
        slot.used = true;
        Ok(jack)
    }

    /// A new slot already sees every port behind the others.
    fn seed_num_ports(&self, jack: &Jack) {
        let behind: usize = self
            .others(jack.index())
            .iter()
            .filter_map(|j| j.peer())
            .map(|p| p.num_ports())
            .sum();
        jack.set_num_ports(behind);
    }

    /// Returns true when no slot is in use afterwards.
    fn release_slot(&self, index: usize) -> bool {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get_mut(index) {
            slot.used = false;
            slot.jack = Weak::new();
        }
        slots.iter().all(|s| !s.used)
    }

    /// Live jacks of every used slot except `skip`.
    fn others(&self, skip: usize) -> Vec<Arc<Jack>> {
        self.slots
            .lock()
            .iter()
            .enumerate()
            .filter(|(i, s)| s.used && *i != skip)
            .filter_map(|(_, s)| s.jack.upgrade())
            .collect()
    }

    pub fn status_line(&self) -> String {
        format!(
            "hub {} slots {}/{} listeners {}",
            self.id,
            self.used_slots(),
            self.capacity(),
            self.mechanism.listener_count().unwrap_or(0),
        )
    }
}

impl JackOps for Hub {
    fn receive(&self, jack: &Jack, packet: Packet) {
        for out in self.others(jack.index()) {
            out.send(packet.clone());
        }
    }

    fn cycle_detect(&self, jack: &Jack, walk: &mut CycleWalk) -> bool {
        if self.generation.swap(walk.generation(), Ordering::AcqRel) == walk.generation() {
            return true;
        }
        let peers: Vec<Arc<Jack>> = self.others(jack.index()).iter().filter_map(|j| j.peer()).collect();
        peers.iter().any(|peer| walk.visit(peer))
    }

    fn ports_changed(&self, _jack: &Jack) {
        let jacks = self.others(usize::MAX);
        let peers: Vec<Option<Arc<Jack>>> = jacks.iter().map(|j| j.peer()).collect();
        let counts: Vec<usize> = peers.iter().map(|p| p.as_ref().map_or(0, |p| p.num_ports())).collect();
        let total: usize = counts.iter().sum();

        for ((jack, peer), own) in jacks.iter().zip(&peers).zip(&counts) {
            let n = total - own;
            if jack.set_num_ports(n) != n {
                if let Some(peer) = peer {
                    peer.notify_ports_changed();
                }
            }
        }
    }

    fn is_bridged(&self, jack: &Jack) -> BridgeStatus {
        self.others(jack.index())
            .iter()
            .filter_map(|j| j.peer())
            .fold(BridgeStatus::NotBridged, |acc, peer| acc.combine(peer.is_bridged()))
    }

    fn events(&self) -> Option<Arc<Mechanism>> {
        Some(self.mechanism.clone())
    }

    fn free(&self, jack: &Jack) {
        match self.registry.upgrade() {
            Some(registry) => registry.release(self, jack.index()),
            None => {
                self.release_slot(jack.index());
            }
        }
    }
}

impl fmt::Debug for Hub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hub")
            .field("id", &self.id)
            .field("used", &self.used_slots())
            .finish()
    }
}

/// Live hubs by id. A hub exists while at least one of its slots is in use.
pub struct HubRegistry {
    hubs: Mutex<HashMap<HubId, Arc<Hub>>>,
    ports: usize,
}

impl HubRegistry {
    pub fn new(ports: usize) -> Arc<Self> {
        Arc::new(Self { hubs: Mutex::new(HashMap::new()), ports: ports.max(1) })
    }

    pub fn get(&self, id: &HubId) -> Option<Arc<Hub>> {
        self.hubs.lock().get(id).cloned()
    }

    pub fn hubs(&self) -> Vec<Arc<Hub>> {
        let mut all: Vec<_> = self.hubs.lock().values().cloned().collect();
        all.sort_by_key(|h| h.name());
        all
    }

    /// Claim a free slot on hub `id`, creating the hub on first use. The slot
    /// is released when the returned jack is dropped.
    pub fn alloc_slot(self: &Arc<Self>, id: HubId) -> VnetResult<(Arc<Hub>, Arc<Jack>)> {
        let (hub, jack) = {
            let mut hubs = self.hubs.lock();
            let hub = match hubs.get(&id) {
                Some(hub) => hub.clone(),
                None => {
                    info!("creating {}", id);
                    let hub = Hub::new(id, self.ports, Arc::downgrade(self));
                    hubs.insert(id, hub.clone());
                    hub
                }
            };
            let jack = hub.claim_slot()?;
            (hub, jack)
        };
        // Outside the registry lock: dropping a jack may re-enter `release`.
        hub.seed_num_ports(&jack);
        debug!("allocated slot {}", jack.name());
        Ok((hub, jack))
    }

    fn release(&self, hub: &Hub, index: usize) {
        let removed = {
            let mut hubs = self.hubs.lock();
            if hub.release_slot(index) {
                hubs.remove(&hub.id)
            } else {
                None
            }
        };
        if removed.is_some() {
            info!("{} has no slots in use, removing", hub.id);
        }
    }
}

impl fmt::Debug for HubRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HubRegistry").field("hubs", &self.hubs.lock().len()).finish()
    }
}

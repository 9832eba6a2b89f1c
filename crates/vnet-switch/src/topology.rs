use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use log::{info, warn};
use vnet_core::{VnetError, VnetResult};

use crate::jack::{CycleWalk, Jack};

/// Serializes every structural change to the jack graph.
#[derive(Debug, Default)]
pub struct Topology {
    lock: Mutex<()>,
    generation: AtomicU32,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_generation(&self) -> u32 {
        self.generation.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    /// Plug `a` and `b` together. Fails without changing anything when either
    /// side is already connected or the new cable would close a loop.
    pub fn connect(&self, a: &Arc<Jack>, b: &Arc<Jack>) -> VnetResult<()> {
        if Arc::ptr_eq(a, b) {
            return Err(VnetError::PeerInvalid);
        }
        let _guard = self.guard();
        if a.is_connected() || b.is_connected() {
            return Err(VnetError::PeerInvalid);
        }

        let mut walk = CycleWalk::new(self.next_generation());
        if walk.visit(a) || walk.visit(b) {
            warn!("refusing to connect {} to {}: cycle", a.name(), b.name());
            return Err(VnetError::Cycle);
        }

        {
            let (first, second) = if Arc::as_ptr(a) < Arc::as_ptr(b) { (a, b) } else { (b, a) };
            let mut l1 = first.link.write();
            let mut l2 = second.link.write();
            l1.peer = Some(second.clone());
            l1.enabled = true;
            l2.peer = Some(first.clone());
            l2.enabled = true;
        }

        if b.num_ports() > 0 {
            a.notify_ports_changed();
        }
        if a.num_ports() > 0 {
            b.notify_ports_changed();
        }
        info!("connected {} <-> {}", a.name(), b.name());
        Ok(())
    }

    /// Unplug `jack`. Returns the former peer, if any.
    pub fn disconnect(&self, jack: &Jack) -> Option<Arc<Jack>> {
        let _guard = self.guard();
        let peer = {
            let mut link = jack.link.write();
            link.enabled = false;
            link.peer.take()
        }?;
        let back = {
            let mut link = peer.link.write();
            link.enabled = false;
            link.peer.take()
        };

        if peer.num_ports() > 0 {
            jack.notify_ports_changed();
        }
        if jack.num_ports() > 0 {
            peer.notify_ports_changed();
        }
        info!("disconnected {} <-> {}", jack.name(), peer.name());
        drop(back);
        Some(peer)
    }
}

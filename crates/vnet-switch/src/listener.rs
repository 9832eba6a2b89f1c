use std::sync::{Arc, Weak};

use log::debug;
use spin::Mutex;
use vnet_core::{MacAddr, VnetError, VnetResult};
use vnet_event::{Event, Listener};

use crate::jack::{Jack, JackOps};
use crate::port::{Port, PortKind, PortStats};
use crate::queue::ReadQueue;
use crate::topology::Topology;
use crate::Node;

/// Occupies a hub slot to receive that hub's events as serialized records.
/// Frames reaching the slot are ignored.
pub struct UserListener {
    port: Arc<Port>,
    topology: Arc<Topology>,
    queue: Arc<ReadQueue<Vec<u8>>>,
    class_mask: u32,
    listener: Mutex<Option<Listener>>,
}

impl UserListener {
    pub(crate) fn new(name: String, topology: Arc<Topology>, class_mask: u32, queue_len: usize) -> Arc<Self> {
        Arc::new_cyclic(|me: &Weak<UserListener>| {
            let ops: Weak<dyn JackOps> = me.clone();
            Self {
                port: Arc::new(Port::new(PortKind::Listener, Jack::new(name, 0, 0, ops), MacAddr::ZERO)),
                topology,
                queue: Arc::new(ReadQueue::new(queue_len)),
                class_mask,
                listener: Mutex::new(None),
            }
        })
    }

    /// Register on the mechanism of the hub this listener is plugged into.
    /// Buffered state is queued before this returns.
    pub(crate) fn subscribe(&self) -> VnetResult<()> {
        let mech = self
            .port
            .jack()
            .peer()
            .and_then(|peer| peer.events())
            .ok_or(VnetError::PeerInvalid)?;
        let queue = self.queue.clone();
        let port = self.port.clone();
        let listener = Listener::create(&mech, self.class_mask, move |event: &Event| {
            match queue.push(event.to_bytes()) {
                Ok(_) => PortStats::bump(&port.stats.queued),
                Err(_) => {
                    debug!("{}: event queue full", port.name());
                    PortStats::bump(&port.stats.dropped_full);
                }
            }
        })?;
        *self.listener.lock() = Some(listener);
        Ok(())
    }

    pub fn jack(&self) -> &Arc<Jack> {
        self.port.jack()
    }

    pub fn class_mask(&self) -> u32 {
        self.class_mask
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn poll(&self) -> bool {
        self.queue.len() > 0
    }

    /// Copy the oldest queued event record into `buf`.
    pub fn read(&self, buf: &mut [u8], nonblocking: bool) -> nb::Result<usize, VnetError> {
        let (n, _) = self.queue.read(buf, nonblocking)?;
        PortStats::bump(&self.port.stats.read);
        Ok(n)
    }

    pub fn interrupt(&self) {
        self.queue.interrupt();
    }
}

impl JackOps for UserListener {}

impl Node for UserListener {
    fn port(&self) -> &Arc<Port> {
        &self.port
    }

    fn status_line(&self) -> String {
        let extra = format!("classes {:#x} queue {}/{}", self.class_mask, self.queue.len(), self.queue.capacity());
        self.port.status_line(&extra)
    }
}

impl Drop for UserListener {
    fn drop(&mut self) {
        self.listener.lock().take();
        self.topology.disconnect(self.port.jack());
    }
}

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use log::debug;
use spin::Mutex;
use vnet_core::{
    MacAddr, Packet, VnetError, VnetResult, ETH_MIN_FRAME_LEN, MAX_QUEUED_FRAME_LEN,
};
use vnet_event::EVENT_CLASS_UPLINK;

use crate::jack::{Jack, JackOps};
use crate::link_state::LinkStatePublisher;
use crate::port::{Port, PortKind, PortStats};
use crate::queue::ReadQueue;
use crate::topology::Topology;
use crate::Node;

/// Shared words an external scheduler watches instead of waiting on the
/// queue. Once `cluster_size` frames are queued, `pending_mask` is set in
/// `pending` and bit `action_id` in `actions`. `pending_mask` is cleared
/// again when a read empties the queue.
#[derive(Debug, Clone)]
pub struct Notify {
    pub pending: Arc<AtomicU32>,
    pub pending_mask: u32,
    pub actions: Arc<AtomicU64>,
    pub action_id: u32,
    pub cluster_size: usize,
}

/// A port read and written by a user-space process.
pub struct UserIf {
    port: Arc<Port>,
    topology: Arc<Topology>,
    queue: ReadQueue<Packet>,
    notify: Mutex<Option<Notify>>,
    link_state: LinkStatePublisher,
}

impl UserIf {
    pub(crate) fn new(name: String, topology: Arc<Topology>, queue_len: usize) -> Arc<Self> {
        Arc::new_cyclic(|me: &Weak<UserIf>| {
            let ops: Weak<dyn JackOps> = me.clone();
            Self {
                port: Arc::new(Port::new(PortKind::UserIf, Jack::new(name, 0, 1, ops), MacAddr::ZERO)),
                topology,
                queue: ReadQueue::new(queue_len),
                notify: Mutex::new(None),
                link_state: LinkStatePublisher::default(),
            }
        })
    }

    pub fn jack(&self) -> &Arc<Jack> {
        self.port.jack()
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn poll(&self) -> bool {
        self.queue.len() > 0
    }

    /// Take the oldest queued frame. With `nonblocking` unset the call
    /// waits for a frame or an [`UserIf::interrupt`].
    pub fn read(&self, buf: &mut [u8], nonblocking: bool) -> nb::Result<usize, VnetError> {
        let (n, remaining) = self.queue.read(buf, nonblocking)?;
        PortStats::bump(&self.port.stats.read);
        if remaining == 0 {
            if let Some(notify) = self.notify.lock().as_ref() {
                notify.pending.fetch_and(!notify.pending_mask, Ordering::AcqRel);
            }
        }
        Ok(n)
    }

    pub fn interrupt(&self) {
        self.queue.interrupt();
    }

    /// Send a frame into the fabric. Frames written while the port is down
    /// are accepted and discarded.
    pub fn write(&self, frame: &[u8]) -> VnetResult<()> {
        if frame.len() < ETH_MIN_FRAME_LEN || frame.len() > MAX_QUEUED_FRAME_LEN {
            return Err(VnetError::FrameSize(frame.len()));
        }
        if !self.port.is_up() {
            PortStats::bump(&self.port.stats.dropped_down);
            return Ok(());
        }
        PortStats::bump(&self.port.stats.written);
        self.port.jack().send(Packet::from_slice(frame));
        Ok(())
    }

    pub fn set_notify(&self, notify: Option<Notify>) -> VnetResult<()> {
        if let Some(n) = &notify {
            if n.action_id >= 64 {
                return Err(VnetError::InvalidArgument("action id out of range"));
            }
            if n.cluster_size == 0 {
                return Err(VnetError::InvalidArgument("cluster size must be positive"));
            }
        }
        *self.notify.lock() = notify;
        Ok(())
    }

    /// Publish a link-state event on the hub this port is plugged into.
    pub fn inject_link_state(&self, adapter: u32, up: bool) -> VnetResult<()> {
        self.link_state.publish(self.port.jack(), EVENT_CLASS_UPLINK, adapter, up)
    }

    fn signal(&self, queued: usize) {
        if let Some(notify) = self.notify.lock().as_ref() {
            if queued >= notify.cluster_size {
                notify.pending.fetch_or(notify.pending_mask, Ordering::AcqRel);
                notify.actions.fetch_or(1 << notify.action_id, Ordering::AcqRel);
            }
        }
    }
}

impl JackOps for UserIf {
    fn receive(&self, _jack: &Jack, packet: Packet) {
        let stats = &self.port.stats;
        if !self.port.is_up() {
            PortStats::bump(&stats.dropped_down);
            return;
        }
        let admitted = packet.dest().is_some_and(|dest| self.port.accepts(&dest));
        if !admitted {
            PortStats::bump(&stats.dropped_filter);
            return;
        }
        if packet.len() > MAX_QUEUED_FRAME_LEN {
            PortStats::bump(&stats.dropped_oversize);
            return;
        }
        match self.queue.push(packet) {
            Ok(queued) => {
                PortStats::bump(&stats.queued);
                self.signal(queued);
            }
            Err(_) => {
                debug!("{}: queue full, dropping frame", self.port.name());
                PortStats::bump(&stats.dropped_full);
            }
        }
    }
}

impl Node for UserIf {
    fn port(&self) -> &Arc<Port> {
        &self.port
    }

    fn status_line(&self) -> String {
        let extra = format!("queue {}/{}", self.queue.len(), self.queue.capacity());
        self.port.status_line(&extra)
    }
}

impl Drop for UserIf {
    fn drop(&mut self) {
        self.topology.disconnect(self.port.jack());
        self.queue.clear();
    }
}

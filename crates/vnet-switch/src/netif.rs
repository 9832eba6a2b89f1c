use std::sync::{Arc, Weak};

use vnet_core::{MacAddr, Packet, VnetError, VnetResult, ETH_MIN_FRAME_LEN, MAX_QUEUED_FRAME_LEN, VMX_OUI};
use vnet_hal::HostStack;

use crate::jack::{CycleWalk, Jack, JackOps};
use crate::port::{Port, PortKind, PortStats};
use crate::topology::Topology;
use crate::Node;

/// Address of the host-only adapter on hub number `hub`.
pub fn netif_addr(hub: u8) -> MacAddr {
    MacAddr::new([VMX_OUI[0], VMX_OUI[1], VMX_OUI[2], 0xC0, 0x00, hub])
}

/// Synthetic host adapter: frames admitted by the filter go to the host
/// network stack, frames from the host stack go into the fabric.
pub struct NetIf {
    port: Arc<Port>,
    topology: Arc<Topology>,
    stack: Arc<dyn HostStack>,
}

impl NetIf {
    pub(crate) fn new(name: String, topology: Arc<Topology>, stack: Arc<dyn HostStack>, addr: MacAddr) -> Arc<Self> {
        Arc::new_cyclic(|me: &Weak<NetIf>| {
            let ops: Weak<dyn JackOps> = me.clone();
            Self {
                port: Arc::new(Port::new(PortKind::NetIf, Jack::new(name, 0, 1, ops), addr)),
                topology,
                stack,
            }
        })
    }

    pub fn jack(&self) -> &Arc<Jack> {
        self.port.jack()
    }

    pub fn stack_name(&self) -> &str {
        self.stack.name()
    }

    /// A frame the host stack wants to put on this virtual network.
    pub fn transmit_from_host(&self, packet: Packet) -> VnetResult<()> {
        if packet.len() < ETH_MIN_FRAME_LEN || packet.len() > MAX_QUEUED_FRAME_LEN {
            return Err(VnetError::FrameSize(packet.len()));
        }
        if !self.port.is_up() {
            PortStats::bump(&self.port.stats.dropped_down);
            return Ok(());
        }
        PortStats::bump(&self.port.stats.written);
        self.port.jack().send(packet);
        Ok(())
    }
}

impl JackOps for NetIf {
    fn receive(&self, _jack: &Jack, packet: Packet) {
        if !self.port.is_up() {
            PortStats::bump(&self.port.stats.dropped_down);
            return;
        }
        if !packet.dest().is_some_and(|dest| self.port.accepts(&dest)) {
            PortStats::bump(&self.port.stats.dropped_filter);
            return;
        }
        PortStats::bump(&self.port.stats.forwarded);
        self.stack.deliver(packet);
    }

    fn cycle_detect(&self, _jack: &Jack, walk: &mut CycleWalk) -> bool {
        walk.visit_interface(self.stack.name())
    }
}

impl Node for NetIf {
    fn port(&self) -> &Arc<Port> {
        &self.port
    }

    fn status_line(&self) -> String {
        self.port.status_line(&format!("host {}", self.stack.name()))
    }
}

impl Drop for NetIf {
    fn drop(&mut self) {
        self.topology.disconnect(self.port.jack());
    }
}

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};

use log::{debug, info, warn};
use spin::{Mutex, RwLock};
use vnet_core::{MacAddr, Packet, VnetError, VnetResult, BRIDGE_HISTORY_LEN};
use vnet_event::EVENT_CLASS_BRIDGE;
use vnet_hal::{DeviceRxHandler, HostDevice, HostDeviceRegistry, PacketOrigin, TickSource};
use vnet_smac::{SmacState, Verdict};

use crate::jack::{BridgeStatus, CycleWalk, Jack, JackOps};
use crate::link_state::LinkStatePublisher;
use crate::port::{Port, PortKind, PortStats};
use crate::topology::Topology;
use crate::Node;

/// Binding to the host device while the bridge is up.
struct Active {
    device: Arc<dyn HostDevice>,
    smac: Option<Arc<SmacState>>,
    promisc: bool,
}

/// Frames recently handed to the host stack. The device reports them back
/// and they must not re-enter the fabric.
struct History {
    slots: Vec<Option<Packet>>,
}

impl History {
    fn new() -> Self {
        Self { slots: vec![None; BRIDGE_HISTORY_LEN] }
    }

    /// Record `packet`. Returns the entry evicted from slot 0 when full.
    fn record(&mut self, packet: Packet) -> Option<Packet> {
        if let Some(free) = self.slots.iter_mut().find(|s| s.is_none()) {
            *free = Some(packet);
            return None;
        }
        let evicted = self.slots[0].take();
        self.slots.rotate_left(1);
        if let Some(last) = self.slots.last_mut() {
            *last = Some(packet);
        }
        evicted
    }

    /// Remove and return the entry sharing `packet`'s buffer.
    fn take_match(&mut self, packet: &Packet) -> Option<Packet> {
        self.slots
            .iter_mut()
            .find(|s| s.as_ref().is_some_and(|p| p.is_clone_of(packet)))
            .and_then(Option::take)
    }

    fn clear(&mut self) -> Vec<Packet> {
        self.slots.iter_mut().filter_map(Option::take).collect()
    }

    fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

/// Connects the fabric to a physical host adapter.
pub struct Bridge {
    port: Arc<Port>,
    topology: Arc<Topology>,
    device_name: String,
    devices: Arc<dyn HostDeviceRegistry>,
    clock: Arc<dyn TickSource>,
    force_smac: bool,
    forward_unknown: bool,
    adapter: AtomicU32,
    control: StdMutex<()>,
    active: RwLock<Option<Active>>,
    history: Mutex<History>,
    link_state: LinkStatePublisher,
    me: Weak<Bridge>,
}

pub(crate) struct BridgeParams {
    pub name: String,
    pub device_name: String,
    pub devices: Arc<dyn HostDeviceRegistry>,
    pub clock: Arc<dyn TickSource>,
    pub force_smac: bool,
    pub forward_unknown: bool,
}

impl Bridge {
    pub(crate) fn new(params: BridgeParams, topology: Arc<Topology>) -> Arc<Self> {
        let addr = params.devices.lookup(&params.device_name).map_or(MacAddr::ZERO, |d| d.hw_addr());
        Arc::new_cyclic(|me: &Weak<Bridge>| {
            let ops: Weak<dyn JackOps> = me.clone();
            Self {
                port: Arc::new(Port::new(PortKind::Bridge, Jack::new(params.name, 0, 1, ops), addr)),
                topology,
                device_name: params.device_name,
                devices: params.devices,
                clock: params.clock,
                force_smac: params.force_smac,
                forward_unknown: params.forward_unknown,
                adapter: AtomicU32::new(0),
                control: StdMutex::new(()),
                active: RwLock::new(None),
                history: Mutex::new(History::new()),
                link_state: LinkStatePublisher::default(),
                me: me.clone(),
            }
        })
    }

    pub fn jack(&self) -> &Arc<Jack> {
        self.port.jack()
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn is_up(&self) -> bool {
        self.active.read().is_some()
    }

    pub fn is_promiscuous(&self) -> bool {
        self.active.read().as_ref().is_some_and(|a| a.promisc)
    }

    /// Substitution state while bridged to a wireless (or forced) device.
    pub fn smac(&self) -> Option<Arc<SmacState>> {
        self.active.read().as_ref().and_then(|a| a.smac.clone())
    }

    pub fn history_len(&self) -> usize {
        self.history.lock().len()
    }

    /// Bind to the host device. A device that exists but is down leaves the
    /// bridge down with [`VnetError::DeviceDown`].
    pub fn up(&self) -> VnetResult<()> {
        let _control = self.control.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if self.active.read().is_some() {
            return Ok(());
        }
        let device = self
            .devices
            .lookup(&self.device_name)
            .ok_or_else(|| VnetError::DeviceNotFound(self.device_name.clone()))?;
        if !device.is_ethernet() {
            return Err(VnetError::NotEthernet(self.device_name.clone()));
        }
        self.adapter.store(device.index(), Ordering::Relaxed);
        if !device.is_up() {
            return Err(VnetError::DeviceDown(self.device_name.clone()));
        }

        let smac = if device.is_wireless() || self.force_smac {
            let state = SmacState::new(device.hw_addr(), self.clock.clone());
            state.set_forward_unknown(self.forward_unknown);
            Some(Arc::new(state))
        } else {
            None
        };

        let handler: Weak<dyn DeviceRxHandler> = self.me.clone();
        device.register_handler(handler)?;

        let promisc = self.port.jack().peer_num_ports() > 0;
        if promisc {
            if let Err(e) = device.set_promiscuous(true) {
                device.unregister_handler();
                return Err(e);
            }
        }
        self.port.set_addr(device.hw_addr());
        info!(
            "{}: bridged to {}{}{}",
            self.port.name(),
            self.device_name,
            if smac.is_some() { " with mac substitution" } else { "" },
            if promisc { ", promiscuous" } else { "" },
        );
        *self.active.write() = Some(Active { device, smac, promisc });
        Ok(())
    }

    /// Release the host device.
    pub fn down(&self) {
        let _control = self.control.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(active) = self.active.write().take() else {
            return;
        };
        if active.promisc {
            if let Err(e) = active.device.set_promiscuous(false) {
                warn!("{}: leaving promiscuous mode failed: {}", self.device_name, e);
            }
        }
        active.device.unregister_handler();
        let flushed = self.history.lock().clear();
        drop(flushed);
        info!("{}: unbridged from {}", self.port.name(), self.device_name);
    }

    /// Host notification that the device went up or down.
    pub fn device_state_changed(&self, up: bool) {
        if up {
            if let Err(e) = self.up() {
                warn!("{}: cannot bridge to {}: {}", self.port.name(), self.device_name, e);
            }
        } else {
            self.down();
        }
        let adapter = self.adapter.load(Ordering::Relaxed);
        if let Err(e) = self.link_state.publish(self.port.jack(), EVENT_CLASS_BRIDGE, adapter, self.is_up()) {
            debug!("{}: link state not published: {}", self.port.name(), e);
        }
    }

    fn snapshot(&self) -> Option<(Arc<dyn HostDevice>, Option<Arc<SmacState>>)> {
        self.active.read().as_ref().map(|a| (a.device.clone(), a.smac.clone()))
    }

    fn remember(&self, packet: Packet) {
        let evicted = self.history.lock().record(packet);
        drop(evicted);
    }

    fn apply(verdict: Verdict, packet: Packet) -> Option<Packet> {
        match verdict {
            Verdict::Forward => Some(packet),
            Verdict::Drop => None,
            Verdict::Rewrite(frame) => Some(Packet::new(frame)),
        }
    }
}

impl JackOps for Bridge {
    /// Fabric to host.
    fn receive(&self, _jack: &Jack, packet: Packet) {
        let stats = &self.port.stats;
        let Some((device, smac)) = self.snapshot() else {
            PortStats::bump(&stats.dropped_down);
            return;
        };
        let packet = match &smac {
            Some(smac) => {
                let verdict = smac.check_packet_to_host(packet.as_bytes());
                match Self::apply(verdict, packet) {
                    Some(p) => p,
                    None => {
                        PortStats::bump(&stats.dropped_filter);
                        return;
                    }
                }
            }
            None => packet,
        };
        let Some(dest) = packet.dest() else {
            PortStats::bump(&stats.dropped_filter);
            return;
        };

        let host = device.hw_addr();
        if dest == host || dest.is_multicast() {
            let copy = packet.clone();
            self.remember(copy.clone());
            device.deliver_to_host(copy);
        }
        if dest != host {
            if let Err(e) = device.transmit(packet) {
                debug!("{}: transmit on {} failed: {}", self.port.name(), self.device_name, e);
                PortStats::bump(&stats.dropped_full);
                return;
            }
        }
        PortStats::bump(&stats.forwarded);
    }

    fn cycle_detect(&self, _jack: &Jack, walk: &mut CycleWalk) -> bool {
        walk.visit_interface(&self.device_name)
    }

    fn ports_changed(&self, jack: &Jack) {
        let want = jack.peer_num_ports() > 0;
        let _control = self.control.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let device = match self.active.read().as_ref() {
            Some(a) if a.promisc != want => a.device.clone(),
            _ => return,
        };
        match device.set_promiscuous(want) {
            Ok(()) => {
                if let Some(active) = self.active.write().as_mut() {
                    active.promisc = want;
                }
                debug!("{}: promiscuous {}", self.device_name, if want { "on" } else { "off" });
            }
            Err(e) => warn!("{}: promiscuous change failed: {}", self.device_name, e),
        }
    }

    fn is_bridged(&self, _jack: &Jack) -> BridgeStatus {
        if self.is_up() {
            BridgeStatus::Up
        } else {
            BridgeStatus::Down
        }
    }
}

impl DeviceRxHandler for Bridge {
    /// Host to fabric.
    fn receive_from_device(&self, packet: Packet, origin: PacketOrigin) {
        let echo = self.history.lock().take_match(&packet);
        if echo.is_some() {
            return;
        }
        let Some((_, smac)) = self.snapshot() else {
            return;
        };
        let packet = match &smac {
            Some(smac) => {
                let verdict = smac.check_packet_from_host(packet.as_bytes(), origin);
                match Self::apply(verdict, packet) {
                    Some(p) => p,
                    None => {
                        PortStats::bump(&self.port.stats.dropped_filter);
                        return;
                    }
                }
            }
            None => packet,
        };
        PortStats::bump(&self.port.stats.written);
        self.port.jack().send(packet);
    }
}

impl Node for Bridge {
    fn port(&self) -> &Arc<Port> {
        &self.port
    }

    fn status_line(&self) -> String {
        let mut extra = format!(
            "device {} {}{}",
            self.device_name,
            if self.is_up() { "up" } else { "down" },
            if self.is_promiscuous() { " promisc" } else { "" },
        );
        if let Some(smac) = self.smac() {
            extra.push_str(&format!(" smac {} entries", smac.entry_count()));
        }
        self.port.status_line(&extra)
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.down();
        self.topology.disconnect(self.port.jack());
    }
}

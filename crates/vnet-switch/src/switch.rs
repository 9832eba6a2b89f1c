use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use log::{info, warn};
use spin::Mutex;
use vnet_core::{ExactFilter, IfFlags, Ladrf, MacAddr, VnetError, VnetResult};
use vnet_hal::{HostDeviceRegistry, HostStack, TickSource};

use crate::bridge::{Bridge, BridgeParams};
use crate::config::SwitchConfig;
use crate::hub::{Hub, HubId, HubRegistry};
use crate::jack::{BridgeStatus, Jack};
use crate::listener::UserListener;
use crate::netif::{netif_addr, NetIf};
use crate::port::Port;
use crate::topology::Topology;
use crate::userif::UserIf;
use crate::Node;

/// Control surface of one virtual switch instance.
pub struct Switch {
    config: SwitchConfig,
    topology: Arc<Topology>,
    hubs: Arc<HubRegistry>,
    devices: Arc<dyn HostDeviceRegistry>,
    clock: Arc<dyn TickSource>,
    nodes: Mutex<Vec<Weak<dyn Node>>>,
    next_id: AtomicU32,
}

impl Switch {
    pub fn new(config: SwitchConfig, devices: Arc<dyn HostDeviceRegistry>, clock: Arc<dyn TickSource>) -> Self {
        Self {
            hubs: HubRegistry::new(config.hub_ports),
            config,
            topology: Arc::new(Topology::new()),
            devices,
            clock,
            nodes: Mutex::new(Vec::new()),
            next_id: AtomicU32::new(0),
        }
    }

    pub fn config(&self) -> &SwitchConfig {
        &self.config
    }

    pub fn hub(&self, id: HubId) -> Option<Arc<Hub>> {
        self.hubs.get(&id)
    }

    pub fn hubs(&self) -> Vec<Arc<Hub>> {
        self.hubs.hubs()
    }

    fn next_name(&self, kind: &str) -> String {
        format!("{}{}", kind, self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn register<N: Node + 'static>(&self, node: &Arc<N>) {
        let weak: Weak<dyn Node> = Arc::downgrade(node) as Weak<dyn Node>;
        let mut nodes = self.nodes.lock();
        nodes.retain(|n| n.strong_count() > 0);
        nodes.push(weak);
    }

    fn live_nodes(&self) -> Vec<Arc<dyn Node>> {
        self.nodes.lock().iter().filter_map(Weak::upgrade).collect()
    }

    /// Claim a bare slot on hub `id`, for cabling hubs together with
    /// [`Switch::connect`]. The slot is released when the jack is dropped
    /// while unconnected, or when its cable is removed.
    pub fn hub_slot(&self, id: HubId) -> VnetResult<Arc<Jack>> {
        self.hubs.alloc_slot(id).map(|(_, jack)| jack)
    }

    /// New user-space port plugged into hub `id`.
    pub fn attach_userif(&self, id: HubId) -> VnetResult<Arc<UserIf>> {
        let (_, slot) = self.hubs.alloc_slot(id)?;
        let userif = UserIf::new(self.next_name("userif"), self.topology.clone(), self.config.userif_queue_len);
        self.topology.connect(userif.jack(), &slot)?;
        self.register(&userif);
        Ok(userif)
    }

    /// Bridge host device `device` onto hub `id`. A device that is down is
    /// not an error: the bridge comes up on the next state change.
    pub fn attach_bridge(&self, id: HubId, device: &str, force_smac: bool) -> VnetResult<Arc<Bridge>> {
        let (_, slot) = self.hubs.alloc_slot(id)?;
        let params = BridgeParams {
            name: self.next_name("bridge"),
            device_name: device.to_string(),
            devices: self.devices.clone(),
            clock: self.clock.clone(),
            force_smac,
            forward_unknown: self.config.smac_forward_unknown,
        };
        let bridge = Bridge::new(params, self.topology.clone());
        self.topology.connect(bridge.jack(), &slot)?;
        match bridge.up() {
            Ok(()) => {}
            Err(VnetError::DeviceDown(name)) => info!("{} is down, bridge waits for it", name),
            Err(e) => return Err(e),
        }
        self.register(&bridge);
        Ok(bridge)
    }

    /// Host-only adapter on hub `id`, delivering into `stack`.
    pub fn attach_netif(&self, id: HubId, stack: Arc<dyn HostStack>) -> VnetResult<Arc<NetIf>> {
        let (_, slot) = self.hubs.alloc_slot(id)?;
        let addr = stack.hw_addr().unwrap_or_else(|| netif_addr(id.number()));
        let netif = NetIf::new(self.next_name("netif"), self.topology.clone(), stack, addr);
        self.topology.connect(netif.jack(), &slot)?;
        self.register(&netif);
        Ok(netif)
    }

    /// Event listener on hub `id` for classes in `class_mask`.
    pub fn attach_listener(&self, id: HubId, class_mask: u32) -> VnetResult<Arc<UserListener>> {
        let (_, slot) = self.hubs.alloc_slot(id)?;
        let listener = UserListener::new(
            self.next_name("listener"),
            self.topology.clone(),
            class_mask,
            self.config.listener_queue_len,
        );
        self.topology.connect(listener.jack(), &slot)?;
        listener.subscribe()?;
        self.register(&listener);
        Ok(listener)
    }

    pub fn connect(&self, a: &Arc<Jack>, b: &Arc<Jack>) -> VnetResult<()> {
        self.topology.connect(a, b)
    }

    /// Remove the cable at `jack`. Returns false when it was not connected.
    pub fn disconnect(&self, jack: &Jack) -> bool {
        self.topology.disconnect(jack).is_some()
    }

    /// Change a port's hardware address. No two live ports share a
    /// non-zero address.
    pub fn set_mac(&self, port: &Port, addr: MacAddr) -> VnetResult<()> {
        let nodes = self.nodes.lock();
        if addr != MacAddr::ZERO {
            let taken = nodes
                .iter()
                .filter_map(Weak::upgrade)
                .any(|n| !core::ptr::eq(n.port().as_ref(), port) && n.port().addr() == addr);
            if taken {
                warn!("{}: address {} already in use", port.name(), addr);
                return Err(VnetError::AddressInUse(addr));
            }
        }
        port.set_addr(addr);
        Ok(())
    }

    pub fn set_multicast(&self, port: &Port, exact: &[MacAddr], ladrf: Ladrf) -> VnetResult<()> {
        let exact = ExactFilter::new(exact)?;
        port.set_multicast(exact, ladrf);
        Ok(())
    }

    pub fn set_flags(&self, port: &Port, flags: IfFlags) {
        port.set_flags(flags);
    }

    /// What lies beyond `jack`'s cable, bridge-wise.
    pub fn bridge_status(&self, jack: &Jack) -> BridgeStatus {
        jack.peer().map_or(BridgeStatus::NotBridged, |peer| peer.is_bridged())
    }

    /// One line per hub, then one per live node.
    pub fn status_report(&self) -> String {
        let mut out = String::new();
        for hub in self.hubs.hubs() {
            out.push_str(&hub.status_line());
            out.push('\n');
        }
        for node in self.live_nodes() {
            out.push_str(&node.status_line());
            out.push('\n');
        }
        out
    }
}

impl core::fmt::Debug for Switch {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Switch")
            .field("config", &self.config)
            .field("hubs", &self.hubs)
            .finish_non_exhaustive()
    }
}

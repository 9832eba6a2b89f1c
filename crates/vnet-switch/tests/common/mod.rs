#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};

use vnet_core::{MacAddr, Packet, VnetError, VnetResult};
use vnet_hal::{DeviceRxHandler, HostDevice, HostDeviceRegistry, HostStack, PacketOrigin, TickSource};
use vnet_switch::{Switch, SwitchConfig};

pub const MAC1: MacAddr = MacAddr::new([0xAA, 0xBB, 0xCC, 0x00, 0x00, 0x01]);
pub const MAC2: MacAddr = MacAddr::new([0xAA, 0xBB, 0xCC, 0x00, 0x00, 0x02]);
pub const MAC3: MacAddr = MacAddr::new([0xAA, 0xBB, 0xCC, 0x00, 0x00, 0x03]);
pub const HOST_MAC: MacAddr = MacAddr::new([0x02, 0x00, 0x00, 0x00, 0x00, 0x10]);
pub const WIRE_MAC: MacAddr = MacAddr::new([0x02, 0x00, 0x00, 0x00, 0x00, 0x99]);

pub fn frame(dst: MacAddr, src: MacAddr, ether_type: u16, payload_len: usize) -> Vec<u8> {
    let mut f = Vec::with_capacity(14 + payload_len);
    f.extend_from_slice(&dst.octets());
    f.extend_from_slice(&src.octets());
    f.extend_from_slice(&ether_type.to_be_bytes());
    f.extend((0..payload_len).map(|i| i as u8));
    f
}

pub struct FakeDevice {
    pub name: String,
    pub index: u32,
    pub mac: MacAddr,
    pub ethernet: bool,
    pub wireless: bool,
    pub up: AtomicBool,
    pub promisc: AtomicBool,
    pub transmitted: Mutex<Vec<Packet>>,
    pub delivered: Mutex<Vec<Packet>>,
    handler: Mutex<Option<Weak<dyn DeviceRxHandler>>>,
}

impl FakeDevice {
    pub fn new(name: &str, index: u32, mac: MacAddr) -> Arc<Self> {
        Self::build(name, index, mac, true, false)
    }

    pub fn wireless(name: &str, index: u32, mac: MacAddr) -> Arc<Self> {
        Self::build(name, index, mac, true, true)
    }

    pub fn build(name: &str, index: u32, mac: MacAddr, ethernet: bool, wireless: bool) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            index,
            mac,
            ethernet,
            wireless,
            up: AtomicBool::new(true),
            promisc: AtomicBool::new(false),
            transmitted: Mutex::new(Vec::new()),
            delivered: Mutex::new(Vec::new()),
            handler: Mutex::new(None),
        })
    }

    /// Hand a frame to the registered handler, as the host would.
    pub fn inject(&self, packet: Packet, origin: PacketOrigin) {
        let handler = self.handler.lock().unwrap().as_ref().and_then(|w| w.upgrade());
        if let Some(h) = handler {
            h.receive_from_device(packet, origin);
        }
    }

    pub fn has_handler(&self) -> bool {
        self.handler.lock().unwrap().is_some()
    }

    pub fn is_promisc(&self) -> bool {
        self.promisc.load(Ordering::SeqCst)
    }
}

impl HostDevice for FakeDevice {
    fn name(&self) -> &str {
        &self.name
    }
    fn index(&self) -> u32 {
        self.index
    }
    fn hw_addr(&self) -> MacAddr {
        self.mac
    }
    fn is_ethernet(&self) -> bool {
        self.ethernet
    }
    fn is_up(&self) -> bool {
        self.up.load(Ordering::SeqCst)
    }
    fn is_wireless(&self) -> bool {
        self.wireless
    }
    fn transmit(&self, packet: Packet) -> VnetResult<()> {
        if !self.is_up() {
            return Err(VnetError::DeviceDown(self.name.clone()));
        }
        self.transmitted.lock().unwrap().push(packet);
        Ok(())
    }
    fn deliver_to_host(&self, packet: Packet) {
        self.delivered.lock().unwrap().push(packet);
    }
    fn set_promiscuous(&self, enable: bool) -> VnetResult<()> {
        self.promisc.store(enable, Ordering::SeqCst);
        Ok(())
    }
    fn register_handler(&self, handler: Weak<dyn DeviceRxHandler>) -> VnetResult<()> {
        *self.handler.lock().unwrap() = Some(handler);
        Ok(())
    }
    fn unregister_handler(&self) {
        *self.handler.lock().unwrap() = None;
    }
}

#[derive(Default)]
pub struct FakeRegistry {
    devices: Mutex<Vec<Arc<FakeDevice>>>,
}

impl FakeRegistry {
    pub fn with(devices: &[Arc<FakeDevice>]) -> Arc<Self> {
        Arc::new(Self { devices: Mutex::new(devices.to_vec()) })
    }
}

impl HostDeviceRegistry for FakeRegistry {
    fn lookup(&self, name: &str) -> Option<Arc<dyn HostDevice>> {
        self.devices
            .lock()
            .unwrap()
            .iter()
            .find(|d| d.name == name)
            .map(|d| d.clone() as Arc<dyn HostDevice>)
    }
}

pub struct Ticks(pub AtomicU32);

impl TickSource for Ticks {
    fn ticks(&self) -> u32 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

pub struct RecordingStack {
    pub name: String,
    pub addr: Option<MacAddr>,
    pub frames: Mutex<Vec<Packet>>,
}

impl RecordingStack {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self { name: name.to_string(), addr: None, frames: Mutex::new(Vec::new()) })
    }

    pub fn with_addr(name: &str, addr: MacAddr) -> Arc<Self> {
        Arc::new(Self { name: name.to_string(), addr: Some(addr), frames: Mutex::new(Vec::new()) })
    }
}

impl HostStack for RecordingStack {
    fn name(&self) -> &str {
        &self.name
    }
    fn deliver(&self, packet: Packet) {
        self.frames.lock().unwrap().push(packet);
    }
    fn hw_addr(&self) -> Option<MacAddr> {
        self.addr
    }
}

pub fn switch_with(config: SwitchConfig, devices: &[Arc<FakeDevice>]) -> Switch {
    Switch::new(config, FakeRegistry::with(devices), Arc::new(Ticks(AtomicU32::new(1))))
}

pub fn switch() -> Switch {
    switch_with(SwitchConfig::default(), &[])
}

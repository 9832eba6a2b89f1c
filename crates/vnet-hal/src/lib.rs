#![forbid(unsafe_code)]

//! Interfaces of the host-side collaborators the switch runs against.
//!
//! The switch never talks to the operating system directly. A bridge binds
//! to a [`HostDevice`] found through a [`HostDeviceRegistry`], a host-only
//! adapter delivers into a [`HostStack`], and the MAC substitution cache ages
//! entries with a [`TickSource`].

use std::sync::{Arc, Weak};

use vnet_core::{MacAddr, Packet, VnetResult};

/// Where a frame handed to a bridge by its host device came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketOrigin {
    /// Received from the physical medium.
    Wire,
    /// Sent by the host's own network stack.
    HostStack,
}

/// Receive hook registered on a host device. Must not block.
pub trait DeviceRxHandler: Send + Sync {
    fn receive_from_device(&self, packet: Packet, origin: PacketOrigin);
}

/// A physical adapter owned by the host.
pub trait HostDevice: Send + Sync {
    fn name(&self) -> &str;

    /// Interface index, used as the adapter id in link-state events.
    fn index(&self) -> u32;

    fn hw_addr(&self) -> MacAddr;

    fn is_ethernet(&self) -> bool;

    fn is_up(&self) -> bool;

    /// Wireless uplinks reject frames with foreign source addresses.
    fn is_wireless(&self) -> bool;

    /// Put a frame on the wire.
    fn transmit(&self, packet: Packet) -> VnetResult<()>;

    /// Hand a frame to the host's network stack as if it had been received.
    fn deliver_to_host(&self, packet: Packet);

    fn set_promiscuous(&self, enable: bool) -> VnetResult<()>;

    /// Install the protocol handler. Frames flow to it until unregistered.
    fn register_handler(&self, handler: Weak<dyn DeviceRxHandler>) -> VnetResult<()>;

    fn unregister_handler(&self);
}

/// Lookup of host devices by name.
pub trait HostDeviceRegistry: Send + Sync {
    fn lookup(&self, name: &str) -> Option<Arc<dyn HostDevice>>;
}

/// Receiving side of a synthetic host-only adapter.
pub trait HostStack: Send + Sync {
    /// Interface name as the host knows it.
    fn name(&self) -> &str;

    /// Inject a frame into the host stack as an inbound receive.
    fn deliver(&self, packet: Packet);

    /// Hardware address the host uses on this interface, if it has a fixed
    /// one. The adapter's port takes this address so unicast to the host
    /// passes the port filter.
    fn hw_addr(&self) -> Option<MacAddr> {
        None
    }
}

/// Monotonic tick counter. May wrap.
pub trait TickSource: Send + Sync {
    fn ticks(&self) -> u32;
}

/// Registry with no devices, for switches that never bridge.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDevices;

impl HostDeviceRegistry for NoDevices {
    fn lookup(&self, _name: &str) -> Option<Arc<dyn HostDevice>> {
        None
    }
}

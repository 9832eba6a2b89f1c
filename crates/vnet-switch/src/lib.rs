#![forbid(unsafe_code)]

//! Virtual Ethernet fabric: jacks joined by cables, hubs fanning frames out,
//! and the node types that connect the fabric to the outside world.
//!
//! Every structural change goes through [`Topology`], which refuses cables
//! that would close a loop. Forwarding only reads peer links and never waits
//! on the topology mutex.

mod bridge;
mod config;
mod hub;
mod jack;
mod link_state;
mod listener;
mod netif;
mod port;
mod queue;
mod switch;
mod topology;
mod userif;

use std::sync::Arc;

pub use bridge::Bridge;
pub use config::SwitchConfig;
pub use hub::{Hub, HubId, HubRegistry};
pub use jack::{BridgeStatus, CycleWalk, Jack, JackOps};
pub use listener::UserListener;
pub use netif::{netif_addr, NetIf};
pub use port::{Port, PortCounters, PortKind, PortState, PortStats};
pub use switch::Switch;
pub use topology::Topology;
pub use userif::{Notify, UserIf};

/// A switch node that owns a port.
pub trait Node: Send + Sync {
    fn port(&self) -> &Arc<Port>;

    /// Diagnostic summary on one line.
    fn status_line(&self) -> String;
}

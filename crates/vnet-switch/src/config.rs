use vnet_core::{HUB_PORTS, USERIF_QUEUE_LEN};

/// Tunables shared by every node a [`crate::Switch`] creates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchConfig {
    /// Slots per hub.
    pub hub_ports: usize,
    /// Frames a UserIf queues before dropping.
    pub userif_queue_len: usize,
    /// Event records a UserListener queues before dropping.
    pub listener_queue_len: usize,
    /// Initial forward-unknown policy for bridges doing MAC substitution.
    pub smac_forward_unknown: bool,
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self {
            hub_ports: HUB_PORTS,
            userif_queue_len: USERIF_QUEUE_LEN,
            listener_queue_len: USERIF_QUEUE_LEN,
            smac_forward_unknown: false,
        }
    }
}

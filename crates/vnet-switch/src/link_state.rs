use std::sync::Arc;

use spin::Mutex;
use vnet_core::{VnetError, VnetResult};
use vnet_event::{Event, Sender};

use crate::jack::Jack;

/// Sender for link-state events, created on first use against the event
/// mechanism of whatever `jack` is plugged into.
#[derive(Debug, Default)]
pub(crate) struct LinkStatePublisher {
    sender: Mutex<Option<Sender>>,
}

impl LinkStatePublisher {
    pub(crate) fn publish(&self, jack: &Jack, class_set: u32, adapter: u32, up: bool) -> VnetResult<()> {
        let mech = jack
            .peer()
            .and_then(|peer| peer.events())
            .ok_or(VnetError::PeerInvalid)?;

        let mut slot = self.sender.lock();
        let current = matches!(&*slot, Some(s) if Arc::ptr_eq(s.mechanism(), &mech));
        if !current {
            *slot = Some(Sender::create(&mech)?);
        }
        match slot.as_ref() {
            Some(sender) => sender.send(&Event::link_state(sender.id(), class_set, adapter, up)),
            None => Ok(()),
        }
    }
}

#![forbid(unsafe_code)]

//! Publish/subscribe of switch events.
//!
//! A [`Mechanism`] connects [`Sender`]s to [`Listener`]s. Every sender keeps
//! the latest event it sent per (event id, type) so that a listener created
//! later is brought up to date before it sees anything new. Handlers run
//! synchronously under the mechanism lock; calling back into the same
//! mechanism from a handler is rejected with [`vnet_core::VnetError::Busy`].

mod event;
mod mechanism;

pub use event::{
    Event, EventBody, EventHeader, EVENT_CLASS_BRIDGE, EVENT_CLASS_UPLINK, EVENT_TYPE_LINK_STATE,
};
pub use mechanism::{Listener, Mechanism, Reentrant, Sender};

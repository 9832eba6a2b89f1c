use core::fmt;
use core::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use log::debug;
use spin::{Mutex, MutexGuard};
use vnet_core::{VnetError, VnetResult};

use crate::event::Event;

type Handler = Box<dyn FnMut(&Event) + Send>;

struct SenderEntry {
    id: u32,
    /// Latest event per (event id, type), in first-sent order.
    events: Vec<Event>,
}

struct ListenerEntry {
    id: u32,
    class_mask: u32,
    handler: Handler,
}

#[derive(Default)]
struct Inner {
    senders: Vec<SenderEntry>,
    listeners: Vec<ListenerEntry>,
}

/// Handles dropped from inside a handler, removed on the next lock.
#[derive(Default)]
struct Graveyard {
    senders: Vec<u32>,
    listeners: Vec<u32>,
}

pub struct Mechanism {
    inner: Mutex<Inner>,
    /// Thread currently running handlers under `inner`, if any.
    handler_thread: Mutex<Option<ThreadId>>,
    graveyard: Mutex<Graveyard>,
    next_sender_id: AtomicU32,
    next_listener_id: AtomicU32,
}

/// Returned when a handle is destroyed from inside one of its mechanism's
/// handlers. Gives the handle back to the caller.
pub struct Reentrant<T>(pub T);

impl<T> Reentrant<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for Reentrant<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Reentrant(..)")
    }
}

impl<T> From<Reentrant<T>> for VnetError {
    fn from(_: Reentrant<T>) -> Self {
        VnetError::Busy
    }
}

/// Mechanism lock held with the re-entrancy guard set.
struct Entered<'a> {
    mech: &'a Mechanism,
    inner: MutexGuard<'a, Inner>,
}

impl Deref for Entered<'_> {
    type Target = Inner;
    fn deref(&self) -> &Inner {
        &self.inner
    }
}

impl DerefMut for Entered<'_> {
    fn deref_mut(&mut self) -> &mut Inner {
        &mut self.inner
    }
}

impl Drop for Entered<'_> {
    fn drop(&mut self) {
        // Cleared while `inner` is still held.
        *self.mech.handler_thread.lock() = None;
    }
}

impl Mechanism {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner::default()),
            handler_thread: Mutex::new(None),
            graveyard: Mutex::new(Graveyard::default()),
            next_sender_id: AtomicU32::new(1),
            next_listener_id: AtomicU32::new(1),
        })
    }

    /// Drop the creator's reference. Refused from inside a handler of this
    /// mechanism.
    pub fn destroy(this: Arc<Self>) -> Result<(), Reentrant<Arc<Self>>> {
        if this.in_handler() {
            return Err(Reentrant(this));
        }
        drop(this);
        Ok(())
    }

    /// True when the calling thread is running one of this mechanism's handlers.
    pub fn in_handler(&self) -> bool {
        *self.handler_thread.lock() == Some(thread::current().id())
    }

    pub fn sender_count(&self) -> VnetResult<usize> {
        Ok(self.enter()?.senders.len())
    }

    pub fn listener_count(&self) -> VnetResult<usize> {
        Ok(self.enter()?.listeners.len())
    }

    fn enter(&self) -> VnetResult<Entered<'_>> {
        if self.in_handler() {
            return Err(VnetError::Busy);
        }
        let mut inner = self.inner.lock();
        *self.handler_thread.lock() = Some(thread::current().id());

        let dead = core::mem::take(&mut *self.graveyard.lock());
        if !dead.senders.is_empty() {
            inner.senders.retain(|s| !dead.senders.contains(&s.id));
        }
        if !dead.listeners.is_empty() {
            inner.listeners.retain(|l| !dead.listeners.contains(&l.id));
        }
        Ok(Entered { mech: self, inner })
    }

    fn remove_sender(&self, id: u32) {
        match self.enter() {
            Ok(mut inner) => inner.senders.retain(|s| s.id != id),
            Err(_) => self.graveyard.lock().senders.push(id),
        }
    }

    fn remove_listener(&self, id: u32) {
        match self.enter() {
            Ok(mut inner) => inner.listeners.retain(|l| l.id != id),
            Err(_) => self.graveyard.lock().listeners.push(id),
        }
    }
}

impl fmt::Debug for Mechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mechanism")
            .field("next_sender_id", &self.next_sender_id.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Publishing side. Owns a slot in the mechanism's sender list.
pub struct Sender {
    id: u32,
    mech: Arc<Mechanism>,
    released: bool,
}

impl Sender {
    pub fn create(mech: &Arc<Mechanism>) -> VnetResult<Self> {
        let mut inner = mech.enter()?;
        let id = mech.next_sender_id.fetch_add(1, Ordering::Relaxed);
        inner.senders.push(SenderEntry { id, events: Vec::new() });
        Ok(Self { id, mech: mech.clone(), released: false })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn mechanism(&self) -> &Arc<Mechanism> {
        &self.mech
    }

    /// Buffer `event` for replay and hand it to every interested listener.
    pub fn send(&self, event: &Event) -> VnetResult<()> {
        if event.header.sender_id != self.id {
            return Err(VnetError::InvalidArgument("event sender id does not match sender"));
        }
        let mut inner = self.mech.enter()?;
        let Inner { senders, listeners } = &mut *inner;

        let entry = senders
            .iter_mut()
            .find(|s| s.id == self.id)
            .ok_or(VnetError::InvalidArgument("sender is not registered"))?;
        let slot = entry.events.iter_mut().find(|e| {
            e.header.event_id == event.header.event_id
                && e.header.event_type == event.header.event_type
        });
        match slot {
            Some(prev) if prev.header.size == event.header.size => prev.clone_from(event),
            Some(prev) => *prev = event.clone(),
            None => entry.events.push(event.clone()),
        }

        for listener in listeners.iter_mut() {
            if listener.class_mask & event.header.class_set != 0 {
                (listener.handler)(event);
            }
        }
        Ok(())
    }

    /// Remove this sender and its buffered events.
    pub fn destroy(mut self) -> Result<(), Reentrant<Sender>> {
        if self.mech.in_handler() {
            return Err(Reentrant(self));
        }
        self.mech.remove_sender(self.id);
        self.released = true;
        Ok(())
    }
}

impl Drop for Sender {
    fn drop(&mut self) {
        if !self.released {
            self.mech.remove_sender(self.id);
        }
    }
}

impl fmt::Debug for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sender").field("id", &self.id).finish()
    }
}

/// Subscribing side. The handler runs under the mechanism lock: it must not
/// block and must not call back into the mechanism.
pub struct Listener {
    id: u32,
    class_mask: u32,
    mech: Arc<Mechanism>,
    released: bool,
}

impl Listener {
    /// Register `handler` for events whose class set intersects `class_mask`.
    /// Buffered events that match are replayed before this returns.
    pub fn create<F>(mech: &Arc<Mechanism>, class_mask: u32, handler: F) -> VnetResult<Self>
    where
        F: FnMut(&Event) + Send + 'static,
    {
        let mut inner = mech.enter()?;
        let id = mech.next_listener_id.fetch_add(1, Ordering::Relaxed);
        let Inner { senders, listeners } = &mut *inner;

        listeners.push(ListenerEntry { id, class_mask, handler: Box::new(handler) });
        if let Some(entry) = listeners.last_mut() {
            let mut replayed = 0usize;
            for sender in senders.iter() {
                for event in sender.events.iter().filter(|e| e.header.class_set & class_mask != 0) {
                    (entry.handler)(event);
                    replayed += 1;
                }
            }
            debug!("event listener {} registered, {} buffered events replayed", id, replayed);
        }
        Ok(Self { id, class_mask, mech: mech.clone(), released: false })
    }

    pub fn class_mask(&self) -> u32 {
        self.class_mask
    }

    pub fn mechanism(&self) -> &Arc<Mechanism> {
        &self.mech
    }

    pub fn destroy(mut self) -> Result<(), Reentrant<Listener>> {
        if self.mech.in_handler() {
            return Err(Reentrant(self));
        }
        self.mech.remove_listener(self.id);
        self.released = true;
        Ok(())
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if !self.released {
            self.mech.remove_listener(self.id);
        }
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("id", &self.id)
            .field("class_mask", &self.class_mask)
            .finish()
    }
}

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};

use vnet_core::VnetError;

struct Inner<T> {
    items: VecDeque<T>,
    interrupted: bool,
}

/// Bounded FIFO drained by a blocking or non-blocking reader.
pub(crate) struct ReadQueue<T> {
    inner: Mutex<Inner<T>>,
    ready: Condvar,
    capacity: usize,
}

impl<T: AsRef<[u8]>> ReadQueue<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner { items: VecDeque::new(), interrupted: false }),
            ready: Condvar::new(),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().items.len()
    }

    /// Queue `item`, handing it back when full. Returns the new length.
    pub(crate) fn push(&self, item: T) -> Result<usize, T> {
        let len = {
            let mut inner = self.lock();
            if inner.items.len() >= self.capacity {
                return Err(item);
            }
            inner.items.push_back(item);
            inner.items.len()
        };
        self.ready.notify_all();
        Ok(len)
    }

    /// Copy the oldest item into `buf`. Returns its length and how many items
    /// remain queued. An item that does not fit stays queued.
    pub(crate) fn read(&self, buf: &mut [u8], nonblocking: bool) -> nb::Result<(usize, usize), VnetError> {
        let mut inner = self.lock();
        loop {
            if inner.interrupted {
                inner.interrupted = false;
                return Err(nb::Error::Other(VnetError::Interrupted));
            }
            if let Some(front) = inner.items.front() {
                let bytes = front.as_ref();
                if bytes.len() > buf.len() {
                    return Err(nb::Error::Other(VnetError::BufferTooSmall {
                        needed: bytes.len(),
                        capacity: buf.len(),
                    }));
                }
                let n = bytes.len();
                buf[..n].copy_from_slice(bytes);
                inner.items.pop_front();
                return Ok((n, inner.items.len()));
            }
            if nonblocking {
                return Err(nb::Error::WouldBlock);
            }
            inner = self.ready.wait(inner).unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    /// Wake a blocked reader with `Interrupted`. Also fails the next read
    /// when nobody is waiting.
    pub(crate) fn interrupt(&self) {
        self.lock().interrupted = true;
        self.ready.notify_all();
    }

    pub(crate) fn clear(&self) -> usize {
        let drained: Vec<T> = self.lock().items.drain(..).collect();
        drained.len()
    }
}

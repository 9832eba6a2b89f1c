use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use spin::RwLock;
use vnet_core::{matches, ExactFilter, IfFlags, Ladrf, MacAddr};

use crate::jack::Jack;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortKind {
    UserIf,
    NetIf,
    Bridge,
    Listener,
}

impl fmt::Display for PortKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PortKind::UserIf => "userif",
            PortKind::NetIf => "netif",
            PortKind::Bridge => "bridge",
            PortKind::Listener => "listener",
        })
    }
}

/// Address and receive filter of a port.
#[derive(Debug, Clone)]
pub struct PortState {
    pub addr: MacAddr,
    pub ladrf: Ladrf,
    pub exact: ExactFilter,
    pub flags: IfFlags,
}

#[derive(Debug, Default)]
pub struct PortStats {
    pub forwarded: AtomicU64,
    pub dropped_down: AtomicU64,
    pub dropped_filter: AtomicU64,
    pub dropped_full: AtomicU64,
    pub dropped_oversize: AtomicU64,
    pub queued: AtomicU64,
    pub read: AtomicU64,
    pub written: AtomicU64,
}

/// Point-in-time copy of [`PortStats`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PortCounters {
    pub forwarded: u64,
    pub dropped_down: u64,
    pub dropped_filter: u64,
    pub dropped_full: u64,
    pub dropped_oversize: u64,
    pub queued: u64,
    pub read: u64,
    pub written: u64,
}

impl PortStats {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PortCounters {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        PortCounters {
            forwarded: get(&self.forwarded),
            dropped_down: get(&self.dropped_down),
            dropped_filter: get(&self.dropped_filter),
            dropped_full: get(&self.dropped_full),
            dropped_oversize: get(&self.dropped_oversize),
            queued: get(&self.queued),
            read: get(&self.read),
            written: get(&self.written),
        }
    }
}

/// The addressable side of a node: its jack, filter and counters.
pub struct Port {
    kind: PortKind,
    jack: Arc<Jack>,
    state: RwLock<PortState>,
    pub stats: PortStats,
}

impl Port {
    pub(crate) fn new(kind: PortKind, jack: Jack, addr: MacAddr) -> Self {
        Self {
            kind,
            jack: Arc::new(jack),
            state: RwLock::new(PortState {
                addr,
                ladrf: Ladrf::default(),
                exact: ExactFilter::default(),
                flags: IfFlags::default(),
            }),
            stats: PortStats::default(),
        }
    }

    pub fn kind(&self) -> PortKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        self.jack.name()
    }

    pub fn jack(&self) -> &Arc<Jack> {
        &self.jack
    }

    pub fn state(&self) -> PortState {
        self.state.read().clone()
    }

    pub fn addr(&self) -> MacAddr {
        self.state.read().addr
    }

    pub fn flags(&self) -> IfFlags {
        self.state.read().flags
    }

    pub fn is_up(&self) -> bool {
        self.state.read().flags.contains(IfFlags::UP)
    }

    pub(crate) fn set_addr(&self, addr: MacAddr) {
        self.state.write().addr = addr;
    }

    pub(crate) fn set_multicast(&self, exact: ExactFilter, ladrf: Ladrf) {
        let mut state = self.state.write();
        state.exact = exact;
        state.ladrf = ladrf;
    }

    pub(crate) fn set_flags(&self, flags: IfFlags) {
        self.state.write().flags = flags;
    }

    /// Receive filter check for a frame addressed to `dest`.
    pub fn accepts(&self, dest: &MacAddr) -> bool {
        let state = self.state.read();
        matches(dest, &state.addr, &state.exact, &state.ladrf, state.flags)
    }

    pub fn counters(&self) -> PortCounters {
        self.stats.snapshot()
    }

    /// One-line summary; `extra` is appended verbatim.
    pub fn status_line(&self, extra: &str) -> String {
        let state = self.state.read();
        let c = self.stats.snapshot();
        let mut line = format!(
            "{} {} peer {} mac {} ladrf {} flags {} fwd {} drop down {} filter {} full {} oversize {}",
            self.kind,
            self.name(),
            self.jack.peer_name().as_deref().unwrap_or("none"),
            state.addr,
            state.ladrf,
            state.flags,
            c.forwarded,
            c.dropped_down,
            c.dropped_filter,
            c.dropped_full,
            c.dropped_oversize,
        );
        if !state.exact.is_empty() {
            line.push_str(&format!(" exact {}", state.exact.len()));
        }
        if !extra.is_empty() {
            line.push(' ');
            line.push_str(extra);
        }
        line
    }
}

impl fmt::Debug for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Port")
            .field("kind", &self.kind)
            .field("name", &self.name())
            .field("addr", &self.addr())
            .finish()
    }
}

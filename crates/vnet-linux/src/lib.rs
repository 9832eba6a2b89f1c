//! Linux backends for the switch's host collaborators: a TAP interface as
//! the host stack of a host-only network, sysfs-described adapters driven
//! through packet sockets for bridging, and a monotonic tick source.

use std::io;
use std::os::unix::io::RawFd;
use std::time::Instant;

use vnet_hal::TickSource;

mod device;
pub mod setup;
pub mod sysfs;
mod tap;

pub use device::{SysDevice, SysDeviceRegistry};
pub use tap::TapStack;

/// Milliseconds since creation, wrapping at 32 bits.
#[derive(Debug, Clone, Copy)]
pub struct LinuxClock(Instant);

impl LinuxClock {
    pub fn new() -> Self {
        Self(Instant::now())
    }
}

impl Default for LinuxClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TickSource for LinuxClock {
    fn ticks(&self) -> u32 {
        self.0.elapsed().as_millis() as u32
    }
}

/// Wait up to `timeout_ms` for any of `fds` to become readable. Returns the
/// number of ready descriptors; zero on timeout or interruption.
pub fn wait_readable(fds: &[RawFd], timeout_ms: i32) -> io::Result<usize> {
    let mut pfds: Vec<libc::pollfd> = fds
        .iter()
        .map(|&fd| libc::pollfd { fd, events: libc::POLLIN, revents: 0 })
        .collect();
    // SAFETY: `pfds` is a live array of the length passed.
    let rc = unsafe { libc::poll(pfds.as_mut_ptr(), pfds.len() as libc::nfds_t, timeout_ms) };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(0);
        }
        return Err(err);
    }
    Ok(rc as usize)
}

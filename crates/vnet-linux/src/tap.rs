use std::fs::File;
use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};

use log::{debug, info};
use tun::Device;
use vnet_core::{MacAddr, Packet, VnetError};
use vnet_hal::HostStack;

use crate::setup;

/// Host end of a host-only network: a TAP interface. Frames written to it
/// arrive in the host stack as received; frames the host sends on it are
/// read back with [`TapStack::read_frame`].
pub struct TapStack {
    file: File,
    name: String,
    mac: MacAddr,
    raw_fd: RawFd,
}

impl TapStack {
    /// Create the interface with hardware address `mac` and bring it up.
    pub fn open(name: &str, mac: MacAddr) -> anyhow::Result<Self> {
        let mut config = tun::Configuration::default();
        config.name(name).layer(tun::Layer::L2);

        #[cfg(target_os = "linux")]
        config.platform(|c| {
            c.packet_information(false);
        });

        let dev = tun::create(&config).map_err(|e| anyhow::anyhow!(e))?;
        let name = dev.name().to_string();

        let raw_fd = dev.as_raw_fd();
        // SAFETY: the descriptor is handed over to `file`; `dev` is forgotten
        // so it is closed exactly once.
        let file = unsafe { File::from_raw_fd(raw_fd) };
        std::mem::forget(dev);

        // SAFETY: fcntl on a descriptor we own.
        let rc = unsafe {
            let flags = libc::fcntl(raw_fd, libc::F_GETFL, 0);
            libc::fcntl(raw_fd, libc::F_SETFL, flags | libc::O_NONBLOCK)
        };
        if rc < 0 {
            return Err(io::Error::last_os_error().into());
        }

        setup::set_link_address(&name, mac)?;
        setup::link_up(&name)?;

        info!("tap {} open with {}", name, mac);
        Ok(Self { file, name, mac, raw_fd })
    }

    pub fn fd(&self) -> RawFd {
        self.raw_fd
    }

    /// Next frame the host sent on the interface.
    pub fn read_frame(&self, buf: &mut [u8]) -> nb::Result<usize, VnetError> {
        match (&self.file).read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(nb::Error::WouldBlock),
            Err(e) => Err(nb::Error::Other(e.into())),
        }
    }
}

impl HostStack for TapStack {
    fn name(&self) -> &str {
        &self.name
    }

    fn deliver(&self, packet: Packet) {
        if let Err(e) = (&self.file).write_all(packet.as_bytes()) {
            debug!("{}: frame not delivered: {}", self.name, e);
        }
    }

    fn hw_addr(&self) -> Option<MacAddr> {
        Some(self.mac)
    }
}

use std::collections::HashMap;
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::PathBuf;
use std::sync::{Arc, Weak};

use log::{debug, info, warn};
use spin::Mutex;
use vnet_core::{MacAddr, Packet, VnetError, VnetResult};
use vnet_hal::{DeviceRxHandler, HostDevice, HostDeviceRegistry, PacketOrigin};

use crate::sysfs::{self, LinkInfo, SYS_CLASS_NET};

const SOL_PACKET: libc::c_int = 263;
const PACKET_ADD_MEMBERSHIP: libc::c_int = 1;
const PACKET_DROP_MEMBERSHIP: libc::c_int = 2;
const PACKET_MR_PROMISC: libc::c_ushort = 1;
const PACKET_OUTGOING: libc::c_uchar = 4;

const RX_BATCH: usize = 64;

#[repr(C)]
struct PacketMreq {
    mr_ifindex: libc::c_int,
    mr_type: libc::c_ushort,
    mr_alen: libc::c_ushort,
    mr_address: [libc::c_uchar; 8],
}

/// Non-blocking `AF_PACKET` socket bound to one interface. Frames this
/// socket sends are not looped back to it by the kernel.
struct PacketSocket {
    fd: OwnedFd,
}

impl PacketSocket {
    fn open(index: u32) -> io::Result<Self> {
        let proto = (libc::ETH_P_ALL as u16).to_be();
        // SAFETY: socket(2) has no memory preconditions; the result is checked.
        let raw = unsafe {
            libc::socket(
                libc::AF_PACKET,
                libc::SOCK_RAW | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
                libc::c_int::from(proto),
            )
        };
        if raw < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: `raw` is a fresh descriptor nobody else owns.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        // SAFETY: all-zero is a valid sockaddr_ll.
        let mut addr: libc::sockaddr_ll = unsafe { mem::zeroed() };
        addr.sll_family = libc::AF_PACKET as libc::c_ushort;
        addr.sll_protocol = proto;
        addr.sll_ifindex = index as libc::c_int;
        // SAFETY: `addr` is a valid sockaddr_ll of the length passed.
        let rc = unsafe {
            libc::bind(
                fd.as_raw_fd(),
                &addr as *const libc::sockaddr_ll as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { fd })
    }

    fn set_promiscuous(&self, index: u32, enable: bool) -> io::Result<()> {
        let mreq = PacketMreq {
            mr_ifindex: index as libc::c_int,
            mr_type: PACKET_MR_PROMISC,
            mr_alen: 0,
            mr_address: [0; 8],
        };
        let op = if enable { PACKET_ADD_MEMBERSHIP } else { PACKET_DROP_MEMBERSHIP };
        // SAFETY: `mreq` is a live packet_mreq of the length passed.
        let rc = unsafe {
            libc::setsockopt(
                self.fd.as_raw_fd(),
                SOL_PACKET,
                op,
                &mreq as *const PacketMreq as *const libc::c_void,
                mem::size_of::<PacketMreq>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn send(&self, frame: &[u8]) -> io::Result<()> {
        // SAFETY: the pointer and length describe `frame`.
        let n = unsafe { libc::send(self.fd.as_raw_fd(), frame.as_ptr() as *const libc::c_void, frame.len(), 0) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Returns the full frame length, which exceeds `buf` when the frame was
    /// truncated, and whether the host sent the frame itself.
    fn recv(&self, buf: &mut [u8]) -> nb::Result<(usize, bool), io::Error> {
        // SAFETY: all-zero is a valid sockaddr_ll.
        let mut addr: libc::sockaddr_ll = unsafe { mem::zeroed() };
        let mut len = mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t;
        // SAFETY: `buf` and `addr` are writable for the lengths passed.
        let n = unsafe {
            libc::recvfrom(
                self.fd.as_raw_fd(),
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
                libc::MSG_TRUNC,
                &mut addr as *mut libc::sockaddr_ll as *mut libc::sockaddr,
                &mut len,
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                return Err(nb::Error::WouldBlock);
            }
            return Err(nb::Error::Other(err));
        }
        Ok((n as usize, addr.sll_pkttype == PACKET_OUTGOING))
    }
}

/// A host network interface reached through sysfs and a packet socket.
///
/// The socket is opened when a handler registers and closed when it goes
/// away, so looking a device up needs no privileges. Received frames are
/// handed to the handler by [`SysDevice::pump`].
pub struct SysDevice {
    info: LinkInfo,
    root: PathBuf,
    socket: Mutex<Option<Arc<PacketSocket>>>,
    handler: Mutex<Option<Weak<dyn DeviceRxHandler>>>,
}

impl SysDevice {
    fn new(info: LinkInfo, root: PathBuf) -> Self {
        Self { info, root, socket: Mutex::new(None), handler: Mutex::new(None) }
    }

    pub fn info(&self) -> &LinkInfo {
        &self.info
    }

    /// Descriptor to wait on while a handler is registered.
    pub fn raw_fd(&self) -> Option<RawFd> {
        self.socket.lock().as_ref().map(|s| s.fd.as_raw_fd())
    }

    fn bound_socket(&self) -> VnetResult<Arc<PacketSocket>> {
        self.socket
            .lock()
            .clone()
            .ok_or_else(|| VnetError::DeviceDown(self.info.name.clone()))
    }

    /// Hand every frame waiting on the socket to the registered handler.
    /// Returns how many frames were delivered.
    pub fn pump(&self, buf: &mut [u8]) -> usize {
        let socket = self.socket.lock().clone();
        let handler = self.handler.lock().as_ref().and_then(Weak::upgrade);
        let (Some(socket), Some(handler)) = (socket, handler) else {
            return 0;
        };
        let mut delivered = 0;
        for _ in 0..RX_BATCH {
            match socket.recv(buf) {
                Ok((n, _)) if n > buf.len() => {
                    debug!("{}: dropping {} byte frame", self.info.name, n);
                }
                Ok((n, outgoing)) => {
                    let origin = if outgoing { PacketOrigin::HostStack } else { PacketOrigin::Wire };
                    handler.receive_from_device(Packet::from_slice(&buf[..n]), origin);
                    delivered += 1;
                }
                Err(nb::Error::WouldBlock) => break,
                Err(nb::Error::Other(e)) => {
                    warn!("{}: receive failed: {}", self.info.name, e);
                    break;
                }
            }
        }
        delivered
    }
}

impl HostDevice for SysDevice {
    fn name(&self) -> &str {
        &self.info.name
    }

    fn index(&self) -> u32 {
        self.info.index
    }

    fn hw_addr(&self) -> MacAddr {
        self.info.mac
    }

    fn is_ethernet(&self) -> bool {
        self.info.is_ethernet()
    }

    fn is_up(&self) -> bool {
        sysfs::is_up(&self.root, &self.info.name)
    }

    fn is_wireless(&self) -> bool {
        self.info.wireless
    }

    fn transmit(&self, packet: Packet) -> VnetResult<()> {
        self.bound_socket()?.send(packet.as_bytes())?;
        Ok(())
    }

    /// A user-space process cannot inject into the receive path of a
    /// physical adapter; host traffic goes through the host-only TAP.
    fn deliver_to_host(&self, packet: Packet) {
        debug!("{}: no host receive path, dropping {} byte frame", self.info.name, packet.len());
    }

    fn set_promiscuous(&self, enable: bool) -> VnetResult<()> {
        self.bound_socket()?.set_promiscuous(self.info.index, enable)?;
        Ok(())
    }

    fn register_handler(&self, handler: Weak<dyn DeviceRxHandler>) -> VnetResult<()> {
        let socket = PacketSocket::open(self.info.index)?;
        *self.socket.lock() = Some(Arc::new(socket));
        *self.handler.lock() = Some(handler);
        info!("{}: packet socket open", self.info.name);
        Ok(())
    }

    fn unregister_handler(&self) {
        self.handler.lock().take();
        if self.socket.lock().take().is_some() {
            info!("{}: packet socket closed", self.info.name);
        }
    }
}

/// Devices found under a sysfs net class directory. A name resolves to the
/// same [`SysDevice`] for as long as the registry lives.
pub struct SysDeviceRegistry {
    root: PathBuf,
    devices: Mutex<HashMap<String, Arc<SysDevice>>>,
}

impl SysDeviceRegistry {
    pub fn new() -> Self {
        Self::with_root(SYS_CLASS_NET)
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), devices: Mutex::new(HashMap::new()) }
    }

    pub fn device(&self, name: &str) -> Option<Arc<SysDevice>> {
        let mut devices = self.devices.lock();
        if let Some(dev) = devices.get(name) {
            return Some(dev.clone());
        }
        match sysfs::read_link(&self.root, name) {
            Ok(info) => {
                let dev = Arc::new(SysDevice::new(info, self.root.clone()));
                devices.insert(name.to_string(), dev.clone());
                Some(dev)
            }
            Err(e) => {
                debug!("{}: not usable: {}", name, e);
                None
            }
        }
    }

    /// Devices looked up so far.
    pub fn devices(&self) -> Vec<Arc<SysDevice>> {
        self.devices.lock().values().cloned().collect()
    }
}

impl Default for SysDeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HostDeviceRegistry for SysDeviceRegistry {
    fn lookup(&self, name: &str) -> Option<Arc<dyn HostDevice>> {
        self.device(name).map(|dev| dev as Arc<dyn HostDevice>)
    }
}

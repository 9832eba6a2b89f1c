use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use vnet_core::MacAddr;

pub const SYS_CLASS_NET: &str = "/sys/class/net";

const ARPHRD_ETHER: u32 = 1;
const IFF_UP: u32 = 0x1;

/// Link attributes of one interface as exported under `/sys/class/net`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkInfo {
    pub name: String,
    pub index: u32,
    pub mac: MacAddr,
    pub arp_type: u32,
    pub wireless: bool,
}

impl LinkInfo {
    pub fn is_ethernet(&self) -> bool {
        self.arp_type == ARPHRD_ETHER
    }
}

fn attr(dir: &Path, name: &str) -> io::Result<String> {
    Ok(fs::read_to_string(dir.join(name))?.trim().to_string())
}

fn invalid(what: &str, value: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, format!("bad {what} '{value}'"))
}

fn parse_u32(dir: &Path, name: &str) -> io::Result<u32> {
    let raw = attr(dir, name)?;
    let parsed = match raw.strip_prefix("0x") {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => raw.parse(),
    };
    parsed.map_err(|_| invalid(name, &raw))
}

pub fn link_dir(root: &Path, name: &str) -> PathBuf {
    root.join(name)
}

/// Read the static attributes of interface `name` below `root`.
pub fn read_link(root: &Path, name: &str) -> io::Result<LinkInfo> {
    if name.is_empty() || name.contains('/') {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "bad interface name"));
    }
    let dir = link_dir(root, name);
    let index = parse_u32(&dir, "ifindex")?;
    let arp_type = parse_u32(&dir, "type")?;
    let raw_mac = attr(&dir, "address")?;
    let mac = raw_mac.parse::<MacAddr>().map_err(|_| invalid("address", &raw_mac))?;
    let wireless = dir.join("wireless").exists() || dir.join("phy80211").exists();
    Ok(LinkInfo { name: name.to_string(), index, mac, arp_type, wireless })
}

/// Administrative state from the interface flags word.
pub fn is_up(root: &Path, name: &str) -> bool {
    parse_u32(&link_dir(root, name), "flags").is_ok_and(|flags| flags & IFF_UP != 0)
}

//! Header offsets and classification for frames seen by the engine.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use vnet_core::{
    MacAddr, ETHERTYPE_ARP, ETHERTYPE_EAPOL, ETHERTYPE_IPV4, ETHERTYPE_IPV6, ETHERTYPE_RARP,
    ETHERTYPE_VLAN, ETH_HLEN, ETH_VLAN_HLEN,
};

pub const ETH_DEST: usize = 0;
pub const ETH_SOURCE: usize = 6;

pub const IPV4_MIN_HLEN: usize = 20;
pub const IPV6_HLEN: usize = 40;
pub const UDP_HLEN: usize = 8;

pub const IPPROTO_UDP: u8 = 17;
pub const IPPROTO_ICMPV6: u8 = 58;

pub const ARP_LEN: usize = 28;
pub const ARP_HTYPE_ETHERNET: u16 = 1;
pub const ARP_SHA: usize = 8;
pub const ARP_SPA: usize = 14;
pub const ARP_THA: usize = 18;
pub const ARP_TPA: usize = 24;

pub const ARPOP_REQUEST: u16 = 1;
pub const ARPOP_REPLY: u16 = 2;
pub const ARPOP_RREQUEST: u16 = 3;
pub const ARPOP_RREPLY: u16 = 4;
pub const ARPOP_INREQUEST: u16 = 8;
pub const ARPOP_INREPLY: u16 = 9;
pub const ARPOP_NAK: u16 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Ipv4,
    Ipv6,
    /// ARP and RARP share a payload layout.
    Arp,
    Eapol,
    Other(u16),
}

/// Ethernet header fields plus where the network header starts.
#[derive(Debug, Clone, Copy)]
pub struct EthInfo {
    pub dest: MacAddr,
    pub source: MacAddr,
    pub protocol: Protocol,
    /// Offset of the first byte after the (possibly tagged) Ethernet header.
    pub l3: usize,
}

fn be16(frame: &[u8], offset: usize) -> Option<u16> {
    frame.get(offset..offset + 2).map(|b| u16::from_be_bytes([b[0], b[1]]))
}

/// Parse the Ethernet header. A single 802.1Q tag is looked through.
pub fn parse_eth(frame: &[u8]) -> Option<EthInfo> {
    if frame.len() < ETH_HLEN {
        return None;
    }
    let dest = MacAddr::from_slice(&frame[ETH_DEST..ETH_DEST + 6])?;
    let source = MacAddr::from_slice(&frame[ETH_SOURCE..ETH_SOURCE + 6])?;
    let mut ether_type = be16(frame, 12)?;
    let mut l3 = ETH_HLEN;
    if ether_type == ETHERTYPE_VLAN {
        ether_type = be16(frame, 16)?;
        l3 = ETH_VLAN_HLEN;
    }
    let protocol = match ether_type {
        ETHERTYPE_IPV4 => Protocol::Ipv4,
        ETHERTYPE_IPV6 => Protocol::Ipv6,
        ETHERTYPE_ARP | ETHERTYPE_RARP => Protocol::Arp,
        ETHERTYPE_EAPOL => Protocol::Eapol,
        other => Protocol::Other(other),
    };
    Some(EthInfo { dest, source, protocol, l3 })
}

pub fn ipv4_at(frame: &[u8], offset: usize) -> Option<IpAddr> {
    let b: [u8; 4] = frame.get(offset..offset + 4)?.try_into().ok()?;
    Some(IpAddr::V4(Ipv4Addr::from(b)))
}

pub fn ipv6_at(frame: &[u8], offset: usize) -> Option<IpAddr> {
    let b: [u8; 16] = frame.get(offset..offset + 16)?.try_into().ok()?;
    Some(IpAddr::V6(Ipv6Addr::from(b)))
}

pub fn mac_at(frame: &[u8], offset: usize) -> Option<MacAddr> {
    MacAddr::from_slice(frame.get(offset..offset + 6)?)
}

/// Fixed fields of an Ethernet/IPv4 ARP payload.
#[derive(Debug, Clone, Copy)]
pub struct ArpInfo {
    pub op: u16,
    pub sender_mac: MacAddr,
    pub sender_ip: IpAddr,
    pub target_mac: MacAddr,
    pub target_ip: IpAddr,
}

/// Parse the ARP payload at `arp`. Only Ethernet hardware with IPv4
/// protocol addresses is accepted.
pub fn parse_arp(frame: &[u8], arp: usize) -> Option<ArpInfo> {
    if frame.len() < arp + ARP_LEN {
        return None;
    }
    if be16(frame, arp)? != ARP_HTYPE_ETHERNET
        || be16(frame, arp + 2)? != ETHERTYPE_IPV4
        || frame[arp + 4] != 6
        || frame[arp + 5] != 4
    {
        return None;
    }
    Some(ArpInfo {
        op: be16(frame, arp + 6)?,
        sender_mac: mac_at(frame, arp + ARP_SHA)?,
        sender_ip: ipv4_at(frame, arp + ARP_SPA)?,
        target_mac: mac_at(frame, arp + ARP_THA)?,
        target_ip: ipv4_at(frame, arp + ARP_TPA)?,
    })
}

pub fn read_u16(frame: &[u8], offset: usize) -> Option<u16> {
    be16(frame, offset)
}

/// Copy `frame` and overwrite the 6 bytes at `offset`.
pub fn with_mac(frame: &[u8], offset: usize, mac: &MacAddr) -> Vec<u8> {
    let mut out = frame.to_vec();
    set_mac(&mut out, offset, mac);
    out
}

/// Overwrite the 6 bytes at `offset` when they fit.
pub fn set_mac(frame: &mut [u8], offset: usize, mac: &MacAddr) -> bool {
    match frame.get_mut(offset..offset + 6) {
        Some(field) => {
            field.copy_from_slice(&mac.octets());
            true
        }
        None => false,
    }
}

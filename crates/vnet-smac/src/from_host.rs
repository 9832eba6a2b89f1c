use std::net::{IpAddr, Ipv4Addr};

use vnet_core::MacAddr;
use vnet_hal::PacketOrigin;

use crate::frame::{
    ipv4_at, ipv6_at, parse_arp, parse_eth, set_mac, with_mac, EthInfo, Protocol, ARPOP_INREPLY,
    ARPOP_INREQUEST, ARPOP_REPLY, ARPOP_REQUEST, ARPOP_RREPLY, ARPOP_RREQUEST, ARP_THA, ETH_DEST,
    IPV4_MIN_HLEN, IPV6_HLEN,
};
use crate::{SmacState, Verdict};

pub(crate) fn check(state: &SmacState, frame: &[u8], origin: PacketOrigin) -> Verdict {
    let Some(eth) = parse_eth(frame) else {
        return state.unknown_policy();
    };
    if origin == PacketOrigin::Wire && eth.source == state.wireless_mac() {
        return Verdict::Drop;
    }
    match eth.protocol {
        Protocol::Ipv4 => ipv4(state, frame, &eth),
        Protocol::Ipv6 => ipv6(state, frame, &eth),
        Protocol::Arp => arp(state, frame, &eth),
        Protocol::Eapol | Protocol::Other(_) => {
            if eth.dest.is_multicast() {
                Verdict::Forward
            } else {
                state.unknown_policy()
            }
        }
    }
}

fn deliver_to(frame: &[u8], mac: MacAddr) -> Verdict {
    Verdict::Rewrite(with_mac(frame, ETH_DEST, &mac))
}

fn ipv4(state: &SmacState, frame: &[u8], eth: &EthInfo) -> Verdict {
    if eth.dest.is_multicast() {
        return Verdict::Forward;
    }
    if frame.len() < eth.l3 + IPV4_MIN_HLEN {
        return state.unknown_policy();
    }
    let Some(dst) = ipv4_at(frame, eth.l3 + 16) else {
        return state.unknown_policy();
    };
    if dst == IpAddr::V4(Ipv4Addr::BROADCAST) {
        return deliver_to(frame, MacAddr::BROADCAST);
    }
    match state.lookup(&dst) {
        Some(mac) => deliver_to(frame, mac),
        None => state.unknown_policy(),
    }
}

fn ipv6(state: &SmacState, frame: &[u8], eth: &EthInfo) -> Verdict {
    if eth.dest.is_multicast() {
        return Verdict::Forward;
    }
    if frame.len() < eth.l3 + IPV6_HLEN {
        return state.unknown_policy();
    }
    match ipv6_at(frame, eth.l3 + 24).and_then(|dst| state.lookup(&dst)) {
        Some(mac) => deliver_to(frame, mac),
        None => state.unknown_policy(),
    }
}

fn arp(state: &SmacState, frame: &[u8], eth: &EthInfo) -> Verdict {
    let Some(info) = parse_arp(frame, eth.l3) else {
        return if eth.dest.is_multicast() { Verdict::Forward } else { state.unknown_policy() };
    };
    let wireless = state.wireless_mac();
    match info.op {
        ARPOP_REQUEST | ARPOP_RREQUEST | ARPOP_INREQUEST => {
            // One of our guests' own requests coming back around.
            if info.sender_mac == wireless && state.lookup(&info.sender_ip).is_some() {
                return Verdict::Drop;
            }
            if eth.dest.is_multicast() {
                return Verdict::Forward;
            }
            if eth.dest != wireless {
                return Verdict::Drop;
            }
            match state.lookup(&info.target_ip) {
                Some(mac) => deliver_to(frame, mac),
                None => state.unknown_policy(),
            }
        }
        ARPOP_REPLY | ARPOP_RREPLY | ARPOP_INREPLY => {
            let owner = state.lookup(&info.target_ip);
            if eth.dest.is_multicast() {
                return match owner {
                    Some(mac) => {
                        let mut out = frame.to_vec();
                        set_mac(&mut out, eth.l3 + ARP_THA, &mac);
                        Verdict::Rewrite(out)
                    }
                    None => Verdict::Forward,
                };
            }
            match owner {
                Some(mac) => {
                    let mut out = with_mac(frame, ETH_DEST, &mac);
                    set_mac(&mut out, eth.l3 + ARP_THA, &mac);
                    Verdict::Rewrite(out)
                }
                None => Verdict::Drop,
            }
        }
        _ => {
            if eth.dest.is_multicast() {
                Verdict::Forward
            } else {
                state.unknown_policy()
            }
        }
    }
}

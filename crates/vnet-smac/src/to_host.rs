use log::debug;

use crate::checksum::{patch_mac_fix_checksum, patch_u16_fix_checksum};
use crate::frame::{
    ipv4_at, ipv6_at, parse_arp, parse_eth, read_u16, set_mac, with_mac, EthInfo, Protocol,
    ARPOP_INREPLY, ARPOP_INREQUEST, ARPOP_REPLY, ARPOP_REQUEST, ARPOP_RREPLY, ARPOP_RREQUEST,
    ARP_SHA, ETH_SOURCE, IPPROTO_ICMPV6, IPPROTO_UDP, IPV4_MIN_HLEN, IPV6_HLEN, UDP_HLEN,
};
use crate::{SmacState, Verdict};

const DHCP_SERVER_PORT: u16 = 67;
const BOOTREQUEST: u8 = 1;
const BOOTP_FLAGS: usize = 10;
const BOOTP_BROADCAST: u16 = 0x8000;

const ND_ROUTER_SOLICIT: u8 = 133;
const ND_REDIRECT: u8 = 137;
const ND_OPT_SOURCE_LLADDR: u8 = 1;
const ND_OPT_TARGET_LLADDR: u8 = 2;

pub(crate) fn check(state: &SmacState, frame: &[u8]) -> Verdict {
    let Some(eth) = parse_eth(frame) else {
        return Verdict::Drop;
    };
    match eth.protocol {
        Protocol::Ipv4 => ipv4(state, frame, &eth),
        Protocol::Ipv6 => ipv6(state, frame, &eth),
        Protocol::Arp => arp(state, frame, &eth),
        Protocol::Eapol => Verdict::Rewrite(with_source(state, frame)),
        Protocol::Other(_) => unknown(state, frame, &eth),
    }
}

fn with_source(state: &SmacState, frame: &[u8]) -> Vec<u8> {
    with_mac(frame, ETH_SOURCE, &state.wireless_mac())
}

fn unknown(state: &SmacState, frame: &[u8], eth: &EthInfo) -> Verdict {
    if eth.dest.is_multicast() {
        Verdict::Rewrite(with_source(state, frame))
    } else {
        debug!("smac: dropping unicast {:?} frame from {} to {}", eth.protocol, eth.source, eth.dest);
        Verdict::Drop
    }
}

fn ipv4(state: &SmacState, frame: &[u8], eth: &EthInfo) -> Verdict {
    let ip = eth.l3;
    if frame.len() < ip + IPV4_MIN_HLEN || frame[ip] >> 4 != 4 {
        return unknown(state, frame, eth);
    }
    if let Some(src) = ipv4_at(frame, ip + 12) {
        state.record(src, eth.source);
    }
    let mut out = with_source(state, frame);
    set_dhcp_broadcast(&mut out, ip);
    Verdict::Rewrite(out)
}

/// Ask the server to broadcast its answer: the reply would otherwise be
/// unicast to the guest's hardware address, which the uplink never sees.
fn set_dhcp_broadcast(frame: &mut [u8], ip: usize) {
    let ihl = usize::from(frame[ip] & 0x0F) * 4;
    if ihl < IPV4_MIN_HLEN || frame.get(ip + 9) != Some(&IPPROTO_UDP) {
        return;
    }
    match read_u16(frame, ip + 6) {
        Some(frag) if frag & 0x1FFF == 0 => {}
        _ => return,
    }
    let udp = ip + ihl;
    if read_u16(frame, udp + 2) != Some(DHCP_SERVER_PORT) {
        return;
    }
    let bootp = udp + UDP_HLEN;
    if frame.get(bootp) != Some(&BOOTREQUEST) {
        return;
    }
    let Some(flags) = read_u16(frame, bootp + BOOTP_FLAGS) else {
        return;
    };
    if flags & BOOTP_BROADCAST != 0 {
        return;
    }
    // A zero UDP checksum means none was computed; the flag is still set.
    let _ = patch_u16_fix_checksum(frame, udp + 6, bootp + BOOTP_FLAGS, flags | BOOTP_BROADCAST);
}

fn ipv6(state: &SmacState, frame: &[u8], eth: &EthInfo) -> Verdict {
    let ip = eth.l3;
    if frame.len() < ip + IPV6_HLEN || frame[ip] >> 4 != 6 {
        return unknown(state, frame, eth);
    }
    if let Some(src) = ipv6_at(frame, ip + 8) {
        state.record(src, eth.source);
    }

    let icmp = ip + IPV6_HLEN;
    let ndp_type = match frame.get(icmp) {
        Some(&t) if frame[ip + 6] == IPPROTO_ICMPV6 && (ND_ROUTER_SOLICIT..=ND_REDIRECT).contains(&t) => Some(t),
        _ => None,
    };
    let Some(ndp_type) = ndp_type else {
        return Verdict::Rewrite(with_source(state, frame));
    };
    if eth.dest == state.wireless_mac() {
        return Verdict::Forward;
    }

    let payload_len = read_u16(frame, ip + 4).map_or(0, usize::from);
    let end = frame.len().min(icmp + payload_len);
    let mut out = with_source(state, frame);
    patch_ndp_options(&mut out, icmp, ndp_type, end, state);
    Verdict::Rewrite(out)
}

/// Rewrite link-layer address options so neighbours resolve the guest's
/// address to the wireless MAC.
fn patch_ndp_options(frame: &mut [u8], icmp: usize, ndp_type: u8, end: usize, state: &SmacState) {
    let fixed = match ndp_type {
        ND_ROUTER_SOLICIT => 8,
        134 => 16,
        135 | 136 => 24,
        _ => 40,
    };
    let mac = state.wireless_mac();
    let mut opt = icmp + fixed;
    while opt + 2 <= end {
        let kind = frame[opt];
        let len = usize::from(frame[opt + 1]) * 8;
        if len == 0 || opt + len > end {
            break;
        }
        if (kind == ND_OPT_SOURCE_LLADDR || kind == ND_OPT_TARGET_LLADDR) && len >= 8 {
            if patch_mac_fix_checksum(frame, icmp + 2, opt + 2, &mac).is_err() {
                break;
            }
        }
        opt += len;
    }
}

fn arp(state: &SmacState, frame: &[u8], eth: &EthInfo) -> Verdict {
    let Some(info) = parse_arp(frame, eth.l3) else {
        return unknown(state, frame, eth);
    };
    match info.op {
        ARPOP_REQUEST | ARPOP_REPLY | ARPOP_RREPLY | ARPOP_INREQUEST | ARPOP_INREPLY => {
            state.record(info.sender_ip, info.sender_mac);
        }
        ARPOP_RREQUEST => {}
        _ => return unknown(state, frame, eth),
    }
    let mut out = with_source(state, frame);
    set_mac(&mut out, eth.l3 + ARP_SHA, &state.wireless_mac());
    Verdict::Rewrite(out)
}

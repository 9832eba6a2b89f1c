mod common;

use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::Ordering;

use vnet_core::{MacAddr, Packet, VnetError, ETHERTYPE_IPV4};
use vnet_event::{Event, EventBody, EVENT_CLASS_BRIDGE};
use vnet_hal::PacketOrigin;
use vnet_switch::{BridgeStatus, HubId, Node, SwitchConfig};

use common::{frame, switch_with, FakeDevice, HOST_MAC, MAC1, MAC2, WIRE_MAC};

fn ipv4_frame(dst: MacAddr, src: MacAddr, src_ip: [u8; 4], dst_ip: [u8; 4]) -> Vec<u8> {
    let mut f = frame(dst, src, ETHERTYPE_IPV4, 0);
    let mut ip = [0u8; 20];
    ip[0] = 0x45;
    ip[3] = 20;
    ip[8] = 64;
    ip[9] = 6;
    ip[12..16].copy_from_slice(&src_ip);
    ip[16..20].copy_from_slice(&dst_ip);
    f.extend_from_slice(&ip);
    f
}

#[test]
fn test_promiscuous_follows_hub_population() {
    let eth0 = FakeDevice::new("eth0", 2, HOST_MAC);
    let sw = switch_with(SwitchConfig::default(), &[eth0.clone()]);
    let hub = HubId::Vnet(1);

    let bridge = sw.attach_bridge(hub, "eth0", false).unwrap();
    assert!(bridge.is_up());
    assert!(eth0.has_handler());
    assert!(!eth0.is_promisc());
    assert_eq!(bridge.port().addr(), HOST_MAC);

    let u = sw.attach_userif(hub).unwrap();
    assert!(eth0.is_promisc());
    assert!(bridge.is_promiscuous());

    // Listeners do not count as ports.
    let _l = sw.attach_listener(hub, EVENT_CLASS_BRIDGE).unwrap();
    drop(u);
    assert!(!eth0.is_promisc());

    drop(bridge);
    assert!(!eth0.has_handler());
}

#[test]
fn test_fabric_frames_reach_wire_and_host() {
    let eth0 = FakeDevice::new("eth0", 2, HOST_MAC);
    let sw = switch_with(SwitchConfig::default(), &[eth0.clone()]);
    let hub = HubId::Vnet(1);
    let bridge = sw.attach_bridge(hub, "eth0", false).unwrap();
    let u = sw.attach_userif(hub).unwrap();
    sw.set_mac(u.port(), MAC1).unwrap();

    u.write(&frame(MAC2, MAC1, ETHERTYPE_IPV4, 40)).unwrap();
    assert_eq!(eth0.transmitted.lock().unwrap().len(), 1);
    assert!(eth0.delivered.lock().unwrap().is_empty());

    u.write(&frame(HOST_MAC, MAC1, ETHERTYPE_IPV4, 40)).unwrap();
    assert_eq!(eth0.transmitted.lock().unwrap().len(), 1);
    assert_eq!(eth0.delivered.lock().unwrap().len(), 1);

    u.write(&frame(MacAddr::BROADCAST, MAC1, ETHERTYPE_IPV4, 40)).unwrap();
    assert_eq!(eth0.transmitted.lock().unwrap().len(), 2);
    assert_eq!(eth0.delivered.lock().unwrap().len(), 2);
    assert_eq!(bridge.history_len(), 2);

    // The host reports the broadcast back with the same buffer.
    let echo = eth0.delivered.lock().unwrap()[1].clone();
    eth0.inject(echo, PacketOrigin::HostStack);
    assert_eq!(bridge.history_len(), 1);
    assert_eq!(u.queued(), 0);

    // Unrelated host traffic still flows.
    eth0.inject(Packet::new(frame(MacAddr::BROADCAST, HOST_MAC, ETHERTYPE_IPV4, 40)), PacketOrigin::HostStack);
    assert_eq!(u.queued(), 1);
    assert_eq!(bridge.history_len(), 1);
}

#[test]
fn test_history_evicts_oldest_when_full() {
    let eth0 = FakeDevice::new("eth0", 2, HOST_MAC);
    let sw = switch_with(SwitchConfig::default(), &[eth0.clone()]);
    let hub = HubId::Vnet(1);
    let bridge = sw.attach_bridge(hub, "eth0", false).unwrap();
    let u = sw.attach_userif(hub).unwrap();
    sw.set_mac(u.port(), MAC1).unwrap();

    for i in 0..49 {
        u.write(&frame(MacAddr::BROADCAST, MAC1, ETHERTYPE_IPV4, 40 + i)).unwrap();
    }
    assert_eq!(eth0.delivered.lock().unwrap().len(), 49);
    assert_eq!(bridge.history_len(), 48);

    let newest = eth0.delivered.lock().unwrap()[48].clone();
    eth0.inject(newest, PacketOrigin::HostStack);
    assert_eq!(u.queued(), 0);
    assert_eq!(bridge.history_len(), 47);

    // The first frame was pushed out, so its echo is not recognised.
    let oldest = eth0.delivered.lock().unwrap()[0].clone();
    eth0.inject(oldest, PacketOrigin::HostStack);
    assert_eq!(u.queued(), 1);
    assert_eq!(bridge.history_len(), 47);
}

#[test]
fn test_device_frames_enter_fabric() {
    let eth0 = FakeDevice::new("eth0", 2, HOST_MAC);
    let sw = switch_with(SwitchConfig::default(), &[eth0.clone()]);
    let hub = HubId::Vnet(1);
    let bridge = sw.attach_bridge(hub, "eth0", false).unwrap();
    let u = sw.attach_userif(hub).unwrap();
    sw.set_mac(u.port(), MAC1).unwrap();

    let f = frame(MAC1, WIRE_MAC, ETHERTYPE_IPV4, 60);
    eth0.inject(Packet::new(f.clone()), PacketOrigin::Wire);
    let mut buf = [0u8; 1600];
    let n = u.read(&mut buf, true).unwrap();
    assert_eq!(&buf[..n], f.as_slice());
    assert_eq!(bridge.port().counters().written, 1);

    // Nothing flows once the bridge is down.
    bridge.down();
    assert!(!eth0.has_handler());
    u.write(&frame(MAC2, MAC1, ETHERTYPE_IPV4, 60)).unwrap();
    assert!(eth0.transmitted.lock().unwrap().is_empty());
    assert_eq!(bridge.port().counters().dropped_down, 1);
}

#[test]
fn test_attach_errors_release_the_slot() {
    let ppp0 = FakeDevice::build("ppp0", 3, HOST_MAC, false, false);
    let sw = switch_with(SwitchConfig::default(), &[ppp0]);

    assert!(matches!(
        sw.attach_bridge(HubId::Vnet(5), "nope0", false),
        Err(VnetError::DeviceNotFound(name)) if name == "nope0"
    ));
    assert!(sw.hub(HubId::Vnet(5)).is_none());

    assert!(matches!(
        sw.attach_bridge(HubId::Vnet(5), "ppp0", false),
        Err(VnetError::NotEthernet(_))
    ));
    assert!(sw.hub(HubId::Vnet(5)).is_none());
}

#[test]
fn test_bridge_follows_device_state() {
    let eth0 = FakeDevice::new("eth0", 4, HOST_MAC);
    eth0.up.store(false, Ordering::SeqCst);
    let sw = switch_with(SwitchConfig::default(), &[eth0.clone()]);
    let hub = HubId::Vnet(1);

    let bridge = sw.attach_bridge(hub, "eth0", false).unwrap();
    assert!(!bridge.is_up());
    let u = sw.attach_userif(hub).unwrap();
    assert_eq!(sw.bridge_status(u.jack()), BridgeStatus::Down);

    let listener = sw.attach_listener(hub, EVENT_CLASS_BRIDGE).unwrap();
    eth0.up.store(true, Ordering::SeqCst);
    bridge.device_state_changed(true);
    assert!(bridge.is_up());
    assert!(eth0.is_promisc());
    assert_eq!(sw.bridge_status(u.jack()), BridgeStatus::Up);

    let mut buf = [0u8; 256];
    let n = listener.read(&mut buf, true).unwrap();
    let event = Event::from_bytes(&buf[..n]).unwrap();
    assert_eq!(event.header.class_set, EVENT_CLASS_BRIDGE);
    assert_eq!(event.body, EventBody::LinkState { adapter: 4, up: true });

    eth0.up.store(false, Ordering::SeqCst);
    bridge.device_state_changed(false);
    assert!(!bridge.is_up());
    let n = listener.read(&mut buf, true).unwrap();
    let event = Event::from_bytes(&buf[..n]).unwrap();
    assert_eq!(event.body, EventBody::LinkState { adapter: 4, up: false });
}

#[test]
fn test_bridge_status_across_hubs() {
    let eth0 = FakeDevice::new("eth0", 2, HOST_MAC);
    let eth1 = FakeDevice::new("eth1", 3, MAC2);
    eth1.up.store(false, Ordering::SeqCst);
    let sw = switch_with(SwitchConfig::default(), &[eth0, eth1]);

    let u = sw.attach_userif(HubId::Vnet(1)).unwrap();
    assert_eq!(sw.bridge_status(u.jack()), BridgeStatus::NotBridged);

    let _b0 = sw.attach_bridge(HubId::Vnet(1), "eth0", false).unwrap();
    assert_eq!(sw.bridge_status(u.jack()), BridgeStatus::Up);

    // A bridge one hub further away still counts.
    let _b1 = sw.attach_bridge(HubId::Vnet(2), "eth1", false).unwrap();
    let a = sw.hub_slot(HubId::Vnet(1)).unwrap();
    let b = sw.hub_slot(HubId::Vnet(2)).unwrap();
    sw.connect(&a, &b).unwrap();
    assert_eq!(sw.bridge_status(u.jack()), BridgeStatus::PartiallyDown);
    assert_eq!(BridgeStatus::PartiallyDown.to_string(), "partially-down");
}

#[test]
fn test_wireless_bridge_substitutes_addresses() {
    let wlan0 = FakeDevice::wireless("wlan0", 6, HOST_MAC);
    let sw = switch_with(SwitchConfig::default(), &[wlan0.clone()]);
    let hub = HubId::Vnet(1);
    let bridge = sw.attach_bridge(hub, "wlan0", false).unwrap();
    let u = sw.attach_userif(hub).unwrap();
    sw.set_mac(u.port(), MAC1).unwrap();

    u.write(&ipv4_frame(WIRE_MAC, MAC1, [10, 0, 0, 5], [10, 0, 0, 1])).unwrap();
    let sent = wlan0.transmitted.lock().unwrap()[0].clone();
    assert_eq!(sent.source(), Some(HOST_MAC));
    assert_eq!(sent.dest(), Some(WIRE_MAC));

    let smac = bridge.smac().unwrap();
    assert_eq!(smac.lookup(&IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5))), Some(MAC1));

    let reply = ipv4_frame(HOST_MAC, WIRE_MAC, [10, 0, 0, 1], [10, 0, 0, 5]);
    wlan0.inject(Packet::new(reply), PacketOrigin::Wire);
    let mut buf = [0u8; 1600];
    let n = u.read(&mut buf, true).unwrap();
    assert_eq!(MacAddr::from_slice(&buf[..6]), Some(MAC1));
    assert!(n >= 34);

    // Unknown destinations are dropped by default.
    let stray = ipv4_frame(HOST_MAC, WIRE_MAC, [10, 0, 0, 1], [10, 0, 0, 9]);
    wlan0.inject(Packet::new(stray), PacketOrigin::Wire);
    assert_eq!(u.queued(), 0);
    assert!(bridge.status_line().contains("smac 1 entries"));
}

#[test]
fn test_wired_bridge_can_force_substitution() {
    let eth0 = FakeDevice::new("eth0", 2, HOST_MAC);
    let sw = switch_with(SwitchConfig::default(), &[eth0]);
    let plain = sw.attach_bridge(HubId::Vnet(1), "eth0", false).unwrap();
    assert!(plain.smac().is_none());
    drop(plain);
    let forced = sw.attach_bridge(HubId::Vnet(1), "eth0", true).unwrap();
    assert!(forced.smac().is_some());
}

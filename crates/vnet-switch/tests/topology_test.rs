mod common;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use vnet_core::VnetError;
use vnet_switch::{HubId, SwitchConfig};

use common::{switch, switch_with, FakeDevice, HOST_MAC};

#[test]
fn test_hub_triangle_is_refused() {
    let sw = switch();
    let (h1, h2, h3) = (HubId::Vnet(1), HubId::Vnet(2), HubId::Vnet(3));

    let a = sw.hub_slot(h1).unwrap();
    let b = sw.hub_slot(h2).unwrap();
    sw.connect(&a, &b).unwrap();

    let c = sw.hub_slot(h2).unwrap();
    let d = sw.hub_slot(h3).unwrap();
    sw.connect(&c, &d).unwrap();

    let e = sw.hub_slot(h3).unwrap();
    let f = sw.hub_slot(h1).unwrap();
    assert!(matches!(sw.connect(&e, &f), Err(VnetError::Cycle)));

    // Nothing changed.
    assert!(!e.is_connected());
    assert!(!f.is_connected());
    assert_eq!(a.peer().unwrap().name(), b.name());
    assert_eq!(sw.hub(h1).unwrap().used_slots(), 2);
}

#[test]
fn test_two_cables_between_same_hubs_is_a_cycle() {
    let sw = switch();
    let a = sw.hub_slot(HubId::Vnet(1)).unwrap();
    let b = sw.hub_slot(HubId::Vnet(2)).unwrap();
    sw.connect(&a, &b).unwrap();

    let c = sw.hub_slot(HubId::Vnet(1)).unwrap();
    let d = sw.hub_slot(HubId::Vnet(2)).unwrap();
    assert!(matches!(sw.connect(&c, &d), Err(VnetError::Cycle)));

    // Once the first cable is gone the second one is fine.
    assert!(sw.disconnect(&a));
    sw.connect(&c, &d).unwrap();
}

#[test]
fn test_peer_validation() {
    let sw = switch();
    let u = sw.attach_userif(HubId::Vnet(1)).unwrap();
    let slot = sw.hub_slot(HubId::Vnet(1)).unwrap();

    assert!(matches!(sw.connect(&slot, &slot), Err(VnetError::PeerInvalid)));
    assert!(matches!(sw.connect(u.jack(), &slot), Err(VnetError::PeerInvalid)));
    assert!(!sw.disconnect(&slot));
}

#[test]
fn test_hub_lives_while_slots_are_used() {
    let sw = switch();
    let id = HubId::Vnet(7);
    let u1 = sw.attach_userif(id).unwrap();
    let u2 = sw.attach_userif(id).unwrap();
    assert_eq!(sw.hub(id).unwrap().used_slots(), 2);
    assert_eq!(sw.hub(id).unwrap().jacks()[0].name(), "hub7.0");

    drop(u1);
    assert_eq!(sw.hub(id).unwrap().used_slots(), 1);
    drop(u2);
    assert!(sw.hub(id).is_none());

    // A bare slot that is never plugged in is returned on drop.
    let slot = sw.hub_slot(id).unwrap();
    assert_eq!(sw.hub(id).unwrap().used_slots(), 1);
    drop(slot);
    assert!(sw.hub(id).is_none());
}

#[test]
fn test_hub_full() {
    let config = SwitchConfig { hub_ports: 2, ..SwitchConfig::default() };
    let sw = switch_with(config, &[]);
    let _a = sw.attach_userif(HubId::Vnet(1)).unwrap();
    let _b = sw.attach_userif(HubId::Vnet(1)).unwrap();
    assert!(matches!(sw.attach_userif(HubId::Vnet(1)), Err(VnetError::HubFull)));
}

#[test]
fn test_port_counts_propagate_across_hubs() {
    let sw = switch();
    let u1 = sw.attach_userif(HubId::Vnet(1)).unwrap();
    let u2 = sw.attach_userif(HubId::Vnet(2)).unwrap();
    assert_eq!(u1.jack().peer_num_ports(), 0);

    let a = sw.hub_slot(HubId::Vnet(1)).unwrap();
    let b = sw.hub_slot(HubId::Vnet(2)).unwrap();
    sw.connect(&a, &b).unwrap();
    assert_eq!(u1.jack().peer_num_ports(), 1);
    assert_eq!(u2.jack().peer_num_ports(), 1);
    assert_eq!(a.num_ports(), 1);

    let u3 = sw.attach_userif(HubId::Vnet(2)).unwrap();
    assert_eq!(u1.jack().peer_num_ports(), 2);
    assert_eq!(u3.jack().peer_num_ports(), 2);

    drop(u3);
    assert_eq!(u1.jack().peer_num_ports(), 1);
    sw.disconnect(&a);
    assert_eq!(u1.jack().peer_num_ports(), 0);
}

#[test]
fn test_same_host_interface_twice_is_a_cycle() {
    let eth0 = FakeDevice::new("eth0", 2, HOST_MAC);
    let sw = switch_with(SwitchConfig::default(), &[eth0.clone()]);

    let _b1 = sw.attach_bridge(HubId::Vnet(1), "eth0", false).unwrap();
    let _b2 = sw.attach_bridge(HubId::Vnet(2), "eth0", false).unwrap();

    let a = sw.hub_slot(HubId::Vnet(1)).unwrap();
    let b = sw.hub_slot(HubId::Vnet(2)).unwrap();
    assert!(matches!(sw.connect(&a, &b), Err(VnetError::Cycle)));

    // A second bridge to eth0 on the same hub would loop too.
    assert!(matches!(
        sw.attach_bridge(HubId::Vnet(1), "eth0", false),
        Err(VnetError::Cycle)
    ));
    assert_eq!(sw.hub(HubId::Vnet(1)).unwrap().used_slots(), 2);
}

fn root(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

#[test]
fn test_random_cabling_stays_a_forest() {
    const HUBS: u32 = 12;
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let sw = switch();
    let mut parent: Vec<usize> = (0..HUBS as usize).collect();
    let mut cables = Vec::new();

    for _ in 0..200 {
        let x = rng.gen_range(0..HUBS);
        let y = rng.gen_range(0..HUBS);
        if x == y {
            continue;
        }
        let a = sw.hub_slot(HubId::Vnet(x)).unwrap();
        let b = sw.hub_slot(HubId::Vnet(y)).unwrap();
        let (rx, ry) = (root(&mut parent, x as usize), root(&mut parent, y as usize));
        match sw.connect(&a, &b) {
            Ok(()) => {
                assert_ne!(rx, ry, "hub{x} and hub{y} were already joined");
                parent[rx] = ry;
                cables.push((a, b));
            }
            Err(VnetError::Cycle) => assert_eq!(rx, ry, "hub{x} and hub{y} were not joined"),
            Err(e) => panic!("unexpected {e}"),
        }
    }
    assert_eq!(cables.len(), HUBS as usize - 1);
}

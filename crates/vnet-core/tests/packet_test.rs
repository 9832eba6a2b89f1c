use vnet_core::{MacAddr, Packet, ETHERTYPE_IPV4};

fn frame() -> Vec<u8> {
    let mut f = vec![0u8; 60];
    f[0..6].copy_from_slice(&[0xAA, 0xBB, 0xCC, 0x00, 0x00, 0x02]);
    f[6..12].copy_from_slice(&[0xAA, 0xBB, 0xCC, 0x00, 0x00, 0x01]);
    f[12..14].copy_from_slice(&ETHERTYPE_IPV4.to_be_bytes());
    f
}

#[test]
fn test_header_accessors() {
    let p = Packet::new(frame());
    assert_eq!(p.dest(), Some(MacAddr([0xAA, 0xBB, 0xCC, 0x00, 0x00, 0x02])));
    assert_eq!(p.source(), Some(MacAddr([0xAA, 0xBB, 0xCC, 0x00, 0x00, 0x01])));
    assert_eq!(p.ether_type(), Some(ETHERTYPE_IPV4));

    let runt = Packet::from_slice(&[0xFF; 8]);
    assert_eq!(runt.dest(), Some(MacAddr::BROADCAST));
    assert_eq!(runt.source(), None);
    assert_eq!(runt.ether_type(), None);
}

#[test]
fn test_clone_identity() {
    let a = Packet::new(frame());
    let b = a.clone();
    let c = Packet::new(a.to_vec());

    assert!(b.is_clone_of(&a));
    assert!(!c.is_clone_of(&a));
    assert_eq!(c.as_bytes(), a.as_bytes());
}

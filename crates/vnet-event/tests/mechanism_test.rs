use std::sync::{Arc, Mutex};

use vnet_core::VnetError;
use vnet_event::{
    Event, EventBody, Listener, Mechanism, Sender, EVENT_CLASS_BRIDGE, EVENT_CLASS_UPLINK,
};

fn recorder() -> (Arc<Mutex<Vec<Event>>>, impl FnMut(&Event) + Send + 'static) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    (seen, move |e: &Event| sink.lock().unwrap().push(e.clone()))
}

#[test]
fn test_live_delivery_by_class() {
    let mech = Mechanism::new();
    let sender = Sender::create(&mech).unwrap();
    let (uplink, h1) = recorder();
    let (bridge, h2) = recorder();
    let _l1 = Listener::create(&mech, EVENT_CLASS_UPLINK, h1).unwrap();
    let _l2 = Listener::create(&mech, EVENT_CLASS_BRIDGE, h2).unwrap();

    let e = Event::link_state(sender.id(), EVENT_CLASS_UPLINK, 3, true);
    sender.send(&e).unwrap();

    assert_eq!(uplink.lock().unwrap().as_slice(), &[e]);
    assert!(bridge.lock().unwrap().is_empty());
}

#[test]
fn test_replay_latest_state_to_new_listener() {
    let mech = Mechanism::new();
    let s1 = Sender::create(&mech).unwrap();
    let s2 = Sender::create(&mech).unwrap();

    let a_down = Event::link_state(s1.id(), EVENT_CLASS_UPLINK, 1, false);
    let a_up = Event::link_state(s1.id(), EVENT_CLASS_UPLINK, 1, true);
    let b = Event::link_state(s2.id(), EVENT_CLASS_UPLINK | EVENT_CLASS_BRIDGE, 2, false);
    s1.send(&a_down).unwrap();
    s2.send(&b).unwrap();
    s1.send(&a_up).unwrap();

    let (uplink, h1) = recorder();
    let _l1 = Listener::create(&mech, EVENT_CLASS_UPLINK, h1).unwrap();
    // Latest per (sender, event id, type), in sender order.
    assert_eq!(uplink.lock().unwrap().as_slice(), &[a_up.clone(), b.clone()]);

    let (bridge, h2) = recorder();
    let _l2 = Listener::create(&mech, EVENT_CLASS_BRIDGE, h2).unwrap();
    assert_eq!(bridge.lock().unwrap().as_slice(), &[b]);

    let (none, h3) = recorder();
    let _l3 = Listener::create(&mech, 0x80, h3).unwrap();
    assert!(none.lock().unwrap().is_empty());
}

#[test]
fn test_size_change_replaces_buffered_event() {
    let mech = Mechanism::new();
    let s = Sender::create(&mech).unwrap();
    let small = Event::new(s.id(), 9, EVENT_CLASS_UPLINK, 7, EventBody::Opaque(vec![1, 2]));
    let large = Event::new(s.id(), 9, EVENT_CLASS_UPLINK, 7, EventBody::Opaque(vec![3; 12]));
    s.send(&small).unwrap();
    s.send(&large).unwrap();

    let (seen, h) = recorder();
    let _l = Listener::create(&mech, EVENT_CLASS_UPLINK, h).unwrap();
    assert_eq!(seen.lock().unwrap().as_slice(), &[large]);
}

#[test]
fn test_sender_id_must_match() {
    let mech = Mechanism::new();
    let s = Sender::create(&mech).unwrap();
    let e = Event::link_state(s.id() + 100, EVENT_CLASS_UPLINK, 1, true);
    assert!(matches!(s.send(&e), Err(VnetError::InvalidArgument(_))));
}

#[test]
fn test_destroyed_sender_is_not_replayed() {
    let mech = Mechanism::new();
    let s = Sender::create(&mech).unwrap();
    s.send(&Event::link_state(s.id(), EVENT_CLASS_UPLINK, 1, true)).unwrap();
    s.destroy().unwrap();
    assert_eq!(mech.sender_count().unwrap(), 0);

    let (seen, h) = recorder();
    let _l = Listener::create(&mech, EVENT_CLASS_UPLINK, h).unwrap();
    assert!(seen.lock().unwrap().is_empty());
}

#[test]
fn test_reentrant_calls_are_busy() {
    let mech = Mechanism::new();
    let sender = Arc::new(Sender::create(&mech).unwrap());
    let results: Arc<Mutex<Vec<bool>>> = Arc::new(Mutex::new(Vec::new()));

    let inner_sender = sender.clone();
    let inner_mech = mech.clone();
    let out = results.clone();
    let _l = Listener::create(&mech, EVENT_CLASS_UPLINK, move |e: &Event| {
        let mut out = out.lock().unwrap();
        out.push(matches!(inner_sender.send(e), Err(VnetError::Busy)));
        out.push(matches!(Sender::create(&inner_mech), Err(VnetError::Busy)));
        out.push(Mechanism::destroy(inner_mech.clone()).is_err());
        out.push(matches!(
            Listener::create(&inner_mech, EVENT_CLASS_UPLINK, |_: &Event| {}),
            Err(VnetError::Busy)
        ));
    })
    .unwrap();

    sender.send(&Event::link_state(sender.id(), EVENT_CLASS_UPLINK, 1, true)).unwrap();
    assert_eq!(results.lock().unwrap().as_slice(), &[true, true, true, true]);

    // Outside a handler the same calls succeed.
    assert!(!mech.in_handler());
    let extra = Sender::create(&mech).unwrap();
    extra.destroy().unwrap();
}

#[test]
fn test_drop_inside_handler_is_deferred() {
    let mech = Mechanism::new();
    let sender = Sender::create(&mech).unwrap();
    let victim = Arc::new(Mutex::new(Some(Sender::create(&mech).unwrap())));
    assert_eq!(mech.sender_count().unwrap(), 2);

    let slot = victim.clone();
    let _l = Listener::create(&mech, EVENT_CLASS_UPLINK, move |_: &Event| {
        slot.lock().unwrap().take();
    })
    .unwrap();

    sender.send(&Event::link_state(sender.id(), EVENT_CLASS_UPLINK, 1, true)).unwrap();
    assert!(victim.lock().unwrap().is_none());
    assert_eq!(mech.sender_count().unwrap(), 1);
}

#[test]
fn test_wire_format() {
    let e = Event::link_state(4, EVENT_CLASS_UPLINK, 0x0102_0304, true);
    let bytes = e.to_bytes();
    assert_eq!(bytes.len(), 28);
    assert_eq!(&bytes[0..4], &28u32.to_le_bytes());
    assert_eq!(&bytes[4..8], &4u32.to_le_bytes());
    assert_eq!(&bytes[20..24], &[0x04, 0x03, 0x02, 0x01]);
    assert_eq!(bytes[24], 1);
    assert_eq!(Event::from_bytes(&bytes).unwrap(), e);
    assert!(Event::from_bytes(&bytes[..27]).is_err());
}

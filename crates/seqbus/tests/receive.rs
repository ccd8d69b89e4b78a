//! Integration tests for the receive loop and poll readiness

use std::thread;
use std::time::Duration;

use seqbus::{
    Address, BlockMode, ConnectionConfig, Event, LoopbackBus, Payload, PollSet, PortCaps,
    PortTypes, Sequencer,
};

fn client(bus: &LoopbackBus, name: &str) -> Sequencer {
    Sequencer::attach(bus, &ConnectionConfig::named(name)).unwrap()
}

fn inbox(seq: &Sequencer) -> Address {
    Address::new(seq.client_id(), 0)
}

#[test]
fn test_batches_resume_where_the_last_stopped() {
    let bus = LoopbackBus::new();
    let mut seq = client(&bus, "batches");
    for n in 0..5 {
        bus.inject(inbox(&seq), &Event::controller(0, 7, n)).unwrap();
    }

    let values = |events: Vec<Event>| -> Vec<i32> {
        events
            .iter()
            .map(|e| match e.payload() {
                Payload::Control(c) => c.value,
                other => panic!("unexpected payload {other:?}"),
            })
            .collect()
    };

    assert_eq!(values(seq.receive_events(0, Some(2)).unwrap()), vec![0, 1]);
    assert_eq!(values(seq.receive_events(0, Some(10)).unwrap()), vec![2, 3, 4]);
    assert!(seq.receive_events(0, Some(10)).unwrap().is_empty());
}

#[test]
fn test_variable_payloads_survive_routing() {
    let bus = LoopbackBus::new();
    let mut seq = client(&bus, "sysex");
    let big: Vec<u8> = (0..=255).collect();

    for bytes in [Vec::new(), vec![0xf7], big] {
        bus.inject(inbox(&seq), &Event::sysex(bytes.clone())).unwrap();
        let events = seq.receive_events(0, None).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].payload(), &Payload::Ext(bytes));
        assert!(events[0].is_variable_type());
    }
}

#[test]
fn test_poll_wakes_when_another_client_sends() {
    let bus = LoopbackBus::new();
    let mut listener = client(&bus, "listener");
    let port = listener
        .create_port("in", PortTypes::APPLICATION, PortCaps::WRITE | PortCaps::SUBS_WRITE)
        .unwrap();
    let dest = Address::new(listener.client_id(), port);

    let mut fds = PollSet::new();
    listener.register_poll(&mut fds, true, false).unwrap();
    assert_eq!(fds.poll(0).unwrap(), 0);

    let remote = bus.clone();
    let sender = thread::spawn(move || {
        let mut seq = Sequencer::attach(&remote, &ConnectionConfig::named("sender")).unwrap();
        thread::sleep(Duration::from_millis(20));
        let mut event = Event::note_on(9, 36, 127);
        event.set_dest(dest);
        seq.send_event(&event).unwrap();
    });

    assert_eq!(fds.poll(2000).unwrap(), 1);
    let events = listener.receive_events(0, None).unwrap();
    assert_eq!(events.len(), 1);
    assert!(events[0].is_note_type());
    sender.join().unwrap();

    // Drained inbox is no longer readable.
    assert_eq!(fds.poll(0).unwrap(), 0);
}

#[test]
fn test_blocking_handle_waits_for_input() {
    let bus = LoopbackBus::new();
    let mut config = ConnectionConfig::named("blocking");
    config.mode = BlockMode::Block;
    let mut seq = Sequencer::attach(&bus, &config).unwrap();
    assert_eq!(seq.mode(), BlockMode::Block);
    let dest = inbox(&seq);

    let remote = bus.clone();
    let feeder = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        remote.inject(dest, &Event::program_change(1, 5)).unwrap();
    });

    let events = seq.receive_events(-1, Some(1)).unwrap();
    assert_eq!(events.len(), 1);
    feeder.join().unwrap();
}

#[test]
fn test_input_pending_counts_buffered_bytes() {
    let bus = LoopbackBus::new();
    let mut seq = client(&bus, "pending");
    assert_eq!(seq.input_pending().unwrap(), 0);

    bus.inject(inbox(&seq), &Event::sysex(vec![1, 2, 3])).unwrap();
    assert!(seq.input_pending().unwrap() > 0);

    seq.receive_events(0, None).unwrap();
    assert_eq!(seq.input_pending().unwrap(), 0);
}

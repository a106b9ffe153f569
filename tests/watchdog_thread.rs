use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use rtpmidi_recovery::{
    InboundPacket, MidiCommand, RecoveryConfig, SessionRegistry, SinkEvent, WatchdogRunner,
};

fn released(sink: &Mutex<Vec<SinkEvent>>) -> bool {
    sink.lock().unwrap().contains(&SinkEvent::Command(MidiCommand::NoteOff {
        channel: 0,
        note: 48,
        velocity: 64,
    }))
}

#[test]
fn background_watchdog_releases_stuck_note() {
    let config = RecoveryConfig::default()
        .with_watchdog_period(Duration::from_millis(10))
        .with_note_timeout(Duration::from_millis(50));
    let registry = Arc::new(SessionRegistry::new(config).unwrap());
    let sink = Arc::new(Mutex::new(Vec::<SinkEvent>::new()));
    let peer = registry.connect("runner");

    {
        let mut sink = sink.lock().unwrap();
        registry
            .handle_packet(
                peer,
                &InboundPacket::new(1).with_commands([MidiCommand::NoteOn {
                    channel: 0,
                    note: 48,
                    velocity: 100,
                }]),
                Instant::now(),
                &mut *sink,
            )
            .unwrap();
    }

    let handle = WatchdogRunner::spawn(Arc::clone(&registry), Arc::clone(&sink)).unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while !released(&sink) && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    handle.stop();

    assert!(released(&sink));
    assert!(
        registry
            .channel_snapshot(peer, 0)
            .unwrap()
            .note_on_since(48)
            .is_none()
    );
}

#[test]
fn dropping_handle_stops_thread() {
    let config = RecoveryConfig::default().with_watchdog_period(Duration::from_millis(5));
    let registry = Arc::new(SessionRegistry::new(config).unwrap());
    let sink = Arc::new(Mutex::new(Vec::<SinkEvent>::new()));

    let handle = WatchdogRunner::spawn(Arc::clone(&registry), Arc::clone(&sink)).unwrap();
    thread::sleep(Duration::from_millis(20));
    drop(handle);

    // the thread held the only other references
    assert_eq!(Arc::strong_count(&registry), 1);
    assert_eq!(Arc::strong_count(&sink), 1);
}

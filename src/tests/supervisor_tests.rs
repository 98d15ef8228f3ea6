//! Tests for event routing and the waiting tick

use crate::data::{DataIdentifier, UpdateResult};
use crate::supervisor::{BrokerEvent, Supervisor};
use crate::updater::{SharedUpdater, Updater};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

/// Updater double recording everything the supervisor does to it.
#[derive(Default)]
struct RecordingUpdater {
    offers: Mutex<Vec<(DataIdentifier, String)>>,
    waiting_calls: AtomicUsize,
    stopped: AtomicBool,
}

impl Updater for RecordingUpdater {
    /// Everything except the `ignored` topic is relevant.
    fn is_relevant(&self, id: &DataIdentifier) -> bool {
        id.topic != "ignored"
    }

    fn offer(self: Arc<Self>, id: &DataIdentifier, value: &str) {
        self.offers
            .lock()
            .unwrap()
            .push((id.clone(), value.to_string()));
    }

    fn notify_update_result(self: Arc<Self>, _result: UpdateResult) {}

    fn notify_update_waiting(self: Arc<Self>) {
        self.waiting_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

fn ident(topic: &str) -> DataIdentifier {
    DataIdentifier::new("broker", topic)
}

#[tokio::test(start_paused = true)]
async fn routes_decoded_events_to_relevant_updaters_only() {
    let updater = Arc::new(RecordingUpdater::default());
    let (supervisor, events) = Supervisor::new(vec![updater.clone() as SharedUpdater]);
    let (shutdown_tx, _) = broadcast::channel(1);
    let task = tokio::spawn(supervisor.run(shutdown_tx.subscribe()));

    events
        .send(BrokerEvent {
            id: ident("sensors/temp"),
            payload: b"21.5".to_vec(),
        })
        .unwrap();
    events
        .send(BrokerEvent {
            id: ident("ignored"),
            payload: b"nope".to_vec(),
        })
        .unwrap();
    // Invalid UTF-8 payloads are logged and dropped before routing.
    events
        .send(BrokerEvent {
            id: ident("sensors/temp"),
            payload: vec![0xff, 0xfe],
        })
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown_tx.send(()).unwrap();
    task.await.unwrap();

    let offers = updater.offers.lock().unwrap();
    assert_eq!(
        offers.as_slice(),
        &[(ident("sensors/temp"), "21.5".to_string())]
    );
    assert!(updater.stopped.load(Ordering::SeqCst));
}

// Ordering guarantee: events from a single receiver reach an updater's
// `offer()` in receive order, even on the multi-threaded runtime where
// unsequenced tasks could otherwise race.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn same_receiver_events_reach_an_updater_in_receive_order() {
    let updater = Arc::new(RecordingUpdater::default());
    let (supervisor, events) = Supervisor::new(vec![updater.clone() as SharedUpdater]);
    let (shutdown_tx, _) = broadcast::channel(1);
    let task = tokio::spawn(supervisor.run(shutdown_tx.subscribe()));

    // One synthetic receiver publishing a rapid burst on one topic.
    for n in 0..100 {
        events
            .send(BrokerEvent {
                id: ident("sensors/seq"),
                payload: n.to_string().into_bytes(),
            })
            .unwrap();
    }

    // Closing the event queue makes the supervisor drain everything it
    // already accepted, then its delivery lanes, then return.
    drop(events);
    task.await.unwrap();

    let offers = updater.offers.lock().unwrap();
    let expected: Vec<(DataIdentifier, String)> = (0..100)
        .map(|n| (ident("sensors/seq"), n.to_string()))
        .collect();
    assert_eq!(offers.as_slice(), expected.as_slice());
}

#[tokio::test(start_paused = true)]
async fn waiting_tick_reaches_every_updater_each_second() {
    let first = Arc::new(RecordingUpdater::default());
    let second = Arc::new(RecordingUpdater::default());
    let (supervisor, _events) = Supervisor::new(vec![
        first.clone() as SharedUpdater,
        second.clone() as SharedUpdater,
    ]);
    let (shutdown_tx, _) = broadcast::channel(1);
    let task = tokio::spawn(supervisor.run(shutdown_tx.subscribe()));

    tokio::time::sleep(Duration::from_millis(2500)).await;
    shutdown_tx.send(()).unwrap();
    task.await.unwrap();

    // Immediate first tick plus one per elapsed second.
    assert!(first.waiting_calls.load(Ordering::SeqCst) >= 3);
    assert!(second.waiting_calls.load(Ordering::SeqCst) >= 3);

    // No further ticks after stop.
    let after_stop = first.waiting_calls.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(first.waiting_calls.load(Ordering::SeqCst), after_stop);
}

#[tokio::test(start_paused = true)]
async fn supervisor_stops_updaters_when_receivers_disappear() {
    let updater = Arc::new(RecordingUpdater::default());
    let (supervisor, events) = Supervisor::new(vec![updater.clone() as SharedUpdater]);
    let (shutdown_tx, _) = broadcast::channel(1);
    let task = tokio::spawn(supervisor.run(shutdown_tx.subscribe()));

    // All receivers dropping their senders closes the event queue, which
    // ends the supervisor without an explicit stop signal.
    drop(events);
    task.await.unwrap();
    assert!(updater.stopped.load(Ordering::SeqCst));
}

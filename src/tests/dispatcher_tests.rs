//! Tests for the dispatcher queue and its upload workers

use crate::config::{Channel, ChannelKind};
use crate::data::{DataIdentifier, Measurement, UpdateResult};
use crate::dispatcher::Dispatcher;
use crate::sender::MeasurementSender;
use crate::updater::Updater;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

/// Sender double: counts calls, sleeps like a real upload, and returns a
/// fixed outcome.
struct FakeSender {
    calls: AtomicUsize,
    delay: Duration,
    succeed: bool,
}

impl FakeSender {
    fn new(delay: Duration, succeed: bool) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay,
            succeed,
        })
    }
}

#[async_trait]
impl MeasurementSender for FakeSender {
    async fn send(&self, _channel: &Channel, _measurement: &Measurement) -> UpdateResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        if self.succeed {
            UpdateResult::success("entry 1")
        } else {
            UpdateResult::failure("simulated outage")
        }
    }
}

/// Updater double that only records the results it is notified with.
#[derive(Default)]
struct CountingUpdater {
    results: Mutex<Vec<bool>>,
}

impl Updater for CountingUpdater {
    fn is_relevant(&self, _id: &DataIdentifier) -> bool {
        false
    }

    fn offer(self: Arc<Self>, _id: &DataIdentifier, _value: &str) {}

    fn notify_update_result(self: Arc<Self>, result: UpdateResult) {
        self.results.lock().unwrap().push(result.success);
    }

    fn notify_update_waiting(self: Arc<Self>) {}

    fn stop(&self) {}
}

fn channel() -> Channel {
    Channel {
        name: "test-channel".to_string(),
        kind: ChannelKind::ThingSpeak,
        api_key: "KEY".to_string(),
        channel_id: None,
        waiting: None,
    }
}

fn measurement() -> Measurement {
    Measurement::current(HashMap::from([(
        DataIdentifier::new("broker", "t"),
        "1".to_string(),
    )]))
}

// Queue drain property: every measurement accepted before the stop
// signal still produces a result callback.
#[tokio::test(start_paused = true)]
async fn stop_drains_every_queued_measurement() {
    let sender = FakeSender::new(Duration::from_millis(50), true);
    let (shutdown_tx, _) = broadcast::channel(1);
    let (dispatcher, handle) = Dispatcher::new(sender.clone(), shutdown_tx.subscribe());
    let updater = Arc::new(CountingUpdater::default());

    for _ in 0..5 {
        handle.update_available(channel(), measurement(), updater.clone());
    }
    shutdown_tx.send(()).unwrap();

    dispatcher.run().await;

    assert_eq!(sender.calls.load(Ordering::SeqCst), 5);
    assert_eq!(updater.results.lock().unwrap().len(), 5);
}

#[tokio::test(start_paused = true)]
async fn upload_failures_reach_the_updater_as_failures() {
    let sender = FakeSender::new(Duration::from_millis(10), false);
    let (shutdown_tx, _) = broadcast::channel(1);
    let (dispatcher, handle) = Dispatcher::new(sender, shutdown_tx.subscribe());
    let updater = Arc::new(CountingUpdater::default());

    handle.update_available(channel(), measurement(), updater.clone());
    shutdown_tx.send(()).unwrap();

    dispatcher.run().await;

    assert_eq!(updater.results.lock().unwrap().as_slice(), &[false]);
}

#[tokio::test(start_paused = true)]
async fn enqueueing_after_shutdown_is_harmless() {
    let sender = FakeSender::new(Duration::ZERO, true);
    let (shutdown_tx, _) = broadcast::channel(1);
    let (dispatcher, handle) = Dispatcher::new(sender, shutdown_tx.subscribe());
    let updater = Arc::new(CountingUpdater::default());

    shutdown_tx.send(()).unwrap();
    dispatcher.run().await;

    // The dispatcher is gone; the handle logs and drops the measurement.
    handle.update_available(channel(), measurement(), updater.clone());
    assert!(updater.results.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn loop_exits_when_every_handle_is_dropped() {
    let sender = FakeSender::new(Duration::ZERO, true);
    let (shutdown_tx, _) = broadcast::channel(1);
    let (dispatcher, handle) = Dispatcher::new(sender, shutdown_tx.subscribe());
    let updater = Arc::new(CountingUpdater::default());

    handle.update_available(channel(), measurement(), updater.clone());
    drop(handle);

    // No shutdown signal: the closed queue alone ends the loop, after
    // the queued job was served.
    dispatcher.run().await;
    assert_eq!(updater.results.lock().unwrap().as_slice(), &[true]);
}

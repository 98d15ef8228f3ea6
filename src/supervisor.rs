//! Routing of incoming broker events to every interested updater
//!
//! All receivers feed one queue of raw `(identifier, payload)` events.
//! The supervisor decodes each payload as UTF-8 (dropping events that are
//! not valid text) and routes the value onto a delivery lane per
//! interested updater. Each lane is drained by its own long-lived task
//! that performs the `offer()` calls sequentially, which keeps two
//! guarantees at once: a single receiver's events reach every updater in
//! receive order, and an updater blocked on its lock delays only its own
//! lane, never the others.
//!
//! The supervisor also owns the periodic waiting tick that lets
//! waiting-timeouts fire deterministically even when no new data arrives.

use crate::data::DataIdentifier;
use crate::updater::SharedUpdater;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Cadence of `notify_update_waiting` calls to every updater.
const WAITING_TICK: Duration = Duration::from_secs(1);

/// A raw event delivered by a broker receiver: which stream it belongs to
/// and the payload bytes as published.
pub struct BrokerEvent {
    pub id: DataIdentifier,
    pub payload: Vec<u8>,
}

/// One updater's delivery lane: decoded values queued in arrival order.
type DeliveryLane = mpsc::UnboundedSender<(DataIdentifier, String)>;

/// Fans broker events out to the channel updaters and drives the waiting
/// tick. Owns the consuming half of the event queue.
pub struct Supervisor {
    updaters: Vec<SharedUpdater>,
    events: mpsc::UnboundedReceiver<BrokerEvent>,
}

impl Supervisor {
    /// Create the supervisor and the event queue the receivers feed.
    pub fn new(updaters: Vec<SharedUpdater>) -> (Self, mpsc::UnboundedSender<BrokerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                updaters,
                events: rx,
            },
            tx,
        )
    }

    /// Run until the stop signal arrives or every receiver is gone, then
    /// cancel the tick, drain the delivery lanes, and stop every updater
    /// (which cancels any pending scheduler executors).
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let tick = self.spawn_waiting_tick();
        let (lanes, deliveries) = self.spawn_delivery_lanes();
        info!(updaters = self.updaters.len(), "supervisor started");

        loop {
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(event) => self.route(&lanes, event),
                    None => break,
                },
                _ = shutdown.recv() => break,
            }
        }

        tick.abort();
        // Closing the lanes lets each delivery task finish the offers it
        // has already been handed before the updaters are stopped.
        drop(lanes);
        for delivery in deliveries {
            let _ = delivery.await;
        }
        for updater in &self.updaters {
            updater.stop();
        }
        info!("supervisor stopped");
    }

    /// Decode one event and queue it on the lane of every relevant
    /// updater, in the order the event arrived.
    fn route(&self, lanes: &[DeliveryLane], event: BrokerEvent) {
        let value = match String::from_utf8(event.payload) {
            Ok(value) => value,
            Err(e) => {
                error!(id = %event.id, "payload is not valid UTF-8, dropping event: {e}");
                return;
            }
        };
        debug!(id = %event.id, value = %value, "routing event");

        for (updater, lane) in self.updaters.iter().zip(lanes) {
            if updater.is_relevant(&event.id) {
                // Only fails once the lane task is gone, i.e. during
                // shutdown; the event is dropped like any other late one.
                let _ = lane.send((event.id.clone(), value.clone()));
            }
        }
    }

    /// One lane and one draining task per updater. The task applies the
    /// queued values strictly sequentially, so per-receiver arrival order
    /// survives the fan-out.
    fn spawn_delivery_lanes(&self) -> (Vec<DeliveryLane>, Vec<JoinHandle<()>>) {
        let mut lanes = Vec::with_capacity(self.updaters.len());
        let mut deliveries = Vec::with_capacity(self.updaters.len());
        for updater in &self.updaters {
            let (tx, mut rx) = mpsc::unbounded_channel::<(DataIdentifier, String)>();
            let updater = Arc::clone(updater);
            deliveries.push(tokio::spawn(async move {
                while let Some((id, value)) = rx.recv().await {
                    Arc::clone(&updater).offer(&id, &value);
                }
            }));
            lanes.push(tx);
        }
        (lanes, deliveries)
    }

    fn spawn_waiting_tick(&self) -> JoinHandle<()> {
        let updaters = self.updaters.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(WAITING_TICK);
            loop {
                tick.tick().await;
                for updater in &updaters {
                    Arc::clone(updater).notify_update_waiting();
                }
            }
        })
    }
}

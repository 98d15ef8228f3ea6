//! Serialization of emission requests onto a queue of HTTP workers
//!
//! Updaters hand `(channel, measurement, updater)` triples to the
//! dispatcher through a cloneable `DispatchHandle`. The dispatcher's main
//! loop pulls them off a FIFO queue and spawns one worker per upload, so
//! a slow cloud service never blocks the queue. Whatever happens during
//! the upload, the worker always reports an `UpdateResult` back to the
//! originating updater.
//!
//! On shutdown the queue is closed and drained: every measurement that
//! was accepted before the stop signal still produces a callback, and the
//! loop waits for all in-flight workers (bounded by the HTTP timeout)
//! before returning.

use crate::config::Channel;
use crate::data::Measurement;
use crate::sender::MeasurementSender;
use crate::updater::SharedUpdater;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// One queued emission: which channel to update, with what data, and who
/// to tell about the outcome.
pub struct UpdateJob {
    pub channel: Channel,
    pub measurement: Measurement,
    pub updater: SharedUpdater,
}

/// Cloneable producer half of the dispatcher queue. Enqueueing never
/// blocks, which lets updaters call it while holding their state lock.
#[derive(Clone)]
pub struct DispatchHandle {
    queue: mpsc::UnboundedSender<UpdateJob>,
}

impl DispatchHandle {
    /// Enqueue a measurement for upload and wake the dispatcher.
    pub fn update_available(
        &self,
        channel: Channel,
        measurement: Measurement,
        updater: SharedUpdater,
    ) {
        let job = UpdateJob {
            channel,
            measurement,
            updater,
        };
        if let Err(e) = self.queue.send(job) {
            // Only possible once the dispatcher has shut down.
            warn!(
                channel = %e.0.channel.name,
                "dispatcher gone, dropping measurement"
            );
        }
    }
}

/// Consumer half: the main loop plus the set of in-flight upload workers.
pub struct Dispatcher {
    queue: mpsc::UnboundedReceiver<UpdateJob>,
    sender: Arc<dyn MeasurementSender>,
    shutdown: broadcast::Receiver<()>,
}

impl Dispatcher {
    pub fn new(
        sender: Arc<dyn MeasurementSender>,
        shutdown: broadcast::Receiver<()>,
    ) -> (Self, DispatchHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                queue: rx,
                sender,
                shutdown,
            },
            DispatchHandle { queue: tx },
        )
    }

    /// Run until the stop signal arrives (or every handle is dropped),
    /// then drain the queue and wait for in-flight uploads to finish.
    pub async fn run(mut self) {
        let mut workers = JoinSet::new();
        info!("dispatcher started");

        loop {
            tokio::select! {
                job = self.queue.recv() => match job {
                    Some(job) => spawn_worker(&mut workers, &self.sender, job),
                    None => break,
                },
                // Reap finished workers as we go so the set stays small.
                Some(finished) = workers.join_next(), if !workers.is_empty() => {
                    reap(finished);
                }
                _ = self.shutdown.recv() => {
                    self.queue.close();
                    let mut drained = 0usize;
                    while let Some(job) = self.queue.recv().await {
                        spawn_worker(&mut workers, &self.sender, job);
                        drained += 1;
                    }
                    if drained > 0 {
                        info!(drained, "dispatcher draining queued measurements");
                    }
                    break;
                }
            }
        }

        if !workers.is_empty() {
            info!(in_flight = workers.len(), "waiting for uploads to finish");
        }
        while let Some(finished) = workers.join_next().await {
            reap(finished);
        }
        info!("dispatcher stopped");
    }
}

/// Perform one upload in its own task. Transport failures have already
/// been folded into the result by the sender, so the originating updater
/// is notified unconditionally.
fn spawn_worker(workers: &mut JoinSet<()>, sender: &Arc<dyn MeasurementSender>, job: UpdateJob) {
    let sender = Arc::clone(sender);
    workers.spawn(async move {
        debug!(channel = %job.channel.name, "upload worker started");
        let result = sender.send(&job.channel, &job.measurement).await;
        job.updater.notify_update_result(result);
    });
}

fn reap(finished: Result<(), tokio::task::JoinError>) {
    if let Err(e) = finished {
        if !e.is_cancelled() {
            error!("upload worker panicked: {e}");
        }
    }
}

/// Test seam: a handle whose queue is read directly by the test instead
/// of a running dispatcher.
#[cfg(test)]
pub(crate) fn capture_queue() -> (DispatchHandle, mpsc::UnboundedReceiver<UpdateJob>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (DispatchHandle { queue: tx }, rx)
}

//! Per-channel update-rate state machines
//!
//! An updater decides *when* the data accumulated in its channel's buffer
//! may be emitted. Four disciplines exist, one per `UpdaterKind`:
//!
//! - `BlackoutUpdater` drops everything until the interval expires, then
//!   emits the next complete buffer immediately.
//! - `BufferedUpdater` emits as soon as complete data is available and
//!   then schedules the next emission exactly one interval later.
//! - `AverageUpdater` behaves like `BufferedUpdater` but folds all samples
//!   received during the interval into an arithmetic mean.
//! - `OnChangeUpdater` emits one pending change per identifier on every
//!   scheduler tick.
//!
//! All four share the same base data (`UpdaterCore`): the channel, the
//! update interval, and a single mutex guarding the buffer together with
//! every state flag. Every transition happens under that one lock; no
//! lock is ever acquired while another is held. Scheduled emissions run on
//! tokio's timer wheel, so idle channels cost no threads.

use crate::buffer::UpdateBuffer;
use crate::config::Channel;
use crate::data::{DataIdentifier, UpdateResult};
use crate::dispatcher::DispatchHandle;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

mod average;
mod blackout;
mod buffered;
mod on_change;

pub use average::AverageUpdater;
pub use blackout::BlackoutUpdater;
pub use buffered::BufferedUpdater;
pub use on_change::OnChangeUpdater;

/// Floor for scheduled emission delays. An `UpdateRate` of zero degenerates
/// into fast regular updates instead of a busy loop.
const MIN_SCHEDULE_DELAY: Duration = Duration::from_millis(100);

/// Updaters are shared between the supervisor, the dispatcher workers and
/// their own scheduler executors.
pub type SharedUpdater = Arc<dyn Updater>;

/// The contract every update discipline implements.
///
/// Methods taking `Arc<Self>` may hand the updater onward (to the
/// dispatcher, or into a scheduler executor); the others never do.
pub trait Updater: Send + Sync {
    /// Does this updater's channel declare the given identifier?
    fn is_relevant(&self, id: &DataIdentifier) -> bool;

    /// Offer a decoded value. The buffer folds it according to its
    /// discipline; the state machine decides whether to emit.
    fn offer(self: Arc<Self>, id: &DataIdentifier, value: &str);

    /// Callback from a dispatcher worker with the outcome of an upload.
    fn notify_update_result(self: Arc<Self>, result: UpdateResult);

    /// Periodic tick driving waiting-timeout emissions even when no new
    /// data arrives.
    fn notify_update_waiting(self: Arc<Self>);

    /// Cancel pending scheduler executors and refuse further emissions.
    /// Late callbacks after `stop` are tolerated and become no-ops.
    fn stop(&self);
}

/// Mutable state shared by every discipline, guarded by the one
/// per-updater mutex.
struct CoreState {
    buffer: Box<dyn UpdateBuffer>,
    /// At most one upload is in flight per channel; this flag serializes.
    is_update_running: bool,
    /// Time of the last *successful* upload. `None` means never, which
    /// makes the first interval check pass immediately.
    last_updated: Option<Instant>,
    /// Set when partial data has been sitting past the update interval on
    /// a channel with a configured waiting period.
    waiting_started: Option<Instant>,
    /// True while a scheduler executor is pending for this updater.
    is_update_scheduled: bool,
    /// Pending scheduler executors, aborted on stop.
    executors: HashMap<u64, JoinHandle<()>>,
    next_executor: u64,
    stopped: bool,
}

/// Base data embedded by all four updater implementations.
pub(crate) struct UpdaterCore {
    channel: Channel,
    update_interval: Duration,
    dispatch: DispatchHandle,
    /// Shared with scheduler executors, which re-acquire the lock when
    /// they fire.
    state: Arc<Mutex<CoreState>>,
}

impl UpdaterCore {
    pub(crate) fn new(
        channel: Channel,
        update_interval: Duration,
        buffer: Box<dyn UpdateBuffer>,
        dispatch: DispatchHandle,
    ) -> Self {
        Self {
            channel,
            update_interval,
            dispatch,
            state: Arc::new(Mutex::new(CoreState {
                buffer,
                is_update_running: false,
                last_updated: None,
                waiting_started: None,
                is_update_scheduled: false,
                executors: HashMap::new(),
                next_executor: 0,
                stopped: false,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CoreState> {
        lock_state(&self.state)
    }

    fn is_relevant(&self, id: &DataIdentifier) -> bool {
        self.lock().buffer.relevant(id)
    }

    /// Has the update interval expired, measured from the previous
    /// successful upload?
    fn interval_expired(&self, state: &CoreState) -> bool {
        match state.last_updated {
            Some(at) => at.elapsed() > self.update_interval,
            None => true,
        }
    }

    /// Fold a value into the buffer. Topic mismatches and parse failures
    /// are logged and swallowed; processing continues either way.
    fn accept(&self, state: &mut CoreState, id: &DataIdentifier, value: &str) {
        if let Err(e) = state.buffer.accept(id, value) {
            warn!(channel = %self.channel.name, error = %e, "value not buffered");
        }
    }

    /// The common emission path. Must be called with the state lock held.
    fn run_update(&self, state: &mut CoreState, me: SharedUpdater) {
        emit(&self.channel, &self.dispatch, state, me);
    }

    /// Offer-path bookkeeping for channels with a waiting period: once
    /// partial data has outlived the update interval, note when the wait
    /// began so the tick can time it out.
    fn begin_waiting_if_due(&self, state: &mut CoreState) {
        if self.channel.waiting.is_some()
            && state.waiting_started.is_none()
            && self.interval_expired(state)
        {
            debug!(channel = %self.channel.name, "waiting for remaining fields");
            state.waiting_started = Some(Instant::now());
        }
    }

    /// Result-path bookkeeping shared by all disciplines: clear the
    /// in-flight flag and advance `last_updated` only on success.
    fn finish_update(&self, state: &mut CoreState, result: &UpdateResult) {
        state.is_update_running = false;
        if result.success {
            state.last_updated = Some(Instant::now());
            debug!(channel = %self.channel.name, detail = %result.detail, "channel updated");
        } else {
            warn!(channel = %self.channel.name, detail = %result.detail, "channel update failed");
        }
    }

    /// Arrange for an emission attempt one update interval from now. Used
    /// by the synchronous disciplines after every upload result so bursty
    /// sources still produce regular updates. No-op when an executor is
    /// already pending.
    fn schedule_update_job(&self, state: &mut CoreState, me: SharedUpdater) {
        if state.stopped || state.is_update_scheduled {
            return;
        }
        state.is_update_scheduled = true;
        let seq = state.next_executor;
        state.next_executor += 1;

        let delay = self.update_interval.max(MIN_SCHEDULE_DELAY);
        let shared = Arc::clone(&self.state);
        let channel = self.channel.clone();
        let dispatch = self.dispatch.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut state = lock_state(&shared);
            state.executors.remove(&seq);
            state.is_update_scheduled = false;
            if state.stopped || state.is_update_running {
                return;
            }
            // Only complete data is emitted from the scheduled path; an
            // incomplete buffer keeps folding until data completes again.
            if state.buffer.complete() {
                emit(&channel, &dispatch, &mut state, me);
            }
        });
        state.executors.insert(seq, handle);
    }

    /// The waiting tick, identical across disciplines. Emits an
    /// incomplete measurement once partial data has been waiting longer
    /// than the channel's grace period, and starts the wait when partial
    /// data first outlives the interval between ticks.
    fn handle_waiting_tick(&self, me: SharedUpdater) {
        let Some(waiting) = self.channel.waiting else {
            return;
        };
        let mut state = self.lock();
        if state.stopped || state.is_update_running {
            return;
        }
        match state.waiting_started {
            Some(started) => {
                if started.elapsed() > waiting && state.buffer.has_any() {
                    let missing = state.buffer.missing();
                    warn!(
                        channel = %self.channel.name,
                        missing = %join_ids(&missing),
                        "waiting period expired, sending incomplete update"
                    );
                    self.run_update(&mut state, me);
                }
            }
            None => {
                if state.buffer.has_any() && self.interval_expired(&state) {
                    debug!(channel = %self.channel.name, "waiting for remaining fields");
                    state.waiting_started = Some(Instant::now());
                }
            }
        }
    }

    fn stop(&self) {
        let mut state = self.lock();
        state.stopped = true;
        state.is_update_scheduled = false;
        let executors = state.executors.len();
        for (_, handle) in state.executors.drain() {
            handle.abort();
        }
        debug!(channel = %self.channel.name, executors, "updater stopped");
    }
}

/// Emission itself, callable both with the core at hand (`run_update`)
/// and from a scheduler executor that only captured the shared pieces.
/// The caller holds the state lock.
fn emit(channel: &Channel, dispatch: &DispatchHandle, state: &mut CoreState, me: SharedUpdater) {
    state.is_update_running = true;
    state.waiting_started = None;
    let measurement = state.buffer.snapshot();
    state.buffer.reset();
    debug!(
        channel = %channel.name,
        fields = measurement.len(),
        "handing measurement to dispatcher"
    );
    dispatch.update_available(channel.clone(), measurement, me);
}

fn lock_state(state: &Arc<Mutex<CoreState>>) -> MutexGuard<'_, CoreState> {
    // A poisoned lock means some thread panicked mid-transition; the
    // state itself is still structurally sound, so keep going.
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn join_ids(ids: &[DataIdentifier]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Build the updater a channel's configuration asks for.
pub fn build_updater(
    descriptor: &crate::config::UpdateDescriptor,
    dispatch: DispatchHandle,
) -> SharedUpdater {
    use crate::config::UpdaterKind;

    match descriptor.updater {
        UpdaterKind::Blackout => BlackoutUpdater::new(
            descriptor.channel.clone(),
            descriptor.update_interval,
            &descriptor.mapping,
            dispatch,
        ),
        UpdaterKind::Buffered => BufferedUpdater::new(
            descriptor.channel.clone(),
            descriptor.update_interval,
            &descriptor.mapping,
            dispatch,
        ),
        UpdaterKind::Average => AverageUpdater::new(
            descriptor.channel.clone(),
            descriptor.update_interval,
            &descriptor.mapping,
            dispatch,
        ),
        UpdaterKind::OnChange => OnChangeUpdater::new(
            descriptor.channel.clone(),
            descriptor.update_interval,
            &descriptor.mapping,
            dispatch,
        ),
    }
}

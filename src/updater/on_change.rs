//! On-change discipline: drain queued value changes one tick at a time.

use super::{SharedUpdater, Updater, UpdaterCore};
use crate::buffer::ChangeValueBuffer;
use crate::config::Channel;
use crate::data::{DataIdentifier, FieldMapping, UpdateResult};
use crate::dispatcher::DispatchHandle;
use std::sync::Arc;
use std::time::Duration;

/// Backed by a `ChangeValueBuffer`: only values differing from the
/// previously retained one are queued, and each emission carries one
/// pending change per identifier. The buffer's non-destructive reset
/// advances the queues, so successive scheduler ticks drain backlogged
/// changes in FIFO order.
pub struct OnChangeUpdater {
    core: UpdaterCore,
}

impl OnChangeUpdater {
    pub fn new(
        channel: Channel,
        update_interval: Duration,
        mapping: &FieldMapping,
        dispatch: DispatchHandle,
    ) -> Arc<Self> {
        let buffer = Box::new(ChangeValueBuffer::new(mapping.identifiers().cloned()));
        Arc::new(Self {
            core: UpdaterCore::new(channel, update_interval, buffer, dispatch),
        })
    }
}

impl Updater for OnChangeUpdater {
    fn is_relevant(&self, id: &DataIdentifier) -> bool {
        self.core.is_relevant(id)
    }

    fn offer(self: Arc<Self>, id: &DataIdentifier, value: &str) {
        let mut state = self.core.lock();
        if state.stopped {
            return;
        }
        self.core.accept(&mut state, id, value);
        if state.is_update_running {
            return;
        }
        // For this discipline a pending change is a complete measurement,
        // so the first change emits immediately and later ones wait for
        // the scheduler chain.
        if state.buffer.complete() && !state.is_update_scheduled {
            let me: SharedUpdater = self.clone();
            self.core.run_update(&mut state, me);
        }
    }

    fn notify_update_result(self: Arc<Self>, result: UpdateResult) {
        let mut state = self.core.lock();
        self.core.finish_update(&mut state, &result);
        if state.stopped {
            return;
        }
        let me: SharedUpdater = self.clone();
        self.core.schedule_update_job(&mut state, me);
    }

    fn notify_update_waiting(self: Arc<Self>) {
        let me: SharedUpdater = self.clone();
        self.core.handle_waiting_tick(me);
    }

    fn stop(&self) {
        self.core.stop();
    }
}

//! Averaging discipline: same cadence as buffered, mean instead of last.

use super::{SharedUpdater, Updater, UpdaterCore};
use crate::buffer::AverageBuffer;
use crate::config::Channel;
use crate::data::{DataIdentifier, FieldMapping, UpdateResult};
use crate::dispatcher::DispatchHandle;
use std::sync::Arc;
use std::time::Duration;

/// Scheduling twin of `BufferedUpdater`, backed by an `AverageBuffer`:
/// every numeric sample received during the interval contributes to the
/// arithmetic mean that gets emitted. Non-numeric payloads are logged and
/// discarded by the buffer.
pub struct AverageUpdater {
    core: UpdaterCore,
}

impl AverageUpdater {
    pub fn new(
        channel: Channel,
        update_interval: Duration,
        mapping: &FieldMapping,
        dispatch: DispatchHandle,
    ) -> Arc<Self> {
        let buffer = Box::new(AverageBuffer::new(mapping.identifiers().cloned()));
        Arc::new(Self {
            core: UpdaterCore::new(channel, update_interval, buffer, dispatch),
        })
    }
}

impl Updater for AverageUpdater {
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
        if state.buffer.complete() {
            if !state.is_update_scheduled {
                let me: SharedUpdater = self.clone();
                self.core.run_update(&mut state, me);
            }
        } else {
            self.core.begin_waiting_if_due(&mut state);
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

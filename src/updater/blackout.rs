//! Blackout discipline: ignore everything until the interval expires.

use super::{SharedUpdater, Updater, UpdaterCore};
use crate::buffer::LastValueBuffer;
use crate::config::Channel;
use crate::data::{DataIdentifier, FieldMapping, UpdateResult};
use crate::dispatcher::DispatchHandle;
use std::sync::Arc;
use std::time::Duration;

/// After a successful upload, incoming values keep overwriting the buffer
/// but nothing is emitted until the update interval has expired; the first
/// complete buffer offered after that goes out immediately. A failed
/// upload leaves `last_updated` untouched, so the next complete buffer
/// retries at once.
pub struct BlackoutUpdater {
    core: UpdaterCore,
}

impl BlackoutUpdater {
    pub fn new(
        channel: Channel,
        update_interval: Duration,
        mapping: &FieldMapping,
        dispatch: DispatchHandle,
    ) -> Arc<Self> {
        let buffer = Box::new(LastValueBuffer::new(mapping.identifiers().cloned()));
        Arc::new(Self {
            core: UpdaterCore::new(channel, update_interval, buffer, dispatch),
        })
    }
}

impl Updater for BlackoutUpdater {
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
            if self.core.interval_expired(&state) {
                let me: SharedUpdater = self.clone();
                self.core.run_update(&mut state, me);
            }
        } else {
            self.core.begin_waiting_if_due(&mut state);
        }
    }

    fn notify_update_result(self: Arc<Self>, result: UpdateResult) {
        let mut state = self.core.lock();
        // No follow-up scheduling: the next emission is driven entirely by
        // incoming data after the interval expires.
        self.core.finish_update(&mut state, &result);
    }

    fn notify_update_waiting(self: Arc<Self>) {
        let me: SharedUpdater = self.clone();
        self.core.handle_waiting_tick(me);
    }

    fn stop(&self) {
        self.core.stop();
    }
}

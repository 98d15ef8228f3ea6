//! Buffered discipline: emit on complete data, then on a fixed cadence.

use super::{SharedUpdater, Updater, UpdaterCore};
use crate::buffer::LastValueBuffer;
use crate::config::Channel;
use crate::data::{DataIdentifier, FieldMapping, UpdateResult};
use crate::dispatcher::DispatchHandle;
use std::sync::Arc;
use std::time::Duration;

/// Emits as soon as complete data is available, then schedules the next
/// emission exactly one update interval later. Values arriving during the
/// wait overwrite the buffered ones (last-value discipline), so the
/// scheduled emission carries the freshest complete snapshot. The
/// scheduler chain is re-armed after every upload result and dies out
/// when an executor fires on an incomplete buffer; the next complete
/// offer restarts it.
pub struct BufferedUpdater {
    core: UpdaterCore,
}

impl BufferedUpdater {
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

impl Updater for BufferedUpdater {
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
            // With an executor pending the buffer just keeps folding; the
            // scheduled fire will pick the data up.
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

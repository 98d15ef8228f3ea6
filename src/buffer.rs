//! Per-channel accumulation of partial measurement data
//!
//! Every channel owns exactly one update buffer. The buffer knows the set
//! of data identifiers the channel declares, stores incoming values
//! according to its discipline, and can report at any time whether a full
//! measurement is available, which identifiers are still missing, and
//! build a `Measurement` snapshot from its current contents.
//!
//! Three disciplines exist:
//! - `LastValueBuffer` retains only the most recent value per identifier.
//! - `AverageBuffer` collects numeric samples and emits their mean.
//! - `ChangeValueBuffer` queues values that differ from the previously
//!   retained one; its `reset` advances the queues by one element instead
//!   of clearing them.

use crate::data::{DataIdentifier, Measurement};
use thiserror::Error;

mod average;
mod change_value;
mod last_value;

pub use average::AverageBuffer;
pub use change_value::ChangeValueBuffer;
pub use last_value::LastValueBuffer;

/// Errors raised by a buffer when offered a value it cannot store. Both
/// kinds are logged and swallowed by the caller; neither aborts the
/// pipeline.
#[derive(Debug, Error)]
pub enum BufferError {
    /// The identifier is outside the channel's declared set.
    #[error("identifier {0} is not declared for this channel")]
    TopicMismatch(DataIdentifier),

    /// The averaging discipline was offered a payload that does not parse
    /// as a number. The value is dropped for that identifier.
    #[error("identifier {id}: payload {value:?} is not numeric")]
    ParseFailure { id: DataIdentifier, value: String },
}

/// The contract shared by all buffering disciplines.
///
/// `snapshot` never consumes data; pairing it with `reset` is the
/// caller's job (the updater does both under its lock while emitting).
pub trait UpdateBuffer: Send {
    /// Is this identifier part of the channel's declared set?
    fn relevant(&self, id: &DataIdentifier) -> bool;

    /// Store a value according to the discipline.
    fn accept(&mut self, id: &DataIdentifier, value: &str) -> Result<(), BufferError>;

    /// Is a full measurement available right now?
    fn complete(&self) -> bool;

    /// Has any data at all been stored since the last reset?
    fn has_any(&self) -> bool;

    /// Identifiers that still have no value.
    fn missing(&self) -> Vec<DataIdentifier>;

    /// Build a measurement from the current contents. Identifiers without
    /// data are simply absent from the result.
    fn snapshot(&self) -> Measurement;

    /// Clear stored data. Discipline-dependent: `ChangeValueBuffer` pops
    /// a single queued element per identifier, the others wipe.
    fn reset(&mut self);
}

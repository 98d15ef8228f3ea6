//! Core value types flowing through the update pipeline
//!
//! A `DataIdentifier` names one stream of incoming values (one topic on one
//! broker). A `Measurement` is a snapshot of field values assembled by an
//! update buffer and consumed exactly once by a sender. A `FieldMapping`
//! translates the internal identifiers into the parameter names the cloud
//! service expects.

use chrono::{DateTime, Local};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Identifies a single stream of incoming values: one topic on one broker.
///
/// The broker is referenced by its configured name, which is unique within
/// a configuration. Equality and hashing follow both components.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DataIdentifier {
    /// Name of the broker the value arrived from.
    pub broker: String,
    /// Concrete topic the value was published on.
    pub topic: String,
}

impl DataIdentifier {
    pub fn new(broker: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            broker: broker.into(),
            topic: topic.into(),
        }
    }
}

impl fmt::Display for DataIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}: {}>", self.broker, self.topic)
    }
}

/// A snapshot of per-field values emitted once to one channel.
///
/// Built by an update buffer, handed to the dispatcher, consumed by a
/// sender. Partial measurements (waiting timeout) simply carry fewer
/// fields than the channel declares.
#[derive(Debug, Clone)]
pub struct Measurement {
    pub fields: HashMap<DataIdentifier, String>,
    pub time: DateTime<Local>,
}

impl Measurement {
    pub fn new(fields: HashMap<DataIdentifier, String>, time: DateTime<Local>) -> Self {
        Self { fields, time }
    }

    /// A measurement stamped with the current wall-clock time.
    pub fn current(fields: HashMap<DataIdentifier, String>) -> Self {
        Self::new(fields, Local::now())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Maps data identifiers to the HTTP parameter names a channel expects,
/// e.g. `field1` for ThingSpeak. Immutable once built from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMapping {
    mapping: HashMap<DataIdentifier, String>,
}

impl FieldMapping {
    pub fn new(mapping: HashMap<DataIdentifier, String>) -> Self {
        Self { mapping }
    }

    /// The declared set of identifiers this mapping (and therefore the
    /// channel's update buffer) covers.
    pub fn identifiers(&self) -> impl Iterator<Item = &DataIdentifier> {
        self.mapping.keys()
    }

    pub fn contains(&self, id: &DataIdentifier) -> bool {
        self.mapping.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.mapping.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mapping.is_empty()
    }

    /// Convert a measurement into request parameters. Fields without a
    /// mapping entry cannot occur in practice because the buffer accepts
    /// only declared identifiers; they are skipped rather than trusted.
    pub fn convert(&self, measurement: &Measurement) -> BTreeMap<String, String> {
        let mut params = BTreeMap::new();
        for (id, value) in &measurement.fields {
            if let Some(field) = self.mapping.get(id) {
                params.insert(field.clone(), value.clone());
            }
        }
        params
    }
}

/// Outcome of one HTTP upload attempt, reported back to the originating
/// updater. `detail` is a human-readable summary used only for logging.
#[derive(Debug, Clone)]
pub struct UpdateResult {
    pub success: bool,
    pub detail: String,
}

impl UpdateResult {
    pub fn success(detail: impl Into<String>) -> Self {
        Self {
            success: true,
            detail: detail.into(),
        }
    }

    pub fn failure(detail: impl Into<String>) -> Self {
        Self {
            success: false,
            detail: detail.into(),
        }
    }
}

//! Averaging discipline: collect numeric samples, emit their mean.

use super::{BufferError, UpdateBuffer};
use crate::data::{DataIdentifier, Measurement};
use chrono::{DateTime, Local};
use std::collections::HashMap;

/// Appends a numeric parse of every payload per identifier and emits the
/// arithmetic mean on snapshot. Non-numeric payloads are reported as
/// `ParseFailure` and dropped for that identifier.
///
/// The snapshot is stamped with the time the last sample was accepted,
/// not the time the snapshot is taken, so a measurement averaged over a
/// long interval carries the timestamp of its freshest contribution.
pub struct AverageBuffer {
    samples: HashMap<DataIdentifier, Vec<f64>>,
    last_sample_at: Option<DateTime<Local>>,
}

impl AverageBuffer {
    pub fn new(ids: impl IntoIterator<Item = DataIdentifier>) -> Self {
        Self {
            samples: ids.into_iter().map(|id| (id, Vec::new())).collect(),
            last_sample_at: None,
        }
    }
}

impl UpdateBuffer for AverageBuffer {
    fn relevant(&self, id: &DataIdentifier) -> bool {
        self.samples.contains_key(id)
    }

    fn accept(&mut self, id: &DataIdentifier, value: &str) -> Result<(), BufferError> {
        let samples = self
            .samples
            .get_mut(id)
            .ok_or_else(|| BufferError::TopicMismatch(id.clone()))?;
        let parsed: f64 = value
            .trim()
            .parse()
            .map_err(|_| BufferError::ParseFailure {
                id: id.clone(),
                value: value.to_string(),
            })?;
        samples.push(parsed);
        self.last_sample_at = Some(Local::now());
        Ok(())
    }

    fn complete(&self) -> bool {
        self.samples.values().all(|samples| !samples.is_empty())
    }

    fn has_any(&self) -> bool {
        self.samples.values().any(|samples| !samples.is_empty())
    }

    fn missing(&self) -> Vec<DataIdentifier> {
        self.samples
            .iter()
            .filter(|(_, samples)| samples.is_empty())
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn snapshot(&self) -> Measurement {
        let fields = self
            .samples
            .iter()
            .filter(|(_, samples)| !samples.is_empty())
            .map(|(id, samples)| {
                let mean = samples.iter().sum::<f64>() / samples.len() as f64;
                (id.clone(), mean.to_string())
            })
            .collect();
        Measurement::new(fields, self.last_sample_at.unwrap_or_else(Local::now))
    }

    fn reset(&mut self) {
        for samples in self.samples.values_mut() {
            samples.clear();
        }
        self.last_sample_at = None;
    }
}

//! Last-value buffering: retain only the most recent payload per identifier.

use super::{BufferError, UpdateBuffer};
use crate::data::{DataIdentifier, Measurement};
use std::collections::HashMap;

/// The default buffering discipline. Any payload type is accepted; a new
/// value overwrites the previous one. The buffer is complete once every
/// declared identifier holds a value, and `reset` wipes all of them.
pub struct LastValueBuffer {
    values: HashMap<DataIdentifier, Option<String>>,
}

impl LastValueBuffer {
    pub fn new(ids: impl IntoIterator<Item = DataIdentifier>) -> Self {
        Self {
            values: ids.into_iter().map(|id| (id, None)).collect(),
        }
    }
}

impl UpdateBuffer for LastValueBuffer {
    fn relevant(&self, id: &DataIdentifier) -> bool {
        self.values.contains_key(id)
    }

    fn accept(&mut self, id: &DataIdentifier, value: &str) -> Result<(), BufferError> {
        match self.values.get_mut(id) {
            Some(slot) => {
                *slot = Some(value.to_string());
                Ok(())
            }
            None => Err(BufferError::TopicMismatch(id.clone())),
        }
    }

    fn complete(&self) -> bool {
        self.values.values().all(Option::is_some)
    }

    fn has_any(&self) -> bool {
        self.values.values().any(Option::is_some)
    }

    fn missing(&self) -> Vec<DataIdentifier> {
        self.values
            .iter()
            .filter(|(_, value)| value.is_none())
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn snapshot(&self) -> Measurement {
        let fields = self
            .values
            .iter()
            .filter_map(|(id, value)| value.as_ref().map(|v| (id.clone(), v.clone())))
            .collect();
        Measurement::current(fields)
    }

    fn reset(&mut self) {
        for slot in self.values.values_mut() {
            *slot = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(topic: &str) -> DataIdentifier {
        DataIdentifier::new("local", topic)
    }

    #[test]
    fn completes_once_every_identifier_has_a_value() {
        let mut buffer = LastValueBuffer::new([id("temp"), id("humidity")]);
        assert!(!buffer.complete());
        assert!(!buffer.has_any());

        buffer.accept(&id("temp"), "21.5").unwrap();
        assert!(!buffer.complete());
        assert!(buffer.has_any());
        assert_eq!(buffer.missing(), vec![id("humidity")]);

        buffer.accept(&id("humidity"), "40").unwrap();
        assert!(buffer.complete());
        assert!(buffer.missing().is_empty());
    }

    #[test]
    fn newer_value_overwrites_older() {
        let mut buffer = LastValueBuffer::new([id("temp")]);
        buffer.accept(&id("temp"), "1").unwrap();
        buffer.accept(&id("temp"), "2").unwrap();

        let snapshot = buffer.snapshot();
        assert_eq!(snapshot.fields.get(&id("temp")).map(String::as_str), Some("2"));
    }

    #[test]
    fn undeclared_identifier_is_rejected() {
        let mut buffer = LastValueBuffer::new([id("temp")]);
        let err = buffer.accept(&id("other"), "1").unwrap_err();
        assert!(matches!(err, BufferError::TopicMismatch(_)));
    }

    #[test]
    fn reset_clears_everything() {
        let mut buffer = LastValueBuffer::new([id("temp")]);
        buffer.accept(&id("temp"), "1").unwrap();
        buffer.reset();
        assert!(!buffer.complete());
        assert!(!buffer.has_any());
    }
}

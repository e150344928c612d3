//! Timestamped messages and ordered sequences of them.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::value::TypedValue;

/// One message at a point in time, in seconds relative to the sequence start
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: f64,
    pub address: String,
    pub value: TypedValue,
}

impl Event {
    pub fn new(timestamp: f64, address: impl Into<String>, value: TypedValue) -> Self {
        Self {
            timestamp,
            address: address.into(),
            value,
        }
    }

    /// Offset from the start of playback. Negative timestamps play at once,
    /// ones too large for a `Duration` saturate to `Duration::MAX`.
    pub fn offset(&self) -> Duration {
        if self.timestamp > 0.0 {
            Duration::try_from_secs_f64(self.timestamp).unwrap_or(Duration::MAX)
        } else {
            Duration::ZERO
        }
    }
}

/// Events in file (or arrival) order.
///
/// The order is never changed: playback follows the stored order even when
/// timestamps are not monotonic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventSequence {
    events: Vec<Event>,
}

impl EventSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Event> {
        self.events.iter()
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Timestamp of the last event
    pub fn duration(&self) -> f64 {
        self.events.last().map(|e| e.timestamp).unwrap_or(0.0)
    }

    /// Shift all timestamps so the first event sits at 0.0
    pub fn normalize_baseline(mut self) -> Self {
        if let Some(first) = self.events.first().map(|e| e.timestamp) {
            for event in &mut self.events {
                event.timestamp -= first;
            }
        }
        self
    }
}

impl From<Vec<Event>> for EventSequence {
    fn from(events: Vec<Event>) -> Self {
        Self { events }
    }
}

impl IntoIterator for EventSequence {
    type Item = Event;
    type IntoIter = std::vec::IntoIter<Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.into_iter()
    }
}

impl<'a> IntoIterator for &'a EventSequence {
    type Item = &'a Event;
    type IntoIter = std::slice::Iter<'a, Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timestamps(seq: &EventSequence) -> Vec<f64> {
        seq.iter().map(|e| e.timestamp).collect()
    }

    #[test]
    fn test_normalize_baseline() {
        let seq: EventSequence = vec![
            Event::new(5.0, "/a", TypedValue::Integer(1)),
            Event::new(6.5, "/b", TypedValue::Integer(2)),
            Event::new(7.0, "/c", TypedValue::Integer(3)),
        ]
        .into();

        let seq = seq.normalize_baseline();
        assert_eq!(timestamps(&seq), vec![0.0, 1.5, 2.0]);
        assert_eq!(seq.duration(), 2.0);
    }

    #[test]
    fn test_normalize_keeps_file_order() {
        let seq: EventSequence = vec![
            Event::new(2.0, "/a", TypedValue::Empty),
            Event::new(1.0, "/b", TypedValue::Empty),
        ]
        .into();

        let seq = seq.normalize_baseline();
        assert_eq!(timestamps(&seq), vec![0.0, -1.0]);
        assert_eq!(seq.events()[1].offset(), Duration::ZERO);
    }

    #[test]
    fn test_normalize_empty() {
        let seq = EventSequence::new().normalize_baseline();
        assert!(seq.is_empty());
        assert_eq!(seq.duration(), 0.0);
    }

    #[test]
    fn test_offset_saturates() {
        let offset = |t: f64| Event::new(t, "/x", TypedValue::Empty).offset();
        assert_eq!(offset(1.5), Duration::from_millis(1500));
        assert_eq!(offset(-2.0), Duration::ZERO);
        assert_eq!(offset(1e20), Duration::MAX);
        assert_eq!(offset(f64::MAX), Duration::MAX);
    }
}

//! In-memory master log buffer.
//!
//! Every event the master emits is copied into a bounded ring so that operators
//! can page through recent logs without shell access. Ids start at 1, grow
//! monotonically, and are never reused even after eviction.

mod layer;

pub use layer::LogBufferLayer;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// One captured log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: i64,
    pub time: DateTime<Utc>,
    pub level: String,
    pub message: String,
}

/// Query window over the buffer, as supplied by API callers.
///
/// `greater_than_id` is exclusive, `less_than_id` is exclusive, `tail` caps the
/// number of returned entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogWindow {
    #[serde(default)]
    pub greater_than_id: Option<i64>,
    #[serde(default)]
    pub less_than_id: Option<i64>,
    #[serde(default)]
    pub tail: Option<usize>,
}

#[derive(Debug)]
struct Inner {
    capacity: usize,
    next_id: i64,
    entries: VecDeque<LogEntry>,
}

/// Bounded, shareable log ring.
#[derive(Debug, Clone)]
pub struct LogBuffer {
    inner: Arc<Mutex<Inner>>,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                capacity: capacity.max(1),
                next_id: 1,
                entries: VecDeque::new(),
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A panic while holding the lock cannot leave the ring half-written.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append an entry and return its id.
    pub fn push(&self, level: impl Into<String>, message: impl Into<String>) -> i64 {
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        if inner.entries.len() == inner.capacity {
            inner.entries.pop_front();
        }
        inner.entries.push_back(LogEntry {
            id,
            time: Utc::now(),
            level: level.into(),
            message: message.into(),
        });
        id
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries with `start_id <= id < end_id`.
    ///
    /// With a start bound the first `limit` matches are returned, otherwise the
    /// last `limit`.
    pub fn entries(
        &self,
        start_id: Option<i64>,
        end_id: Option<i64>,
        limit: Option<usize>,
    ) -> Vec<LogEntry> {
        let inner = self.lock();
        let matching = inner.entries.iter().filter(|e| {
            start_id.map_or(true, |start| e.id >= start) && end_id.map_or(true, |end| e.id < end)
        });

        match (limit, start_id) {
            (Some(limit), Some(_)) => matching.take(limit).cloned().collect(),
            (Some(limit), None) => {
                let mut tail: Vec<LogEntry> = matching.rev().take(limit).cloned().collect();
                tail.reverse();
                tail
            }
            (None, _) => matching.cloned().collect(),
        }
    }

    /// Apply an API window: `greater_than_id` shifts the start bound by one.
    pub fn window(&self, window: LogWindow) -> Vec<LogEntry> {
        let start = match window.greater_than_id {
            // Nothing can follow the largest id.
            Some(id) => match id.checked_add(1) {
                Some(start) => Some(start),
                None => return Vec::new(),
            },
            None => None,
        };
        self.entries(start, window.less_than_id, window.tail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn filled(n: usize) -> LogBuffer {
        let buffer = LogBuffer::new(100);
        for i in 0..n {
            buffer.push("INFO", format!("line {}", i + 1));
        }
        buffer
    }

    fn ids(entries: &[LogEntry]) -> Vec<i64> {
        entries.iter().map(|e| e.id).collect()
    }

    #[test]
    fn test_ids_start_at_one() {
        let buffer = LogBuffer::new(10);
        assert_eq!(buffer.push("INFO", "a"), 1);
        assert_eq!(buffer.push("INFO", "b"), 2);
    }

    #[test]
    fn test_greater_than_with_tail() {
        let buffer = filled(10);
        let window = LogWindow {
            greater_than_id: Some(3),
            less_than_id: None,
            tail: Some(2),
        };
        assert_eq!(ids(&buffer.window(window)), vec![4, 5]);
    }

    #[test]
    fn test_less_than_without_tail() {
        let buffer = filled(10);
        let window = LogWindow {
            less_than_id: Some(5),
            ..Default::default()
        };
        assert_eq!(ids(&buffer.window(window)), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_tail_without_start_takes_newest() {
        let buffer = filled(10);
        let window = LogWindow {
            tail: Some(3),
            ..Default::default()
        };
        assert_eq!(ids(&buffer.window(window)), vec![8, 9, 10]);
    }

    #[test]
    fn test_greater_than_max_id_is_empty() {
        let buffer = filled(10);
        let window: LogWindow =
            serde_json::from_str(r#"{"greater_than_id": 9223372036854775807}"#).unwrap();
        assert!(buffer.window(window).is_empty());

        let window = LogWindow {
            greater_than_id: Some(i64::MIN),
            tail: Some(2),
            ..LogWindow::default()
        };
        assert_eq!(ids(&buffer.window(window)), vec![1, 2]);
    }

    #[test]
    fn test_empty_result_serializes_as_array() {
        let buffer = LogBuffer::new(10);
        let entries = buffer.window(LogWindow::default());
        assert_eq!(serde_json::to_string(&entries).unwrap(), "[]");
    }

    #[test]
    fn test_eviction_keeps_ids() {
        let buffer = LogBuffer::new(3);
        for i in 0..5 {
            buffer.push("INFO", format!("{}", i));
        }
        assert_eq!(buffer.len(), 3);
        assert_eq!(ids(&buffer.entries(None, None, None)), vec![3, 4, 5]);
        assert_eq!(buffer.push("INFO", "next"), 6);
    }

    proptest! {
        #[test]
        fn prop_window_is_sorted_bounded_and_capped(
            n in 0usize..60,
            gt in proptest::option::of(0i64..70),
            lt in proptest::option::of(0i64..70),
            tail in proptest::option::of(0usize..20),
        ) {
            let buffer = filled(n);
            let window = LogWindow { greater_than_id: gt, less_than_id: lt, tail };
            let got = ids(&buffer.window(window));

            prop_assert!(got.windows(2).all(|w| w[0] < w[1]));
            if let Some(gt) = gt {
                prop_assert!(got.iter().all(|id| *id > gt));
            }
            if let Some(lt) = lt {
                prop_assert!(got.iter().all(|id| *id < lt));
            }
            if let Some(tail) = tail {
                prop_assert!(got.len() <= tail);
            }
        }
    }
}

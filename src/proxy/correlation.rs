use std::collections::HashMap;
use std::time::Instant;

use crate::chaos::ChaosApplied;

/// State tracked for one in-flight request. An id has at most one
/// in-flight entry at a time; a second request with the same id evicts
/// the first, and the evicted call is considered lost, not retried.
pub struct Pending {
    pub start: Instant,
    pub tool: Option<String>,
    pub chaos_applied: Option<ChaosApplied>,
}

#[derive(Default)]
pub struct CorrelationTable {
    inflight: HashMap<String, Pending>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: String, pending: Pending) {
        self.inflight.insert(id, pending);
    }

    /// Removes and returns the entry for `id`, if it was in flight.
    pub fn take(&mut self, id: &str) -> Option<Pending> {
        self.inflight.remove(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_request_with_same_id_evicts_the_first() {
        let mut table = CorrelationTable::new();
        table.insert(
            "1".to_string(),
            Pending {
                start: Instant::now(),
                tool: Some("first".to_string()),
                chaos_applied: None,
            },
        );
        table.insert(
            "1".to_string(),
            Pending {
                start: Instant::now(),
                tool: Some("second".to_string()),
                chaos_applied: None,
            },
        );
        let entry = table.take("1").unwrap();
        assert_eq!(entry.tool.as_deref(), Some("second"));
        assert!(table.take("1").is_none());
    }

    #[test]
    fn unknown_id_is_not_in_flight() {
        let mut table = CorrelationTable::new();
        assert!(table.take("missing").is_none());
    }
}

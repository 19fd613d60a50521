//! Per-request evaluation state
//!
//! An [`EvaluationContext`] is cheap to clone: everything shared is behind
//! an `Arc`, and only the timerange changes between nested evaluations
//! (timeshift, moving windows, training windows). Every such window is held
//! to the request's slot limit before anything is fetched for it.

use super::registry::Registry;
use crate::engine::traits::MetricMetadata;
use crate::error::{QueryError, Result};
use crate::fetch::{Cancellation, FetchCounter, ParallelFetcher};
use crate::profile::Profiler;
use crate::query::predicate::Predicate;
use crate::types::{SampleMethod, Timerange};
use parking_lot::Mutex;
use serde::{Serialize, Serializer};
use std::sync::Arc;

/// Write-only diagnostics attached to a query result
#[derive(Debug, Default)]
pub struct EvaluationNotes {
    notes: Mutex<Vec<String>>,
}

impl EvaluationNotes {
    /// Empty note list
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a note
    pub fn add_note(&self, note: impl Into<String>) {
        self.notes.lock().push(note.into());
    }

    /// Snapshot of all notes in insertion order
    pub fn notes(&self) -> Vec<String> {
        self.notes.lock().clone()
    }
}

impl Serialize for EvaluationNotes {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.notes().serialize(serializer)
    }
}

/// Everything an expression needs to evaluate
#[derive(Clone)]
pub struct EvaluationContext {
    /// Tag enumeration backend (usually the metadata cache)
    pub metadata: Arc<dyn MetricMetadata>,
    /// Parallel single-series fetcher
    pub fetcher: Arc<ParallelFetcher>,
    /// Per-request fetch quota
    pub fetch_counter: Arc<FetchCounter>,
    /// Predicate applied to every metric reference
    pub predicate: Arc<Predicate>,
    /// How raw points fold into slots
    pub sample_method: SampleMethod,
    /// Window being evaluated
    pub timerange: Timerange,
    /// Most slots any window of this request may span
    pub slot_limit: usize,
    /// Fires when the request deadline passes
    pub cancellation: Cancellation,
    /// Function lookup
    pub registry: Arc<Registry>,
    /// Timing spans for this request
    pub profiler: Arc<Profiler>,
    /// Diagnostics for this request
    pub notes: Arc<EvaluationNotes>,
}

impl EvaluationContext {
    /// Same context over a different window
    ///
    /// Fails with [`QueryError::SlotLimitExceeded`] when the window spans
    /// more slots than the request allows.
    pub fn with_timerange(&self, timerange: Timerange) -> Result<Self> {
        self.check_slots(&timerange)?;
        let mut copy = self.clone();
        copy.timerange = timerange;
        Ok(copy)
    }

    /// Reject windows wider than the slot limit
    pub fn check_slots(&self, timerange: &Timerange) -> Result<()> {
        let slots = timerange.slots();
        if slots > self.slot_limit {
            return Err(QueryError::SlotLimitExceeded {
                slots,
                limit: self.slot_limit,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notes_keep_order() {
        let notes = EvaluationNotes::new();
        notes.add_note("first");
        notes.add_note(String::from("second"));
        assert_eq!(notes.notes(), vec!["first", "second"]);
        assert_eq!(serde_json::to_string(&notes).unwrap(), r#"["first","second"]"#);
    }
}

//! Request-scoped timing spans
//!
//! A [`Profiler`] collects `{name, start, finish}` records for one request.
//! Spans are opened with [`Profiler::record`] and closed when the returned
//! guard drops, so nested operations produce nested (overlapping) spans.
//!
//! ```
//! use mqe::profile::Profiler;
//!
//! let profiler = Profiler::new();
//! {
//!     let _span = profiler.record("select.Execute");
//!     profiler.run("fetch", || 2 + 2);
//! }
//! let names: Vec<String> = profiler.all().into_iter().map(|p| p.name).collect();
//! assert_eq!(names, vec!["fetch", "select.Execute"]);
//! ```

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// One finished span, timestamps in epoch milliseconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Operation name
    pub name: String,
    /// When the span opened
    pub start: i64,
    /// When the span closed
    pub finish: i64,
}

impl Profile {
    /// Span length in milliseconds
    pub fn duration(&self) -> i64 {
        self.finish - self.start
    }
}

/// Thread-safe span collector
#[derive(Debug)]
pub struct Profiler {
    enabled: bool,
    profiles: Mutex<Vec<Profile>>,
}

impl Default for Profiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Profiler {
    /// Recording profiler
    pub fn new() -> Self {
        Self {
            enabled: true,
            profiles: Mutex::new(Vec::new()),
        }
    }

    /// Profiler that drops every span
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            profiles: Mutex::new(Vec::new()),
        }
    }

    /// Whether spans are kept
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Open a span that closes when the guard drops
    pub fn record(&self, name: impl Into<String>) -> ProfileSpan<'_> {
        ProfileSpan {
            profiler: self,
            name: name.into(),
            start: Utc::now().timestamp_millis(),
        }
    }

    /// Run `f` inside a span
    pub fn run<T>(&self, name: impl Into<String>, f: impl FnOnce() -> T) -> T {
        let _span = self.record(name);
        f()
    }

    /// Snapshot of the finished spans in completion order
    pub fn all(&self) -> Vec<Profile> {
        self.profiles.lock().clone()
    }

    fn finish(&self, profile: Profile) {
        if self.enabled {
            self.profiles.lock().push(profile);
        }
    }
}

/// Open span; closes on drop
#[derive(Debug)]
pub struct ProfileSpan<'a> {
    profiler: &'a Profiler,
    name: String,
    start: i64,
}

impl Drop for ProfileSpan<'_> {
    fn drop(&mut self) {
        self.profiler.finish(Profile {
            name: std::mem::take(&mut self.name),
            start: self.start,
            finish: Utc::now().timestamp_millis(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spans_close_in_order() {
        let profiler = Profiler::new();
        {
            let _outer = profiler.record("outer");
            let _inner = profiler.record("inner");
        }
        let all = profiler.all();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].name, "inner");
        assert_eq!(all[1].name, "outer");
        assert!(all[1].start <= all[0].start);
        assert!(all.iter().all(|p| p.duration() >= 0));
    }

    #[test]
    fn test_disabled_profiler_keeps_nothing() {
        let profiler = Profiler::disabled();
        assert_eq!(profiler.run("work", || 7), 7);
        assert!(profiler.all().is_empty());
        assert!(!profiler.is_enabled());
    }
}

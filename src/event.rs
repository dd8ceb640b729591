use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Kind of filesystem change we react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Created,
    Modified,
}

/// A single change notification, consumed immediately by the duplicate filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub timestamp: Instant,
    pub kind: EventKind,
    pub path: PathBuf,
}

impl Event {
    pub fn new(kind: EventKind, path: impl Into<PathBuf>) -> Self {
        Self::at(Instant::now(), kind, path)
    }

    pub fn at(timestamp: Instant, kind: EventKind, path: impl Into<PathBuf>) -> Self {
        Self {
            timestamp,
            kind,
            path: path.into(),
        }
    }

    fn same_change(&self, other: &Event) -> bool {
        self.kind == other.kind && self.path == other.path
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Suppresses a notification that repeats the immediately preceding one.
///
/// Only the single last event is remembered, and it is replaced on every
/// call whether or not the new event was a duplicate. There is no per-path
/// history: `A, B, A` inside the window reports no duplicate at all, because
/// the second `A` is compared against `B`.
#[derive(Debug)]
pub struct DuplicateFilter {
    window: Duration,
    last: Mutex<Option<Event>>,
}

impl DuplicateFilter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last: Mutex::new(None),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn is_duplicate(&self, event: &Event) -> bool {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        let duplicate = match last.as_ref() {
            Some(prev) => {
                let elapsed = event.timestamp.saturating_duration_since(prev.timestamp);
                elapsed < self.window && event.same_change(prev)
            }
            None => false,
        };
        *last = Some(event.clone());
        duplicate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(75);

    #[test]
    fn identical_event_inside_window_is_duplicate() {
        let filter = DuplicateFilter::new(WINDOW);
        let t0 = Instant::now();
        let a = Event::at(t0, EventKind::Created, "/drop/a.csv");
        let again = Event::at(t0 + Duration::from_millis(10), EventKind::Created, "/drop/a.csv");

        assert!(!filter.is_duplicate(&a));
        assert!(filter.is_duplicate(&again));
    }

    #[test]
    fn identical_event_after_window_is_not_duplicate() {
        let filter = DuplicateFilter::new(WINDOW);
        let t0 = Instant::now();
        let a = Event::at(t0, EventKind::Created, "/drop/a.csv");
        let later = Event::at(t0 + Duration::from_millis(200), EventKind::Created, "/drop/a.csv");

        assert!(!filter.is_duplicate(&a));
        assert!(!filter.is_duplicate(&later));
    }

    #[test]
    fn different_path_or_kind_is_not_duplicate() {
        let filter = DuplicateFilter::new(WINDOW);
        let t0 = Instant::now();
        let tick = Duration::from_millis(1);

        assert!(!filter.is_duplicate(&Event::at(t0, EventKind::Created, "/drop/a.csv")));
        assert!(!filter.is_duplicate(&Event::at(t0 + tick, EventKind::Created, "/drop/b.csv")));
        assert!(!filter.is_duplicate(&Event::at(t0 + tick * 2, EventKind::Modified, "/drop/b.csv")));
    }

    #[test]
    fn burst_is_compared_against_the_previous_event_only() {
        let filter = DuplicateFilter::new(WINDOW);
        let t0 = Instant::now();
        let tick = Duration::from_millis(5);
        let results: Vec<bool> = (0..3)
            .map(|i| {
                let ev = Event::at(t0 + tick * i, EventKind::Modified, "/drop/a.csv");
                filter.is_duplicate(&ev)
            })
            .collect();

        // The slot is overwritten with the duplicate itself, so the third
        // event is compared against the second and is also inside the window.
        assert_eq!(results, vec![false, true, true]);
    }

    #[test]
    fn interleaved_paths_are_not_suppressed() {
        let filter = DuplicateFilter::new(WINDOW);
        let t0 = Instant::now();
        let tick = Duration::from_millis(2);

        assert!(!filter.is_duplicate(&Event::at(t0, EventKind::Created, "/drop/a.csv")));
        assert!(!filter.is_duplicate(&Event::at(t0 + tick, EventKind::Created, "/drop/b.csv")));
        assert!(!filter.is_duplicate(&Event::at(t0 + tick * 2, EventKind::Created, "/drop/a.csv")));
    }
}

use crate::config::Config;
use crate::dispatcher::{DispatchOutcome, Dispatcher};
use crate::error::WatchError;
use crate::metrics;
use crate::registry::HandlerRegistry;
use crate::source::EventSource;
use crate::stabilizer::{Admission, FileStabilizer, StablePath};
use crate::store::SeenFileStore;
use serde::Serialize;
use std::collections::VecDeque;
use std::fs;
use std::time::Duration;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Watching,
    Stopped,
}

/// Counters for one pass of the main loop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub observed: usize,
    pub admitted: usize,
    pub deferred: usize,
    pub quarantined: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub unmatched: usize,
    pub load_errors: usize,
    pub admission_errors: usize,
    pub retried: usize,
    /// A stop request cut the pass short
    pub interrupted: bool,
}

impl CycleReport {
    fn absorb(&mut self, other: &CycleReport) {
        self.observed += other.observed;
        self.admitted += other.admitted;
        self.deferred += other.deferred;
        self.quarantined += other.quarantined;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.unmatched += other.unmatched;
        self.load_errors += other.load_errors;
        self.admission_errors += other.admission_errors;
        self.retried += other.retried;
        self.interrupted |= other.interrupted;
    }

    fn dispatched(&self) -> usize {
        self.succeeded + self.failed + self.unmatched + self.load_errors
    }

    fn has_activity(&self) -> bool {
        self.dispatched() > 0 || self.quarantined > 0 || self.admission_errors > 0
    }
}

/// A failed file waiting to be offered to its handler again.
#[derive(Debug, Clone)]
struct RetryEntry {
    file: StablePath,
    attempts: u32,
}

/// The watch-and-dispatch loop.
///
/// Files are handled strictly one at a time: observe, admit, dispatch, then
/// the next. A file whose handler failed stays in place and is offered to
/// dispatch again at the start of every following cycle while it still
/// exists, with no back-off. When `quarantine_after_failures` is set the file
/// is moved to quarantine once it has failed that many times. The retry
/// queue lives in memory only; after a restart a failed file is already
/// seen and stays put until someone removes it and drops it again.
///
/// A seen name stays seen while its file is in the directory, even when the
/// file is edited. Once the file has left the name is free and a new file
/// under it is admitted with a unique name. Leaving is noticed after a
/// dispatch or retry, on quarantine, and at start-up.
pub struct Watcher {
    source: Box<dyn EventSource>,
    stabilizer: FileStabilizer,
    dispatcher: Dispatcher,
    retry: VecDeque<RetryEntry>,
    poll_delay: Duration,
    quarantine_after_failures: Option<u32>,
    state: LoopState,
}

impl Watcher {
    pub fn new(source: Box<dyn EventSource>, stabilizer: FileStabilizer, dispatcher: Dispatcher) -> Self {
        Self {
            source,
            stabilizer,
            dispatcher,
            retry: VecDeque::new(),
            poll_delay: Duration::from_millis(crate::constants::DEFAULT_POLL_DELAY_MS),
            quarantine_after_failures: None,
            state: LoopState::Watching,
        }
    }

    /// Wire up store, stabilizer and dispatcher from configuration.
    pub fn from_config(
        config: &Config,
        source: Box<dyn EventSource>,
        registry: HandlerRegistry,
    ) -> Result<Self, WatchError> {
        fs::create_dir_all(&config.watch.dir)?;
        let store = SeenFileStore::open(config.store_path())?;
        info!(store = %store.path().display(), entries = store.len(), "seen-file store opened");
        let mut stabilizer = FileStabilizer::from_config(config, store);
        let moved = stabilizer.reconcile(&config.watch.dir)?;
        if moved > 0 {
            info!(records = moved, "seen files no longer in the watched directory");
        }

        Ok(Self::new(source, stabilizer, Dispatcher::new(registry))
            .with_poll_delay(config.poll_delay())
            .with_quarantine_after_failures(config.handlers.quarantine_after_failures))
    }

    pub fn with_poll_delay(mut self, delay: Duration) -> Self {
        self.poll_delay = delay;
        self
    }

    pub fn with_quarantine_after_failures(mut self, limit: Option<u32>) -> Self {
        self.quarantine_after_failures = limit;
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn pending_retries(&self) -> usize {
        self.retry.len()
    }

    pub fn stabilizer(&self) -> &FileStabilizer {
        &self.stabilizer
    }

    /// One pass: retries first, then newly observed files.
    ///
    /// `stop` is checked before each file, never during a handler call.
    pub fn run_cycle(&mut self, stop: &dyn Fn() -> bool) -> CycleReport {
        let mut report = CycleReport::default();

        let queued = std::mem::take(&mut self.retry);
        let mut queued = queued.into_iter();
        while let Some(entry) = queued.next() {
            if stop() {
                report.interrupted = true;
                self.retry.push_back(entry);
                self.retry.extend(queued);
                return report;
            }
            if !entry.file.path().exists() {
                debug!(file = %entry.file.name(), "retry target no longer present, dropping");
                self.note_relocated(&entry.file);
                continue;
            }
            report.retried += 1;
            let outcome = self.dispatcher.dispatch(&entry.file);
            self.settle(entry.file, entry.attempts, outcome, &mut report);
        }

        let observed = self.source.observe();
        report.observed = observed.len();
        for path in observed {
            if stop() {
                report.interrupted = true;
                break;
            }
            match self.stabilizer.admit(&path) {
                Ok(admission) => {
                    metrics::record_admission(admission.label());
                    match admission {
                        Admission::Admitted(stable) => {
                            report.admitted += 1;
                            let outcome = self.dispatcher.dispatch(&stable);
                            self.settle(stable, 0, outcome, &mut report);
                        }
                        Admission::Deferred => report.deferred += 1,
                        Admission::Quarantined(_) => report.quarantined += 1,
                        Admission::AlreadySeen | Admission::Skipped => {}
                    }
                }
                Err(e) => {
                    metrics::record_admission("error");
                    report.admission_errors += 1;
                    warn!(path = %path.display(), error = %e, "admission failed");
                }
            }
        }

        metrics::record_retry_queue(self.retry.len());
        report
    }

    fn settle(&mut self, file: StablePath, previous_attempts: u32, outcome: DispatchOutcome, report: &mut CycleReport) {
        metrics::record_dispatch(outcome.label(), outcome.handler());
        match outcome {
            DispatchOutcome::Success { .. } => {
                report.succeeded += 1;
                if !file.path().exists() {
                    self.note_relocated(&file);
                }
            }
            DispatchOutcome::NoHandlerMatched => report.unmatched += 1,
            DispatchOutcome::LoadError { .. } => {
                report.load_errors += 1;
                if !file.path().exists() {
                    self.note_relocated(&file);
                }
            }
            DispatchOutcome::Failure { handler, .. } => {
                report.failed += 1;
                let attempts = previous_attempts + 1;
                match self.quarantine_after_failures {
                    Some(limit) if attempts >= limit => match self.stabilizer.quarantine(&file) {
                        Ok(target) => {
                            report.quarantined += 1;
                            warn!(
                                file = %file.name(),
                                handler = %handler,
                                attempts,
                                to = %target.display(),
                                "giving up after repeated failures, quarantined"
                            );
                        }
                        Err(e) => {
                            error!(file = %file.name(), error = %e, "failed to quarantine; will retry");
                            self.retry.push_back(RetryEntry { file, attempts });
                        }
                    },
                    _ => self.retry.push_back(RetryEntry { file, attempts }),
                }
            }
        }
    }

    fn note_relocated(&mut self, file: &StablePath) {
        if let Err(e) = self.stabilizer.mark_relocated(file) {
            warn!(file = %file.name(), error = %e, "could not record that file left the directory");
        }
    }

    fn cycle_in_place(&mut self, shutdown: &watch::Receiver<bool>) -> CycleReport {
        let stop = || *shutdown.borrow();
        let multi_thread = Handle::try_current()
            .map(|h| h.runtime_flavor() == RuntimeFlavor::MultiThread)
            .unwrap_or(false);
        if multi_thread {
            // Let the runtime keep serving the signal task while handlers block
            tokio::task::block_in_place(|| self.run_cycle(&stop))
        } else {
            self.run_cycle(&stop)
        }
    }

    /// Run until `shutdown` turns true (or its sender is dropped).
    ///
    /// An in-flight dispatch always completes; the sleep between cycles
    /// ends as soon as the signal arrives.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> CycleReport {
        info!(
            source = %self.source.describe(),
            handlers = self.dispatcher.registry().len(),
            poll_delay_ms = self.poll_delay.as_millis() as u64,
            "🚀 watching for files"
        );
        self.state = LoopState::Watching;
        let mut totals = CycleReport::default();

        while self.state == LoopState::Watching {
            if *shutdown.borrow() {
                self.state = LoopState::Stopped;
                break;
            }

            let report = self.cycle_in_place(&shutdown);
            if report.has_activity() {
                info!(
                    admitted = report.admitted,
                    succeeded = report.succeeded,
                    failed = report.failed,
                    unmatched = report.unmatched,
                    quarantined = report.quarantined,
                    retry_queue = self.retry.len(),
                    "cycle finished"
                );
            }
            totals.absorb(&report);

            // Sleep the full delay unless a stop request arrives
            let wake_at = tokio::time::Instant::now() + self.poll_delay;
            loop {
                tokio::select! {
                    _ = tokio::time::sleep_until(wake_at) => break,
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            self.state = LoopState::Stopped;
                            break;
                        }
                    }
                }
            }
        }

        info!(
            succeeded = totals.succeeded,
            failed = totals.failed,
            unmatched = totals.unmatched,
            pending_retries = self.retry.len(),
            "🛑 stopped"
        );
        totals
    }
}

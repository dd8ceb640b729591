use crate::handlers::Handler;
use crate::registry::HandlerRegistry;
use crate::stabilizer::StablePath;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;
use tracing::{error, info, instrument, warn};

/// What happened to one file on one dispatch attempt.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// The handler processed the file and took care of relocating it
    Success { handler: String },
    /// The handler returned an error or panicked; the file is untouched
    Failure { handler: String, error: anyhow::Error },
    NoHandlerMatched,
    /// The admitted file could not be loaded for dispatch (gone or unreadable)
    LoadError { error: String },
}

impl DispatchOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            DispatchOutcome::Success { .. } => "success",
            DispatchOutcome::Failure { .. } => "failure",
            DispatchOutcome::NoHandlerMatched => "no_handler",
            DispatchOutcome::LoadError { .. } => "load_error",
        }
    }

    pub fn handler(&self) -> Option<&str> {
        match self {
            DispatchOutcome::Success { handler } | DispatchOutcome::Failure { handler, .. } => {
                Some(handler.as_str())
            }
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, DispatchOutcome::Success { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, DispatchOutcome::Failure { .. })
    }
}

/// Routes each admitted file to the first matching handler.
pub struct Dispatcher {
    registry: HandlerRegistry,
}

impl Dispatcher {
    pub fn new(registry: HandlerRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    #[instrument(skip(self, file), fields(file = %file.name()))]
    pub fn dispatch(&self, file: &StablePath) -> DispatchOutcome {
        match std::fs::metadata(file.path()) {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => {
                return self.load_error(file, "not a regular file".to_string());
            }
            Err(e) => {
                return self.load_error(file, e.to_string());
            }
        }

        let Some(handler) = self.registry.first_match(file.name()) else {
            warn!(path = %file.path().display(), "no handler matched; file left in place");
            return DispatchOutcome::NoHandlerMatched;
        };

        let started = Instant::now();
        match invoke(handler, file) {
            Ok(()) => {
                info!(
                    handler = %handler.name(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "dispatched"
                );
                DispatchOutcome::Success {
                    handler: handler.name().to_string(),
                }
            }
            Err(e) => {
                error!(
                    handler = %handler.name(),
                    path = %file.path().display(),
                    error = %format!("{:#}", e),
                    "handler failed; file left in place"
                );
                DispatchOutcome::Failure {
                    handler: handler.name().to_string(),
                    error: e,
                }
            }
        }
    }

    fn load_error(&self, file: &StablePath, error: String) -> DispatchOutcome {
        warn!(path = %file.path().display(), error = %error, "admitted file cannot be loaded for dispatch");
        DispatchOutcome::LoadError { error }
    }
}

/// Run the handler, turning a panic into an ordinary error.
fn invoke(handler: &dyn Handler, file: &StablePath) -> anyhow::Result<()> {
    match panic::catch_unwind(AssertUnwindSafe(|| handler.process(file.path()))) {
        Ok(result) => result,
        Err(payload) => Err(anyhow::anyhow!("handler panicked: {}", panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::{ArchiveHandler, MatchCriteria};
    use std::fs;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Scripted {
        name: String,
        criteria: MatchCriteria,
        calls: Arc<AtomicUsize>,
        behaviour: fn(&Path) -> anyhow::Result<()>,
    }

    impl Handler for Scripted {
        fn name(&self) -> &str {
            &self.name
        }
        fn criteria(&self) -> &MatchCriteria {
            &self.criteria
        }
        fn process(&self, path: &Path) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.behaviour)(path)
        }
    }

    fn scripted(name: &str, subs: &[&str], behaviour: fn(&Path) -> anyhow::Result<()>) -> (Box<dyn Handler>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = Scripted {
            name: name.to_string(),
            criteria: MatchCriteria::new("csv", subs.iter().copied()),
            calls: calls.clone(),
            behaviour,
        };
        (Box::new(handler), calls)
    }

    fn stable(path: &Path) -> StablePath {
        let name = path.file_name().unwrap().to_str().unwrap().to_string();
        StablePath::from_parts(path.to_path_buf(), name.clone(), name)
    }

    #[test]
    fn only_first_matching_handler_runs() {
        let tmp = tempfile::tempdir().unwrap();
        let input = tmp.path().join("ATMActivityReportforcommissions_2024-08-04.csv");
        fs::write(&input, "x").unwrap();

        let (first, first_calls) = scripted("a_atm", &["ATMActivity"], |_| Ok(()));
        let (second, second_calls) = scripted("b_atm", &["ATMActivityReport"], |_| Ok(()));
        let mut registry = HandlerRegistry::new();
        registry.register(second).unwrap();
        registry.register(first).unwrap();

        let outcome = Dispatcher::new(registry).dispatch(&stable(&input));

        assert!(outcome.is_success());
        assert_eq!(outcome.handler(), Some("a_atm"));
        assert_eq!(first_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn error_and_panic_are_failures_and_leave_file() {
        let tmp = tempfile::tempdir().unwrap();
        let input = tmp.path().join("Broken_0804.csv");
        fs::write(&input, "x").unwrap();

        let (failing, _) = scripted("failing", &["Broken"], |_| Err(anyhow::anyhow!("bad header row")));
        let mut registry = HandlerRegistry::new();
        registry.register(failing).unwrap();
        let outcome = Dispatcher::new(registry).dispatch(&stable(&input));
        match outcome {
            DispatchOutcome::Failure { handler, error } => {
                assert_eq!(handler, "failing");
                assert!(error.to_string().contains("bad header row"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(input.exists());

        let (panicking, _) = scripted("panicking", &["Broken"], |_| panic!("index out of range"));
        let mut registry = HandlerRegistry::new();
        registry.register(panicking).unwrap();
        let outcome = Dispatcher::new(registry).dispatch(&stable(&input));
        assert!(outcome.is_failure());
        assert!(input.exists());
    }

    #[test]
    fn unmatched_file_is_left_alone() {
        let tmp = tempfile::tempdir().unwrap();
        let input = tmp.path().join("Unknown.csv");
        fs::write(&input, "x").unwrap();

        let mut registry = HandlerRegistry::new();
        registry
            .register(Box::new(ArchiveHandler::new(
                "deposits",
                MatchCriteria::new("csv", ["Deposits"]),
                tmp.path().join("archive"),
            )))
            .unwrap();

        let outcome = Dispatcher::new(registry).dispatch(&stable(&input));
        assert!(matches!(outcome, DispatchOutcome::NoHandlerMatched));
        assert!(input.exists());
    }

    #[test]
    fn vanished_file_is_a_load_error() {
        let tmp = tempfile::tempdir().unwrap();
        let (handler, calls) = scripted("any", &["Gone"], |_| Ok(()));
        let mut registry = HandlerRegistry::new();
        registry.register(handler).unwrap();

        let outcome = Dispatcher::new(registry).dispatch(&stable(&tmp.path().join("Gone.csv")));
        assert!(matches!(outcome, DispatchOutcome::LoadError { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}

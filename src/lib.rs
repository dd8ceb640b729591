//! Drop-directory watcher that routes incoming data files to content handlers.
//!
//! Pipeline: event source → duplicate filter → stabilizer (unique name,
//! seen-file store) → dispatcher (first matching handler) → main loop.

pub mod config;
pub mod constants;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod handlers;
pub mod logging;
pub mod metrics;
pub mod naming;
pub mod pipeline;
pub mod registry;
pub mod source;
pub mod stabilizer;
pub mod store;

pub use config::Config;
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use error::{AdmissionError, LoadError, StoreError, WatchError};
pub use handlers::{Handler, MatchCriteria};
pub use pipeline::{CycleReport, LoopState, Watcher};
pub use registry::HandlerRegistry;
pub use stabilizer::{Admission, FileStabilizer, StablePath};
pub use store::SeenFileStore;

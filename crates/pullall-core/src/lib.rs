//! `pullall-core`: refresh every git checkout under a directory.
//!
//! # Architecture
//!
//! ```text
//! CancelSource     ← fires once: Ctrl-C or the first failed target
//!     │
//!     ▼
//! Orchestrator     ← lists ROOT/*, spawns one task per directory,
//!     │              at most `jobs` running, writes output as they finish
//!     ▼
//! Refresher        ← probes for `.git`, runs `git pull -p`, captures output
//!     │
//!     ▼
//! Outcome          ← Completed / Skipped / Failed
//! ```
//!
//! Only the first failure is reported in the [`BatchResult`]; it cancels the
//! rest of the batch.

pub mod cancel;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod refresh;
pub mod target;

pub use cancel::{CancelCause, CancelSource};
pub use config::{Config, DEFAULT_JOBS};
pub use error::{FailureKind, PullError, RefreshError, Result};
pub use orchestrator::{BatchReport, BatchResult, Orchestrator, TargetFailure};
pub use refresh::{CommandRefresher, Outcome, RefreshCommand, Refresher};
pub use target::Target;

//! Bounded, cancellable fan-out of refreshes over a directory.
//!
//! The [`Orchestrator`] enumerates the immediate subdirectories of a root,
//! hands each to a [`Refresher`] on its own Tokio task, and never lets more
//! than `jobs` of them run at once. Completed output is written to the run's
//! output stream as each target finishes. The first failure is kept and
//! cancels everything still running; later failures are only logged.
//!
//! All aggregation state (counters, the failure slot, the output stream) is
//! owned by the single loop in [`Orchestrator::run`], so workers never touch
//! shared mutable state beyond the semaphore permit they hold.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;

use futures::FutureExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Semaphore;
use tokio::task::{self, JoinError, JoinSet};
use tracing::{debug, info, warn};

use crate::cancel::{CancelCause, CancelSource};
use crate::config::Config;
use crate::error::{RefreshError, Result};
use crate::refresh::{CommandRefresher, Outcome, Refresher};
use crate::target::{self, Target};

// ─── Results ──────────────────────────────────────────────────────────────

/// A target that failed, with whatever its command printed.
#[derive(Debug)]
pub struct TargetFailure {
    pub target: Target,
    pub error: RefreshError,
    pub output: Vec<u8>,
}

impl fmt::Display for TargetFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.target, self.error)
    }
}

impl std::error::Error for TargetFailure {}

/// Batch-level verdict. Only the first observed failure is kept.
#[derive(Debug)]
pub enum BatchResult {
    AllSucceeded,
    FirstFailure(TargetFailure),
}

impl BatchResult {
    pub fn is_success(&self) -> bool {
        matches!(self, BatchResult::AllSucceeded)
    }

    pub fn failure(&self) -> Option<&TargetFailure> {
        match self {
            BatchResult::AllSucceeded => None,
            BatchResult::FirstFailure(f) => Some(f),
        }
    }
}

/// The verdict plus per-outcome tallies for one run.
#[derive(Debug)]
pub struct BatchReport {
    pub result: BatchResult,
    pub completed: usize,
    pub skipped: usize,
    /// Targets whose refresh genuinely failed.
    pub failed: usize,
    /// Targets aborted by batch-wide cancellation.
    pub cancelled: usize,
    /// Targets never submitted because the batch was cancelled first.
    pub not_started: usize,
}

// ─── Orchestrator ─────────────────────────────────────────────────────────

pub struct Orchestrator<R = CommandRefresher> {
    refresher: Arc<R>,
    jobs: NonZeroUsize,
    cancel: CancelSource,
}

impl Orchestrator<CommandRefresher> {
    pub fn from_config(config: &Config, cancel: CancelSource) -> Self {
        Self::new(
            CommandRefresher::new(config.command.clone()),
            config.jobs,
            cancel,
        )
    }
}

impl<R: Refresher> Orchestrator<R> {
    pub fn new(refresher: R, jobs: NonZeroUsize, cancel: CancelSource) -> Self {
        Self {
            refresher: Arc::new(refresher),
            jobs,
            cancel,
        }
    }

    pub fn refresher(&self) -> &R {
        &self.refresher
    }

    pub fn cancel_source(&self) -> &CancelSource {
        &self.cancel
    }

    /// Refresh every subdirectory of `root`, writing completed output to `out`.
    ///
    /// Returns `Err` only when `root` cannot be listed, in which case nothing
    /// was scheduled. Otherwise every submitted task has finished by the time
    /// this returns.
    pub async fn run<W>(&self, root: &Path, out: &mut W) -> Result<BatchReport>
    where
        W: AsyncWrite + Unpin,
    {
        let targets = target::discover(root)?;
        info!(
            root = %root.display(),
            targets = targets.len(),
            jobs = self.jobs.get(),
            "refreshing checkouts"
        );

        let budget = Arc::new(Semaphore::new(self.jobs.get()));
        let mut queue = targets.into_iter();
        let mut next = queue.next();
        let mut tasks = JoinSet::new();
        let mut tally = Tally::default();

        loop {
            let submitting = next.is_some() && !self.cancel.is_cancelled();
            tokio::select! {
                biased;
                Some(joined) = tasks.join_next_with_id() => {
                    tally.join(joined, out, &self.cancel).await;
                }
                _ = self.cancel.cancelled(), if submitting => {}
                permit = Arc::clone(&budget).acquire_owned(), if submitting => {
                    let Ok(permit) = permit else { break };
                    if let Some(target) = next.take() {
                        let task = Task {
                            target: target.clone(),
                            cancel: self.cancel.clone(),
                        };
                        let refresher = Arc::clone(&self.refresher);
                        let handle = tasks.spawn(async move {
                            let _permit = permit;
                            task.execute(refresher).await
                        });
                        tally.running.insert(handle.id(), target);
                        next = queue.next();
                    }
                },
                else => break,
            }
        }

        // Drain anything left if the semaphore loop exited early.
        while let Some(joined) = tasks.join_next_with_id().await {
            tally.join(joined, out, &self.cancel).await;
        }

        let unstarted: Vec<Target> = next.into_iter().chain(queue).collect();
        tally.not_started = unstarted.len();
        if tally.failure.is_none() {
            if let (Some(cause), Some(first)) = (self.cancel.cause(), unstarted.into_iter().next())
            {
                tally.failure = Some(TargetFailure {
                    target: first,
                    error: RefreshError::Cancelled { cause },
                    output: Vec::new(),
                });
            }
        }

        let report = tally.finish();
        info!(
            completed = report.completed,
            skipped = report.skipped,
            failed = report.failed,
            cancelled = report.cancelled,
            not_started = report.not_started,
            "refresh finished"
        );
        Ok(report)
    }
}

// ─── Task ─────────────────────────────────────────────────────────────────

/// One target bound to the batch's cancellation source.
struct Task {
    target: Target,
    cancel: CancelSource,
}

impl Task {
    async fn execute<R: Refresher>(self, refresher: Arc<R>) -> (Target, Outcome) {
        let outcome = AssertUnwindSafe(refresher.refresh(&self.target, &self.cancel))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Outcome::failed(RefreshError::Panicked(panic_message(&*panic)))
            });
        (self.target, outcome)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ─── Tally ────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Tally {
    /// Targets of submitted tasks that have not been joined yet.
    running: HashMap<task::Id, Target>,
    failure: Option<TargetFailure>,
    completed: usize,
    skipped: usize,
    failed: usize,
    cancelled: usize,
    not_started: usize,
}

impl Tally {
    /// Settle a joined task. A task that died without returning its outcome
    /// still fails its target.
    async fn join<W>(
        &mut self,
        joined: std::result::Result<(task::Id, (Target, Outcome)), JoinError>,
        out: &mut W,
        cancel: &CancelSource,
    ) where
        W: AsyncWrite + Unpin,
    {
        match joined {
            Ok((id, (target, outcome))) => {
                self.running.remove(&id);
                self.settle(target, outcome, out, cancel).await;
            }
            Err(e) => {
                let Some(target) = self.running.remove(&e.id()) else {
                    warn!(error = %e, "unknown refresh task did not complete");
                    return;
                };
                warn!(repo = %target, error = %e, "refresh task did not complete");
                let error = if e.is_panic() {
                    RefreshError::Panicked(panic_message(&*e.into_panic()))
                } else {
                    RefreshError::Aborted
                };
                self.failed += 1;
                self.record(
                    TargetFailure {
                        target,
                        error,
                        output: Vec::new(),
                    },
                    cancel,
                );
            }
        }
    }

    async fn settle<W>(
        &mut self,
        target: Target,
        outcome: Outcome,
        out: &mut W,
        cancel: &CancelSource,
    ) where
        W: AsyncWrite + Unpin,
    {
        match outcome {
            Outcome::Completed { output } => match write_output(out, &output).await {
                Ok(()) => {
                    debug!(repo = %target, bytes = output.len(), "refresh completed");
                    self.completed += 1;
                }
                Err(source) => {
                    self.failed += 1;
                    self.record(
                        TargetFailure {
                            target,
                            error: RefreshError::Output { source },
                            output,
                        },
                        cancel,
                    );
                }
            },
            Outcome::Skipped => {
                debug!(repo = %target, "not a checkout");
                self.skipped += 1;
            }
            Outcome::Failed { error, output } => {
                if error.is_cancellation() {
                    self.cancelled += 1;
                } else {
                    self.failed += 1;
                }
                self.record(
                    TargetFailure {
                        target,
                        error,
                        output,
                    },
                    cancel,
                );
            }
        }
    }

    /// First writer wins; the winner cancels the rest of the batch.
    fn record(&mut self, failure: TargetFailure, cancel: &CancelSource) {
        if self.failure.is_none() {
            debug!(
                repo = %failure.target,
                error = %failure.error,
                "first failure, cancelling batch"
            );
            cancel.cancel(CancelCause::PeerFailed);
            self.failure = Some(failure);
        } else if failure.error.is_cancellation() {
            debug!(repo = %failure.target, "refresh cancelled");
        } else {
            warn!(
                repo = %failure.target,
                error = %failure.error,
                "additional failure not reported"
            );
        }
    }

    fn finish(self) -> BatchReport {
        let result = match self.failure {
            Some(f) => BatchResult::FirstFailure(f),
            None => BatchResult::AllSucceeded,
        };
        BatchReport {
            result,
            completed: self.completed,
            skipped: self.skipped,
            failed: self.failed,
            cancelled: self.cancelled,
            not_started: self.not_started,
        }
    }
}

async fn write_output<W>(out: &mut W, output: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    if output.is_empty() {
        return Ok(());
    }
    out.write_all(output).await?;
    out.flush().await
}

// ─── Tests ────────────────────────────────────────────────────────────────

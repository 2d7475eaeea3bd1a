use anyhow::Result;
use pullall_core::{BatchResult, CancelSource, Config, Orchestrator, RefreshCommand};
use std::num::NonZeroUsize;
use std::path::Path;

use crate::output;

/// Refresh every checkout under `root`.
///
/// Output of successful refreshes goes to stdout as each one finishes. On
/// failure the failed target's captured output goes to stderr and the
/// failure itself is returned for `main` to report.
pub fn run(root: &Path, jobs: NonZeroUsize, git: &str) -> Result<()> {
    let command = RefreshCommand::new(resolve_program(git));
    let config = Config::default().with_jobs(jobs).with_command(command);

    let rt = tokio::runtime::Runtime::new()?;
    let report = rt.block_on(async {
        let cancel = CancelSource::new();
        let interrupt = cancel.cancel_on_interrupt();
        let orchestrator = Orchestrator::from_config(&config, cancel);

        let mut stdout = tokio::io::stdout();
        let report = orchestrator.run(root, &mut stdout).await;
        interrupt.abort();
        report
    })?;

    match report.result {
        BatchResult::AllSucceeded => Ok(()),
        BatchResult::FirstFailure(failure) => {
            output::print_captured(&failure.output);
            Err(failure.into())
        }
    }
}

/// Look `program` up on `PATH`, keeping the bare name if it cannot be found
/// so each checkout reports its own launch failure.
fn resolve_program(program: &str) -> String {
    match which::which(program) {
        Ok(path) => {
            tracing::debug!(program, path = %path.display(), "resolved refresh tool");
            path.to_string_lossy().into_owned()
        }
        Err(e) => {
            tracing::warn!(program, error = %e, "refresh tool not found on PATH");
            program.to_string()
        }
    }
}

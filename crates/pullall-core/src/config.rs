use std::num::NonZeroUsize;

use crate::refresh::RefreshCommand;

/// Number of refreshes allowed to run at once when nothing else is configured.
pub const DEFAULT_JOBS: NonZeroUsize = match NonZeroUsize::new(10) {
    Some(n) => n,
    None => unreachable!(),
};

/// Settings for one batch run.
#[derive(Debug, Clone)]
pub struct Config {
    /// Concurrency budget: upper bound on simultaneously running refreshes.
    pub jobs: NonZeroUsize,
    pub command: RefreshCommand,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            jobs: DEFAULT_JOBS,
            command: RefreshCommand::default(),
        }
    }
}

impl Config {
    pub fn with_jobs(mut self, jobs: NonZeroUsize) -> Self {
        self.jobs = jobs;
        self
    }

    pub fn with_command(mut self, command: RefreshCommand) -> Self {
        self.command = command;
        self
    }
}

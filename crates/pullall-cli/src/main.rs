mod output;
mod pull;

use clap::Parser;
use pullall_core::DEFAULT_JOBS;
use std::num::NonZeroUsize;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "pullall",
    about = "Run `git pull -p` in every checkout directly under a directory",
    version
)]
struct Cli {
    /// Directory whose immediate subdirectories are refreshed
    root: PathBuf,

    /// Maximum number of refreshes running at once
    #[arg(short = 'j', long, env = "PULLALL_JOBS", default_value_t = DEFAULT_JOBS)]
    jobs: NonZeroUsize,

    /// Refresh tool invoked in each checkout
    #[arg(long, env = "PULLALL_GIT", default_value = "git")]
    git: String,
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = pull::run(&cli.root, cli.jobs, &cli.git);

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

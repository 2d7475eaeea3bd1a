//! Refreshing a single target.
//!
//! [`CommandRefresher`] probes a target for the checkout marker, runs the
//! refresh command inside it and captures stdout and stderr into one buffer.
//! Both streams share a single pipe, so the buffer holds the bytes in the
//! order the child wrote them.
//! The subprocess is bound to the batch [`CancelSource`]: when the source
//! fires, the child is killed and reaped before the outcome is returned.

use std::future::Future;
use std::io;
use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};

use crate::cancel::CancelSource;
use crate::error::RefreshError;
use crate::target::Target;

// ─── Outcome ──────────────────────────────────────────────────────────────

/// Terminal classification of one target's refresh.
#[derive(Debug)]
pub enum Outcome {
    /// The refresh command ran and exited successfully.
    Completed { output: Vec<u8> },
    /// The target is not a checkout; nothing was run.
    Skipped,
    /// The refresh could not be performed. `output` holds whatever the
    /// command printed before it failed or was cancelled.
    Failed {
        error: RefreshError,
        output: Vec<u8>,
    },
}

impl Outcome {
    pub fn failed(error: RefreshError) -> Self {
        Outcome::Failed {
            error,
            output: Vec::new(),
        }
    }
}

// ─── Refresher ────────────────────────────────────────────────────────────

/// Something that can refresh one target.
///
/// Implementations must return promptly once `cancel` fires and must not
/// leave child processes running after they return.
pub trait Refresher: Send + Sync + 'static {
    fn refresh(
        &self,
        target: &Target,
        cancel: &CancelSource,
    ) -> impl Future<Output = Outcome> + Send;
}

// ─── RefreshCommand ───────────────────────────────────────────────────────

/// The external command used to refresh a checkout, and the marker entry
/// that identifies one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshCommand {
    program: String,
    args: Vec<String>,
    marker: String,
}

impl Default for RefreshCommand {
    fn default() -> Self {
        Self::new("git")
    }
}

impl RefreshCommand {
    /// `<program> pull -p`, run in directories containing `.git`.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: vec!["pull".into(), "-p".into()],
            marker: ".git".into(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = marker.into();
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Start the command in `target` with stdout and stderr joined on one
    /// pipe, returning the child and the read end of that pipe.
    fn spawn(&self, target: &Target) -> io::Result<(Child, OutputReader)> {
        let (reader, writer) = io::pipe()?;
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .current_dir(target.path())
            .stdin(Stdio::null())
            .stdout(writer.try_clone()?)
            .stderr(writer)
            .kill_on_drop(true);
        let child = cmd.spawn()?;
        // The command holds the parent's write ends; the reader only sees EOF
        // once they are closed.
        drop(cmd);
        Ok((child, output_reader(reader)?))
    }
}

// ─── CommandRefresher ─────────────────────────────────────────────────────

/// Production [`Refresher`] that shells out to a [`RefreshCommand`].
#[derive(Debug, Clone, Default)]
pub struct CommandRefresher {
    command: RefreshCommand,
}

impl CommandRefresher {
    pub fn new(command: RefreshCommand) -> Self {
        Self { command }
    }
}

impl Refresher for CommandRefresher {
    async fn refresh(&self, target: &Target, cancel: &CancelSource) -> Outcome {
        if let Some(cause) = cancel.cause() {
            return Outcome::failed(RefreshError::Cancelled { cause });
        }

        match tokio::fs::metadata(target.path().join(self.command.marker())).await {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(repo = %target, "no checkout marker, skipping");
                return Outcome::Skipped;
            }
            Err(source) => return Outcome::failed(RefreshError::Probe { source }),
        }

        run_command(&self.command, target, cancel).await
    }
}

/// Spawn the refresh command in `target` and drive it to an [`Outcome`].
async fn run_command(
    command: &RefreshCommand,
    target: &Target,
    cancel: &CancelSource,
) -> Outcome {
    let (mut child, mut reader) = match command.spawn(target) {
        Ok(spawned) => spawned,
        Err(source) => {
            return Outcome::failed(RefreshError::Launch {
                program: command.program().to_string(),
                source,
            })
        }
    };
    tracing::debug!(repo = %target, pid = ?child.id(), "refresh started");

    let mut output = Vec::new();
    let finished = {
        let run = async {
            read_output(&mut reader, &mut output).await?;
            child.wait().await
        };
        tokio::select! {
            biased;
            cause = cancel.cancelled() => Err(cause),
            status = run => Ok(status),
        }
    };

    match finished {
        Ok(Ok(status)) => classify(command, target, status, output),
        Ok(Err(source)) => {
            if let Err(e) = child.kill().await {
                tracing::warn!(
                    repo = %target,
                    error = %e,
                    "failed to kill refresh after I/O error"
                );
            }
            Outcome::Failed {
                error: RefreshError::Io {
                    program: command.program().to_string(),
                    source,
                },
                output,
            }
        }
        Err(cause) => {
            // `kill` also reaps the child, so nothing is left running.
            if let Err(e) = child.kill().await {
                tracing::warn!(repo = %target, error = %e, "failed to kill cancelled refresh");
            }
            tracing::debug!(repo = %target, %cause, "refresh cancelled");
            Outcome::Failed {
                error: RefreshError::Cancelled { cause },
                output,
            }
        }
    }
}

fn classify(
    command: &RefreshCommand,
    target: &Target,
    status: ExitStatus,
    output: Vec<u8>,
) -> Outcome {
    tracing::debug!(repo = %target, %status, "refresh exited");
    if status.success() {
        Outcome::Completed { output }
    } else {
        Outcome::Failed {
            error: RefreshError::Exit {
                program: command.program().to_string(),
                status,
            },
            output,
        }
    }
}

/// Append everything readable from `reader` to `buf` until EOF.
///
/// `buf` is extended chunk by chunk so a cancelled read keeps what arrived.
async fn read_output<R>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0u8; 4096];
    loop {
        match reader.read(&mut chunk).await? {
            0 => return Ok(()),
            n => buf.extend_from_slice(&chunk[..n]),
        }
    }
}

#[cfg(unix)]
type OutputReader = tokio::net::unix::pipe::Receiver;

#[cfg(not(unix))]
type OutputReader = tokio::fs::File;

#[cfg(unix)]
fn output_reader(reader: io::PipeReader) -> io::Result<OutputReader> {
    OutputReader::from_owned_fd(std::os::fd::OwnedFd::from(reader))
}

#[cfg(not(unix))]
fn output_reader(reader: io::PipeReader) -> io::Result<OutputReader> {
    let handle = std::os::windows::io::OwnedHandle::from(reader);
    Ok(tokio::fs::File::from_std(std::fs::File::from(handle)))
}

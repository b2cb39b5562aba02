//! Utilities for running the external shader compiler.

use std::{
    io,
    process::{Command, Output},
};

/// An error indicating failure while running the shader compiler.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
#[expect(clippy::module_name_repetitions, reason = "this is intended")]
pub enum CommandExecError {
    /// IO error occurred while spawning the compiler, usually it is not installed.
    #[error("IO error occurred while calling `{command:?}`: {source}")]
    Io {
        /// The command which was called.
        command: Box<Command>,
        /// Source of the error.
        source: io::Error,
    },
    /// The compiler exited unsuccessfully without reporting anything we could parse.
    #[error("calling `{command:?}` was not successful: {}", stderr_excerpt(output))]
    ExecFail {
        /// The command which was called.
        command: Box<Command>,
        /// The output of called command.
        output: Output,
    },
}

impl CommandExecError {
    /// Creates [`Io`](CommandExecError::Io) variant from given arguments.
    fn io(command: impl Into<Command>, source: io::Error) -> Self {
        Self::Io {
            command: Box::new(command.into()),
            source,
        }
    }

    /// Creates [`ExecFail`](CommandExecError::ExecFail) variant from given arguments.
    pub(crate) fn exec_fail(command: impl Into<Command>, output: Output) -> Self {
        Self::ExecFail {
            command: Box::new(command.into()),
            output,
        }
    }

    /// Returns the command which was called.
    #[inline]
    #[expect(clippy::must_use_candidate, reason = "returns a reference")]
    pub fn command(&self) -> &Command {
        match self {
            Self::Io { command, .. } | Self::ExecFail { command, .. } => command.as_ref(),
        }
    }
}

/// First line of the compiler's stderr, for error messages.
fn stderr_excerpt(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr)
        .lines()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("<no output>")
        .to_owned()
}

/// Runs the command to completion, returning its output.
///
/// Unlike a plain toolchain call, a non-zero exit status is *not* an error here:
/// the compiler reports shader errors through its exit code, and the caller
/// decides what the output means.
pub(crate) fn run_command(mut command: Command) -> Result<(Command, Output), CommandExecError> {
    log::trace!("running {command:?}");
    match command.output() {
        Ok(output) => Ok((command, output)),
        Err(source) => Err(CommandExecError::io(command, source)),
    }
}

use std::fmt;
use std::io;
use thiserror::Error;

/// Marker the remote coreutils print when the target path is missing.
pub const NOT_FOUND_MARKER: &str = "No such file or directory";

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("Session pool is closed")]
    PoolClosed,

    #[error("Failed to open SSH channel: {0}")]
    Channel(#[source] io::Error),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("Unexpected output from `{command}`: {output:?}")]
    UnexpectedOutput { command: String, output: String },
}

impl RemoteError {
    pub fn as_command(&self) -> Option<&CommandError> {
        match self {
            RemoteError::Command(err) => Some(err),
            _ => None,
        }
    }
}

/// Why a remote command did not succeed.
#[derive(Error, Debug)]
pub enum ExitCause {
    #[error("Process exited with status {0}")]
    Status(i32),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A failed remote command together with everything it wrote to stderr.
#[derive(Debug)]
pub struct CommandError {
    pub command: String,
    pub cause: ExitCause,
    pub stderr: Vec<u8>,
}

impl CommandError {
    pub fn new(command: impl Into<String>, cause: ExitCause, stderr: Vec<u8>) -> Self {
        Self {
            command: command.into(),
            cause,
            stderr,
        }
    }

    pub fn exit_status(&self) -> Option<i32> {
        match self.cause {
            ExitCause::Status(code) => Some(code),
            ExitCause::Io(_) => None,
        }
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// True when the command failed because its target does not exist.
    pub fn is_not_found(&self) -> bool {
        self.stderr_lossy().contains(NOT_FOUND_MARKER)
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stderr = self.stderr_lossy();
        write!(
            f,
            "`{}`\n  {}\n  {}",
            self.command,
            self.cause,
            stderr.trim_end_matches('\n')
        )
    }
}

impl std::error::Error for CommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.cause)
    }
}

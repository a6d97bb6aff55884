use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised by the job-control engine and its collaborators.
///
/// Usage errors are reported to the user and the shell carries on;
/// everything else means the host can no longer run jobs.
#[derive(Debug, Error)]
pub enum Error {
    #[error("command line is not well formed")]
    MalformedPipeline,
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error("{}: {source}", path.display())]
    Redirect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no such job: {0}")]
    BadJob(String),
    #[error("shell can run only in interactive mode")]
    NotInteractive,
    #[error("{op}: {source}")]
    Sys {
        op: &'static str,
        #[source]
        source: nix::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn sys(op: &'static str) -> impl FnOnce(nix::Error) -> Self {
        move |source| Error::Sys { op, source }
    }

    /// Whether the shell must give up after this error.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Error::MalformedPipeline | Error::Syntax(_) | Error::Redirect { .. } | Error::BadJob(_)
        )
    }
}

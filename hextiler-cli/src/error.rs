//! CLI error type and exit-code mapping.

use hextiler::TilerError;
use thiserror::Error;

/// Errors surfaced by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// Malformed arguments or values (bad bounds, bad zoom range).
    #[error("{0}")]
    Usage(String),

    /// Library failure from a build, merge or convert job.
    #[error(transparent)]
    Tiler(#[from] TilerError),

    /// The job stopped before completion (cancelled or tiles failed);
    /// partial output was left in place for a resumed run.
    #[error("{0}")]
    Partial(String),

    /// Process setup failure (signal handler, logging).
    #[error("startup failed: {0}")]
    Init(String),
}

impl CliError {
    /// Process exit code for this error.
    ///
    /// 2 = invalid input, 3 = I/O failure, 4 = partial completion.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Usage(_) => 2,
            CliError::Tiler(e) if e.is_invalid_input() => 2,
            CliError::Tiler(_) | CliError::Init(_) => 3,
            CliError::Partial(_) => 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hextiler::coord::CoordError;

    #[test]
    fn test_exit_codes_by_family() {
        assert_eq!(CliError::Usage("bad bounds".into()).exit_code(), 2);
        assert_eq!(
            CliError::Tiler(CoordError::InvalidZoom(99).into()).exit_code(),
            2
        );
        assert_eq!(CliError::Partial("cancelled".into()).exit_code(), 4);
        assert_eq!(CliError::Init("signal handler".into()).exit_code(), 3);
    }
}

//! Process exit codes.

/// The reason a fatal startup error terminated the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    /// Unspecified runtime failure.
    Failure,
    /// Invalid or unreadable configuration.
    Config,
    /// Store or filesystem error during initialization.
    Io,
}

impl ExitCode {
    /// The numeric code handed to `process::exit`.
    pub fn into_code(self) -> i32 {
        match self {
            ExitCode::Failure => 1,
            ExitCode::Config => 2,
            ExitCode::Io => 3,
        }
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> i32 {
        code.into_code()
    }
}

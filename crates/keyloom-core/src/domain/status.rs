//! Status codes carried from a runnable to its callback.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Diagnostic;

/// Integer outcome of a runnable. `0` is success; everything else is
/// operation specific (engine error codes pass straight through).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusCode(i32);

impl StatusCode {
    pub const SUCCESS: Self = Self(0);

    /// Recorded when a runnable panics, returns an error, or never runs.
    pub const FAULT: Self = Self(-1);

    pub const fn new(code: i32) -> Self {
        Self(code)
    }

    pub const fn code(self) -> i32 {
        self.0
    }

    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }
}

impl From<i32> for StatusCode {
    fn from(code: i32) -> Self {
        Self(code)
    }
}

impl From<StatusCode> for i32 {
    fn from(status: StatusCode) -> Self {
        status.0
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Anything a runnable may return.
///
/// `Err` values are captured as a [`Diagnostic`] and folded into
/// [`StatusCode::FAULT`] by the task.
pub trait IntoStatus {
    fn into_status(self) -> Result<StatusCode, Diagnostic>;
}

impl IntoStatus for StatusCode {
    fn into_status(self) -> Result<StatusCode, Diagnostic> {
        Ok(self)
    }
}

impl IntoStatus for i32 {
    fn into_status(self) -> Result<StatusCode, Diagnostic> {
        Ok(StatusCode(self))
    }
}

impl IntoStatus for () {
    fn into_status(self) -> Result<StatusCode, Diagnostic> {
        Ok(StatusCode::SUCCESS)
    }
}

impl<S, E> IntoStatus for Result<S, E>
where
    S: IntoStatus,
    E: fmt::Display,
{
    fn into_status(self) -> Result<StatusCode, Diagnostic> {
        match self {
            Ok(s) => s.into_status(),
            Err(e) => Err(Diagnostic::new(e.to_string())),
        }
    }
}

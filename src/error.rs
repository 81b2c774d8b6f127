//! Application error type.
//!
//! Every fatal condition carries the process exit code it maps to:
//!
//! - `2`: configuration or input problem (unknown model family, malformed
//!   constraint target, unreadable config/data file)
//! - `3`: no usable observations
//! - `4`: run-directory output could not be written
//!
//! Numerical trouble inside a descent is never an `AppError`; it shows up as
//! an invalid fit result instead.

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    /// Fatal configuration/input error (exit code 2).
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(2, message)
    }

    /// No usable data (exit code 3).
    pub fn data(message: impl Into<String>) -> Self {
        Self::new(3, message)
    }

    /// Output file could not be created or written (exit code 4).
    pub fn output(message: impl Into<String>) -> Self {
        Self::new(4, message)
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}

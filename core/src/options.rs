//! Configuration options for sessions and query execution.

/// Options for a single query execution.
///
/// # Example
///
/// ```
/// use pgbridge_core::options::ExecuteOptions;
///
/// let options = ExecuteOptions {
///     read_only: true,
///     row_limit: 100,
/// };
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecuteOptions {
    /// Run the statement in read-only mode; writes are rejected by the host.
    ///
    /// Default: false
    pub read_only: bool,

    /// Maximum number of rows to produce. 0 means unlimited.
    ///
    /// Default: 0
    pub row_limit: u64,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            read_only: false,
            row_limit: 0,
        }
    }
}

impl ExecuteOptions {
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Self::default()
        }
    }

    pub fn with_row_limit(mut self, row_limit: u64) -> Self {
        self.row_limit = row_limit;
        self
    }
}

/// Options for a [`Session`](crate::session::Session).
///
/// # Example
///
/// ```
/// use pgbridge_core::options::{ExecuteOptions, SessionOptions};
///
/// let options = SessionOptions {
///     default_execute_options: ExecuteOptions::read_only(),
///     ..SessionOptions::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Used by callers that do not pass explicit options.
    ///
    /// Default: `ExecuteOptions::default()`
    pub default_execute_options: ExecuteOptions,

    /// Name of the short-lived context error records are copied into.
    ///
    /// Default: "ErrorCaptureContext"
    pub capture_context_name: &'static str,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            default_execute_options: ExecuteOptions::default(),
            capture_context_name: "ErrorCaptureContext",
        }
    }
}

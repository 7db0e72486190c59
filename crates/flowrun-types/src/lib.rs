//! Shared error taxonomy and execution limits for the flowrun crates.
//!
//! - `FlowError`: unified error type for loading, validation and execution
//! - `ErrorKind`: the coarse failure class each error belongs to
//! - `ExecutionLimits`: runtime guard ceilings and validator capacity

use serde::{Deserialize, Serialize};

/// Unified error type for all flowrun subsystems.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    // === Configuration Errors ===
    #[error("Flow parse error at line {line}, col {col}: {message}")]
    ParseError {
        line: usize,
        col: usize,
        message: String,
        source_snippet: Option<String>,
    },

    #[error("The directive '{name}' is not present in the flow file")]
    UnknownDirective { name: String },

    #[error("No node directive present in the flow file")]
    NoCommands,

    #[error("Flow validation failed: {0}")]
    GraphInvalid(String),

    #[error("Pipe chain starting at '{start}' exceeds the validator capacity of {capacity}")]
    ValidationCapacity { start: String, capacity: usize },

    // === Resource Errors ===
    #[error("{call} failed: {source}")]
    Os {
        call: &'static str,
        #[source]
        source: std::io::Error,
    },

    // === Launch Errors ===
    #[error("Command block '{block}' has an empty command")]
    EmptyCommand { block: String },

    #[error("Argument {arg:?} of block '{block}' contains a NUL byte")]
    InvalidArgument { block: String, arg: String },

    #[error("execvp '{program}' failed: {source}")]
    LaunchFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    // === I/O Errors ===
    #[error("{context}: {source}")]
    FileIo {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("File endpoint '{block}' has no path")]
    MissingPath { block: String },

    // === Runtime Guards ===
    #[error("Cyclical dependency: recursion depth exceeded {limit}")]
    DepthExceeded { limit: usize },

    #[error("Fork limit of {limit} exceeded (possible cyclical dependency)")]
    ForkLimitExceeded { limit: usize },
}

/// Failure class of a [`FlowError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ConfigInvalid,
    ResourceExhausted,
    LaunchFailure,
    IoFailure,
    RuntimeGuardTripped,
}

impl FlowError {
    /// Wrap an OS error raised by the named system call.
    pub fn os(call: &'static str, source: impl Into<std::io::Error>) -> Self {
        FlowError::Os {
            call,
            source: source.into(),
        }
    }

    /// Wrap a file I/O error with a human-readable context.
    pub fn file_io(context: impl Into<String>, source: std::io::Error) -> Self {
        FlowError::FileIo {
            context: context.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            FlowError::ParseError { .. }
            | FlowError::UnknownDirective { .. }
            | FlowError::NoCommands
            | FlowError::GraphInvalid(_)
            | FlowError::ValidationCapacity { .. } => ErrorKind::ConfigInvalid,
            FlowError::Os { .. } => ErrorKind::ResourceExhausted,
            FlowError::EmptyCommand { .. }
            | FlowError::InvalidArgument { .. }
            | FlowError::LaunchFailed { .. } => ErrorKind::LaunchFailure,
            FlowError::FileIo { .. } | FlowError::MissingPath { .. } => ErrorKind::IoFailure,
            FlowError::DepthExceeded { .. } | FlowError::ForkLimitExceeded { .. } => {
                ErrorKind::RuntimeGuardTripped
            }
        }
    }

    /// Returns `true` if the error is detected before any process is spawned.
    pub fn is_config(&self) -> bool {
        self.kind() == ErrorKind::ConfigInvalid
    }

    /// Process exit status used when this error terminates a process.
    pub fn exit_code(&self) -> i32 {
        1
    }
}

/// A convenience alias for `Result<T, FlowError>`.
pub type Result<T> = std::result::Result<T, FlowError>;

// ---------------------------------------------------------------------------
// ExecutionLimits: guard ceilings for one run
// ---------------------------------------------------------------------------

/// Ceilings that bound a run against cyclic or pathological flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionLimits {
    /// Maximum nesting of block evaluations within one process.
    pub max_depth: usize,
    /// Maximum number of forks performed by one process.
    pub max_forks: usize,
    /// Maximum length of a pipe chain the validator will follow.
    pub validation_capacity: usize,
}

impl ExecutionLimits {
    pub const DEFAULT_MAX_DEPTH: usize = 64;
    pub const DEFAULT_MAX_FORKS: usize = 50;
    pub const DEFAULT_VALIDATION_CAPACITY: usize = 256;
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            max_depth: Self::DEFAULT_MAX_DEPTH,
            max_forks: Self::DEFAULT_MAX_FORKS,
            validation_capacity: Self::DEFAULT_VALIDATION_CAPACITY,
        }
    }
}

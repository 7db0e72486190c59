//! Flow execution engine: block store, validation, and the process interpreter.
//!
//! A loaded flow becomes a [`BlockStore`]. [`validate_or_raise`] rejects flows
//! whose pipe chains loop or dead-end, and [`FlowExecutor`] evaluates one
//! directive by forking a child per command, wiring pipes between them, and
//! copying file endpoints in-process.

pub mod engine;
pub mod guard;
pub mod interpreter;
pub mod store;
pub mod tokenize;
pub mod validation;

pub use engine::{load_flow, load_store, FlowExecutor, RunResult};
pub use guard::RunGuards;
pub use interpreter::{Interpreter, Streams};
pub use store::{Block, BlockKind, BlockStore, FileRole};
pub use tokenize::tokenize;
pub use validation::{check_pipe_chains, validate, validate_or_raise, Diagnostic, LintRule, Severity};

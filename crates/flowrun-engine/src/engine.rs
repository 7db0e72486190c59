//! Run orchestration: load, check, validate, evaluate.

use std::path::Path;

use flowrun_format::FlowFile;
use tracing::{debug, info, warn};

use flowrun_types::{ExecutionLimits, FlowError, Result};

use crate::interpreter::{Interpreter, Streams};
use crate::store::BlockStore;
use crate::validation::{validate_or_raise, Diagnostic, Severity};

/// Read and parse a flow file.
pub fn load_flow(path: &Path) -> Result<FlowFile> {
    let source = std::fs::read_to_string(path)
        .map_err(|e| FlowError::file_io(format!("cannot read flow file '{}'", path.display()), e))?;
    let flow = flowrun_format::parse(&source)?;
    debug!(path = %path.display(), blocks = flow.len(), "flow loaded");
    Ok(flow)
}

/// Read and parse a flow file into a block store.
pub fn load_store(path: &Path) -> Result<BlockStore> {
    Ok(BlockStore::from_flow(&load_flow(path)?))
}

/// Runs one directive of a loaded flow.
pub struct FlowExecutor {
    limits: ExecutionLimits,
}

/// Outcome of a run that got past validation and evaluation.
#[derive(Debug)]
pub struct RunResult {
    pub directive: String,
    /// Forks performed by the engine process itself; children count their own.
    pub forks: usize,
    /// Non-blocking diagnostics produced during validation.
    pub diagnostics: Vec<Diagnostic>,
}

impl FlowExecutor {
    pub fn new(limits: ExecutionLimits) -> Self {
        Self { limits }
    }

    pub fn with_default_limits() -> Self {
        Self::new(ExecutionLimits::default())
    }

    pub fn limits(&self) -> &ExecutionLimits {
        &self.limits
    }

    /// Run `directive` against the streams the process was started with.
    pub fn run(&self, store: &BlockStore, directive: &str) -> Result<RunResult> {
        self.run_with_streams(store, directive, Streams::inherited())
    }

    pub fn run_with_streams(
        &self,
        store: &BlockStore,
        directive: &str,
        io: Streams<'_>,
    ) -> Result<RunResult> {
        if !store.directive_exists(directive) {
            return Err(FlowError::UnknownDirective {
                name: directive.to_string(),
            });
        }
        if !store.has_commands() {
            return Err(FlowError::NoCommands);
        }

        let diagnostics = validate_or_raise(store, &self.limits)?;
        for diag in &diagnostics {
            match diag.severity {
                Severity::Warning => warn!(rule = %diag.rule, "{}", diag.message),
                _ => debug!(rule = %diag.rule, "{}", diag.message),
            }
        }

        info!(directive, "running");
        let mut interpreter = Interpreter::new(store, self.limits);
        interpreter.evaluate(directive, io)?;
        let forks = interpreter.guards().forks();
        debug!(directive, forks, "run finished");

        Ok(RunResult {
            directive: directive.to_string(),
            forks,
            diagnostics,
        })
    }
}

use flowrun_types::{ExecutionLimits, FlowError, Result};

/// Per-process run state that bounds recursion and process creation.
///
/// A forked child inherits a copy, so counts are per process: the fork count
/// of a child starts from its parent's count at the moment of the fork.
#[derive(Debug, Clone)]
pub struct RunGuards {
    limits: ExecutionLimits,
    depth: usize,
    forks: usize,
}

impl RunGuards {
    pub fn new(limits: ExecutionLimits) -> Self {
        Self {
            limits,
            depth: 0,
            forks: 0,
        }
    }

    /// Enter one block evaluation. On failure the depth is left unchanged,
    /// so callers only [`leave`](Self::leave) after a successful enter.
    pub fn enter(&mut self) -> Result<()> {
        if self.depth + 1 > self.limits.max_depth {
            return Err(FlowError::DepthExceeded {
                limit: self.limits.max_depth,
            });
        }
        self.depth += 1;
        Ok(())
    }

    /// Leave a block evaluation entered with [`enter`](Self::enter).
    pub fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    /// Account for a fork that is about to happen. Never reset during a run.
    pub fn record_fork(&mut self) -> Result<()> {
        self.forks += 1;
        if self.forks > self.limits.max_forks {
            return Err(FlowError::ForkLimitExceeded {
                limit: self.limits.max_forks,
            });
        }
        Ok(())
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn forks(&self) -> usize {
        self.forks
    }

    pub fn limits(&self) -> &ExecutionLimits {
        &self.limits
    }
}

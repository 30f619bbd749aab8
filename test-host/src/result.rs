use std::fmt;

use serde::Serialize;

/// Terminal outcome of a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Passed,
    Failed,
    TimedOut,
    BackendError,
}

impl RunStatus {
    pub fn exit_code(self) -> i32 {
        match self {
            RunStatus::Passed => 0,
            RunStatus::Failed => 1,
            RunStatus::TimedOut => 2,
            RunStatus::BackendError => 3,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Passed => "passed",
            RunStatus::Failed => "failed",
            RunStatus::TimedOut => "timed out",
            RunStatus::BackendError => "backend error",
        };
        f.write_str(s)
    }
}

/// Lifecycle of a run. `Running` is only entered after a successful start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    NotStarted,
    Running,
    Finished(RunStatus),
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Finished(_))
    }
}

/// Everything a caller needs to report a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub guest: String,
    pub status: RunStatus,
    pub exit_code: i32,
    pub message: Option<String>,
    pub output: Vec<String>,
    pub elapsed_ms: u64,
    /// States the run went through, ending in `Finished(status)`
    #[serde(skip)]
    pub states: Vec<RunState>,
}

impl RunResult {
    pub fn new(
        guest: impl Into<String>,
        status: RunStatus,
        message: Option<String>,
        output: Vec<String>,
        elapsed_ms: u64,
    ) -> Self {
        Self {
            guest: guest.into(),
            status,
            exit_code: status.exit_code(),
            message,
            output,
            elapsed_ms,
            states: vec![RunState::Finished(status)],
        }
    }

    pub fn with_states(mut self, states: Vec<RunState>) -> Self {
        self.states = states;
        self
    }

    pub fn passed(&self) -> bool {
        self.status == RunStatus::Passed
    }
}

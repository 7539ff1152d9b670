// ABOUTME: Async seam between the command router and a running sandbox
// ABOUTME: The controller is the real driver; router tests swap in fakes

use std::time::Duration;

use async_trait::async_trait;

use buildforge_trace::{CommandStatus, RecordKind};

use crate::error::Result;

/// One command heading into the sandbox, routing already decided.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    pub command: String,
    pub kind: RecordKind,
    /// Whether a snapshot is taken first and a failure rolls back.
    pub mutating: bool,
    /// Non-zero exit codes that do not count as failure for rollback.
    pub allowed_exit_codes: Vec<i64>,
    /// Overrides the sandbox's default command watchdog when set.
    pub timeout: Option<Duration>,
}

impl ExecRequest {
    pub fn shell(command: impl Into<String>, mutating: bool) -> Self {
        Self {
            command: command.into(),
            kind: RecordKind::Shell,
            mutating,
            allowed_exit_codes: Vec::new(),
            timeout: None,
        }
    }

    pub fn with_kind(mut self, kind: RecordKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_allowed_exit_codes(mut self, codes: Vec<i64>) -> Self {
        self.allowed_exit_codes = codes;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// What came back from the sandbox, with the recovery bookkeeping the
/// router folds into its reply text.
#[derive(Debug, Clone)]
pub struct ExecOutcome {
    pub text: String,
    pub status: CommandStatus,
    /// A snapshot rollback ran because a mutating command failed.
    pub rolled_back: bool,
    /// The session hit its watchdog and the sandbox was reset to base.
    pub reset_after_timeout: bool,
}

impl ExecOutcome {
    /// Exit code the router should report, with unknown collapsing to 1.
    pub fn status_code(&self) -> i64 {
        match self.status {
            CommandStatus::Exited(code) => code,
            CommandStatus::Dispatched => 0,
            _ => 1,
        }
    }
}

/// Everything the command router needs from a sandbox.
#[async_trait]
pub trait SandboxDriver: Send {
    /// Run one command with snapshot/rollback semantics.
    async fn execute(&mut self, request: ExecRequest) -> Result<ExecOutcome>;

    /// Tear the environment back down to the pristine wrapper image.
    async fn reset(&mut self) -> Result<()>;

    /// Working directory of the live shell.
    async fn current_dir(&mut self) -> Result<String>;

    /// Contents of an absolute path inside the container, `None` if missing.
    async fn read_file(&mut self, path: &str) -> Result<Option<String>>;

    /// Drop the full text of a failure at a fixed path inside the repo so a
    /// truncated reply can point at it. Returns whether the write landed.
    async fn stash_error_output(&mut self, content: &str) -> Result<bool>;
}

// ABOUTME: Record types for commands executed inside a build sandbox
// ABOUTME: Each record carries command text, directory, exit status, duration and a kind tag

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Exit status of a recorded command.
///
/// A record is created `Pending` before anything is written to the shell,
/// becomes `Dispatched` once the command line has been submitted, and ends
/// as `Exited` with the shell's reported code. `Unknown` is the terminal
/// state when the status round-trip could not be parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Pending,
    Dispatched,
    Unknown,
    Exited(i64),
}

impl CommandStatus {
    /// Exit code if the command ran to completion.
    pub fn code(&self) -> Option<i64> {
        match self {
            CommandStatus::Exited(code) => Some(*code),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CommandStatus::Exited(0))
    }
}

/// What a recorded command was, as known at record time.
///
/// The kind tag is what lets recipe synthesis work from the saved log alone:
/// installer and patch records carry enough detail to be re-rendered without
/// re-parsing shell text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecordKind {
    /// Free-form shell command.
    Shell,
    /// Package installation dispatched by the download queue.
    Installer {
        tool: String,
        package: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        constraint: Option<String>,
    },
    /// The staged build/test verifier.
    Verifier,
    /// Full sandbox reset back to the base image.
    Reset,
    /// A patch file applied to the repository checkout.
    Patch { file: String },
}

/// One executed (or attempted) command in a sandbox session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRecord {
    pub command: String,
    /// Working directory the shell was in when the command was issued.
    pub directory: String,
    pub status: CommandStatus,
    /// Wall-clock seconds from dispatch to prompt return.
    pub duration_secs: f64,
    pub kind: RecordKind,
    /// Whether the command was classified as able to change sandbox state.
    pub mutating: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotation: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl CommandRecord {
    pub fn new(
        command: impl Into<String>,
        directory: impl Into<String>,
        kind: RecordKind,
        mutating: bool,
    ) -> Self {
        Self {
            command: command.into(),
            directory: directory.into(),
            status: CommandStatus::Pending,
            duration_secs: 0.0,
            kind,
            mutating,
            annotation: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

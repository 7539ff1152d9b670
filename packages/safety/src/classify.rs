// ABOUTME: Read-only vs mutating classification for free-form shell commands
// ABOUTME: Mutating is the default; read-only needs a listed token and no redirection

use crate::registry::is_read_only_token;

/// How a free-form shell command may affect persistent sandbox state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandClass {
    /// Diagnostic command; executed without snapshot or rollback.
    ReadOnly,
    /// Anything else; snapshotted before execution, rolled back on failure.
    Mutating,
}

impl CommandClass {
    pub fn is_mutating(&self) -> bool {
        matches!(self, CommandClass::Mutating)
    }
}

/// Classify a command line.
///
/// Read-only requires both: the leading token is on the diagnostic list,
/// and the line contains no `>` anywhere (output redirection turns even
/// `echo` into a write).
pub fn classify(command: &str) -> CommandClass {
    let Some(first) = command.split_whitespace().next() else {
        return CommandClass::Mutating;
    };
    if is_read_only_token(first) && !command.contains('>') {
        CommandClass::ReadOnly
    } else {
        CommandClass::Mutating
    }
}

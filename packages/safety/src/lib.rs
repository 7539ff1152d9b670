// ABOUTME: Command safety for sandbox sessions: read-only classification and deny screens
// ABOUTME: Decides which commands need snapshot/rollback and which never run at all

pub mod classify;
pub mod registry;
pub mod screens;

pub use classify::{classify, CommandClass};
pub use registry::{is_read_only_token, READ_ONLY_COMMANDS};
pub use screens::{screen, DenyReply};

// ABOUTME: Command trace model shared by the sandbox, router and recipe crates
// ABOUTME: Append-only durable record log that recipe synthesis replays verbatim

pub mod log;
pub mod record;

pub use log::{Result, TraceError, TraceLog};
pub use record::{CommandRecord, CommandStatus, RecordKind};

// ABOUTME: Instruction routing between ledger built-ins, deny screens and the sandbox shell
// ABOUTME: Owns the operator-facing reply surface: usage texts, failure notes, truncation

pub mod install;
pub mod parse;
pub mod route;

pub use install::{install_command, DriverInstallRunner};
pub use parse::{parse, Instruction, ValidationError, CONFLICTLIST_USAGE, WAITINGLIST_USAGE};
pub use route::{Reply, ReplyStatus, Router, VERIFIER_COMMAND};

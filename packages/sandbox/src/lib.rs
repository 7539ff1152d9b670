// ABOUTME: Docker-backed build sandbox: wrapper images, snapshot rollback, live shell
// ABOUTME: The controller implements the driver seam the command router runs against

pub mod config;
pub mod controller;
pub mod disk;
pub mod driver;
pub mod error;
pub mod session;
pub mod toolkit;

pub use config::{parse_memory_limit, SandboxConfig};
pub use controller::{SandboxController, SnapshotState};
pub use disk::disk_usage_percent;
pub use driver::{ExecOutcome, ExecRequest, SandboxDriver};
pub use error::{Result, SandboxError};
pub use session::{CommandReply, SessionError, SessionState, ShellSession};
pub use toolkit::{SUCCESS_SENTINEL, TOOLS_DIR};

// ABOUTME: Deferred-install ledger: waiting list, conflict list and the drain
// ABOUTME: Installs are queued, conflict-checked, then batch-dispatched with bounded retries

pub mod drain;
pub mod lists;
pub mod request;

pub use drain::{
    is_timeout_failure, ConflictError, DrainReport, FailedInstall, InstallRunner,
    MAX_CATEGORY_FAILURES,
};
pub use lists::{AddOutcome, ConflictList, Ledger, ResolvePolicy, WaitingList};
pub use request::{InstallTool, PackageRequest};

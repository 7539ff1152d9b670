// ABOUTME: Drains the waiting list through an installer backend with bounded retries
// ABOUTME: Classifies failures as timeout vs other and buckets three-time losers

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::lists::Ledger;
use crate::request::{InstallTool, PackageRequest};

/// Failures per category before a request is permanently parked.
pub const MAX_CATEGORY_FAILURES: u32 = 3;

/// Installer backend seam. The sandbox-backed implementation dispatches the
/// actual `pip install` / apt helper command and returns whether it exited
/// zero plus its full output; internal transport errors are folded into a
/// failing output so the drain can classify them.
#[async_trait]
pub trait InstallRunner {
    async fn install(&mut self, request: &PackageRequest, tool: InstallTool) -> (bool, String);
}

/// The drain refuses to run while conflicts are unresolved.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct ConflictError {
    pub message: String,
}

/// One permanently failed request with trimmed diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedInstall {
    pub request: PackageRequest,
    /// Last ten non-empty output lines of the deciding attempt.
    pub diagnostics: String,
}

/// Outcome of one full drain pass. Every request that was waiting lands in
/// exactly one of the three buckets.
#[derive(Debug, Default)]
pub struct DrainReport {
    pub succeeded: Vec<PackageRequest>,
    pub failed: Vec<FailedInstall>,
    pub unsupported: Vec<PackageRequest>,
    /// Full human-readable transcript, echoed back as the reply.
    pub transcript: String,
}

/// Whether installer output looks like a network timeout rather than a
/// package problem.
pub fn is_timeout_failure(output: &str) -> bool {
    let lowered = output.to_lowercase();
    lowered.contains("timeout")
        || lowered.contains("timed out")
        || lowered.contains("failed to fetch")
        || lowered.contains("could not resolve")
}

fn last_non_empty_lines(output: &str, keep: usize) -> String {
    let lines: Vec<&str> = output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    let start = lines.len().saturating_sub(keep);
    lines[start..].join("\n")
}

impl Ledger {
    /// Drain the waiting list through `runner`.
    ///
    /// Pops FIFO; a failed attempt is classified, its category counter
    /// bumped, and the request requeued at the back until a category
    /// reaches three failures, which parks it permanently with diagnostics.
    /// A request whose third attempt succeeds still counts as succeeded.
    pub async fn drain(
        &mut self,
        runner: &mut (dyn InstallRunner + Send),
    ) -> Result<DrainReport, ConflictError> {
        if !self.conflicts.is_empty() {
            warn!(
                conflicts = self.conflicts.len(),
                "download refused while conflicts are unresolved"
            );
            let message = format!(
                "The conflict list is not empty. Resolve it with `conflictlist solve` \
                 before calling `download`.\n{}",
                self.show_conflicts()
            );
            return Err(ConflictError { message });
        }

        let mut report = DrainReport::default();
        if self.waiting.is_empty() {
            report.transcript = EMPTY_QUEUE_BANNER.to_string();
            return Ok(report);
        }

        let mut lines: Vec<String> = Vec::new();
        while let Some(mut item) = self.waiting.pop_front() {
            let Some(tool) = InstallTool::from_tag(&item.tool) else {
                lines.push(format!(
                    "Please check the tool: {}, packege_name: {}, version_constraints: {}",
                    item.tool.trim().to_lowercase(),
                    item.name,
                    item.constraint.as_deref().unwrap_or("None")
                ));
                report.unsupported.push(item);
                continue;
            };

            debug!(package = %item.display_name(), %tool, "dispatching install");
            let (success, result) = runner.install(&item, tool).await;

            if success {
                lines.push(format!("\"{}\" installed successfully.", item.display_name()));
                info!(package = %item.display_name(), "install succeeded");
                report.succeeded.push(item);
                continue;
            }

            let timed_out = is_timeout_failure(&result);
            let category = if timed_out { "timeout" } else { "non-timeout" };
            if timed_out {
                item.timeout_failures += 1;
            } else {
                item.other_failures += 1;
            }

            if item.timeout_failures >= MAX_CATEGORY_FAILURES
                || item.other_failures >= MAX_CATEGORY_FAILURES
            {
                lines.push(format!(
                    "The third-party library \"{}\" (using tool {}) has been added to the \
                     failed list due to three download {} errors.",
                    item.display_name(),
                    item.tool,
                    category
                ));
                warn!(package = %item.display_name(), category, "install permanently failed");
                report.failed.push(FailedInstall {
                    diagnostics: last_non_empty_lines(&result, 10),
                    request: item,
                });
            } else {
                if timed_out {
                    lines.push(format!(
                        "\"{}\" installed failed due to timeout errors.",
                        item.display_name()
                    ));
                } else {
                    lines.push(format!(
                        "\"{}\" installed failed due to non-timeout errors",
                        item.display_name()
                    ));
                }
                self.waiting.push_back(item);
            }
        }

        lines.push(render_summary(&report));
        report.transcript = lines.join("\n");
        Ok(report)
    }
}

fn render_summary(report: &DrainReport) -> String {
    let rule = "=".repeat(75);
    let mut out: Vec<String> = Vec::new();

    out.push(rule.clone());
    out.push("DOWNLOAD SUMMARY".to_string());
    out.push(rule.clone());
    out.push(String::new());

    if !report.succeeded.is_empty() {
        out.push(format!(
            "✅ Successfully installed: {} package(s)",
            report.succeeded.len()
        ));
        for item in &report.succeeded {
            out.push(format!("   • {} (using {})", item.display_name(), item.tool));
        }
    } else {
        out.push("⚠️  No packages were successfully installed in this round.".to_string());
        if !report.failed.is_empty() {
            out.push(format!(
                "   • {} package(s) failed after 3 attempts",
                report.failed.len()
            ));
            out.push("   • Check error messages above or try alternative packages".to_string());
        }
    }

    out.push(String::new());
    out.push(rule.clone());
    out.push("⚠️  IMPORTANT: DO NOT CALL \"download\" AGAIN!".to_string());
    out.push(rule.clone());
    out.push("Why?".to_string());
    out.push("• All packages in waiting list have been processed".to_string());
    out.push("• Calling download again will find empty list and waste time".to_string());
    out.push("• If packages failed, fix errors or try alternatives first".to_string());
    out.push(String::new());
    out.push("📝 Next steps:".to_string());
    if !report.succeeded.is_empty() && report.failed.is_empty() {
        out.push(
            "   ✅ All packages installed → Proceed to build (./configure, cmake, make)"
                .to_string(),
        );
    } else if !report.failed.is_empty() {
        out.push("   ⚠️  Some packages failed → Review errors above".to_string());
        out.push("   → Try alternative packages or fix dependency issues".to_string());
        out.push("   → Add alternatives to waiting list, then call download once".to_string());
    } else {
        out.push("   ⚠️  No packages installed → Check waiting list or try alternatives".to_string());
    }
    out.push(rule);

    if report.failed.is_empty() {
        out.push("No third-party libraries failed to download in this round.".to_string());
    } else {
        let dashes = "-".repeat(100);
        out.push(
            "In this round, the following third-party libraries failed to download. They are:"
                .to_string(),
        );
        for item in &report.failed {
            out.push(dashes.clone());
            out.push(format!(
                "{} (using tool {})",
                item.request.display_name(),
                item.request.tool
            ));
            out.push(format!("Failed message:\n {}", item.diagnostics));
            out.push(dashes.clone());
        }
    }

    if !report.unsupported.is_empty() {
        out.push(
            "In this round, the download tools for the following third-party libraries could \
             not be found (only pip or apt can be selected)."
                .to_string(),
        );
        for item in &report.unsupported {
            out.push(format!(
                "{} (using tool {})",
                item.display_name(),
                item.tool
            ));
        }
    }

    out.join("\n")
}

const EMPTY_QUEUE_BANNER: &str = "\
╔═══════════════════════════════════════════════════════════════════════╗
║                    WAITING LIST IS EMPTY                              ║
╟───────────────────────────────────────────────────────────────────────╢
║  All packages have already been processed.                            ║
║                                                                        ║
║  ⚠️  DO NOT CALL \"download\" AGAIN!                                    ║
║                                                                        ║
║  Why?                                                                  ║
║  • download processes ALL packages in waiting list at once            ║
║  • Calling it multiple times wastes time and may cause errors         ║
║  • The list is now empty - nothing left to download                   ║
║                                                                        ║
║  📝 What to do instead:                                               ║
║                                                                        ║
║  Option 1: If all packages installed successfully                     ║
║    → Proceed to build: ./configure, cmake, or make                    ║
║                                                                        ║
║  Option 2: If some packages failed                                    ║
║    → Try alternatives or fix errors above                             ║
║    → Then add to waiting list and call download once                  ║
║                                                                        ║
║  Option 3: If you need to add MORE packages                           ║
║    → Use: waitinglist add -p package_name -t apt                      ║
║    → Then call download ONCE                                          ║
╚═══════════════════════════════════════════════════════════════════════╝";

// ABOUTME: Turns a recorded sandbox trace into a replayable Dockerfile
// ABOUTME: Successful mutating records become instructions; a reset truncates the tail back to bootstrap

use buildforge_trace::{CommandRecord, RecordKind, TraceLog};
use tracing::debug;

/// Where patch files are staged inside the replay image, matching the
/// scratch mount the interactive sandbox uses.
const PATCH_STAGE_DIR: &str = "/tmp/patch";

/// Repository facts the bootstrap needs that the trace itself does not carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipeMeta {
    /// `author/name` as it appears on GitHub.
    pub repo_full_name: String,
    /// Image the sandbox session was launched from.
    pub base_image: String,
    /// Commit the checkout was pinned to, when known.
    pub commit_sha: Option<String>,
}

/// A synthesized Dockerfile, kept as the fixed bootstrap prefix plus the
/// instructions derived from the trace so callers can inspect either half.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipe {
    bootstrap: Vec<String>,
    steps: Vec<String>,
}

impl Recipe {
    pub fn bootstrap(&self) -> &[String] {
        &self.bootstrap
    }

    pub fn steps(&self) -> &[String] {
        &self.steps
    }

    /// Render as Dockerfile text, one instruction per line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in self.bootstrap.iter().chain(self.steps.iter()) {
            out.push_str(line);
            out.push('\n');
        }
        out
    }
}

/// Derive a Dockerfile from an executed trace.
///
/// Only records that completed with exit code 0 and were classified as
/// mutating are replayed; diagnostics, failed commands (already rolled back
/// in the live sandbox) and verifier runs leave no instruction. A reset
/// record discards every instruction gathered so far, since the sandbox it
/// describes went back to the bare base image at that point.
pub fn synthesize(log: &TraceLog, meta: &RecipeMeta) -> Recipe {
    let mut steps: Vec<String> = Vec::new();
    let mut previous_patch: Option<String> = None;

    for record in log {
        if !record.is_success() {
            continue;
        }
        if matches!(record.kind, RecordKind::Reset) {
            steps.clear();
            previous_patch = None;
            continue;
        }
        if !record.mutating {
            continue;
        }
        match &record.kind {
            RecordKind::Verifier => {}
            RecordKind::Installer {
                tool,
                package,
                constraint,
            } => {
                steps.push(render_installer(
                    tool,
                    package,
                    constraint.as_deref(),
                    record,
                ));
            }
            RecordKind::Patch { file } => {
                let name = file_name(file);
                steps.push(format!("COPY {file} {PATCH_STAGE_DIR}/{name}"));
                steps.push(match previous_patch.take() {
                    Some(prev) => format!(
                        "RUN cd /repo && git apply -R {PATCH_STAGE_DIR}/{prev} && git apply {PATCH_STAGE_DIR}/{name}"
                    ),
                    None => format!("RUN cd /repo && git apply {PATCH_STAGE_DIR}/{name}"),
                });
                previous_patch = Some(name);
            }
            RecordKind::Shell => steps.push(render_shell(record)),
            // Successful resets are consumed before the kind match.
            RecordKind::Reset => {}
        }
    }

    debug!(
        recorded = log.len(),
        retained = steps.len(),
        "synthesized recipe steps"
    );

    Recipe {
        bootstrap: bootstrap_lines(meta),
        steps,
    }
}

/// Recover the trace-derived instructions from rendered Dockerfile text.
///
/// The bootstrap prefix is reconstructed from `meta` and stripped, so
/// re-deriving the step sequence from a recipe's own rendering returns the
/// steps unchanged.
pub fn parse_steps(dockerfile: &str, meta: &RecipeMeta) -> Vec<String> {
    let prefix_len = bootstrap_lines(meta).len();
    dockerfile
        .lines()
        .filter(|line| !line.trim().is_empty())
        .skip(prefix_len)
        .map(str::to_string)
        .collect()
}

fn render_installer(
    tool: &str,
    package: &str,
    constraint: Option<&str>,
    record: &CommandRecord,
) -> String {
    match tool {
        "apt" => format!("RUN apt-get update && apt-get install -y {package}"),
        "pip" => format!("RUN pip install \"{package}{}\"", constraint.unwrap_or("")),
        other => {
            debug!(
                tool = other,
                "installer record with unrecognized tool, replaying raw command"
            );
            format!("RUN {}", record.command)
        }
    }
}

fn render_shell(record: &CommandRecord) -> String {
    match record.directory.as_str() {
        "" | "/" => format!("RUN {}", record.command),
        dir => format!("RUN cd {dir} && {}", record.command),
    }
}

fn file_name(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).to_string()
}

/// Fixed prefix every recipe starts with: clone the repository at the root,
/// move it under `/repo`, and pin the exact commit the session worked on.
fn bootstrap_lines(meta: &RecipeMeta) -> Vec<String> {
    let repo_name = meta
        .repo_full_name
        .rsplit('/')
        .next()
        .unwrap_or(meta.repo_full_name.as_str());
    let mut lines = vec![
        format!("FROM {}", meta.base_image),
        "WORKDIR /".to_string(),
        format!("RUN git clone https://github.com/{}.git", meta.repo_full_name),
        "RUN mkdir /repo".to_string(),
        format!("RUN cp -r /{repo_name}/. /repo && rm -rf /{repo_name}/"),
    ];
    if let Some(sha) = meta.commit_sha.as_deref() {
        lines.push(format!("RUN cd /repo && git checkout {sha}"));
    }
    lines
}

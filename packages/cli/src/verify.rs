// ABOUTME: Builds a synthesized Dockerfile under a deadline to prove it replays
// ABOUTME: Writes a Valid/Message/Timestamp report beside the Dockerfile

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Local;
use tokio::process::Command;
use tracing::{info, warn};

use crate::exit_codes;

/// Report file written beside the Dockerfile after every verification.
const REPORT_FILE: &str = "dockerfile_verification.txt";

/// How much of docker's stderr goes into the report on failure.
const REPORT_STDERR_LIMIT: usize = 500;

/// Build `dockerfile` with a throwaway tag and return the process exit code.
/// The image is removed again after a successful build.
pub async fn run(dockerfile: &Path, context: Option<PathBuf>, timeout: Duration) -> i32 {
    let parent = dockerfile
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
        .to_path_buf();
    let context = context.unwrap_or_else(|| parent.clone());
    let report_path = parent.join(REPORT_FILE);

    if !dockerfile.is_file() {
        let message = format!("Dockerfile not found: {}", dockerfile.display());
        eprintln!("Error: {message}");
        write_report(&report_path, false, &message);
        return exit_codes::GENERAL_ERROR;
    }
    if !context.is_dir() {
        let message = format!("Build context not found: {}", context.display());
        eprintln!("Error: {message}");
        write_report(&report_path, false, &message);
        return exit_codes::GENERAL_ERROR;
    }

    let tag = format!("buildforge_test_{}", chrono::Utc::now().timestamp());
    info!(dockerfile = %dockerfile.display(), tag = %tag, "verifying the Dockerfile builds");

    let build = Command::new("docker")
        .arg("build")
        .arg("-f")
        .arg(dockerfile)
        .arg("-t")
        .arg(&tag)
        .arg(&context)
        .kill_on_drop(true)
        .output();
    let output = match tokio::time::timeout(timeout, build).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            let message = format!("Could not invoke docker: {e}");
            eprintln!("Error: {message}");
            write_report(&report_path, false, &message);
            return exit_codes::DOCKER_ERROR;
        }
        Err(_) => {
            let message = format!("Build timed out after {} seconds", timeout.as_secs());
            eprintln!("Error: {message}");
            write_report(&report_path, false, &message);
            return exit_codes::DOCKER_IMAGE_BUILD_FAILED;
        }
    };

    if output.status.success() {
        info!(tag = %tag, "Dockerfile built cleanly");
        remove_image(&tag).await;
        write_report(&report_path, true, "Build successful");
        exit_codes::SUCCESS
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        eprintln!("Docker build failed. Last lines of output:");
        eprintln!("{}", last_lines(&stderr, 50));
        let message = format!("Build failed: {}", tail_chars(&stderr, REPORT_STDERR_LIMIT));
        write_report(&report_path, false, &message);
        exit_codes::DOCKER_IMAGE_BUILD_FAILED
    }
}

async fn remove_image(tag: &str) {
    if let Err(e) = Command::new("docker").arg("rmi").arg(tag).output().await {
        warn!(tag = %tag, error = %e, "could not remove the verification image");
    }
}

fn write_report(path: &Path, valid: bool, message: &str) {
    let report = format_report(valid, message, &Local::now().to_rfc3339());
    if let Err(e) = std::fs::write(path, report) {
        warn!(path = %path.display(), error = %e, "could not write the verification report");
    }
}

fn format_report(valid: bool, message: &str, timestamp: &str) -> String {
    format!("Valid: {valid}\nMessage: {message}\nTimestamp: {timestamp}\n")
}

fn last_lines(text: &str, count: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(count);
    lines[start..].join("\n")
}

/// Last `limit` bytes of `text`, nudged forward to a char boundary.
fn tail_chars(text: &str, limit: usize) -> &str {
    if text.len() <= limit {
        return text;
    }
    let mut start = text.len() - limit;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

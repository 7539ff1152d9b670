// ABOUTME: Sandbox runtime limits and image settings, one plain struct
// ABOUTME: Environment wiring happens in the CLI; this crate takes values as-is

use std::path::PathBuf;
use std::time::Duration;

/// Runtime limits and image settings for one sandbox.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Base image the wrapper image is built on top of.
    pub base_image: String,

    /// Hard memory cap, docker-style suffix ("30g", "512m").
    pub memory_limit: String,

    /// CPU pinning range passed straight to the container ("0-15").
    pub cpu_set: String,

    /// Host directory bind-mounted read-write at /tmp/patch.
    pub scratch_dir: PathBuf,

    /// Watchdog for ordinary shell commands.
    pub command_timeout: Duration,

    /// Watchdog for package installs, which legitimately run long.
    pub install_timeout: Duration,

    /// Ceiling on pulling the base image.
    pub pull_timeout: Duration,

    /// Ceiling on building the wrapper image.
    pub build_timeout: Duration,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            base_image: "gcr.io/oss-fuzz-base/base-builder".to_string(),
            memory_limit: "30g".to_string(),
            cpu_set: "0-15".to_string(),
            scratch_dir: PathBuf::from("/tmp/buildforge-patch"),
            command_timeout: Duration::from_secs(600),
            install_timeout: Duration::from_secs(1800),
            pull_timeout: Duration::from_secs(600),
            build_timeout: Duration::from_secs(600),
        }
    }
}

/// Parse a docker-style memory string ("30g", "512m", "1048576") into bytes.
pub fn parse_memory_limit(value: &str) -> Option<i64> {
    let lower = value.trim().to_ascii_lowercase();
    if lower.is_empty() {
        return None;
    }
    let (digits, multiplier): (&str, i64) = match lower.as_bytes().last() {
        Some(b'k') => (&lower[..lower.len() - 1], 1024),
        Some(b'm') => (&lower[..lower.len() - 1], 1024 * 1024),
        Some(b'g') => (&lower[..lower.len() - 1], 1024 * 1024 * 1024),
        _ => (lower.as_str(), 1),
    };
    digits.parse::<i64>().ok().map(|n| n * multiplier)
}

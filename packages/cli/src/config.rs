// ABOUTME: Environment-variable configuration for the buildforge binary
// ABOUTME: Every knob has a default; parsing failures name the offending variable

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use buildforge_sandbox::{parse_memory_limit, SandboxConfig};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value}")]
    InvalidNumber { var: &'static str, value: String },
    #[error("Invalid memory limit: {0} (expected a docker-style value like 30g or 512m)")]
    InvalidMemoryLimit(String),
}

/// Runtime configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base image configuration attempts run on top of.
    pub docker_image: String,
    /// Hard ceiling on one whole attempt.
    pub wall_clock_limit: Duration,
    /// Container memory cap, docker-style suffix.
    pub memory_limit: String,
    /// CPU pinning range for the container.
    pub cpu_limit: String,
    /// Watchdog for one shell command inside the sandbox.
    pub command_timeout: Duration,
    /// Ceiling on docker image builds (wrapper image and verification).
    pub docker_build_timeout: Duration,
    /// Directory attempt artifacts are written under, per repository.
    pub output_root: PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let docker_image = env::var("BUILDFORGE_DOCKER_IMAGE")
            .unwrap_or_else(|_| "gcr.io/oss-fuzz-base/base-builder".to_string());

        let wall_clock_limit = env_secs("BUILDFORGE_TIMEOUT", 14400)?;
        let command_timeout = env_secs("BUILDFORGE_COMMAND_TIMEOUT", 600)?;
        let docker_build_timeout = env_secs("BUILDFORGE_DOCKER_BUILD_TIMEOUT", 600)?;

        let memory_limit =
            env::var("BUILDFORGE_MEMORY_LIMIT").unwrap_or_else(|_| "30g".to_string());
        if parse_memory_limit(&memory_limit).is_none() {
            return Err(ConfigError::InvalidMemoryLimit(memory_limit));
        }

        let cpu_limit = env::var("BUILDFORGE_CPU_LIMIT").unwrap_or_else(|_| "0-15".to_string());

        let output_root = env::var("BUILDFORGE_OUTPUT_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./output"));

        Ok(Config {
            docker_image,
            wall_clock_limit,
            memory_limit,
            cpu_limit,
            command_timeout,
            docker_build_timeout,
            output_root,
        })
    }

    /// Sandbox settings derived from this configuration. Install and image
    /// pull ceilings keep their library defaults.
    pub fn sandbox_config(&self, scratch_dir: PathBuf) -> SandboxConfig {
        SandboxConfig {
            base_image: self.docker_image.clone(),
            memory_limit: self.memory_limit.clone(),
            cpu_set: self.cpu_limit.clone(),
            scratch_dir,
            command_timeout: self.command_timeout,
            build_timeout: self.docker_build_timeout,
            ..SandboxConfig::default()
        }
    }
}

fn env_secs(var: &'static str, default: u64) -> Result<Duration, ConfigError> {
    let raw = env::var(var).unwrap_or_else(|_| default.to_string());
    match raw.parse::<u64>() {
        Ok(secs) => Ok(Duration::from_secs(secs)),
        Err(_) => Err(ConfigError::InvalidNumber { var, value: raw }),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serial_test::serial;

    use super::*;

    fn clear_env() {
        for var in [
            "BUILDFORGE_DOCKER_IMAGE",
            "BUILDFORGE_TIMEOUT",
            "BUILDFORGE_MEMORY_LIMIT",
            "BUILDFORGE_CPU_LIMIT",
            "BUILDFORGE_COMMAND_TIMEOUT",
            "BUILDFORGE_DOCKER_BUILD_TIMEOUT",
            "BUILDFORGE_OUTPUT_ROOT",
        ] {
            env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn defaults_apply_when_nothing_is_set() {
        clear_env();
        let config = Config::from_env().unwrap();
        assert_eq!(config.docker_image, "gcr.io/oss-fuzz-base/base-builder");
        assert_eq!(config.wall_clock_limit, Duration::from_secs(14400));
        assert_eq!(config.memory_limit, "30g");
        assert_eq!(config.cpu_limit, "0-15");
        assert_eq!(config.command_timeout, Duration::from_secs(600));
        assert_eq!(config.docker_build_timeout, Duration::from_secs(600));
        assert_eq!(config.output_root, PathBuf::from("./output"));
    }

    #[test]
    #[serial]
    fn environment_overrides_win() {
        clear_env();
        env::set_var("BUILDFORGE_DOCKER_IMAGE", "ubuntu:22.04");
        env::set_var("BUILDFORGE_TIMEOUT", "60");
        env::set_var("BUILDFORGE_MEMORY_LIMIT", "512m");
        env::set_var("BUILDFORGE_OUTPUT_ROOT", "/srv/attempts");
        let config = Config::from_env().unwrap();
        assert_eq!(config.docker_image, "ubuntu:22.04");
        assert_eq!(config.wall_clock_limit, Duration::from_secs(60));
        assert_eq!(config.memory_limit, "512m");
        assert_eq!(config.output_root, PathBuf::from("/srv/attempts"));
        clear_env();
    }

    #[test]
    #[serial]
    fn bad_numbers_name_the_variable() {
        clear_env();
        env::set_var("BUILDFORGE_TIMEOUT", "soon");
        let error = Config::from_env().unwrap_err();
        assert_eq!(
            error.to_string(),
            "Invalid value for BUILDFORGE_TIMEOUT: soon"
        );
        clear_env();
    }

    #[test]
    #[serial]
    fn bad_memory_limit_is_rejected() {
        clear_env();
        env::set_var("BUILDFORGE_MEMORY_LIMIT", "plenty");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::InvalidMemoryLimit(_))
        ));
        clear_env();
    }

    #[test]
    #[serial]
    fn sandbox_config_carries_the_tuned_fields() {
        clear_env();
        env::set_var("BUILDFORGE_COMMAND_TIMEOUT", "120");
        let config = Config::from_env().unwrap();
        let sandbox = config.sandbox_config(PathBuf::from("/tmp/scratch"));
        assert_eq!(sandbox.command_timeout, Duration::from_secs(120));
        assert_eq!(sandbox.scratch_dir, PathBuf::from("/tmp/scratch"));
        assert_eq!(sandbox.base_image, "gcr.io/oss-fuzz-base/base-builder");
        // Library defaults survive for the knobs the environment does not cover.
        assert_eq!(sandbox.install_timeout, Duration::from_secs(1800));
        clear_env();
    }
}

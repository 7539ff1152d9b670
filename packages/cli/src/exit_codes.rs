// ABOUTME: Process exit codes the buildforge binary reports
// ABOUTME: Stable contract for anything scripting attempts around this tool

/// Attempt finished and the verifier confirmed a configured environment.
pub const SUCCESS: i32 = 0;

/// Unclassified failure (I/O, malformed trace, unwritable outputs).
pub const GENERAL_ERROR: i32 = 1;

/// Bad command-line or environment configuration.
pub const INVALID_ARGUMENTS: i32 = 2;

/// Scratch volume crossed the usage limit; aborted before mutating further.
pub const DISK_FULL: i32 = 3;

/// Attempt finished but the verifier never confirmed the environment.
pub const CONFIGURATION_FAILED: i32 = 10;

/// Docker daemon unreachable or a container operation failed.
pub const DOCKER_ERROR: i32 = 30;

/// The sandbox wrapper image or a verification build did not build.
pub const DOCKER_IMAGE_BUILD_FAILED: i32 = 31;

/// Hard wall-clock ceiling on the whole attempt was reached.
pub const TIMEOUT: i32 = 120;

// ABOUTME: Error taxonomy for the sandbox: container lifecycle, images, staging
// ABOUTME: Session-protocol failures live in session.rs and convert in here

use thiserror::Error;

use crate::session::SessionError;

pub type Result<T> = std::result::Result<T, SandboxError>;

#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("Docker API error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("Failed to start container: {0}")]
    ContainerStart(String),

    #[error("Failed to pull image: {0}")]
    ImagePull(String),

    #[error("Failed to build image: {0}")]
    ImageBuild(String),

    #[error("Failed to stage files into container: {0}")]
    Staging(String),

    #[error("No snapshot available to roll back to")]
    NoSnapshot,

    #[error("Container is not running")]
    NotRunning,

    #[error("Shell session error: {0}")]
    Session(#[from] SessionError),

    #[error("Trace log error: {0}")]
    Trace(#[from] buildforge_trace::TraceError),
}

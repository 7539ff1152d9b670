// ABOUTME: Container lifecycle around one build sandbox: wrapper image, snapshots, rollback
// ABOUTME: Implements the driver seam; every mutating command is snapshot-guarded

use std::path::PathBuf;
use std::time::Instant;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions, UploadToContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::{
    BuildImageOptions, CommitContainerOptions, CreateImageOptions, RemoveImageOptions,
};
use bollard::models::HostConfig;
use bollard::Docker;
use futures::StreamExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use buildforge_trace::{CommandRecord, CommandStatus, RecordKind, TraceLog};

use crate::config::{parse_memory_limit, SandboxConfig};
use crate::driver::{ExecOutcome, ExecRequest, SandboxDriver};
use crate::error::{Result, SandboxError};
use crate::session::{SessionError, ShellSession};
use crate::toolkit;

/// Inside-container path the error stash lands at.
const ERROR_STASH_DIR: &str = "/repo";

/// The single-level rollback point. A new snapshot replaces the old one
/// outright; there is never a history to unwind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotState {
    NoSnapshot,
    Snapshot(String),
}

impl SnapshotState {
    fn replace(&mut self, image: String) {
        *self = SnapshotState::Snapshot(image);
    }

    fn take_image(&mut self) -> Option<String> {
        match std::mem::replace(self, SnapshotState::NoSnapshot) {
            SnapshotState::Snapshot(image) => Some(image),
            SnapshotState::NoSnapshot => None,
        }
    }

    pub fn image(&self) -> Option<&str> {
        match self {
            SnapshotState::Snapshot(image) => Some(image),
            SnapshotState::NoSnapshot => None,
        }
    }
}

/// One sandboxed build environment: a privileged container launched from a
/// wrapper image over the configured base, with tooling staged at /home/tools
/// and the repository checkout at /repo.
///
/// Exactly one live container and one live shell session exist per
/// controller; rollback and reset replace both together. Every command the
/// controller executes is recorded in the trace log that `stop()` hands back.
pub struct SandboxController {
    docker: Docker,
    config: SandboxConfig,
    slug: String,
    wrapper_image: String,
    container_id: Option<String>,
    session: Option<ShellSession>,
    snapshot: SnapshotState,
    trace: TraceLog,
    host_repo: PathBuf,
}

impl SandboxController {
    /// Connect to the local daemon. Nothing starts until `start()`.
    pub async fn new(
        config: SandboxConfig,
        repo_full_name: &str,
        host_repo: impl Into<PathBuf>,
    ) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()?;
        docker.ping().await?;
        let slug = sanitize_slug(repo_full_name);
        let wrapper_image = format!("build_env_{slug}");
        Ok(Self {
            docker,
            config,
            slug,
            wrapper_image,
            container_id: None,
            session: None,
            snapshot: SnapshotState::NoSnapshot,
            trace: TraceLog::new(),
            host_repo: host_repo.into(),
        })
    }

    /// Pull the base image if needed, build the wrapper image, launch the
    /// container, stage tooling and the repository, and open the shell.
    pub async fn start(&mut self) -> Result<()> {
        self.ensure_base_image().await?;
        self.build_wrapper_image().await?;
        let wrapper = self.wrapper_image.clone();
        let id = self.launch_container(&wrapper).await?;
        self.stage_tools(&id).await?;
        self.stage_repo(&id).await?;
        self.open_session(&id).await?;
        self.container_id = Some(id);
        Ok(())
    }

    /// Commit the container as `<slug>:tmp`, replacing any prior snapshot.
    pub async fn snapshot(&mut self) -> Result<()> {
        let id = self.require_container()?.to_string();
        if let Err(e) = self.docker.prune_images::<String>(None).await {
            debug!(error = %e, "dangling image prune failed");
        }
        let options = CommitContainerOptions {
            container: id,
            repo: self.slug.clone(),
            tag: "tmp".to_string(),
            ..Default::default()
        };
        self.docker
            .commit_container(options, Config::<String>::default())
            .await?;
        let image = format!("{}:tmp", self.slug);
        debug!(image = %image, "snapshot committed");
        self.snapshot.replace(image);
        Ok(())
    }

    /// Replace the container with one launched from the last snapshot.
    pub async fn rollback(&mut self) -> Result<()> {
        let snapshot = self
            .snapshot
            .image()
            .ok_or(SandboxError::NoSnapshot)?
            .to_string();
        info!(image = %snapshot, "rolling back to snapshot");
        self.teardown_container().await;
        let id = self.launch_container(&snapshot).await?;
        self.open_session(&id).await?;
        self.container_id = Some(id);
        Ok(())
    }

    /// Stop and remove the container and snapshot image; hand back the log.
    pub async fn stop(mut self) -> TraceLog {
        self.teardown_container().await;
        self.remove_snapshot_image().await;
        self.trace
    }

    pub fn trace(&self) -> &TraceLog {
        &self.trace
    }

    pub fn snapshot_state(&self) -> &SnapshotState {
        &self.snapshot
    }

    pub fn is_running(&self) -> bool {
        self.container_id.is_some()
    }

    async fn execute_inner(&mut self, request: ExecRequest) -> Result<ExecOutcome> {
        self.require_container()?;
        if request.mutating {
            self.snapshot().await?;
        }

        let timeout = request.timeout.unwrap_or(self.config.command_timeout);
        let directory = self.current_dir_inner().await?;
        let index = self.trace.append(CommandRecord::new(
            request.command.clone(),
            directory,
            request.kind.clone(),
            request.mutating,
        ));

        let trimmed = request.command.trim_end();
        let background = trimmed.ends_with('&') && !trimmed.ends_with("&&");
        let started = Instant::now();
        self.trace.mark_dispatched(index);

        let session = self.session.as_mut().ok_or(SandboxError::NotRunning)?;
        match session.run(&request.command, timeout).await {
            Ok(reply) => {
                let elapsed = started.elapsed().as_secs_f64();
                let status = if background {
                    CommandStatus::Dispatched
                } else {
                    match reply.status {
                        Some(code) => CommandStatus::Exited(code),
                        None => CommandStatus::Unknown,
                    }
                };
                self.trace.finish(index, status, elapsed);

                let failed = match status {
                    CommandStatus::Exited(code) => {
                        code != 0 && !request.allowed_exit_codes.contains(&code)
                    }
                    CommandStatus::Unknown => true,
                    _ => false,
                };
                let mut rolled_back = false;
                if failed && request.mutating {
                    self.rollback().await?;
                    self.trace
                        .annotate(index, "rolled back to pre-command snapshot");
                    rolled_back = true;
                }
                Ok(ExecOutcome {
                    text: reply.body,
                    status,
                    rolled_back,
                    reset_after_timeout: false,
                })
            }
            Err(SessionError::PromptTimeout {
                timeout_secs,
                partial,
            }) => {
                let elapsed = started.elapsed().as_secs_f64();
                self.trace.finish(index, CommandStatus::Exited(1), elapsed);
                self.trace
                    .annotate(index, format!("timed out after {timeout_secs}s"));
                warn!(
                    command = %request.command,
                    timeout_secs,
                    "command timed out, resetting sandbox"
                );
                self.reset_inner().await?;
                let text = format!(
                    "Error: Command '{}' timed out after {} seconds. Partial output:\n{}",
                    request.command,
                    timeout_secs,
                    trim_partial(&partial),
                );
                Ok(ExecOutcome {
                    text,
                    status: CommandStatus::Exited(1),
                    rolled_back: false,
                    reset_after_timeout: true,
                })
            }
            Err(other) => Err(other.into()),
        }
    }

    /// Tear everything down and relaunch fresh from the wrapper image.
    async fn reset_inner(&mut self) -> Result<()> {
        info!(image = %self.wrapper_image, "resetting sandbox to base state");
        self.teardown_container().await;
        self.remove_snapshot_image().await;
        let wrapper = self.wrapper_image.clone();
        let id = self.launch_container(&wrapper).await?;
        self.stage_tools(&id).await?;
        self.stage_repo(&id).await?;
        self.open_session(&id).await?;
        self.container_id = Some(id);
        let index = self
            .trace
            .append(CommandRecord::new("reset", "/", RecordKind::Reset, true));
        self.trace.finish(index, CommandStatus::Exited(0), 0.0);
        Ok(())
    }

    async fn current_dir_inner(&mut self) -> Result<String> {
        let timeout = self.config.command_timeout;
        let session = self.session.as_mut().ok_or(SandboxError::NotRunning)?;
        Ok(session.current_dir(timeout).await?)
    }

    async fn read_file_inner(&mut self, path: &str) -> Result<Option<String>> {
        let timeout = self.config.command_timeout;
        let session = self.session.as_mut().ok_or(SandboxError::NotRunning)?;
        let reply = session.run(&format!("cat '{path}'"), timeout).await?;
        match reply.status {
            Some(0) => Ok(Some(reply.body)),
            _ => Ok(None),
        }
    }

    async fn stash_error_inner(&mut self, content: &str) -> Result<bool> {
        let id = match self.container_id.as_deref() {
            Some(id) => id.to_string(),
            None => return Ok(false),
        };
        let archive = match toolkit::single_file_archive("error_output.txt", content) {
            Ok(archive) => archive,
            Err(e) => {
                warn!(error = %e, "building error stash archive failed");
                return Ok(false);
            }
        };
        match self
            .docker
            .upload_to_container(
                &id,
                Some(UploadToContainerOptions {
                    path: ERROR_STASH_DIR.to_string(),
                    ..Default::default()
                }),
                archive.into(),
            )
            .await
        {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!(error = %e, "error stash upload failed");
                Ok(false)
            }
        }
    }

    async fn ensure_base_image(&self) -> Result<()> {
        match self.docker.inspect_image(&self.config.base_image).await {
            Ok(_) => return Ok(()),
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => {}
            Err(e) => return Err(e.into()),
        }

        info!(image = %self.config.base_image, "pulling base image");
        let options = CreateImageOptions {
            from_image: self.config.base_image.clone(),
            ..Default::default()
        };
        let pull = async {
            let mut stream = self.docker.create_image(Some(options), None, None);
            while let Some(item) = stream.next().await {
                let info = item?;
                if let Some(error) = info.error {
                    return Err(SandboxError::ImagePull(error));
                }
            }
            Ok(())
        };
        match tokio::time::timeout(self.config.pull_timeout, pull).await {
            Ok(result) => result,
            Err(_) => Err(SandboxError::ImagePull(format!(
                "pull of {} exceeded {}s",
                self.config.base_image,
                self.config.pull_timeout.as_secs()
            ))),
        }
    }

    async fn build_wrapper_image(&self) -> Result<()> {
        let dockerfile = toolkit::wrapper_dockerfile(&self.config.base_image);
        let context =
            toolkit::build_context(&dockerfile).map_err(|e| SandboxError::ImageBuild(e.to_string()))?;

        info!(image = %self.wrapper_image, "building wrapper image");
        let options = BuildImageOptions {
            dockerfile: "Dockerfile".to_string(),
            t: self.wrapper_image.clone(),
            rm: true,
            ..Default::default()
        };
        let build = async {
            let mut stream = self.docker.build_image(options, None, Some(context.into()));
            while let Some(item) = stream.next().await {
                let info = item?;
                if let Some(error) = info.error {
                    return Err(SandboxError::ImageBuild(error));
                }
            }
            Ok(())
        };
        match tokio::time::timeout(self.config.build_timeout, build).await {
            Ok(result) => result,
            Err(_) => Err(SandboxError::ImageBuild(format!(
                "build of {} exceeded {}s",
                self.wrapper_image,
                self.config.build_timeout.as_secs()
            ))),
        }
    }

    async fn launch_container(&mut self, image: &str) -> Result<String> {
        std::fs::create_dir_all(&self.config.scratch_dir)
            .map_err(|e| SandboxError::Staging(e.to_string()))?;

        let name = format!("{}_{}", self.slug, Uuid::new_v4().simple());
        let scratch = self.config.scratch_dir.display().to_string();
        let host_config = HostConfig {
            binds: Some(vec![format!("{scratch}:/tmp/patch:rw")]),
            privileged: Some(true),
            memory: parse_memory_limit(&self.config.memory_limit),
            cpuset_cpus: Some(self.config.cpu_set.clone()),
            network_mode: Some("bridge".to_string()),
            ..Default::default()
        };
        let config = Config::<String> {
            image: Some(image.to_string()),
            // The base images default to a build entrypoint that exits; a
            // plain bash keeps the container alive for the session.
            cmd: Some(vec!["/bin/bash".to_string()]),
            tty: Some(true),
            open_stdin: Some(true),
            host_config: Some(host_config),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.clone(),
                    platform: None,
                }),
                config,
            )
            .await
            .map_err(|e| SandboxError::ContainerStart(e.to_string()))?;
        self.docker
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| SandboxError::ContainerStart(e.to_string()))?;

        info!(container = %name, image, "sandbox container started");
        Ok(created.id)
    }

    async fn stage_tools(&mut self, container_id: &str) -> Result<()> {
        let archive =
            toolkit::tools_archive().map_err(|e| SandboxError::Staging(e.to_string()))?;
        self.upload(container_id, "/home", archive).await
    }

    async fn stage_repo(&mut self, container_id: &str) -> Result<()> {
        let archive = toolkit::repo_archive(&self.host_repo)
            .map_err(|e| SandboxError::Staging(e.to_string()))?;
        self.upload(container_id, "/", archive).await
    }

    async fn upload(&mut self, container_id: &str, path: &str, archive: Vec<u8>) -> Result<()> {
        self.docker
            .upload_to_container(
                container_id,
                Some(UploadToContainerOptions {
                    path: path.to_string(),
                    ..Default::default()
                }),
                archive.into(),
            )
            .await
            .map_err(|e| SandboxError::Staging(e.to_string()))
    }

    async fn open_session(&mut self, container_id: &str) -> Result<()> {
        let session =
            ShellSession::open(&self.docker, container_id, self.config.command_timeout).await?;
        self.session = Some(session);
        Ok(())
    }

    async fn teardown_container(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close().await;
        }
        let Some(id) = self.container_id.take() else {
            return;
        };
        match self
            .docker
            .stop_container(&id, Some(StopContainerOptions { t: 5 }))
            .await
        {
            Ok(_) => {}
            Err(DockerError::DockerResponseServerError {
                status_code: 304 | 404,
                ..
            }) => {}
            Err(e) => warn!(error = %e, "container stop failed"),
        }
        match self
            .docker
            .remove_container(
                &id,
                Some(RemoveContainerOptions {
                    force: true,
                    v: true,
                    ..Default::default()
                }),
            )
            .await
        {
            Ok(_) => debug!(container = %id, "container removed"),
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => {}
            Err(e) => warn!(error = %e, "container removal failed"),
        }
    }

    async fn remove_snapshot_image(&mut self) {
        let Some(image) = self.snapshot.take_image() else {
            return;
        };
        match self
            .docker
            .remove_image(
                &image,
                Some(RemoveImageOptions {
                    force: true,
                    ..Default::default()
                }),
                None,
            )
            .await
        {
            Ok(_) => debug!(image = %image, "snapshot image removed"),
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => {}
            Err(e) => warn!(error = %e, image = %image, "snapshot image removal failed"),
        }
    }

    fn require_container(&self) -> Result<&str> {
        self.container_id.as_deref().ok_or(SandboxError::NotRunning)
    }
}

#[async_trait]
impl SandboxDriver for SandboxController {
    async fn execute(&mut self, request: ExecRequest) -> Result<ExecOutcome> {
        self.execute_inner(request).await
    }

    async fn reset(&mut self) -> Result<()> {
        self.reset_inner().await
    }

    async fn current_dir(&mut self) -> Result<String> {
        self.current_dir_inner().await
    }

    async fn read_file(&mut self, path: &str) -> Result<Option<String>> {
        self.read_file_inner(path).await
    }

    async fn stash_error_output(&mut self, content: &str) -> Result<bool> {
        self.stash_error_inner(content).await
    }
}

/// Image/container slug derived from the repository full name.
fn sanitize_slug(full_name: &str) -> String {
    full_name.to_lowercase().replace(&['/', '-'][..], "_")
}

/// Drop the echoed command line and the trailing prompt fragment from a
/// timed-out command's partial output.
fn trim_partial(partial: &str) -> String {
    let lines: Vec<&str> = partial.lines().collect();
    if lines.len() > 1 {
        lines[1..lines.len() - 1].join("\n")
    } else {
        partial.to_string()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn a_new_snapshot_replaces_the_old_one() {
        let mut state = SnapshotState::NoSnapshot;
        assert_eq!(state.image(), None);

        state.replace("acme_widget:tmp".to_string());
        state.replace("acme_widget:tmp".to_string());
        assert_eq!(state.image(), Some("acme_widget:tmp"));

        assert_eq!(state.take_image(), Some("acme_widget:tmp".to_string()));
        assert_eq!(state, SnapshotState::NoSnapshot);
        assert_eq!(state.take_image(), None);
    }

    #[test]
    fn slug_lowercases_and_flattens_separators() {
        assert_eq!(sanitize_slug("madler/zlib"), "madler_zlib");
        assert_eq!(sanitize_slug("GNOME/glib-networking"), "gnome_glib_networking");
    }

    #[test]
    fn wrapper_image_name_derives_from_slug() {
        assert_eq!(
            format!("build_env_{}", sanitize_slug("madler/zlib")),
            "build_env_madler_zlib"
        );
    }

    #[test]
    fn partial_output_drops_echo_and_prompt_fragment() {
        let partial = "make; echo \"__STATUS_3__:$?:__STATUS_3__\"\n\
                       gcc -c inflate.c\n\
                       gcc -c deflate.c\n\
                       root@abc:/repo";
        assert_eq!(trim_partial(partial), "gcc -c inflate.c\ngcc -c deflate.c");
    }

    #[test]
    fn single_line_partial_passes_through() {
        assert_eq!(trim_partial("still working"), "still working");
    }
}

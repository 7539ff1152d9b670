// ABOUTME: Persistent interactive bash over a docker exec tty
// ABOUTME: Marker round-trips recover true exit codes; a watchdog bounds every wait

use std::pin::Pin;
use std::time::{Duration, Instant};

use bollard::container::LogOutput;
use bollard::exec::{CreateExecOptions, ResizeExecOptions, StartExecResults};
use bollard::Docker;
use futures::stream::Stream;
use futures::StreamExt;
use regex::Regex;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use buildforge_term::{
    extract_body, find_bare_status, incomplete_escape_start, strip_controls, StatusMarker,
};

/// Bash prompt inside the wrapper image, anchored to the buffer tail.
const PROMPT_PATTERN: &str = r"root@[^\r\n]*:[^\r\n]*# $";

/// How far back in the stripped buffer the prompt scan looks.
const PROMPT_WINDOW: usize = 512;

type OutputStream =
    Pin<Box<dyn Stream<Item = Result<LogOutput, bollard::errors::Error>> + Send>>;

/// Where the session is in its submit/await cycle.
///
/// `TimedOut` and `Dead` are terminal for the session object; the controller
/// reacts by resetting the sandbox and opening a fresh session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AwaitingPrompt,
    TimedOut,
    Dead,
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("no shell prompt within {timeout_secs}s")]
    PromptTimeout { timeout_secs: u64, partial: String },

    #[error("shell stream closed unexpectedly")]
    Eof,

    #[error("session is {0:?}, not idle")]
    NotIdle(SessionState),

    #[error("Docker API error: {0}")]
    Docker(String),

    #[error("shell write failed: {0}")]
    Io(#[from] std::io::Error),
}

/// One command's recovered output and exit code.
///
/// `status` is `None` when both the marker and the bare `echo $?` fallback
/// failed to parse; callers record that as an unknown status rather than
/// guessing.
#[derive(Debug, Clone)]
pub struct CommandReply {
    pub body: String,
    pub status: Option<i64>,
}

/// A live interactive shell inside a container.
///
/// One bash child runs for the session's whole life, so shell state (cwd,
/// exported variables, background jobs) persists across submissions exactly
/// as it would for a person at the keyboard. Every wait is bounded; the only
/// suspension point is the read loop between submit and prompt.
pub struct ShellSession {
    exec_id: String,
    input: Pin<Box<dyn AsyncWrite + Send>>,
    output: OutputStream,
    pending_bytes: Vec<u8>,
    escape_carry: String,
    buffer: String,
    prompt: Regex,
    next_marker: u64,
    state: SessionState,
}

impl ShellSession {
    /// Attach a fresh bash to `container_id` and wait for its first prompt.
    pub async fn open(
        docker: &Docker,
        container_id: &str,
        startup_timeout: Duration,
    ) -> Result<Self, SessionError> {
        let exec = docker
            .create_exec(
                container_id,
                CreateExecOptions {
                    cmd: Some(vec!["/bin/bash".to_string()]),
                    attach_stdin: Some(true),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    tty: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| SessionError::Docker(e.to_string()))?;

        let started = docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| SessionError::Docker(e.to_string()))?;
        let (output, input) = match started {
            StartExecResults::Attached { output, input } => (output, input),
            StartExecResults::Detached => return Err(SessionError::Eof),
        };

        // A very wide pty keeps echoed submissions on one line, so the marker
        // scan never has to reassemble wrapped input.
        if let Err(e) = docker
            .resize_exec(
                &exec.id,
                ResizeExecOptions {
                    height: 24,
                    width: 10_000,
                },
            )
            .await
        {
            warn!(error = %e, "resize_exec failed, long lines may wrap");
        }

        let mut session = Self {
            exec_id: exec.id,
            input,
            output,
            pending_bytes: Vec::new(),
            escape_carry: String::new(),
            buffer: String::new(),
            prompt: Regex::new(PROMPT_PATTERN).expect("prompt pattern compiles"),
            next_marker: 0,
            state: SessionState::AwaitingPrompt,
        };

        // Swallow the greeting and first prompt before handing the session out.
        session.read_until_prompt(startup_timeout).await?;
        session.state = SessionState::Idle;
        debug!(exec_id = %session.exec_id, "shell session ready");
        Ok(session)
    }

    /// Submit one command and block until the prompt returns.
    ///
    /// The command is wrapped with a per-submission status marker; if the
    /// marker never echoes back (swallowed by a trailing comment or heredoc)
    /// a bare `echo $?` round-trip recovers the code instead.
    pub async fn run(
        &mut self,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandReply, SessionError> {
        if self.state != SessionState::Idle {
            return Err(SessionError::NotIdle(self.state));
        }

        let marker = StatusMarker::new(self.bump_marker());
        let wrapped = marker.wrap_command(command);
        self.buffer.clear();
        self.submit(&wrapped).await?;
        self.state = SessionState::AwaitingPrompt;
        self.read_until_prompt(timeout).await?;
        self.state = SessionState::Idle;

        let body = extract_body(&self.buffer, &marker.token());
        match marker.find_status(&self.buffer) {
            Some(status) => Ok(CommandReply {
                body,
                status: Some(status),
            }),
            None => {
                debug!(command, "status marker missing, falling back to echo $?");
                let status = self.bare_status_roundtrip(timeout).await?;
                Ok(CommandReply { body, status })
            }
        }
    }

    /// Working directory of the shell right now, via a silent `pwd`.
    pub async fn current_dir(&mut self, timeout: Duration) -> Result<String, SessionError> {
        let reply = self.run("pwd", timeout).await?;
        let dir = reply.body.lines().next().unwrap_or("").trim();
        if dir.is_empty() {
            Ok("/".to_string())
        } else {
            Ok(dir.to_string())
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_alive(&self) -> bool {
        matches!(self.state, SessionState::Idle | SessionState::AwaitingPrompt)
    }

    /// Ask bash to exit. Best effort; the container teardown is what actually
    /// reclaims the exec.
    pub async fn close(&mut self) {
        if self.state == SessionState::Idle || self.state == SessionState::TimedOut {
            if let Err(e) = self.submit("exit").await {
                debug!(error = %e, "shell already gone on close");
            }
        }
        self.state = SessionState::Dead;
    }

    async fn bare_status_roundtrip(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<i64>, SessionError> {
        self.buffer.clear();
        self.submit("echo $?").await?;
        self.state = SessionState::AwaitingPrompt;
        self.read_until_prompt(timeout).await?;
        self.state = SessionState::Idle;
        Ok(find_bare_status(&self.buffer))
    }

    async fn submit(&mut self, line: &str) -> Result<(), SessionError> {
        self.input.write_all(line.as_bytes()).await?;
        self.input.write_all(b"\n").await?;
        self.input.flush().await?;
        Ok(())
    }

    /// Pull chunks off the exec stream until the prompt shows at the buffer
    /// tail or the deadline passes.
    async fn read_until_prompt(&mut self, timeout: Duration) -> Result<(), SessionError> {
        let deadline = Instant::now() + timeout;
        loop {
            if prompt_visible(&self.prompt, &self.buffer) {
                return Ok(());
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                self.state = SessionState::TimedOut;
                return Err(SessionError::PromptTimeout {
                    timeout_secs: timeout.as_secs(),
                    partial: self.buffer.clone(),
                });
            }
            match tokio::time::timeout(remaining, self.output.next()).await {
                Ok(Some(Ok(chunk))) => self.ingest(chunk),
                Ok(Some(Err(e))) => {
                    self.state = SessionState::Dead;
                    return Err(SessionError::Docker(e.to_string()));
                }
                Ok(None) => {
                    self.state = SessionState::Dead;
                    return Err(SessionError::Eof);
                }
                Err(_) => {
                    self.state = SessionState::TimedOut;
                    return Err(SessionError::PromptTimeout {
                        timeout_secs: timeout.as_secs(),
                        partial: self.buffer.clone(),
                    });
                }
            }
        }
    }

    fn ingest(&mut self, chunk: LogOutput) {
        let bytes = match chunk {
            LogOutput::StdOut { message }
            | LogOutput::StdErr { message }
            | LogOutput::Console { message } => message,
            LogOutput::StdIn { .. } => return,
        };
        self.pending_bytes.extend_from_slice(&bytes);
        let decoded = take_valid_utf8(&mut self.pending_bytes);
        if !decoded.is_empty() {
            absorb_text(&mut self.buffer, &mut self.escape_carry, &decoded);
        }
    }

    fn bump_marker(&mut self) -> u64 {
        self.next_marker += 1;
        self.next_marker
    }
}

/// True when the stripped buffer currently ends in a shell prompt.
fn prompt_visible(prompt: &Regex, buffer: &str) -> bool {
    let tail_start = buffer.len().saturating_sub(PROMPT_WINDOW);
    let tail = buffer.get(tail_start..).unwrap_or(buffer);
    prompt.is_match(tail)
}

/// Strip `decoded` into `buffer`, holding back a trailing escape sequence the
/// chunk cut off so the stripper only ever sees whole sequences.
fn absorb_text(buffer: &mut String, carry: &mut String, decoded: &str) {
    let combined = if carry.is_empty() {
        decoded.to_string()
    } else {
        format!("{carry}{decoded}")
    };
    match incomplete_escape_start(&combined) {
        Some(cut) => {
            buffer.push_str(&strip_controls(&combined[..cut]));
            *carry = combined[cut..].to_string();
        }
        None => {
            buffer.push_str(&strip_controls(&combined));
            carry.clear();
        }
    }
}

/// Decode the longest valid UTF-8 prefix of `pending`, keeping an incomplete
/// trailing character around for the next chunk.
fn take_valid_utf8(pending: &mut Vec<u8>) -> String {
    match std::str::from_utf8(pending) {
        Ok(text) => {
            let text = text.to_string();
            pending.clear();
            text
        }
        Err(err) => {
            if err.error_len().is_none() && pending.len() - err.valid_up_to() < 4 {
                let valid = err.valid_up_to();
                let text = String::from_utf8_lossy(&pending[..valid]).into_owned();
                pending.drain(..valid);
                text
            } else {
                // Hard-invalid bytes: replace them and move on.
                let text = String::from_utf8_lossy(pending).into_owned();
                pending.clear();
                text
            }
        }
    }
}

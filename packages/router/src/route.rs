// ABOUTME: Dispatches parsed instructions to the ledger, deny screens, or the sandbox shell
// ABOUTME: Owns reply assembly: command prefix, failure notes, clamping and the error stash

use std::time::Duration;

use tracing::info;

use buildforge_ledger::Ledger;
use buildforge_safety::{classify, screen};
use buildforge_sandbox::{ExecRequest, Result, SandboxDriver, SUCCESS_SENTINEL};
use buildforge_term::{clamp_output, needs_error_stash, ERROR_OUTPUT_PATH};
use buildforge_trace::RecordKind;

use crate::install::DriverInstallRunner;
use crate::parse::{parse, Instruction};

/// Staged verifier invocation `runtest` rewrites to.
pub const VERIFIER_COMMAND: &str = "bash /home/tools/runtest.sh";

/// Exit code meaning the verifier ran but the build or tests failed. The
/// only expected-nonzero code any dispatch whitelists.
const VERIFIER_FAILED_CODE: i64 = 5;

const ROLLBACK_NOTE: &str = "The command execution failed, so I have reverted it back to the \
                             previous state, which is the environment before running this command.";
const CHECK_OUTPUT_NOTE: &str = "The command execution failed, please carefully check the output!";

/// Reply status: an exit code, or unknown for pure bookkeeping operations
/// that never touched the shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyStatus {
    Code(i64),
    Unknown,
}

impl ReplyStatus {
    pub fn code(&self) -> Option<i64> {
        match self {
            ReplyStatus::Code(code) => Some(*code),
            ReplyStatus::Unknown => None,
        }
    }
}

/// One routed reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub status: ReplyStatus,
    /// Full untruncated text of a failing command, kept alongside the
    /// clamped reply so the caller can persist it.
    pub full_failure: Option<String>,
}

impl Reply {
    fn with_code(text: String, code: i64) -> Self {
        Self {
            text,
            status: ReplyStatus::Code(code),
            full_failure: None,
        }
    }
}

/// Routes instruction lines for one sandbox interaction.
///
/// The router holds the package ledger for the whole session; the sandbox
/// driver is lent per dispatch so tests can swap in fakes.
pub struct Router {
    ledger: Ledger,
    install_timeout: Duration,
}

impl Router {
    pub fn new(install_timeout: Duration) -> Self {
        Self {
            ledger: Ledger::new(),
            install_timeout,
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Route one instruction line and produce its reply.
    pub async fn dispatch(
        &mut self,
        line: &str,
        driver: &mut (dyn SandboxDriver + Send),
    ) -> Result<Reply> {
        let instruction = match parse(line) {
            Ok(instruction) => instruction,
            Err(validation) => {
                info!(command = line, "malformed built-in rejected");
                return Ok(Reply::with_code(
                    format!("Running `{}`...\n{}\n", line.trim(), validation.usage),
                    1,
                ));
            }
        };

        match instruction {
            Instruction::WaitingAdd {
                name,
                constraint,
                tool,
            } => {
                let (_, message) = self.ledger.add(&name, constraint, &tool);
                Ok(bookkeeping_reply(line, &message))
            }
            Instruction::WaitingAddFile { path } => self.add_from_file(line, &path, driver).await,
            Instruction::WaitingClear => {
                let message = self.ledger.clear_waiting();
                Ok(bookkeeping_reply(line, &message))
            }
            Instruction::WaitingShow => {
                let message = self.ledger.show_waiting();
                Ok(bookkeeping_reply(line, &message))
            }
            Instruction::ConflictSolve(policy) => {
                let message = self.ledger.resolve(policy);
                Ok(bookkeeping_reply(line, &message))
            }
            Instruction::ConflictClear => {
                let message = self.ledger.clear_conflicts();
                Ok(bookkeeping_reply(line, &message))
            }
            Instruction::ConflictShow => {
                let message = self.ledger.show_conflicts();
                Ok(bookkeeping_reply(line, &message))
            }
            Instruction::Download => self.drain(line, driver).await,
            Instruction::RunTest => {
                run_shell(
                    driver,
                    VERIFIER_COMMAND.to_string(),
                    RecordKind::Verifier,
                    true,
                    vec![VERIFIER_FAILED_CODE],
                )
                .await
            }
            Instruction::ClearConfiguration => {
                driver.reset().await?;
                Ok(Reply::with_code(
                    format!(
                        "Running `{}`...\nThe environment has been reset to the initial clean state.\n",
                        line.trim()
                    ),
                    0,
                ))
            }
            Instruction::CurrentDir => {
                let dir = driver.current_dir().await?;
                Ok(Reply::with_code(dir, 0))
            }
            Instruction::Shell(command) => {
                if let Some(deny) = screen(&command) {
                    info!(%command, "command blocked by deny screen");
                    return Ok(Reply::with_code(deny.message, deny.status));
                }
                let mutating = classify(&command).is_mutating();
                let kind = match patch_file(&command) {
                    Some(file) => RecordKind::Patch { file },
                    None => RecordKind::Shell,
                };
                run_shell(driver, command, kind, mutating, Vec::new()).await
            }
        }
    }

    async fn add_from_file(
        &mut self,
        line: &str,
        path: &str,
        driver: &mut (dyn SandboxDriver + Send),
    ) -> Result<Reply> {
        match driver.read_file(path).await? {
            Some(listing) => {
                let message = self.ledger.add_from_listing(&listing);
                Ok(bookkeeping_reply(line, &message))
            }
            None => Ok(Reply::with_code(
                format!(
                    "\nRunning `{}`...\nThe file {path} does not exist. Please ensure you have \
                     entered the correct absolute path, not a relative path! If you are unsure, \
                     you can use commands like `ls` to verify.",
                    line.trim()
                ),
                1,
            )),
        }
    }

    async fn drain(
        &mut self,
        line: &str,
        driver: &mut (dyn SandboxDriver + Send),
    ) -> Result<Reply> {
        let mut runner = DriverInstallRunner::new(driver, self.install_timeout);
        match self.ledger.drain(&mut runner).await {
            Ok(report) => Ok(bookkeeping_reply(line, &report.transcript)),
            Err(conflict) => Ok(bookkeeping_reply(line, &conflict.message)),
        }
    }
}

async fn run_shell(
    driver: &mut (dyn SandboxDriver + Send),
    command: String,
    kind: RecordKind,
    mutating: bool,
    allowed_exit_codes: Vec<i64>,
) -> Result<Reply> {
    let request = ExecRequest::shell(command.clone(), mutating)
        .with_kind(kind)
        .with_allowed_exit_codes(allowed_exit_codes.clone());
    let outcome = driver.execute(request).await?;

    // The watchdog reply carries its own explanation and the sandbox has
    // already been reset underneath it.
    if outcome.reset_after_timeout {
        let code = outcome.status_code();
        return Ok(Reply::with_code(outcome.text, code));
    }

    let code = outcome.status_code();
    let mut body = outcome.text;
    if outcome.rolled_back {
        append_line(&mut body, ROLLBACK_NOTE);
    } else if code != 0 && !allowed_exit_codes.contains(&code) {
        append_line(&mut body, CHECK_OUTPUT_NOTE);
    }

    if body.contains(SUCCESS_SENTINEL) {
        return Ok(Reply::with_code(body, code));
    }

    let full = format!("Running `{command}`...\n{body}\n");
    if needs_error_stash(&full, code) {
        let stashed = driver.stash_error_output(&full).await?;
        let saved_to = stashed.then_some(ERROR_OUTPUT_PATH);
        return Ok(Reply {
            text: clamp_output(&full, code, saved_to),
            status: ReplyStatus::Code(code),
            full_failure: Some(full),
        });
    }

    let text = clamp_output(&full, code, None);
    let full_failure = (code != 0).then(|| full);
    Ok(Reply {
        text,
        status: ReplyStatus::Code(code),
        full_failure,
    })
}

/// Patch file applied by a plain `git apply <file>` line, if that is what
/// the command is.
///
/// These are recorded as patch records so recipe synthesis can chain each
/// patch behind a revert of the previous one. Anything fancier (flags,
/// multiple files, compound commands) replays verbatim as a shell record.
fn patch_file(command: &str) -> Option<String> {
    let tokens: Vec<&str> = command.split_whitespace().collect();
    match tokens.as_slice() {
        ["git", "apply", file] if !file.starts_with('-') => Some((*file).to_string()),
        _ => None,
    }
}

fn bookkeeping_reply(line: &str, message: &str) -> Reply {
    let full = format!("Running `{}`...\n{message}\n", line.trim());
    Reply {
        text: clamp_output(&full, 0, None),
        status: ReplyStatus::Unknown,
        full_failure: None,
    }
}

fn append_line(body: &mut String, note: &str) {
    if !body.is_empty() {
        body.push('\n');
    }
    body.push_str(note);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, VecDeque};

    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    use buildforge_sandbox::ExecOutcome;
    use buildforge_trace::CommandStatus;

    struct FakeDriver {
        outcomes: VecDeque<ExecOutcome>,
        executed: Vec<ExecRequest>,
        files: HashMap<String, String>,
        resets: usize,
        stashed: Vec<String>,
        stash_ok: bool,
        directory: String,
    }

    impl FakeDriver {
        fn new() -> Self {
            Self {
                outcomes: VecDeque::new(),
                executed: Vec::new(),
                files: HashMap::new(),
                resets: 0,
                stashed: Vec::new(),
                stash_ok: true,
                directory: "/repo".to_string(),
            }
        }

        fn scripted(outcomes: Vec<ExecOutcome>) -> Self {
            Self {
                outcomes: outcomes.into(),
                ..Self::new()
            }
        }
    }

    #[async_trait]
    impl SandboxDriver for FakeDriver {
        async fn execute(&mut self, request: ExecRequest) -> Result<ExecOutcome> {
            self.executed.push(request);
            Ok(self.outcomes.pop_front().unwrap_or_else(|| exited("", 0)))
        }

        async fn reset(&mut self) -> Result<()> {
            self.resets += 1;
            Ok(())
        }

        async fn current_dir(&mut self) -> Result<String> {
            Ok(self.directory.clone())
        }

        async fn read_file(&mut self, path: &str) -> Result<Option<String>> {
            Ok(self.files.get(path).cloned())
        }

        async fn stash_error_output(&mut self, content: &str) -> Result<bool> {
            self.stashed.push(content.to_string());
            Ok(self.stash_ok)
        }
    }

    fn exited(text: &str, code: i64) -> ExecOutcome {
        ExecOutcome {
            text: text.to_string(),
            status: CommandStatus::Exited(code),
            rolled_back: false,
            reset_after_timeout: false,
        }
    }

    fn router() -> Router {
        Router::new(Duration::from_secs(1800))
    }

    #[tokio::test]
    async fn waitinglist_add_is_pure_bookkeeping() {
        let mut driver = FakeDriver::new();
        let mut router = router();

        let reply = router
            .dispatch("waitinglist add -p zlib1g-dev -t apt", &mut driver)
            .await
            .unwrap();

        assert_eq!(reply.status, ReplyStatus::Unknown);
        assert!(reply
            .text
            .starts_with("Running `waitinglist add -p zlib1g-dev -t apt`...\n"));
        assert!(reply.text.contains("has been added into the waiting list"));
        assert!(driver.executed.is_empty());
        assert_eq!(router.ledger().waiting.len(), 1);
    }

    #[tokio::test]
    async fn malformed_built_in_never_touches_the_container() {
        let mut driver = FakeDriver::new();
        let mut router = router();

        let reply = router
            .dispatch("waitinglist add -p zlib1g-dev", &mut driver)
            .await
            .unwrap();

        assert_eq!(reply.status, ReplyStatus::Code(1));
        assert!(reply.text.contains("formats are leagal"));
        assert!(driver.executed.is_empty());
        assert!(router.ledger().waiting.is_empty());
    }

    #[tokio::test]
    async fn malformed_conflictlist_gets_its_own_usage() {
        let mut driver = FakeDriver::new();
        let reply = router()
            .dispatch("conflictlist solve -v ==2.0", &mut driver)
            .await
            .unwrap();

        assert_eq!(reply.status, ReplyStatus::Code(1));
        assert!(reply.text.contains("formats are legal"));
        assert!(reply.text.contains("conflictlist solve -u"));
    }

    #[tokio::test]
    async fn download_dispatches_through_the_staged_apt_helper() {
        let mut driver = FakeDriver::scripted(vec![exited(
            "Package zlib1g-dev installed successfully!",
            0,
        )]);
        let mut router = router();

        router
            .dispatch("waitinglist add -p zlib1g-dev -t apt", &mut driver)
            .await
            .unwrap();
        let reply = router.dispatch("download", &mut driver).await.unwrap();

        assert_eq!(driver.executed.len(), 1);
        let exec = &driver.executed[0];
        assert_eq!(exec.command, "bash /home/tools/apt_install.sh zlib1g-dev");
        assert!(exec.mutating);
        assert_eq!(exec.timeout, Some(Duration::from_secs(1800)));
        assert!(matches!(exec.kind, RecordKind::Installer { .. }));

        assert_eq!(reply.status, ReplyStatus::Unknown);
        assert!(reply
            .text
            .contains("\"zlib1g-dev\" installed successfully."));
        assert!(reply.text.contains("DOWNLOAD SUMMARY"));
    }

    #[tokio::test]
    async fn download_refuses_while_conflicts_pending() {
        let mut driver = FakeDriver::new();
        let mut router = router();

        router
            .dispatch("waitinglist add -p zlib1g-dev -t apt", &mut driver)
            .await
            .unwrap();
        router
            .dispatch(
                "waitinglist add -p zlib1g-dev -v \">=1.2\" -t apt",
                &mut driver,
            )
            .await
            .unwrap();
        let reply = router.dispatch("download", &mut driver).await.unwrap();

        assert_eq!(reply.status, ReplyStatus::Unknown);
        assert!(reply.text.contains("conflictlist solve"));
        assert!(driver.executed.is_empty());
    }

    #[tokio::test]
    async fn conflict_solve_unblocks_the_download() {
        let mut driver = FakeDriver::scripted(vec![exited("ok", 0)]);
        let mut router = router();

        router
            .dispatch("waitinglist add -p zlib1g-dev -t apt", &mut driver)
            .await
            .unwrap();
        router
            .dispatch(
                "waitinglist add -p zlib1g-dev -v \">=1.2\" -t apt",
                &mut driver,
            )
            .await
            .unwrap();
        let solved = router
            .dispatch("conflictlist solve -u", &mut driver)
            .await
            .unwrap();
        assert_eq!(solved.status, ReplyStatus::Unknown);
        assert!(solved.text.contains("The conflict list has been cleared."));

        let reply = router.dispatch("download", &mut driver).await.unwrap();
        assert_eq!(driver.executed.len(), 1);
        assert!(reply.text.contains("installed successfully"));
    }

    #[tokio::test]
    async fn runtest_rewrites_to_the_staged_verifier() {
        let mut driver = FakeDriver::scripted(vec![exited("make: *** [test] Error 1", 5)]);
        let reply = router().dispatch("runtest", &mut driver).await.unwrap();

        let exec = &driver.executed[0];
        assert_eq!(exec.command, "bash /home/tools/runtest.sh");
        assert_eq!(exec.kind, RecordKind::Verifier);
        assert_eq!(exec.allowed_exit_codes, vec![5]);
        assert!(exec.mutating);

        assert_eq!(reply.status, ReplyStatus::Code(5));
        assert!(reply
            .text
            .starts_with("Running `bash /home/tools/runtest.sh`...\n"));
        // 5 is expected-nonzero for the verifier: no failure note.
        assert!(!reply.text.contains("carefully check the output"));
        assert!(!reply.text.contains("reverted it back"));
    }

    #[tokio::test]
    async fn sentinel_reply_is_never_wrapped_or_truncated() {
        let noise: String = (1..=60)
            .map(|i| format!("check {i} passed"))
            .collect::<Vec<_>>()
            .join("\n");
        let text = format!("{noise}\n{SUCCESS_SENTINEL}");
        let mut driver = FakeDriver::scripted(vec![exited(&text, 0)]);

        let reply = router().dispatch("runtest", &mut driver).await.unwrap();

        assert_eq!(reply.status, ReplyStatus::Code(0));
        assert_eq!(reply.text, text);
        assert!(!reply.text.starts_with("Running"));
    }

    #[tokio::test]
    async fn mutating_failure_carries_the_rollback_note() {
        let mut driver = FakeDriver::scripted(vec![ExecOutcome {
            text: "gcc: error: nope.c: No such file or directory".to_string(),
            status: CommandStatus::Exited(2),
            rolled_back: true,
            reset_after_timeout: false,
        }]);

        let reply = router().dispatch("make -j4", &mut driver).await.unwrap();

        assert!(driver.executed[0].mutating);
        assert_eq!(reply.status, ReplyStatus::Code(2));
        assert!(reply.text.starts_with("Running `make -j4`...\n"));
        assert!(reply.text.contains("reverted it back to the previous state"));
    }

    #[tokio::test]
    async fn read_only_failure_appends_the_check_note() {
        let mut driver = FakeDriver::scripted(vec![exited(
            "ls: cannot access '/nope': No such file or directory",
            2,
        )]);

        let reply = router().dispatch("ls /nope", &mut driver).await.unwrap();

        assert!(!driver.executed[0].mutating);
        assert!(reply
            .text
            .contains("The command execution failed, please carefully check the output!"));
    }

    #[tokio::test]
    async fn watchdog_reply_passes_straight_through() {
        let text = "Error: Command 'make' timed out after 600 seconds. Partial output:\ncc -c foo.c";
        let mut driver = FakeDriver::scripted(vec![ExecOutcome {
            text: text.to_string(),
            status: CommandStatus::Exited(1),
            rolled_back: false,
            reset_after_timeout: true,
        }]);

        let reply = router().dispatch("make", &mut driver).await.unwrap();

        assert_eq!(reply.text, text);
        assert_eq!(reply.status, ReplyStatus::Code(1));
    }

    #[tokio::test]
    async fn deny_screens_block_before_the_shell() {
        let mut driver = FakeDriver::new();
        let mut router = router();

        let removed = router
            .dispatch("rm tests/test_parser.c", &mut driver)
            .await
            .unwrap();
        assert_eq!(removed.status, ReplyStatus::Code(1));
        assert!(removed.text.contains("do not directly delete"));

        let shell = router.dispatch("bash", &mut driver).await.unwrap();
        assert_eq!(shell.status, ReplyStatus::Code(-1));
        assert!(shell.text.contains("open a new shell"));

        assert!(driver.executed.is_empty());
    }

    #[tokio::test]
    async fn pwd_query_is_silent() {
        let mut driver = FakeDriver::new();
        let reply = router().dispatch("$pwd$", &mut driver).await.unwrap();

        assert_eq!(reply.text, "/repo");
        assert_eq!(reply.status, ReplyStatus::Code(0));
        assert!(driver.executed.is_empty());
    }

    #[tokio::test]
    async fn clear_configuration_resets_the_sandbox() {
        let mut driver = FakeDriver::new();
        let reply = router()
            .dispatch("clear_configuration", &mut driver)
            .await
            .unwrap();

        assert_eq!(driver.resets, 1);
        assert_eq!(reply.status, ReplyStatus::Code(0));
        assert!(reply.text.contains("reset to the initial clean state"));
    }

    #[tokio::test]
    async fn addfile_queues_every_listing_line() {
        let mut driver = FakeDriver::new();
        driver.files.insert(
            "/repo/deps.txt".to_string(),
            "zlib1g-dev\nlibssl-dev>=1.1\n".to_string(),
        );
        let mut router = router();

        let reply = router
            .dispatch("waitinglist addfile /repo/deps.txt", &mut driver)
            .await
            .unwrap();

        assert_eq!(reply.status, ReplyStatus::Unknown);
        assert_eq!(router.ledger().waiting.len(), 2);
    }

    #[tokio::test]
    async fn addfile_missing_file_is_status_one() {
        let mut driver = FakeDriver::new();
        let reply = router()
            .dispatch("waitinglist addfile /nope.txt", &mut driver)
            .await
            .unwrap();

        assert_eq!(reply.status, ReplyStatus::Code(1));
        assert!(reply.text.contains("The file /nope.txt does not exist."));
        assert!(reply.text.contains("not a relative path!"));
    }

    #[tokio::test]
    async fn long_failure_is_stashed_and_clamped() {
        let noisy: String = (1..=80)
            .map(|i| format!("error line {i}"))
            .collect::<Vec<_>>()
            .join("\n");
        let mut driver = FakeDriver::scripted(vec![exited(&noisy, 2)]);

        let reply = router().dispatch("make", &mut driver).await.unwrap();

        assert_eq!(driver.stashed.len(), 1);
        assert!(driver.stashed[0].starts_with("Running `make`...\n"));
        assert!(reply
            .text
            .contains("Full output saved to: /repo/error_output.txt"));
        assert!(reply.text.contains("━━━ First 25 lines ━━━"));
        assert_eq!(reply.full_failure.as_deref(), Some(driver.stashed[0].as_str()));
    }

    #[tokio::test]
    async fn long_success_clamps_without_stash() {
        let chatty: String = (1..=90)
            .map(|i| format!("compiling unit {i}"))
            .collect::<Vec<_>>()
            .join("\n");
        let mut driver = FakeDriver::scripted(vec![exited(&chatty, 0)]);

        let reply = router().dispatch("make", &mut driver).await.unwrap();

        assert!(driver.stashed.is_empty());
        assert!(reply.text.contains("lines omitted"));
        assert!(reply.full_failure.is_none());
    }

    #[tokio::test]
    async fn git_apply_round_trips_into_the_patch_chain() {
        use buildforge_recipe::{synthesize, RecipeMeta};
        use buildforge_trace::{CommandRecord, TraceLog};

        let mut driver = FakeDriver::scripted(vec![exited("", 0), exited("", 0)]);
        let mut router = router();

        router
            .dispatch("git apply /tmp/patch/fix1.patch", &mut driver)
            .await
            .unwrap();
        router
            .dispatch("git apply /tmp/patch/fix2.patch", &mut driver)
            .await
            .unwrap();

        assert_eq!(driver.executed.len(), 2);
        for (exec, file) in driver
            .executed
            .iter()
            .zip(["/tmp/patch/fix1.patch", "/tmp/patch/fix2.patch"])
        {
            assert_eq!(
                exec.kind,
                RecordKind::Patch {
                    file: file.to_string()
                }
            );
            assert!(exec.mutating);
        }

        // Records shaped the way the session loop writes them, fed through
        // synthesis: the second patch must revert the first before applying.
        let mut log = TraceLog::new();
        for exec in &driver.executed {
            let index = log.append(CommandRecord::new(
                exec.command.clone(),
                "/repo",
                exec.kind.clone(),
                exec.mutating,
            ));
            log.finish(index, CommandStatus::Exited(0), 0.1);
        }
        let meta = RecipeMeta {
            repo_full_name: "acme/widget".to_string(),
            base_image: "ubuntu:22.04".to_string(),
            commit_sha: None,
        };
        let recipe = synthesize(&log, &meta);
        assert_eq!(
            recipe.steps(),
            [
                "COPY /tmp/patch/fix1.patch /tmp/patch/fix1.patch",
                "RUN cd /repo && git apply /tmp/patch/fix1.patch",
                "COPY /tmp/patch/fix2.patch /tmp/patch/fix2.patch",
                "RUN cd /repo && git apply -R /tmp/patch/fix1.patch && git apply /tmp/patch/fix2.patch",
            ]
        );
    }

    #[tokio::test]
    async fn only_a_bare_git_apply_becomes_a_patch_record() {
        let mut driver = FakeDriver::scripted(vec![exited("", 0), exited("", 0)]);
        let mut router = router();

        router
            .dispatch("git apply --check /tmp/patch/fix.patch", &mut driver)
            .await
            .unwrap();
        router
            .dispatch("cd /repo && git apply /tmp/patch/fix.patch", &mut driver)
            .await
            .unwrap();

        assert_eq!(driver.executed.len(), 2);
        assert!(driver
            .executed
            .iter()
            .all(|exec| exec.kind == RecordKind::Shell));
    }
}

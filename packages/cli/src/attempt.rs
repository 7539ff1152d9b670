// ABOUTME: One interactive configuration attempt: stdin REPL, guards, durable outputs
// ABOUTME: Drives the router against a live sandbox, then finalizes the artifacts

use std::io::Write;
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use buildforge_recipe::{synthesize, RecipeMeta};
use buildforge_router::Router;
use buildforge_safety::classify;
use buildforge_sandbox::{
    disk_usage_percent, SandboxConfig, SandboxController, SandboxError, SUCCESS_SENTINEL,
};
use buildforge_trace::TraceLog;

use crate::exit_codes;

/// Scratch-volume usage above which the attempt aborts outright.
const DISK_USAGE_LIMIT_PERCENT: u8 = 90;

/// Everything one attempt needs, resolved from flags and environment.
pub struct AttemptArgs {
    pub repo: String,
    pub commit: String,
    pub repo_dir: PathBuf,
    pub output_dir: PathBuf,
    pub wall_clock_limit: Duration,
    pub sandbox: SandboxConfig,
}

/// Run one configuration attempt end to end and return the process exit code.
///
/// Instructions arrive one per line on stdin; EOF or a literal `stop` ends
/// the attempt. Replies go to stdout. Whatever happens mid-session, the
/// trace, the raw instruction list and the synthesized Dockerfile are
/// written before returning.
pub async fn run(args: AttemptArgs) -> i32 {
    if args.repo.split('/').count() != 2 {
        eprintln!(
            "Error: --repo must be an owner/name pair, got `{}`",
            args.repo
        );
        return exit_codes::INVALID_ARGUMENTS;
    }
    if let Err(e) = std::fs::create_dir_all(&args.output_dir) {
        eprintln!(
            "Error: cannot create output directory {}: {e}",
            args.output_dir.display()
        );
        return exit_codes::GENERAL_ERROR;
    }
    if let Err(e) = std::fs::create_dir_all(&args.sandbox.scratch_dir) {
        eprintln!(
            "Error: cannot create scratch directory {}: {e}",
            args.sandbox.scratch_dir.display()
        );
        return exit_codes::GENERAL_ERROR;
    }
    if let Err(e) = std::fs::write(args.output_dir.join("sha.txt"), &args.commit) {
        warn!(error = %e, "could not record the commit sha");
    }

    let limit = args.wall_clock_limit;
    tokio::spawn(async move {
        tokio::time::sleep(limit).await;
        error!(
            limit_secs = limit.as_secs(),
            "wall-clock limit reached, aborting the attempt"
        );
        process::exit(exit_codes::TIMEOUT);
    });

    let mut controller =
        match SandboxController::new(args.sandbox.clone(), &args.repo, &args.repo_dir).await {
            Ok(controller) => controller,
            Err(e) => {
                eprintln!("Error: {e}");
                return exit_codes::DOCKER_ERROR;
            }
        };
    if let Err(e) = controller.start().await {
        eprintln!("Error: {e}");
        return startup_exit_code(&e);
    }
    info!(repo = %args.repo, commit = %args.commit, "sandbox ready, reading instructions");

    let mut router = Router::new(args.sandbox.install_timeout);
    let mut outer_commands: Vec<String> = Vec::new();
    let mut latest_test: Option<String> = None;
    let mut fatal: Option<i32> = None;
    let test_path = args.output_dir.join("test.txt");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                eprintln!("Error: failed to read instruction: {e}");
                fatal = Some(exit_codes::GENERAL_ERROR);
                break;
            }
        };
        let instruction = line.trim();
        if instruction.is_empty() {
            continue;
        }
        if instruction == "stop" {
            break;
        }

        if may_mutate(instruction) {
            match disk_usage_percent(&args.sandbox.scratch_dir).await {
                Ok(percent) if percent > DISK_USAGE_LIMIT_PERCENT => {
                    eprintln!("Error: scratch volume is {percent}% full, aborting");
                    process::exit(exit_codes::DISK_FULL);
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "disk usage probe failed"),
            }
        }

        outer_commands.push(instruction.to_string());
        let reply = match router.dispatch(instruction, &mut controller).await {
            Ok(reply) => reply,
            Err(e) => {
                eprintln!("Error: {e}");
                fatal = Some(exit_codes::DOCKER_ERROR);
                break;
            }
        };

        if instruction == "runtest" {
            let text = reply
                .full_failure
                .clone()
                .unwrap_or_else(|| reply.text.clone());
            if let Err(e) = std::fs::write(&test_path, &text) {
                warn!(error = %e, "could not persist the verifier output");
            }
            latest_test = Some(text);
        }

        print!("{}", reply.text);
        if !reply.text.ends_with('\n') {
            println!();
        }
        let _ = std::io::stdout().flush();
    }

    let trace = controller.stop().await;
    let code = finalize(&args, &trace, &outer_commands, latest_test.as_deref());
    fatal.unwrap_or(code)
}

/// Persist the attempt artifacts and decide the exit code from the latest
/// verifier output.
fn finalize(
    args: &AttemptArgs,
    trace: &TraceLog,
    outer_commands: &[String],
    latest_test: Option<&str>,
) -> i32 {
    if let Err(e) = trace.save(args.output_dir.join("inner_commands.json")) {
        eprintln!("Error: failed to write the command trace: {e}");
        return exit_codes::GENERAL_ERROR;
    }
    let raw = match serde_json::to_string_pretty(outer_commands) {
        Ok(raw) => raw,
        Err(e) => {
            eprintln!("Error: failed to serialize the instruction list: {e}");
            return exit_codes::GENERAL_ERROR;
        }
    };
    if let Err(e) = std::fs::write(args.output_dir.join("outer_commands.json"), raw) {
        eprintln!("Error: failed to write the instruction list: {e}");
        return exit_codes::GENERAL_ERROR;
    }

    let meta = RecipeMeta {
        repo_full_name: args.repo.clone(),
        base_image: args.sandbox.base_image.clone(),
        commit_sha: Some(args.commit.clone()),
    };
    let recipe = synthesize(trace, &meta);
    if let Err(e) = std::fs::write(args.output_dir.join("Dockerfile"), recipe.render()) {
        eprintln!("Error: failed to write the Dockerfile: {e}");
        return exit_codes::GENERAL_ERROR;
    }
    info!(
        steps = recipe.steps().len(),
        output = %args.output_dir.display(),
        "attempt artifacts written"
    );

    let passed = latest_test
        .map(|text| text.contains(SUCCESS_SENTINEL))
        .unwrap_or(false);
    if passed {
        info!("verifier confirmed a configured environment");
        exit_codes::SUCCESS
    } else {
        info!("attempt finished without a passing verifier run");
        exit_codes::CONFIGURATION_FAILED
    }
}

fn startup_exit_code(error: &SandboxError) -> i32 {
    match error {
        SandboxError::ImageBuild(_) => exit_codes::DOCKER_IMAGE_BUILD_FAILED,
        _ => exit_codes::DOCKER_ERROR,
    }
}

/// Whether an instruction can change sandbox state, and so must pass the
/// disk guard first. Ledger bookkeeping and pwd never touch the container;
/// the remaining built-ins all install, run or reset things.
fn may_mutate(instruction: &str) -> bool {
    match instruction {
        "download" | "runtest" | "clear_configuration" => true,
        _ if instruction.eq_ignore_ascii_case("$pwd$") => false,
        _ => {
            let first = instruction.split_whitespace().next().unwrap_or("");
            !matches!(first, "waitinglist" | "conflictlist") && classify(instruction).is_mutating()
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use buildforge_trace::{CommandRecord, CommandStatus, RecordKind};

    use super::*;

    fn args_into(dir: &tempfile::TempDir) -> AttemptArgs {
        AttemptArgs {
            repo: "madler/zlib".to_string(),
            commit: "cacf7f1d4e3d44d871b605da3b647f07d718623f".to_string(),
            repo_dir: PathBuf::from("/srv/checkouts/zlib"),
            output_dir: dir.path().to_path_buf(),
            wall_clock_limit: Duration::from_secs(60),
            sandbox: SandboxConfig::default(),
        }
    }

    #[test]
    fn finalize_writes_all_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let args = args_into(&dir);
        let mut trace = TraceLog::new();
        let index = trace.append(CommandRecord::new("make", "/repo", RecordKind::Shell, true));
        trace.finish(index, CommandStatus::Exited(0), 1.2);

        let code = finalize(&args, &trace, &["make".to_string()], Some("2 tests failed"));

        assert_eq!(code, exit_codes::CONFIGURATION_FAILED);
        assert!(dir.path().join("inner_commands.json").is_file());
        let raw = std::fs::read_to_string(dir.path().join("outer_commands.json")).unwrap();
        let listed: Vec<String> = serde_json::from_str(&raw).unwrap();
        assert_eq!(listed, vec!["make".to_string()]);
        let dockerfile = std::fs::read_to_string(dir.path().join("Dockerfile")).unwrap();
        assert!(dockerfile.contains("RUN cd /repo && make"));
        assert!(dockerfile.contains("madler/zlib"));
    }

    #[test]
    fn sentinel_in_the_latest_verifier_output_means_success() {
        let dir = tempfile::tempdir().unwrap();
        let args = args_into(&dir);
        let output = format!("Running tests...\n{SUCCESS_SENTINEL}\n");

        let code = finalize(&args, &TraceLog::new(), &[], Some(&output));

        assert_eq!(code, exit_codes::SUCCESS);
    }

    #[test]
    fn no_verifier_run_means_the_attempt_failed() {
        let dir = tempfile::tempdir().unwrap();
        let args = args_into(&dir);

        let code = finalize(&args, &TraceLog::new(), &[], None);

        assert_eq!(code, exit_codes::CONFIGURATION_FAILED);
    }

    #[rstest]
    #[case("download")]
    #[case("runtest")]
    #[case("clear_configuration")]
    #[case("make -j4")]
    #[case("echo ready > /repo/marker")]
    fn state_changing_instructions_hit_the_disk_guard(#[case] instruction: &str) {
        assert!(may_mutate(instruction));
    }

    #[rstest]
    #[case("$pwd$")]
    #[case("$PWD$")]
    #[case("waitinglist add -p zlib1g-dev -t apt")]
    #[case("conflictlist show")]
    #[case("ls /repo")]
    #[case("cat CMakeLists.txt")]
    fn bookkeeping_and_diagnostics_skip_the_disk_guard(#[case] instruction: &str) {
        assert!(!may_mutate(instruction));
    }

    #[test]
    fn wrapper_image_build_failures_map_to_their_own_code() {
        let error = SandboxError::ImageBuild("step 3 failed".to_string());
        assert_eq!(startup_exit_code(&error), exit_codes::DOCKER_IMAGE_BUILD_FAILED);
        let error = SandboxError::ContainerStart("no such image".to_string());
        assert_eq!(startup_exit_code(&error), exit_codes::DOCKER_ERROR);
    }
}

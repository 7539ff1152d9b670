// ABOUTME: Deny screens that reject harmful instructions before they reach the shell
// ABOUTME: Each screen returns a canned reply and synthetic exit status, no container touch

/// Canned rejection produced by a deny screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenyReply {
    pub message: String,
    pub status: i64,
}

/// Run an instruction through the deny screens, in precedence order:
/// nested shells first, then the pytest redirect, then test-file guards.
/// `None` means the instruction may proceed.
pub fn screen(command: &str) -> Option<DenyReply> {
    if let Some(reply) = block_nested_shell(command) {
        return Some(reply);
    }
    if let Some(reply) = block_pytest(command) {
        return Some(reply);
    }
    if let Some(reply) = block_test_file_removal(command) {
        return Some(reply);
    }
    block_test_file_move(command)
}

fn block_nested_shell(command: &str) -> Option<DenyReply> {
    let lowered = command.trim().to_lowercase();
    let opens_shell = lowered == "hatch shell" || matches!(lowered.as_str(), "bash" | "sh" | "zsh");
    opens_shell.then(|| DenyReply {
        message: format!(
            "You are not allowed to use commands like `{}` that would open a new shell!!!",
            command.trim()
        ),
        status: -1,
    })
}

fn block_pytest(command: &str) -> Option<DenyReply> {
    let lowered = command.to_lowercase();
    (lowered.contains("pytest") && !lowered.contains("pip")).then(|| DenyReply {
        message: "This is a C/C++ project. Use `runtest` instead (which runs ctest or make test \
                  for C/C++ projects)."
            .to_string(),
        status: 1,
    })
}

fn block_test_file_removal(command: &str) -> Option<DenyReply> {
    targets_test_file(command, "rm").then(|| DenyReply {
        message: "Please do not directly delete the testing file to pass the test!".to_string(),
        status: 1,
    })
}

fn block_test_file_move(command: &str) -> Option<DenyReply> {
    targets_test_file(command, "mv").then(|| DenyReply {
        message: "Please do not directly move the testing file to pass the test!".to_string(),
        status: 1,
    })
}

/// True when `verb` leads the command and the final path segment on the line
/// names a test file: `test_` prefix or a `_test` stem.
fn targets_test_file(command: &str, verb: &str) -> bool {
    if command.split_whitespace().next() != Some(verb) {
        return false;
    }
    let tail = command.rsplit('/').next().unwrap_or(command).trim();
    tail.starts_with("test_") || stem_ends_with_test(tail)
}

fn stem_ends_with_test(name: &str) -> bool {
    let stem = name.split('.').next().unwrap_or(name);
    stem.ends_with("_test")
}

// ABOUTME: Strict grammars for the built-in instruction set
// ABOUTME: A malformed built-in never reaches the shell; it gets the family usage text back

use thiserror::Error;

use buildforge_ledger::ResolvePolicy;

/// Fixed usage text returned for any malformed `waitinglist` instruction.
pub const WAITINGLIST_USAGE: &str = "waitinglist command usage error, the following command formats are leagal:
1. `waitinglist add -p package_name1 -v >=1.0.0 -t pip`
Explanation: Add package_name1>=1.0.0 into waiting list(using pip), and version constraints string cannot contain spaces.
2. `waitinglist add -p package_name1 -t pip`
Explanation: Add package_name1 into waiting list, no `-v` means download the latest version by default.
3. `waitinglist addfile /path/to/file`
Explanation: Add all the items in the /path/to/file into waiting list. Note that you must make sure each line's item meet the formats like [package_name][version_constraints].
4. `waitinglist clear`
Explanation: Clear all the items in the waiting list.";

/// Fixed usage text returned for any malformed `conflictlist` instruction.
pub const CONFLICTLIST_USAGE: &str = "conflictlist command usage error, the following command formats are legal:
1. `conflictlist solve`
Explanation: The standalone `conflictlist solve` command means not to impose any version constraints, i.e., to default to downloading the latest version of the third-party library. This will update the version constraint in the waiting list to be unrestricted.
2. `conflictlist solve -v \"==2.0\"`
Explanation: Adding -v followed by a version constraint enclosed in double quotes updates the version constraint in the waiting list to that specific range, such as \"==2.0\", meaning to take version 2.0.
3. `conflictlist solve -v \">3.0\"`
Explanation: Similar to the command 2, this constraint specifies a version number greater than 3.0.
4. `conflictlist solve -u`
Explanation: Adding -u indicates giving up all the constraints in the conflict list while still retaining the constraints in the waiting list, i.e., not updating the constraints for that library in the waiting list.
5. `conflictlist clear`
Explanation: Clear all the items in the conflict list.";

/// A built-in instruction that did not match its family grammar. The reply
/// carries the usage text; nothing is executed and no state changes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{usage}")]
pub struct ValidationError {
    pub usage: &'static str,
}

impl ValidationError {
    fn waitinglist() -> Self {
        Self {
            usage: WAITINGLIST_USAGE,
        }
    }

    fn conflictlist() -> Self {
        Self {
            usage: CONFLICTLIST_USAGE,
        }
    }
}

/// One parsed operator instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    WaitingAdd {
        name: String,
        constraint: Option<String>,
        tool: String,
    },
    WaitingAddFile {
        path: String,
    },
    WaitingClear,
    WaitingShow,
    ConflictSolve(ResolvePolicy),
    ConflictClear,
    ConflictShow,
    /// Drain the waiting list through the installers.
    Download,
    /// Staged build-and-test verifier.
    RunTest,
    /// Full sandbox reset back to the wrapper image.
    ClearConfiguration,
    /// Silent working-directory query, never recorded.
    CurrentDir,
    /// Anything else: free-form shell text.
    Shell(String),
}

/// Parse one instruction line.
///
/// Verbs are case-sensitive except `$pwd$`. A line whose leading token
/// targets the waitinglist or conflictlist family but fails the exact
/// grammar yields the family usage text instead of falling through to the
/// shell.
pub fn parse(line: &str) -> Result<Instruction, ValidationError> {
    let trimmed = line.trim();
    if trimmed.to_lowercase() == "$pwd$" {
        return Ok(Instruction::CurrentDir);
    }
    match trimmed {
        "download" => return Ok(Instruction::Download),
        "runtest" => return Ok(Instruction::RunTest),
        "clear_configuration" => return Ok(Instruction::ClearConfiguration),
        _ => {}
    }

    let mut tokens = trimmed.split_whitespace();
    match tokens.next() {
        Some("waitinglist") => parse_waitinglist(trimmed),
        Some("conflictlist") => parse_conflictlist(trimmed),
        Some(first) if first.to_lowercase().starts_with("waiting") => {
            Err(ValidationError::waitinglist())
        }
        Some(first) if first.to_lowercase().starts_with("conflict") => {
            Err(ValidationError::conflictlist())
        }
        _ => Ok(Instruction::Shell(trimmed.to_string())),
    }
}

fn parse_waitinglist(trimmed: &str) -> Result<Instruction, ValidationError> {
    let tokens: Vec<&str> = trimmed.split_whitespace().collect();
    match tokens.get(1) {
        Some(&"add") => parse_waitinglist_add(&tokens[2..]),
        Some(&"addfile") if tokens.len() == 3 => Ok(Instruction::WaitingAddFile {
            path: tokens[2].to_string(),
        }),
        Some(&"clear") if tokens.len() == 2 => Ok(Instruction::WaitingClear),
        Some(&"show") if tokens.len() == 2 => Ok(Instruction::WaitingShow),
        _ => Err(ValidationError::waitinglist()),
    }
}

/// `-p <name>` and `-t <tool>` are required, `-v <constraint>` optional;
/// flags may appear in any order but each needs a value.
fn parse_waitinglist_add(flags: &[&str]) -> Result<Instruction, ValidationError> {
    let mut name = None;
    let mut tool = None;
    let mut constraint = None;

    let mut iter = flags.iter();
    while let Some(flag) = iter.next() {
        let value = iter.next().ok_or_else(ValidationError::waitinglist)?;
        match *flag {
            "-p" => name = Some(value.to_string()),
            "-t" => tool = Some(value.to_string()),
            "-v" => constraint = Some(value.trim_matches('"').to_string()),
            _ => return Err(ValidationError::waitinglist()),
        }
    }

    match (name, tool) {
        (Some(name), Some(tool)) => Ok(Instruction::WaitingAdd {
            name,
            constraint,
            tool,
        }),
        _ => Err(ValidationError::waitinglist()),
    }
}

fn parse_conflictlist(trimmed: &str) -> Result<Instruction, ValidationError> {
    match trimmed {
        "conflictlist clear" => return Ok(Instruction::ConflictClear),
        "conflictlist show" => return Ok(Instruction::ConflictShow),
        "conflictlist solve" => {
            return Ok(Instruction::ConflictSolve(ResolvePolicy::DropConstraints))
        }
        "conflictlist solve -u" => {
            return Ok(Instruction::ConflictSolve(ResolvePolicy::KeepOriginal))
        }
        _ => {}
    }

    if let Some(rest) = trimmed.strip_prefix("conflictlist solve -v ") {
        let rest = rest.trim();
        if rest.len() >= 2 && rest.starts_with('"') && rest.ends_with('"') {
            let constraint = rest[1..rest.len() - 1].trim();
            if !constraint.is_empty() {
                return Ok(Instruction::ConflictSolve(ResolvePolicy::SetConstraint(
                    constraint.to_string(),
                )));
            }
        }
    }
    Err(ValidationError::conflictlist())
}

// ABOUTME: Status-marker codec wrapping shell exit codes in unambiguous delimiters
// ABOUTME: Each submission appends `echo "__STATUS_n__:$?:__STATUS_n__"` and parses it back

use crate::strip::split_lines;

/// Per-submission marker that smuggles the shell's `$?` back through the tty.
///
/// The id is a per-session monotonic counter, so stale markers from earlier
/// submissions can never satisfy a later parse. The echoed input line contains
/// the literal `$?` rather than a number and therefore never parses as a
/// marker, which is what makes scanning the whole buffer safe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusMarker {
    id: u64,
}

impl StatusMarker {
    pub fn new(id: u64) -> Self {
        Self { id }
    }

    pub fn token(&self) -> String {
        format!("__STATUS_{}__", self.id)
    }

    /// The bookkeeping suffix echoing the previous command's exit code.
    pub fn echo_fragment(&self) -> String {
        let token = self.token();
        format!("echo \"{token}:$?:{token}\"")
    }

    /// Compose the single line submitted to the shell for `command`.
    ///
    /// Background jobs (trailing `&`) use the `&` itself as the separator so
    /// the job dispatches and the marker reports immediately; everything else
    /// is joined with `;` so the marker sees the command's own exit code. A
    /// single trailing `;` on the input is absorbed to keep the line valid.
    pub fn wrap_command(&self, command: &str) -> String {
        let trimmed = command.trim_end();
        if trimmed.ends_with('&') && !trimmed.ends_with("&&") {
            return format!("{} {}", trimmed, self.echo_fragment());
        }
        let trimmed = match trimmed.strip_suffix(';') {
            Some(rest) => rest.trim_end(),
            None => trimmed,
        };
        format!("{}; {}", trimmed, self.echo_fragment())
    }

    /// Scan stripped output for this marker and recover the exit code.
    ///
    /// Takes the last match so output that happens to repeat earlier lines
    /// cannot shadow the real report, which always arrives last.
    pub fn find_status(&self, stripped: &str) -> Option<i64> {
        let token = self.token();
        split_lines(stripped)
            .iter()
            .rev()
            .find_map(|line| parse_marker_line(line, &token))
    }
}

/// Parse a line of the exact shape `<token>:<code>:<token>`.
pub fn parse_marker_line(line: &str, token: &str) -> Option<i64> {
    let line = line.trim();
    let rest = line.strip_prefix(token)?.strip_prefix(':')?;
    let middle = rest.strip_suffix(token)?.strip_suffix(':')?;
    middle.parse::<i64>().ok()
}

/// Recover an exit code from a bare `echo $?` round-trip.
///
/// Fallback path for when a marker got swallowed (trailing comment, heredoc):
/// skip the echoed input line, then take the last line that parses as an
/// integer on its own.
pub fn find_bare_status(stripped: &str) -> Option<i64> {
    split_lines(stripped)
        .iter()
        .skip(1)
        .rev()
        .find_map(|line| line.trim().parse::<i64>().ok())
}

/// Output lines between the echoed input and the status marker.
///
/// The first line is the tty echo of what was submitted and is dropped. If
/// the marker never shows up (malformed-marker case) everything after the
/// echo is kept. Blank edges are trimmed.
pub fn extract_body(stripped: &str, token: &str) -> String {
    let lines = split_lines(stripped);
    let mut body: Vec<&str> = Vec::new();
    for line in lines.iter().skip(1) {
        if parse_marker_line(line, token).is_some() {
            break;
        }
        body.push(line.as_str());
    }
    while matches!(body.last(), Some(line) if line.trim().is_empty()) {
        body.pop();
    }
    let start = body
        .iter()
        .position(|line| !line.trim().is_empty())
        .unwrap_or(body.len());
    body[start..].join("\n")
}

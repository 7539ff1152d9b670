// ABOUTME: Output clamping that keeps replies readable without losing failure detail
// ABOUTME: Long failures are stashed to a file in the sandbox and summarized around it

/// Where long failure output is stashed inside the container so follow-up
/// commands can read it back.
pub const ERROR_OUTPUT_PATH: &str = "/repo/error_output.txt";

const KEEP_LINES: usize = 50;
const EDGE_LINES: usize = 25;

/// Whether a reply is a long failure whose full text should be stashed
/// before clamping.
pub fn needs_error_stash(message: &str, exit_code: i64) -> bool {
    exit_code != 0 && message.lines().count() > KEEP_LINES
}

/// Clamp command output to at most 50 content lines.
///
/// Output of 50 lines or fewer passes through untouched. Longer success
/// output keeps the first and last 25 lines around an omitted-count line.
/// Longer failure output gets the same clamp plus a header; when the full
/// text was stashed, the header tells the reader where and how to view it.
pub fn clamp_output(message: &str, exit_code: i64, saved_to: Option<&str>) -> String {
    let lines: Vec<&str> = message.lines().collect();
    let line_count = lines.len();
    if line_count <= KEEP_LINES {
        return message.to_string();
    }
    let omitted = line_count - KEEP_LINES;
    let head = lines[..EDGE_LINES].join("\n");
    let tail = lines[line_count - EDGE_LINES..].join("\n");

    if exit_code != 0 {
        let mut summary = format!("⚠️  Error output too long ({line_count} lines)\n");
        if let Some(path) = saved_to {
            summary.push_str(&format!("📁 Full output saved to: {path}\n\n"));
            summary.push_str("💡 Read the file to see all errors:\n");
            summary.push_str(&format!("   - cat {path}\n"));
            summary.push_str(&format!("   - tail -100 {path}\n"));
            summary.push_str(&format!("   - grep -i 'error' {path}\n\n"));
        }
        summary.push_str("━━━ First 25 lines ━━━\n");
        summary.push_str(&head);
        summary.push_str(&format!("\n\n... ({omitted} lines omitted) ...\n\n"));
        summary.push_str("━━━ Last 25 lines ━━━\n");
        summary.push_str(&tail);
        summary
    } else {
        format!("{head}\n\n... ({omitted} lines omitted) ...\n\n{tail}")
    }
}

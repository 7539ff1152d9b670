// ABOUTME: ANSI control-sequence stripping and line splitting for raw tty output
// ABOUTME: Pure string transforms, no I/O; the shell session feeds buffers through here

/// Remove terminal control sequences from raw shell output.
///
/// Handles CSI sequences (including private-mode ones like the bracketed
/// paste toggles `ESC[?2004h` / `ESC[?2004l` bash emits on every prompt),
/// OSC sequences terminated by BEL or ST, charset selection, and other
/// two-byte escapes. BEL bytes outside sequences are dropped as noise.
pub fn strip_controls(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\u{7}' {
            continue;
        }
        if c != '\u{1b}' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            // CSI: parameter and intermediate bytes, then one final byte in 0x40..=0x7e
            Some('[') => {
                chars.next();
                while let Some(&next) = chars.peek() {
                    chars.next();
                    if ('\u{40}'..='\u{7e}').contains(&next) {
                        break;
                    }
                }
            }
            // OSC: runs until BEL or ST (ESC \)
            Some(']') => {
                chars.next();
                while let Some(next) = chars.next() {
                    if next == '\u{7}' {
                        break;
                    }
                    if next == '\u{1b}' {
                        if chars.peek() == Some(&'\\') {
                            chars.next();
                        }
                        break;
                    }
                }
            }
            // Charset selection carries one designator after the set byte
            Some('(') | Some(')') | Some('#') => {
                chars.next();
                chars.next();
            }
            Some(_) => {
                chars.next();
            }
            None => {}
        }
    }
    out
}

/// Byte offset of a trailing escape sequence the buffer cuts off mid-way,
/// if any.
///
/// Streamed tty reads can split a sequence across chunks; the session holds
/// back everything from this offset and prepends it to the next chunk so
/// `strip_controls` only ever sees whole sequences.
pub fn incomplete_escape_start(input: &str) -> Option<usize> {
    let start = input.rfind('\u{1b}')?;
    let tail: Vec<char> = input[start..].chars().collect();
    match tail.get(1) {
        None => Some(start),
        Some('[') => {
            // Complete once a final byte in 0x40..=0x7e shows up
            if tail[2..].iter().any(|c| ('\u{40}'..='\u{7e}').contains(c)) {
                None
            } else {
                Some(start)
            }
        }
        Some(']') => {
            // OSC runs until BEL or ST; cap how long we wait for one
            let terminated = tail[2..]
                .iter()
                .any(|c| *c == '\u{7}' || *c == '\u{1b}')
                && !tail.ends_with(&['\u{1b}']);
            if terminated || tail.len() > 256 {
                None
            } else {
                Some(start)
            }
        }
        Some('(') | Some(')') | Some('#') => {
            if tail.len() >= 3 {
                None
            } else {
                Some(start)
            }
        }
        Some(_) => None,
    }
}

/// Split tty output into lines, tolerating CRLF and bare LF endings.
pub fn split_lines(input: &str) -> Vec<String> {
    input
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line).to_string())
        .collect()
}

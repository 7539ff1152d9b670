// ABOUTME: Pure terminal-stream decoding: control stripping, status markers, clamping
// ABOUTME: No I/O anywhere in this crate; the shell session owns the transport

pub mod clamp;
pub mod marker;
pub mod strip;

pub use clamp::{clamp_output, needs_error_stash, ERROR_OUTPUT_PATH};
pub use marker::{extract_body, find_bare_status, parse_marker_line, StatusMarker};
pub use strip::{incomplete_escape_start, split_lines, strip_controls};

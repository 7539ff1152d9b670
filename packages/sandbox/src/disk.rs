// ABOUTME: Scratch-volume disk usage probe backing the pre-mutation guard
// ABOUTME: Shells out to portable `df -P` and reads the capacity column

use std::io;
use std::path::Path;

use tokio::process::Command;

/// Percentage used of the filesystem holding `path`.
pub async fn disk_usage_percent(path: &Path) -> io::Result<u8> {
    let output = Command::new("df").arg("-P").arg(path).output().await?;
    if !output.status.success() {
        return Err(io::Error::new(
            io::ErrorKind::Other,
            format!("df exited with {}", output.status),
        ));
    }
    parse_df_percent(&String::from_utf8_lossy(&output.stdout)).ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidData, "no capacity column in df output")
    })
}

fn parse_df_percent(output: &str) -> Option<u8> {
    let line = output.lines().nth(1)?;
    line.split_whitespace()
        .rev()
        .find_map(|token| token.strip_suffix('%').and_then(|n| n.parse::<u8>().ok()))
}

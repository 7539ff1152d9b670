// ABOUTME: Registry of shell commands treated as read-only diagnostics
// ABOUTME: Commands led by these tokens skip the snapshot/rollback cycle

/// Leading tokens that do not change persistent sandbox state.
///
/// `cd` is here on purpose: it only moves shell state, and the session
/// re-queries the working directory before every command anyway.
pub const READ_ONLY_COMMANDS: &[&str] = &[
    "cd", "ls", "cat", "echo", "pwd", "whoami", "who", "date", "cal", "df", "du",
    "free", "uname", "uptime", "w", "ps", "pgrep", "top", "htop", "vmstat", "iostat",
    "dmesg", "tail", "head", "more", "less", "grep", "find", "locate", "whereis", "which",
    "file", "stat", "cmp", "diff", "md5sum", "sha256sum", "gzip", "gunzip", "bzip2", "bunzip2",
    "xz", "unxz", "sort", "uniq", "wc", "tr", "cut", "paste", "tee", "awk", "sed", "env",
    "printenv", "hostname", "ping", "traceroute", "ssh", "journalctl", "lsblk", "blkid",
    "lscpu", "lsusb", "lspci", "lsmod", "dmidecode", "ip", "ifconfig", "netstat", "ss",
    "route", "nmap", "strace", "ltrace", "time", "nice", "renice", "killall", "printf",
];

pub fn is_read_only_token(token: &str) -> bool {
    READ_ONLY_COMMANDS.contains(&token.trim())
}

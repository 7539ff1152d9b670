// ABOUTME: Embedded container tooling plus the tar staging used for uploads
// ABOUTME: Scripts land at /home/tools; the repository checkout lands at /repo

use std::io;
use std::path::Path;

use tar::{Builder, Header};

pub const RUNTEST_SCRIPT: &str = include_str!("../scripts/runtest.sh");
pub const APT_INSTALL_SCRIPT: &str = include_str!("../scripts/apt_install.sh");

/// Where the staged tooling lives inside the container.
pub const TOOLS_DIR: &str = "/home/tools";

/// Banner runtest.sh prints when the environment checks out. Downstream
/// reporting passes any output containing it through untruncated.
pub const SUCCESS_SENTINEL: &str =
    "Congratulations, you have successfully configured the environment!";

/// Dockerfile for the wrapper image layered on the configured base.
pub fn wrapper_dockerfile(base_image: &str) -> String {
    format!(
        "FROM {base_image}\n\
         RUN mkdir -p /repo && git config --global --add safe.directory /repo\n\
         WORKDIR /repo\n"
    )
}

/// Tar archive holding the tooling scripts, uploaded at /home.
pub fn tools_archive() -> io::Result<Vec<u8>> {
    let mut builder = Builder::new(Vec::new());
    append_entry(&mut builder, "tools/runtest.sh", RUNTEST_SCRIPT, 0o755)?;
    append_entry(&mut builder, "tools/apt_install.sh", APT_INSTALL_SCRIPT, 0o755)?;
    builder.into_inner()
}

/// Tar archive of the host repository checkout, uploaded at /.
pub fn repo_archive(host_repo: &Path) -> io::Result<Vec<u8>> {
    let mut builder = Builder::new(Vec::new());
    builder.append_dir_all("repo", host_repo)?;
    builder.into_inner()
}

/// Single-file tar archive for dropping one file into a container directory.
pub fn single_file_archive(name: &str, body: &str) -> io::Result<Vec<u8>> {
    let mut builder = Builder::new(Vec::new());
    append_entry(&mut builder, name, body, 0o644)?;
    builder.into_inner()
}

/// Build context for the wrapper image: just the Dockerfile.
pub fn build_context(dockerfile: &str) -> io::Result<Vec<u8>> {
    single_file_archive("Dockerfile", dockerfile)
}

fn append_entry(
    builder: &mut Builder<Vec<u8>>,
    path: &str,
    body: &str,
    mode: u32,
) -> io::Result<()> {
    let mut header = Header::new_gnu();
    header.set_size(body.len() as u64);
    header.set_mode(mode);
    header.set_cksum();
    builder.append_data(&mut header, path, body.as_bytes())
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use pretty_assertions::assert_eq;

    use super::*;

    fn entry_names(archive: &[u8]) -> Vec<String> {
        let mut reader = tar::Archive::new(archive);
        reader
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().display().to_string())
            .collect()
    }

    #[test]
    fn tools_archive_carries_both_scripts_executable() {
        let bytes = tools_archive().unwrap();
        assert_eq!(
            entry_names(&bytes),
            vec!["tools/runtest.sh", "tools/apt_install.sh"]
        );

        let mut reader = tar::Archive::new(&bytes[..]);
        for entry in reader.entries().unwrap() {
            let entry = entry.unwrap();
            assert_eq!(entry.header().mode().unwrap() & 0o111, 0o111);
        }
    }

    #[test]
    fn repo_archive_nests_under_repo() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Makefile"), "all:\n\ttrue\n").unwrap();

        let bytes = repo_archive(dir.path()).unwrap();
        let names = entry_names(&bytes);
        assert!(names.contains(&"repo".to_string()) || names.contains(&"repo/".to_string()));
        assert!(names.contains(&"repo/Makefile".to_string()));
    }

    #[test]
    fn single_file_archive_round_trips_content() {
        let bytes = single_file_archive("error_output.txt", "gcc: fatal error\n").unwrap();
        let mut reader = tar::Archive::new(&bytes[..]);
        let mut entry = reader.entries().unwrap().next().unwrap().unwrap();
        let mut body = String::new();
        entry.read_to_string(&mut body).unwrap();
        assert_eq!(body, "gcc: fatal error\n");
    }

    #[test]
    fn wrapper_dockerfile_pins_base_and_workdir() {
        let dockerfile = wrapper_dockerfile("gcr.io/oss-fuzz-base/base-builder");
        assert!(dockerfile.starts_with("FROM gcr.io/oss-fuzz-base/base-builder\n"));
        assert!(dockerfile.contains("safe.directory /repo"));
        assert!(dockerfile.ends_with("WORKDIR /repo\n"));
    }

    #[test]
    fn runtest_script_judges_failures_with_exit_five() {
        assert!(RUNTEST_SCRIPT.contains("exit 5"));
        assert!(RUNTEST_SCRIPT.contains(SUCCESS_SENTINEL));
    }
}

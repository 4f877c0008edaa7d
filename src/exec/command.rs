//! Program, argument vector and working directory of the session child.
//!
//! Everything here is decided in the parent before forking, so the child
//! only has to make syscalls. Lookups which must happen "inside" the chroot
//! are done by prefixing the chroot path.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Default search path when the session environment has none
pub const DEFAULT_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Program to execute and its argv
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandLine {
    /// Path of the program inside the chroot
    pub file: PathBuf,
    pub argv: Vec<String>,
    /// Interactive login shell rather than a user command
    pub login: bool,
}

impl CommandLine {
    /// Login shell invocation
    ///
    /// argv[0] is `-<basename>` so the shell reads its profile, unless the
    /// environment is preserved or a command prefix wraps the shell.
    pub fn login_shell(shell: &Path, preserve_environment: bool, prefixed: bool) -> Self {
        let arg0 = if preserve_environment || prefixed {
            shell.display().to_string()
        } else {
            let base = shell
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| shell.display().to_string());
            format!("-{}", base)
        };
        Self {
            file: shell.to_path_buf(),
            argv: vec![arg0],
            login: true,
        }
    }

    /// Build the command line for `command`, or a login shell when empty
    ///
    /// `prefix` (the chroot's `command-prefix`) is prepended and its first
    /// element becomes the program. Programs are looked up in `search_path`
    /// below `root`.
    pub fn build(
        command: &[String],
        shell: &Path,
        prefix: &[String],
        preserve_environment: bool,
        search_path: &str,
        root: &Path,
    ) -> Self {
        let mut line = match command.first() {
            None => Self::login_shell(shell, preserve_environment, !prefix.is_empty()),
            Some(program) => Self {
                file: locate(program, search_path, root),
                argv: command.to_vec(),
                login: false,
            },
        };

        if let Some(first) = prefix.first() {
            let mut argv = prefix.to_vec();
            if line.login {
                argv.push(line.file.display().to_string());
                argv.extend(line.argv.drain(1..));
            } else {
                argv.append(&mut line.argv);
            }
            line.file = locate(first, search_path, root);
            line.argv = argv;
        }
        line
    }

    /// Human-readable form for logging
    pub fn describe(&self) -> String {
        self.argv.join(" ")
    }
}

/// Resolve `name` through `search_path`; names containing `/` are used as is
fn locate(name: &str, search_path: &str, root: &Path) -> PathBuf {
    if name.contains('/') {
        return PathBuf::from(name);
    }
    find_program_in_path(name, search_path, root).unwrap_or_else(|| PathBuf::from(name))
}

/// First regular executable file called `name` in `search_path`
///
/// Directories are looked up below `root`; the returned path is relative to
/// `root` (i.e. the path as seen inside the chroot).
pub fn find_program_in_path(name: &str, search_path: &str, root: &Path) -> Option<PathBuf> {
    search_path
        .split(':')
        .filter(|dir| !dir.is_empty())
        .map(|dir| Path::new(dir).join(name))
        .find(|candidate| {
            let outside = root.join(candidate.strip_prefix("/").unwrap_or(candidate));
            fs::metadata(&outside)
                .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
                .unwrap_or(false)
        })
}

/// Candidate working directories, in order of preference
///
/// An explicit `--directory` is the only candidate. Otherwise a login shell
/// tries `$HOME`, the passwd home and `/`, and a command uses the caller's
/// working directory.
pub fn working_directories(
    requested: Option<&Path>,
    login: bool,
    env_home: Option<&str>,
    passwd_home: &Path,
    cwd: &Path,
) -> Vec<PathBuf> {
    if let Some(dir) = requested {
        return vec![dir.to_path_buf()];
    }
    if !login {
        return vec![cwd.to_path_buf()];
    }
    let mut dirs = Vec::new();
    if let Some(home) = env_home.filter(|h| !h.is_empty()) {
        dirs.push(PathBuf::from(home));
    }
    if !dirs.iter().any(|d| d == passwd_home) {
        dirs.push(passwd_home.to_path_buf());
    }
    dirs.push(PathBuf::from("/"));
    dirs
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn executable(root: &Path, path: &str) {
        let full = root.join(path.trim_start_matches('/'));
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(&full, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&full, fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn login_shell_argv0() {
        let shell = Path::new("/bin/bash");
        assert_eq!(CommandLine::login_shell(shell, false, false).argv, ["-bash"]);
        assert_eq!(CommandLine::login_shell(shell, true, false).argv, ["/bin/bash"]);
        assert_eq!(CommandLine::login_shell(shell, false, true).argv, ["/bin/bash"]);
    }

    #[test]
    fn path_search_inside_root() {
        let root = TempDir::new().unwrap();
        executable(root.path(), "/usr/bin/make");
        // Not executable, so skipped
        fs::create_dir_all(root.path().join("bin")).unwrap();
        fs::write(root.path().join("bin/make"), "").unwrap();

        assert_eq!(
            find_program_in_path("make", "/bin:/usr/bin", root.path()),
            Some(PathBuf::from("/usr/bin/make"))
        );
        assert_eq!(find_program_in_path("cc", "/bin:/usr/bin", root.path()), None);
    }

    #[test]
    fn command_with_prefix() {
        let root = TempDir::new().unwrap();
        executable(root.path(), "/usr/bin/eatmydata");
        executable(root.path(), "/usr/bin/make");

        let command = vec!["make".to_string(), "-j4".to_string()];
        let prefix = vec!["eatmydata".to_string()];
        let line = CommandLine::build(
            &command,
            Path::new("/bin/sh"),
            &prefix,
            false,
            "/usr/bin",
            root.path(),
        );
        assert_eq!(line.file, PathBuf::from("/usr/bin/eatmydata"));
        assert_eq!(line.argv, ["eatmydata", "make", "-j4"]);
        assert!(!line.login);

        let shell = CommandLine::build(&[], Path::new("/bin/sh"), &prefix, false, "/usr/bin", root.path());
        assert_eq!(shell.argv, ["eatmydata", "/bin/sh"]);
        assert!(shell.login);
    }

    #[test]
    fn slash_names_are_verbatim() {
        let line = CommandLine::build(
            &["./configure".to_string()],
            Path::new("/bin/sh"),
            &[],
            false,
            DEFAULT_PATH,
            Path::new("/nonexistent"),
        );
        assert_eq!(line.file, PathBuf::from("./configure"));
    }

    #[test]
    fn directory_candidates() {
        let home = Path::new("/home/alice");
        let cwd = Path::new("/srv/build");
        assert_eq!(
            working_directories(None, true, Some("/home/alice"), home, cwd),
            [PathBuf::from("/home/alice"), PathBuf::from("/")]
        );
        assert_eq!(
            working_directories(None, true, Some("/tmp/h"), home, cwd),
            [
                PathBuf::from("/tmp/h"),
                PathBuf::from("/home/alice"),
                PathBuf::from("/")
            ]
        );
        assert_eq!(
            working_directories(None, false, None, home, cwd),
            [PathBuf::from("/srv/build")]
        );
        assert_eq!(
            working_directories(Some(Path::new("/opt")), true, None, home, cwd),
            [PathBuf::from("/opt")]
        );
    }
}

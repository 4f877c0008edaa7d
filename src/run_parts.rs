//! Ordered execution of a directory of scripts.
//!
//! Names are filtered the way Debian's `run-parts` filters them, so editor
//! backups and package manager leftovers are never executed. Each program
//! runs in its own forked child with a clean umask, working directory and
//! descriptor table.

use crate::config::types::{RunPartsError, RunPartsResult};
use crate::kernel::credentials::reset_to_root;
use crate::utils::environment::Environment;
use crate::utils::fd_closure::close_inherited_fds;
use nix::errno::Errno;
use nix::sys::stat::{umask, Mode};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{chdir, execve, fork, ForkResult};
use regex::Regex;
use std::ffi::CString;
use std::fs;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

struct NamePatterns {
    lanana: Regex,
    lsb: Regex,
    cron: Regex,
    any: Regex,
    dpkg: Regex,
}

fn patterns() -> &'static NamePatterns {
    static PATTERNS: OnceLock<NamePatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| NamePatterns {
        lanana: Regex::new(r"^[a-z0-9]+$").expect("static pattern is valid"),
        lsb: Regex::new(r"^_?([a-z0-9_.]+-)+[a-z0-9]+$").expect("static pattern is valid"),
        cron: Regex::new(r"^[a-z0-9][a-z0-9-]*$").expect("static pattern is valid"),
        any: Regex::new(r"^[a-zA-Z0-9_-]+$").expect("static pattern is valid"),
        dpkg: Regex::new(r"dpkg-(old|dist|new|tmp)$").expect("static pattern is valid"),
    })
}

/// Whether `name` is an acceptable script or configuration file name
///
/// In LSB mode the LANANA, LSB and Debian cron namespaces are accepted;
/// otherwise any name made of letters, digits, `_` and `-`.
pub fn is_valid_name(name: &str, lsb_mode: bool) -> bool {
    let p = patterns();
    if p.dpkg.is_match(name) {
        return false;
    }
    if lsb_mode {
        p.lanana.is_match(name) || p.lsb.is_match(name) || p.cron.is_match(name)
    } else {
        p.any.is_match(name)
    }
}

/// A script directory and how to run it
#[derive(Clone, Debug)]
pub struct RunParts {
    directory: PathBuf,
    lsb_mode: bool,
    abort_on_error: bool,
    umask: Mode,
    verbose: bool,
    reverse: bool,
    reset_root: bool,
}

impl RunParts {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            lsb_mode: true,
            abort_on_error: true,
            umask: Mode::from_bits_truncate(0o022),
            verbose: false,
            reverse: false,
            reset_root: false,
        }
    }

    pub fn lsb_mode(mut self, lsb_mode: bool) -> Self {
        self.lsb_mode = lsb_mode;
        self
    }

    /// Stop at the first script which fails
    pub fn abort_on_error(mut self, abort: bool) -> Self {
        self.abort_on_error = abort;
        self
    }

    pub fn umask(mut self, mask: Mode) -> Self {
        self.umask = mask;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Run in reverse order, for teardown
    pub fn reverse(mut self, reverse: bool) -> Self {
        self.reverse = reverse;
        self
    }

    /// Reset each child to uid/gid 0 before exec (when running as root)
    pub fn reset_root(mut self, reset: bool) -> Self {
        self.reset_root = reset;
        self
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Executable programs in run order
    ///
    /// A directory which does not exist holds no programs.
    pub fn programs(&self) -> RunPartsResult<Vec<PathBuf>> {
        let entries = match fs::read_dir(&self.directory) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("{}: script directory does not exist", self.directory.display());
                return Ok(Vec::new());
            }
            Err(source) => {
                return Err(RunPartsError::DirOpen {
                    path: self.directory.clone(),
                    source,
                })
            }
        };

        let mut programs = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| RunPartsError::DirOpen {
                path: self.directory.clone(),
                source,
            })?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if !is_valid_name(name, self.lsb_mode) {
                log::debug!("{}: skipping invalid name", name);
                continue;
            }
            // Follows symlinks
            let path = entry.path();
            let executable = fs::metadata(&path)
                .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
                .unwrap_or(false);
            if executable {
                programs.push(path);
            }
        }

        programs.sort();
        if self.reverse {
            programs.reverse();
        }
        Ok(programs)
    }

    /// Run every program with `args` and `env`
    ///
    /// Returns 0 when every program succeeded, otherwise the exit status of
    /// the failing program (the last one to fail when not aborting).
    pub fn run(&self, args: &[String], env: &Environment) -> RunPartsResult<i32> {
        let mut result = 0;
        for program in self.programs()? {
            if self.verbose {
                log::info!("Executing '{}'", program.display());
            }
            let status = self.run_child(&program, args, env)?;
            if status != 0 {
                log::warn!("{}: script exited with status {}", program.display(), status);
                result = status;
                if self.abort_on_error {
                    break;
                }
            } else if self.verbose {
                log::info!("{}: succeeded", program.display());
            }
        }
        Ok(result)
    }

    fn run_child(&self, program: &Path, args: &[String], env: &Environment) -> RunPartsResult<i32> {
        // Everything execve needs is built before forking
        let invalid = |_| RunPartsError::Fork {
            path: program.to_path_buf(),
            source: Errno::EINVAL,
        };
        let path = CString::new(program.as_os_str().as_bytes()).map_err(invalid)?;
        let mut argv = vec![path.clone()];
        for arg in args {
            argv.push(CString::new(arg.as_str()).map_err(invalid)?);
        }
        let envp = env.to_envp().map_err(|_| RunPartsError::Fork {
            path: program.to_path_buf(),
            source: Errno::EINVAL,
        })?;

        // SAFETY: the child only makes syscalls before execve or _exit.
        match unsafe { fork() } {
            Ok(ForkResult::Child) => {
                umask(self.umask);
                if self.reset_root && reset_to_root().is_err() {
                    // SAFETY: _exit skips destructors inherited from the parent.
                    unsafe { libc::_exit(1) };
                }
                if chdir("/").is_err() {
                    // SAFETY: as above.
                    unsafe { libc::_exit(1) };
                }
                close_inherited_fds();
                let _ = execve(&path, &argv, &envp);
                // SAFETY: exec failed; leave without running parent state.
                unsafe { libc::_exit(127) }
            }
            Ok(ForkResult::Parent { child }) => loop {
                match waitpid(child, None) {
                    Ok(WaitStatus::Exited(_, status)) => return Ok(status),
                    Ok(WaitStatus::Signaled(_, signal, _)) => {
                        return Err(RunPartsError::Signal {
                            path: program.to_path_buf(),
                            signal: signal.as_str().to_string(),
                        })
                    }
                    Ok(_) => continue,
                    Err(Errno::EINTR) => continue,
                    Err(source) => {
                        return Err(RunPartsError::Wait {
                            path: program.to_path_buf(),
                            source,
                        })
                    }
                }
            },
            Err(source) => Err(RunPartsError::Fork {
                path: program.to_path_buf(),
                source,
            }),
        }
    }
}

//! Pre-exec ordering for the session child.
//!
//! The child MUST take these steps in this order:
//! 1. setgid + initgroups (needs root)
//! 2. personality
//! 3. unshare namespaces (needs root)
//! 4. chdir to the chroot, then chroot(2)
//! 5. setuid, verifying root cannot be regained
//! 6. chdir to the working directory inside the chroot
//! 7. exec
//!
//! Each step consumes the previous state, so a misordered chain does not
//! compile. Only `ChildSetup<ExecReady>` can exec:
//!
//! ```compile_fail
//! use rschroot::exec::command::CommandLine;
//! use rschroot::exec::preexec::ChildSetup;
//! let command = CommandLine::login_shell(std::path::Path::new("/bin/sh"), false, false);
//! // Still privileged and outside the chroot
//! let _ = ChildSetup::new().exec(&command, &[]);
//! ```
//!
//! Privileges cannot be dropped before entering the chroot:
//!
//! ```compile_fail
//! use rschroot::exec::preexec::ChildSetup;
//! let _ = ChildSetup::new().set_groups("alice", 1000).unwrap().drop_privileges(1000);
//! ```
//!
//! The full chain:
//!
//! ```no_run
//! use rschroot::config::types::SessionError;
//! use rschroot::exec::command::CommandLine;
//! use rschroot::exec::preexec::ChildSetup;
//! use rschroot::kernel::{namespace::UnshareSet, personality::Personality};
//! use std::path::{Path, PathBuf};
//!
//! fn child() -> Result<(), SessionError> {
//!     let ready = ChildSetup::new()
//!         .set_groups("alice", 1000)?
//!         .set_personality(&Personality::default())?
//!         .unshare(&UnshareSet::default())?
//!         .enter_root(Path::new("/srv/chroot/sid"))?
//!         .drop_privileges(1000)?
//!         .change_directory(&[PathBuf::from("/home/alice")])?;
//!     let command = CommandLine::login_shell(Path::new("/bin/sh"), false, false);
//!     Err(ready.exec(&command, &[]))
//! }
//! ```

use crate::config::types::{SessionError, SessionResult};
use crate::exec::command::CommandLine;
use crate::kernel::credentials::{set_groups, set_user};
use crate::kernel::namespace::UnshareSet;
use crate::kernel::personality::Personality;
use crate::utils::fd_closure::close_inherited_fds;
use nix::unistd::{chdir, chroot, execve};
use std::ffi::CString;
use std::marker::PhantomData;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

/// Type-state marker: nothing changed yet
pub struct Fresh;

/// Type-state marker: primary and supplementary groups set
pub struct GroupsSet;

/// Type-state marker: execution domain set
pub struct PersonaSet;

/// Type-state marker: requested namespaces unshared
pub struct Unshared;

/// Type-state marker: inside the chroot
pub struct RootEntered;

/// Type-state marker: running as the target user
pub struct PrivsDropped;

/// Type-state marker: in the working directory, ready for exec
pub struct ExecReady;

/// Session child being prepared for exec
pub struct ChildSetup<S> {
    _state: PhantomData<S>,
}

impl<S> ChildSetup<S> {
    fn next<T>(self) -> ChildSetup<T> {
        ChildSetup {
            _state: PhantomData,
        }
    }
}

impl ChildSetup<Fresh> {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            _state: PhantomData,
        }
    }

    /// setgid, then initgroups for `user`
    pub fn set_groups(self, user: &str, gid: u32) -> SessionResult<ChildSetup<GroupsSet>> {
        set_groups(user, gid)?;
        Ok(self.next())
    }
}

impl ChildSetup<GroupsSet> {
    /// Set the execution domain; undefined leaves it alone
    pub fn set_personality(self, personality: &Personality) -> SessionResult<ChildSetup<PersonaSet>> {
        if !personality.is_undefined() {
            personality.set()?;
        }
        Ok(self.next())
    }
}

impl ChildSetup<PersonaSet> {
    pub fn unshare(self, unshare: &UnshareSet) -> SessionResult<ChildSetup<Unshared>> {
        if !unshare.is_empty() {
            unshare.apply()?;
        }
        Ok(self.next())
    }
}

impl ChildSetup<Unshared> {
    /// chdir into `path`, then make it the root directory
    pub fn enter_root(self, path: &Path) -> SessionResult<ChildSetup<RootEntered>> {
        chdir(path).map_err(|source| SessionError::Chdir {
            path: path.to_path_buf(),
            source,
        })?;
        chroot(path).map_err(|source| SessionError::ChrootEnter {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(self.next())
    }
}

impl ChildSetup<RootEntered> {
    /// setuid to the target user; regaining root afterwards is an error
    pub fn drop_privileges(self, uid: u32) -> SessionResult<ChildSetup<PrivsDropped>> {
        set_user(uid)?;
        Ok(self.next())
    }
}

impl ChildSetup<PrivsDropped> {
    /// chdir to the first usable candidate
    ///
    /// Falling back to a later candidate is reported; when none works the
    /// error for the last one is returned.
    pub fn change_directory(self, candidates: &[PathBuf]) -> SessionResult<ChildSetup<ExecReady>> {
        let mut last = None;
        for dir in candidates {
            match chdir(dir.as_path()) {
                Ok(()) => {
                    if last.is_some() {
                        eprintln!("rschroot: falling back to directory '{}'", dir.display());
                    }
                    return Ok(self.next());
                }
                Err(source) => {
                    eprintln!("rschroot: {}: failed to change to directory: {}", dir.display(), source);
                    last = Some(SessionError::Chdir {
                        path: dir.clone(),
                        source,
                    });
                }
            }
        }
        match last {
            Some(err) => Err(err),
            None => Ok(self.next()),
        }
    }
}

impl ChildSetup<ExecReady> {
    /// Replace the process with `command`
    ///
    /// Only returns on failure.
    pub fn exec(self, command: &CommandLine, envp: &[CString]) -> SessionError {
        let exec_error = |source| SessionError::Exec {
            file: command.file.display().to_string(),
            source,
        };

        let file = match CString::new(command.file.as_os_str().as_bytes()) {
            Ok(file) => file,
            Err(_) => return exec_error(nix::errno::Errno::EINVAL),
        };
        let argv: Result<Vec<CString>, _> = command
            .argv
            .iter()
            .map(|arg| CString::new(arg.as_str()))
            .collect();
        let argv = match argv {
            Ok(argv) => argv,
            Err(_) => return exec_error(nix::errno::Errno::EINVAL),
        };

        close_inherited_fds();
        match execve(&file, &argv, envp) {
            Ok(never) => match never {},
            Err(source) => exec_error(source),
        }
    }
}

//! The forked session child.

use crate::auth::Auth;
use crate::chroot::Chroot;
use crate::config::types::{SessionError, SessionResult};
use crate::exec::command::{working_directories, CommandLine, DEFAULT_PATH};
use crate::exec::preexec::{ChildSetup, ExecReady};
use crate::kernel::namespace::UnshareSet;
use crate::kernel::personality::Personality;
use crate::utils::environment::Environment;
use nix::unistd::{fork, ForkResult, Pid};
use std::ffi::CString;
use std::path::{Path, PathBuf};

/// Environment of the user command
///
/// The authentication environment, overlaid with the caller's environment
/// (minus anything matching the chroot's filter) when it is preserved.
pub fn session_environment(auth: &Auth, chroot: &Chroot, preserve: bool) -> Environment {
    let mut env = auth.auth_environment().clone();
    if preserve {
        let mut caller = auth.environment().clone();
        caller.filter(chroot.environment_filter());
        env.merge(&caller);
    }
    env
}

/// Everything the child needs, computed before forking
pub(super) struct ChildPlan {
    user: String,
    uid: u32,
    gid: u32,
    personality: Personality,
    unshare: UnshareSet,
    root: PathBuf,
    directories: Vec<PathBuf>,
    command: CommandLine,
    envp: Vec<CString>,
}

impl ChildPlan {
    pub(super) fn new(
        auth: &Auth,
        chroot: &Chroot,
        preserve: bool,
        directory: Option<&Path>,
        cwd: &Path,
    ) -> SessionResult<Self> {
        let root = chroot
            .path()
            .ok_or_else(|| SessionError::ChrootPath(chroot.name().to_string()))?;
        let user = auth.user();
        let env = session_environment(auth, chroot, preserve);

        let command = CommandLine::build(
            auth.command(),
            &user.shell,
            chroot.command_prefix(),
            preserve,
            env.get("PATH").unwrap_or(DEFAULT_PATH),
            &root,
        );
        let directories =
            working_directories(directory, command.login, env.get("HOME"), &user.home, cwd);

        if command.login {
            log::info!(
                "[{}] Running login shell: {}",
                chroot.name(),
                command.describe()
            );
        } else {
            log::info!("[{}] Running command: \"{}\"", chroot.name(), command.describe());
        }

        Ok(Self {
            user: user.name.clone(),
            uid: user.uid,
            gid: user.gid,
            personality: chroot.personality(),
            unshare: chroot.unshare(),
            root,
            directories,
            command,
            envp: env.to_envp()?,
        })
    }

    fn prepare(&self) -> SessionResult<ChildSetup<ExecReady>> {
        ChildSetup::new()
            .set_groups(&self.user, self.gid)?
            .set_personality(&self.personality)?
            .unshare(&self.unshare)?
            .enter_root(&self.root)?
            .drop_privileges(self.uid)?
            .change_directory(&self.directories)
    }

    /// Fork; the child never returns
    pub(super) fn spawn(&self) -> SessionResult<Pid> {
        // SAFETY: the child only makes syscalls and exits via _exit or exec.
        match unsafe { fork() } {
            Ok(ForkResult::Parent { child }) => Ok(child),
            Ok(ForkResult::Child) => {
                let err = match self.prepare() {
                    Ok(ready) => ready.exec(&self.command, &self.envp),
                    Err(err) => err,
                };
                eprintln!("rschroot: {}", err);
                // SAFETY: leave without running the parent's destructors.
                unsafe { libc::_exit(1) }
            }
            Err(e) => Err(SessionError::ChildFork(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Identity, NullAuth};
    use crate::chroot::kind::{ChrootKind, Directory};

    fn auth() -> Auth {
        let alice = Identity {
            name: "alice".into(),
            uid: 1000,
            gid: 1000,
            home: PathBuf::from("/home/alice"),
            shell: PathBuf::from("/bin/sh"),
        };
        let mut auth = Auth::with_identities(alice.clone(), alice, Box::new(NullAuth::new()));
        let mut caller = Environment::new();
        caller.set("TERM", "vt100");
        caller.set("EDITOR", "vi");
        caller.set("LD_PRELOAD", "/tmp/evil.so");
        auth.set_environment(caller);
        auth.start().unwrap();
        auth.authenticate(crate::auth::AuthStatus::None).unwrap();
        auth.setupenv().unwrap();
        auth
    }

    #[test]
    fn environment_preservation_is_filtered() {
        let auth = auth();
        let chroot =
            Chroot::new("sid", ChrootKind::Directory(Directory::new("/srv/sid"))).unwrap();

        let clean = session_environment(&auth, &chroot, false);
        assert_eq!(clean.get("USER"), Some("alice"));
        assert_eq!(clean.get("TERM"), Some("vt100"));
        assert!(!clean.contains("EDITOR"));

        let preserved = session_environment(&auth, &chroot, true);
        assert_eq!(preserved.get("EDITOR"), Some("vi"));
        assert!(!preserved.contains("LD_PRELOAD"));
    }

    #[test]
    fn plan_requires_chroot_path() {
        let auth = auth();
        let chroot = Chroot::new(
            "sid",
            ChrootKind::Directory(Directory::default()),
        )
        .unwrap();
        assert!(matches!(
            ChildPlan::new(&auth, &chroot, false, None, Path::new("/")),
            Err(SessionError::ChrootPath(_))
        ));
    }
}

//! Session orchestration
//!
//! A [`Session`] authenticates the caller against every requested chroot,
//! then takes each chroot through the setup and exec stages, runs the user
//! command in a forked child and unwinds the stages again. Teardown stages
//! always run; the first error wins.

mod child;

pub use child::session_environment;

use crate::auth::{Auth, AuthStatus};
use crate::chroot::kind::ChrootKind;
use crate::chroot::{validate_name, Chroot};
use crate::config::chroots::{split_qualified, ChrootConfig, Namespace};
use crate::config::paths::Paths;
use crate::config::types::{
    Operation, Result, SessionError, SessionFlags, SessionResult, SetupType, Verbosity,
};
use crate::exec::wait::wait_for_child;
use crate::kernel::signal::{caught_signal, SignalGuard};
use crate::kernel::tty::TerminalState;
use crate::run_parts::RunParts;
use crate::utils::environment::Environment;
use child::ChildPlan;
use std::path::PathBuf;
use uuid::Uuid;

/// PATH given to setup and exec scripts
const SCRIPT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// A session operation over one or more chroots
pub struct Session {
    auth: Auth,
    config: ChrootConfig,
    paths: Paths,
    chroots: Vec<String>,
    operation: Operation,
    session_name: Option<String>,
    chroot_status: bool,
    child_status: i32,
    verbosity: Option<Verbosity>,
    cwd: PathBuf,
    directory: Option<PathBuf>,
    preserve_environment: bool,
    user_options: Vec<(String, String)>,
}

impl Session {
    /// `chroots` are names as given by the user, optionally namespace-qualified
    pub fn new(
        auth: Auth,
        config: ChrootConfig,
        paths: Paths,
        chroots: Vec<String>,
        operation: Operation,
    ) -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        Self {
            auth,
            config,
            paths,
            chroots,
            operation,
            session_name: None,
            chroot_status: true,
            child_status: 0,
            verbosity: None,
            cwd,
            directory: None,
            preserve_environment: false,
            user_options: Vec::new(),
        }
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// Name of a new session; only valid with a single chroot
    pub fn set_session_name(&mut self, name: Option<String>) {
        self.session_name = name;
    }

    /// Override the chroot's message verbosity
    pub fn set_verbosity(&mut self, verbosity: Option<Verbosity>) {
        self.verbosity = verbosity;
    }

    /// Working directory inside the chroot
    pub fn set_directory(&mut self, directory: Option<PathBuf>) {
        self.directory = directory;
    }

    pub fn set_preserve_environment(&mut self, preserve: bool) {
        self.preserve_environment = preserve;
    }

    /// Userdata overrides given with `--option key=value`
    pub fn set_user_options(&mut self, options: Vec<(String, String)>) {
        self.user_options = options;
    }

    /// Exit status of the user command (non-zero after any failure)
    pub fn child_status(&self) -> i32 {
        self.child_status
    }

    pub fn auth(&self) -> &Auth {
        &self.auth
    }

    /// Namespace that unqualified names are looked up in
    fn default_namespace(&self) -> Namespace {
        if self.operation.uses_existing_session() {
            Namespace::Session
        } else {
            Namespace::Chroot
        }
    }

    /// Resolve every requested name to its chroot
    fn resolve(&self) -> SessionResult<Vec<(String, Chroot)>> {
        let default = self.default_namespace();
        self.chroots
            .iter()
            .map(|name| -> SessionResult<(String, Chroot)> {
                let chroot = self
                    .config
                    .find_chroot(default, name)
                    .ok_or_else(|| SessionError::ChrootUnknown(name.clone()))?;
                let alias = split_qualified(name, default)
                    .map(|(_, alias)| alias.to_string())
                    .ok_or_else(|| SessionError::ChrootAlias(name.clone()))?;
                Ok((alias, chroot.clone()))
            })
            .collect()
    }

    /// Authenticate, then run the operation
    ///
    /// Credentials are always deleted and authentication stopped, even when
    /// the operation fails; an operation error takes precedence over errors
    /// from that cleanup.
    pub fn run(&mut self) -> Result<()> {
        let chroots = self.resolve()?;
        let status = self
            .auth
            .auth_status(chroots.iter().map(|(_, chroot)| chroot))?;
        log::debug!("authentication status: {:?}", status);

        self.auth.start()?;
        let result = self.run_authenticated(status, chroots);

        if let Err(e) = self.auth.cred_delete() {
            log::warn!("{}", e);
        }
        let stopped = self.auth.stop();

        result?;
        stopped?;
        Ok(())
    }

    fn run_authenticated(&mut self, status: AuthStatus, chroots: Vec<(String, Chroot)>) -> Result<()> {
        self.auth.authenticate(status)?;
        self.auth.setupenv()?;
        self.auth.account()?;
        self.auth.cred_establish()?;
        self.run_impl(chroots)?;
        Ok(())
    }

    fn run_impl(&mut self, chroots: Vec<(String, Chroot)>) -> SessionResult<()> {
        let _guard = SignalGuard::install()?;

        for (alias, chroot) in chroots {
            let mut session = self.prepare_session(&alias, chroot)?;
            let result = self.run_chroot(&mut session).and_then(|()| signal_status());
            if result.is_err() && self.child_status == 0 {
                self.child_status = 1;
            }
            result?;
        }
        Ok(())
    }

    /// Turn a configured chroot into the session chroot the stages act on
    fn prepare_session(&self, alias: &str, chroot: Chroot) -> SessionResult<Chroot> {
        let create = chroot.session_flags().contains(SessionFlags::CREATE);
        let chroot_error = |source| SessionError::Chroot {
            chroot: alias.to_string(),
            source: Box::new(source),
        };

        let mut session = if create && !chroot.active() {
            let session_id = match &self.session_name {
                Some(name) => {
                    validate_name(name).map_err(chroot_error)?;
                    name.clone()
                }
                None => format!("{}-{}", chroot.name(), Uuid::new_v4()),
            };
            let ruser = self.auth.ruser();
            chroot
                .clone_session(&session_id, alias, &ruser.name, ruser.is_root())
                .map_err(chroot_error)?
        } else {
            chroot
        };
        session.set_active(true);

        let plain = matches!(session.kind(), ChrootKind::Plain(_));
        if session.mount_location().is_none() && !(plain && !session.run_setup_scripts()) {
            let location = self.paths.session_mount_location(session.name());
            session
                .set_mount_location(Some(location))
                .map_err(chroot_error)?;
        }

        let session_id = session.name().to_string();
        if session.rename_snapshot_device(&session_id) {
            log::debug!("[{}] snapshot named after session", session_id);
        }

        let root = self.auth.ruser().is_root();
        for (key, value) in &self.user_options {
            session
                .set_user_option(key, value, root)
                .map_err(chroot_error)?;
        }
        Ok(session)
    }

    /// Take one session chroot through every stage
    fn run_chroot(&mut self, session: &mut Chroot) -> SessionResult<()> {
        let result = self.run_stages(session);
        let stop = self.setup_chroot(session, SetupType::SetupStop);
        session.set_active(false);

        match (result, stop) {
            (Err(e), Err(teardown)) => {
                log::warn!("{}", teardown);
                Err(e)
            }
            (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
            (Ok(()), Ok(())) => Ok(()),
        }
    }

    fn run_stages(&mut self, session: &mut Chroot) -> SessionResult<()> {
        self.setup_chroot(session, SetupType::SetupStart)?;
        if self.operation == Operation::Begin {
            println!("{}", session.name());
        }

        self.setup_chroot(session, SetupType::SetupRecover)?;

        if let Err(e) = self.setup_chroot(session, SetupType::ExecStart) {
            if let Err(stop) = self.setup_chroot(session, SetupType::ExecStop) {
                log::debug!("discarding exec-stop error: {}", stop);
            }
            return Err(e);
        }

        let result = if self.operation.runs_command() {
            self.run_command(session)
        } else {
            Ok(())
        };
        let stop = self.setup_chroot(session, SetupType::ExecStop);

        match (result, stop) {
            (Err(e), Err(teardown)) => {
                log::warn!("{}", teardown);
                Err(e)
            }
            (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
            (Ok(()), Ok(())) => Ok(()),
        }
    }

    /// Fork the user command inside the chroot and wait for it
    fn run_command(&mut self, session: &Chroot) -> SessionResult<()> {
        let preserve = self.preserve_environment || session.preserve_environment();
        let plan = ChildPlan::new(
            &self.auth,
            session,
            preserve,
            self.directory.as_deref(),
            &self.cwd,
        )?;

        self.auth.open_session()?;
        let terminal = if self.auth.command().is_empty() {
            TerminalState::save()
        } else {
            TerminalState::default()
        };

        let result = plan
            .spawn()
            .and_then(|child| wait_for_child(child, false));

        terminal.restore();
        let closed = self.auth.close_session();

        let status = result?;
        closed?;
        self.child_status = status;
        Ok(())
    }

    /// Run one stage's scripts under the chroot lock
    fn setup_chroot(&mut self, session: &mut Chroot, stage: SetupType) -> SessionResult<()> {
        let enabled = if stage.is_setup() {
            session.run_setup_scripts()
        } else {
            session.run_exec_scripts()
        };
        if !self.operation.permits(stage) || !enabled {
            return Ok(());
        }

        if stage == SetupType::SetupStart {
            self.chroot_status = true;
        }
        log::debug!("[{}] {}", session.name(), stage);

        if let Err(source) = session.setup_lock(&self.paths, stage, true, 0) {
            // Non-zero status: no scripts ran, so the descriptor must stay
            if let Err(unlock) = session.setup_lock(&self.paths, stage, false, 1) {
                log::debug!("[{}] unlock after failed lock: {}", session.name(), unlock);
            }
            return Err(SessionError::ChrootLock {
                chroot: session.name().to_string(),
                source: Box::new(source),
            });
        }

        let verbosity = self.verbosity.unwrap_or_else(|| session.message_verbosity());
        let env = self.script_environment(session, verbosity);
        let args = vec![
            stage.as_str().to_string(),
            if self.chroot_status { "ok" } else { "fail" }.to_string(),
        ];

        let status = RunParts::new(self.paths.script_dir(stage.is_setup()))
            .reverse(stage.is_teardown())
            .reset_root(true)
            .verbose(verbosity == Verbosity::Verbose)
            .run(&args, &env);

        let status = match status {
            Ok(status) => status,
            Err(source) => {
                self.chroot_status = false;
                if let Err(unlock) = session.setup_lock(&self.paths, stage, false, 1) {
                    log::warn!("{}", unlock);
                }
                return Err(SessionError::Scripts {
                    chroot: session.name().to_string(),
                    source,
                });
            }
        };
        if status != 0 {
            self.chroot_status = false;
        }

        session
            .setup_lock(&self.paths, stage, false, status)
            .map_err(|source| SessionError::ChrootUnlock {
                chroot: session.name().to_string(),
                source: Box::new(source),
            })?;

        if status != 0 {
            return Err(SessionError::ChrootSetup {
                chroot: session.name().to_string(),
                stage,
            });
        }
        Ok(())
    }

    /// Environment for setup and exec scripts
    fn script_environment(&self, session: &Chroot, verbosity: Verbosity) -> Environment {
        let mut env = Environment::new();
        session.setup_env(&mut env);

        let user = self.auth.user();
        env.set("AUTH_USER", &user.name);
        env.set("AUTH_RUSER", &self.auth.ruser().name);
        env.set("AUTH_UID", user.uid);
        env.set("AUTH_GID", user.gid);
        env.set("AUTH_VERBOSITY", verbosity.as_str());
        env.set("MOUNT_DIR", self.paths.mount_dir.display());
        env.set("LIBEXEC_DIR", self.paths.libexec_dir.display());
        env.set("PID", std::process::id());
        env.set("SESSION_ID", session.name());
        env.set("PATH", SCRIPT_PATH);
        env
    }
}

/// A SIGHUP or SIGTERM caught while the stages ran, as an error
///
/// Signals arriving during the child wait are reported by the wait itself;
/// this catches those delivered while only scripts were running.
fn signal_status() -> SessionResult<()> {
    match caught_signal() {
        Some(signal) => {
            log::warn!("{} received during session", signal);
            Err(SessionError::SignalCatch(signal.as_str().to_string()))
        }
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Identity, NullAuth};
    use crate::chroot::kind::Directory;
    use tempfile::TempDir;

    fn identity() -> Identity {
        Identity {
            name: "alice".into(),
            uid: 1000,
            gid: 1000,
            home: PathBuf::from("/home/alice"),
            shell: PathBuf::from("/bin/sh"),
        }
    }

    fn session(paths: Paths, operation: Operation, names: &[&str]) -> Session {
        let mut chroot =
            Chroot::new("sid", ChrootKind::Directory(Directory::new("/srv/sid"))).unwrap();
        chroot.set_users(vec!["alice".into()]);
        let mut config = ChrootConfig::new();
        config.add(Namespace::Chroot, chroot).unwrap();

        let auth = Auth::with_identities(identity(), identity(), Box::new(NullAuth::new()));
        Session::new(
            auth,
            config,
            paths,
            names.iter().map(|n| n.to_string()).collect(),
            operation,
        )
    }

    #[test]
    fn unknown_chroot_is_rejected_before_authentication() {
        let root = TempDir::new().unwrap();
        let mut session = session(Paths::with_root(root.path()), Operation::Begin, &["etch"]);
        let err = session.run().unwrap_err();
        assert!(matches!(
            err,
            crate::config::types::Error::Session(SessionError::ChrootUnknown(ref n)) if n == "etch"
        ));
    }

    #[test]
    fn existing_session_operations_use_session_namespace() {
        let root = TempDir::new().unwrap();
        let paths = Paths::with_root(root.path());
        assert_eq!(
            session(paths.clone(), Operation::End, &[]).default_namespace(),
            Namespace::Session
        );
        assert_eq!(
            session(paths, Operation::Automatic, &[]).default_namespace(),
            Namespace::Chroot
        );
    }

    #[test]
    fn new_session_is_cloned_and_placed() {
        let root = TempDir::new().unwrap();
        let paths = Paths::with_root(root.path());
        let mut session = session(paths.clone(), Operation::Begin, &["sid"]);
        session.set_session_name(Some("build-1".into()));

        let resolved = session.resolve().unwrap();
        let (alias, chroot) = resolved.into_iter().next().unwrap();
        assert_eq!(alias, "sid");

        let prepared = session.prepare_session(&alias, chroot).unwrap();
        assert_eq!(prepared.name(), "build-1");
        assert!(prepared.active());
        assert_eq!(
            prepared.mount_location(),
            Some(paths.session_mount_location("build-1").as_path())
        );
    }

    #[test]
    fn script_environment_describes_session() {
        let root = TempDir::new().unwrap();
        let paths = Paths::with_root(root.path());
        let session = session(paths.clone(), Operation::Begin, &["sid"]);
        let chroot = session.config.find_chroot(Namespace::Chroot, "sid").unwrap();

        let env = session.script_environment(chroot, Verbosity::Quiet);
        assert_eq!(env.get("AUTH_USER"), Some("alice"));
        assert_eq!(env.get("AUTH_UID"), Some("1000"));
        assert_eq!(env.get("AUTH_VERBOSITY"), Some("quiet"));
        assert_eq!(env.get("SESSION_ID"), Some("sid"));
        assert_eq!(env.get("CHROOT_TYPE"), Some("directory"));
        assert_eq!(
            env.get("MOUNT_DIR").map(PathBuf::from),
            Some(paths.mount_dir.clone())
        );
    }
}

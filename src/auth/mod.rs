//! Authentication and authorisation of the requesting user.
//!
//! [`Auth`] records who is asking (the requesting user, `ruser`) and who
//! they want to become (the target `user`), decides how much authentication
//! each chroot demands, and drives an [`AuthBackend`] through its
//! start/authenticate/session sequence. Calls made out of order are
//! rejected with [`AuthError::OutOfOrder`].

mod null;

pub use null::NullAuth;

use crate::chroot::Chroot;
use crate::config::types::{AuthError, AuthResult, Verbosity};
use crate::kernel::credentials::is_group_member;
use crate::utils::environment::Environment;
use nix::unistd::{getuid, Uid, User};
use std::fmt;
use std::path::PathBuf;

/// How much authentication a request needs
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum AuthStatus {
    /// Permitted without authentication
    None,
    /// Permitted after authenticating as the requesting user
    User,
    /// Not permitted
    Fail,
}

impl AuthStatus {
    /// Combine statuses; the most restrictive wins
    pub fn change_auth(self, new: AuthStatus) -> AuthStatus {
        self.max(new)
    }
}

/// A passwd entry
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub home: PathBuf,
    pub shell: PathBuf,
}

impl Identity {
    pub fn from_name(name: &str) -> AuthResult<Self> {
        User::from_name(name)
            .map_err(AuthError::Lookup)?
            .map(Self::from)
            .ok_or_else(|| AuthError::UserUnknown(name.to_string()))
    }

    pub fn from_uid(uid: u32) -> AuthResult<Self> {
        User::from_uid(Uid::from_raw(uid))
            .map_err(AuthError::Lookup)?
            .map(Self::from)
            .ok_or(AuthError::UidUnknown(uid))
    }

    pub fn is_root(&self) -> bool {
        self.uid == 0
    }
}

impl From<User> for Identity {
    fn from(user: User) -> Self {
        Self {
            name: user.name,
            uid: user.uid.as_raw(),
            gid: user.gid.as_raw(),
            home: user.dir,
            shell: user.shell,
        }
    }
}

/// Authentication mechanism (PAM or a stand-in)
///
/// Every step may fail; `Auth` guarantees the calls arrive in order.
pub trait AuthBackend: fmt::Debug {
    fn name(&self) -> &'static str;

    fn start(&mut self, _user: &Identity, _ruser: &Identity) -> AuthResult<()> {
        Ok(())
    }

    fn stop(&mut self) -> AuthResult<()> {
        Ok(())
    }

    /// Authenticate the requesting user to the level `status` demands
    fn authenticate(
        &mut self,
        status: AuthStatus,
        user: &Identity,
        ruser: &Identity,
    ) -> AuthResult<()>;

    /// Environment for the session, built from the target user
    fn setupenv(&mut self, user: &Identity, caller: &Environment) -> AuthResult<Environment>;

    fn account(&mut self) -> AuthResult<()> {
        Ok(())
    }

    fn cred_establish(&mut self) -> AuthResult<()> {
        Ok(())
    }

    fn cred_delete(&mut self) -> AuthResult<()> {
        Ok(())
    }

    fn open_session(&mut self) -> AuthResult<()> {
        Ok(())
    }

    fn close_session(&mut self) -> AuthResult<()> {
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum AuthState {
    Stopped,
    Started,
    Authenticated,
    Established,
    SessionOpen,
}

impl AuthState {
    fn name(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Started => "started",
            Self::Authenticated => "authenticated",
            Self::Established => "credentials established",
            Self::SessionOpen => "session open",
        }
    }
}

/// Requesting and target identities plus the backend session state
#[derive(Debug)]
pub struct Auth {
    user: Identity,
    ruser: Identity,
    command: Vec<String>,
    environment: Environment,
    auth_environment: Environment,
    verbosity: Verbosity,
    state: AuthState,
    backend: Box<dyn AuthBackend>,
}

impl Auth {
    /// Requesting user from the real uid; the target defaults to the same user
    pub fn new(backend: Box<dyn AuthBackend>) -> AuthResult<Self> {
        let ruser = Identity::from_uid(getuid().as_raw())?;
        Ok(Self::with_identities(ruser.clone(), ruser, backend))
    }

    pub fn with_identities(ruser: Identity, user: Identity, backend: Box<dyn AuthBackend>) -> Self {
        Self {
            user,
            ruser,
            command: Vec::new(),
            environment: Environment::new(),
            auth_environment: Environment::new(),
            verbosity: Verbosity::Normal,
            state: AuthState::Stopped,
            backend,
        }
    }

    pub fn user(&self) -> &Identity {
        &self.user
    }

    /// Switch the target user by name
    pub fn set_user(&mut self, name: &str) -> AuthResult<()> {
        self.user = Identity::from_name(name)?;
        Ok(())
    }

    pub fn ruser(&self) -> &Identity {
        &self.ruser
    }

    pub fn command(&self) -> &[String] {
        &self.command
    }

    pub fn set_command(&mut self, command: Vec<String>) {
        self.command = command;
    }

    /// Caller's environment
    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    pub fn set_environment(&mut self, environment: Environment) {
        self.environment = environment;
    }

    /// Environment produced by the backend for the target user
    pub fn auth_environment(&self) -> &Environment {
        &self.auth_environment
    }

    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    pub fn set_verbosity(&mut self, verbosity: Verbosity) {
        self.verbosity = verbosity;
    }

    /// Authentication needed to enter `chroot` as the target user
    pub fn chroot_auth_status(&self, status: AuthStatus, chroot: &Chroot) -> AuthResult<AuthStatus> {
        let listed = |list: &[String]| list.iter().any(|u| *u == self.ruser.name);
        let member_of_any = |groups: &[String]| -> AuthResult<bool> {
            for group in groups {
                if is_group_member(group)? {
                    return Ok(true);
                }
            }
            Ok(false)
        };

        let in_users = listed(chroot.users());
        let in_groups = member_of_any(chroot.groups())?;
        let in_root_users = listed(chroot.root_users());
        let in_root_groups = member_of_any(chroot.root_groups())?;

        let any = in_users || in_groups || in_root_users || in_root_groups;
        let needed = if self.ruser.uid == self.user.uid && any {
            AuthStatus::None
        } else if (in_root_users || in_root_groups) && self.user.is_root() {
            AuthStatus::None
        } else if in_users || in_groups {
            AuthStatus::User
        } else if self.ruser.is_root() {
            AuthStatus::User
        } else {
            AuthStatus::Fail
        };

        log::debug!(
            "{}: authentication for {} as {}: {:?}",
            chroot.name(),
            self.ruser.name,
            self.user.name,
            needed
        );
        Ok(status.change_auth(needed))
    }

    /// Combined status over every chroot
    pub fn auth_status<'a, I>(&self, chroots: I) -> AuthResult<AuthStatus>
    where
        I: IntoIterator<Item = &'a Chroot>,
    {
        let mut status = AuthStatus::None;
        for chroot in chroots {
            status = self.chroot_auth_status(status, chroot)?;
        }
        Ok(status)
    }

    fn expect_state(&self, operation: &'static str, states: &[AuthState]) -> AuthResult<()> {
        if states.contains(&self.state) {
            Ok(())
        } else {
            Err(AuthError::OutOfOrder {
                operation,
                state: self.state.name(),
            })
        }
    }

    pub fn start(&mut self) -> AuthResult<()> {
        self.expect_state("start", &[AuthState::Stopped])?;
        self.backend.start(&self.user, &self.ruser)?;
        self.state = AuthState::Started;
        Ok(())
    }

    pub fn stop(&mut self) -> AuthResult<()> {
        if self.state == AuthState::Stopped {
            return Err(AuthError::OutOfOrder {
                operation: "stop",
                state: self.state.name(),
            });
        }
        self.state = AuthState::Stopped;
        self.backend.stop()
    }

    pub fn authenticate(&mut self, status: AuthStatus) -> AuthResult<()> {
        self.expect_state("authenticate", &[AuthState::Started])?;
        if status == AuthStatus::Fail {
            return Err(AuthError::AccessDenied {
                ruser: self.ruser.name.clone(),
                user: self.user.name.clone(),
            });
        }
        self.backend.authenticate(status, &self.user, &self.ruser)?;
        self.state = AuthState::Authenticated;
        Ok(())
    }

    pub fn setupenv(&mut self) -> AuthResult<()> {
        self.expect_state("setupenv", &[AuthState::Authenticated])?;
        self.auth_environment = self.backend.setupenv(&self.user, &self.environment)?;
        Ok(())
    }

    pub fn account(&mut self) -> AuthResult<()> {
        self.expect_state("account", &[AuthState::Authenticated])?;
        self.backend.account()
    }

    pub fn cred_establish(&mut self) -> AuthResult<()> {
        self.expect_state("cred_establish", &[AuthState::Authenticated])?;
        self.backend.cred_establish()?;
        self.state = AuthState::Established;
        Ok(())
    }

    pub fn cred_delete(&mut self) -> AuthResult<()> {
        self.expect_state("cred_delete", &[AuthState::Established])?;
        self.backend.cred_delete()?;
        self.state = AuthState::Authenticated;
        Ok(())
    }

    pub fn open_session(&mut self) -> AuthResult<()> {
        self.expect_state("open_session", &[AuthState::Established])?;
        self.backend.open_session()?;
        self.state = AuthState::SessionOpen;
        Ok(())
    }

    pub fn close_session(&mut self) -> AuthResult<()> {
        self.expect_state("close_session", &[AuthState::SessionOpen])?;
        self.backend.close_session()?;
        self.state = AuthState::Established;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chroot::kind::{ChrootKind, Directory};

    fn identity(name: &str, uid: u32) -> Identity {
        Identity {
            name: name.to_string(),
            uid,
            gid: uid,
            home: PathBuf::from(format!("/home/{}", name)),
            shell: PathBuf::from("/bin/sh"),
        }
    }

    fn auth(ruser: Identity, user: Identity) -> Auth {
        Auth::with_identities(ruser, user, Box::new(NullAuth::new()))
    }

    fn chroot(users: &[&str], root_users: &[&str]) -> Chroot {
        let mut chroot =
            Chroot::new("sid", ChrootKind::Directory(Directory::new("/srv/sid"))).unwrap();
        chroot.set_users(users.iter().map(|s| s.to_string()).collect());
        chroot.set_root_users(root_users.iter().map(|s| s.to_string()).collect());
        chroot
    }

    #[test]
    fn status_combines_to_most_restrictive() {
        assert_eq!(AuthStatus::None.change_auth(AuthStatus::User), AuthStatus::User);
        assert_eq!(AuthStatus::Fail.change_auth(AuthStatus::None), AuthStatus::Fail);
        assert_eq!(AuthStatus::User.change_auth(AuthStatus::None), AuthStatus::User);
    }

    #[test]
    fn chroot_access_rules() {
        let alice = identity("alice", 1000);
        let root = identity("root", 0);

        // Listed user entering as themselves
        let a = auth(alice.clone(), alice.clone());
        let status = a.chroot_auth_status(AuthStatus::None, &chroot(&["alice"], &[])).unwrap();
        assert_eq!(status, AuthStatus::None);

        // Unlisted user is refused
        let status = a.chroot_auth_status(AuthStatus::None, &chroot(&["bob"], &[])).unwrap();
        assert_eq!(status, AuthStatus::Fail);

        // Root user list grants password-less root
        let a = auth(alice.clone(), root.clone());
        let status = a.chroot_auth_status(AuthStatus::None, &chroot(&[], &["alice"])).unwrap();
        assert_eq!(status, AuthStatus::None);

        // Switching user needs authentication
        let a = auth(alice.clone(), identity("bob", 1001));
        let status = a.chroot_auth_status(AuthStatus::None, &chroot(&["alice"], &[])).unwrap();
        assert_eq!(status, AuthStatus::User);

        // Root may enter anything, after authenticating
        let r = auth(root.clone(), alice);
        let status = r.chroot_auth_status(AuthStatus::None, &chroot(&[], &[])).unwrap();
        assert_eq!(status, AuthStatus::User);
    }

    #[test]
    fn sequence_is_enforced() {
        let alice = identity("alice", 1000);
        let mut a = auth(alice.clone(), alice);

        assert!(matches!(
            a.authenticate(AuthStatus::None),
            Err(AuthError::OutOfOrder { .. })
        ));
        a.start().unwrap();
        assert!(matches!(a.open_session(), Err(AuthError::OutOfOrder { .. })));
        a.authenticate(AuthStatus::None).unwrap();
        a.setupenv().unwrap();
        a.account().unwrap();
        a.cred_establish().unwrap();
        a.open_session().unwrap();
        a.close_session().unwrap();
        a.cred_delete().unwrap();
        a.stop().unwrap();
        assert!(a.stop().is_err());
    }

    #[test]
    fn failed_status_is_denied() {
        let alice = identity("alice", 1000);
        let mut a = auth(alice.clone(), alice);
        a.start().unwrap();
        assert!(matches!(
            a.authenticate(AuthStatus::Fail),
            Err(AuthError::AccessDenied { .. })
        ));
    }
}

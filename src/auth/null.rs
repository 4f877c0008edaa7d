use super::{AuthBackend, AuthStatus, Identity};
use crate::config::types::{AuthError, AuthResult};
use crate::utils::environment::Environment;

const ROOT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";
const USER_PATH: &str = "/usr/local/bin:/usr/bin:/bin:/usr/games";

/// Backend for builds without PAM
///
/// Access decisions come entirely from the chroot user and group lists;
/// there is no password prompt, so a request that would need one is refused.
#[derive(Debug, Default)]
pub struct NullAuth {
    _private: (),
}

impl NullAuth {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AuthBackend for NullAuth {
    fn name(&self) -> &'static str {
        "null"
    }

    fn authenticate(
        &mut self,
        status: AuthStatus,
        user: &Identity,
        ruser: &Identity,
    ) -> AuthResult<()> {
        match status {
            AuthStatus::None => Ok(()),
            AuthStatus::User if ruser.is_root() => Ok(()),
            AuthStatus::User => Err(AuthError::AuthenticationUnavailable {
                ruser: ruser.name.clone(),
                user: user.name.clone(),
                backend: self.name(),
            }),
            AuthStatus::Fail => Err(AuthError::AccessDenied {
                ruser: ruser.name.clone(),
                user: user.name.clone(),
            }),
        }
    }

    fn setupenv(&mut self, user: &Identity, caller: &Environment) -> AuthResult<Environment> {
        let mut env = Environment::new();
        env.set("PATH", if user.is_root() { ROOT_PATH } else { USER_PATH });
        env.set("HOME", user.home.display());
        env.set("LOGNAME", &user.name);
        env.set("USER", &user.name);
        env.set("SHELL", user.shell.display());
        if let Some(term) = caller.get("TERM") {
            env.set("TERM", term);
        }
        Ok(env)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn identity(name: &str, uid: u32) -> Identity {
        Identity {
            name: name.to_string(),
            uid,
            gid: uid,
            home: PathBuf::from(format!("/home/{}", name)),
            shell: PathBuf::from("/bin/bash"),
        }
    }

    #[test]
    fn minimal_environment() {
        let mut caller = Environment::new();
        caller.set("TERM", "xterm");
        caller.set("SECRET", "x");

        let alice = identity("alice", 1000);
        let env = NullAuth::new().setupenv(&alice, &caller).unwrap();
        assert_eq!(env.get("PATH"), Some(USER_PATH));
        assert_eq!(env.get("HOME"), Some("/home/alice"));
        assert_eq!(env.get("USER"), Some("alice"));
        assert_eq!(env.get("LOGNAME"), Some("alice"));
        assert_eq!(env.get("SHELL"), Some("/bin/bash"));
        assert_eq!(env.get("TERM"), Some("xterm"));
        assert!(!env.contains("SECRET"));

        let root = identity("root", 0);
        let env = NullAuth::new().setupenv(&root, &Environment::new()).unwrap();
        assert_eq!(env.get("PATH"), Some(ROOT_PATH));
        assert!(!env.contains("TERM"));
    }

    #[test]
    fn refuses_failed_status() {
        let alice = identity("alice", 1000);
        let mut null = NullAuth::new();
        assert!(null.authenticate(AuthStatus::None, &alice, &alice).is_ok());
        assert!(matches!(
            null.authenticate(AuthStatus::Fail, &alice, &alice),
            Err(AuthError::AccessDenied { .. })
        ));
    }

    #[test]
    fn user_status_needs_root_caller() {
        let alice = identity("alice", 1000);
        let root = identity("root", 0);
        let mut null = NullAuth::new();

        assert!(matches!(
            null.authenticate(AuthStatus::User, &root, &alice),
            Err(AuthError::AuthenticationUnavailable { ref ruser, ref user, backend: "null" })
                if ruser == "alice" && user == "root"
        ));
        assert!(null.authenticate(AuthStatus::User, &alice, &root).is_ok());
    }
}

//! Shared session fixture
//!
//! A temporary tree holding the configuration, session descriptors and
//! scripts for a directory chroot `sid`. Setup and exec scripts append the
//! stage they were called for to a log, so tests can check stage ordering
//! without any privilege changes.

#![allow(dead_code)]

use rschroot::auth::{Auth, Identity, NullAuth};
use rschroot::config::chroots::ChrootConfig;
use rschroot::config::paths::Paths;
use rschroot::config::types::Operation;
use rschroot::session::Session;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub struct Fixture {
    pub root: TempDir,
    pub paths: Paths,
    pub log: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        let root = TempDir::new().unwrap();
        let paths = Paths::with_root(root.path());
        for dir in [
            &paths.chroot_d_dir,
            &paths.session_dir,
            &paths.mount_dir,
            &paths.setup_dir,
            &paths.exec_dir,
        ] {
            fs::create_dir_all(dir).unwrap();
        }
        let tree = root.path().join("srv/sid");
        fs::create_dir_all(&tree).unwrap();

        fs::write(
            &paths.conf_file,
            format!(
                "[sid]\ntype=directory\ndescription=Debian sid\ndirectory={}\nusers={}\naliases=unstable\n",
                tree.display(),
                identity().name
            ),
        )
        .unwrap();

        let log = root.path().join("stages.log");
        for dir in [&paths.setup_dir, &paths.exec_dir] {
            script(
                dir,
                "10record",
                &format!(
                    "#!/bin/sh\necho \"$1 $2 $SESSION_ID $CHROOT_TYPE\" >> {}\n",
                    log.display()
                ),
            );
        }

        Self { root, paths, log }
    }

    /// Drop an extra definition file into chroot.d
    pub fn add_chroot(&self, file: &str, text: &str) {
        fs::write(self.paths.chroot_d_dir.join(file), text).unwrap();
    }

    pub fn session(&self, identity: Identity, chroots: &[&str], operation: Operation) -> Session {
        self.session_as(identity.clone(), identity, chroots, operation)
    }

    /// Session requested by `ruser` to run as `user`
    pub fn session_as(
        &self,
        ruser: Identity,
        user: Identity,
        chroots: &[&str],
        operation: Operation,
    ) -> Session {
        let config = ChrootConfig::load(&self.paths, &[], true).unwrap();
        let auth = Auth::with_identities(ruser, user, Box::new(NullAuth::new()));
        Session::new(
            auth,
            config,
            self.paths.clone(),
            chroots.iter().map(|c| c.to_string()).collect(),
            operation,
        )
    }

    pub fn stages(&self) -> Vec<String> {
        fs::read_to_string(&self.log)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// First word (the stage name) of every logged line
    pub fn stage_names(&self) -> Vec<String> {
        self.stages()
            .iter()
            .map(|line| line.split_whitespace().next().unwrap_or_default().to_string())
            .collect()
    }

    pub fn session_files(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(&self.paths.session_dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}

pub fn script(dir: &Path, name: &str, body: &str) {
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
}

/// The invoking user, whether or not it has a passwd entry
pub fn identity() -> Identity {
    let uid = nix::unistd::getuid().as_raw();
    Identity::from_uid(uid).unwrap_or_else(|_| Identity {
        name: "rschroot-test".to_string(),
        uid,
        gid: nix::unistd::getgid().as_raw(),
        home: PathBuf::from("/"),
        shell: PathBuf::from("/bin/sh"),
    })
}

/// A user that need not exist on the host
pub fn fake_identity(name: &str, uid: u32) -> Identity {
    Identity {
        name: name.to_string(),
        uid,
        gid: uid,
        home: PathBuf::from(format!("/home/{}", name)),
        shell: PathBuf::from("/bin/sh"),
    }
}

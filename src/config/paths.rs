//! Well-known directories used by rschroot.

use std::path::{Path, PathBuf};

/// Filesystem layout for configuration, sessions, mounts and scripts
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Paths {
    /// Main configuration file
    pub conf_file: PathBuf,
    /// Directory of additional chroot definitions
    pub chroot_d_dir: PathBuf,
    /// Base directory for `script-config` relative paths
    pub sysconf_dir: PathBuf,
    /// Session descriptor files
    pub session_dir: PathBuf,
    /// Session mount points
    pub mount_dir: PathBuf,
    /// Setup stage scripts
    pub setup_dir: PathBuf,
    /// Exec stage scripts
    pub exec_dir: PathBuf,
    /// Helper programs for setup scripts
    pub libexec_dir: PathBuf,
    /// Device lock files
    pub lock_dir: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            conf_file: PathBuf::from("/etc/schroot/schroot.conf"),
            chroot_d_dir: PathBuf::from("/etc/schroot/chroot.d"),
            sysconf_dir: PathBuf::from("/etc/schroot"),
            session_dir: PathBuf::from("/var/lib/schroot/session"),
            mount_dir: PathBuf::from("/var/lib/schroot/mount"),
            setup_dir: PathBuf::from("/etc/schroot/setup.d"),
            exec_dir: PathBuf::from("/etc/schroot/exec.d"),
            libexec_dir: PathBuf::from("/usr/lib/schroot"),
            lock_dir: PathBuf::from("/var/lock"),
        }
    }
}

impl Paths {
    /// Layout rooted at `root`, mirroring the default tree beneath it
    pub fn with_root(root: &Path) -> Self {
        let rebase = |path: PathBuf| root.join(path.strip_prefix("/").unwrap_or(&path));
        let defaults = Self::default();
        Self {
            conf_file: rebase(defaults.conf_file),
            chroot_d_dir: rebase(defaults.chroot_d_dir),
            sysconf_dir: rebase(defaults.sysconf_dir),
            session_dir: rebase(defaults.session_dir),
            mount_dir: rebase(defaults.mount_dir),
            setup_dir: rebase(defaults.setup_dir),
            exec_dir: rebase(defaults.exec_dir),
            libexec_dir: rebase(defaults.libexec_dir),
            lock_dir: rebase(defaults.lock_dir),
        }
    }

    /// Directory holding the scripts for a setup or exec stage
    pub fn script_dir(&self, setup: bool) -> &Path {
        if setup {
            &self.setup_dir
        } else {
            &self.exec_dir
        }
    }

    /// Session descriptor file for a session id
    pub fn session_file(&self, session_id: &str) -> PathBuf {
        self.session_dir.join(session_id)
    }

    /// Default mount location for a session id
    pub fn session_mount_location(&self, session_id: &str) -> PathBuf {
        self.mount_dir.join(session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rooted_layout_stays_under_root() {
        let paths = Paths::with_root(Path::new("/tmp/test-root"));
        assert_eq!(
            paths.session_dir,
            PathBuf::from("/tmp/test-root/var/lib/schroot/session")
        );
        assert_eq!(
            paths.session_file("sid-1234"),
            PathBuf::from("/tmp/test-root/var/lib/schroot/session/sid-1234")
        );
        assert_eq!(paths.script_dir(false), Path::new("/tmp/test-root/etc/schroot/exec.d"));
    }
}

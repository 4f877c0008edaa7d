use super::{join_location, Storage, FILE_LOCK_TIMEOUT};
use crate::chroot::keys::{path_string, KeyReader};
use crate::config::keyfile::{Keyfile, Priority};
use crate::config::paths::Paths;
use crate::config::types::{ChrootError, ChrootResult, LockType, SessionFlags, SetupType};
use crate::kernel::lock::FileLock;
use crate::utils::environment::Environment;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

/// A chroot unpacked from (and optionally repacked into) an archive file
#[derive(Debug, Default)]
pub struct FileArchive {
    pub file: Option<PathBuf>,
    pub location: Option<PathBuf>,
    pub repack: bool,
    /// Archive lock held while a setup stage runs
    lock: Option<FileLock>,
}

impl Clone for FileArchive {
    /// Clones never share the held archive lock
    fn clone(&self) -> Self {
        Self {
            file: self.file.clone(),
            location: self.location.clone(),
            repack: self.repack,
            lock: None,
        }
    }
}

impl PartialEq for FileArchive {
    fn eq(&self, other: &Self) -> bool {
        self.file == other.file && self.location == other.location && self.repack == other.repack
    }
}

impl FileArchive {
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self {
            file: Some(file.into()),
            ..Default::default()
        }
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_some()
    }

    /// Archive must be a root-owned regular file not writable by others
    fn check_file(file: &Path) -> ChrootResult<()> {
        let name = file.display().to_string();
        let metadata = fs::metadata(file).map_err(|source| ChrootError::FileStat {
            path: name.clone(),
            source,
        })?;
        if !metadata.is_file() {
            return Err(ChrootError::FileNotReg(name));
        }
        if metadata.uid() != 0 {
            return Err(ChrootError::FileOwner(name));
        }
        if metadata.mode() & 0o002 != 0 {
            return Err(ChrootError::FilePerms(name));
        }
        Ok(())
    }
}

impl Storage for FileArchive {
    fn type_name(&self) -> &'static str {
        "file"
    }

    fn path(&self, mount_location: Option<&Path>) -> Option<PathBuf> {
        join_location(mount_location, self.location.as_deref())
    }

    fn session_flags(&self, active: bool) -> SessionFlags {
        if active {
            SessionFlags::CREATE | SessionFlags::PURGE
        } else {
            SessionFlags::CREATE
        }
    }

    fn setup_env(&self, env: &mut Environment) {
        env.set("CHROOT_FILE", path_string(self.file.as_deref()));
        env.set("CHROOT_LOCATION", path_string(self.location.as_deref()));
        env.set("CHROOT_FILE_REPACK", self.repack);
    }

    fn keyfile_get(&self, keyfile: &mut Keyfile, group: &str, session: bool) {
        keyfile.set_value(group, "file", path_string(self.file.as_deref()));
        if let Some(location) = &self.location {
            keyfile.set_value(group, "location", location.display().to_string());
        }
        if session {
            keyfile.set_bool(group, "file-repack", self.repack);
        }
    }

    fn keyfile_set(&mut self, reader: &KeyReader<'_>, session: bool) -> ChrootResult<()> {
        self.file = reader.absolute_path("file", Priority::Required, ChrootError::FileAbs)?;
        if let Some(location) =
            reader.absolute_path("location", Priority::Optional, ChrootError::LocationAbs)?
        {
            self.location = Some(location);
        }
        let repack = if session {
            Priority::Required
        } else {
            Priority::Disallowed
        };
        if let Some(value) = reader.bool("file-repack", repack)? {
            self.repack = value;
        }
        Ok(())
    }

    fn used_keys(&self) -> &'static [&'static str] {
        &["file", "location", "file-repack"]
    }

    fn setup_lock(
        &mut self,
        _paths: &Paths,
        setup_type: SetupType,
        lock: bool,
        _status: i32,
    ) -> ChrootResult<()> {
        if !setup_type.is_setup() {
            return Ok(());
        }
        let file = self.file.clone().ok_or(ChrootError::FileUnset)?;
        let name = file.display().to_string();

        if lock {
            Self::check_file(&file)?;
            let lock_type = if self.repack {
                LockType::Exclusive
            } else {
                LockType::Shared
            };
            let mut file_lock =
                FileLock::open(&file, self.repack).map_err(|source| ChrootError::FileLock {
                    path: name.clone(),
                    source,
                })?;
            file_lock
                .set_lock(lock_type, FILE_LOCK_TIMEOUT)
                .map_err(|source| ChrootError::FileLock { path: name, source })?;
            self.lock = Some(file_lock);
        } else if let Some(mut file_lock) = self.lock.take() {
            file_lock
                .unset_lock()
                .map_err(|source| ChrootError::FileUnlock { path: name, source })?;
        }
        Ok(())
    }

    fn clone_session(&mut self, _session_id: &str, source: bool) {
        self.repack = source;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn repack_key_only_in_sessions() {
        let kf = Keyfile::parse("[sid]\nfile=/srv/sid.tar.gz\nfile-repack=true\n", None).unwrap();
        let reader = KeyReader::new(&kf, "sid");
        assert!(FileArchive::default().keyfile_set(&reader, false).is_err());

        let mut archive = FileArchive::default();
        archive.keyfile_set(&reader, true).unwrap();
        assert!(archive.repack);
    }

    #[test]
    fn session_needs_repack_key() {
        let kf = Keyfile::parse("[sid]\nfile=/srv/sid.tar.gz\n", None).unwrap();
        let reader = KeyReader::new(&kf, "sid");
        assert!(FileArchive::default().keyfile_set(&reader, true).is_err());
    }

    #[test]
    fn relative_file_is_rejected() {
        let kf = Keyfile::parse("[sid]\nfile=sid.tar.gz\n", None).unwrap();
        let err = FileArchive::default()
            .keyfile_set(&KeyReader::new(&kf, "sid"), false)
            .unwrap_err();
        assert!(err.to_string().contains("file must have an absolute path"));
    }

    #[test]
    fn setup_start_checks_archive() {
        let dir = TempDir::new().unwrap();
        let paths = Paths::with_root(dir.path());

        let mut missing = FileArchive::new(dir.path().join("absent.tar"));
        assert!(matches!(
            missing.setup_lock(&paths, SetupType::SetupStart, true, 0),
            Err(ChrootError::FileStat { .. })
        ));

        let mut not_regular = FileArchive::new(dir.path());
        assert!(matches!(
            not_regular.setup_lock(&paths, SetupType::SetupStart, true, 0),
            Err(ChrootError::FileNotReg(_))
        ));

        let archive_path = dir.path().join("sid.tar");
        fs::write(&archive_path, b"archive").unwrap();
        let mut archive = FileArchive::new(&archive_path);
        let result = archive.setup_lock(&paths, SetupType::SetupStart, true, 0);
        if nix::unistd::geteuid().is_root() {
            result.unwrap();
            assert!(archive.is_locked());
            archive
                .setup_lock(&paths, SetupType::SetupStart, false, 0)
                .unwrap();
            assert!(!archive.is_locked());
        } else {
            assert!(matches!(result, Err(ChrootError::FileOwner(_))));
        }
    }

    #[test]
    fn exec_stages_do_nothing() {
        let dir = TempDir::new().unwrap();
        let paths = Paths::with_root(dir.path());
        let mut archive = FileArchive::new(dir.path().join("absent.tar"));
        archive
            .setup_lock(&paths, SetupType::ExecStart, true, 0)
            .unwrap();
    }

    #[test]
    fn clone_drops_held_lock() {
        let archive = FileArchive::new("/srv/sid.tar");
        let copy = archive.clone();
        assert_eq!(copy, archive);
        assert!(!copy.is_locked());
    }
}

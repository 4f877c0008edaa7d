use super::Storage;
use crate::chroot::keys::{path_string, KeyReader};
use crate::config::keyfile::{Keyfile, Priority};
use crate::config::types::{ChrootError, ChrootResult, KeyfileError, SessionFlags};
use crate::utils::environment::Environment;
use std::path::{Path, PathBuf};

const KEYS: &[&str] = &["directory", "location"];

/// Read `directory`, accepting the deprecated `location` spelling
fn read_directory(reader: &KeyReader<'_>) -> ChrootResult<PathBuf> {
    let abs = ChrootError::DirectoryAbs;
    if let Some(dir) = reader.absolute_path("directory", Priority::Optional, abs)? {
        return Ok(dir);
    }
    if let Some(dir) = reader.absolute_path("location", Priority::Deprecated, abs)? {
        return Ok(dir);
    }
    Err(KeyfileError::MissingKey {
        pos: reader.keyfile().position(reader.group(), None),
        group: reader.group().to_string(),
        key: "directory".to_string(),
    }
    .into())
}

/// An existing directory used in place, never mounted
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Plain {
    pub directory: Option<PathBuf>,
}

impl Plain {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: Some(directory.into()),
        }
    }
}

impl Storage for Plain {
    fn type_name(&self) -> &'static str {
        "plain"
    }

    fn path(&self, _mount_location: Option<&Path>) -> Option<PathBuf> {
        self.directory.clone()
    }

    fn session_flags(&self, _active: bool) -> SessionFlags {
        SessionFlags::NOFLAGS
    }

    fn setup_env(&self, env: &mut Environment) {
        env.set("CHROOT_DIRECTORY", path_string(self.directory.as_deref()));
    }

    fn keyfile_get(&self, keyfile: &mut Keyfile, group: &str, _session: bool) {
        keyfile.set_value(group, "directory", path_string(self.directory.as_deref()));
    }

    fn keyfile_set(&mut self, reader: &KeyReader<'_>, _session: bool) -> ChrootResult<()> {
        self.directory = Some(read_directory(reader)?);
        Ok(())
    }

    fn used_keys(&self) -> &'static [&'static str] {
        KEYS
    }
}

/// A directory bind-mounted at the session mount location
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Directory {
    pub directory: Option<PathBuf>,
}

impl Directory {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: Some(directory.into()),
        }
    }
}

impl Storage for Directory {
    fn type_name(&self) -> &'static str {
        "directory"
    }

    fn path(&self, mount_location: Option<&Path>) -> Option<PathBuf> {
        mount_location
            .map(Path::to_path_buf)
            .or_else(|| self.directory.clone())
    }

    fn session_flags(&self, _active: bool) -> SessionFlags {
        SessionFlags::CREATE
    }

    fn setup_env(&self, env: &mut Environment) {
        env.set("CHROOT_DIRECTORY", path_string(self.directory.as_deref()));
    }

    fn keyfile_get(&self, keyfile: &mut Keyfile, group: &str, _session: bool) {
        keyfile.set_value(group, "directory", path_string(self.directory.as_deref()));
    }

    fn keyfile_set(&mut self, reader: &KeyReader<'_>, _session: bool) -> ChrootResult<()> {
        self.directory = Some(read_directory(reader)?);
        Ok(())
    }

    fn used_keys(&self) -> &'static [&'static str] {
        KEYS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deprecated_location_is_accepted() {
        let kf = Keyfile::parse("[sid]\nlocation=/srv/chroot/sid\n", None).unwrap();
        let mut dir = Directory::default();
        dir.keyfile_set(&KeyReader::new(&kf, "sid"), false).unwrap();
        assert_eq!(dir.directory, Some(PathBuf::from("/srv/chroot/sid")));
    }

    #[test]
    fn directory_is_required_and_absolute() {
        let kf = Keyfile::parse("[a]\n[b]\ndirectory=srv\n", None).unwrap();
        let mut plain = Plain::default();
        assert!(matches!(
            plain.keyfile_set(&KeyReader::new(&kf, "a"), false),
            Err(ChrootError::Keyfile(KeyfileError::MissingKey { .. }))
        ));
        let err = plain.keyfile_set(&KeyReader::new(&kf, "b"), false).unwrap_err();
        match err {
            ChrootError::Key { source, .. } => {
                assert!(matches!(*source, ChrootError::DirectoryAbs(_)))
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn plain_path_ignores_mount_location() {
        let plain = Plain::new("/srv/chroot/sid");
        assert_eq!(
            plain.path(Some(Path::new("/var/lib/schroot/mount/x"))),
            Some(PathBuf::from("/srv/chroot/sid"))
        );
        assert!(plain.session_flags(true).is_empty());

        let dir = Directory::new("/srv/chroot/sid");
        assert_eq!(
            dir.path(Some(Path::new("/var/lib/schroot/mount/x"))),
            Some(PathBuf::from("/var/lib/schroot/mount/x"))
        );
    }
}

use super::{SnapshotNaming, Storage};
use crate::chroot::keys::{path_string, KeyReader};
use crate::config::keyfile::{Keyfile, Priority};
use crate::config::types::{ChrootError, ChrootResult, SessionFlags};
use crate::utils::environment::Environment;
use std::path::PathBuf;

/// A btrfs subvolume whose sessions run on a writable snapshot of it
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BtrfsSnapshot {
    pub source_subvolume: Option<PathBuf>,
    pub snapshot_directory: Option<PathBuf>,
    pub snapshot_name: Option<PathBuf>,
}

impl SnapshotNaming for BtrfsSnapshot {
    fn name_snapshot(&mut self, session_id: &str) {
        if let Some(dir) = &self.snapshot_directory {
            self.snapshot_name = Some(dir.join(session_id));
        }
    }
}

impl Storage for BtrfsSnapshot {
    fn type_name(&self) -> &'static str {
        "btrfs-snapshot"
    }

    fn session_flags(&self, active: bool) -> SessionFlags {
        if active {
            SessionFlags::CREATE | SessionFlags::PURGE
        } else {
            SessionFlags::CREATE
        }
    }

    fn setup_env(&self, env: &mut Environment) {
        env.set(
            "CHROOT_BTRFS_SOURCE_SUBVOLUME",
            path_string(self.source_subvolume.as_deref()),
        );
        env.set(
            "CHROOT_BTRFS_SNAPSHOT_DIRECTORY",
            path_string(self.snapshot_directory.as_deref()),
        );
        env.set(
            "CHROOT_BTRFS_SNAPSHOT_NAME",
            path_string(self.snapshot_name.as_deref()),
        );
    }

    fn keyfile_get(&self, keyfile: &mut Keyfile, group: &str, session: bool) {
        keyfile.set_value(
            group,
            "btrfs-source-subvolume",
            path_string(self.source_subvolume.as_deref()),
        );
        keyfile.set_value(
            group,
            "btrfs-snapshot-directory",
            path_string(self.snapshot_directory.as_deref()),
        );
        if session {
            keyfile.set_value(
                group,
                "btrfs-snapshot-name",
                path_string(self.snapshot_name.as_deref()),
            );
        }
    }

    fn keyfile_set(&mut self, reader: &KeyReader<'_>, session: bool) -> ChrootResult<()> {
        self.source_subvolume = reader.absolute_path(
            "btrfs-source-subvolume",
            Priority::Required,
            ChrootError::SubvolumeAbs,
        )?;
        self.snapshot_directory = reader.absolute_path(
            "btrfs-snapshot-directory",
            Priority::Required,
            ChrootError::SnapshotDirAbs,
        )?;
        let name_priority = if session {
            Priority::Required
        } else {
            Priority::Disallowed
        };
        if let Some(name) =
            reader.absolute_path("btrfs-snapshot-name", name_priority, ChrootError::SnapshotNameAbs)?
        {
            self.snapshot_name = Some(name);
        }
        Ok(())
    }

    fn used_keys(&self) -> &'static [&'static str] {
        &[
            "btrfs-source-subvolume",
            "btrfs-snapshot-directory",
            "btrfs-snapshot-name",
        ]
    }

    fn clone_session(&mut self, session_id: &str, _source: bool) {
        self.name_snapshot(session_id);
    }

    fn snapshot(&mut self) -> Option<&mut dyn SnapshotNaming> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_named_in_snapshot_directory() {
        let mut btrfs = BtrfsSnapshot {
            source_subvolume: Some(PathBuf::from("/srv/btrfs/sid")),
            snapshot_directory: Some(PathBuf::from("/srv/btrfs/snapshots")),
            snapshot_name: None,
        };
        btrfs.clone_session("sid-42", false);
        assert_eq!(
            btrfs.snapshot_name,
            Some(PathBuf::from("/srv/btrfs/snapshots/sid-42"))
        );
    }

    #[test]
    fn requires_subvolume_and_directory() {
        let kf = Keyfile::parse("[sid]\nbtrfs-source-subvolume=/srv/btrfs/sid\n", None).unwrap();
        assert!(BtrfsSnapshot::default()
            .keyfile_set(&KeyReader::new(&kf, "sid"), false)
            .is_err());
    }
}

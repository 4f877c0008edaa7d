//! Storage kinds: where a chroot's tree lives and how it is locked.

mod block_device;
mod btrfs_snapshot;
mod custom;
mod directory;
mod file;
mod lvm_snapshot;

pub use block_device::BlockDevice;
pub use btrfs_snapshot::BtrfsSnapshot;
pub use custom::Custom;
pub use directory::{Directory, Plain};
pub use file::FileArchive;
pub use lvm_snapshot::LvmSnapshot;

use crate::chroot::keys::KeyReader;
use crate::config::keyfile::Keyfile;
use crate::config::paths::Paths;
use crate::config::types::{ChrootError, ChrootResult, SessionFlags, SetupType};
use crate::utils::environment::Environment;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Timeout for block device locks
pub const DEVICE_LOCK_TIMEOUT: Duration = Duration::from_secs(15);

/// Timeout for archive and session descriptor file locks
pub const FILE_LOCK_TIMEOUT: Duration = Duration::from_secs(2);

/// Path of a `location` inside a mounted tree
pub fn join_location(mount_location: Option<&Path>, location: Option<&Path>) -> Option<PathBuf> {
    let mount = mount_location?;
    Some(match location {
        Some(loc) => mount.join(loc.strip_prefix("/").unwrap_or(loc)),
        None => mount.to_path_buf(),
    })
}

/// Behaviour every storage kind provides
pub trait Storage {
    /// Value of the `type` key
    fn type_name(&self) -> &'static str;

    /// Path of the chroot tree as seen from the host
    fn path(&self, mount_location: Option<&Path>) -> Option<PathBuf> {
        mount_location.map(Path::to_path_buf)
    }

    /// Session capabilities of this kind; `active` is set for live sessions
    fn session_flags(&self, active: bool) -> SessionFlags;

    fn setup_env(&self, env: &mut Environment);

    fn keyfile_get(&self, keyfile: &mut Keyfile, group: &str, session: bool);

    fn keyfile_set(&mut self, reader: &KeyReader<'_>, session: bool) -> ChrootResult<()>;

    fn used_keys(&self) -> &'static [&'static str];

    /// Kind-specific locking for a setup or exec stage
    fn setup_lock(
        &mut self,
        _paths: &Paths,
        _setup_type: SetupType,
        _lock: bool,
        _status: i32,
    ) -> ChrootResult<()> {
        Ok(())
    }

    /// Adjust kind fields for a new session
    fn clone_session(&mut self, _session_id: &str, _source: bool) {}

    /// Snapshot naming capability, for kinds backed by snapshots
    fn snapshot(&mut self) -> Option<&mut dyn SnapshotNaming> {
        None
    }
}

/// Kinds whose sessions live on a per-session snapshot
pub trait SnapshotNaming {
    /// Derive the snapshot name or device from the session id
    fn name_snapshot(&mut self, session_id: &str);
}

/// Tagged union over every storage kind
#[derive(Clone, Debug, PartialEq)]
pub enum ChrootKind {
    Plain(Plain),
    Directory(Directory),
    File(FileArchive),
    BlockDevice(BlockDevice),
    LvmSnapshot(LvmSnapshot),
    BtrfsSnapshot(BtrfsSnapshot),
    Custom(Custom),
}

impl ChrootKind {
    /// Type names accepted by the `type` key
    pub const TYPE_NAMES: &'static [&'static str] = &[
        "plain",
        "directory",
        "file",
        "block-device",
        "lvm-snapshot",
        "btrfs-snapshot",
        "custom",
    ];

    /// Default-initialised kind for a `type` value
    pub fn from_type(type_name: &str) -> ChrootResult<Self> {
        Ok(match type_name {
            "plain" => Self::Plain(Plain::default()),
            "directory" => Self::Directory(Directory::default()),
            "file" => Self::File(FileArchive::default()),
            "block-device" => Self::BlockDevice(BlockDevice::default()),
            "lvm-snapshot" => Self::LvmSnapshot(LvmSnapshot::default()),
            "btrfs-snapshot" => Self::BtrfsSnapshot(BtrfsSnapshot::default()),
            "custom" => Self::Custom(Custom::default()),
            other => return Err(ChrootError::TypeUnknown(other.to_string())),
        })
    }

    pub fn storage(&self) -> &dyn Storage {
        match self {
            Self::Plain(k) => k,
            Self::Directory(k) => k,
            Self::File(k) => k,
            Self::BlockDevice(k) => k,
            Self::LvmSnapshot(k) => k,
            Self::BtrfsSnapshot(k) => k,
            Self::Custom(k) => k,
        }
    }

    pub fn storage_mut(&mut self) -> &mut dyn Storage {
        match self {
            Self::Plain(k) => k,
            Self::Directory(k) => k,
            Self::File(k) => k,
            Self::BlockDevice(k) => k,
            Self::LvmSnapshot(k) => k,
            Self::BtrfsSnapshot(k) => k,
            Self::Custom(k) => k,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.storage().type_name()
    }

    /// Whether sessions are cloned from this kind by default
    pub fn default_session_clonable(&self) -> bool {
        match self {
            Self::Plain(_) => false,
            Self::Custom(k) => k.session_cloneable,
            _ => true,
        }
    }

    /// Whether a source chroot is derived from this kind by default
    pub fn default_source_clonable(&self) -> bool {
        match self {
            Self::File(_) | Self::LvmSnapshot(_) | Self::BtrfsSnapshot(_) => true,
            Self::Custom(k) => k.source_cloneable,
            _ => false,
        }
    }

    /// Whether setup and exec scripts run by default
    pub fn default_run_scripts(&self) -> bool {
        !matches!(self, Self::Plain(_))
    }

    /// Kind of the maintenance view
    ///
    /// Snapshot kinds give access to their origin rather than a snapshot.
    pub fn clone_source(&self) -> Self {
        match self {
            Self::LvmSnapshot(k) => Self::BlockDevice(k.block_device().clone()),
            Self::BtrfsSnapshot(k) => Self::Directory(Directory::new(
                k.source_subvolume.clone().unwrap_or_default(),
            )),
            Self::File(k) => {
                let mut source = k.clone();
                source.repack = true;
                Self::File(source)
            }
            other => other.clone(),
        }
    }
}

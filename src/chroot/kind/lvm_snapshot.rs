use super::block_device::{check_block_device, lock_device};
use super::{BlockDevice, SnapshotNaming, Storage};
use crate::chroot::keys::{path_string, KeyReader};
use crate::config::keyfile::{Keyfile, Priority};
use crate::config::paths::Paths;
use crate::config::types::{ChrootError, ChrootResult, SessionFlags, SetupType};
use crate::utils::environment::Environment;
use std::path::{Path, PathBuf};

/// A block device whose sessions run on an LVM snapshot of it
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LvmSnapshot {
    device: BlockDevice,
    pub snapshot_device: Option<PathBuf>,
    pub snapshot_options: Option<String>,
}

impl LvmSnapshot {
    pub fn new(device: BlockDevice, snapshot_options: impl Into<String>) -> Self {
        Self {
            device,
            snapshot_device: None,
            snapshot_options: Some(snapshot_options.into()),
        }
    }

    /// The origin volume
    pub fn block_device(&self) -> &BlockDevice {
        &self.device
    }

    pub fn block_device_mut(&mut self) -> &mut BlockDevice {
        &mut self.device
    }

    fn snapshot_name(&self) -> String {
        self.snapshot_device
            .as_deref()
            .and_then(Path::file_name)
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

impl SnapshotNaming for LvmSnapshot {
    /// Snapshot device sits next to the origin, named after the session
    fn name_snapshot(&mut self, session_id: &str) {
        let parent = self
            .device
            .device
            .as_deref()
            .and_then(Path::parent)
            .unwrap_or_else(|| Path::new("/dev"));
        self.snapshot_device = Some(parent.join(session_id));
    }
}

impl Storage for LvmSnapshot {
    fn type_name(&self) -> &'static str {
        "lvm-snapshot"
    }

    fn path(&self, mount_location: Option<&Path>) -> Option<PathBuf> {
        self.device.path(mount_location)
    }

    fn session_flags(&self, active: bool) -> SessionFlags {
        if active {
            SessionFlags::CREATE | SessionFlags::PURGE
        } else {
            SessionFlags::CREATE
        }
    }

    fn setup_env(&self, env: &mut Environment) {
        let mount_device = self
            .snapshot_device
            .as_deref()
            .or(self.device.device.as_deref());
        self.device.setup_env_with(env, mount_device);
        env.set("CHROOT_LVM_SNAPSHOT_NAME", self.snapshot_name());
        env.set(
            "CHROOT_LVM_SNAPSHOT_DEVICE",
            path_string(self.snapshot_device.as_deref()),
        );
        env.set(
            "CHROOT_LVM_SNAPSHOT_OPTIONS",
            self.snapshot_options.as_deref().unwrap_or_default(),
        );
    }

    fn keyfile_get(&self, keyfile: &mut Keyfile, group: &str, session: bool) {
        self.device.keyfile_get(keyfile, group, session);
        if session {
            keyfile.set_value(
                group,
                "lvm-snapshot-device",
                path_string(self.snapshot_device.as_deref()),
            );
        }
        keyfile.set_value(
            group,
            "lvm-snapshot-options",
            self.snapshot_options.as_deref().unwrap_or_default(),
        );
    }

    fn keyfile_set(&mut self, reader: &KeyReader<'_>, session: bool) -> ChrootResult<()> {
        self.device.keyfile_set(reader, session)?;
        let snapshot_priority = if session {
            Priority::Required
        } else {
            Priority::Disallowed
        };
        if let Some(device) = reader.absolute_path(
            "lvm-snapshot-device",
            snapshot_priority,
            ChrootError::SnapshotDeviceAbs,
        )? {
            self.snapshot_device = Some(device);
        }
        self.snapshot_options = reader.string("lvm-snapshot-options", Priority::Required)?;
        Ok(())
    }

    fn used_keys(&self) -> &'static [&'static str] {
        &[
            "device",
            "mount-options",
            "location",
            "lvm-snapshot-device",
            "lvm-snapshot-options",
        ]
    }

    /// Lock the origin at setup-start and the snapshot afterwards
    ///
    /// The snapshot stays locked while the command runs. Unlocking at
    /// setup-stop is never attempted: the setup scripts have removed the
    /// snapshot device by then.
    fn setup_lock(
        &mut self,
        paths: &Paths,
        setup_type: SetupType,
        lock: bool,
        _status: i32,
    ) -> ChrootResult<()> {
        if setup_type == SetupType::SetupStop && !lock {
            return Ok(());
        }

        let device = if setup_type == SetupType::SetupStart {
            self.device.device.as_deref()
        } else {
            self.snapshot_device.as_deref()
        };
        let device = check_block_device(device)?;

        let held_during_command = matches!(
            (setup_type, lock),
            (SetupType::ExecStart, false) | (SetupType::ExecStop, true)
        );
        if held_during_command {
            return Ok(());
        }

        lock_device(paths, device, lock)
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
    use tempfile::TempDir;

    fn snapshot() -> LvmSnapshot {
        LvmSnapshot::new(BlockDevice::new("/dev/vg0/sid"), "--size 2G")
    }

    #[test]
    fn snapshot_device_named_after_session() {
        let mut lvm = snapshot();
        lvm.clone_session("sid-1234", false);
        assert_eq!(lvm.snapshot_device, Some(PathBuf::from("/dev/vg0/sid-1234")));

        let mut env = Environment::new();
        lvm.setup_env(&mut env);
        assert_eq!(env.get("CHROOT_LVM_SNAPSHOT_NAME"), Some("sid-1234"));
        assert_eq!(env.get("CHROOT_MOUNT_DEVICE"), Some("/dev/vg0/sid-1234"));
        assert_eq!(env.get("CHROOT_DEVICE"), Some("/dev/vg0/sid"));
        assert_eq!(env.get("CHROOT_LVM_SNAPSHOT_OPTIONS"), Some("--size 2G"));
    }

    #[test]
    fn setup_start_checks_origin_device() {
        let dir = TempDir::new().unwrap();
        let paths = Paths::with_root(dir.path());
        let mut lvm = LvmSnapshot::new(BlockDevice::new(dir.path().join("origin")), "");
        lvm.snapshot_device = Some(PathBuf::from("/dev/null"));

        // Origin is checked at setup-start
        assert!(matches!(
            lvm.setup_lock(&paths, SetupType::SetupStart, true, 0),
            Err(ChrootError::DeviceStat { .. })
        ));
        // Snapshot is checked afterwards
        assert!(matches!(
            lvm.setup_lock(&paths, SetupType::ExecStart, true, 0),
            Err(ChrootError::DeviceNotBlock(_))
        ));
    }

    #[test]
    fn setup_stop_unlock_is_skipped() {
        let dir = TempDir::new().unwrap();
        let paths = Paths::with_root(dir.path());
        let mut lvm = LvmSnapshot::default();
        lvm.setup_lock(&paths, SetupType::SetupStop, false, 0).unwrap();
        assert!(matches!(
            lvm.setup_lock(&paths, SetupType::SetupStop, true, 0),
            Err(ChrootError::DeviceUnset)
        ));
    }

    #[test]
    fn snapshot_device_only_in_sessions() {
        let text = "[sid]\ndevice=/dev/vg0/sid\nlvm-snapshot-options=--size 2G\nlvm-snapshot-device=/dev/vg0/x\n";
        let kf = Keyfile::parse(text, None).unwrap();
        let reader = KeyReader::new(&kf, "sid");
        assert!(LvmSnapshot::default().keyfile_set(&reader, false).is_err());

        let mut lvm = LvmSnapshot::default();
        lvm.keyfile_set(&reader, true).unwrap();
        assert_eq!(lvm.snapshot_device, Some(PathBuf::from("/dev/vg0/x")));
    }
}

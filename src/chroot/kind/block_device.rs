use super::{join_location, Storage, DEVICE_LOCK_TIMEOUT};
use crate::chroot::keys::{path_string, KeyReader};
use crate::config::keyfile::{Keyfile, Priority};
use crate::config::paths::Paths;
use crate::config::types::{ChrootError, ChrootResult, LockType, SessionFlags, SetupType};
use crate::kernel::lock::DeviceLock;
use crate::utils::environment::Environment;
use std::fs;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};

/// Stat `device` and require a block device
pub(super) fn check_block_device(device: Option<&Path>) -> ChrootResult<&Path> {
    let device = device.ok_or(ChrootError::DeviceUnset)?;
    let metadata = fs::metadata(device).map_err(|source| ChrootError::DeviceStat {
        path: device.display().to_string(),
        source,
    })?;
    if !metadata.file_type().is_block_device() {
        return Err(ChrootError::DeviceNotBlock(device.display().to_string()));
    }
    Ok(device)
}

/// Take or release the registry lock of a block device
pub(super) fn lock_device(paths: &Paths, device: &Path, lock: bool) -> ChrootResult<()> {
    let name = device.display().to_string();
    let mut device_lock = DeviceLock::new(device, &paths.lock_dir).map_err(|source| {
        if lock {
            ChrootError::DeviceLock {
                path: name.clone(),
                source,
            }
        } else {
            ChrootError::DeviceUnlock {
                path: name.clone(),
                source,
            }
        }
    })?;
    if lock {
        device_lock
            .set_lock(LockType::Exclusive, DEVICE_LOCK_TIMEOUT)
            .map_err(|source| ChrootError::DeviceLock { path: name, source })
    } else {
        device_lock
            .unset_lock()
            .map_err(|source| ChrootError::DeviceUnlock { path: name, source })
    }
}

/// A filesystem on a block device, mounted for each session
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockDevice {
    pub device: Option<PathBuf>,
    pub mount_options: Option<String>,
    pub location: Option<PathBuf>,
}

impl BlockDevice {
    pub fn new(device: impl Into<PathBuf>) -> Self {
        Self {
            device: Some(device.into()),
            ..Default::default()
        }
    }

    /// Environment shared with lvm snapshots; `mount_device` differs there
    pub(super) fn setup_env_with(&self, env: &mut Environment, mount_device: Option<&Path>) {
        env.set("CHROOT_DEVICE", path_string(self.device.as_deref()));
        env.set("CHROOT_MOUNT_DEVICE", path_string(mount_device));
        env.set(
            "CHROOT_MOUNT_OPTIONS",
            self.mount_options.as_deref().unwrap_or_default(),
        );
        env.set("CHROOT_LOCATION", path_string(self.location.as_deref()));
    }
}

impl Storage for BlockDevice {
    fn type_name(&self) -> &'static str {
        "block-device"
    }

    fn path(&self, mount_location: Option<&Path>) -> Option<PathBuf> {
        join_location(mount_location, self.location.as_deref())
    }

    fn session_flags(&self, _active: bool) -> SessionFlags {
        SessionFlags::CREATE
    }

    fn setup_env(&self, env: &mut Environment) {
        self.setup_env_with(env, self.device.as_deref());
    }

    fn keyfile_get(&self, keyfile: &mut Keyfile, group: &str, _session: bool) {
        keyfile.set_value(group, "device", path_string(self.device.as_deref()));
        if let Some(options) = &self.mount_options {
            keyfile.set_value(group, "mount-options", options);
        }
        if let Some(location) = &self.location {
            keyfile.set_value(group, "location", location.display().to_string());
        }
    }

    fn keyfile_set(&mut self, reader: &KeyReader<'_>, _session: bool) -> ChrootResult<()> {
        self.device = reader.absolute_path("device", Priority::Required, ChrootError::DeviceAbs)?;
        if let Some(options) = reader.string("mount-options", Priority::Optional)? {
            self.mount_options = Some(options);
        }
        if let Some(location) =
            reader.absolute_path("location", Priority::Optional, ChrootError::LocationAbs)?
        {
            self.location = Some(location);
        }
        Ok(())
    }

    fn used_keys(&self) -> &'static [&'static str] {
        &["device", "mount-options", "location"]
    }

    /// The device lock is held from setup-start to setup-stop
    ///
    /// Setup-recover re-takes the lock like setup-start and keeps it, so a
    /// recovered session stays locked until setup-stop releases it.
    fn setup_lock(
        &mut self,
        paths: &Paths,
        setup_type: SetupType,
        lock: bool,
        _status: i32,
    ) -> ChrootResult<()> {
        let held_across_session = match setup_type {
            SetupType::ExecStart | SetupType::ExecStop => return Ok(()),
            SetupType::SetupStart | SetupType::SetupRecover => !lock,
            SetupType::SetupStop => lock,
        };
        if held_across_session {
            return Ok(());
        }

        let device = check_block_device(self.device.as_deref())?;
        lock_device(paths, device, lock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn recover_keeps_the_lock() {
        let dir = TempDir::new().unwrap();
        let paths = Paths::with_root(dir.path());
        // Never touched: no stat, so a missing device is not an error
        let mut device = BlockDevice::new(dir.path().join("sdz9"));
        for (stage, lock) in [
            (SetupType::SetupRecover, false),
            (SetupType::SetupStart, false),
            (SetupType::SetupStop, true),
            (SetupType::ExecStart, true),
        ] {
            device.setup_lock(&paths, stage, lock, 0).unwrap();
        }
        assert!(matches!(
            device.setup_lock(&paths, SetupType::SetupRecover, true, 0),
            Err(ChrootError::DeviceStat { .. })
        ));
    }

    #[test]
    fn device_must_be_block_device() {
        let dir = TempDir::new().unwrap();
        let paths = Paths::with_root(dir.path());

        let mut unset = BlockDevice::default();
        assert!(matches!(
            unset.setup_lock(&paths, SetupType::SetupStart, true, 0),
            Err(ChrootError::DeviceUnset)
        ));

        let mut missing = BlockDevice::new(dir.path().join("sdz9"));
        assert!(matches!(
            missing.setup_lock(&paths, SetupType::SetupStart, true, 0),
            Err(ChrootError::DeviceStat { .. })
        ));

        let mut char_device = BlockDevice::new("/dev/null");
        assert!(matches!(
            char_device.setup_lock(&paths, SetupType::SetupStop, false, 0),
            Err(ChrootError::DeviceNotBlock(_))
        ));
    }

    #[test]
    fn lock_is_held_across_session() {
        let dir = TempDir::new().unwrap();
        let paths = Paths::with_root(dir.path());
        // Checks are skipped entirely for these transitions
        let mut device = BlockDevice::new(dir.path().join("missing"));
        for (stage, lock) in [
            (SetupType::SetupStart, false),
            (SetupType::SetupStop, true),
            (SetupType::ExecStart, true),
            (SetupType::ExecStop, false),
        ] {
            device.setup_lock(&paths, stage, lock, 0).unwrap();
        }
    }

    #[test]
    fn relative_device_rejected() {
        let kf = Keyfile::parse("[sid]\ndevice=sda1\n", None).unwrap();
        let err = BlockDevice::default()
            .keyfile_set(&KeyReader::new(&kf, "sid"), false)
            .unwrap_err();
        match err {
            ChrootError::Key { source, .. } => {
                assert!(matches!(*source, ChrootError::DeviceAbs(_)))
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn environment_uses_device_as_mount_device() {
        let mut device = BlockDevice::new("/dev/sda1");
        device.mount_options = Some("-o noatime".to_string());
        let mut env = Environment::new();
        device.setup_env(&mut env);
        assert_eq!(env.get("CHROOT_MOUNT_DEVICE"), Some("/dev/sda1"));
        assert_eq!(env.get("CHROOT_MOUNT_OPTIONS"), Some("-o noatime"));
        assert_eq!(env.get("CHROOT_LOCATION"), Some(""));
    }
}

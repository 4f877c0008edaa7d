//! Advisory locks on session files, chroot archives and block devices.
//!
//! Two primitives share one contract:
//! - [`FileLock`]: whole-file `fcntl(2)` record lock on an open file.
//! - [`DeviceLock`]: PID lock file (`LCK.<major>.<minor>`) in the system
//!   lock directory, so unrelated tools honour it as well.
//!
//! A zero timeout makes a single non-blocking attempt. A non-zero timeout
//! retries non-blocking attempts until a monotonic deadline passes; no
//! process-wide alarm is involved.

use crate::config::types::{LockError, LockResult, LockType};
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::{getpid, Pid};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::os::unix::fs::MetadataExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

/// Interval between non-blocking attempts while waiting on a deadline
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Monotonic deadline for a timed lock operation
#[derive(Clone, Copy, Debug)]
struct Deadline {
    start: Instant,
    timeout: Duration,
}

impl Deadline {
    fn new(timeout: Duration) -> Self {
        Self {
            start: Instant::now(),
            timeout,
        }
    }

    fn expired(&self) -> bool {
        self.start.elapsed() >= self.timeout
    }

    fn waited(&self) -> Duration {
        self.start.elapsed()
    }

    /// Sleep until the next attempt; false once the deadline has passed
    fn wait(&self) -> bool {
        if self.expired() {
            return false;
        }
        let remaining = self.timeout.saturating_sub(self.start.elapsed());
        thread::sleep(remaining.min(POLL_INTERVAL));
        true
    }
}

/// Whole-file fcntl lock on an owned file
///
/// The lock is released when the value is dropped.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
    held: LockType,
}

impl FileLock {
    pub fn new(file: File, path: impl Into<PathBuf>) -> Self {
        Self {
            file,
            path: path.into(),
            held: LockType::None,
        }
    }

    /// Open `path` and wrap it; exclusive locks need `write`
    pub fn open(path: &Path, write: bool) -> LockResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(write)
            .open(path)
            .map_err(|source| LockError::LockFile {
                path: path.display().to_string(),
                source,
            })?;
        Ok(Self::new(file, path))
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    pub fn file_mut(&mut self) -> &mut File {
        &mut self.file
    }

    pub fn held(&self) -> LockType {
        self.held
    }

    /// Acquire, convert or release (`LockType::None`) the lock
    pub fn set_lock(&mut self, lock_type: LockType, timeout: Duration) -> LockResult<()> {
        let deadline = Deadline::new(timeout);
        loop {
            match self.try_fcntl(lock_type) {
                Ok(()) => {
                    self.held = lock_type;
                    log::debug!("{}: lock set to {:?}", self.path.display(), lock_type);
                    return Ok(());
                }
                Err(Errno::EACCES) | Err(Errno::EAGAIN) | Err(Errno::EINTR) => {
                    if timeout.is_zero() {
                        return Err(LockError::Busy {
                            path: self.path.display().to_string(),
                        });
                    }
                    if !deadline.wait() {
                        let path = self.path.display().to_string();
                        let waited = deadline.waited();
                        return Err(if lock_type == LockType::None {
                            LockError::UnlockTimeout { path, waited }
                        } else {
                            LockError::Timeout { path, waited }
                        });
                    }
                }
                Err(source) => {
                    let path = self.path.display().to_string();
                    return Err(if lock_type == LockType::None {
                        LockError::UnlockOs { path, source }
                    } else {
                        LockError::Os { path, source }
                    });
                }
            }
        }
    }

    pub fn unset_lock(&mut self) -> LockResult<()> {
        self.set_lock(LockType::None, Duration::ZERO)
    }

    fn try_fcntl(&self, lock_type: LockType) -> Result<(), Errno> {
        let l_type = match lock_type {
            LockType::None => libc::F_UNLCK,
            LockType::Shared => libc::F_RDLCK,
            LockType::Exclusive => libc::F_WRLCK,
        };
        // SAFETY: flock is plain data; zeroed is a valid initial state.
        let mut request: libc::flock = unsafe { std::mem::zeroed() };
        request.l_type = l_type as libc::c_short;
        request.l_whence = libc::SEEK_SET as libc::c_short;
        request.l_start = 0;
        request.l_len = 0;

        // SAFETY: fd is owned by self.file and request outlives the call.
        let rc = unsafe { libc::fcntl(self.file.as_raw_fd(), libc::F_SETLK, &request) };
        if rc == -1 {
            Err(Errno::last())
        } else {
            Ok(())
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if self.held != LockType::None {
            if let Err(e) = self.unset_lock() {
                log::warn!("{}", e);
            }
        }
    }
}

/// Lock file registry entry for a block device
///
/// Unlike [`FileLock`], dropping a `DeviceLock` leaves the lock in place:
/// device locks are taken when a session begins and released when it ends,
/// usually by a different process.
#[derive(Clone, Debug)]
pub struct DeviceLock {
    device: String,
    lock_file: PathBuf,
}

impl DeviceLock {
    /// Lock for `device`, registered as `LCK.<major>.<minor>` in `lock_dir`
    pub fn new(device: &Path, lock_dir: &Path) -> LockResult<Self> {
        let metadata = fs::metadata(device).map_err(|source| LockError::LockFile {
            path: device.display().to_string(),
            source,
        })?;
        let rdev = metadata.rdev();
        let name = format!(
            "LCK.{}.{}",
            nix::sys::stat::major(rdev),
            nix::sys::stat::minor(rdev)
        );
        Ok(Self::with_lock_file(device, lock_dir.join(name)))
    }

    /// Lock for `device` using an explicit lock file path
    pub fn with_lock_file(device: &Path, lock_file: PathBuf) -> Self {
        Self {
            device: device.display().to_string(),
            lock_file,
        }
    }

    pub fn lock_file(&self) -> &Path {
        &self.lock_file
    }

    /// PID recorded in the lock file, if any
    pub fn owner(&self) -> LockResult<Option<Pid>> {
        match fs::read_to_string(&self.lock_file) {
            Ok(text) => Ok(text.trim().parse::<i32>().ok().map(Pid::from_raw)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(self.file_error(source)),
        }
    }

    /// Acquire or release the device lock
    ///
    /// Shared requests are treated as exclusive: the registry only records
    /// a single owner.
    pub fn set_lock(&mut self, lock_type: LockType, timeout: Duration) -> LockResult<()> {
        match lock_type {
            LockType::None => self.release(),
            LockType::Shared | LockType::Exclusive => self.acquire(timeout),
        }
    }

    pub fn unset_lock(&mut self) -> LockResult<()> {
        self.set_lock(LockType::None, Duration::ZERO)
    }

    fn acquire(&mut self, timeout: Duration) -> LockResult<()> {
        let deadline = Deadline::new(timeout);
        let me = getpid();
        loop {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.lock_file)
            {
                Ok(mut file) => {
                    if let Err(e) = writeln!(file, "{:10}", me.as_raw()) {
                        // An ownerless lock file would only be reclaimed as stale
                        if let Err(remove) = self.remove_lock_file() {
                            log::warn!("{}", remove);
                        }
                        return Err(self.file_error(e));
                    }
                    log::debug!("{}: device locked by pid {}", self.device, me);
                    return Ok(());
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                Err(source) => return Err(self.file_error(source)),
            }

            match self.owner()? {
                Some(pid) if pid == me => return Ok(()),
                Some(pid) if process_alive(pid) => {}
                stale => {
                    log::info!(
                        "{}: removing stale lock (pid {:?})",
                        self.device,
                        stale.map(Pid::as_raw)
                    );
                    self.remove_lock_file()?;
                    continue;
                }
            }

            if timeout.is_zero() {
                return Err(LockError::Busy {
                    path: self.device.clone(),
                });
            }
            if !deadline.wait() {
                return Err(LockError::Timeout {
                    path: self.device.clone(),
                    waited: deadline.waited(),
                });
            }
        }
    }

    fn release(&mut self) -> LockResult<()> {
        match self.owner()? {
            None if !self.lock_file.exists() => Ok(()),
            Some(pid) if pid != getpid() && process_alive(pid) => {
                log::debug!(
                    "{}: lock held by live pid {}, leaving it in place",
                    self.device,
                    pid
                );
                Ok(())
            }
            _ => self.remove_lock_file(),
        }
    }

    fn remove_lock_file(&self) -> LockResult<()> {
        match fs::remove_file(&self.lock_file) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(self.file_error(source)),
        }
    }

    fn file_error(&self, source: std::io::Error) -> LockError {
        LockError::LockFile {
            path: self.lock_file.display().to_string(),
            source,
        }
    }
}

fn process_alive(pid: Pid) -> bool {
    !matches!(kill(pid, None), Err(Errno::ESRCH))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn scratch_file(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("target");
        fs::write(&path, b"data").unwrap();
        path
    }

    #[test]
    fn file_lock_set_and_release() {
        let dir = TempDir::new().unwrap();
        let path = scratch_file(&dir);
        let file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
        let mut lock = FileLock::new(file, &path);

        lock.set_lock(LockType::Exclusive, Duration::ZERO).unwrap();
        assert_eq!(lock.held(), LockType::Exclusive);
        lock.set_lock(LockType::Shared, Duration::from_millis(100)).unwrap();
        assert_eq!(lock.held(), LockType::Shared);
        lock.unset_lock().unwrap();
        assert_eq!(lock.held(), LockType::None);
    }

    #[test]
    fn device_lock_writes_pid() {
        let dir = TempDir::new().unwrap();
        let mut lock =
            DeviceLock::with_lock_file(Path::new("/dev/null"), dir.path().join("LCK.1.3"));

        lock.set_lock(LockType::Exclusive, Duration::ZERO).unwrap();
        let text = fs::read_to_string(lock.lock_file()).unwrap();
        assert_eq!(text.len(), 11);
        assert_eq!(text.trim().parse::<i32>().unwrap(), getpid().as_raw());

        // Re-locking from the owner succeeds
        lock.set_lock(LockType::Shared, Duration::ZERO).unwrap();

        lock.unset_lock().unwrap();
        assert!(!lock.lock_file().exists());
    }

    #[test]
    fn device_lock_reclaims_stale_owner() {
        let dir = TempDir::new().unwrap();
        let lock_file = dir.path().join("LCK.8.1");
        // PID far above pid_max on any default configuration
        fs::write(&lock_file, format!("{:10}\n", 99_999_999)).unwrap();

        let mut lock = DeviceLock::with_lock_file(Path::new("/dev/sda1"), lock_file);
        lock.set_lock(LockType::Exclusive, Duration::ZERO).unwrap();
        assert_eq!(lock.owner().unwrap(), Some(getpid()));
    }

    #[test]
    fn device_lock_reclaims_ownerless_file() {
        let dir = TempDir::new().unwrap();
        let lock_file = dir.path().join("LCK.8.3");
        fs::write(&lock_file, "").unwrap();

        let mut lock = DeviceLock::with_lock_file(Path::new("/dev/sda3"), lock_file);
        assert_eq!(lock.owner().unwrap(), None);
        lock.set_lock(LockType::Exclusive, Duration::ZERO).unwrap();
        assert_eq!(lock.owner().unwrap(), Some(getpid()));
    }

    #[test]
    fn device_lock_held_by_live_process() {
        let dir = TempDir::new().unwrap();
        let lock_file = dir.path().join("LCK.8.2");
        // PID 1 is always alive
        fs::write(&lock_file, format!("{:10}\n", 1)).unwrap();

        let mut lock = DeviceLock::with_lock_file(Path::new("/dev/sda2"), lock_file.clone());
        assert!(matches!(
            lock.set_lock(LockType::Exclusive, Duration::ZERO),
            Err(LockError::Busy { .. })
        ));
        assert!(matches!(
            lock.set_lock(LockType::Exclusive, Duration::from_millis(60)),
            Err(LockError::Timeout { .. })
        ));

        // Releasing someone else's lock leaves it alone
        lock.unset_lock().unwrap();
        assert!(lock_file.exists());
    }

    #[test]
    fn deadline_expires() {
        let deadline = Deadline::new(Duration::from_millis(30));
        let mut rounds = 0;
        while deadline.wait() {
            rounds += 1;
        }
        assert!(rounds >= 1);
        assert!(deadline.waited() >= Duration::from_millis(30));
    }
}

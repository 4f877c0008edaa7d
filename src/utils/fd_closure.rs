/// Descriptor cleanup for forked children
///
/// Scripts and the user command must not inherit session file locks,
/// lock files or other descriptors rschroot holds open. Prefer
/// `close_range(2)` and fall back to iterating `/proc/self/fd`.
use std::fs;

/// Close every descriptor above stderr in the calling process
///
/// Best effort: failures are logged, never fatal.
pub fn close_inherited_fds() {
    #[cfg(target_os = "linux")]
    {
        if try_close_range() {
            return;
        }
    }

    close_fds_via_proc();
}

#[cfg(target_os = "linux")]
fn try_close_range() -> bool {
    // SAFETY: close_range only closes descriptors of the calling process.
    let result = unsafe {
        libc::syscall(
            libc::SYS_close_range,
            3 as libc::c_uint,
            libc::c_uint::MAX,
            0 as libc::c_int,
        )
    };
    result == 0
}

fn close_fds_via_proc() {
    let fds = match open_fds() {
        Ok(fds) => fds,
        Err(e) => {
            log::warn!("Failed to read /proc/self/fd: {}", e);
            return;
        }
    };

    for fd in fds.into_iter().filter(|fd| *fd > 2) {
        if let Err(e) = nix::unistd::close(fd) {
            if e != nix::errno::Errno::EBADF {
                log::warn!("Failed to close fd {}: {}", fd, e);
            }
        }
    }
}

/// Open descriptors of the calling process, sorted
pub fn open_fds() -> std::io::Result<Vec<i32>> {
    let mut fds: Vec<i32> = fs::read_dir("/proc/self/fd")?
        .flatten()
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter_map(|name| name.parse::<i32>().ok())
        .collect();
    fds.sort_unstable();
    Ok(fds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_descriptors_are_open() {
        let fds = open_fds().unwrap();
        assert!(fds.contains(&0));
        assert!(fds.contains(&1));
        assert!(fds.contains(&2));
    }
}

//! Bindings to the linux `perf_event_open` interface.
//!
//! Structure layouts and constants come from `perf-event-open-sys`; the ioctls are defined
//! here with `nix` so that they report errors through `nix::Error`.

#![allow(clippy::all, missing_docs, non_upper_case_globals, non_camel_case_types)]

use crate::{Error, Result};
use nix::libc;
use nix::ioctl_none;

pub use perf_event_open_sys::bindings::*;

// The ioctls are defined as macros in the kernel header.
// Details at https://elixir.bootlin.com/linux/v5.3.10/source/include/uapi/linux/perf_event.h#L456
ioctl_none!(perf_event_ioc_enable, b'$', 0);
ioctl_none!(perf_event_ioc_disable, b'$', 1);
ioctl_none!(perf_event_ioc_reset, b'$', 3);

/// Rust wrapper for the `perf_event_open` system call.
pub fn perf_event_open(
    attr: &perf_event_attr,
    pid: libc::pid_t,
    cpu: libc::c_int,
    group_fd: libc::c_int,
    flags: libc::c_ulong,
) -> Result<std::os::unix::io::RawFd> {
    unsafe {
        let fd = libc::syscall(
            libc::SYS_perf_event_open,
            attr as *const _,
            pid,
            cpu,
            group_fd,
            flags,
        );
        match fd {
            -1 => Err(Error::from_errno()),
            rc => Ok(rc as _),
        }
    }
}

/// Value of `/proc/sys/kernel/perf_event_paranoid`.
pub fn paranoid_level() -> Result<i32> {
    let data = std::fs::read_to_string("/proc/sys/kernel/perf_event_paranoid")?;
    Ok(data.trim().parse::<i32>()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paranoid_level_is_readable_when_present() {
        if std::path::Path::new("/proc/sys/kernel/perf_event_paranoid").exists() {
            assert!(paranoid_level().is_ok());
        }
    }
}

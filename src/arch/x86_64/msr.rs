//! Utilities to read model specific registers (MSRs).

use crate::{Error, Result};
use log::debug;
use nix::fcntl::{open, OFlag};
use nix::sys::stat::Mode;
use std::os::unix::io::RawFd;

/// Handle to read model specific registers of one CPU.
///
/// Requires the `msr` or `msr_safe` kernel module loaded.
#[derive(Debug)]
pub struct MsrHandle {
    /// File descriptor for MSR device file.
    fd: RawFd,
}

impl MsrHandle {
    /// Get a handle to the MSRs of `cpuid`, preferring the `msr_safe` driver.
    pub fn new(cpuid: u32) -> Result<MsrHandle> {
        let mut last = Error::NotSupported;
        for path in &[
            format!("/dev/cpu/{}/msr_safe", cpuid),
            format!("/dev/cpu/{}/msr", cpuid),
        ] {
            match open(path.as_str(), OFlag::O_RDONLY | OFlag::O_CLOEXEC, Mode::empty()) {
                Ok(fd) => {
                    debug!("Opened {}", path);
                    return Ok(MsrHandle { fd });
                }
                Err(e) => last = e.into(),
            }
        }
        Err(last)
    }

    /// Read the value of `msr`.
    pub fn read(&self, msr: u32) -> Result<u64> {
        let mut value = [0u8; 8];
        let n = nix::sys::uio::pread(self.fd, &mut value, msr as i64)?;
        if n != value.len() {
            return Err(Error::Sys);
        }
        Ok(u64::from_ne_bytes(value))
    }
}

impl Drop for MsrHandle {
    fn drop(&mut self) {
        let _ = nix::unistd::close(self.fd);
    }
}

/// MSR addresses of the RAPL interface from "Intel 64 and IA-32 Architectures Software
/// Developers Manual Volume 3B", section 14.9 "Platform Specific Power Management Support".
#[allow(missing_docs)]
pub mod rapl {
    pub const MSR_RAPL_POWER_UNIT: u32 = 0x606;
    pub const MSR_PKG_ENERGY_STATUS: u32 = 0x611;
    pub const MSR_PKG_POWER_INFO: u32 = 0x614;
    pub const MSR_PP0_ENERGY_STATUS: u32 = 0x639;
    pub const MSR_PP1_ENERGY_STATUS: u32 = 0x641;
    pub const MSR_DRAM_ENERGY_STATUS: u32 = 0x619;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_cpu() {
        assert!(MsrHandle::new(1 << 20).is_err());
    }
}

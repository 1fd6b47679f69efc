//! Fallbacks for architectures without specialised support.

use crate::{Error, Result};

/// Processor identification parsed from `/proc/cpuinfo`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CpuId {
    /// Vendor string.
    pub vendor: String,
    /// Brand string.
    pub brand: String,
    /// Family.
    pub family: u32,
    /// Model.
    pub model: u32,
    /// Stepping.
    pub stepping: u32,
}

impl CpuId {
    /// Best effort identification of the processor.
    pub fn detect() -> Self {
        let info = std::fs::read_to_string("/proc/cpuinfo").unwrap_or_default();
        let field = |key: &str| {
            info.lines()
                .filter_map(|l| {
                    let mut kv = l.splitn(2, ':');
                    match (kv.next(), kv.next()) {
                        (Some(k), Some(v)) if k.trim() == key => Some(v.trim().to_string()),
                        _ => None,
                    }
                })
                .next()
                .unwrap_or_default()
        };
        CpuId {
            vendor: field("vendor_id"),
            brand: field("model name"),
            ..CpuId::default()
        }
    }

    /// Identification string of the processor.
    pub fn cpu_string(&self) -> String {
        format!("{}-{}", self.vendor, self.brand)
    }

    /// Whether this is an Intel processor.
    pub fn is_intel(&self) -> bool {
        false
    }
}

/// Get CPU model string.
pub fn get_cpu_string() -> String {
    CpuId::detect().cpu_string()
}

/// No cycle counter is exposed on this architecture.
pub fn read_tsc() -> Option<u64> {
    None
}

/// Model specific registers do not exist on this architecture.
#[derive(Debug)]
pub struct MsrHandle;

impl MsrHandle {
    /// Always fails.
    pub fn new(_cpuid: u32) -> Result<MsrHandle> {
        Err(Error::NotSupported)
    }

    /// Always fails.
    pub fn read(&self, _msr: u32) -> Result<u64> {
        Err(Error::NotSupported)
    }
}

#[allow(missing_docs)]
pub mod rapl {
    pub const MSR_RAPL_POWER_UNIT: u32 = 0x606;
    pub const MSR_PKG_ENERGY_STATUS: u32 = 0x611;
    pub const MSR_PKG_POWER_INFO: u32 = 0x614;
    pub const MSR_PP0_ENERGY_STATUS: u32 = 0x639;
    pub const MSR_PP1_ENERGY_STATUS: u32 = 0x641;
    pub const MSR_DRAM_ENERGY_STATUS: u32 = 0x619;
}

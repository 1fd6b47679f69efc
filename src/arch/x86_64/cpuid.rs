//! Utilities to parse the CPU identification from the `cpuid` instruction.

use core::arch::x86_64::__cpuid;
use log::debug;

/// Processor identification reported by `cpuid`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CpuId {
    /// Vendor string, e.g. `GenuineIntel`.
    pub vendor: String,
    /// Brand string, e.g. `Intel(R) Core(TM) i7-8650U CPU @ 1.90GHz`.
    pub brand: String,
    /// Display family.
    pub family: u32,
    /// Display model.
    pub model: u32,
    /// Stepping.
    pub stepping: u32,
}

impl CpuId {
    /// Query the processor the calling thread runs on.
    ///
    /// More information at https://en.wikipedia.org/wiki/CPUID.
    pub fn detect() -> Self {
        let mut vendor = [0u8; 12];
        let mut id = CpuId::default();

        let res = unsafe { __cpuid(0) };
        vendor[0..4].copy_from_slice(&res.ebx.to_ne_bytes());
        vendor[4..8].copy_from_slice(&res.edx.to_ne_bytes());
        vendor[8..12].copy_from_slice(&res.ecx.to_ne_bytes());
        id.vendor = String::from_utf8_lossy(&vendor).into_owned();

        if res.eax >= 1 {
            let res = unsafe { __cpuid(1) };
            id.stepping = res.eax & 0xf;
            id.model = (res.eax >> 4) & 0xf;
            id.family = (res.eax >> 8) & 0xf;
            if id.family == 0xf {
                id.family += (res.eax >> 20) & 0xff;
            }
            if id.family >= 0x6 {
                id.model += ((res.eax >> 16) & 0xf) << 4;
            }
        }

        let ext = unsafe { __cpuid(0x8000_0000) };
        if ext.eax >= 0x8000_0004 {
            let mut brand = Vec::with_capacity(48);
            for leaf in 0x8000_0002u32..=0x8000_0004 {
                let r = unsafe { __cpuid(leaf) };
                for reg in &[r.eax, r.ebx, r.ecx, r.edx] {
                    brand.extend_from_slice(&reg.to_ne_bytes());
                }
            }
            id.brand = String::from_utf8_lossy(&brand)
                .trim_matches(char::from(0))
                .trim()
                .to_string();
        }

        debug!("Detected x86_64 processor - {}", id.cpu_string());
        id
    }

    /// `vendor-family-model-stepping`, the key used by PMU event mapfiles.
    pub fn cpu_string(&self) -> String {
        format!(
            "{}-{:X}-{:X}-{:X}",
            self.vendor, self.family, self.model, self.stepping
        )
    }

    /// Whether this is an Intel processor.
    pub fn is_intel(&self) -> bool {
        self.vendor == "GenuineIntel"
    }
}

/// Get CPU model string for x86_64 processors.
pub fn get_cpu_string() -> String {
    CpuId::detect().cpu_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_str() {
        let id = CpuId::detect();
        assert_eq!(id.vendor.len(), 12);
        let cpu_str = get_cpu_string();
        assert!(cpu_str.starts_with(&id.vendor));
        assert_eq!(cpu_str.matches('-').count(), 3);
    }
}

//! Description of the host: processor identification, topology and memory usage.

use crate::arch::CpuId;
use crate::component::read_sysfs_i64;
use crate::Result;
use lazy_static::lazy_static;
use log::debug;
use std::collections::HashSet;

lazy_static! {
    /// Nominal frequency of the processor, in MHz.
    static ref CPU_MHZ: f64 = _detect_mhz();
}

/// Processor and topology information.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HardwareInfo {
    /// Hardware threads per core.
    pub threads: usize,
    /// Cores per socket.
    pub cores: usize,
    /// Number of sockets.
    pub sockets: usize,
    /// Number of NUMA nodes.
    pub nnodes: usize,
    /// Total number of online cpus.
    pub totalcpus: usize,
    /// Vendor string.
    pub vendor_string: String,
    /// Model string.
    pub model_string: String,
    /// Processor family.
    pub cpuid_family: u32,
    /// Processor model.
    pub cpuid_model: u32,
    /// Processor stepping.
    pub cpuid_stepping: u32,
    /// Current frequency, in MHz.
    pub mhz: f64,
    /// Maximum frequency, in MHz.
    pub cpu_max_mhz: f64,
    /// Minimum frequency, in MHz.
    pub cpu_min_mhz: f64,
}

/// Memory usage of the calling process, in kilobytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DmemInfo {
    /// Virtual memory size.
    pub size: i64,
    /// Resident set size.
    pub resident: i64,
    /// Peak resident set size.
    pub high_water_mark: i64,
    /// Locked memory.
    pub locked: i64,
    /// Data segment size.
    pub heap: i64,
    /// Stack size.
    pub stack: i64,
    /// Text segment size.
    pub text: i64,
    /// Shared library code size.
    pub library: i64,
    /// Page table size.
    pub pte: i64,
    /// Page size, in bytes.
    pub pagesize: i64,
}

/// Value of `key` in a `key : value` formatted text like `/proc/cpuinfo`.
fn _field<'a>(text: &'a str, key: &str) -> Option<&'a str> {
    text.lines()
        .filter_map(|l| {
            let mut kv = l.splitn(2, ':');
            match (kv.next(), kv.next()) {
                (Some(k), Some(v)) if k.trim() == key => Some(v.trim()),
                _ => None,
            }
        })
        .next()
}

fn _cpufreq_mhz(file: &str) -> Option<f64> {
    read_sysfs_i64(format!("/sys/devices/system/cpu/cpu0/cpufreq/{}", file))
        .ok()
        .map(|khz| khz as f64 / 1000.0)
}

fn _detect_mhz() -> f64 {
    let cpuinfo = std::fs::read_to_string("/proc/cpuinfo").unwrap_or_default();
    _field(&cpuinfo, "cpu MHz")
        .and_then(|v| v.parse::<f64>().ok())
        .or_else(|| _cpufreq_mhz("cpuinfo_max_freq"))
        .unwrap_or(1000.0)
}

/// Nominal frequency of the processor, in MHz.
pub fn cpu_mhz() -> f64 {
    *CPU_MHZ
}

/// Count distinct sockets, cores and threads from the sysfs cpu topology.
fn _topology() -> Result<(usize, usize, usize)> {
    let mut packages = HashSet::new();
    let mut cores = HashSet::new();
    let mut cpus = 0;
    for path in glob::glob("/sys/devices/system/cpu/cpu[0-9]*/topology")? {
        let path = path?;
        let pkg = read_sysfs_i64(path.join("physical_package_id"))?;
        let core = read_sysfs_i64(path.join("core_id"))?;
        packages.insert(pkg);
        cores.insert((pkg, core));
        cpus += 1;
    }
    Ok((packages.len(), cores.len(), cpus))
}

/// Describe the processor and topology of the host.
pub fn hardware_info() -> Result<HardwareInfo> {
    let id = CpuId::detect();
    let cpuinfo = std::fs::read_to_string("/proc/cpuinfo")?;
    let mut info = HardwareInfo {
        vendor_string: id.vendor.clone(),
        model_string: if id.brand.is_empty() {
            _field(&cpuinfo, "model name").unwrap_or_default().to_string()
        } else {
            id.brand.clone()
        },
        cpuid_family: id.family,
        cpuid_model: id.model,
        cpuid_stepping: id.stepping,
        mhz: cpu_mhz(),
        ..HardwareInfo::default()
    };
    info.cpu_max_mhz = _cpufreq_mhz("cpuinfo_max_freq").unwrap_or(info.mhz);
    info.cpu_min_mhz = _cpufreq_mhz("cpuinfo_min_freq").unwrap_or(info.mhz);

    let (sockets, cores, cpus) = _topology().unwrap_or((0, 0, 0));
    info.totalcpus = if cpus > 0 {
        cpus
    } else {
        cpuinfo.lines().filter(|l| l.starts_with("processor")).count()
    };
    info.sockets = sockets.max(1);
    info.cores = (cores / info.sockets).max(1);
    info.threads = (info.totalcpus / (info.cores * info.sockets)).max(1);
    info.nnodes = glob::glob("/sys/devices/system/node/node[0-9]*")?
        .filter_map(std::result::Result::ok)
        .count()
        .max(1);
    debug!("Hardware {:?}", info);
    Ok(info)
}

/// Parse the `Vm*` lines of a `/proc/<pid>/status` file.
fn _parse_status(text: &str) -> DmemInfo {
    let kb = |key: &str| -> i64 {
        _field(text, key)
            .and_then(|v| v.split_whitespace().next())
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    };
    DmemInfo {
        size: kb("VmSize"),
        resident: kb("VmRSS"),
        high_water_mark: kb("VmHWM"),
        locked: kb("VmLck"),
        heap: kb("VmData"),
        stack: kb("VmStk"),
        text: kb("VmExe"),
        library: kb("VmLib"),
        pte: kb("VmPTE"),
        pagesize: 0,
    }
}

/// Memory usage of the calling process.
pub fn dmem_info() -> Result<DmemInfo> {
    let mut info = _parse_status(&std::fs::read_to_string("/proc/self/status")?);
    info.pagesize = *crate::perf::PAGE_SIZE as i64;
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status() {
        let text = "Name:\tcat\nVmPeak:\t    9000 kB\nVmSize:\t    8000 kB\nVmLck:\t       0 kB\n\
                    VmHWM:\t     700 kB\nVmRSS:\t     600 kB\nVmData:\t     300 kB\n\
                    VmStk:\t     132 kB\nVmExe:\t      20 kB\nVmLib:\t    1500 kB\nVmPTE:\t      44 kB\n";
        let info = _parse_status(text);
        assert_eq!(info.size, 8000);
        assert_eq!(info.resident, 600);
        assert_eq!(info.high_water_mark, 700);
        assert_eq!(info.heap, 300);
        assert_eq!(info.stack, 132);
        assert_eq!(info.text, 20);
        assert_eq!(info.library, 1500);
        assert_eq!(info.pte, 44);
    }

    #[test]
    fn test_field() {
        let text = "processor\t: 0\nvendor_id\t: GenuineIntel\ncpu MHz\t\t: 2100.000\n";
        assert_eq!(_field(text, "vendor_id"), Some("GenuineIntel"));
        assert_eq!(_field(text, "cpu MHz"), Some("2100.000"));
        assert_eq!(_field(text, "flags"), None);
    }

    #[test]
    fn test_host() {
        let hw = hardware_info().unwrap();
        assert!(hw.totalcpus >= 1);
        assert!(hw.threads * hw.cores * hw.sockets >= 1);
        assert!(hw.mhz > 0.0);
        let mem = dmem_info().unwrap();
        assert!(mem.size > 0);
        assert!(mem.pagesize >= 4096);
    }
}

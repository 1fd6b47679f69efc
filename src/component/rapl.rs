//! Energy counters of the Intel RAPL interface, read from model specific registers.
//!
//! Every package exposes its energy status registers as natives named
//! `<DOMAIN>_ENERGY:PACKAGE<n>`, reported in nanojoules and counted from the start of the
//! EventSet, plus `_CNT` variants returning the raw register delta. The fixed power limits of
//! the package are exposed as `THERMAL_SPEC`, `MINIMUM_POWER`, `MAXIMUM_POWER` (watts) and
//! `MAXIMUM_TIME_WINDOW` (seconds).

use crate::arch::rapl::*;
use crate::arch::{CpuId, MsrHandle};
use crate::component::*;
use log::{debug, warn};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Processor models whose DRAM energy unit is fixed at 15.3 microjoules.
const DRAM_FIXED_UNIT_MODELS: [u32; 6] = [0x3F, 0x4F, 0x55, 0x56, 0x57, 0x85];

/// Anything MSRs can be read from.
pub trait MsrSource: Send + Sync + std::fmt::Debug {
    /// Read the value of `msr`.
    fn read(&self, msr: u32) -> Result<u64>;
}

impl MsrSource for MsrHandle {
    fn read(&self, msr: u32) -> Result<u64> {
        MsrHandle::read(self, msr)
    }
}

/// Units of the RAPL registers of one package.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Units {
    power_divisor: f64,
    energy_divisor: f64,
    dram_energy_divisor: f64,
    time_divisor: f64,
}

impl Units {
    fn from_register(raw: u64, fixed_dram_unit: bool) -> Self {
        let energy_divisor = f64::from(1u32 << ((raw >> 8) & 0x1f));
        Units {
            power_divisor: f64::from(1u32 << (raw & 0xf)),
            energy_divisor,
            dram_energy_divisor: if fixed_dram_unit {
                f64::from(1u32 << 16)
            } else {
                energy_divisor
            },
            time_divisor: f64::from(1u32 << ((raw >> 16) & 0xf)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InfoField {
    ThermalSpec,
    MinimumPower,
    MaximumPower,
    MaximumTimeWindow,
}

impl InfoField {
    fn extract(self, raw: u64) -> u64 {
        match self {
            InfoField::ThermalSpec => raw & 0x7fff,
            InfoField::MinimumPower => (raw >> 16) & 0x7fff,
            InfoField::MaximumPower => (raw >> 32) & 0x7fff,
            InfoField::MaximumTimeWindow => (raw >> 48) & 0x3f,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    /// Energy status register. `scaled` converts to nanojoules, `dram` selects the DRAM unit.
    Energy { scaled: bool, dram: bool },
    /// Field of the power info register. `scaled` converts to watts or seconds.
    Info { field: InfoField, scaled: bool },
}

/// One native event of the component.
#[derive(Debug, Clone)]
struct RaplNative {
    name: String,
    desc: String,
    units: &'static str,
    package: usize,
    msr: u32,
    kind: Kind,
}

impl RaplNative {
    fn data_type(&self) -> DataType {
        match self.kind {
            Kind::Info { scaled: true, .. } => DataType::Fp64,
            _ => DataType::UInt64,
        }
    }
}

#[derive(Debug)]
struct Package {
    msrs: Box<dyn MsrSource>,
    units: Units,
}

/// Map every package to the lowest numbered cpu it contains.
fn _discover_packages() -> Result<BTreeMap<u32, u32>> {
    let mut packages = BTreeMap::new();
    for path in glob::glob("/sys/devices/system/cpu/cpu[0-9]*/topology/physical_package_id")? {
        let path = path?;
        let cpu = path
            .parent()
            .and_then(|p| p.parent())
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .and_then(|n| n.trim_start_matches("cpu").parse::<u32>().ok());
        let cpu = match cpu {
            Some(c) => c,
            None => continue,
        };
        let pkg = read_sysfs_i64(&path)? as u32;
        let entry = packages.entry(pkg).or_insert(cpu);
        if cpu < *entry {
            *entry = cpu;
        }
    }
    Ok(packages)
}

/// The RAPL component.
#[derive(Debug)]
pub struct RaplComponent {
    info: ComponentInfo,
    packages: Arc<Vec<Package>>,
    natives: Arc<Vec<RaplNative>>,
}

impl Default for RaplComponent {
    fn default() -> Self {
        RaplComponent {
            info: ComponentInfo {
                name: "rapl".into(),
                short_name: "rapl".into(),
                description: "Linux RAPL energy measurements".into(),
                default_domain: Domain::ALL,
                available_domains: Domain::ALL,
                default_granularity: Granularity::SYS,
                available_granularities: Granularity::SYS,
                ..ComponentInfo::default()
            },
            packages: Arc::new(vec![]),
            natives: Arc::new(vec![]),
        }
    }
}

impl RaplComponent {
    /// Build the natives from already opened per package register sources.
    fn _setup(&mut self, sources: Vec<Box<dyn MsrSource>>, fixed_dram_unit: bool) -> Result<()> {
        let mut packages = vec![];
        let mut natives = vec![];
        for (p, msrs) in sources.into_iter().enumerate() {
            let units = Units::from_register(msrs.read(MSR_RAPL_POWER_UNIT)?, fixed_dram_unit);
            debug!("RAPL package {} units {:?}", p, units);

            let domains = [
                ("PACKAGE_ENERGY", "package", MSR_PKG_ENERGY_STATUS, false),
                ("DRAM_ENERGY", "DRAM", MSR_DRAM_ENERGY_STATUS, true),
                ("PP0_ENERGY", "all cores", MSR_PP0_ENERGY_STATUS, false),
                ("PP1_ENERGY", "uncore", MSR_PP1_ENERGY_STATUS, false),
            ];
            for (name, what, msr, dram) in domains.iter() {
                if msrs.read(*msr).is_err() {
                    debug!("{} not available on package {}", name, p);
                    continue;
                }
                natives.push(RaplNative {
                    name: format!("{}:PACKAGE{}", name, p),
                    desc: format!("Energy used by {} on package {}", what, p),
                    units: "nJ",
                    package: p,
                    msr: *msr,
                    kind: Kind::Energy {
                        scaled: true,
                        dram: *dram,
                    },
                });
                natives.push(RaplNative {
                    name: format!("{}_CNT:PACKAGE{}", name, p),
                    desc: format!("Energy used in counts by {} on package {}", what, p),
                    units: "",
                    package: p,
                    msr: *msr,
                    kind: Kind::Energy {
                        scaled: false,
                        dram: *dram,
                    },
                });
            }

            if msrs.read(MSR_PKG_POWER_INFO).is_ok() {
                let fields = [
                    ("THERMAL_SPEC", "Thermal specification", InfoField::ThermalSpec, "W"),
                    ("MINIMUM_POWER", "Minimum power", InfoField::MinimumPower, "W"),
                    ("MAXIMUM_POWER", "Maximum power", InfoField::MaximumPower, "W"),
                    ("MAXIMUM_TIME_WINDOW", "Maximum time window", InfoField::MaximumTimeWindow, "s"),
                ];
                for (name, what, field, units) in fields.iter() {
                    natives.push(RaplNative {
                        name: format!("{}:PACKAGE{}", name, p),
                        desc: format!("{} for package {}", what, p),
                        units: *units,
                        package: p,
                        msr: MSR_PKG_POWER_INFO,
                        kind: Kind::Info {
                            field: *field,
                            scaled: true,
                        },
                    });
                    natives.push(RaplNative {
                        name: format!("{}_CNT:PACKAGE{}", name, p),
                        desc: format!("{} in counts for package {}", what, p),
                        units: "",
                        package: p,
                        msr: MSR_PKG_POWER_INFO,
                        kind: Kind::Info {
                            field: *field,
                            scaled: false,
                        },
                    });
                }
            }
            packages.push(Package { msrs, units });
        }
        if natives.is_empty() {
            return Err(Error::NoEvent);
        }
        self.info.num_cntrs = natives.len();
        self.info.num_mpx_cntrs = natives.len();
        self.packages = Arc::new(packages);
        self.natives = Arc::new(natives);
        Ok(())
    }
}

impl Component for RaplComponent {
    fn info(&self) -> &ComponentInfo {
        &self.info
    }

    fn info_mut(&mut self) -> &mut ComponentInfo {
        &mut self.info
    }

    fn init_component(&mut self, cidx: usize) -> Result<()> {
        let id = CpuId::detect();
        if !id.is_intel() || id.family != 6 {
            return Err(Error::NotSupported);
        }
        let mut sources: Vec<Box<dyn MsrSource>> = vec![];
        for (pkg, cpu) in _discover_packages()? {
            match MsrHandle::new(cpu) {
                Ok(h) => sources.push(Box::new(h)),
                Err(e) => {
                    warn!("Cannot open the MSRs of cpu {} (package {}) -- {}", cpu, pkg, e);
                    return Err(Error::Permission);
                }
            }
        }
        if sources.is_empty() {
            return Err(Error::NotSupported);
        }
        self.info.cmp_index = cidx;
        self._setup(sources, DRAM_FIXED_UNIT_MODELS.contains(&id.model))
    }

    fn num_native_events(&self) -> usize {
        self.natives.len()
    }

    fn native_info(&self, code: u32) -> Result<NativeEventInfo> {
        let n = self.natives.get(code as usize).ok_or(Error::NoEvent)?;
        Ok(NativeEventInfo {
            code,
            symbol: n.name.clone(),
            description: n.desc.clone(),
            units: n.units.into(),
            data_type: n.data_type(),
            writable: false,
        })
    }

    fn new_control_state(&self) -> Result<Box<dyn ControlState>> {
        Ok(Box::new(RaplControlState {
            packages: self.packages.clone(),
            natives: self.natives.clone(),
            programmed: vec![],
            start_values: vec![],
        }))
    }
}

/// Registers read by one EventSet.
#[derive(Debug)]
pub struct RaplControlState {
    packages: Arc<Vec<Package>>,
    natives: Arc<Vec<RaplNative>>,
    programmed: Vec<u32>,
    start_values: Vec<u64>,
}

impl RaplControlState {
    fn _read_raw(&self) -> Result<Vec<u64>> {
        self.programmed
            .iter()
            .map(|&c| {
                let n = &self.natives[c as usize];
                self.packages[n.package].msrs.read(n.msr)
            })
            .collect()
    }
}

/// Difference between two readings of a 32 bit energy status register.
fn _energy_delta(start: u64, now: u64) -> u64 {
    let (start, now) = (start & 0xffff_ffff, now & 0xffff_ffff);
    if now < start {
        now + 0x1_0000_0000 - start
    } else {
        now - start
    }
}

impl ControlState for RaplControlState {
    fn update(&mut self, natives: &mut [NativeSlot]) -> Result<()> {
        if natives.iter().any(|n| n.code as usize >= self.natives.len()) {
            return Err(Error::NoEvent);
        }
        self.programmed = natives.iter().map(|n| n.code).collect();
        self.start_values = vec![0; natives.len()];
        for (pos, n) in natives.iter_mut().enumerate() {
            n.position = Some(pos);
        }
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        self.start_values = self._read_raw()?;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    fn read(&mut self) -> Result<Vec<i64>> {
        let now = self._read_raw()?;
        let mut out = Vec::with_capacity(now.len());
        for (pos, &code) in self.programmed.iter().enumerate() {
            let n = &self.natives[code as usize];
            let units = self.packages[n.package].units;
            let value = match n.kind {
                Kind::Energy { scaled, dram } => {
                    let delta = _energy_delta(self.start_values[pos], now[pos]);
                    if scaled {
                        let divisor = if dram {
                            units.dram_energy_divisor
                        } else {
                            units.energy_divisor
                        };
                        (delta as f64 / divisor * 1e9) as i64
                    } else {
                        delta as i64
                    }
                }
                Kind::Info { field, scaled } => {
                    let raw = field.extract(now[pos]);
                    if !scaled {
                        raw as i64
                    } else {
                        let divisor = if field == InfoField::MaximumTimeWindow {
                            units.time_divisor
                        } else {
                            units.power_divisor
                        };
                        (raw as f64 / divisor).to_bits() as i64
                    }
                }
            };
            out.push(value);
        }
        Ok(out)
    }

    fn reset(&mut self) -> Result<()> {
        self.start()
    }
}

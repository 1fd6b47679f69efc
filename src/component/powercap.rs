//! Energy and power limits of the linux powercap interface (`/sys/class/powercap`).
//!
//! Every `intel-rapl:<zone>[:<subzone>]` directory becomes a set of natives named
//! `<FILE>:ZONE<z>[_SUBZONE<s>]`. Energy is reported as the delta since start, the power limit
//! and time window constraints can be written.

use crate::component::*;
use log::{debug, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Default location of the powercap class.
pub const POWERCAP_ROOT: &str = "/sys/class/powercap";

/// (event prefix, file, units, writable)
const ZONE_FILES: [(&str, &str, &str, bool); 6] = [
    ("ENERGY_UJ", "energy_uj", "uJ", false),
    ("MAX_ENERGY_RANGE_UJ", "max_energy_range_uj", "uJ", false),
    ("POWER_LIMIT_A_UW", "constraint_0_power_limit_uw", "uW", true),
    ("TIME_WINDOW_A_US", "constraint_0_time_window_us", "us", true),
    ("POWER_LIMIT_B_UW", "constraint_1_power_limit_uw", "uW", true),
    ("TIME_WINDOW_B_US", "constraint_1_time_window_us", "us", true),
];

#[derive(Debug, Clone)]
struct PowercapNative {
    name: String,
    desc: String,
    units: &'static str,
    path: PathBuf,
    writable: bool,
    /// Wraparound value of energy counters, `None` for absolute readings.
    wrap: Option<i64>,
}

/// The powercap component.
#[derive(Debug)]
pub struct PowercapComponent {
    info: ComponentInfo,
    root: PathBuf,
    natives: Arc<Vec<PowercapNative>>,
}

impl Default for PowercapComponent {
    fn default() -> Self {
        PowercapComponent::with_root(POWERCAP_ROOT)
    }
}

/// Suffix naming a zone directory, `intel-rapl:0:1` gives `ZONE0_SUBZONE1`.
fn _zone_suffix(dir: &Path) -> Option<String> {
    let name = dir.file_name()?.to_str()?;
    let ids: Vec<u32> = name
        .strip_prefix("intel-rapl:")?
        .split(':')
        .map(|s| s.parse().ok())
        .collect::<Option<Vec<u32>>>()?;
    match ids.as_slice() {
        [z] => Some(format!("ZONE{}", z)),
        [z, s] => Some(format!("ZONE{}_SUBZONE{}", z, s)),
        _ => None,
    }
}

impl PowercapComponent {
    /// Component reading zones below `root` instead of the default location.
    pub fn with_root<P: AsRef<Path>>(root: P) -> Self {
        PowercapComponent {
            info: ComponentInfo {
                name: "powercap".into(),
                short_name: "powercap".into(),
                description: "Linux powercap energy measurements".into(),
                default_domain: Domain::ALL,
                available_domains: Domain::ALL,
                default_granularity: Granularity::SYS,
                available_granularities: Granularity::SYS,
                ..ComponentInfo::default()
            },
            root: root.as_ref().to_path_buf(),
            natives: Arc::new(vec![]),
        }
    }
}

impl Component for PowercapComponent {
    fn info(&self) -> &ComponentInfo {
        &self.info
    }

    fn info_mut(&mut self) -> &mut ComponentInfo {
        &mut self.info
    }

    fn init_component(&mut self, cidx: usize) -> Result<()> {
        let pattern = format!("{}/intel-rapl:*", self.root.display());
        let mut zones: Vec<PathBuf> = glob::glob(&pattern)?
            .filter_map(std::result::Result::ok)
            .collect();
        zones.sort();

        let mut natives = vec![];
        for zone in zones {
            let suffix = match _zone_suffix(&zone) {
                Some(s) => s,
                None => continue,
            };
            let zone_name = std::fs::read_to_string(zone.join("name"))
                .map(|s| s.trim().to_string())
                .unwrap_or_default();
            let wrap = read_sysfs_i64(zone.join("max_energy_range_uj")).ok();
            for (prefix, file, units, writable) in ZONE_FILES.iter() {
                let path = zone.join(file);
                if std::fs::File::open(&path).is_err() {
                    if *prefix == "ENERGY_UJ" {
                        warn!("Cannot read {:?}, energy of {} unavailable", path, zone_name);
                    }
                    continue;
                }
                natives.push(PowercapNative {
                    name: format!("{}:{}", prefix, suffix),
                    desc: format!("{} for {} ({})", file, suffix, zone_name),
                    units: *units,
                    path,
                    writable: *writable,
                    wrap: if *prefix == "ENERGY_UJ" {
                        Some(wrap.unwrap_or(0))
                    } else {
                        None
                    },
                });
            }
        }
        if natives.is_empty() {
            return Err(Error::NotSupported);
        }
        debug!("powercap component with {} natives", natives.len());
        self.info.cmp_index = cidx;
        self.info.num_cntrs = natives.len();
        self.info.num_mpx_cntrs = natives.len();
        self.natives = Arc::new(natives);
        Ok(())
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
            data_type: DataType::Int64,
            writable: n.writable,
        })
    }

    fn new_control_state(&self) -> Result<Box<dyn ControlState>> {
        Ok(Box::new(PowercapControlState {
            natives: self.natives.clone(),
            programmed: vec![],
            start_values: vec![],
        }))
    }
}

/// Files read by one EventSet.
#[derive(Debug)]
pub struct PowercapControlState {
    natives: Arc<Vec<PowercapNative>>,
    programmed: Vec<u32>,
    start_values: Vec<i64>,
}

impl PowercapControlState {
    fn _read_raw(&self) -> Result<Vec<i64>> {
        self.programmed
            .iter()
            .map(|&c| read_sysfs_i64(&self.natives[c as usize].path))
            .collect()
    }
}

impl ControlState for PowercapControlState {
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
        Ok(self
            .programmed
            .iter()
            .enumerate()
            .map(|(pos, &c)| match self.natives[c as usize].wrap {
                Some(wrap) if now[pos] < self.start_values[pos] => {
                    now[pos] + wrap - self.start_values[pos]
                }
                Some(_) => now[pos] - self.start_values[pos],
                None => now[pos],
            })
            .collect())
    }

    fn reset(&mut self) -> Result<()> {
        self.start()
    }

    fn write(&mut self, values: &[i64]) -> Result<()> {
        for (&c, value) in self.programmed.iter().zip(values) {
            let n = &self.natives[c as usize];
            if n.writable {
                debug!("Writing {} to {:?}", value, n.path);
                std::fs::write(&n.path, value.to_string())?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn _fixture(name: &str) -> PathBuf {
        let root = std::env::temp_dir().join(format!("papi-powercap-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&root);
        let pkg = root.join("intel-rapl:0");
        let core = root.join("intel-rapl:0:0");
        std::fs::create_dir_all(&pkg).unwrap();
        std::fs::create_dir_all(&core).unwrap();
        std::fs::create_dir_all(root.join("dtpm")).unwrap();
        for (dir, name) in &[(&pkg, "package-0"), (&core, "core")] {
            std::fs::write(dir.join("name"), format!("{}\n", name)).unwrap();
            std::fs::write(dir.join("energy_uj"), "1000\n").unwrap();
            std::fs::write(dir.join("max_energy_range_uj"), "5000\n").unwrap();
        }
        std::fs::write(pkg.join("constraint_0_power_limit_uw"), "15000000\n").unwrap();
        std::fs::write(pkg.join("constraint_0_time_window_us"), "28000000\n").unwrap();
        root
    }

    #[test]
    fn test_zone_suffix() {
        assert_eq!(_zone_suffix(Path::new("/x/intel-rapl:1")).unwrap(), "ZONE1");
        assert_eq!(_zone_suffix(Path::new("/x/intel-rapl:1:2")).unwrap(), "ZONE1_SUBZONE2");
        assert!(_zone_suffix(Path::new("/x/intel-rapl:a")).is_none());
        assert!(_zone_suffix(Path::new("/x/dtpm")).is_none());
    }

    #[test]
    fn test_zones_become_natives() {
        let root = _fixture("natives");
        let mut cmp = PowercapComponent::with_root(&root);
        cmp.init_component(2).unwrap();
        assert_eq!(cmp.num_native_events(), 2 + 2 + 2);
        let code = cmp.name_to_native("POWER_LIMIT_A_UW:ZONE0").unwrap();
        assert!(cmp.native_info(code).unwrap().writable);
        assert!(cmp.name_to_native("ENERGY_UJ:ZONE0_SUBZONE0").is_ok());
        assert!(cmp.name_to_native("POWER_LIMIT_B_UW:ZONE0").is_err());
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn test_energy_delta_and_write() {
        let root = _fixture("energy");
        let mut cmp = PowercapComponent::with_root(&root);
        cmp.init_component(0).unwrap();
        let energy = cmp.name_to_native("ENERGY_UJ:ZONE0").unwrap();
        let limit = cmp.name_to_native("POWER_LIMIT_A_UW:ZONE0").unwrap();
        let mut cs = cmp.new_control_state().unwrap();
        let mut slots = vec![NativeSlot::new(energy), NativeSlot::new(limit)];
        cs.update(&mut slots).unwrap();
        cs.start().unwrap();
        std::fs::write(root.join("intel-rapl:0/energy_uj"), "1500\n").unwrap();
        assert_eq!(cs.read().unwrap(), vec![500, 15_000_000]);
        // The counter wrapped at max_energy_range_uj.
        std::fs::write(root.join("intel-rapl:0/energy_uj"), "200\n").unwrap();
        assert_eq!(cs.read().unwrap()[0], 4200);
        cs.write(&[0, 10_000_000]).unwrap();
        assert_eq!(cs.read().unwrap()[1], 10_000_000);
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn test_missing_root_disables() {
        let mut cmp = PowercapComponent::with_root("/nonexistent/powercap");
        assert!(cmp.init_component(0).is_err());
    }
}

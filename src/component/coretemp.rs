//! Temperature, voltage and fan sensors of the linux hwmon interface (`/sys/class/hwmon`).
//!
//! Every `{temp,in,fan}<n>_input` file becomes a native named `hwmon<k>:<file>`. Readings are
//! absolute: millidegrees Celsius, millivolts and RPM.

use crate::component::*;
use log::debug;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Default location of the hwmon class.
pub const HWMON_ROOT: &str = "/sys/class/hwmon";

#[derive(Debug, Clone)]
struct Sensor {
    name: String,
    desc: String,
    units: &'static str,
    path: PathBuf,
}

/// The coretemp component.
#[derive(Debug)]
pub struct CoretempComponent {
    info: ComponentInfo,
    root: PathBuf,
    sensors: Arc<Vec<Sensor>>,
}

impl Default for CoretempComponent {
    fn default() -> Self {
        CoretempComponent::with_root(HWMON_ROOT)
    }
}

impl CoretempComponent {
    /// Component reading sensors below `root` instead of the default location.
    pub fn with_root<P: AsRef<Path>>(root: P) -> Self {
        CoretempComponent {
            info: ComponentInfo {
                name: "coretemp".into(),
                short_name: "hw".into(),
                description: "Linux hwmon temperature and other info".into(),
                default_domain: Domain::ALL,
                available_domains: Domain::ALL,
                default_granularity: Granularity::SYS,
                available_granularities: Granularity::SYS,
                ..ComponentInfo::default()
            },
            root: root.as_ref().to_path_buf(),
            sensors: Arc::new(vec![]),
        }
    }
}

fn _read_label(path: &Path) -> Option<String> {
    std::fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}

impl Component for CoretempComponent {
    fn info(&self) -> &ComponentInfo {
        &self.info
    }

    fn info_mut(&mut self) -> &mut ComponentInfo {
        &mut self.info
    }

    fn init_component(&mut self, cidx: usize) -> Result<()> {
        let re = Regex::new(r"^(temp|in|fan)(\d+)_input$")?;
        let mut files: Vec<PathBuf> = glob::glob(&format!("{}/hwmon*/*_input", self.root.display()))?
            .filter_map(std::result::Result::ok)
            .collect();
        files.sort();

        let mut sensors = vec![];
        for path in files {
            let dir = match path.parent() {
                Some(d) => d.to_path_buf(),
                None => continue,
            };
            let (hwmon, file) = match (
                dir.file_name().and_then(|n| n.to_str()),
                path.file_name().and_then(|n| n.to_str()),
            ) {
                (Some(h), Some(f)) => (h.to_string(), f.to_string()),
                _ => continue,
            };
            let caps = match re.captures(&file) {
                Some(c) => c,
                None => continue,
            };
            let kind = &caps[1];
            let units = match kind {
                "temp" => "mC",
                "in" => "mV",
                _ => "RPM",
            };
            let chip = _read_label(&dir.join("name")).unwrap_or_default();
            let label = _read_label(&dir.join(format!("{}{}_label", kind, &caps[2])))
                .unwrap_or_else(|| file.clone());
            sensors.push(Sensor {
                name: format!("{}:{}", hwmon, file),
                desc: format!("{} {}", chip, label).trim().to_string(),
                units,
                path,
            });
        }
        if sensors.is_empty() {
            return Err(Error::NotSupported);
        }
        debug!("coretemp component with {} sensors", sensors.len());
        self.info.cmp_index = cidx;
        self.info.num_cntrs = sensors.len();
        self.info.num_mpx_cntrs = sensors.len();
        self.sensors = Arc::new(sensors);
        Ok(())
    }

    fn num_native_events(&self) -> usize {
        self.sensors.len()
    }

    fn native_info(&self, code: u32) -> Result<NativeEventInfo> {
        let s = self.sensors.get(code as usize).ok_or(Error::NoEvent)?;
        Ok(NativeEventInfo {
            code,
            symbol: s.name.clone(),
            description: s.desc.clone(),
            units: s.units.into(),
            data_type: DataType::Int64,
            writable: false,
        })
    }

    fn new_control_state(&self) -> Result<Box<dyn ControlState>> {
        Ok(Box::new(CoretempControlState {
            sensors: self.sensors.clone(),
            programmed: vec![],
        }))
    }
}

/// Sensors read by one EventSet.
#[derive(Debug)]
pub struct CoretempControlState {
    sensors: Arc<Vec<Sensor>>,
    programmed: Vec<u32>,
}

impl ControlState for CoretempControlState {
    fn update(&mut self, natives: &mut [NativeSlot]) -> Result<()> {
        if natives.iter().any(|n| n.code as usize >= self.sensors.len()) {
            return Err(Error::NoEvent);
        }
        self.programmed = natives.iter().map(|n| n.code).collect();
        for (pos, n) in natives.iter_mut().enumerate() {
            n.position = Some(pos);
        }
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    fn read(&mut self) -> Result<Vec<i64>> {
        self.programmed
            .iter()
            .map(|&c| read_sysfs_i64(&self.sensors[c as usize].path))
            .collect()
    }

    fn reset(&mut self) -> Result<()> {
        Ok(())
    }
}

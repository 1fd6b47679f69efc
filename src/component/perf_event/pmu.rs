//! Utilities to read CPU specific PMU events from their JSON descriptions.
//!
//! The directory layout is the one used by the linux `perf` tool (`tools/perf/pmu-events/arch`):
//! a `mapfile.csv` maps a CPU identification regex to a file or directory of JSON event lists.

use crate::perf::ffi;
use crate::Result;
use log::{debug, error};
use regex::Regex;
use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Raw event format represented in the JSON event files.
pub type RawEvent = HashMap<String, serde_json::Value>;

/// A core PMU event described in the JSON event files.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PmuEvent {
    /// Name of the event.
    pub name: String,
    /// Topic of the event.
    ///
    /// This is the name of the JSON file from which the event was parsed.
    pub topic: String,
    /// Brief summary of the event.
    pub desc: String,
    /// Raw `config` of the event for a `PERF_TYPE_RAW` perf event.
    pub config: u64,
    /// Value for `config1`, used by offcore response and load latency events.
    pub config1: u64,
}

/// Check if `entry` is a JSON file.
fn _is_json_file(entry: &std::fs::DirEntry) -> bool {
    let is_file = entry.metadata().map(|m| m.is_file()).unwrap_or(false);
    is_file && entry.file_name().to_string_lossy().ends_with(".json")
}

fn _json_in_dir(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .map(|x| {
            x.filter_map(std::result::Result::ok)
                .filter(_is_json_file)
                .map(|e| e.path())
                .collect()
        })
        .unwrap_or_else(|_| vec![])
}

fn _get_str(raw: &RawEvent, key: &str) -> Option<String> {
    match raw.get(key)? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn _parse_num(s: &str) -> Result<u64> {
    let s = s.split(',').next().unwrap_or("").trim();
    if s.starts_with("0x") || s.starts_with("0X") {
        Ok(u64::from_str_radix(&s[2..], 16)?)
    } else {
        Ok(s.parse::<u64>()?)
    }
}

impl PmuEvent {
    /// Create a new `PmuEvent` from a `RawEvent`.
    ///
    /// Returns `None` for metrics and uncore events, which are not core counters.
    pub fn from_raw_event(raw: &RawEvent) -> Result<Option<Self>> {
        let name = match _get_str(raw, "EventName") {
            Some(n) => n,
            None => return Ok(None),
        };
        if _get_str(raw, "Unit").is_some() {
            return Ok(None);
        }

        let mut evt = PmuEvent {
            name,
            topic: _get_str(raw, "Topic").unwrap_or_default(),
            desc: _get_str(raw, "BriefDescription").unwrap_or_default(),
            ..PmuEvent::default()
        };
        if let Some(c) = _get_str(raw, "EventCode") {
            evt.config |= _parse_num(&c)? & 0xFF;
        }
        if let Some(c) = _get_str(raw, "ExtSel") {
            evt.config |= _parse_num(&c)? << 21;
        }
        if let Some(u) = _get_str(raw, "UMask") {
            evt.config |= (_parse_num(&u)? & 0xFF) << 8;
        }
        if let Some(c) = _get_str(raw, "CounterMask") {
            evt.config |= (_parse_num(&c)? & 0xFF) << 24;
        }
        if let Some(i) = _get_str(raw, "Invert") {
            if _parse_num(&i)? != 0 {
                evt.config |= 1u64 << 23;
            }
        }
        if let Some(e) = _get_str(raw, "EdgeDetect") {
            if _parse_num(&e)? != 0 {
                evt.config |= 1u64 << 18;
            }
        }
        if let (Some(msr), Some(val)) = (_get_str(raw, "MSRIndex"), _get_str(raw, "MSRValue")) {
            let msr = _parse_num(&msr)?;
            let val = _parse_num(&val)?;
            if msr == 0x1A6 || msr == 0x1A7 {
                evt.config1 = val;
            } else if msr == 0x3F6 {
                evt.config1 = val & 0xFFFF;
            }
        }
        Ok(Some(evt))
    }

    /// Get a `perf_event_attr` corresponding to this event.
    pub fn to_perf_event_attr(&self) -> ffi::perf_event_attr {
        let mut attr = crate::perf::attr_for(ffi::PERF_TYPE_RAW as u32, self.config);
        attr.__bindgen_anon_3.config1 = self.config1;
        attr
    }
}

/// JSON files describing the events of processor `cpu` in directory `path`.
fn _json_files(path: &Path, cpu: &str) -> Result<Vec<PathBuf>> {
    let mapfile = std::fs::File::open(path.join("mapfile.csv"))?;
    let files = BufReader::new(mapfile)
        .lines()
        // Remove bad lines
        .filter_map(std::result::Result::ok)
        // Remove comments and empty lines
        .filter(|l| !l.trim().is_empty() && !l.starts_with('#'))
        // Get filename from file
        .filter_map(|l| {
            let splits: Vec<&str> = l.split(',').collect();
            if splits.len() < 3 {
                return None;
            }
            Regex::new(&format!("^(?:{})", splits[0]))
                .ok()
                .filter(|re| re.is_match(cpu))
                .map(|_| path.join(splits[2]))
        })
        // A mapfile entry is either a file or a directory of files
        .flat_map(|f| {
            if f.is_file() {
                vec![f]
            } else {
                _json_in_dir(&f)
            }
        })
        .collect();
    Ok(files)
}

/// Load the core events of processor `cpu` from the JSON descriptions under `path`.
pub fn load_pmu_events<P: AsRef<Path>>(path: P, cpu: &str) -> Result<Vec<PmuEvent>> {
    let path = path.as_ref();
    let files = _json_files(path, cpu)?;
    debug!("PMU event files for {}: {:?}", cpu, files);

    let mut events = vec![];
    for f in files {
        let s = std::fs::read_to_string(&f)?;
        let mut raw: Vec<RawEvent> = match serde_json::from_str(&s) {
            Ok(v) => v,
            Err(e) => {
                error!("Could not parse JSON file {:?} -- {:?}", f, e);
                continue;
            }
        };
        let topic = f
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        for r in raw.iter_mut() {
            r.entry(String::from("Topic"))
                .or_insert_with(|| serde_json::Value::String(topic.clone()));
            match PmuEvent::from_raw_event(r) {
                Ok(Some(evt)) => events.push(evt),
                Ok(None) => {}
                Err(e) => debug!("Skipping malformed event in {:?} -- {}", f, e),
            }
        }
    }
    Ok(events)
}

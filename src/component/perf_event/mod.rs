//! CPU counters through the linux `perf_event_open` interface.
//!
//! Natives are the generic hardware, software and hardware cache events the kernel exposes on
//! every processor, optionally extended with the raw core events of the local processor read
//! from a directory of JSON PMU descriptions.

use crate::component::*;
use crate::consts::{Domain, Granularity};
use crate::perf::{self, ffi, PerfEvent};
use log::{debug, info, warn};
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;
use std::sync::Arc;

pub mod pmu;

/// Counters available without multiplexing when the processor is unknown.
const DEFAULT_NUM_COUNTERS: usize = 6;
/// Events the kernel accepts in one multiplexed set.
const PERF_EVENT_MAX_MPX_COUNTERS: usize = 64;

const HW_EVENTS: [(&str, u32, &str); 10] = [
    ("PERF_COUNT_HW_CPU_CYCLES", ffi::PERF_COUNT_HW_CPU_CYCLES, "Total cycles"),
    ("PERF_COUNT_HW_INSTRUCTIONS", ffi::PERF_COUNT_HW_INSTRUCTIONS, "Retired instructions"),
    ("PERF_COUNT_HW_CACHE_REFERENCES", ffi::PERF_COUNT_HW_CACHE_REFERENCES, "Cache accesses, usually the last level cache"),
    ("PERF_COUNT_HW_CACHE_MISSES", ffi::PERF_COUNT_HW_CACHE_MISSES, "Cache misses, usually the last level cache"),
    ("PERF_COUNT_HW_BRANCH_INSTRUCTIONS", ffi::PERF_COUNT_HW_BRANCH_INSTRUCTIONS, "Retired branch instructions"),
    ("PERF_COUNT_HW_BRANCH_MISSES", ffi::PERF_COUNT_HW_BRANCH_MISSES, "Mispredicted branch instructions"),
    ("PERF_COUNT_HW_BUS_CYCLES", ffi::PERF_COUNT_HW_BUS_CYCLES, "Bus cycles"),
    ("PERF_COUNT_HW_STALLED_CYCLES_FRONTEND", ffi::PERF_COUNT_HW_STALLED_CYCLES_FRONTEND, "Stalled cycles during issue"),
    ("PERF_COUNT_HW_STALLED_CYCLES_BACKEND", ffi::PERF_COUNT_HW_STALLED_CYCLES_BACKEND, "Stalled cycles during retirement"),
    ("PERF_COUNT_HW_REF_CPU_CYCLES", ffi::PERF_COUNT_HW_REF_CPU_CYCLES, "Total cycles not affected by frequency scaling"),
];

const SW_EVENTS: [(&str, u32, &str); 9] = [
    ("PERF_COUNT_SW_CPU_CLOCK", ffi::PERF_COUNT_SW_CPU_CLOCK, "High resolution per cpu timer"),
    ("PERF_COUNT_SW_TASK_CLOCK", ffi::PERF_COUNT_SW_TASK_CLOCK, "Clock count specific to the task that is running"),
    ("PERF_COUNT_SW_PAGE_FAULTS", ffi::PERF_COUNT_SW_PAGE_FAULTS, "Page faults"),
    ("PERF_COUNT_SW_CONTEXT_SWITCHES", ffi::PERF_COUNT_SW_CONTEXT_SWITCHES, "Context switches"),
    ("PERF_COUNT_SW_CPU_MIGRATIONS", ffi::PERF_COUNT_SW_CPU_MIGRATIONS, "Migrations to a new cpu"),
    ("PERF_COUNT_SW_PAGE_FAULTS_MIN", ffi::PERF_COUNT_SW_PAGE_FAULTS_MIN, "Minor page faults"),
    ("PERF_COUNT_SW_PAGE_FAULTS_MAJ", ffi::PERF_COUNT_SW_PAGE_FAULTS_MAJ, "Major page faults"),
    ("PERF_COUNT_SW_ALIGNMENT_FAULTS", ffi::PERF_COUNT_SW_ALIGNMENT_FAULTS, "Unaligned accesses"),
    ("PERF_COUNT_SW_EMULATION_FAULTS", ffi::PERF_COUNT_SW_EMULATION_FAULTS, "Emulated instructions"),
];

const CACHES: [(&str, u32); 7] = [
    ("L1D", ffi::PERF_COUNT_HW_CACHE_L1D),
    ("L1I", ffi::PERF_COUNT_HW_CACHE_L1I),
    ("LL", ffi::PERF_COUNT_HW_CACHE_LL),
    ("DTLB", ffi::PERF_COUNT_HW_CACHE_DTLB),
    ("ITLB", ffi::PERF_COUNT_HW_CACHE_ITLB),
    ("BPU", ffi::PERF_COUNT_HW_CACHE_BPU),
    ("NODE", ffi::PERF_COUNT_HW_CACHE_NODE),
];

const CACHE_OPS: [(&str, u32); 3] = [
    ("READ", ffi::PERF_COUNT_HW_CACHE_OP_READ),
    ("WRITE", ffi::PERF_COUNT_HW_CACHE_OP_WRITE),
    ("PREFETCH", ffi::PERF_COUNT_HW_CACHE_OP_PREFETCH),
];

const CACHE_RESULTS: [(&str, u32); 2] = [
    ("ACCESS", ffi::PERF_COUNT_HW_CACHE_RESULT_ACCESS),
    ("MISS", ffi::PERF_COUNT_HW_CACHE_RESULT_MISS),
];

/// One native event of the component.
#[derive(Debug, Clone)]
pub struct PerfNative {
    /// Symbolic name.
    pub name: String,
    /// Description.
    pub desc: String,
    /// `perf_event_attr` describing the event.
    pub attr: ffi::perf_event_attr,
}

/// Native events available on every processor.
fn _generic_natives() -> Vec<PerfNative> {
    let mut out = vec![];
    for (name, config, desc) in HW_EVENTS.iter() {
        out.push(PerfNative {
            name: (*name).into(),
            desc: (*desc).into(),
            attr: perf::attr_for(ffi::PERF_TYPE_HARDWARE as u32, u64::from(*config)),
        });
    }
    for (name, config, desc) in SW_EVENTS.iter() {
        out.push(PerfNative {
            name: (*name).into(),
            desc: (*desc).into(),
            attr: perf::attr_for(ffi::PERF_TYPE_SOFTWARE as u32, u64::from(*config)),
        });
    }
    for (cache, cid) in CACHES.iter() {
        for (op, oid) in CACHE_OPS.iter() {
            for (res, rid) in CACHE_RESULTS.iter() {
                out.push(PerfNative {
                    name: format!("PERF_COUNT_HW_CACHE_{}:{}:{}", cache, op, res),
                    desc: format!("{} cache {} {}", cache, op.to_lowercase(), res.to_lowercase()),
                    attr: perf::attr_for(
                        ffi::PERF_TYPE_HW_CACHE as u32,
                        u64::from(*cid) | (u64::from(*oid) << 8) | (u64::from(*rid) << 16),
                    ),
                });
            }
        }
    }
    out
}

/// Number of programmable plus fixed counters of the local processor.
fn _detect_num_counters() -> usize {
    let id = crate::arch::CpuId::detect();
    if id.is_intel() {
        // 4 general purpose counters and 3 fixed counters.
        7
    } else {
        DEFAULT_NUM_COUNTERS
    }
}

/// The CPU component.
#[derive(Debug)]
pub struct PerfEventComponent {
    info: ComponentInfo,
    pmu_events: Option<PathBuf>,
    natives: Arc<Vec<PerfNative>>,
}

impl PerfEventComponent {
    /// New component, adding the JSON PMU events found under `pmu_events` to the natives.
    pub fn new(pmu_events: Option<PathBuf>) -> Self {
        PerfEventComponent {
            info: ComponentInfo {
                name: "perf_event".into(),
                short_name: "perf".into(),
                description: "Linux perf_event CPU counters".into(),
                num_cntrs: DEFAULT_NUM_COUNTERS,
                num_mpx_cntrs: PERF_EVENT_MAX_MPX_COUNTERS,
                default_domain: Domain::USER,
                available_domains: Domain::ALL,
                default_granularity: Granularity::THR,
                available_granularities: Granularity::THR,
                hardware_intr: true,
                kernel_multiplex: true,
                attach: true,
                cpu: true,
                inherit: true,
                ..ComponentInfo::default()
            },
            pmu_events,
            natives: Arc::new(vec![]),
        }
    }
}

impl Default for PerfEventComponent {
    fn default() -> Self {
        PerfEventComponent::new(None)
    }
}

impl Component for PerfEventComponent {
    fn info(&self) -> &ComponentInfo {
        &self.info
    }

    fn info_mut(&mut self) -> &mut ComponentInfo {
        &mut self.info
    }

    fn init_component(&mut self, cidx: usize) -> Result<()> {
        let paranoid = ffi::paranoid_level().map_err(|e| {
            warn!("perf_event is not supported by the kernel -- {}", e);
            Error::NotSupported
        })?;
        if paranoid > 2 {
            warn!("perf_event_paranoid is {}, counters are not accessible", paranoid);
            return Err(Error::Permission);
        }
        if paranoid > 1 {
            self.info.available_domains = Domain::USER;
        }

        let mut natives = _generic_natives();
        if let Some(ref dir) = self.pmu_events {
            let cpu = crate::arch::get_cpu_string();
            match pmu::load_pmu_events(dir, &cpu) {
                Ok(events) => {
                    info!("Loaded {} PMU events for {} from {:?}", events.len(), cpu, dir);
                    natives.extend(events.into_iter().map(|e| PerfNative {
                        attr: e.to_perf_event_attr(),
                        name: e.name,
                        desc: e.desc,
                    }));
                }
                Err(e) => warn!("Could not load PMU events from {:?} -- {}", dir, e),
            }
        }
        self.natives = Arc::new(natives);
        self.info.cmp_index = cidx;
        self.info.num_cntrs = _detect_num_counters();
        debug!(
            "perf_event component with {} natives and {} counters",
            self.natives.len(),
            self.info.num_cntrs
        );
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
            units: String::default(),
            data_type: DataType::UInt64,
            writable: false,
        })
    }

    fn name_to_native(&self, name: &str) -> Result<u32> {
        self.natives
            .iter()
            .position(|n| n.name == name)
            .map(|p| p as u32)
            .ok_or(Error::NoEvent)
    }

    fn new_control_state(&self) -> Result<Box<dyn ControlState>> {
        Ok(Box::new(PerfControlState {
            natives: self.natives.clone(),
            max_counters: self.info.num_mpx_cntrs,
            available_domains: self.info.available_domains,
            programmed: vec![],
            periods: vec![],
            events: vec![],
            domain: self.info.default_domain,
            pid: 0,
            cpu: -1,
            inherit: false,
            multiplexed: false,
        }))
    }
}

/// perf events programmed for one EventSet.
#[derive(Debug)]
pub struct PerfControlState {
    natives: Arc<Vec<PerfNative>>,
    max_counters: usize,
    available_domains: Domain,
    /// Native programmed at each position.
    programmed: Vec<u32>,
    /// Sampling period at each position, `0` when not overflowing.
    periods: Vec<u64>,
    /// Open events, one per position, while started.
    events: Vec<PerfEvent>,
    domain: Domain,
    pid: i32,
    cpu: i32,
    inherit: bool,
    multiplexed: bool,
}

impl PerfControlState {
    /// Open the programmed natives, as one group unless the kernel multiplexes them.
    fn _open(&mut self) -> Result<()> {
        self.events.clear();
        let mut leader = -1;
        for (pos, code) in self.programmed.iter().enumerate() {
            let native = self.natives.get(*code as usize).ok_or(Error::NoEvent)?;
            let mut builder = PerfEvent::build()
                .pid(self.pid)
                .cpuid(self.cpu)
                .domain(self.domain)
                .leader(leader)
                .set_period(self.periods[pos])
                .start_disabled();
            if self.inherit {
                builder = builder.inherit();
            }
            let evt = builder.open(native.attr).map_err(|e| {
                debug!("Could not open {} -- {}", native.name, e);
                e
            })?;
            if !self.multiplexed && pos == 0 {
                leader = evt.file.as_raw_fd();
            }
            self.events.push(evt);
        }
        Ok(())
    }
}

impl ControlState for PerfControlState {
    fn update(&mut self, natives: &mut [NativeSlot]) -> Result<()> {
        if natives.len() > self.max_counters {
            return Err(Error::Conflict);
        }
        if natives.iter().any(|n| n.code as usize >= self.natives.len()) {
            return Err(Error::NoEvent);
        }
        self.events.clear();
        self.programmed = natives.iter().map(|n| n.code).collect();
        self.periods = vec![0; natives.len()];
        for (pos, n) in natives.iter_mut().enumerate() {
            n.position = Some(pos);
        }
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        self._open()?;
        for evt in self.events.iter() {
            evt.reset()?;
        }
        for evt in self.events.iter() {
            evt.enable()?;
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        for evt in self.events.iter() {
            evt.disable()?;
        }
        Ok(())
    }

    fn read(&mut self) -> Result<Vec<i64>> {
        self.events
            .iter()
            .map(|evt| {
                let v = evt.read_value()?;
                let count = if self.multiplexed { v.scaled() } else { v.value };
                Ok(count as i64)
            })
            .collect()
    }

    fn reset(&mut self) -> Result<()> {
        for evt in self.events.iter() {
            evt.reset()?;
        }
        Ok(())
    }

    fn set_domain(&mut self, domain: Domain) -> Result<()> {
        if domain.is_empty() || !self.available_domains.contains(domain) {
            return Err(Error::InvalidDomain);
        }
        self.domain = domain;
        Ok(())
    }

    fn set_granularity(&mut self, granularity: Granularity) -> Result<()> {
        if granularity != Granularity::THR {
            return Err(Error::Invalid);
        }
        Ok(())
    }

    fn attach(&mut self, pid: i32) -> Result<()> {
        self.pid = pid;
        self.cpu = -1;
        Ok(())
    }

    fn detach(&mut self) -> Result<()> {
        self.pid = 0;
        self.cpu = -1;
        Ok(())
    }

    fn set_cpu(&mut self, cpu: u32) -> Result<()> {
        self.pid = -1;
        self.cpu = cpu as i32;
        Ok(())
    }

    fn set_inherit(&mut self, inherit: bool) -> Result<()> {
        self.inherit = inherit;
        Ok(())
    }

    fn set_multiplex(&mut self) -> Result<()> {
        self.multiplexed = true;
        Ok(())
    }

    fn set_overflow(&mut self, position: usize, threshold: u64) -> Result<()> {
        let period = self.periods.get_mut(position).ok_or(Error::Invalid)?;
        *period = threshold;
        Ok(())
    }

    fn take_overflows(&mut self) -> Result<Vec<HardwareOverflow>> {
        let mut out = vec![];
        for (pos, evt) in self.events.iter_mut().enumerate() {
            if let Some(ref mut rb) = evt.ring_buffer {
                for record in rb.drain() {
                    match record {
                        perf::Record::Sample { ip } => out.push(HardwareOverflow {
                            address: ip,
                            positions: 1 << pos,
                        }),
                        perf::Record::Lost { lost } => warn!("Lost {} overflow samples", lost),
                        perf::Record::Other(_) => {}
                    }
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generic_natives() {
        let natives = _generic_natives();
        assert_eq!(natives.len(), 10 + 9 + 7 * 3 * 2);
        let cmp = PerfEventComponent {
            natives: Arc::new(natives),
            ..PerfEventComponent::default()
        };
        let code = cmp.name_to_native("PERF_COUNT_HW_CACHE_L1D:READ:MISS").unwrap();
        let info = cmp.native_info(code).unwrap();
        assert_eq!(info.symbol, "PERF_COUNT_HW_CACHE_L1D:READ:MISS");
        let attr = cmp.natives[code as usize].attr;
        assert_eq!(attr.type_, ffi::PERF_TYPE_HW_CACHE as u32);
        assert_eq!(attr.config, (1 << 16) as u64);
        assert!(cmp.name_to_native("PERF_COUNT_HW_NOPE").is_err());
    }

    #[test]
    fn test_preset_natives_exist() {
        let cmp = PerfEventComponent {
            natives: Arc::new(_generic_natives()),
            ..PerfEventComponent::default()
        };
        let defs =
            crate::events::preset::parse_definitions(crate::events::preset::BUILTIN_DEFINITIONS.as_bytes())
                .unwrap();
        for def in defs {
            for n in def.natives {
                assert!(cmp.name_to_native(&n).is_ok(), "{} is not a native", n);
            }
        }
    }

    #[test]
    fn test_positions_are_sequential() {
        let cmp = PerfEventComponent {
            natives: Arc::new(_generic_natives()),
            ..PerfEventComponent::default()
        };
        let mut cs = cmp.new_control_state().unwrap();
        let mut slots = vec![NativeSlot::new(1), NativeSlot::new(0), NativeSlot::new(12)];
        cs.update(&mut slots).unwrap();
        let positions: Vec<_> = slots.iter().map(|s| s.position).collect();
        assert_eq!(positions, vec![Some(0), Some(1), Some(2)]);
        let mut bad = vec![NativeSlot::new(100_000)];
        assert!(cs.update(&mut bad).is_err());
        assert_eq!(cs.set_domain(Domain(0)).unwrap_err().code(), Error::InvalidDomain.code());
    }

    #[test]
    fn test_count_task_clock() {
        let mut cmp = PerfEventComponent::default();
        if cmp.init_component(0).is_err() {
            return;
        }
        let code = cmp.name_to_native("PERF_COUNT_SW_TASK_CLOCK").unwrap();
        let mut cs = cmp.new_control_state().unwrap();
        let mut slots = vec![NativeSlot::new(code)];
        cs.update(&mut slots).unwrap();
        if cs.start().is_err() {
            // Opening counters is not permitted in every sandbox.
            return;
        }
        let tmp: u64 = (0u64..100_000).map(|x| x ^ 0x55).sum();
        assert!(tmp > 0);
        let values = cs.read().unwrap();
        cs.stop().unwrap();
        assert_eq!(values.len(), 1);
        assert!(values[0] > 0);
    }
}

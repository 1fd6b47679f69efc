//! Counter subsystems plugged into the library.
//!
//! A [`Component`] describes one family of native events (CPU counters, RAPL energy
//! registers, sysfs sensors, ...). Every EventSet bound to a component owns a
//! [`ControlState`] created by it, which programs the counters and reads them back.

use crate::consts::{Domain, Granularity};
use crate::{Error, Result};
use derive_more::Display;

pub mod coretemp;
pub mod example;
pub mod net;
pub mod perf_event;
pub mod powercap;
pub mod rapl;

/// How the value of a native event should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum DataType {
    /// Signed 64 bit integer.
    #[display(fmt = "INT64")]
    Int64,
    /// Unsigned 64 bit integer stored in the `i64` value slot.
    #[display(fmt = "UINT64")]
    UInt64,
    /// `f64` stored bitwise in the `i64` value slot.
    #[display(fmt = "FP64")]
    Fp64,
}

impl Default for DataType {
    fn default() -> Self {
        DataType::Int64
    }
}

/// Static description of a component and its capabilities.
#[derive(Debug, Clone)]
pub struct ComponentInfo {
    /// Name of the component.
    pub name: String,
    /// Short name used in event prefixes.
    pub short_name: String,
    /// Description of the component.
    pub description: String,
    /// Version of the component.
    pub version: String,
    /// Index of this component in the library.
    pub cmp_index: usize,
    /// Number of counters that can be counted simultaneously.
    pub num_cntrs: usize,
    /// Number of counters supported when multiplexing.
    pub num_mpx_cntrs: usize,
    /// Number of preset events resolved on this component.
    pub num_preset_events: usize,
    /// Default counting domain.
    pub default_domain: Domain,
    /// Available counting domains.
    pub available_domains: Domain,
    /// Default counting granularity.
    pub default_granularity: Granularity,
    /// Available counting granularities.
    pub available_granularities: Granularity,
    /// Overflow is delivered by the hardware or kernel.
    pub hardware_intr: bool,
    /// Multiplexing is performed by the kernel.
    pub kernel_multiplex: bool,
    /// Counting can be attached to another thread or process.
    pub attach: bool,
    /// Counting can be attached to a cpu.
    pub cpu: bool,
    /// Counters can be inherited by children.
    pub inherit: bool,
    /// Counters can be read without a system call.
    pub fast_counter_read: bool,
    /// Reason this component was disabled, if it was.
    pub disabled: Option<String>,
}

impl Default for ComponentInfo {
    fn default() -> Self {
        ComponentInfo {
            name: String::default(),
            short_name: String::default(),
            description: String::default(),
            version: String::from("5.5.1.0"),
            cmp_index: 0,
            num_cntrs: 0,
            num_mpx_cntrs: 0,
            num_preset_events: 0,
            default_domain: Domain::USER,
            available_domains: Domain::USER,
            default_granularity: Granularity::THR,
            available_granularities: Granularity::THR,
            hardware_intr: false,
            kernel_multiplex: false,
            attach: false,
            cpu: false,
            inherit: false,
            fast_counter_read: false,
            disabled: None,
        }
    }
}

/// Description of one native event of a component.
#[derive(Debug, Clone, Default)]
pub struct NativeEventInfo {
    /// Component local code of the event.
    pub code: u32,
    /// Symbolic name.
    pub symbol: String,
    /// Description.
    pub description: String,
    /// Units of the counted value.
    pub units: String,
    /// Interpretation of the counted value.
    pub data_type: DataType,
    /// Whether the counter accepts writes.
    pub writable: bool,
}

/// A native event handed to a control state, together with the counter position the control
/// state selected for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeSlot {
    /// Component local code.
    pub code: u32,
    /// Index into the vector returned by [`ControlState::read`].
    pub position: Option<usize>,
}

impl NativeSlot {
    /// An unplaced slot for `code`.
    pub fn new(code: u32) -> Self {
        NativeSlot {
            code,
            position: None,
        }
    }
}

/// Overflow reported by a component that supports interrupts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HardwareOverflow {
    /// Instruction address associated with the overflow.
    pub address: u64,
    /// Bit `p` is set when the counter at position `p` overflowed.
    pub positions: u64,
}

/// A family of native events.
pub trait Component: Send + Sync + std::fmt::Debug {
    /// Static component information.
    fn info(&self) -> &ComponentInfo;

    /// Mutable component information.
    fn info_mut(&mut self) -> &mut ComponentInfo;

    /// Detect the underlying hardware or subsystem.
    ///
    /// An error here disables the component but does not fail library initialisation.
    fn init_component(&mut self, cidx: usize) -> Result<()>;

    /// Release global resources.
    fn shutdown(&self) {}

    /// Number of native events.
    fn num_native_events(&self) -> usize;

    /// Information about the native event with local code `code`.
    fn native_info(&self, code: u32) -> Result<NativeEventInfo>;

    /// Look up a native event by its symbolic name.
    fn name_to_native(&self, name: &str) -> Result<u32> {
        (0..self.num_native_events() as u32)
            .find(|&c| {
                self.native_info(c)
                    .map(|i| i.symbol == name)
                    .unwrap_or(false)
            })
            .ok_or(Error::NoEvent)
    }

    /// Create a fresh control state for an EventSet bound to this component.
    fn new_control_state(&self) -> Result<Box<dyn ControlState>>;
}

/// Per EventSet counter programming for one component.
///
/// Values returned by [`ControlState::read`] are indexed by the positions chosen in
/// [`ControlState::update`].
pub trait ControlState: Send + std::fmt::Debug {
    /// Program the natives in `natives`, choosing a position for each one.
    ///
    /// Returns `Error::Conflict` if they cannot be counted together.
    fn update(&mut self, natives: &mut [NativeSlot]) -> Result<()>;

    /// Start counting.
    fn start(&mut self) -> Result<()>;

    /// Stop counting.
    fn stop(&mut self) -> Result<()>;

    /// Current value of every programmed counter.
    fn read(&mut self) -> Result<Vec<i64>>;

    /// Zero every programmed counter.
    fn reset(&mut self) -> Result<()>;

    /// Load values into the programmed counters.
    fn write(&mut self, _values: &[i64]) -> Result<()> {
        Err(Error::Component)
    }

    /// Restrict counting to `domain`.
    fn set_domain(&mut self, _domain: Domain) -> Result<()> {
        Ok(())
    }

    /// Change counting granularity.
    fn set_granularity(&mut self, _granularity: Granularity) -> Result<()> {
        Ok(())
    }

    /// Count another thread or process.
    fn attach(&mut self, _pid: i32) -> Result<()> {
        Err(Error::Component)
    }

    /// Return to counting the calling thread.
    fn detach(&mut self) -> Result<()> {
        Err(Error::Component)
    }

    /// Count on a specific cpu.
    fn set_cpu(&mut self, _cpu: u32) -> Result<()> {
        Err(Error::Component)
    }

    /// Let children inherit the counters.
    fn set_inherit(&mut self, _inherit: bool) -> Result<()> {
        Err(Error::Component)
    }

    /// Let the kernel multiplex the programmed counters.
    fn set_multiplex(&mut self) -> Result<()> {
        Err(Error::Component)
    }

    /// Program an interrupt every `threshold` events on the counter at `position`.
    ///
    /// A `threshold` of zero removes the interrupt.
    fn set_overflow(&mut self, _position: usize, _threshold: u64) -> Result<()> {
        Err(Error::Component)
    }

    /// Overflows delivered since the last call.
    fn take_overflows(&mut self) -> Result<Vec<HardwareOverflow>> {
        Ok(vec![])
    }
}

/// Components registered by default, in index order.
///
/// The `example` component is only added when `config.example_component` is set.
pub fn default_components(config: &crate::Config) -> Vec<Box<dyn Component>> {
    let mut out: Vec<Box<dyn Component>> = vec![
        Box::new(perf_event::PerfEventComponent::new(config.pmu_events.clone())),
        Box::new(rapl::RaplComponent::default()),
        Box::new(powercap::PowercapComponent::default()),
        Box::new(coretemp::CoretempComponent::default()),
        Box::new(net::NetComponent::default()),
    ];
    if config.example_component {
        out.push(Box::new(example::ExampleComponent::default()));
    }
    out
}

/// Read a sysfs or procfs file holding one integer.
pub(crate) fn read_sysfs_i64<P: AsRef<std::path::Path>>(path: P) -> Result<i64> {
    Ok(std::fs::read_to_string(path)?.trim().parse::<i64>()?)
}

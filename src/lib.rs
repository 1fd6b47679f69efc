//! Portable access to hardware performance counters.
//!
//! Counters are provided by [components](component) (the CPU through `perf_event`, energy
//! through RAPL and powercap, temperatures, network statistics). Events are grouped into
//! [EventSets](EventSet) that are started, read and stopped together, optionally multiplexed
//! in software and with overflow callbacks.
//!
//! ```no_run
//! # fn main() -> papi::Result<()> {
//! let lib = papi::library_init()?;
//! let mut set = lib.create_eventset();
//! set.add_named_event("PAPI_TOT_INS")?;
//! set.add_named_event("PAPI_TOT_CYC")?;
//! set.start()?;
//! // ...
//! let values = set.stop()?;
//! println!("IPC {}", values[0] as f64 / values[1] as f64);
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs, missing_debug_implementations)]

mod errors;
pub use errors::{strerror, Error, Result};

pub mod consts;
pub use consts::*;

mod config;
pub use config::*;

pub(crate) mod alloc;

pub mod component;
pub use component::{Component, ComponentInfo, ControlState, DataType, NativeEventInfo};

pub mod events;
pub use events::{preset, EnumModifier, EventCode, EventInfo, EventKind};

mod eventset;
pub use eventset::{
    Clock, EventSet, ManualClock, OverflowEvent, OverflowHandler, RealClock, MIN_SLICE_NS,
};

mod library;
pub use library::{is_initialized, library, library_init, library_init_with, shutdown};
pub use library::{Library, LibraryBuilder};

pub mod hl;

pub mod sysinfo;
pub use sysinfo::{dmem_info, hardware_info, DmemInfo, HardwareInfo};

pub mod timers;

pub mod perf;
pub use perf::ffi;

/// Architecture specific access to the processor.
#[cfg(target_arch = "x86_64")]
#[path = "arch/x86_64/mod.rs"]
pub mod arch;

/// Architecture specific access to the processor.
#[cfg(not(target_arch = "x86_64"))]
#[path = "arch/generic/mod.rs"]
pub mod arch;

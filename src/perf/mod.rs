//! Interfaces that deal with the kernel perf_event subsystem.

pub mod ffi;

mod event;
pub use event::{attr_for, PerfEvent, PerfEventBuilder, PerfEventValue};

mod mmap;
pub(crate) use mmap::PAGE_SIZE;
pub use mmap::{Record, RingBuffer};

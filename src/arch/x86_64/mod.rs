//! Utilities specific to the x86_64 architecture.

mod msr;
pub use msr::*;

mod cpuid;
pub use cpuid::*;

/// Read the time stamp counter.
pub fn read_tsc() -> Option<u64> {
    Some(unsafe { core::arch::x86_64::_rdtsc() })
}

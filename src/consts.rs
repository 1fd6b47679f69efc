//! Flag types, event code layout and version constants shared across the library.

use derive_more::{BitAnd, BitAndAssign, BitOr, BitOrAssign, Display, From, Into};

macro_rules! flag_type {
    ($(#[$outer:meta])* $name: ident { $($(#[$inner:meta])* $flag: ident = $val: expr,)* }) => {
        $(#[$outer])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, Default,
            BitAnd, BitOr, BitAndAssign, BitOrAssign, From, Into
        )]
        pub struct $name(pub u32);

        impl $name {
            $(
                $(#[$inner])*
                pub const $flag: $name = $name($val);
            )*

            /// Raw bit pattern.
            #[inline]
            pub fn bits(self) -> u32 {
                self.0
            }

            /// Check that every bit of `other` is set in `self`.
            #[inline]
            pub fn contains(self, other: $name) -> bool {
                self.0 & other.0 == other.0 && other.0 != 0
            }

            /// Check whether any bit of `other` is set in `self`.
            #[inline]
            pub fn intersects(self, other: $name) -> bool {
                self.0 & other.0 != 0
            }

            /// Clear the bits of `other`.
            #[inline]
            pub fn remove(&mut self, other: $name) {
                self.0 &= !other.0;
            }

            /// `true` when no bit is set.
            #[inline]
            pub fn is_empty(self) -> bool {
                self.0 == 0
            }
        }
    };
}

flag_type!(
    /// Execution state of an EventSet.
    State {
        /// EventSet stopped.
        STOPPED = 0x01,
        /// EventSet running.
        RUNNING = 0x02,
        /// EventSet temporarily disabled by the library.
        PAUSED = 0x04,
        /// EventSet defined, but not initialized.
        NOT_INIT = 0x08,
        /// EventSet has overflowing enabled.
        OVERFLOWING = 0x10,
        /// EventSet has profiling enabled.
        PROFILING = 0x20,
        /// EventSet has multiplexing enabled.
        MULTIPLEXING = 0x40,
        /// EventSet is attached to another thread or process.
        ATTACHED = 0x80,
        /// EventSet is attached to a specific cpu.
        CPU_ATTACHED = 0x100,
    }
);

flag_type!(
    /// Privilege levels counted by an EventSet.
    Domain {
        /// User context counted.
        USER = 0x1,
        /// Kernel context counted.
        KERNEL = 0x2,
        /// Exception and transient mode counted.
        OTHER = 0x4,
        /// Supervisor or hypervisor context counted.
        SUPERVISOR = 0x8,
        /// All contexts counted.
        ALL = 0xF,
    }
);

flag_type!(
    /// Scope of the counting performed by an EventSet.
    Granularity {
        /// Count each individual thread.
        THR = 0x1,
        /// Count each individual process.
        PROC = 0x2,
        /// Count each individual process group.
        PROCG = 0x4,
        /// Count the current CPU.
        SYS = 0x8,
        /// Count all CPUs individually.
        SYS_CPU = 0x10,
    }
);

flag_type!(
    /// Options accepted when programming an overflow.
    OverflowFlags {
        /// Force using software overflow even when the component supports interrupts.
        FORCE_SW = 0x40,
        /// Use hardware overflow interrupts.
        HARDWARE = 0x80,
    }
);

flag_type!(
    /// Options accepted when turning on multiplexing.
    MultiplexFlags {
        /// Force software multiplexing even if the component multiplexes in the kernel.
        FORCE_SW = 0x1,
    }
);

/// Version of the interface implemented by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display)]
#[display(fmt = "{}.{}.{}.{}", major, minor, revision, increment)]
pub struct Version {
    /// Major number.
    pub major: u8,
    /// Minor number.
    pub minor: u8,
    /// Revision number.
    pub revision: u8,
    /// Increment number.
    pub increment: u8,
}

impl Version {
    /// Version of this library.
    pub const CURRENT: Version = Version {
        major: 5,
        minor: 5,
        revision: 1,
        increment: 0,
    };

    /// Packed representation `maj<<24 | min<<16 | rev<<8 | inc`.
    pub fn packed(self) -> u32 {
        (u32::from(self.major) << 24)
            | (u32::from(self.minor) << 16)
            | (u32::from(self.revision) << 8)
            | u32::from(self.increment)
    }

    /// Unpack a packed version number.
    pub fn from_packed(v: u32) -> Self {
        Version {
            major: (v >> 24) as u8,
            minor: (v >> 16) as u8,
            revision: (v >> 8) as u8,
            increment: v as u8,
        }
    }
}

/// Bit identifying preset event codes.
pub const PRESET_MASK: u32 = 0x8000_0000;
/// Bit identifying native event codes.
pub const NATIVE_MASK: u32 = 0x4000_0000;
/// Bits holding the component index of a native code.
pub const COMPONENT_MASK: u32 = 0x3C00_0000;
/// Shift of the component index inside a native code.
pub const COMPONENT_SHIFT: u32 = 26;
/// Bits holding the event index.
pub const EVENT_INDEX_MASK: u32 = 0x03FF_FFFF;
/// Maximum number of components in one library instance.
pub const MAX_COMPONENTS: usize = 16;
/// Maximum number of native events composing a derived event.
pub const EVENTS_IN_DERIVED_EVENT: usize = 8;
/// Maximum number of events in a software multiplexed EventSet.
pub const MAX_SW_MPX_EVENTS: usize = 32;
/// Default software multiplexing and overflow interval in microseconds.
pub const DEFAULT_INTERVAL_US: u64 = 10_000;

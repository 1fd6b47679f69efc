//! Utilities for creating/opening perf events.

use crate::consts::Domain;
use crate::perf::{ffi, RingBuffer, PAGE_SIZE};
use crate::Result;
use byteorder::NativeEndian;
use byteorder::ReadBytesExt;
use nix::libc;
use std::convert::TryInto;
use std::os::unix::io::{AsRawFd, FromRawFd};

/// A schedulable and readable performance counter.
///
/// Represents a readable perf event which can be used to collect data directly from the kernel,
/// or through the memory mapped ring buffer when it was opened for sampling.
#[derive(Debug)]
pub struct PerfEvent {
    /// Attributes corresponding to this event.
    pub attr: ffi::perf_event_attr,
    /// File corresponding to the underlying perf event.
    pub file: std::fs::File,
    /// Ring buffer corresponding to underlying perf event.
    pub ring_buffer: Option<RingBuffer>,
}

impl PerfEvent {
    /// Construct a new perf event using the associated builder,
    pub fn build() -> PerfEventBuilder {
        PerfEventBuilder::default()
    }

    /// Enable counting for event.
    pub fn enable(&self) -> Result<()> {
        unsafe {
            ffi::perf_event_ioc_enable(self.file.as_raw_fd())?;
        }
        Ok(())
    }

    /// Disable counting for event.
    pub fn disable(&self) -> Result<()> {
        unsafe {
            ffi::perf_event_ioc_disable(self.file.as_raw_fd())?;
        }
        Ok(())
    }

    /// Reset counting for event.
    pub fn reset(&self) -> Result<()> {
        unsafe {
            ffi::perf_event_ioc_reset(self.file.as_raw_fd())?;
        }
        Ok(())
    }

    /// Read the counter, including the enabled and running times.
    pub fn read_value(&self) -> Result<PerfEventValue> {
        let mut bytes = [0u8; 24];
        let n = nix::unistd::read(self.file.as_raw_fd(), &mut bytes)?;
        if n < bytes.len() {
            return Err(crate::Error::Lost);
        }
        PerfEventValue::from_cursor(&mut std::io::Cursor::new(&bytes[..]))
    }
}

/// Value of a counting `PerfEvent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PerfEventValue {
    /// Counter measurement.
    pub value: u64,
    /// Total time spent enabled.
    pub time_enabled: u64,
    /// Total time spent running.
    ///
    /// When the kernel multiplexes events, `time_enabled` and `time_running` are used to scale
    /// an estimated value for the count.
    pub time_running: u64,
}

impl PerfEventValue {
    /// Parse this structure from the in-memory format provided by the kernel.
    pub fn from_cursor<T>(ptr: &mut std::io::Cursor<T>) -> Result<Self>
    where
        std::io::Cursor<T>: byteorder::ReadBytesExt,
    {
        Ok(PerfEventValue {
            value: ptr.read_u64::<NativeEndian>()?,
            time_enabled: ptr.read_u64::<NativeEndian>()?,
            time_running: ptr.read_u64::<NativeEndian>()?,
        })
    }

    /// Count scaled by the fraction of the enabled time the event actually ran.
    pub fn scaled(&self) -> u64 {
        if self.time_running == 0 || self.time_running >= self.time_enabled {
            self.value
        } else {
            (self.value as f64 * self.time_enabled as f64 / self.time_running as f64) as u64
        }
    }
}

/// Helper struct to build a `PerfEvent` object.
#[derive(Debug)]
pub struct PerfEventBuilder {
    /// Target process ID.
    ///
    /// Defaults to current thread.
    pid: libc::pid_t,
    /// Target CPU ID.
    ///
    /// Defaults to all CPUs.
    cpuid: libc::c_int,
    /// File descriptor for the group leader event.
    ///
    /// Defaults to none.
    leader: libc::c_int,
    /// Sampling period, `0` for a pure counter.
    period: u64,
    /// Children inherit the counter.
    ///
    /// Defaults to `false`.
    inherit: bool,
    /// Should start the counter disabled.
    ///
    /// Defaults to  `false`.
    start_disabled: bool,
    /// Privilege levels to count.
    ///
    /// Defaults to user only.
    domain: Domain,
    /// Size of the ring buffer when sampling, rounded up to a power of two number of pages.
    requested_size: usize,
}

impl Default for PerfEventBuilder {
    fn default() -> Self {
        PerfEventBuilder {
            pid: 0,
            cpuid: -1,
            leader: -1,
            period: 0,
            inherit: false,
            start_disabled: false,
            domain: Domain::USER,
            requested_size: (1 << 4) * *PAGE_SIZE,
        }
    }
}

macro_rules! builder_pattern {
    ($(#[$outer:meta])* $var_name: ident : $var_type: ty) => {
        builder_pattern!($(#[$outer])* $var_name => $var_name: $var_type);
    };
    ($(#[$outer:meta])* $name: ident => $var_name: ident : $var_type: ty) => {
        $(#[$outer])*
        pub fn $name(mut self, $var_name: $var_type) -> Self {
            self.$var_name = $var_name;
            self
        }
    };
}

macro_rules! builder_pattern_bool {
    ($(#[$outer:meta])* $var_name: ident) => {
        builder_pattern_bool!($(#[$outer])* $var_name => $var_name);
    };
    ($(#[$outer:meta])* $name: ident => $var_name: ident) => {
        $(#[$outer])*
        pub fn $name(mut self) -> Self {
            self.$var_name = true;
            self
        }
    };
}

impl PerfEventBuilder {
    /// Set the fields of an perf_event_attr based on this builder.
    fn _set_attr_config(&self, attr: &mut ffi::perf_event_attr) {
        attr.size = std::mem::size_of::<ffi::perf_event_attr>() as u32;
        attr.read_format = ffi::PERF_FORMAT_TOTAL_TIME_ENABLED as u64
            | ffi::PERF_FORMAT_TOTAL_TIME_RUNNING as u64;
        if self.period > 0 {
            attr.sample_type = ffi::PERF_SAMPLE_IP as u64;
            attr.__bindgen_anon_1.sample_period = self.period;
            attr.__bindgen_anon_2.wakeup_events = 1;
        }
        if self.start_disabled {
            attr.set_disabled(1);
        }
        if !self.domain.intersects(Domain::USER) {
            attr.set_exclude_user(1);
        }
        if !self.domain.intersects(Domain::KERNEL) {
            attr.set_exclude_kernel(1);
        }
        if !self.domain.intersects(Domain::SUPERVISOR) {
            attr.set_exclude_hv(1);
        }
        if !self.domain.intersects(Domain::OTHER) {
            attr.set_exclude_idle(1);
        }
        if self.inherit {
            attr.set_inherit(1);
        }
    }

    /// Open the event described by `base_event_attr` with the settings of this builder.
    pub fn open(&self, base_event_attr: ffi::perf_event_attr) -> Result<PerfEvent> {
        let mut attr = base_event_attr;
        self._set_attr_config(&mut attr);

        // Open file corresponding to perf_event_attr
        let fd = ffi::perf_event_open(
            &attr,
            self.pid,
            self.cpuid,
            self.leader,
            ffi::PERF_FLAG_FD_CLOEXEC as _,
        )?;
        let file = unsafe { std::fs::File::from_raw_fd(fd) };

        // Get ringbuffer corresponding to the fd
        let ring_buffer = if self.period > 0 {
            let pages = (self.requested_size + *PAGE_SIZE - 1) / *PAGE_SIZE;
            Some(RingBuffer::new(fd, pages.next_power_of_two())?)
        } else {
            None
        };

        Ok(PerfEvent {
            attr,
            file,
            ring_buffer,
        })
    }

    builder_pattern!(
        /// Set process to be monitored.
        ///
        /// Set `0` for current thread and `-1` for whole system.
        pid: libc::pid_t
    );

    builder_pattern!(
        /// Set CPU to be monitored.
        ///
        /// Set `-1` for any CPU.
        cpuid: libc::c_int
    );

    builder_pattern!(
        /// Set the file descriptor of the group leader.
        ///
        /// Set `-1` to open the event outside of any group.
        leader: libc::c_int
    );

    builder_pattern!(
        /// Set sampling period. Events with a non zero period get a ring buffer.
        set_period => period: u64
    );

    builder_pattern!(
        /// Set the privilege levels to count.
        domain: Domain
    );

    builder_pattern_bool!(
        /// Inherit to children processes.
        inherit
    );

    builder_pattern_bool!(
        /// Start the counter disabled.
        start_disabled
    );
}

/// Build a `perf_event_attr` for the event `config` of PMU `type_`.
pub fn attr_for(type_: u32, config: u64) -> ffi::perf_event_attr {
    let mut attr = ffi::perf_event_attr::default();
    attr.type_ = type_;
    attr.config = config;
    attr.size = std::mem::size_of::<ffi::perf_event_attr>()
        .try_into()
        .unwrap_or(0);
    attr
}

//! Software multiplexing of more natives than a component can count at once.
//!
//! Every native gets its own control state. Only one of them counts at any time and the ticker
//! of the EventSet rotates them in round robin. The value of a native is extrapolated from the
//! rate it showed while it was counting:
//!
//! ```text
//! estimate = measured + rate * (elapsed - active)
//! ```
//!
//! where `measured` is what the counter saw during its own slices, `active` the time it spent
//! counting and `elapsed` the time since the multiplexer was started or reset.

use crate::component::{ControlState, NativeSlot};
use crate::{Error, Result};
use log::debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Slices shorter than this do not update the rate of a native, in nanoseconds.
pub const MIN_SLICE_NS: u64 = 10_000;

/// Source of time for multiplex estimation.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current time in nanoseconds from an arbitrary origin.
    fn now_ns(&self) -> u64;
}

/// Monotonic wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealClock;

impl Clock for RealClock {
    fn now_ns(&self) -> u64 {
        crate::timers::real_nsec() as u64
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Clock starting at `ns`.
    pub fn new(ns: u64) -> Self {
        ManualClock {
            now: AtomicU64::new(ns),
        }
    }

    /// Move the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_nanos() as u64, Ordering::SeqCst);
    }

    /// Set the clock to `ns`.
    pub fn set(&self, ns: u64) {
        self.now.store(ns, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ns(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
struct MpxEvent {
    code: u32,
    control: Box<dyn ControlState>,
    /// Position of the native in the values of its own control state.
    position: usize,
    measured: i64,
    active_ns: u64,
    /// Count per nanosecond of the last slice long enough to be trusted.
    rate: f64,
}

impl MpxEvent {
    fn _read(&mut self) -> Result<i64> {
        Ok(self.control.read()?.get(self.position).copied().unwrap_or(0))
    }

    fn _estimate(&self, live: i64, active_ns: u64, elapsed_ns: u64) -> i64 {
        let missing = elapsed_ns.saturating_sub(active_ns) as f64;
        self.measured + live + (self.rate * missing).round() as i64
    }
}

/// Time slicing of natives of one component.
#[derive(Debug)]
pub(crate) struct Multiplexer {
    clock: Arc<dyn Clock>,
    events: Vec<MpxEvent>,
    active: usize,
    start_ns: u64,
    slice_start_ns: u64,
    running: bool,
}

impl Multiplexer {
    pub(crate) fn new(clock: Arc<dyn Clock>) -> Self {
        Multiplexer {
            clock,
            events: vec![],
            active: 0,
            start_ns: 0,
            slice_start_ns: 0,
            running: false,
        }
    }

    /// Replace the multiplexed natives. Each one comes with a fresh control state.
    pub(crate) fn program(&mut self, natives: Vec<(u32, Box<dyn ControlState>)>) -> Result<()> {
        if self.running {
            return Err(Error::IsRunning);
        }
        let mut events = Vec::with_capacity(natives.len());
        for (code, mut control) in natives {
            let mut slot = [NativeSlot::new(code)];
            control.update(&mut slot)?;
            events.push(MpxEvent {
                code,
                control,
                position: slot[0].position.ok_or(Error::Bug)?,
                measured: 0,
                active_ns: 0,
                rate: 0.0,
            });
        }
        self.events = events;
        self.active = 0;
        Ok(())
    }

    /// Number of multiplexed natives.
    pub(crate) fn len(&self) -> usize {
        self.events.len()
    }

    /// Run `f` on the control state of every native.
    pub(crate) fn for_each_control<F>(&mut self, mut f: F) -> Result<()>
    where
        F: FnMut(&mut dyn ControlState) -> Result<()>,
    {
        for ev in self.events.iter_mut() {
            f(ev.control.as_mut())?;
        }
        Ok(())
    }

    fn _start_active(&mut self, now: u64) -> Result<()> {
        self.slice_start_ns = now;
        if let Some(ev) = self.events.get_mut(self.active) {
            ev.control.reset()?;
            ev.control.start()?;
        }
        Ok(())
    }

    /// Close the slice of the active native at `now`.
    fn _close_slice(&mut self, now: u64) -> Result<()> {
        let slice = now.saturating_sub(self.slice_start_ns);
        if let Some(ev) = self.events.get_mut(self.active) {
            let count = ev._read()?;
            ev.control.stop()?;
            if slice >= MIN_SLICE_NS {
                ev.rate = count as f64 / slice as f64;
            }
            ev.measured += count;
            ev.active_ns += slice;
        }
        Ok(())
    }

    /// Zero every estimate and start counting the first native.
    pub(crate) fn start(&mut self) -> Result<()> {
        if self.events.is_empty() {
            return Err(Error::Invalid);
        }
        let now = self.clock.now_ns();
        for ev in self.events.iter_mut() {
            ev.measured = 0;
            ev.active_ns = 0;
            ev.rate = 0.0;
        }
        self.start_ns = now;
        self.active = 0;
        self._start_active(now)?;
        self.running = true;
        Ok(())
    }

    /// Hand the counters to the next native.
    pub(crate) fn rotate(&mut self) -> Result<()> {
        if !self.running {
            return Err(Error::NotRunning);
        }
        let now = self.clock.now_ns();
        self._close_slice(now)?;
        self.active = (self.active + 1) % self.events.len();
        debug!(
            "Multiplexer switched to native {:#x}",
            self.events[self.active].code
        );
        self._start_active(now)
    }

    /// Current estimate of every native, in programming order.
    pub(crate) fn read(&mut self) -> Result<Vec<i64>> {
        if !self.running {
            return Err(Error::NotRunning);
        }
        let now = self.clock.now_ns();
        let elapsed = now.saturating_sub(self.start_ns);
        let slice = now.saturating_sub(self.slice_start_ns);
        let active = self.active;
        let mut out = Vec::with_capacity(self.events.len());
        for (i, ev) in self.events.iter_mut().enumerate() {
            out.push(if i == active {
                let live = ev._read()?;
                ev._estimate(live, ev.active_ns + slice, elapsed)
            } else {
                ev._estimate(0, ev.active_ns, elapsed)
            });
        }
        Ok(out)
    }

    /// Restart every estimate from zero, keeping the learnt rates.
    pub(crate) fn reset(&mut self) -> Result<()> {
        if !self.running {
            return Err(Error::NotRunning);
        }
        let now = self.clock.now_ns();
        for ev in self.events.iter_mut() {
            ev.measured = 0;
            ev.active_ns = 0;
        }
        self.start_ns = now;
        self._start_active(now)
    }

    /// Stop counting and return the final estimates.
    pub(crate) fn stop(&mut self) -> Result<Vec<i64>> {
        let values = self.read()?;
        let now = self.clock.now_ns();
        self._close_slice(now)?;
        self.running = false;
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Counter growing `per_ns` every nanosecond of the manual clock while started.
    #[derive(Debug)]
    struct Ramp {
        clock: Arc<ManualClock>,
        per_ns: i64,
        started: Option<u64>,
        acc: i64,
    }

    impl Ramp {
        fn boxed(clock: &Arc<ManualClock>, per_ns: i64) -> Box<dyn ControlState> {
            Box::new(Ramp {
                clock: clock.clone(),
                per_ns,
                started: None,
                acc: 0,
            })
        }
    }

    impl ControlState for Ramp {
        fn update(&mut self, natives: &mut [NativeSlot]) -> Result<()> {
            natives[0].position = Some(0);
            Ok(())
        }

        fn start(&mut self) -> Result<()> {
            self.started = Some(self.clock.now_ns());
            Ok(())
        }

        fn stop(&mut self) -> Result<()> {
            self.acc = self.read()?[0];
            self.started = None;
            Ok(())
        }

        fn read(&mut self) -> Result<Vec<i64>> {
            let live = self
                .started
                .map(|s| (self.clock.now_ns() - s) as i64 * self.per_ns)
                .unwrap_or(0);
            Ok(vec![self.acc + live])
        }

        fn reset(&mut self) -> Result<()> {
            self.acc = 0;
            if self.started.is_some() {
                self.started = Some(self.clock.now_ns());
            }
            Ok(())
        }
    }

    fn _mpx(clock: &Arc<ManualClock>, rates: &[i64]) -> Multiplexer {
        let mut mpx = Multiplexer::new(clock.clone());
        mpx.program(
            rates
                .iter()
                .enumerate()
                .map(|(i, &r)| (i as u32, Ramp::boxed(clock, r)))
                .collect(),
        )
        .unwrap();
        mpx
    }

    const MS: Duration = Duration::from_millis(1);

    #[test]
    fn test_estimates_extrapolate_rates() {
        let clock = Arc::new(ManualClock::new(1_000));
        let mut mpx = _mpx(&clock, &[2, 5]);
        mpx.start().unwrap();
        clock.advance(MS);
        mpx.rotate().unwrap();
        clock.advance(MS);
        mpx.rotate().unwrap();
        clock.advance(MS);
        assert_eq!(mpx.read().unwrap(), vec![6_000_000, 15_000_000]);
        assert_eq!(mpx.stop().unwrap(), vec![6_000_000, 15_000_000]);
        assert!(mpx.read().is_err());
    }

    #[test]
    fn test_short_slices_keep_previous_rate() {
        let clock = Arc::new(ManualClock::new(0));
        let mut mpx = _mpx(&clock, &[3, 1]);
        mpx.start().unwrap();
        clock.advance(MS);
        mpx.rotate().unwrap();
        clock.advance(MS);
        mpx.rotate().unwrap();
        // A 1us slice does not update the rate learnt for native 0.
        clock.advance(Duration::from_micros(1));
        mpx.rotate().unwrap();
        clock.advance(MS);
        let v = mpx.read().unwrap();
        assert_eq!(v[0], 3 * 3_001_000);
        assert_eq!(v[1], 3_001_000);
    }

    #[test]
    fn test_reset_restarts_estimates() {
        let clock = Arc::new(ManualClock::new(0));
        let mut mpx = _mpx(&clock, &[4, 4, 4]);
        mpx.start().unwrap();
        for _ in 0..3 {
            clock.advance(MS);
            mpx.rotate().unwrap();
        }
        mpx.reset().unwrap();
        assert_eq!(mpx.read().unwrap(), vec![0, 0, 0]);
        // Reset at 3ms, read 1ms later.
        clock.set(4_000_000);
        assert_eq!(mpx.read().unwrap(), vec![4_000_000; 3]);
    }

    #[test]
    fn test_program_requires_stopped() {
        let clock = Arc::new(ManualClock::new(0));
        let mut mpx = _mpx(&clock, &[1]);
        assert_eq!(mpx.len(), 1);
        mpx.start().unwrap();
        let err = mpx.program(vec![]).unwrap_err();
        assert_eq!(err.code(), Error::IsRunning.code());
        mpx.stop().unwrap();
        mpx.program(vec![]).unwrap();
        assert_eq!(mpx.start().unwrap_err().code(), Error::Invalid.code());
    }
}

//! Thread local counting without EventSet handles.
//!
//! Every thread owns at most one implicit EventSet on the process wide library, which is
//! initialised on first use. It is driven either by the `*_counters` functions or by one of
//! the rate functions, never both at once.

use crate::events::{preset, EventCode};
use crate::eventset::EventSet;
use crate::library::library_init;
use crate::timers::{real_usec, virt_usec};
use crate::{Error, Result};
use log::debug;
use std::cell::RefCell;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Counters,
    Flips,
    Flops,
    Ipc,
    Epc,
}

#[derive(Debug)]
struct HlState {
    set: EventSet,
    mode: Mode,
    initial_real: i64,
    initial_proc: i64,
    last_proc: i64,
    total: i64,
}

thread_local! {
    static STATE: RefCell<Option<HlState>> = RefCell::new(None);
}

/// Measurement returned by the rate functions.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RateInfo {
    /// Wall clock seconds since the first call.
    pub real_time: f32,
    /// Process seconds since the first call.
    pub proc_time: f32,
    /// Events counted since the first call.
    pub count: i64,
    /// Rate over the interval since the previous call.
    ///
    /// Millions per second for [`flips`] and [`flops`], events per cycle otherwise.
    pub rate: f32,
}

/// Measurement returned by [`epc`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EpcInfo {
    /// Counts and rate of the measured event.
    pub info: RateInfo,
    /// Reference cycles of the last interval, `0` when not available.
    pub reference: i64,
    /// Core cycles of the last interval.
    pub core: i64,
}

fn _with<T, F>(f: F) -> Result<T>
where
    F: FnOnce(&mut Option<HlState>) -> Result<T>,
{
    STATE.with(|s| f(&mut s.borrow_mut()))
}

fn _begin(codes: &[EventCode], mode: Mode) -> Result<HlState> {
    let lib = library_init()?;
    let mut set = lib.create_eventset();
    set.add_events(codes)?;
    let now = virt_usec();
    let mut state = HlState {
        set,
        mode,
        initial_real: real_usec(),
        initial_proc: now,
        last_proc: now,
        total: 0,
    };
    state.set.start()?;
    debug!("High level counting of {} events started", codes.len());
    Ok(state)
}

/// Start counting `events` in the calling thread.
pub fn start_counters(events: &[EventCode]) -> Result<()> {
    if events.is_empty() {
        return Err(Error::Invalid);
    }
    _with(|state| {
        if state.is_some() {
            return Err(Error::Invalid);
        }
        *state = Some(_begin(events, Mode::Counters)?);
        Ok(())
    })
}

fn _counters<T, F>(f: F) -> Result<T>
where
    F: FnOnce(&mut HlState) -> Result<T>,
{
    _with(|state| match state.as_mut() {
        Some(s) if s.mode == Mode::Counters => f(s),
        _ => Err(Error::NotRunning),
    })
}

/// Values counted since the last read, restarting the counts from zero.
pub fn read_counters() -> Result<Vec<i64>> {
    _counters(|s| {
        let values = s.set.read()?;
        s.set.reset()?;
        Ok(values)
    })
}

/// Add the values counted since the last read to `values`, restarting the counts from zero.
pub fn accum_counters(values: &mut [i64]) -> Result<()> {
    _counters(|s| s.set.accum(values))
}

/// Stop counting in the calling thread, returning the final values.
///
/// Also ends a measurement started by one of the rate functions.
pub fn stop_counters() -> Result<Vec<i64>> {
    _with(|state| {
        let mut s = state.take().ok_or(Error::NotRunning)?;
        s.set.stop()
    })
}

/// Number of counters of the CPU component.
pub fn num_counters() -> Result<usize> {
    Ok(library_init()?.num_counters())
}

/// Shared driver of the rate functions. Returns the rate info and the values of the interval.
fn _rate(codes: &[EventCode], mode: Mode) -> Result<(RateInfo, Vec<i64>)> {
    _with(|state| {
        let s = match state.as_mut() {
            None => {
                *state = Some(_begin(codes, mode)?);
                return Ok((RateInfo::default(), vec![0; codes.len()]));
            }
            Some(s) if s.mode != mode => return Err(Error::Invalid),
            Some(s) => s,
        };
        let values = match s.set.stop() {
            Ok(v) => v,
            Err(e) => {
                *state = None;
                return Err(e);
            }
        };
        let rt = real_usec();
        let pt = virt_usec();
        s.total += values[0];
        let rate = match mode {
            Mode::Flips | Mode::Flops if pt > s.last_proc => {
                values[0] as f32 / (pt - s.last_proc) as f32
            }
            Mode::Ipc | Mode::Epc if values[1] != 0 => values[0] as f32 / values[1] as f32,
            _ => 0.0,
        };
        let info = RateInfo {
            real_time: (rt - s.initial_real) as f32 * 1e-6,
            proc_time: (pt - s.initial_proc) as f32 * 1e-6,
            count: s.total,
            rate,
        };
        s.last_proc = pt;
        if let Err(e) = s.set.start() {
            *state = None;
            return Err(e);
        }
        Ok((info, values))
    })
}

/// Floating point instructions and Mflip/s since the first call.
pub fn flips() -> Result<RateInfo> {
    _rate(&[preset::FP_INS], Mode::Flips).map(|(info, _)| info)
}

/// Floating point operations and Mflop/s since the first call.
pub fn flops() -> Result<RateInfo> {
    _rate(&[preset::FP_OPS], Mode::Flops).map(|(info, _)| info)
}

/// Instructions since the first call and instructions per cycle of the last interval.
pub fn ipc() -> Result<RateInfo> {
    _rate(&[preset::TOT_INS, preset::TOT_CYC], Mode::Ipc).map(|(info, _)| info)
}

/// Occurrences of `event` (instructions if `None`) and events per cycle of the last interval.
pub fn epc(event: Option<EventCode>) -> Result<EpcInfo> {
    let mut codes = vec![event.unwrap_or(preset::TOT_INS), preset::TOT_CYC];
    if library_init()?.query_event(preset::REF_CYC).is_ok() {
        codes.push(preset::REF_CYC);
    }
    let (info, values) = _rate(&codes, Mode::Epc)?;
    Ok(EpcInfo {
        info,
        core: values[1],
        reference: values.get(2).copied().unwrap_or(0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::example::EXAMPLE_CONSTANT_VALUE;
    use crate::library::test_global;

    #[test]
    fn test_counters() {
        test_global();
        assert_eq!(start_counters(&[]).unwrap_err().code(), Error::Invalid.code());
        assert_eq!(read_counters().unwrap_err().code(), Error::NotRunning.code());
        start_counters(&[preset::TOT_CYC, preset::L1_DCM]).unwrap();
        assert_eq!(
            start_counters(&[preset::TOT_CYC]).unwrap_err().code(),
            Error::Invalid.code()
        );
        assert_eq!(read_counters().unwrap(), vec![EXAMPLE_CONSTANT_VALUE, 0]);
        let mut acc = vec![1, 1];
        accum_counters(&mut acc).unwrap();
        assert_eq!(acc, vec![EXAMPLE_CONSTANT_VALUE + 1, 1]);
        // Rate functions cannot share the implicit set.
        assert_eq!(flops().unwrap_err().code(), Error::Invalid.code());
        assert_eq!(stop_counters().unwrap(), vec![EXAMPLE_CONSTANT_VALUE, 0]);
        assert_eq!(stop_counters().unwrap_err().code(), Error::NotRunning.code());
        assert_eq!(num_counters().unwrap(), 3);
    }

    #[test]
    fn test_unavailable_event() {
        test_global();
        assert_eq!(
            start_counters(&[preset::L2_DCM]).unwrap_err().code(),
            Error::NoEvent.code()
        );
        start_counters(&[preset::TOT_CYC]).unwrap();
        stop_counters().unwrap();
    }

    #[test]
    fn test_flops_accumulates() {
        test_global();
        assert_eq!(flops().unwrap(), RateInfo::default());
        let first = flops().unwrap();
        assert_eq!(first.count, EXAMPLE_CONSTANT_VALUE);
        assert!(first.real_time >= 0.0);
        assert!(first.rate >= 0.0);
        let second = flops().unwrap();
        assert_eq!(second.count, 2 * EXAMPLE_CONSTANT_VALUE);
        assert!(second.proc_time >= first.proc_time);
        assert_eq!(ipc().unwrap_err().code(), Error::Invalid.code());
        stop_counters().unwrap();
    }

    #[test]
    fn test_ipc_and_epc() {
        test_global();
        ipc().unwrap();
        let info = ipc().unwrap();
        assert!((info.rate - info.count as f32 / EXAMPLE_CONSTANT_VALUE as f32).abs() < 1e-6);
        stop_counters().unwrap();

        let zero = epc(Some(preset::FP_INS)).unwrap();
        assert_eq!(zero.info.count, 0);
        let measured = epc(Some(preset::FP_INS)).unwrap();
        assert_eq!(measured.core, EXAMPLE_CONSTANT_VALUE);
        assert_eq!(measured.reference, 0);
        assert_eq!(measured.info.rate, 1.0);
        stop_counters().unwrap();
    }
}

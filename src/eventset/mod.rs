//! EventSets: groups of events counted, started, stopped and read together.
//!
//! An EventSet is bound to a single component, chosen when the first event is added (or
//! explicitly with [`EventSet::assign_component`]). Events are recipes over native events;
//! natives shared by several events are programmed once and reference counted.
//!
//! ```no_run
//! # fn main() -> papi::Result<()> {
//! let lib = papi::Library::init()?;
//! let mut set = lib.create_eventset();
//! set.add_named_event("PAPI_TOT_CYC")?;
//! set.start()?;
//! // ... workload ...
//! let values = set.stop()?;
//! println!("{} cycles", values[0]);
//! # Ok(())
//! # }
//! ```

use crate::component::{ControlState, NativeSlot};
use crate::consts::*;
use crate::events::{Derived, EventCode};
use crate::library::Library;
use crate::{Error, Result};
use log::{debug, error};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::ThreadId;

mod multiplex;
pub(crate) use multiplex::Multiplexer;
pub use multiplex::{Clock, ManualClock, RealClock, MIN_SLICE_NS};

mod overflow;
use overflow::{HandlerSlot, OverflowEntry, OverflowState};
pub use overflow::{OverflowEvent, OverflowHandler};

mod ticker;
use ticker::Ticker;

/// An event added to a set and the natives it is computed from.
#[derive(Debug, Clone)]
struct EventEntry {
    code: EventCode,
    natives: Vec<u32>,
    derived: Derived,
    /// Counter position of every native, in operand order.
    positions: Vec<usize>,
}

#[derive(Debug, Clone)]
struct NativeEntry {
    code: u32,
    position: Option<usize>,
    /// Number of events using this native.
    owners: usize,
}

/// State of an EventSet shared with its ticker thread.
#[derive(Debug)]
pub(crate) struct SetInner {
    id: usize,
    state: State,
    destroyed: bool,
    cidx: Option<usize>,
    events: Vec<EventEntry>,
    natives: Vec<NativeEntry>,
    control: Option<Box<dyn ControlState>>,
    mpx: Option<Multiplexer>,
    kernel_mpx: bool,
    overflow: Option<OverflowState>,
    handler: HandlerSlot,
    domain: Domain,
    granularity: Granularity,
    attached: Option<i32>,
    cpu: Option<u32>,
    inherit: bool,
    /// Values returned by `read` while stopped.
    stopped_values: Vec<i64>,
    running_slot: Option<(ThreadId, usize)>,
}

impl SetInner {
    fn new(id: usize) -> Self {
        SetInner {
            id,
            state: State::STOPPED,
            destroyed: false,
            cidx: None,
            events: vec![],
            natives: vec![],
            control: None,
            mpx: None,
            kernel_mpx: false,
            overflow: None,
            handler: HandlerSlot(None),
            domain: Domain::default(),
            granularity: Granularity::default(),
            attached: None,
            cpu: None,
            inherit: false,
            stopped_values: vec![],
            running_slot: None,
        }
    }

    fn _alive(&self) -> Result<()> {
        if self.destroyed {
            Err(Error::NoEventSet)
        } else {
            Ok(())
        }
    }

    fn _stopped(&self) -> Result<()> {
        self._alive()?;
        if self.state.contains(State::RUNNING) {
            Err(Error::IsRunning)
        } else {
            Ok(())
        }
    }

    fn _cidx(&self) -> Result<usize> {
        self.cidx.ok_or(Error::NoComponent)
    }

    /// Fresh control state carrying every option set so far.
    fn _new_control(&self, lib: &Library) -> Result<Box<dyn ControlState>> {
        let mut control = lib._component(self._cidx()?)?.new_control_state()?;
        control.set_domain(self.domain)?;
        control.set_granularity(self.granularity)?;
        if let Some(pid) = self.attached {
            control.attach(pid)?;
        }
        if let Some(cpu) = self.cpu {
            control.set_cpu(cpu)?;
        }
        if self.inherit {
            control.set_inherit(true)?;
        }
        if self.kernel_mpx {
            control.set_multiplex()?;
        }
        Ok(control)
    }

    /// Bind the set to component `cidx`, applying the library defaults the component supports.
    fn _assign(&mut self, lib: &Library, cidx: usize) -> Result<()> {
        let info = lib._component(cidx)?.info();
        let (domain, granularity) = lib._defaults()?;
        let mut domain = domain.unwrap_or(info.default_domain);
        if !info.available_domains.contains(domain) {
            domain = info.default_domain;
        }
        let mut granularity = granularity.unwrap_or(info.default_granularity);
        if !info.available_granularities.contains(granularity) {
            granularity = info.default_granularity;
        }
        self.cidx = Some(cidx);
        self.domain = domain;
        self.granularity = granularity;
        match self._new_control(lib) {
            Ok(control) => self.control = Some(control),
            Err(e) => {
                self.cidx = None;
                return Err(e);
            }
        }
        debug!("EventSet {} assigned to component {}", self.id, cidx);
        Ok(())
    }

    /// Program the natives into the component and recompute positions.
    fn _update(&mut self, lib: &Library) -> Result<()> {
        if self.mpx.is_some() {
            let programmed = self
                .natives
                .iter()
                .map(|n| -> Result<(u32, Box<dyn ControlState>)> {
                    Ok((n.code, self._new_control(lib)?))
                })
                .collect::<Result<Vec<_>>>()?;
            self.mpx.as_mut().ok_or(Error::Bug)?.program(programmed)?;
            for (i, n) in self.natives.iter_mut().enumerate() {
                n.position = Some(i);
            }
        } else {
            let control = self.control.as_mut().ok_or(Error::NoComponent)?;
            let mut slots: Vec<NativeSlot> =
                self.natives.iter().map(|n| NativeSlot::new(n.code)).collect();
            control.update(&mut slots)?;
            for (n, s) in self.natives.iter_mut().zip(slots.iter()) {
                n.position = Some(s.position.ok_or(Error::Bug)?);
            }
        }
        self._remap()?;
        self._reinstate_overflow()
    }

    fn _remap(&mut self) -> Result<()> {
        let natives = &self.natives;
        for ev in self.events.iter_mut() {
            ev.positions = ev
                .natives
                .iter()
                .map(|c| {
                    natives
                        .iter()
                        .find(|n| n.code == *c)
                        .and_then(|n| n.position)
                        .ok_or(Error::Bug)
                })
                .collect::<Result<Vec<usize>>>()?;
        }
        if let Some(ov) = self.overflow.as_mut() {
            for e in ov.entries.iter_mut() {
                let idx = self
                    .events
                    .iter()
                    .position(|ev| ev.code == e.code)
                    .ok_or(Error::Bug)?;
                e.event_index = idx;
                e.position = self.events[idx].positions.first().copied().ok_or(Error::Bug)?;
            }
        }
        Ok(())
    }

    fn _reinstate_overflow(&mut self) -> Result<()> {
        if let (Some(ov), Some(control)) = (self.overflow.as_ref(), self.control.as_mut()) {
            if ov.hardware {
                for e in ov.entries.iter() {
                    control.set_overflow(e.position, e.threshold as u64)?;
                }
            }
        }
        Ok(())
    }

    /// Run `f` on every control state of the set.
    fn _apply<F>(&mut self, mut f: F) -> Result<()>
    where
        F: FnMut(&mut dyn ControlState) -> Result<()>,
    {
        if let Some(control) = self.control.as_mut() {
            f(control.as_mut())?;
        }
        if let Some(mpx) = self.mpx.as_mut() {
            mpx.for_each_control(&mut f)?;
        }
        Ok(())
    }

    /// Combine position indexed counter values into event values.
    fn _evaluate(&self, raw: &[i64], hz: f64) -> Vec<i64> {
        self.events
            .iter()
            .map(|ev| {
                let operands: Vec<i64> = ev
                    .positions
                    .iter()
                    .map(|p| raw.get(*p).copied().unwrap_or(0))
                    .collect();
                ev.derived.evaluate(&operands, hz)
            })
            .collect()
    }

    fn _read_live(&mut self, hz: f64) -> Result<Vec<i64>> {
        let raw = match self.mpx.as_mut() {
            Some(mpx) => mpx.read()?,
            None => self.control.as_mut().ok_or(Error::Bug)?.read()?,
        };
        Ok(self._evaluate(&raw, hz))
    }

    /// Read the final values and stop counting.
    fn _halt(&mut self, hz: f64) -> Result<Vec<i64>> {
        if let Some(mpx) = self.mpx.as_mut() {
            let raw = mpx.stop()?;
            return Ok(self._evaluate(&raw, hz));
        }
        let values = self._read_live(hz)?;
        self.control.as_mut().ok_or(Error::Bug)?.stop()?;
        Ok(values)
    }

    /// One period of the ticker thread.
    pub(crate) fn tick(&mut self, rotate: bool, hz: f64) -> Result<Vec<OverflowEvent>> {
        if !self.state.contains(State::RUNNING) {
            return Ok(vec![]);
        }
        if rotate {
            if let Some(mpx) = self.mpx.as_mut() {
                mpx.rotate()?;
            }
        }
        let hardware = match self.overflow.as_ref() {
            Some(ov) => ov.hardware,
            None => return Ok(vec![]),
        };
        let id = self.id;
        if hardware {
            let control = self.control.as_mut().ok_or(Error::Bug)?;
            return Ok(control
                .take_overflows()?
                .into_iter()
                .map(|o| OverflowEvent {
                    eventset: id,
                    address: o.address,
                    vector: o.positions,
                })
                .collect());
        }
        let values = self._read_live(hz)?;
        let vector = self.overflow.as_mut().map(|o| o.check(&values)).unwrap_or(0);
        Ok(if vector != 0 {
            vec![OverflowEvent {
                eventset: id,
                address: 0,
                vector,
            }]
        } else {
            vec![]
        })
    }
}

/// A group of events counted together.
///
/// Dropping a running EventSet stops it.
#[derive(Debug)]
pub struct EventSet {
    id: usize,
    lib: Library,
    inner: Arc<Mutex<SetInner>>,
    ticker: Option<Ticker>,
}

impl EventSet {
    pub(crate) fn new(lib: Library, id: usize) -> Self {
        EventSet {
            id,
            lib,
            inner: Arc::new(Mutex::new(SetInner::new(id))),
            ticker: None,
        }
    }

    fn _lock(&self) -> Result<MutexGuard<SetInner>> {
        self.inner.lock().map_err(|_| Error::Bug)
    }

    /// Identifier of this set, as passed to overflow handlers.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Current state flags.
    pub fn state(&self) -> Result<State> {
        let inner = self._lock()?;
        inner._alive()?;
        Ok(inner.state)
    }

    /// Component the set is bound to, if any.
    pub fn component(&self) -> Result<Option<usize>> {
        let inner = self._lock()?;
        inner._alive()?;
        Ok(inner.cidx)
    }

    /// Number of events in the set.
    pub fn num_events(&self) -> Result<usize> {
        let inner = self._lock()?;
        inner._alive()?;
        Ok(inner.events.len())
    }

    /// Codes of the events in the set, in the order they were added.
    pub fn list_events(&self) -> Result<Vec<EventCode>> {
        let inner = self._lock()?;
        inner._alive()?;
        Ok(inner.events.iter().map(|e| e.code).collect())
    }

    /// Bind the set to component `cidx` before any event is added.
    pub fn assign_component(&mut self, cidx: usize) -> Result<()> {
        let mut inner = self._lock()?;
        inner._stopped()?;
        if cidx >= self.lib.num_components() {
            return Err(Error::NoComponent);
        }
        match inner.cidx {
            Some(c) if c == cidx => Ok(()),
            Some(_) => Err(Error::Invalid),
            None => inner._assign(&self.lib, cidx),
        }
    }

    /// Add the event with code `code`.
    pub fn add_event(&mut self, code: EventCode) -> Result<()> {
        let mut guard = self._lock()?;
        let inner = &mut *guard;
        inner._stopped()?;
        let resolved = self.lib._resolve(code)?;
        if inner.events.iter().any(|e| e.code == code) {
            return Err(Error::Conflict);
        }
        match inner.cidx {
            None => inner._assign(&self.lib, resolved.cidx)?,
            Some(c) if c != resolved.cidx => return Err(Error::Invalid),
            Some(_) => {}
        }
        if let Some(ov) = inner.overflow.as_ref() {
            let busy = ov.entries.iter().any(|e| {
                inner.events[e.event_index]
                    .natives
                    .iter()
                    .any(|n| resolved.natives.contains(n))
            });
            if busy {
                return Err(Error::Conflict);
            }
        }

        let info = self.lib._component(resolved.cidx)?.info();
        let limit = if inner.mpx.is_some() {
            info.num_mpx_cntrs.min(MAX_SW_MPX_EVENTS)
        } else if inner.kernel_mpx {
            info.num_mpx_cntrs
        } else {
            info.num_cntrs
        };
        let mut fresh: Vec<u32> = vec![];
        for n in resolved.natives.iter() {
            if !fresh.contains(n) && !inner.natives.iter().any(|x| x.code == *n) {
                fresh.push(*n);
            }
        }
        if inner.natives.len() + fresh.len() > limit {
            return Err(Error::Count);
        }

        let saved = inner.natives.clone();
        for n in resolved.natives.iter() {
            match inner.natives.iter_mut().find(|x| x.code == *n) {
                Some(x) => x.owners += 1,
                None => inner.natives.push(NativeEntry {
                    code: *n,
                    position: None,
                    owners: 1,
                }),
            }
        }
        inner.events.push(EventEntry {
            code,
            natives: resolved.natives,
            derived: resolved.derived,
            positions: vec![],
        });
        if let Err(e) = inner._update(&self.lib) {
            inner.natives = saved;
            inner.events.pop();
            if let Err(e) = inner._update(&self.lib) {
                error!("EventSet {} could not restore its counters: {}", self.id, e);
            }
            return Err(e);
        }
        inner.stopped_values.push(0);
        debug!("EventSet {} added event {}", self.id, code);
        Ok(())
    }

    /// Add the event called `name`.
    pub fn add_named_event(&mut self, name: &str) -> Result<()> {
        let code = self.lib.event_name_to_code(name)?;
        self.add_event(code)
    }

    /// Add several events, stopping at the first failure.
    pub fn add_events(&mut self, codes: &[EventCode]) -> Result<()> {
        for code in codes {
            self.add_event(*code)?;
        }
        Ok(())
    }

    /// Remove the event with code `code`.
    pub fn remove_event(&mut self, code: EventCode) -> Result<()> {
        let mut guard = self._lock()?;
        let inner = &mut *guard;
        inner._stopped()?;
        let idx = inner
            .events
            .iter()
            .position(|e| e.code == code)
            .ok_or(Error::Invalid)?;
        if inner.overflow.as_ref().and_then(|o| o.entry(code)).is_some() {
            _clear_overflow(inner, code)?;
        }
        let ev = inner.events.remove(idx);
        inner.stopped_values.remove(idx);
        for n in ev.natives.iter() {
            if let Some(x) = inner.natives.iter_mut().find(|x| x.code == *n) {
                x.owners -= 1;
            }
        }
        inner.natives.retain(|x| x.owners > 0);
        inner._update(&self.lib)?;
        debug!("EventSet {} removed event {}", self.id, code);
        Ok(())
    }

    /// Remove the event called `name`.
    pub fn remove_named_event(&mut self, name: &str) -> Result<()> {
        let code = self.lib.event_name_to_code(name)?;
        self.remove_event(code)
    }

    /// Remove several events, stopping at the first failure.
    pub fn remove_events(&mut self, codes: &[EventCode]) -> Result<()> {
        for code in codes {
            self.remove_event(*code)?;
        }
        Ok(())
    }

    /// Start counting.
    pub fn start(&mut self) -> Result<()> {
        let (rotate_every, poll_every) = {
            let mut guard = self._lock()?;
            let inner = &mut *guard;
            inner._alive()?;
            let cidx = inner._cidx()?;
            if inner.state.contains(State::RUNNING) {
                return Err(Error::IsRunning);
            }
            if inner.events.is_empty() {
                return Err(Error::Invalid);
            }
            let slot = (std::thread::current().id(), cidx);
            let mut running = self.lib._running()?;
            if running.contains(&slot) {
                return Err(Error::IsRunning);
            }
            if let Some(ov) = inner.overflow.as_mut() {
                ov.reset_deadlines();
            }
            match inner.mpx.as_mut() {
                Some(mpx) => {
                    mpx.start()?;
                    debug!("EventSet {} rotates {} natives", inner.id, mpx.len());
                }
                None => {
                    let control = inner.control.as_mut().ok_or(Error::Bug)?;
                    control.reset()?;
                    if let Err(e) = control.start() {
                        let _ = control.stop();
                        return Err(e);
                    }
                }
            }
            running.insert(slot);
            inner.running_slot = Some(slot);
            inner.state.remove(State::STOPPED);
            inner.state |= State::RUNNING;
            let config = self.lib.config();
            (
                inner.mpx.as_ref().map(|_| config.multiplex_interval),
                inner.overflow.as_ref().map(|_| config.overflow_interval),
            )
        };
        if rotate_every.is_some() || poll_every.is_some() {
            match Ticker::spawn(
                self.id,
                self.inner.clone(),
                self.lib.hz(),
                rotate_every,
                poll_every,
            ) {
                Ok(t) => self.ticker = Some(t),
                Err(e) => {
                    let _ = self._halt();
                    return Err(e);
                }
            }
        }
        debug!("EventSet {} started", self.id);
        Ok(())
    }

    /// Stop the counters, free the running slot and store the final values.
    fn _halt(&mut self) -> Result<Vec<i64>> {
        if let Some(ticker) = self.ticker.take() {
            ticker.stop();
        }
        let mut guard = self._lock()?;
        let inner = &mut *guard;
        let result = inner._halt(self.lib.hz());
        if let Some(slot) = inner.running_slot.take() {
            self.lib._running()?.remove(&slot);
        }
        inner.state.remove(State::RUNNING);
        inner.state |= State::STOPPED;
        let values = result?;
        inner.stopped_values = values.clone();
        Ok(values)
    }

    /// Stop counting and return the final values.
    pub fn stop(&mut self) -> Result<Vec<i64>> {
        {
            let inner = self._lock()?;
            inner._alive()?;
            if !inner.state.contains(State::RUNNING) {
                return Err(Error::NotRunning);
            }
        }
        let values = self._halt()?;
        debug!("EventSet {} stopped", self.id);
        Ok(values)
    }

    /// Current value of every event.
    ///
    /// A stopped set returns the values it had when it was stopped.
    pub fn read(&self) -> Result<Vec<i64>> {
        let mut inner = self._lock()?;
        inner._alive()?;
        if inner.state.contains(State::RUNNING) {
            inner._read_live(self.lib.hz())
        } else {
            Ok(inner.stopped_values.clone())
        }
    }

    /// [`EventSet::read`] together with a cycle count timestamp.
    pub fn read_ts(&self) -> Result<(Vec<i64>, i64)> {
        let values = self.read()?;
        Ok((values, crate::timers::real_cyc()))
    }

    /// Add the current values to `values`, then reset the counters.
    pub fn accum(&mut self, values: &mut [i64]) -> Result<()> {
        let current = self.read()?;
        if current.len() != values.len() {
            return Err(Error::Invalid);
        }
        for (v, c) in values.iter_mut().zip(current) {
            *v += c;
        }
        self.reset()
    }

    /// Zero every counter.
    pub fn reset(&mut self) -> Result<()> {
        let mut guard = self._lock()?;
        let inner = &mut *guard;
        inner._alive()?;
        if inner.state.contains(State::RUNNING) {
            match inner.mpx.as_mut() {
                Some(mpx) => mpx.reset()?,
                None => inner.control.as_mut().ok_or(Error::Bug)?.reset()?,
            }
        }
        for v in inner.stopped_values.iter_mut() {
            *v = 0;
        }
        if let Some(ov) = inner.overflow.as_mut() {
            ov.reset_deadlines();
        }
        Ok(())
    }

    /// Load `values`, one per event, into the counters.
    pub fn write(&mut self, values: &[i64]) -> Result<()> {
        let mut guard = self._lock()?;
        let inner = &mut *guard;
        inner._alive()?;
        if values.len() != inner.events.len() {
            return Err(Error::Invalid);
        }
        if inner.state.contains(State::RUNNING) {
            if inner.mpx.is_some() {
                return Err(Error::Component);
            }
            let size = inner
                .natives
                .iter()
                .filter_map(|n| n.position)
                .max()
                .map(|p| p + 1)
                .unwrap_or(0);
            let mut raw = vec![0; size];
            for (ev, v) in inner.events.iter().zip(values) {
                if let Some(p) = ev.positions.first() {
                    raw[*p] = *v;
                }
            }
            inner.control.as_mut().ok_or(Error::Bug)?.write(&raw)?;
        }
        inner.stopped_values = values.to_vec();
        Ok(())
    }

    /// Remove every event, overflow and multiplexing setting. The set can be reused.
    pub fn cleanup(&mut self) -> Result<()> {
        let mut guard = self._lock()?;
        let inner = &mut *guard;
        inner._stopped()?;
        let codes: Vec<EventCode> = inner
            .overflow
            .as_ref()
            .map(|o| o.entries.iter().map(|e| e.code).collect())
            .unwrap_or_default();
        for code in codes {
            _clear_overflow(inner, code)?;
        }
        inner.mpx = None;
        inner.kernel_mpx = false;
        inner.events.clear();
        inner.natives.clear();
        inner.stopped_values.clear();
        inner.control = None;
        inner.cidx = None;
        inner.attached = None;
        inner.cpu = None;
        inner.inherit = false;
        inner.state = State::STOPPED;
        debug!("EventSet {} cleaned up", self.id);
        Ok(())
    }

    /// Release the set. Every later operation fails with `Error::NoEventSet`.
    pub fn destroy(&mut self) -> Result<()> {
        let mut inner = self._lock()?;
        inner._stopped()?;
        if !inner.events.is_empty() {
            return Err(Error::Invalid);
        }
        inner.destroyed = true;
        inner.control = None;
        inner.mpx = None;
        inner.state = State::default();
        Ok(())
    }

    /// Restrict counting to the privilege levels in `domain`.
    pub fn set_domain(&mut self, domain: Domain) -> Result<()> {
        let mut inner = self._lock()?;
        inner._stopped()?;
        let info = self.lib._component(inner._cidx()?)?.info();
        if !info.available_domains.contains(domain) {
            return Err(Error::InvalidDomain);
        }
        inner._apply(|c| c.set_domain(domain))?;
        inner.domain = domain;
        Ok(())
    }

    /// Privilege levels counted by the set.
    pub fn get_domain(&self) -> Result<Domain> {
        let inner = self._lock()?;
        inner._alive()?;
        inner._cidx()?;
        Ok(inner.domain)
    }

    /// Change the scope of counting.
    pub fn set_granularity(&mut self, granularity: Granularity) -> Result<()> {
        let mut inner = self._lock()?;
        inner._stopped()?;
        let info = self.lib._component(inner._cidx()?)?.info();
        if !info.available_granularities.contains(granularity) {
            return Err(Error::Invalid);
        }
        inner._apply(|c| c.set_granularity(granularity))?;
        inner.granularity = granularity;
        Ok(())
    }

    /// Scope of counting.
    pub fn get_granularity(&self) -> Result<Granularity> {
        let inner = self._lock()?;
        inner._alive()?;
        inner._cidx()?;
        Ok(inner.granularity)
    }

    /// Count thread or process `pid` instead of the caller.
    pub fn attach(&mut self, pid: i32) -> Result<()> {
        let mut inner = self._lock()?;
        inner._stopped()?;
        if !self.lib._component(inner._cidx()?)?.info().attach {
            return Err(Error::Component);
        }
        if inner.attached.is_some() {
            return Err(Error::Invalid);
        }
        inner._apply(|c| c.attach(pid))?;
        inner.attached = Some(pid);
        inner.state |= State::ATTACHED;
        Ok(())
    }

    /// Go back to counting the caller.
    pub fn detach(&mut self) -> Result<()> {
        let mut inner = self._lock()?;
        inner._stopped()?;
        inner._cidx()?;
        if inner.attached.is_none() {
            return Err(Error::Invalid);
        }
        inner._apply(|c| c.detach())?;
        inner.attached = None;
        inner.state.remove(State::ATTACHED);
        Ok(())
    }

    /// Count everything happening on `cpu`.
    pub fn attach_cpu(&mut self, cpu: u32) -> Result<()> {
        let mut inner = self._lock()?;
        inner._stopped()?;
        if !self.lib._component(inner._cidx()?)?.info().cpu {
            return Err(Error::Component);
        }
        if inner.cpu.is_some() {
            return Err(Error::Invalid);
        }
        inner._apply(|c| c.set_cpu(cpu))?;
        inner.cpu = Some(cpu);
        inner.state |= State::CPU_ATTACHED;
        Ok(())
    }

    /// Let children created after start inherit the counters.
    pub fn set_inherit(&mut self, inherit: bool) -> Result<()> {
        let mut inner = self._lock()?;
        inner._stopped()?;
        if !self.lib._component(inner._cidx()?)?.info().inherit {
            return Err(Error::Component);
        }
        inner._apply(|c| c.set_inherit(inherit))?;
        inner.inherit = inherit;
        Ok(())
    }

    /// Turn on multiplexing.
    ///
    /// The kernel multiplexes when the component supports it, unless `MultiplexFlags::FORCE_SW`
    /// asks for the time sliced software multiplexer.
    pub fn set_multiplex(&mut self, flags: MultiplexFlags) -> Result<()> {
        if !self.lib.is_multiplex_initialized() {
            return Err(Error::NotInitialized);
        }
        let mut guard = self._lock()?;
        let inner = &mut *guard;
        inner._stopped()?;
        if inner.mpx.is_some() || inner.kernel_mpx {
            return Err(Error::Invalid);
        }
        let info = self.lib._component(inner._cidx()?)?.info();
        if inner.overflow.as_ref().map(|o| o.hardware).unwrap_or(false) {
            return Err(Error::Combo);
        }
        if info.kernel_multiplex && !flags.contains(MultiplexFlags::FORCE_SW) {
            inner.kernel_mpx = true;
            let updated = inner._new_control(&self.lib).and_then(|c| {
                inner.control = Some(c);
                inner._update(&self.lib)
            });
            if let Err(e) = updated {
                inner.kernel_mpx = false;
                inner.control = Some(inner._new_control(&self.lib)?);
                inner._update(&self.lib)?;
                return Err(e);
            }
        } else {
            if inner.natives.len() > info.num_mpx_cntrs.min(MAX_SW_MPX_EVENTS) {
                return Err(Error::Count);
            }
            inner.mpx = Some(Multiplexer::new(self.lib.clock()));
            if let Err(e) = inner._update(&self.lib) {
                inner.mpx = None;
                inner._update(&self.lib)?;
                return Err(e);
            }
        }
        inner.state |= State::MULTIPLEXING;
        debug!(
            "EventSet {} multiplexed by the {}",
            self.id,
            if inner.kernel_mpx { "kernel" } else { "library" }
        );
        Ok(())
    }

    /// Whether the set is multiplexed.
    pub fn get_multiplex(&self) -> Result<bool> {
        let inner = self._lock()?;
        inner._alive()?;
        Ok(inner.mpx.is_some() || inner.kernel_mpx)
    }

    /// Call `handler` every time event `code` grows by `threshold`.
    ///
    /// A threshold of zero removes the overflow of `code`. The handler of a set is shared by
    /// all its events; passing `None` keeps the current one.
    pub fn overflow(
        &mut self,
        code: EventCode,
        threshold: i64,
        flags: OverflowFlags,
        handler: Option<OverflowHandler>,
    ) -> Result<()> {
        let mut guard = self._lock()?;
        let inner = &mut *guard;
        inner._stopped()?;
        if inner.state.intersects(State::ATTACHED | State::CPU_ATTACHED) {
            return Err(Error::Invalid);
        }
        let idx = inner
            .events
            .iter()
            .position(|e| e.code == code)
            .ok_or(Error::NoEvent)?;
        if threshold < 0 {
            return Err(Error::Invalid);
        }
        if threshold == 0 {
            if inner.overflow.as_ref().and_then(|o| o.entry(code)).is_none() {
                return Err(Error::Invalid);
            }
            return _clear_overflow(inner, code);
        }

        let force_sw = flags.contains(OverflowFlags::FORCE_SW);
        if !inner.events[idx].derived.kind.overflows_on_first_native() && !force_sw {
            return Err(Error::Invalid);
        }
        if (inner.mpx.is_some() || inner.kernel_mpx) && !force_sw {
            return Err(Error::Invalid);
        }
        let info = self.lib._component(inner._cidx()?)?.info();
        let hardware = info.hardware_intr && !force_sw;

        let (entries, replacing) = match inner.overflow.as_ref() {
            None if handler.is_none() => return Err(Error::Invalid),
            None => (0, false),
            Some(ov) if ov.hardware != hardware => return Err(Error::Conflict),
            Some(ov) => (ov.entries.len(), ov.entry(code).is_some()),
        };
        if !replacing && entries >= info.num_cntrs {
            return Err(Error::Conflict);
        }
        let position = inner.events[idx].positions.first().copied().ok_or(Error::Bug)?;
        if hardware {
            inner
                .control
                .as_mut()
                .ok_or(Error::Bug)?
                .set_overflow(position, threshold as u64)?;
        }
        let ov = inner
            .overflow
            .get_or_insert_with(|| OverflowState::new(hardware));
        ov.remove(code);
        ov.entries.push(OverflowEntry {
            code,
            threshold,
            deadline: threshold,
            event_index: idx,
            position,
        });
        if handler.is_some() {
            inner.handler.0 = handler;
        }
        inner.state |= State::OVERFLOWING;
        debug!(
            "EventSet {} overflows on {} every {} ({})",
            self.id,
            code,
            threshold,
            if hardware { "hardware" } else { "software" }
        );
        Ok(())
    }

    /// Indices of the events whose counter bit is set in an overflow `vector`.
    pub fn overflow_event_index(&self, vector: u64) -> Result<Vec<usize>> {
        if vector == 0 {
            return Err(Error::Invalid);
        }
        let inner = self._lock()?;
        inner._alive()?;
        Ok(inner
            .events
            .iter()
            .enumerate()
            .filter(|(_, e)| e.derived.kind.overflows_on_first_native())
            .filter(|(_, e)| {
                e.positions
                    .first()
                    .map(|p| *p < 64 && vector & (1u64 << *p) != 0)
                    .unwrap_or(false)
            })
            .map(|(i, _)| i)
            .collect())
    }
}

/// Remove the overflow entry of `code`, dropping the whole overflow state with the last one.
fn _clear_overflow(inner: &mut SetInner, code: EventCode) -> Result<()> {
    let (entry, hardware, empty) = match inner.overflow.as_mut() {
        Some(ov) => {
            let entry = ov.remove(code).ok_or(Error::Invalid)?;
            (entry, ov.hardware, ov.entries.is_empty())
        }
        None => return Err(Error::Invalid),
    };
    if hardware {
        if let Some(control) = inner.control.as_mut() {
            control.set_overflow(entry.position, 0)?;
        }
    }
    if empty {
        inner.overflow = None;
        inner.handler.0 = None;
        inner.state.remove(State::OVERFLOWING);
    }
    Ok(())
}

impl Drop for EventSet {
    fn drop(&mut self) {
        let running = self
            .inner
            .lock()
            .map(|i| i.state.contains(State::RUNNING))
            .unwrap_or(false);
        if running {
            if let Err(e) = self._halt() {
                error!("Could not stop EventSet {} on drop: {}", self.id, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::example::ExampleComponent;
    use crate::component::{Component, ComponentInfo, HardwareOverflow, NativeEventInfo};
    use crate::events::preset;
    use crate::Config;
    use std::sync::mpsc;
    use std::time::Duration;

    const DEFINITIONS: &str = "CPU,example\n\
        PRESET,PAPI_TOT_CYC,NOT_DERIVED,EXAMPLE_CONSTANT\n\
        PRESET,PAPI_TOT_INS,NOT_DERIVED,EXAMPLE_AUTOINC\n\
        PRESET,PAPI_L1_DCM,NOT_DERIVED,EXAMPLE_ZERO\n\
        PRESET,PAPI_BR_INS,NOT_DERIVED,EXAMPLE_GLOBAL_AUTOINC\n\
        PRESET,PAPI_FP_OPS,DERIVED_ADD,EXAMPLE_CONSTANT,EXAMPLE_AUTOINC\n\
        PRESET,PAPI_SP_OPS,DERIVED_POSTFIX,N0|2|*|N1|-|,EXAMPLE_CONSTANT,EXAMPLE_ZERO\n";

    fn _lib_with(clock: Option<Arc<ManualClock>>, interval: Duration) -> Library {
        let _ = env_logger::try_init();
        let config = Config {
            multiplex_interval: interval,
            overflow_interval: interval,
            ..Config::default()
        };
        let mut builder = Library::builder()
            .config(config)
            .components(vec![Box::new(ExampleComponent::default())])
            .event_definitions(DEFINITIONS);
        if let Some(clock) = clock {
            builder = builder.clock(clock);
        }
        builder.build().unwrap()
    }

    fn _lib() -> Library {
        _lib_with(None, Duration::from_secs(3600))
    }

    fn _native(lib: &Library, name: &str) -> EventCode {
        lib.event_name_to_code(name).unwrap()
    }

    #[test]
    fn test_lifecycle() {
        let lib = _lib();
        let mut set = lib.create_eventset();
        assert_eq!(set.state().unwrap(), State::STOPPED);
        assert_eq!(set.component().unwrap(), None);
        assert_eq!(set.start().unwrap_err().code(), Error::NoComponent.code());

        set.add_event(preset::TOT_CYC).unwrap();
        set.add_named_event("EXAMPLE_AUTOINC").unwrap();
        assert_eq!(set.component().unwrap(), Some(0));
        assert_eq!(set.num_events().unwrap(), 2);
        assert_eq!(set.read().unwrap(), vec![0, 0]);

        set.start().unwrap();
        assert!(set.state().unwrap().contains(State::RUNNING));
        assert_eq!(set.start().unwrap_err().code(), Error::IsRunning.code());
        assert_eq!(
            set.add_event(preset::L1_DCM).unwrap_err().code(),
            Error::IsRunning.code()
        );
        assert_eq!(set.read().unwrap(), vec![42, 0]);
        assert_eq!(set.read().unwrap(), vec![42, 1]);
        let (values, ts) = set.read_ts().unwrap();
        assert_eq!(values, vec![42, 2]);
        assert!(ts > 0);
        let stopped = set.stop().unwrap();
        assert_eq!(stopped, vec![42, 3]);
        assert_eq!(set.read().unwrap(), stopped);
        assert_eq!(set.stop().unwrap_err().code(), Error::NotRunning.code());

        assert_eq!(set.destroy().unwrap_err().code(), Error::Invalid.code());
        set.cleanup().unwrap();
        assert_eq!(set.component().unwrap(), None);
        set.destroy().unwrap();
        assert_eq!(set.state().unwrap_err().code(), Error::NoEventSet.code());
        assert_eq!(set.start().unwrap_err().code(), Error::NoEventSet.code());
    }

    #[test]
    fn test_add_event_errors() {
        let lib = _lib();
        let mut set = lib.create_eventset();
        assert_eq!(set.start().unwrap_err().code(), Error::NoComponent.code());
        // Not defined on the example component.
        assert_eq!(
            set.add_event(preset::L2_DCM).unwrap_err().code(),
            Error::NoEvent.code()
        );
        set.add_event(preset::TOT_CYC).unwrap();
        assert_eq!(
            set.add_event(preset::TOT_CYC).unwrap_err().code(),
            Error::Conflict.code()
        );
        set.add_event(preset::TOT_INS).unwrap();
        set.add_event(preset::BR_INS).unwrap();
        // A fourth native does not fit on three counters.
        assert_eq!(
            set.add_event(preset::L1_DCM).unwrap_err().code(),
            Error::Count.code()
        );
        assert_eq!(set.num_events().unwrap(), 3);
        assert_eq!(set.assign_component(1).unwrap_err().code(), Error::NoComponent.code());
        set.assign_component(0).unwrap();
    }

    /// Component whose native 2 cannot share the counters with anything else.
    #[derive(Debug)]
    struct Picky {
        info: ComponentInfo,
    }

    #[derive(Debug)]
    struct PickyState;

    impl Component for Picky {
        fn info(&self) -> &ComponentInfo {
            &self.info
        }

        fn info_mut(&mut self) -> &mut ComponentInfo {
            &mut self.info
        }

        fn init_component(&mut self, _cidx: usize) -> Result<()> {
            Ok(())
        }

        fn num_native_events(&self) -> usize {
            3
        }

        fn native_info(&self, code: u32) -> Result<NativeEventInfo> {
            if code >= 3 {
                return Err(Error::NoEvent);
            }
            Ok(NativeEventInfo {
                code,
                symbol: format!("PICKY_{}", code),
                ..NativeEventInfo::default()
            })
        }

        fn new_control_state(&self) -> Result<Box<dyn ControlState>> {
            Ok(Box::new(PickyState))
        }
    }

    impl ControlState for PickyState {
        fn update(&mut self, natives: &mut [NativeSlot]) -> Result<()> {
            if natives.len() > 1 && natives.iter().any(|n| n.code == 2) {
                return Err(Error::Conflict);
            }
            for (i, n) in natives.iter_mut().enumerate() {
                n.position = Some(i);
            }
            Ok(())
        }

        fn start(&mut self) -> Result<()> {
            Ok(())
        }

        fn stop(&mut self) -> Result<()> {
            Ok(())
        }

        fn read(&mut self) -> Result<Vec<i64>> {
            Ok(vec![7, 8, 9])
        }

        fn reset(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_allocation_conflict_rolls_back() {
        let lib = Library::builder()
            .components(vec![Box::new(Picky {
                info: ComponentInfo {
                    name: "picky".into(),
                    num_cntrs: 4,
                    ..ComponentInfo::default()
                },
            })])
            .build()
            .unwrap();
        let mut set = lib.create_eventset();
        set.add_named_event("PICKY_0").unwrap();
        set.add_named_event("picky:::PICKY_1").unwrap();
        assert_eq!(
            set.add_named_event("PICKY_2").unwrap_err().code(),
            Error::Conflict.code()
        );
        assert_eq!(set.num_events().unwrap(), 2);
        set.start().unwrap();
        assert_eq!(set.stop().unwrap(), vec![7, 8]);
    }

    #[test]
    fn test_shared_natives_and_derived() {
        let lib = _lib();
        let mut set = lib.create_eventset();
        set.add_events(&[preset::TOT_CYC, preset::FP_OPS, preset::SP_OPS])
            .unwrap();
        set.start().unwrap();
        // FP_OPS = 42 + autoinc, SP_OPS = 42 * 2 - 0.
        assert_eq!(set.read().unwrap(), vec![42, 42, 84]);
        assert_eq!(set.read().unwrap(), vec![42, 43, 84]);
        set.stop().unwrap();
        set.remove_event(preset::TOT_CYC).unwrap();
        // CONSTANT is still used by the derived events.
        set.start().unwrap();
        assert_eq!(set.read().unwrap(), vec![42, 84]);
        set.stop().unwrap();
        assert_eq!(
            set.remove_event(preset::TOT_CYC).unwrap_err().code(),
            Error::Invalid.code()
        );
        set.remove_events(&[preset::FP_OPS, preset::SP_OPS]).unwrap();
        assert_eq!(set.list_events().unwrap(), vec![]);
    }

    #[test]
    fn test_reset_accum_write() {
        let lib = _lib();
        let mut set = lib.create_eventset();
        set.add_named_event("PAPI_TOT_CYC").unwrap();
        set.add_named_event("PAPI_TOT_INS").unwrap();
        set.start().unwrap();
        assert_eq!(set.read().unwrap(), vec![42, 0]);
        assert_eq!(set.read().unwrap(), vec![42, 1]);
        set.reset().unwrap();
        let mut acc = vec![1, 1];
        set.accum(&mut acc).unwrap();
        assert_eq!(acc, vec![43, 1]);
        assert_eq!(set.accum(&mut [0]).unwrap_err().code(), Error::Invalid.code());
        set.write(&[7, 100]).unwrap();
        assert_eq!(set.read().unwrap(), vec![42, 100]);
        set.stop().unwrap();
        set.write(&[5, 6]).unwrap();
        assert_eq!(set.read().unwrap(), vec![5, 6]);
        set.reset().unwrap();
        assert_eq!(set.read().unwrap(), vec![0, 0]);
    }

    #[test]
    fn test_one_running_set_per_component_and_thread() {
        let lib = _lib();
        let mut a = lib.create_eventset();
        let mut b = lib.create_eventset();
        a.add_event(preset::TOT_CYC).unwrap();
        b.add_event(preset::TOT_CYC).unwrap();
        a.start().unwrap();
        assert_eq!(b.start().unwrap_err().code(), Error::IsRunning.code());
        let handle = std::thread::spawn(move || {
            b.start().unwrap();
            b.stop().unwrap()
        });
        assert_eq!(handle.join().unwrap(), vec![42]);
        a.stop().unwrap();
    }

    #[test]
    fn test_drop_frees_running_slot() {
        let lib = _lib();
        {
            let mut a = lib.create_eventset();
            a.add_event(preset::TOT_CYC).unwrap();
            a.start().unwrap();
        }
        let mut b = lib.create_eventset();
        b.add_event(preset::TOT_CYC).unwrap();
        b.start().unwrap();
        b.stop().unwrap();
    }

    #[test]
    fn test_domain_granularity_attach() {
        let lib = _lib();
        let mut set = lib.create_eventset();
        assert_eq!(set.get_domain().unwrap_err().code(), Error::NoComponent.code());
        set.assign_component(0).unwrap();
        assert_eq!(set.get_domain().unwrap(), Domain::USER);
        set.set_domain(Domain::USER | Domain::KERNEL).unwrap();
        assert_eq!(set.get_domain().unwrap(), Domain::USER | Domain::KERNEL);
        assert_eq!(
            set.set_domain(Domain::ALL).unwrap_err().code(),
            Error::InvalidDomain.code()
        );
        assert_eq!(set.get_granularity().unwrap(), Granularity::THR);
        assert_eq!(
            set.set_granularity(Granularity::SYS).unwrap_err().code(),
            Error::Invalid.code()
        );
        assert_eq!(set.detach().unwrap_err().code(), Error::Invalid.code());
        set.attach(1).unwrap();
        assert!(set.state().unwrap().contains(State::ATTACHED));
        assert_eq!(set.attach(1).unwrap_err().code(), Error::Invalid.code());
        set.detach().unwrap();
        assert_eq!(set.attach_cpu(0).unwrap_err().code(), Error::Component.code());
        assert_eq!(set.set_inherit(true).unwrap_err().code(), Error::Component.code());
    }

    #[test]
    fn test_library_default_domain() {
        let lib = _lib();
        lib.set_domain(Domain::KERNEL).unwrap();
        let mut set = lib.create_eventset();
        set.add_event(preset::TOT_CYC).unwrap();
        assert_eq!(set.get_domain().unwrap(), Domain::KERNEL);
        lib.set_domain(Domain::SUPERVISOR).unwrap();
        let mut other = lib.create_eventset();
        other.assign_component(0).unwrap();
        // Not available on the component, so its default applies.
        assert_eq!(other.get_domain().unwrap(), Domain::USER);
    }

    #[test]
    fn test_overflow_rules() {
        let lib = _lib();
        let mut set = lib.create_eventset();
        set.add_events(&[preset::TOT_CYC, preset::FP_OPS]).unwrap();
        let handler = || -> Option<OverflowHandler> { Some(Box::new(|_: &OverflowEvent| {})) };
        let none = OverflowFlags::default();
        let sw = OverflowFlags::FORCE_SW;

        assert_eq!(
            set.overflow(preset::L1_DCM, 10, none, handler()).unwrap_err().code(),
            Error::NoEvent.code()
        );
        assert_eq!(
            set.overflow(preset::TOT_CYC, -1, none, handler()).unwrap_err().code(),
            Error::Invalid.code()
        );
        assert_eq!(
            set.overflow(preset::TOT_CYC, 10, none, None).unwrap_err().code(),
            Error::Invalid.code()
        );
        assert_eq!(
            set.overflow(preset::TOT_CYC, 0, none, handler()).unwrap_err().code(),
            Error::Invalid.code()
        );
        // Derived events only in software.
        assert_eq!(
            set.overflow(preset::FP_OPS, 10, none, handler()).unwrap_err().code(),
            Error::Invalid.code()
        );
        set.overflow(preset::TOT_CYC, 10, none, handler()).unwrap();
        assert!(set.state().unwrap().contains(State::OVERFLOWING));
        set.overflow(preset::FP_OPS, 10, sw, None).unwrap();
        // Natives of an overflowing event cannot be added again.
        assert_eq!(
            set.add_event(_native(&lib, "EXAMPLE_CONSTANT")).unwrap_err().code(),
            Error::Conflict.code()
        );
        set.overflow(preset::TOT_CYC, 0, none, None).unwrap();
        set.remove_event(preset::FP_OPS).unwrap();
        assert!(!set.state().unwrap().contains(State::OVERFLOWING));
        set.attach(3).unwrap();
        assert_eq!(
            set.overflow(preset::TOT_CYC, 10, none, handler()).unwrap_err().code(),
            Error::Invalid.code()
        );
    }

    #[test]
    fn test_remove_forced_software_overflow() {
        let lib = _lib();
        let handler = || -> Option<OverflowHandler> { Some(Box::new(|_: &OverflowEvent| {})) };
        let none = OverflowFlags::default();
        let sw = OverflowFlags::FORCE_SW;

        let mut derived = lib.create_eventset();
        derived.add_event(preset::FP_OPS).unwrap();
        derived.overflow(preset::FP_OPS, 10, sw, handler()).unwrap();
        assert!(derived.state().unwrap().contains(State::OVERFLOWING));
        derived.overflow(preset::FP_OPS, 0, none, None).unwrap();
        assert!(!derived.state().unwrap().contains(State::OVERFLOWING));

        lib.multiplex_init().unwrap();
        let mut set = lib.create_eventset();
        let codes = [preset::TOT_CYC, preset::TOT_INS, preset::L1_DCM, preset::BR_INS];
        set.add_event(codes[0]).unwrap();
        set.set_multiplex(MultiplexFlags::default()).unwrap();
        set.add_events(&codes[1..]).unwrap();
        set.overflow(codes[0], 5, sw, handler()).unwrap();
        set.overflow(codes[1], 5, sw, None).unwrap();
        set.overflow(codes[2], 5, sw, None).unwrap();
        // No more entries than physical counters.
        assert_eq!(
            set.overflow(codes[3], 5, sw, None).unwrap_err().code(),
            Error::Conflict.code()
        );
        for code in codes[..3].iter() {
            set.overflow(*code, 0, none, None).unwrap();
        }
        assert!(!set.state().unwrap().contains(State::OVERFLOWING));
        assert_eq!(
            set.overflow(codes[0], 0, none, None).unwrap_err().code(),
            Error::Invalid.code()
        );
    }

    #[derive(Debug, Default)]
    struct Interrupts {
        /// `(position, threshold)` of every `set_overflow` call.
        programmed: Vec<(usize, u64)>,
        pending: Vec<HardwareOverflow>,
        refuse_multiplex: bool,
    }

    /// Component with counter interrupts and kernel multiplexing. Natives are placed on the
    /// counters in reverse order, so adding an event moves the others.
    #[derive(Debug)]
    struct Interrupting {
        info: ComponentInfo,
        shared: Arc<Mutex<Interrupts>>,
    }

    #[derive(Debug)]
    struct InterruptingState {
        shared: Arc<Mutex<Interrupts>>,
        count: usize,
    }

    impl Component for Interrupting {
        fn info(&self) -> &ComponentInfo {
            &self.info
        }

        fn info_mut(&mut self) -> &mut ComponentInfo {
            &mut self.info
        }

        fn init_component(&mut self, _cidx: usize) -> Result<()> {
            Ok(())
        }

        fn num_native_events(&self) -> usize {
            4
        }

        fn native_info(&self, code: u32) -> Result<NativeEventInfo> {
            if code >= 4 {
                return Err(Error::NoEvent);
            }
            Ok(NativeEventInfo {
                code,
                symbol: format!("IRQ_{}", code),
                ..NativeEventInfo::default()
            })
        }

        fn new_control_state(&self) -> Result<Box<dyn ControlState>> {
            Ok(Box::new(InterruptingState {
                shared: self.shared.clone(),
                count: 0,
            }))
        }
    }

    impl ControlState for InterruptingState {
        fn update(&mut self, natives: &mut [NativeSlot]) -> Result<()> {
            let len = natives.len();
            for (i, n) in natives.iter_mut().enumerate() {
                n.position = Some(len - 1 - i);
            }
            self.count = len;
            Ok(())
        }

        fn start(&mut self) -> Result<()> {
            Ok(())
        }

        fn stop(&mut self) -> Result<()> {
            Ok(())
        }

        fn read(&mut self) -> Result<Vec<i64>> {
            Ok(vec![0; self.count])
        }

        fn reset(&mut self) -> Result<()> {
            Ok(())
        }

        fn set_multiplex(&mut self) -> Result<()> {
            if self.shared.lock().unwrap().refuse_multiplex {
                return Err(Error::Component);
            }
            Ok(())
        }

        fn set_overflow(&mut self, position: usize, threshold: u64) -> Result<()> {
            self.shared.lock().unwrap().programmed.push((position, threshold));
            Ok(())
        }

        fn take_overflows(&mut self) -> Result<Vec<HardwareOverflow>> {
            Ok(std::mem::take(&mut self.shared.lock().unwrap().pending))
        }
    }

    fn _interrupting() -> (Library, Arc<Mutex<Interrupts>>) {
        let shared = Arc::new(Mutex::new(Interrupts::default()));
        let lib = Library::builder()
            .config(Config {
                multiplex_interval: Duration::from_secs(3600),
                overflow_interval: Duration::from_secs(3600),
                ..Config::default()
            })
            .components(vec![Box::new(Interrupting {
                info: ComponentInfo {
                    name: "irq".into(),
                    num_cntrs: 2,
                    num_mpx_cntrs: 4,
                    hardware_intr: true,
                    kernel_multiplex: true,
                    ..ComponentInfo::default()
                },
                shared: shared.clone(),
            })])
            .build()
            .unwrap();
        (lib, shared)
    }

    #[test]
    fn test_hardware_overflow() {
        let (lib, shared) = _interrupting();
        let irq = |i: usize| _native(&lib, &format!("IRQ_{}", i));
        let handler = || -> Option<OverflowHandler> { Some(Box::new(|_: &OverflowEvent| {})) };
        let none = OverflowFlags::default();
        let mut set = lib.create_eventset();
        set.add_event(irq(0)).unwrap();
        set.overflow(irq(0), 100, none, handler()).unwrap();
        assert_eq!(shared.lock().unwrap().programmed, vec![(0, 100)]);

        // IRQ_0 moves to counter 1 and keeps its threshold there.
        set.add_event(irq(1)).unwrap();
        assert_eq!(shared.lock().unwrap().programmed, vec![(0, 100), (1, 100)]);
        assert_eq!(
            set.add_event(irq(2)).unwrap_err().code(),
            Error::Count.code()
        );
        assert_eq!(
            set.overflow(irq(1), 10, OverflowFlags::FORCE_SW, None)
                .unwrap_err()
                .code(),
            Error::Conflict.code()
        );
        set.overflow(irq(1), 50, none, None).unwrap();

        lib.multiplex_init().unwrap();
        assert_eq!(
            set.set_multiplex(MultiplexFlags::default()).unwrap_err().code(),
            Error::Combo.code()
        );

        set.start().unwrap();
        shared.lock().unwrap().pending = vec![
            HardwareOverflow {
                address: 0x1000,
                positions: 0b10,
            },
            HardwareOverflow {
                address: 0x2000,
                positions: 0b01,
            },
        ];
        let fired = {
            let mut inner = set.inner.lock().unwrap();
            inner.tick(false, lib.hz()).unwrap()
        };
        assert_eq!(fired.len(), 2);
        assert_eq!(fired[0].address, 0x1000);
        assert_eq!(fired[0].eventset, set.id());
        assert_eq!(set.overflow_event_index(fired[0].vector).unwrap(), vec![0]);
        assert_eq!(set.overflow_event_index(fired[1].vector).unwrap(), vec![1]);
        set.stop().unwrap();

        set.overflow(irq(0), 0, none, None).unwrap();
        assert_eq!(shared.lock().unwrap().programmed.last(), Some(&(1, 0)));
        set.overflow(irq(1), 0, none, None).unwrap();
        assert!(!set.state().unwrap().contains(State::OVERFLOWING));
        set.set_multiplex(MultiplexFlags::default()).unwrap();
    }

    #[test]
    fn test_kernel_multiplex() {
        let (lib, shared) = _interrupting();
        let irq = |i: usize| _native(&lib, &format!("IRQ_{}", i));
        lib.multiplex_init().unwrap();
        let mut set = lib.create_eventset();
        set.add_events(&[irq(0), irq(1)]).unwrap();

        shared.lock().unwrap().refuse_multiplex = true;
        assert_eq!(
            set.set_multiplex(MultiplexFlags::default()).unwrap_err().code(),
            Error::Component.code()
        );
        assert!(!set.get_multiplex().unwrap());
        assert!(!set.state().unwrap().contains(State::MULTIPLEXING));
        assert_eq!(
            set.add_event(irq(2)).unwrap_err().code(),
            Error::Count.code()
        );

        shared.lock().unwrap().refuse_multiplex = false;
        set.set_multiplex(MultiplexFlags::default()).unwrap();
        assert!(set.get_multiplex().unwrap());
        assert!(set.state().unwrap().contains(State::MULTIPLEXING));
        set.add_events(&[irq(2), irq(3)]).unwrap();
        assert_eq!(
            set.overflow(
                irq(0),
                10,
                OverflowFlags::default(),
                Some(Box::new(|_: &OverflowEvent| {}))
            )
            .unwrap_err()
            .code(),
            Error::Invalid.code()
        );
        set.start().unwrap();
        assert_eq!(set.stop().unwrap(), vec![0; 4]);
    }

    #[test]
    fn test_software_overflow_dispatch() {
        let lib = _lib();
        let mut set = lib.create_eventset();
        set.add_events(&[preset::TOT_CYC, preset::TOT_INS]).unwrap();
        let (tx, rx) = mpsc::channel();
        set.overflow(
            preset::TOT_INS,
            2,
            OverflowFlags::default(),
            Some(Box::new(move |ev: &OverflowEvent| {
                let _ = tx.send(*ev);
            })),
        )
        .unwrap();
        set.start().unwrap();
        let hz = lib.hz();
        let mut fired = vec![];
        // AUTOINC reads 0, 1, 2, ... on every tick.
        for _ in 0..6 {
            let mut inner = set.inner.lock().unwrap();
            fired.push(inner.tick(false, hz).unwrap());
        }
        let counts: Vec<usize> = fired.iter().map(|f| f.len()).collect();
        assert_eq!(counts, vec![0, 0, 1, 0, 1, 0]);
        let ev = fired[2][0];
        assert_eq!(ev.eventset, set.id());
        assert_eq!(set.overflow_event_index(ev.vector).unwrap(), vec![1]);
        assert_eq!(set.overflow_event_index(0).unwrap_err().code(), Error::Invalid.code());
        set.stop().unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_ticker_calls_handler() {
        let lib = _lib_with(None, Duration::from_millis(1));
        let mut set = lib.create_eventset();
        set.add_event(preset::TOT_INS).unwrap();
        let (tx, rx) = mpsc::channel();
        set.overflow(
            preset::TOT_INS,
            1,
            OverflowFlags::default(),
            Some(Box::new(move |ev: &OverflowEvent| {
                let _ = tx.send(ev.vector);
            })),
        )
        .unwrap();
        set.start().unwrap();
        let vector = rx.recv_timeout(Duration::from_secs(10)).unwrap();
        set.stop().unwrap();
        assert_eq!(set.overflow_event_index(vector).unwrap(), vec![0]);
    }

    #[test]
    fn test_software_multiplex() {
        let clock = Arc::new(ManualClock::new(0));
        let lib = _lib_with(Some(clock.clone()), Duration::from_secs(3600));
        let mut set = lib.create_eventset();
        set.add_event(preset::TOT_CYC).unwrap();
        assert_eq!(
            set.set_multiplex(MultiplexFlags::default()).unwrap_err().code(),
            Error::NotInitialized.code()
        );
        lib.multiplex_init().unwrap();
        set.set_multiplex(MultiplexFlags::default()).unwrap();
        assert!(set.get_multiplex().unwrap());
        assert_eq!(
            set.set_multiplex(MultiplexFlags::default()).unwrap_err().code(),
            Error::Invalid.code()
        );
        // Four natives exceed the three counters, but not the multiplexed ones.
        set.add_events(&[preset::TOT_INS, preset::L1_DCM, preset::BR_INS])
            .unwrap();
        assert_eq!(
            set.overflow(preset::TOT_CYC, 5, OverflowFlags::default(), None)
                .unwrap_err()
                .code(),
            Error::Invalid.code()
        );
        set.start().unwrap();
        clock.advance(Duration::from_millis(1));
        {
            let mut inner = set.inner.lock().unwrap();
            inner.tick(true, 1.0).unwrap();
        }
        clock.advance(Duration::from_millis(1));
        let v = set.read().unwrap();
        // CONSTANT counted 42 in its slice and is extrapolated over the second one.
        assert_eq!(v[0], 84);
        assert_eq!(v[2], 0);
        assert_eq!(set.write(&[0, 0, 0, 0]).unwrap_err().code(), Error::Component.code());
        set.stop().unwrap();
        set.cleanup().unwrap();
        assert!(!set.get_multiplex().unwrap());
    }

    #[test]
    fn test_concurrent_sets() {
        use rayon::prelude::*;
        let lib = _lib();
        let totals: Vec<Vec<i64>> = (0..8)
            .into_par_iter()
            .map(|_| {
                let mut set = lib.create_eventset();
                set.add_events(&[preset::TOT_CYC, preset::L1_DCM]).unwrap();
                set.start().unwrap();
                set.stop().unwrap()
            })
            .collect();
        assert!(totals.iter().all(|t| *t == vec![42, 0]));
    }
}

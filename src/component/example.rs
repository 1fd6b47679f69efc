//! Emulated counters with fully deterministic values.
//!
//! Useful to exercise EventSets without hardware support:
//!
//! | event | value |
//! |---|---|
//! | `EXAMPLE_ZERO` | always `0` |
//! | `EXAMPLE_CONSTANT` | always `42` |
//! | `EXAMPLE_AUTOINC` | per control state, returns the value then increments it |
//! | `EXAMPLE_GLOBAL_AUTOINC` | same, shared by every control state of the component |
//!
//! The emulated hardware has three counters and not every event fits on every counter, so
//! placement goes through the bipartite allocator.

use crate::component::*;
use crate::consts::{Domain, Granularity};
use log::debug;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Number of simultaneous emulated counters.
pub const EXAMPLE_MAX_SIMULTANEOUS_COUNTERS: usize = 3;
/// Number of counters usable when multiplexing.
pub const EXAMPLE_MAX_MULTIPLEX_COUNTERS: usize = 4;
/// Value of the `EXAMPLE_CONSTANT` event.
pub const EXAMPLE_CONSTANT_VALUE: i64 = 42;

const EXAMPLE_ZERO: u32 = 0;
const EXAMPLE_CONSTANT: u32 = 1;
const EXAMPLE_AUTOINC: u32 = 2;
const EXAMPLE_GLOBAL_AUTOINC: u32 = 3;

/// (name, description, writable, usable counters)
const NATIVES: [(&str, &str, bool, u64); 4] = [
    ("EXAMPLE_ZERO", "This is an example counter, that always returns 0", false, 0b111),
    ("EXAMPLE_CONSTANT", "This is an example counter, that always returns a constant value of 42", false, 0b111),
    ("EXAMPLE_AUTOINC", "This is an example counter, that reports an auto-incrementing value", true, 0b011),
    ("EXAMPLE_GLOBAL_AUTOINC", "This is an example counter, that reports a global auto-incrementing value", true, 0b100),
];

/// The emulated component.
#[derive(Debug)]
pub struct ExampleComponent {
    info: ComponentInfo,
    global_autoinc: Arc<AtomicI64>,
}

impl Default for ExampleComponent {
    fn default() -> Self {
        ExampleComponent {
            info: ComponentInfo {
                name: "example".into(),
                short_name: "example".into(),
                description: "A simple example component".into(),
                num_cntrs: EXAMPLE_MAX_SIMULTANEOUS_COUNTERS,
                num_mpx_cntrs: EXAMPLE_MAX_MULTIPLEX_COUNTERS,
                default_domain: Domain::USER,
                available_domains: Domain::USER | Domain::KERNEL,
                default_granularity: Granularity::THR,
                available_granularities: Granularity::THR,
                attach: true,
                fast_counter_read: true,
                ..ComponentInfo::default()
            },
            global_autoinc: Arc::new(AtomicI64::new(0)),
        }
    }
}

impl Component for ExampleComponent {
    fn info(&self) -> &ComponentInfo {
        &self.info
    }

    fn info_mut(&mut self) -> &mut ComponentInfo {
        &mut self.info
    }

    fn init_component(&mut self, cidx: usize) -> Result<()> {
        debug!("Example component initialised at index {}", cidx);
        self.global_autoinc.store(0, Ordering::SeqCst);
        Ok(())
    }

    fn num_native_events(&self) -> usize {
        NATIVES.len()
    }

    fn native_info(&self, code: u32) -> Result<NativeEventInfo> {
        let (symbol, description, writable, _) = NATIVES.get(code as usize).ok_or(Error::NoEvent)?;
        Ok(NativeEventInfo {
            code,
            symbol: (*symbol).into(),
            description: (*description).into(),
            units: String::default(),
            data_type: DataType::Int64,
            writable: *writable,
        })
    }

    fn new_control_state(&self) -> Result<Box<dyn ControlState>> {
        Ok(Box::new(ExampleControlState {
            counters: [None; EXAMPLE_MAX_SIMULTANEOUS_COUNTERS],
            autoinc: 0,
            global_autoinc: self.global_autoinc.clone(),
            domain: self.info.default_domain,
            attached: None,
        }))
    }
}

/// Counter programming for one EventSet.
#[derive(Debug)]
pub struct ExampleControlState {
    /// Native programmed on each emulated counter.
    counters: [Option<u32>; EXAMPLE_MAX_SIMULTANEOUS_COUNTERS],
    autoinc: i64,
    global_autoinc: Arc<AtomicI64>,
    domain: Domain,
    attached: Option<i32>,
}

impl ExampleControlState {
    fn _read_counter(&mut self, native: u32) -> i64 {
        match native {
            EXAMPLE_ZERO => 0,
            EXAMPLE_CONSTANT => EXAMPLE_CONSTANT_VALUE,
            EXAMPLE_AUTOINC => {
                let old = self.autoinc;
                self.autoinc += 1;
                old
            }
            _ => self.global_autoinc.fetch_add(1, Ordering::SeqCst),
        }
    }
}

impl ControlState for ExampleControlState {
    fn update(&mut self, natives: &mut [NativeSlot]) -> Result<()> {
        let masks = natives
            .iter()
            .map(|n| {
                NATIVES
                    .get(n.code as usize)
                    .map(|x| x.3)
                    .ok_or(Error::NoEvent)
            })
            .collect::<Result<Vec<u64>>>()?;
        let placement =
            crate::alloc::allocate(&masks, EXAMPLE_MAX_SIMULTANEOUS_COUNTERS).ok_or(Error::Conflict)?;
        self.counters = [None; EXAMPLE_MAX_SIMULTANEOUS_COUNTERS];
        for (n, ctr) in natives.iter_mut().zip(placement) {
            n.position = Some(ctr);
            self.counters[ctr] = Some(n.code);
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
        let programmed = self.counters;
        Ok(programmed
            .iter()
            .map(|c| c.map(|n| self._read_counter(n)).unwrap_or(0))
            .collect())
    }

    fn reset(&mut self) -> Result<()> {
        self.autoinc = 0;
        self.global_autoinc.store(0, Ordering::SeqCst);
        Ok(())
    }

    fn write(&mut self, values: &[i64]) -> Result<()> {
        for (ctr, value) in values.iter().enumerate().take(EXAMPLE_MAX_SIMULTANEOUS_COUNTERS) {
            match self.counters[ctr] {
                Some(EXAMPLE_AUTOINC) => self.autoinc = *value,
                Some(EXAMPLE_GLOBAL_AUTOINC) => self.global_autoinc.store(*value, Ordering::SeqCst),
                _ => {}
            }
        }
        Ok(())
    }

    fn set_domain(&mut self, domain: Domain) -> Result<()> {
        if !(Domain::USER | Domain::KERNEL).contains(domain) {
            return Err(Error::InvalidDomain);
        }
        self.domain = domain;
        Ok(())
    }

    fn attach(&mut self, pid: i32) -> Result<()> {
        self.attached = Some(pid);
        Ok(())
    }

    fn detach(&mut self) -> Result<()> {
        self.attached = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn _slots(codes: &[u32]) -> Vec<NativeSlot> {
        codes.iter().map(|&c| NativeSlot::new(c)).collect()
    }

    #[test]
    fn test_native_lookup() {
        let cmp = ExampleComponent::default();
        assert_eq!(cmp.num_native_events(), 4);
        assert_eq!(cmp.name_to_native("EXAMPLE_AUTOINC").unwrap(), 2);
        assert!(cmp.name_to_native("EXAMPLE_NOPE").is_err());
        assert!(cmp.native_info(2).unwrap().writable);
        assert!(cmp.native_info(9).is_err());
    }

    #[test]
    fn test_counter_values_follow_positions() {
        let cmp = ExampleComponent::default();
        let mut cs = cmp.new_control_state().unwrap();
        let mut slots = _slots(&[EXAMPLE_CONSTANT, EXAMPLE_AUTOINC]);
        cs.update(&mut slots).unwrap();
        let pc = slots[0].position.unwrap();
        let pa = slots[1].position.unwrap();
        assert_ne!(pc, pa);
        let v = cs.read().unwrap();
        assert_eq!(v[pc], EXAMPLE_CONSTANT_VALUE);
        assert_eq!(v[pa], 0);
        assert_eq!(cs.read().unwrap()[pa], 1);
        cs.reset().unwrap();
        assert_eq!(cs.read().unwrap()[pa], 0);
        cs.write(&{
            let mut w = vec![0; 3];
            w[pa] = 100;
            w
        })
        .unwrap();
        assert_eq!(cs.read().unwrap()[pa], 100);
    }

    #[test]
    fn test_counter_constraints() {
        let cmp = ExampleComponent::default();
        let mut cs = cmp.new_control_state().unwrap();
        let mut all = _slots(&[EXAMPLE_ZERO, EXAMPLE_CONSTANT, EXAMPLE_AUTOINC, EXAMPLE_GLOBAL_AUTOINC]);
        assert_eq!(cs.update(&mut all).unwrap_err().code(), Error::Conflict.code());
        let mut three = _slots(&[EXAMPLE_ZERO, EXAMPLE_AUTOINC, EXAMPLE_GLOBAL_AUTOINC]);
        cs.update(&mut three).unwrap();
        assert_eq!(three[2].position, Some(2));
    }

    #[test]
    fn test_global_counter_is_shared() {
        let cmp = ExampleComponent::default();
        let mut a = cmp.new_control_state().unwrap();
        let mut b = cmp.new_control_state().unwrap();
        let mut sa = _slots(&[EXAMPLE_GLOBAL_AUTOINC]);
        let mut sb = _slots(&[EXAMPLE_GLOBAL_AUTOINC]);
        a.update(&mut sa).unwrap();
        b.update(&mut sb).unwrap();
        assert_eq!(a.read().unwrap()[2], 0);
        assert_eq!(b.read().unwrap()[2], 1);
    }
}

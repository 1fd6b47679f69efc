//! Overflow thresholds of an EventSet and the callback they trigger.

use crate::events::EventCode;
use std::fmt;

/// Notification passed to an overflow handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverflowEvent {
    /// Id of the EventSet that overflowed.
    pub eventset: usize,
    /// Instruction address of the overflow, `0` when unknown.
    pub address: u64,
    /// Bit `p` is set when the counter at position `p` overflowed.
    ///
    /// Use [`crate::EventSet::overflow_event_index`] to map it back to events.
    pub vector: u64,
}

/// Callback invoked on overflow, from the ticker thread of the running EventSet.
pub type OverflowHandler = Box<dyn FnMut(&OverflowEvent) + Send>;

/// Handler slot that can be debug printed.
pub(crate) struct HandlerSlot(pub(crate) Option<OverflowHandler>);

impl fmt::Debug for HandlerSlot {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.0 {
            Some(_) => write!(f, "HandlerSlot(Some(..))"),
            None => write!(f, "HandlerSlot(None)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct OverflowEntry {
    pub(crate) code: EventCode,
    pub(crate) threshold: i64,
    /// Value the event has to reach for the next software overflow.
    pub(crate) deadline: i64,
    pub(crate) event_index: usize,
    /// Counter position of the first native of the event.
    pub(crate) position: usize,
}

/// Thresholds programmed on one EventSet. Either all of them are delivered by the component or
/// all of them are polled in software.
#[derive(Debug, Default)]
pub(crate) struct OverflowState {
    pub(crate) hardware: bool,
    pub(crate) entries: Vec<OverflowEntry>,
}

impl OverflowState {
    pub(crate) fn new(hardware: bool) -> Self {
        OverflowState {
            hardware,
            entries: vec![],
        }
    }

    pub(crate) fn entry(&self, code: EventCode) -> Option<&OverflowEntry> {
        self.entries.iter().find(|e| e.code == code)
    }

    pub(crate) fn remove(&mut self, code: EventCode) -> Option<OverflowEntry> {
        let idx = self.entries.iter().position(|e| e.code == code)?;
        Some(self.entries.remove(idx))
    }

    pub(crate) fn reset_deadlines(&mut self) {
        for e in self.entries.iter_mut() {
            e.deadline = e.threshold;
        }
    }

    /// Compare event values against the deadlines, returning the overflow vector.
    pub(crate) fn check(&mut self, event_values: &[i64]) -> u64 {
        let mut vector = 0;
        for e in self.entries.iter_mut() {
            let value = match event_values.get(e.event_index) {
                Some(v) => *v,
                None => continue,
            };
            if value >= e.deadline {
                vector |= 1u64 << e.position;
                e.deadline = value + e.threshold;
            }
        }
        vector
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn _entry(code: u32, threshold: i64, event_index: usize, position: usize) -> OverflowEntry {
        OverflowEntry {
            code: EventCode(code),
            threshold,
            deadline: threshold,
            event_index,
            position,
        }
    }

    #[test]
    fn test_deadlines_move_past_value() {
        let mut state = OverflowState::new(false);
        state.entries.push(_entry(1, 100, 0, 2));
        state.entries.push(_entry(2, 10, 1, 0));
        assert_eq!(state.check(&[50, 5]), 0);
        assert_eq!(state.check(&[120, 5]), 0b100);
        // Next deadline is 220.
        assert_eq!(state.check(&[219, 10]), 0b001);
        assert_eq!(state.check(&[220, 19]), 0b100);
        state.reset_deadlines();
        assert_eq!(state.entries[0].deadline, 100);
        assert_eq!(state.check(&[100, 10]), 0b101);
    }

    #[test]
    fn test_entries_by_code() {
        let mut state = OverflowState::new(true);
        state.entries.push(_entry(7, 1000, 0, 0));
        assert!(state.entry(EventCode(7)).is_some());
        assert!(state.remove(EventCode(8)).is_none());
        assert_eq!(state.remove(EventCode(7)).unwrap().threshold, 1000);
        assert!(state.entries.is_empty());
        assert!(format!("{:?}", HandlerSlot(None)).contains("None"));
    }
}

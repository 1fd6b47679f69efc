//! Bipartite matching of native events onto physical counters.
//!
//! Components whose events can only be programmed on a subset of their counters describe each
//! event by a bitmask of usable counters. The allocator first settles every event that has a
//! single choice left, propagating that choice to the others, and then resolves whatever
//! remains with a recursive search.

use log::debug;

/// Find a distinct counter for each entry of `masks`.
///
/// Bit `c` of `masks[i]` is set if event `i` may be counted on counter `c`. On success the
/// returned vector holds the counter chosen for each event, in order. `None` means no complete
/// assignment exists on `num_counters` counters.
pub fn allocate(masks: &[u64], num_counters: usize) -> Option<Vec<usize>> {
    if masks.len() > num_counters || num_counters > 64 {
        return None;
    }
    let limit = if num_counters == 64 {
        u64::MAX
    } else {
        (1u64 << num_counters) - 1
    };
    let mut avail: Vec<u64> = masks.iter().map(|m| m & limit).collect();
    let mut chosen: Vec<Option<usize>> = vec![None; masks.len()];

    // Settle events that only fit on one counter and remove that counter from everyone else
    loop {
        let exclusive = (0..avail.len()).find(|&i| chosen[i].is_none() && avail[i].count_ones() == 1);
        let i = match exclusive {
            Some(i) => i,
            None => break,
        };
        let bit = avail[i];
        chosen[i] = Some(bit.trailing_zeros() as usize);
        for (j, mask) in avail.iter_mut().enumerate() {
            if j != i && chosen[j].is_none() {
                *mask &= !bit;
            }
        }
        // Another event needed this counter and now has none.
        if (0..avail.len()).any(|j| chosen[j].is_none() && avail[j] == 0) {
            debug!("Exclusive counter conflict on counter {}", bit.trailing_zeros());
            return None;
        }
    }
    if chosen.iter().zip(avail.iter()).any(|(c, m)| c.is_none() && *m == 0) {
        return None;
    }

    let used = chosen
        .iter()
        .filter_map(|c| *c)
        .fold(0u64, |acc, c| acc | (1 << c));
    let pending: Vec<usize> = (0..chosen.len()).filter(|&i| chosen[i].is_none()).collect();
    if _search(&pending, &avail, used, &mut chosen) {
        Some(chosen.into_iter().map(|c| c.unwrap_or_default()).collect())
    } else {
        None
    }
}

/// Depth first search over the remaining unassigned events.
fn _search(pending: &[usize], avail: &[u64], used: u64, chosen: &mut [Option<usize>]) -> bool {
    let (&first, rest) = match pending.split_first() {
        Some(x) => x,
        None => return true,
    };
    let mut candidates = avail[first] & !used;
    while candidates != 0 {
        let ctr = candidates.trailing_zeros() as usize;
        candidates &= candidates - 1;
        chosen[first] = Some(ctr);
        if _search(rest, avail, used | (1 << ctr), chosen) {
            return true;
        }
    }
    chosen[first] = None;
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn _is_valid(masks: &[u64], assignment: &[usize]) -> bool {
        let mut seen = 0u64;
        for (m, &c) in masks.iter().zip(assignment) {
            if m & (1 << c) == 0 || seen & (1 << c) != 0 {
                return false;
            }
            seen |= 1 << c;
        }
        true
    }

    #[test]
    fn test_exclusive_events_are_placed_first() {
        // The greedy choice for event 0 would steal counter 0 from event 1.
        let masks = [0b011, 0b001, 0b110];
        let out = allocate(&masks, 3).unwrap();
        assert_eq!(out[1], 0);
        assert!(_is_valid(&masks, &out));
    }

    #[test]
    fn test_backtracking_finds_assignment() {
        let masks = [0b0011, 0b0011, 0b0110, 0b1100];
        let out = allocate(&masks, 4).unwrap();
        assert!(_is_valid(&masks, &out));
    }

    #[test]
    fn test_conflicts_are_detected() {
        assert!(allocate(&[0b01, 0b01], 2).is_none());
        assert!(allocate(&[0b011, 0b011, 0b011], 3).is_none());
        assert!(allocate(&[0b1, 0b1, 0b1], 2).is_none());
        assert!(allocate(&[0b1000], 3).is_none());
    }

    #[test]
    fn test_empty_request() {
        assert_eq!(allocate(&[], 4), Some(vec![]));
    }
}

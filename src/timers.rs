//! Wall clock, process time and cycle timers.

use nix::libc;

fn _clock_ns(clock: libc::clockid_t) -> i64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    let rc = unsafe { libc::clock_gettime(clock, &mut ts) };
    if rc != 0 {
        return 0;
    }
    ts.tv_sec as i64 * 1_000_000_000 + ts.tv_nsec as i64
}

/// Wall clock time in nanoseconds from an arbitrary starting point.
pub fn real_nsec() -> i64 {
    _clock_ns(libc::CLOCK_MONOTONIC)
}

/// Wall clock time in microseconds from an arbitrary starting point.
pub fn real_usec() -> i64 {
    real_nsec() / 1000
}

/// CPU time consumed by the calling thread, in nanoseconds.
pub fn virt_nsec() -> i64 {
    _clock_ns(libc::CLOCK_THREAD_CPUTIME_ID)
}

/// CPU time consumed by the calling thread, in microseconds.
pub fn virt_usec() -> i64 {
    virt_nsec() / 1000
}

/// Wall clock time in cycles.
///
/// Reads the time stamp counter where there is one, otherwise converts [`real_usec`] with the
/// nominal frequency.
pub fn real_cyc() -> i64 {
    match crate::arch::read_tsc() {
        Some(tsc) => tsc as i64,
        None => (real_usec() as f64 * crate::sysinfo::cpu_mhz()) as i64,
    }
}

/// CPU time consumed by the calling thread, in cycles at the nominal frequency.
pub fn virt_cyc() -> i64 {
    (virt_usec() as f64 * crate::sysinfo::cpu_mhz()) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timers_advance() {
        let (r0, v0, c0) = (real_nsec(), virt_nsec(), real_cyc());
        let tmp: u64 = (0u64..200_000).map(|x| x.wrapping_mul(31)).sum();
        assert!(tmp > 0);
        std::thread::sleep(std::time::Duration::from_millis(2));
        assert!(real_nsec() - r0 >= 2_000_000);
        assert!(virt_nsec() >= v0);
        assert!(real_cyc() > c0);
        assert!(real_usec() > 0);
        assert!(virt_usec() >= 0);
        assert!(virt_cyc() >= 0);
    }
}

//! The timer module contains the monotonic machine timer shared by all
//! harts. The CLINT `mtime` register, the `time` CSR and the Sstc
//! `stimecmp` compares all read the same counter.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

/// The advertised timebase frequency (ticks per second).
pub const TIMER_FREQ: u64 = 10_000_000;

/// A 64-bit counter derived from the host monotonic clock, scaled to
/// [`TIMER_FREQ`]. Writes to the CLINT `mtime` register rebase the counter
/// without disturbing its monotonicity.
#[derive(Debug)]
pub struct MachineTimer {
    freq: u64,
    epoch: Instant,
    offset: AtomicI64,
}

impl MachineTimer {
    pub fn new(freq: u64) -> Self {
        Self {
            freq,
            epoch: Instant::now(),
            offset: AtomicI64::new(0),
        }
    }

    /// The timebase frequency in ticks per second.
    pub fn freq(&self) -> u64 {
        self.freq
    }

    fn raw(&self) -> u64 {
        let elapsed = self.epoch.elapsed();
        elapsed
            .as_secs()
            .wrapping_mul(self.freq)
            .wrapping_add(elapsed.subsec_nanos() as u64 * self.freq / 1_000_000_000)
    }

    /// Current counter value.
    pub fn now(&self) -> u64 {
        self.raw()
            .wrapping_add(self.offset.load(Ordering::Relaxed) as u64)
    }

    /// Rebase the counter so that it currently reads `value`.
    pub fn rebase(&self, value: u64) {
        self.offset
            .store(value.wrapping_sub(self.raw()) as i64, Ordering::Relaxed);
    }

    /// Returns true once the counter has reached `cmp`.
    pub fn pending(&self, cmp: u64) -> bool {
        self.now() >= cmp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic() {
        let timer = MachineTimer::new(TIMER_FREQ);
        let a = timer.now();
        let b = timer.now();
        assert!(b >= a);
    }

    #[test]
    fn rebase_moves_the_counter() {
        let timer = MachineTimer::new(TIMER_FREQ);
        timer.rebase(1 << 40);
        let now = timer.now();
        assert!(now >= 1 << 40);
        assert!(now < (1 << 40) + TIMER_FREQ);
        assert!(timer.pending(1 << 40));
        assert!(!timer.pending(u64::MAX));
    }
}

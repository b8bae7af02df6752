//! The clint module contains the core-local interruptor (CLINT): the
//! per-hart software interrupt bits, the machine timer compare registers
//! and the memory-mapped view of the shared machine timer. The register
//! layout is the SiFive convention (msip at 0x0, mtimecmp at 0x4000,
//! mtime at 0xbff8).
//!
//! The periodic update handler also evaluates each hart's Sstc
//! `stimecmp`, which compares against the same timer.

use std::sync::Arc;

use crate::bus::Mmio;
use crate::hart::HartSignal;
use crate::timer::MachineTimer;
use crate::trap::{IP_MSIP, IP_MTIP, IP_STIP};

/// Size of the CLINT register window.
pub const CLINT_SIZE: u64 = 0x10000;

const CLINT_MSIP: u64 = 0x0;
const CLINT_MTIMECMP: u64 = 0x4000;
const CLINT_MTIME: u64 = 0xbff8;

/// The core-local interruptor.
pub struct Clint {
    signals: Vec<Arc<HartSignal>>,
    timer: Arc<MachineTimer>,
    /// Machine timer compares, one per hart. Reset to the far future so
    /// MTIP is not asserted before firmware programs a deadline.
    mtimecmp: Vec<u64>,
}

impl Clint {
    pub fn new(signals: Vec<Arc<HartSignal>>, timer: Arc<MachineTimer>) -> Self {
        let mtimecmp = vec![u64::MAX; signals.len()];
        Self {
            signals,
            timer,
            mtimecmp,
        }
    }

    fn evaluate_timers(&self) {
        let now = self.timer.now();
        for (hart, signal) in self.signals.iter().enumerate() {
            if now >= self.mtimecmp[hart] {
                signal.raise(IP_MTIP);
            } else {
                signal.clear(IP_MTIP);
            }
            if now >= signal.stimecmp() {
                signal.raise(IP_STIP);
            } else {
                signal.clear(IP_STIP);
            }
        }
    }

    /// Merge a partial (4-byte) write into a 64-bit register.
    fn merge(old: u64, value: u64, size: u8, low_half: bool) -> u64 {
        if size == 8 {
            value
        } else if low_half {
            (old & !0xffff_ffff) | (value & 0xffff_ffff)
        } else {
            (old & 0xffff_ffff) | (value << 32)
        }
    }
}

impl Mmio for Clint {
    fn name(&self) -> &'static str {
        "clint"
    }

    fn read(&mut self, offset: u64, size: u8) -> u64 {
        let harts = self.signals.len() as u64;
        match offset {
            _ if offset < CLINT_MSIP + 4 * harts => {
                let hart = (offset / 4) as usize;
                (self.signals[hart].raised() & IP_MSIP != 0) as u64
            }
            _ if offset >= CLINT_MTIMECMP && offset < CLINT_MTIMECMP + 8 * harts => {
                let hart = ((offset - CLINT_MTIMECMP) / 8) as usize;
                let value = self.mtimecmp[hart];
                if size == 8 || offset % 8 == 0 {
                    value
                } else {
                    value >> 32
                }
            }
            CLINT_MTIME => self.timer.now(),
            _ if offset == CLINT_MTIME + 4 => self.timer.now() >> 32,
            _ => 0,
        }
    }

    fn write(&mut self, offset: u64, value: u64, size: u8) {
        let harts = self.signals.len() as u64;
        match offset {
            _ if offset < CLINT_MSIP + 4 * harts => {
                let hart = (offset / 4) as usize;
                if value & 1 != 0 {
                    self.signals[hart].raise(IP_MSIP);
                } else {
                    self.signals[hart].clear(IP_MSIP);
                }
            }
            _ if offset >= CLINT_MTIMECMP && offset < CLINT_MTIMECMP + 8 * harts => {
                let hart = ((offset - CLINT_MTIMECMP) / 8) as usize;
                self.mtimecmp[hart] =
                    Self::merge(self.mtimecmp[hart], value, size, offset % 8 == 0);
                self.evaluate_timers();
            }
            CLINT_MTIME => {
                let new = Self::merge(self.timer.now(), value, size, true);
                self.timer.rebase(new);
                self.evaluate_timers();
            }
            _ if offset == CLINT_MTIME + 4 => {
                let new = Self::merge(self.timer.now(), value, size, false);
                self.timer.rebase(new);
                self.evaluate_timers();
            }
            _ => {}
        }
    }

    fn update(&mut self) {
        self.evaluate_timers();
    }

    fn reset(&mut self) {
        self.mtimecmp.fill(u64::MAX);
        for signal in &self.signals {
            signal.clear(IP_MSIP | IP_MTIP | IP_STIP);
        }
    }
}

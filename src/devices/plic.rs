//! The plic module contains the platform-level interrupt controller
//! (PLIC), which routes global device interrupts to the supervisor
//! external interrupt line of each hart.
//!
//! The register layout follows the SiFive/QEMU virt convention: priority
//! words at the base, pending bits at 0x1000, per-context enable words
//! from 0x2080, and per-context threshold/claim pairs from 0x201000.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use crate::bus::Mmio;
use crate::hart::HartSignal;
use crate::trap::IP_SEIP;

/// Size of the PLIC register window.
pub const PLIC_SIZE: u64 = 0x40_0000;
/// Number of interrupt sources modelled.
pub const PLIC_SOURCES: usize = 32;

const PLIC_PENDING: u64 = 0x1000;
const PLIC_ENABLE: u64 = 0x2080;
const PLIC_ENABLE_STRIDE: u64 = 0x100;
const PLIC_CONTEXT: u64 = 0x20_1000;
const PLIC_CONTEXT_STRIDE: u64 = 0x2000;

struct Context {
    enable: u32,
    threshold: u32,
}

struct PlicState {
    priority: [u32; PLIC_SOURCES],
    contexts: Vec<Context>,
}

/// The interrupt controller. Shared between the device bus (register
/// accesses) and the devices that raise interrupts through it.
pub struct Plic {
    state: Mutex<PlicState>,
    pending: AtomicU32,
    signals: Vec<Arc<HartSignal>>,
}

impl Plic {
    pub fn new(signals: Vec<Arc<HartSignal>>) -> Self {
        let contexts = signals
            .iter()
            .map(|_| Context {
                enable: 0,
                threshold: 0,
            })
            .collect();
        Self {
            state: Mutex::new(PlicState {
                priority: [0; PLIC_SOURCES],
                contexts,
            }),
            pending: AtomicU32::new(0),
            signals,
        }
    }

    /// Assert an interrupt source.
    pub fn raise(&self, irq: u32) {
        if irq as usize >= PLIC_SOURCES {
            return;
        }
        self.pending.fetch_or(1 << irq, Ordering::Release);
        self.update_lines();
    }

    /// Deassert an interrupt source.
    pub fn clear(&self, irq: u32) {
        if irq as usize >= PLIC_SOURCES {
            return;
        }
        self.pending.fetch_and(!(1u32 << irq), Ordering::Release);
        self.update_lines();
    }

    /// Recompute the external interrupt line of every hart.
    fn update_lines(&self) {
        let pending = self.pending.load(Ordering::Acquire);
        let state = self.state.lock().unwrap();
        for (context, signal) in state.contexts.iter().zip(&self.signals) {
            if pending & context.enable != 0 {
                signal.raise(IP_SEIP);
            } else {
                signal.clear(IP_SEIP);
            }
        }
    }

    /// Claim the highest-priority pending enabled interrupt for a hart
    /// context, atomically clearing its pending bit.
    fn claim(&self, hart: usize) -> u32 {
        let state = self.state.lock().unwrap();
        let enabled = self.pending.load(Ordering::Acquire) & state.contexts[hart].enable;
        let mut best = 0;
        let mut best_priority = 0;
        for irq in 1..PLIC_SOURCES as u32 {
            if enabled & (1 << irq) != 0 && state.priority[irq as usize] >= best_priority {
                best = irq;
                best_priority = state.priority[irq as usize];
            }
        }
        drop(state);
        if best != 0 {
            self.pending.fetch_and(!(1u32 << best), Ordering::AcqRel);
            self.update_lines();
        }
        best
    }

    fn read_reg(&self, offset: u64) -> u64 {
        match offset {
            0..=0x7f => {
                let state = self.state.lock().unwrap();
                state.priority[(offset / 4) as usize] as u64
            }
            PLIC_PENDING => self.pending.load(Ordering::Acquire) as u64,
            _ if offset >= PLIC_ENABLE
                && offset < PLIC_ENABLE + PLIC_ENABLE_STRIDE * self.signals.len() as u64 =>
            {
                let hart = ((offset - PLIC_ENABLE) / PLIC_ENABLE_STRIDE) as usize;
                self.state.lock().unwrap().contexts[hart].enable as u64
            }
            _ if offset >= PLIC_CONTEXT
                && offset < PLIC_CONTEXT + PLIC_CONTEXT_STRIDE * self.signals.len() as u64 =>
            {
                let hart = ((offset - PLIC_CONTEXT) / PLIC_CONTEXT_STRIDE) as usize;
                match (offset - PLIC_CONTEXT) % PLIC_CONTEXT_STRIDE {
                    0 => self.state.lock().unwrap().contexts[hart].threshold as u64,
                    4 => self.claim(hart) as u64,
                    _ => 0,
                }
            }
            _ => 0,
        }
    }

    fn write_reg(&self, offset: u64, value: u64) {
        match offset {
            0..=0x7f => {
                self.state.lock().unwrap().priority[(offset / 4) as usize] = value as u32;
            }
            _ if offset >= PLIC_ENABLE
                && offset < PLIC_ENABLE + PLIC_ENABLE_STRIDE * self.signals.len() as u64 =>
            {
                let hart = ((offset - PLIC_ENABLE) / PLIC_ENABLE_STRIDE) as usize;
                self.state.lock().unwrap().contexts[hart].enable = value as u32;
                self.update_lines();
            }
            _ if offset >= PLIC_CONTEXT
                && offset < PLIC_CONTEXT + PLIC_CONTEXT_STRIDE * self.signals.len() as u64 =>
            {
                let hart = ((offset - PLIC_CONTEXT) / PLIC_CONTEXT_STRIDE) as usize;
                match (offset - PLIC_CONTEXT) % PLIC_CONTEXT_STRIDE {
                    0 => {
                        self.state.lock().unwrap().contexts[hart].threshold = value as u32;
                    }
                    // Completion: the line level is recomputed from the
                    // remaining pending bits.
                    4 => self.update_lines(),
                    _ => {}
                }
            }
            _ => {}
        }
    }
}

/// The bus-facing port of the shared controller.
impl Mmio for Arc<Plic> {
    fn name(&self) -> &'static str {
        "plic"
    }

    fn read(&mut self, offset: u64, _size: u8) -> u64 {
        self.read_reg(offset)
    }

    fn write(&mut self, offset: u64, value: u64, _size: u8) {
        self.write_reg(offset, value);
    }
}

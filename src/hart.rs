//! The hart module contains the privileged mode, the registers, and the
//! hart execution pipeline: the hot interpreter loop, trap delivery with
//! delegation, and asynchronous interrupt dispatch.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::bus::DeviceBus;
use crate::csr::CsrFile;
use crate::interp;
use crate::jit::TranslationCache;
use crate::machine::Power;
use crate::memory::PhysMemory;
use crate::mmu::{Access, MmuMode, Tlb};
use crate::timer::MachineTimer;
use crate::trap::{Exception, Interrupt};

pub const REGISTERS_COUNT: usize = 32;

/// Access widths in bytes.
pub const BYTE: u8 = 1;
pub const HALFWORD: u8 = 2;
pub const WORD: u8 = 4;
pub const DOUBLEWORD: u8 = 8;

/// The privileged mode.
///
/// > The machine level has the highest privileges and is the only mandatory
/// > privilege level for a RISC-V hardware platform. Privilege level 2 is
/// > reserved in the base ISA.
#[derive(Debug, PartialEq, PartialOrd, Eq, Copy, Clone)]
pub enum Mode {
    User = 0b00,
    Supervisor = 0b01,
    Machine = 0b11,
}

impl Mode {
    /// The two-bit encoding used in `mstatus.MPP` and the delegation walk.
    pub const fn bits(self) -> u64 {
        self as u64
    }

    /// Decode a two-bit privilege value. The reserved encoding 2 never
    /// reaches this point because the status validation clamps MPP.
    pub const fn from_bits(bits: u64) -> Mode {
        match bits & 0b11 {
            0b11 => Mode::Machine,
            0b01 => Mode::Supervisor,
            _ => Mode::User,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::User => "U",
            Mode::Supervisor => "S",
            Mode::Machine => "M",
        })
    }
}

/// The integer registers.
#[derive(Debug)]
pub struct XRegisters {
    xregs: [u64; REGISTERS_COUNT],
}

impl XRegisters {
    pub fn new() -> Self {
        Self {
            xregs: [0; REGISTERS_COUNT],
        }
    }

    /// Read the value from a register.
    pub fn read(&self, index: u64) -> u64 {
        self.xregs[index as usize]
    }

    /// Write the value to a register.
    pub fn write(&mut self, index: u64, value: u64) {
        // Register x0 is hardwired with all bits equal to 0.
        if index != 0 {
            self.xregs[index as usize] = value;
        }
    }

    /// Reset register zero. The hot loop does this once per iteration so a
    /// corrupted x0 can never survive an instruction boundary.
    pub fn reset_zero(&mut self) {
        self.xregs[0] = 0;
    }
}

impl Default for XRegisters {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for XRegisters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for i in (0..REGISTERS_COUNT).step_by(4) {
            writeln!(
                f,
                "x{:02}={:>#18x} x{:02}={:>#18x} x{:02}={:>#18x} x{:02}={:>#18x}",
                i,
                self.read(i as u64),
                i + 1,
                self.read(i as u64 + 1),
                i + 2,
                self.read(i as u64 + 2),
                i + 3,
                self.read(i as u64 + 3)
            )?;
        }
        Ok(())
    }
}

/// The floating-point registers, stored as raw bit patterns so that
/// single-precision values keep their NaN boxing.
#[derive(Debug)]
pub struct FRegisters {
    fregs: [u64; REGISTERS_COUNT],
}

impl FRegisters {
    pub fn new() -> Self {
        Self {
            fregs: [0; REGISTERS_COUNT],
        }
    }

    /// Read a register as a double-precision value.
    pub fn read(&self, index: u64) -> f64 {
        f64::from_bits(self.fregs[index as usize])
    }

    /// Write a double-precision value to a register.
    pub fn write(&mut self, index: u64, value: f64) {
        self.fregs[index as usize] = value.to_bits();
    }

    /// Read the raw bit pattern of a register.
    pub fn read_bits(&self, index: u64) -> u64 {
        self.fregs[index as usize]
    }

    /// Write a raw bit pattern to a register.
    pub fn write_bits(&mut self, index: u64, bits: u64) {
        self.fregs[index as usize] = bits;
    }
}

impl Default for FRegisters {
    fn default() -> Self {
        Self::new()
    }
}

/// The cross-thread face of a hart: the hot-loop exit flag, externally
/// raised interrupt lines, the Sstc compare register (shared so the event
/// loop can evaluate it), and the WFI parking spot.
///
/// Devices post an interrupt by atomically setting the matching bit in
/// `raised` and then clearing `wait_event` with release ordering, so the
/// interrupt bits are visible to the target hart before it re-enters
/// dispatch.
#[derive(Debug)]
pub struct HartSignal {
    wait_event: AtomicU32,
    raised: AtomicU64,
    stimecmp: AtomicU64,
    park: Mutex<()>,
    cond: Condvar,
}

impl HartSignal {
    pub fn new() -> Self {
        Self {
            wait_event: AtomicU32::new(0),
            raised: AtomicU64::new(0),
            stimecmp: AtomicU64::new(u64::MAX),
            park: Mutex::new(()),
            cond: Condvar::new(),
        }
    }

    /// Re-arm the hot loop.
    pub fn arm(&self) {
        self.wait_event.store(1, Ordering::Release);
    }

    /// Request an exit from the hot loop.
    pub fn halt(&self) {
        self.wait_event.store(0, Ordering::Release);
    }

    pub fn wait_event(&self) -> bool {
        self.wait_event.load(Ordering::Relaxed) != 0
    }

    /// Assert interrupt lines (a mask of `mip` bits) and release the hart
    /// from the hot loop or from WFI.
    pub fn raise(&self, bits: u64) {
        self.raised.fetch_or(bits, Ordering::Release);
        self.kick();
    }

    /// Deassert interrupt lines.
    pub fn clear(&self, bits: u64) {
        self.raised.fetch_and(!bits, Ordering::Release);
    }

    /// The currently asserted interrupt lines.
    pub fn raised(&self) -> u64 {
        self.raised.load(Ordering::Acquire)
    }

    /// Wake the hart without asserting anything (used on shutdown).
    pub fn kick(&self) {
        self.halt();
        let _guard = self.park.lock().unwrap();
        self.cond.notify_all();
    }

    pub fn stimecmp(&self) -> u64 {
        self.stimecmp.load(Ordering::Acquire)
    }

    pub fn set_stimecmp(&self, value: u64) {
        self.stimecmp.store(value, Ordering::Release);
    }
}

impl Default for HartSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// A hardware thread: registers, CSR file, MMU state and the shared
/// machine resources it executes against.
pub struct Hart {
    /// Integer registers.
    pub xregs: XRegisters,
    /// Floating-point registers.
    pub fregs: FRegisters,
    /// Program counter.
    pub pc: u64,
    /// Address of the next instruction; control-transfer handlers redirect
    /// it before the pipeline commits it to `pc`.
    pub(crate) next_pc: u64,
    /// Control and status registers.
    pub csr: CsrFile,
    /// Current privilege mode.
    pub mode: Mode,
    /// Effective XLEN selector; flips when misa is written.
    pub rv64: bool,
    /// Whether the machine supports RV64 at all.
    pub(crate) machine_rv64: bool,
    /// Address translation mode, mirrored out of satp.
    pub(crate) mmu_mode: MmuMode,
    /// Physical address of the root page table.
    pub(crate) root_page_table: u64,
    pub(crate) tlb: Tlb,
    /// LR/SC reservation: (physical address, loaded value, width).
    pub(crate) reservation: Option<(u64, u64, u8)>,
    /// Set by WFI; tells the outer loop to park until an interrupt.
    pub(crate) in_wfi: bool,
    /// Set by `trap`; tells the outer loop to redirect pc through xtvec.
    trap_pending: bool,
    pub(crate) signal: Arc<HartSignal>,
    pub(crate) mem: Arc<PhysMemory>,
    pub(crate) bus: Arc<DeviceBus>,
    pub(crate) timer: Arc<MachineTimer>,
    pub(crate) jit: Option<Arc<TranslationCache>>,
    power: Arc<Power>,
}

// The TLB caches raw host pointers into guest RAM, which the compiler
// cannot see through; the RAM outlives every hart.
unsafe impl Send for Hart {}

impl Hart {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        hartid: u64,
        rv64: bool,
        mem: Arc<PhysMemory>,
        bus: Arc<DeviceBus>,
        timer: Arc<MachineTimer>,
        jit: Option<Arc<TranslationCache>>,
        power: Arc<Power>,
        signal: Arc<HartSignal>,
    ) -> Self {
        let mut hart = Self {
            xregs: XRegisters::new(),
            fregs: FRegisters::new(),
            pc: 0,
            next_pc: 0,
            csr: CsrFile::new(hartid, rv64),
            mode: Mode::Machine,
            rv64,
            machine_rv64: rv64,
            mmu_mode: MmuMode::Bare,
            root_page_table: 0,
            tlb: Tlb::new(),
            reservation: None,
            in_wfi: false,
            trap_pending: false,
            signal,
            mem,
            bus,
            timer,
            jit,
            power,
        };
        hart.reset();
        hart
    }

    /// Reset the hart to its power-on state: machine mode at the reset
    /// vector, with the hart id in a0 as the SBI boot protocol expects.
    pub fn reset(&mut self) {
        let hartid = self.csr.hartid;
        self.xregs = XRegisters::new();
        self.fregs = FRegisters::new();
        self.pc = self.mem.base();
        self.next_pc = self.pc;
        self.csr = CsrFile::new(hartid, self.machine_rv64);
        self.mode = Mode::Machine;
        self.rv64 = self.machine_rv64;
        self.mmu_mode = MmuMode::Bare;
        self.root_page_table = 0;
        self.tlb.flush();
        self.reservation = None;
        self.in_wfi = false;
        self.trap_pending = false;
        self.signal.set_stimecmp(u64::MAX);
        self.xregs.write(10, hartid);
    }

    pub fn hartid(&self) -> u64 {
        self.csr.hartid
    }

    pub fn signal(&self) -> &Arc<HartSignal> {
        &self.signal
    }

    /// The interrupt flag in `xcause` for the effective XLEN.
    pub fn interrupt_bit(&self) -> u64 {
        if self.rv64 {
            1 << 63
        } else {
            1 << 31
        }
    }

    /// Truncate a value to the effective XLEN.
    pub(crate) fn mask_xlen(&self, value: u64) -> u64 {
        if self.rv64 {
            value
        } else {
            value & 0xffff_ffff
        }
    }

    /// Read an integer register.
    pub fn read_xreg(&self, index: u64) -> u64 {
        self.xregs.read(index)
    }

    /// Write an integer register. On RV32 the stored value is kept
    /// sign-extended from bit 31 so that signed comparisons and 64-bit
    /// arithmetic on the host produce the 32-bit results directly.
    pub fn write_xreg(&mut self, index: u64, value: u64) {
        let value = if self.rv64 {
            value
        } else {
            value as i32 as i64 as u64
        };
        self.xregs.write(index, value);
    }

    /// Switch the privilege mode, flushing the TLB when the effective
    /// translation changes.
    pub(crate) fn set_mode(&mut self, mode: Mode) {
        if self.mode != mode {
            self.mode = mode;
            self.tlb.flush();
        }
    }

    /// Refresh XLEN-dependent state after a misa write flipped the base
    /// ISA width.
    pub(crate) fn update_xlen(&mut self, rv64: bool) {
        if self.rv64 == rv64 {
            return;
        }
        self.rv64 = rv64;
        self.tlb.flush();
        if !rv64 {
            // Narrow live state so RV32 code observes clean 32-bit values.
            for i in 1..REGISTERS_COUNT as u64 {
                let v = self.xregs.read(i);
                self.xregs.write(i, v as i32 as i64 as u64);
            }
            self.pc &= 0xffff_ffff;
        }
        log::debug!("hart{}: switched to RV{}", self.csr.hartid, if rv64 { 64 } else { 32 });
    }

    /// Raise a synchronous exception.
    pub fn exception(&mut self, e: Exception) {
        self.trap(e.code(), e.tval());
    }

    /// Inject an asynchronous interrupt.
    pub fn interrupt(&mut self, irq: Interrupt) {
        self.trap(self.interrupt_bit() | irq.code(), 0);
    }

    /// Deliver a trap: walk the delegation registers for the target
    /// privilege, save the trap state there, stack the interrupt enable
    /// bits, switch mode and leave the hot loop. The outer dispatcher
    /// redirects pc through the target's `tvec`.
    pub fn trap(&mut self, cause: u64, tval: u64) {
        let int_bit = self.interrupt_bit();
        let code = cause & !int_bit;
        let deleg = if cause & int_bit != 0 {
            &self.csr.ideleg
        } else {
            &self.csr.edeleg
        };
        // Delegate to a lower privilege mode if every mode above stopped
        // claiming this cause. The hypervisor slot is hardwired all-ones
        // so the walk falls through privilege 2.
        let mut target = Mode::Machine.bits();
        while target > self.mode.bits() {
            if deleg[target as usize] & (1u64 << code) == 0 {
                break;
            }
            target -= 1;
        }
        let prev = self.mode;
        log::trace!(
            "hart{}: trap {}->{} cause={:#x} tval={:#x} pc={:#x}",
            self.csr.hartid,
            prev,
            Mode::from_bits(target),
            cause,
            tval,
            self.pc
        );

        let t = target as usize;
        self.csr.epc[t] = self.mask_xlen(self.pc);
        self.csr.cause[t] = cause;
        self.csr.tval[t] = self.mask_xlen(tval);

        // Save the previous privilege into xPP, xIE into xPIE, then
        // disable interrupts for the target mode.
        let status = self.csr.status;
        if target == Mode::Machine.bits() {
            let mie = crate::bits::cut(status, 3, 1);
            let mut s = crate::bits::replace(status, 11, 2, prev.bits());
            s = crate::bits::replace(s, 7, 1, mie);
            s &= !(1 << 3);
            self.csr.status = s;
        } else {
            let sie = crate::bits::cut(status, 1, 1);
            let spp = if prev == Mode::User { 0 } else { 1 };
            let mut s = crate::bits::replace(status, 8, 1, spp);
            s = crate::bits::replace(s, 5, 1, sie);
            s &= !(1 << 1);
            self.csr.status = s;
        }

        self.set_mode(Mode::from_bits(target));
        self.trap_pending = true;
        self.signal.halt();
    }

    /// Redirect pc through the trap vector recorded by [`Hart::trap`].
    /// Vectored mode offsets asynchronous causes by `cause * 4`.
    fn service_trap_redirect(&mut self) {
        if !self.trap_pending {
            return;
        }
        self.trap_pending = false;
        let m = self.mode.bits() as usize;
        let tvec = self.csr.tvec[m];
        let cause = self.csr.cause[m];
        let base = tvec & !3;
        let int_bit = self.interrupt_bit();
        let target = if tvec & 1 == 1 && cause & int_bit != 0 {
            base.wrapping_add((cause & !int_bit) << 2)
        } else {
            base
        };
        self.pc = self.mask_xlen(target);
    }

    /// The delegation target for an interrupt cause.
    fn interrupt_target(&self, code: u64) -> u64 {
        let mut target = Mode::Machine.bits();
        while target > self.mode.bits() {
            if self.csr.ideleg[target as usize] & (1u64 << code) == 0 {
                break;
            }
            target -= 1;
        }
        target
    }

    /// The highest-priority deliverable interrupt, if any. An interrupt is
    /// deliverable when its target mode is above the current one, or equal
    /// to it with that mode's global enable bit set.
    pub fn check_pending_interrupt(&self) -> Option<Interrupt> {
        let pending = (self.csr.ip | self.signal.raised()) & self.csr.ie;
        if pending == 0 {
            return None;
        }
        use Interrupt::*;
        for irq in [
            MachineExternal,
            MachineSoftware,
            MachineTimer,
            SupervisorExternal,
            SupervisorSoftware,
            SupervisorTimer,
        ] {
            if pending & irq.bit() == 0 {
                continue;
            }
            let target = self.interrupt_target(irq.code());
            // The global enable bit for privilege p sits at status bit p.
            let enabled = crate::bits::cut(self.csr.status, target as u32, 1) == 1;
            if target > self.mode.bits() || (target == self.mode.bits() && enabled) {
                return Some(irq);
            }
        }
        None
    }

    /// Re-evaluate pending interrupts after a CSR side effect; a newly
    /// deliverable one forces the hot loop to exit so the outer dispatcher
    /// can inject it.
    pub(crate) fn check_interrupts(&mut self) {
        if self.check_pending_interrupt().is_some() {
            self.signal.halt();
        }
    }

    /// Fetch, decode and execute one instruction, folding any synchronous
    /// exception into a trap.
    fn step_inner(&mut self) {
        self.xregs.reset_zero();
        match self.fetch() {
            Ok(inst) => {
                if let Err(e) = self.execute(inst) {
                    self.exception(e);
                }
            }
            Err(e) => self.exception(e),
        }
    }

    /// Execute one raw instruction: 32-bit forms dispatch through the
    /// 9-bit-indexed handler table and advance pc by 4; 16-bit forms are
    /// expanded to their 32-bit equivalent first and advance pc by 2.
    pub fn execute(&mut self, inst: u32) -> Result<(), Exception> {
        if inst & 0b11 == 0b11 {
            self.next_pc = self.pc.wrapping_add(4);
            interp::DISPATCH[interp::dispatch_index(inst)](self, inst)?;
        } else {
            // All-zero parcels decode to nothing; they are what freshly
            // cleared memory looks like.
            if inst as u16 == 0 {
                return Err(Exception::IllegalInstruction(0));
            }
            self.next_pc = self.pc.wrapping_add(2);
            let expanded = interp::rvc::expand(inst as u16, self.rv64)?;
            interp::DISPATCH[interp::dispatch_index(expanded)](self, expanded)?;
        }
        self.pc = self.mask_xlen(self.next_pc);
        Ok(())
    }

    /// Run the hot loop until some event (trap, interrupt, WFI, shutdown)
    /// clears `wait_event`.
    fn run_till_event(&mut self) {
        let jit = self.jit.clone();
        while self.signal.wait_event() {
            if let Some(cache) = &jit {
                self.xregs.reset_zero();
                if let Ok(phys_pc) = self.translate(self.pc, Access::Instruction) {
                    if let Some(code) = cache.lookup(phys_pc) {
                        // Generated blocks are observationally equivalent
                        // to interpreting from phys_pc up to the block exit.
                        unsafe {
                            let f: extern "C" fn(&mut Hart) = std::mem::transmute(code);
                            f(self);
                        }
                        continue;
                    }
                }
                self.step_inner();
            } else {
                self.step_inner();
            }
        }
    }

    /// Park until an interrupt is pending (regardless of global enables,
    /// as WFI requires) or the machine powers off.
    fn wfi_wait(&mut self) {
        let signal = self.signal.clone();
        let mut guard = signal.park.lock().unwrap();
        loop {
            if !self.power.is_on() {
                break;
            }
            if (self.csr.ip | signal.raised()) & self.csr.ie != 0 {
                break;
            }
            let (g, _) = signal
                .cond
                .wait_timeout(guard, Duration::from_millis(1))
                .unwrap();
            guard = g;
        }
    }

    /// Drive the hart until the machine shuts down. This is the per-thread
    /// entry point used by [`crate::machine::Machine::run`].
    pub fn run(&mut self) {
        log::info!("hart{}: starting at pc={:#x}", self.csr.hartid, self.pc);
        while self.power.is_on() {
            // Arm before inspecting the interrupt lines: a device that
            // raises in between still clears `wait_event` behind us.
            self.signal.arm();
            self.service_trap_redirect();
            let idle = std::mem::take(&mut self.in_wfi);
            if let Some(irq) = self.check_pending_interrupt() {
                self.interrupt(irq);
                self.service_trap_redirect();
                self.signal.arm();
            } else if idle {
                self.wfi_wait();
                continue;
            }
            // A shutdown kick between the loop condition and the re-arm
            // above must not be lost.
            if !self.power.is_on() {
                break;
            }
            self.run_till_event();
        }
        log::info!("hart{}: stopped at pc={:#x}", self.csr.hartid, self.pc);
    }

    /// Execute a single instruction and service any event it produced.
    /// This is the single-step interface used by tests and debuggers; it
    /// never blocks in WFI.
    pub fn step(&mut self) {
        self.signal.arm();
        self.service_trap_redirect();
        if let Some(irq) = self.check_pending_interrupt() {
            // Injecting the interrupt consumes the step; execution
            // resumes inside the handler on the next one.
            self.interrupt(irq);
            self.service_trap_redirect();
            self.in_wfi = false;
            return;
        }
        self.step_inner();
        if !self.signal.wait_event() {
            self.service_trap_redirect();
            self.in_wfi = false;
        }
    }
}

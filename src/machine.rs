//! The machine module represents an entire computer: the physical memory,
//! the hart set, the device bus with the board peripherals, the shared
//! timer and the machine lifecycle (boot, event loop, shutdown).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use thiserror::Error;

use crate::blk::BlockBackend;
use crate::bus::{self, DeviceBus};
use crate::devices::ata::{Ata, ATA_SIZE};
use crate::devices::clint::{Clint, CLINT_SIZE};
use crate::devices::plic::{Plic, PLIC_SIZE};
use crate::devices::uart::{Console, StdoutConsole, Uart, UART_SIZE};
use crate::hart::{Hart, HartSignal};
use crate::jit::{TranslationCache, HEAP_DEFAULT_SIZE};
use crate::memory::{PhysMemory, PAGE_SIZE};
use crate::timer::{MachineTimer, TIMER_FREQ};
use crate::trap::IP_SEIP;

/// Default guest RAM base, matching the standard RISC-V memory map.
pub const DEFAULT_MEM_BASE: u64 = bus::DRAM_BASE;
/// Default guest RAM size (256 MiB).
pub const DEFAULT_MEM_SIZE: u64 = 256 << 20;
/// Upper bound on the hart count.
pub const MAX_HARTS: u32 = 1024;

/// How often the built-in event loop polls devices and timers.
const EVENT_LOOP_PERIOD: Duration = Duration::from_micros(100);

/// Configuration errors and host resource failures that abort machine
/// creation. Guest-visible faults never surface here.
#[derive(Error, Debug)]
pub enum MachineError {
    #[error("invalid hart count {0} (must be 1..={MAX_HARTS})")]
    InvalidSmp(u32),
    #[error("invalid memory size {0:#x} (must be a non-zero multiple of the page size)")]
    InvalidMemSize(u64),
    #[error("cannot allocate {0:#x} bytes of guest memory")]
    MemAllocFailed(u64),
    #[error("image of {len:#x} bytes does not fit in RAM at {addr:#x}")]
    ImageTooBig { addr: u64, len: u64 },
}

/// Machine power state, shared with every hart thread so shutdown can be
/// requested from anywhere (another thread, a signal handler, a test).
#[derive(Debug)]
pub struct Power {
    on: AtomicBool,
    signals: Mutex<Vec<Arc<HartSignal>>>,
}

impl Power {
    fn new() -> Self {
        Self {
            on: AtomicBool::new(false),
            signals: Mutex::new(Vec::new()),
        }
    }

    pub fn is_on(&self) -> bool {
        self.on.load(Ordering::Acquire)
    }

    /// Power the machine off: every hart is released from its hot loop
    /// (and from WFI) and the outer dispatchers observe the flag.
    pub fn shutdown(&self) {
        self.on.store(false, Ordering::Release);
        for signal in self.signals.lock().unwrap().iter() {
            signal.kick();
        }
    }
}

/// Options consumed by [`Machine::new`].
pub struct MachineConfig {
    pub mem_base: u64,
    pub mem_size: u64,
    pub smp: u32,
    pub rv64: bool,
    /// Allocate a translation cache. Native code only runs once a host
    /// code generator populates it; without one the harts interpret.
    pub enable_jit: bool,
    /// Console sink for the UART; defaults to host stdout.
    pub console: Option<Box<dyn Console>>,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            mem_base: DEFAULT_MEM_BASE,
            mem_size: DEFAULT_MEM_SIZE,
            smp: 1,
            rv64: false,
            enable_jit: false,
            console: None,
        }
    }
}

/// A complete simulated computer.
pub struct Machine {
    mem: Arc<PhysMemory>,
    bus: Arc<DeviceBus>,
    timer: Arc<MachineTimer>,
    signals: Vec<Arc<HartSignal>>,
    plic: Arc<Plic>,
    jit: Option<Arc<TranslationCache>>,
    power: Arc<Power>,
    uart_input: mpsc::Sender<u8>,
    /// The harts, in hart-id order. Tests drive them directly through
    /// [`Hart::step`]; [`Machine::run`] gives each its own thread.
    pub harts: Vec<Hart>,
}

impl Machine {
    /// Build a machine. The RAM region, device bus and harts are created
    /// once; configuration problems abort creation.
    pub fn new(mut config: MachineConfig) -> Result<Machine, MachineError> {
        if config.smp == 0 || config.smp > MAX_HARTS {
            return Err(MachineError::InvalidSmp(config.smp));
        }
        if config.mem_size == 0 || config.mem_size % PAGE_SIZE != 0 {
            return Err(MachineError::InvalidMemSize(config.mem_size));
        }
        let mem = Arc::new(PhysMemory::new(config.mem_base, config.mem_size)?);
        let timer = Arc::new(MachineTimer::new(TIMER_FREQ));
        let power = Arc::new(Power::new());
        let bus = Arc::new(DeviceBus::new());

        let signals: Vec<Arc<HartSignal>> = (0..config.smp)
            .map(|_| Arc::new(HartSignal::new()))
            .collect();
        *power.signals.lock().unwrap() = signals.clone();

        let plic = Arc::new(Plic::new(signals.clone()));
        bus.register(bus::PLIC_BASE, PLIC_SIZE, Box::new(plic.clone()));
        bus.register(
            bus::CLINT_BASE,
            CLINT_SIZE,
            Box::new(Clint::new(signals.clone(), timer.clone())),
        );

        let (uart_input, uart_rx) = mpsc::channel();
        let console = config
            .console
            .take()
            .unwrap_or_else(|| Box::new(StdoutConsole));
        bus.register(
            bus::UART_BASE,
            UART_SIZE,
            Box::new(Uart::new(uart_rx, console, plic.clone())),
        );

        let jit = if config.enable_jit {
            match TranslationCache::new(HEAP_DEFAULT_SIZE, config.mem_size) {
                Ok(cache) => Some(Arc::new(cache)),
                Err(err) => {
                    // Not fatal: execution falls back to the interpreter.
                    log::warn!("machine: no translation cache: {err}");
                    None
                }
            }
        } else {
            None
        };

        let harts = (0..config.smp)
            .map(|hartid| {
                Hart::new(
                    hartid as u64,
                    config.rv64,
                    mem.clone(),
                    bus.clone(),
                    timer.clone(),
                    jit.clone(),
                    power.clone(),
                    signals[hartid as usize].clone(),
                )
            })
            .collect();

        log::info!(
            "machine: rv{} with {} hart(s), {} MiB RAM at {:#x}",
            if config.rv64 { 64 } else { 32 },
            config.smp,
            config.mem_size >> 20,
            config.mem_base,
        );

        Ok(Machine {
            mem,
            bus,
            timer,
            signals,
            plic,
            jit,
            power,
            uart_input,
            harts,
        })
    }

    pub fn mem(&self) -> &Arc<PhysMemory> {
        &self.mem
    }

    pub fn bus(&self) -> &Arc<DeviceBus> {
        &self.bus
    }

    pub fn timer(&self) -> &Arc<MachineTimer> {
        &self.timer
    }

    pub fn power(&self) -> Arc<Power> {
        self.power.clone()
    }

    pub fn plic(&self) -> &Arc<Plic> {
        &self.plic
    }

    pub fn translation_cache(&self) -> Option<&Arc<TranslationCache>> {
        self.jit.as_ref()
    }

    /// Sender feeding the UART receive FIFO (host keyboard input).
    pub fn uart_input(&self) -> mpsc::Sender<u8> {
        self.uart_input.clone()
    }

    /// Copy a flat binary (bootrom, DTB) into guest RAM.
    pub fn load_image(&self, addr: u64, data: &[u8]) -> Result<(), MachineError> {
        if !self.mem.write(addr, data) {
            return Err(MachineError::ImageTooBig {
                addr,
                len: data.len() as u64,
            });
        }
        Ok(())
    }

    /// Record the device tree address in a1 of every hart, following the
    /// boot protocol supervisors expect.
    pub fn set_dtb_addr(&mut self, addr: u64) {
        for hart in &mut self.harts {
            hart.xregs.write(11, addr);
        }
    }

    /// Attach a block backend as the primary ATA drive.
    pub fn attach_drive(&self, disk: Box<dyn BlockBackend>) {
        self.bus
            .register(bus::ATA_DATA_BASE, ATA_SIZE, Box::new(Ata::new(disk)));
    }

    /// Assert or deassert the supervisor external interrupt line of a
    /// hart. This is the path the PLIC (or an out-of-tree interrupt
    /// controller) delivers device interrupts through.
    pub fn raise_external(&self, hart: usize, level: bool) {
        if let Some(signal) = self.signals.get(hart) {
            if level {
                signal.raise(IP_SEIP);
            } else {
                signal.clear(IP_SEIP);
            }
        }
    }

    /// One event-loop tick: run every device's update handler. Exposed so
    /// embedders replacing the built-in event loop (and tests) can drive
    /// device polling themselves.
    pub fn poll(&self) {
        self.bus.update();
    }

    /// Reset harts and devices to their power-on state.
    pub fn reset(&mut self) {
        for hart in &mut self.harts {
            hart.reset();
        }
        self.bus.reset();
    }

    /// Request a shutdown; the hart threads and event loop wind down.
    pub fn shutdown(&self) {
        self.power.shutdown();
    }

    /// Boot the machine: one host thread per hart, with the built-in
    /// event loop polling devices on the calling thread. Returns when the
    /// machine is [shut down](Machine::shutdown).
    pub fn run(&mut self) {
        self.power.on.store(true, Ordering::Release);
        let bus = self.bus.clone();
        let power = self.power.clone();
        thread::scope(|s| {
            for hart in self.harts.iter_mut() {
                s.spawn(move || hart.run());
            }
            while power.is_on() {
                bus.update();
                thread::sleep(EVENT_LOOP_PERIOD);
            }
        });
        log::info!("machine: powered off");
    }
}

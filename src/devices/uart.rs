//! The uart module contains an NS16550A universal asynchronous
//! receiver-transmitter, the console device of the default machine. The
//! register set follows the classic 16550 layout with a byte-wide
//! register stride; see http://byterunner.com/16550.html.

use std::collections::VecDeque;
use std::io::{self, Write};
use std::sync::mpsc::Receiver;
use std::sync::Arc;

use crate::bus::Mmio;
use crate::devices::plic::Plic;

/// Size of the UART register window.
pub const UART_SIZE: u64 = 0x100;
/// The PLIC source the UART interrupts on (as on the QEMU virt board).
pub const UART_IRQ: u32 = 10;

/// Receive holding register (read) / transmit holding register (write).
const UART_RHR: u64 = 0;
/// Interrupt enable register.
const UART_IER: u64 = 1;
/// Interrupt status register (read) / FIFO control register (write).
const UART_ISR: u64 = 2;
/// Line control register.
const UART_LCR: u64 = 3;
/// Modem control register.
const UART_MCR: u64 = 4;
/// Line status register.
const UART_LSR: u64 = 5;
/// Modem status register.
const UART_MSR: u64 = 6;
/// Scratch register.
const UART_SPR: u64 = 7;

/// LSR: data ready.
const LSR_RX_READY: u8 = 1 << 0;
/// LSR: transmit holding register empty.
const LSR_TX_IDLE: u8 = 1 << 5;
/// LSR: transmitter empty.
const LSR_TX_EMPTY: u8 = 1 << 6;

/// IER: receive data available interrupt.
const IER_RX: u8 = 1 << 0;
/// IER: transmit holding register empty interrupt.
const IER_TX: u8 = 1 << 1;

/// Where transmitted bytes end up. The CLI points this at stdout; tests
/// capture the stream in memory.
pub trait Console: Send {
    fn put(&mut self, byte: u8);
}

/// Console sink writing straight to the host stdout.
pub struct StdoutConsole;

impl Console for StdoutConsole {
    fn put(&mut self, byte: u8) {
        let mut stdout = io::stdout();
        let _ = stdout.write_all(&[byte]);
        let _ = stdout.flush();
    }
}

/// In-memory console sink for tests.
#[derive(Clone, Default)]
pub struct CaptureConsole(pub Arc<std::sync::Mutex<Vec<u8>>>);

impl Console for CaptureConsole {
    fn put(&mut self, byte: u8) {
        self.0.lock().unwrap().push(byte);
    }
}

/// The NS16550A.
pub struct Uart {
    rx: VecDeque<u8>,
    input: Receiver<u8>,
    output: Box<dyn Console>,
    plic: Arc<Plic>,
    ier: u8,
    lcr: u8,
    mcr: u8,
    scratch: u8,
    dll: u8,
    dlm: u8,
}

impl Uart {
    pub fn new(input: Receiver<u8>, output: Box<dyn Console>, plic: Arc<Plic>) -> Self {
        Self {
            rx: VecDeque::new(),
            input,
            output,
            plic,
            ier: 0,
            lcr: 0,
            mcr: 0,
            scratch: 0,
            dll: 0,
            dlm: 0,
        }
    }

    /// LCR bit 7 banks in the divisor latch over RHR/IER.
    fn dlab(&self) -> bool {
        self.lcr & 0x80 != 0
    }

    fn lsr(&self) -> u8 {
        // The transmitter never backs up: bytes go straight to the sink.
        let mut lsr = LSR_TX_IDLE | LSR_TX_EMPTY;
        if !self.rx.is_empty() {
            lsr |= LSR_RX_READY;
        }
        lsr
    }

    fn update_irq(&self) {
        let rx_ready = self.ier & IER_RX != 0 && !self.rx.is_empty();
        let tx_ready = self.ier & IER_TX != 0;
        if rx_ready || tx_ready {
            self.plic.raise(UART_IRQ);
        } else {
            self.plic.clear(UART_IRQ);
        }
    }
}

impl Mmio for Uart {
    fn name(&self) -> &'static str {
        "ns16550a"
    }

    fn read(&mut self, offset: u64, _size: u8) -> u64 {
        let value = match offset {
            UART_RHR if self.dlab() => self.dll,
            UART_RHR => {
                let byte = self.rx.pop_front().unwrap_or(0);
                self.update_irq();
                byte
            }
            UART_IER if self.dlab() => self.dlm,
            UART_IER => self.ier,
            UART_ISR => {
                // Interrupt status plus FIFOs-enabled bits.
                let mut isr = 0xc0 | 0x01;
                if !self.rx.is_empty() {
                    isr = 0xc0 | 0x04;
                }
                isr
            }
            UART_LCR => self.lcr,
            UART_MCR => self.mcr,
            UART_LSR => self.lsr(),
            UART_MSR => 0,
            UART_SPR => self.scratch,
            _ => 0,
        };
        value as u64
    }

    fn write(&mut self, offset: u64, value: u64, _size: u8) {
        let value = value as u8;
        match offset {
            UART_RHR if self.dlab() => self.dll = value,
            UART_RHR => {
                self.output.put(value);
                self.update_irq();
            }
            UART_IER if self.dlab() => self.dlm = value,
            UART_IER => {
                self.ier = value;
                self.update_irq();
            }
            UART_ISR => {} // FCR: FIFOs are always on
            UART_LCR => self.lcr = value,
            UART_MCR => self.mcr = value,
            UART_SPR => self.scratch = value,
            _ => {}
        }
    }

    fn update(&mut self) {
        let mut received = false;
        while let Ok(byte) = self.input.try_recv() {
            self.rx.push_back(byte);
            received = true;
        }
        if received {
            self.update_irq();
        }
    }

    fn reset(&mut self) {
        self.rx.clear();
        self.ier = 0;
        self.lcr = 0;
        self.mcr = 0;
        self.scratch = 0;
        self.plic.clear(UART_IRQ);
    }
}

//! RISC-V system emulator core implementation.
//!
//! The crate provides everything needed to boot unmodified supervisor
//! software on a simulated multi-hart machine: the per-hart interpreter,
//! the control and status register file with privilege delegation, a
//! software MMU with a translation lookaside buffer, the trap/interrupt
//! machinery, and the translation-cache manager used to hold native code
//! for frequently executed guest blocks.

pub mod bits;
pub mod blk;
pub mod bus;
pub mod csr;
pub mod devices;
pub mod hart;
pub mod interp;
pub mod jit;
pub mod machine;
pub mod memory;
pub mod mmu;
pub mod timer;
pub mod trap;
pub mod vma;

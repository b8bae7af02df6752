//! The trap module contains the exception and interrupt kinds together
//! with their RISC-V cause codes.

/// All the synchronous exception kinds. The payload, where present, is the
/// value written to the target privilege level's `tval` register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exception {
    /// With the C extension enabled only bit 0 of a branch target can be
    /// misaligned, and JALR clears it, so this fires almost never.
    InstructionAddressMisaligned(u64),
    InstructionAccessFault(u64),
    /// The payload is the raw faulting instruction.
    IllegalInstruction(u32),
    /// The payload is the address of the EBREAK itself.
    Breakpoint(u64),
    LoadAddressMisaligned(u64),
    LoadAccessFault(u64),
    StoreAmoAddressMisaligned(u64),
    StoreAmoAccessFault(u64),
    EnvironmentCallFromUMode,
    EnvironmentCallFromSMode,
    EnvironmentCallFromMMode,
    InstructionPageFault(u64),
    LoadPageFault(u64),
    StoreAmoPageFault(u64),
}

impl Exception {
    /// Returns the exception code written to `xcause`.
    pub const fn code(&self) -> u64 {
        match self {
            Exception::InstructionAddressMisaligned(_) => 0,
            Exception::InstructionAccessFault(_) => 1,
            Exception::IllegalInstruction(_) => 2,
            Exception::Breakpoint(_) => 3,
            Exception::LoadAddressMisaligned(_) => 4,
            Exception::LoadAccessFault(_) => 5,
            Exception::StoreAmoAddressMisaligned(_) => 6,
            Exception::StoreAmoAccessFault(_) => 7,
            Exception::EnvironmentCallFromUMode => 8,
            Exception::EnvironmentCallFromSMode => 9,
            Exception::EnvironmentCallFromMMode => 11,
            Exception::InstructionPageFault(_) => 12,
            Exception::LoadPageFault(_) => 13,
            Exception::StoreAmoPageFault(_) => 15,
        }
    }

    /// Returns the value written to `xtval`.
    ///
    /// > When a hardware breakpoint is triggered, or an instruction-fetch,
    /// > load, or store address-misaligned, access, or page-fault exception
    /// > occurs, mtval is written with the faulting virtual address. On an
    /// > illegal instruction trap, mtval may be written with the first XLEN
    /// > or ILEN bits of the faulting instruction. For other traps, mtval
    /// > is set to zero.
    pub const fn tval(&self) -> u64 {
        match *self {
            Exception::InstructionAddressMisaligned(addr)
            | Exception::InstructionAccessFault(addr)
            | Exception::Breakpoint(addr)
            | Exception::LoadAddressMisaligned(addr)
            | Exception::LoadAccessFault(addr)
            | Exception::StoreAmoAddressMisaligned(addr)
            | Exception::StoreAmoAccessFault(addr)
            | Exception::InstructionPageFault(addr)
            | Exception::LoadPageFault(addr)
            | Exception::StoreAmoPageFault(addr) => addr,
            Exception::IllegalInstruction(inst) => inst as u64,
            Exception::EnvironmentCallFromUMode
            | Exception::EnvironmentCallFromSMode
            | Exception::EnvironmentCallFromMMode => 0,
        }
    }
}

/// All the interrupt kinds, by exception code. The numeric value of each
/// variant doubles as the bit index in `mip`/`mie`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    SupervisorSoftware = 1,
    MachineSoftware = 3,
    SupervisorTimer = 5,
    MachineTimer = 7,
    SupervisorExternal = 9,
    MachineExternal = 11,
}

impl Interrupt {
    pub const fn code(self) -> u64 {
        self as u64
    }

    /// The corresponding bit in `mip`/`mie`.
    pub const fn bit(self) -> u64 {
        1 << (self as u64)
    }
}

/// `mip`/`mie` bit for the supervisor software interrupt.
pub const IP_SSIP: u64 = 1 << 1;
/// `mip`/`mie` bit for the machine software interrupt.
pub const IP_MSIP: u64 = 1 << 3;
/// `mip`/`mie` bit for the supervisor timer interrupt.
pub const IP_STIP: u64 = 1 << 5;
/// `mip`/`mie` bit for the machine timer interrupt.
pub const IP_MTIP: u64 = 1 << 7;
/// `mip`/`mie` bit for the supervisor external interrupt.
pub const IP_SEIP: u64 = 1 << 9;
/// `mip`/`mie` bit for the machine external interrupt.
pub const IP_MEIP: u64 = 1 << 11;

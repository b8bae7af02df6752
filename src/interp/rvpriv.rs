//! The privileged and Zicsr instructions: environment calls, trap
//! returns, WFI, fences that affect translation, and the CSR accesses.

use super::*;
use crate::bits;
use crate::csr::{CsrOp, MSTATUS_TSR, MSTATUS_TVM, MSTATUS_TW};
use crate::hart::Mode;

pub(crate) const fn register(t: &mut [Handler; 512]) {
    put_isb(t, 0x1c, 0, system);
    put_isb(t, 0x1c, 1, csrrw);
    put_isb(t, 0x1c, 2, csrrs);
    put_isb(t, 0x1c, 3, csrrc);
    put_isb(t, 0x1c, 5, csrrwi);
    put_isb(t, 0x1c, 6, csrrsi);
    put_isb(t, 0x1c, 7, csrrci);
}

fn system(h: &mut Hart, i: u32) -> Result<(), Exception> {
    if funct7(i) == 0x09 {
        return sfence_vma(h, i);
    }
    match i {
        0x0000_0073 => ecall(h),
        0x0010_0073 => Err(Exception::Breakpoint(h.pc)),
        0x1020_0073 => sret(h, i),
        0x3020_0073 => mret(h, i),
        0x1050_0073 => wfi(h, i),
        _ => illegal(h, i),
    }
}

fn ecall(h: &mut Hart) -> Result<(), Exception> {
    Err(match h.mode {
        Mode::User => Exception::EnvironmentCallFromUMode,
        Mode::Supervisor => Exception::EnvironmentCallFromSMode,
        Mode::Machine => Exception::EnvironmentCallFromMMode,
    })
}

/// Return from a machine-mode trap: MIE is restored from MPIE, the
/// privilege from MPP, then MPIE is set and MPP cleared to U.
fn mret(h: &mut Hart, i: u32) -> Result<(), Exception> {
    if h.mode != Mode::Machine {
        return illegal(h, i);
    }
    let status = h.csr.status;
    let mpp = bits::cut(status, 11, 2);
    let mpie = bits::cut(status, 7, 1);
    let mut s = bits::replace(status, 3, 1, mpie);
    s = bits::replace(s, 7, 1, 1);
    s = bits::replace(s, 11, 2, Mode::User.bits());
    h.csr.status = s;
    h.set_mode(Mode::from_bits(mpp));
    // The low bit of mepc is always zero.
    h.next_pc = h.mask_xlen(h.csr.epc[3]) & !1;
    h.signal.halt();
    Ok(())
}

/// Return from a supervisor-mode trap; trapped by mstatus.TSR.
fn sret(h: &mut Hart, i: u32) -> Result<(), Exception> {
    if h.mode == Mode::User || (h.mode == Mode::Supervisor && h.csr.status & MSTATUS_TSR != 0) {
        return illegal(h, i);
    }
    let status = h.csr.status;
    let spp = bits::cut(status, 8, 1);
    let spie = bits::cut(status, 5, 1);
    let mut s = bits::replace(status, 1, 1, spie);
    s = bits::replace(s, 5, 1, 1);
    s = bits::replace(s, 8, 1, 0);
    h.csr.status = s;
    h.set_mode(Mode::from_bits(spp));
    h.next_pc = h.mask_xlen(h.csr.epc[1]) & !1;
    h.signal.halt();
    Ok(())
}

/// Wait for interrupt. The hart leaves the hot loop; the outer dispatcher
/// parks it until an interrupt line is pending. mstatus.TW turns WFI into
/// an illegal instruction below M-mode.
fn wfi(h: &mut Hart, i: u32) -> Result<(), Exception> {
    if h.mode != Mode::Machine && h.csr.status & MSTATUS_TW != 0 {
        return illegal(h, i);
    }
    h.in_wfi = true;
    h.signal.halt();
    Ok(())
}

/// sfence.vma conservatively flushes the whole TLB regardless of the
/// ASID/VA operands, and leaves the hot loop so stale fast-path state
/// cannot be reused. mstatus.TVM traps it in S-mode.
fn sfence_vma(h: &mut Hart, i: u32) -> Result<(), Exception> {
    match h.mode {
        Mode::User => return illegal(h, i),
        Mode::Supervisor if h.csr.status & MSTATUS_TVM != 0 => return illegal(h, i),
        _ => {}
    }
    h.tlb_flush();
    h.signal.halt();
    Ok(())
}

fn csr_rmw(h: &mut Hart, i: u32, mut operand: u64, op: CsrOp) -> Result<(), Exception> {
    if !h.csr_op(csr_addr(i), &mut operand, op) {
        return Err(Exception::IllegalInstruction(i));
    }
    h.write_xreg(rd(i), operand);
    Ok(())
}

fn csrrw(h: &mut Hart, i: u32) -> Result<(), Exception> {
    csr_rmw(h, i, h.read_xreg(rs1(i)), CsrOp::Swap)
}

fn csrrs(h: &mut Hart, i: u32) -> Result<(), Exception> {
    csr_rmw(h, i, h.read_xreg(rs1(i)), CsrOp::SetBits)
}

fn csrrc(h: &mut Hart, i: u32) -> Result<(), Exception> {
    csr_rmw(h, i, h.read_xreg(rs1(i)), CsrOp::ClearBits)
}

fn csrrwi(h: &mut Hart, i: u32) -> Result<(), Exception> {
    csr_rmw(h, i, rs1(i), CsrOp::Swap)
}

fn csrrsi(h: &mut Hart, i: u32) -> Result<(), Exception> {
    csr_rmw(h, i, rs1(i), CsrOp::SetBits)
}

fn csrrci(h: &mut Hart, i: u32) -> Result<(), Exception> {
    csr_rmw(h, i, rs1(i), CsrOp::ClearBits)
}

//! The A standard extension: load-reserved/store-conditional and the
//! atomic memory operations, implemented with host atomics of at least
//! equivalent strength.

use super::*;

pub(crate) const fn register(t: &mut [Handler; 512]) {
    put_isb(t, 0x0b, 2, amo_w);
    put_isb(t, 0x0b, 3, amo_d);
}

/// funct5 values of the AMO opcode.
const AMO_LR: u32 = 0x02;
const AMO_SC: u32 = 0x03;
const AMO_SWAP: u32 = 0x01;
const AMO_ADD: u32 = 0x00;
const AMO_XOR: u32 = 0x04;
const AMO_AND: u32 = 0x0c;
const AMO_OR: u32 = 0x08;
const AMO_MIN: u32 = 0x10;
const AMO_MAX: u32 = 0x14;
const AMO_MINU: u32 = 0x18;
const AMO_MAXU: u32 = 0x1c;

fn amo_w(h: &mut Hart, i: u32) -> Result<(), Exception> {
    let funct5 = i >> 27;
    let addr = h.read_xreg(rs1(i));
    match funct5 {
        AMO_LR => {
            if rs2(i) != 0 {
                return illegal(h, i);
            }
            let v = h.load_reserved(addr, 4)?;
            h.write_xreg(rd(i), v as i32 as i64 as u64);
        }
        AMO_SC => {
            let ok = h.store_conditional(addr, h.read_xreg(rs2(i)), 4)?;
            h.write_xreg(rd(i), !ok as u64);
        }
        AMO_SWAP | AMO_ADD | AMO_XOR | AMO_AND | AMO_OR | AMO_MIN | AMO_MAX | AMO_MINU
        | AMO_MAXU => {
            let src = h.read_xreg(rs2(i)) as u32;
            let old = h.amo_u32(addr, |v| match funct5 {
                AMO_SWAP => src,
                AMO_ADD => v.wrapping_add(src),
                AMO_XOR => v ^ src,
                AMO_AND => v & src,
                AMO_OR => v | src,
                AMO_MIN => (v as i32).min(src as i32) as u32,
                AMO_MAX => (v as i32).max(src as i32) as u32,
                AMO_MINU => v.min(src),
                _ => v.max(src),
            })?;
            h.write_xreg(rd(i), old as i32 as i64 as u64);
        }
        _ => return illegal(h, i),
    }
    Ok(())
}

fn amo_d(h: &mut Hart, i: u32) -> Result<(), Exception> {
    if !h.rv64 {
        return illegal(h, i);
    }
    let funct5 = i >> 27;
    let addr = h.read_xreg(rs1(i));
    match funct5 {
        AMO_LR => {
            if rs2(i) != 0 {
                return illegal(h, i);
            }
            let v = h.load_reserved(addr, 8)?;
            h.write_xreg(rd(i), v);
        }
        AMO_SC => {
            let ok = h.store_conditional(addr, h.read_xreg(rs2(i)), 8)?;
            h.write_xreg(rd(i), !ok as u64);
        }
        AMO_SWAP | AMO_ADD | AMO_XOR | AMO_AND | AMO_OR | AMO_MIN | AMO_MAX | AMO_MINU
        | AMO_MAXU => {
            let src = h.read_xreg(rs2(i));
            let old = h.amo_u64(addr, |v| match funct5 {
                AMO_SWAP => src,
                AMO_ADD => v.wrapping_add(src),
                AMO_XOR => v ^ src,
                AMO_AND => v & src,
                AMO_OR => v | src,
                AMO_MIN => (v as i64).min(src as i64) as u64,
                AMO_MAX => (v as i64).max(src as i64) as u64,
                AMO_MINU => v.min(src),
                _ => v.max(src),
            })?;
            h.write_xreg(rd(i), old);
        }
        _ => return illegal(h, i),
    }
    Ok(())
}

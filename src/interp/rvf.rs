//! The F and D standard extensions, computed on the host FPU. Accrued
//! exception flags are left in the host floating-point environment and
//! folded into fcsr by the CSR file on read.

use super::*;
use crate::bits;
use crate::hart::{DOUBLEWORD, WORD};

pub(crate) const fn register(t: &mut [Handler; 512]) {
    put_isb(t, 0x01, 2, flw);
    put_isb(t, 0x01, 3, fld);
    put_isb(t, 0x09, 2, fsw);
    put_isb(t, 0x09, 3, fsd);
    // funct3 carries the rounding mode for the computational forms.
    put_uj(t, 0x10, fmadd);
    put_uj(t, 0x11, fmsub);
    put_uj(t, 0x12, fnmsub);
    put_uj(t, 0x13, fnmadd);
    put_uj(t, 0x14, op_fp);
}

/// Single-precision values live NaN-boxed in the upper half of the
/// 64-bit register file.
const NAN_BOX: u64 = 0xffff_ffff_0000_0000;

fn require_fpu(h: &Hart, i: u32) -> Result<(), Exception> {
    if h.fpu_enabled() {
        Ok(())
    } else {
        Err(Exception::IllegalInstruction(i))
    }
}

fn read_f32(h: &Hart, reg: u64) -> f32 {
    let raw = h.fregs.read_bits(reg);
    if raw & NAN_BOX == NAN_BOX {
        f32::from_bits(raw as u32)
    } else {
        // Improperly boxed values read as the canonical NaN.
        f32::NAN
    }
}

fn write_f32(h: &mut Hart, reg: u64, value: f32) {
    h.fregs.write_bits(reg, value.to_bits() as u64 | NAN_BOX);
}

/// Resolve the instruction's rounding mode (7 selects the dynamic frm)
/// and apply it to a value that is about to be converted to an integer.
fn round(h: &Hart, rm: u32, value: f64) -> f64 {
    let rm = if rm == 7 {
        bits::cut(h.csr.fcsr, 5, 3) as u32
    } else {
        rm
    };
    match rm {
        1 => value.trunc(), // RTZ
        2 => value.floor(), // RDN
        3 => value.ceil(),  // RUP
        // RNE; RMM is approximated by ties-to-even.
        _ => value.round_ties_even(),
    }
}

fn cvt_i32(h: &Hart, rm: u32, value: f64) -> u64 {
    if value.is_nan() {
        return i32::MAX as u64;
    }
    (round(h, rm, value).clamp(i32::MIN as f64, i32::MAX as f64) as i32) as i64 as u64
}

fn cvt_u32(h: &Hart, rm: u32, value: f64) -> u64 {
    if value.is_nan() {
        return u32::MAX as i32 as i64 as u64;
    }
    (round(h, rm, value).clamp(0.0, u32::MAX as f64) as u32) as i32 as i64 as u64
}

fn cvt_i64(h: &Hart, rm: u32, value: f64) -> u64 {
    if value.is_nan() {
        return i64::MAX as u64;
    }
    // `as` saturates at the type bounds.
    round(h, rm, value) as i64 as u64
}

fn cvt_u64(h: &Hart, rm: u32, value: f64) -> u64 {
    if value.is_nan() {
        return u64::MAX;
    }
    round(h, rm, value) as u64
}

fn fclass32(bits: u32) -> u64 {
    let v = f32::from_bits(bits);
    let neg = v.is_sign_negative();
    use std::num::FpCategory;
    match v.classify() {
        FpCategory::Infinite => {
            if neg {
                1 << 0
            } else {
                1 << 7
            }
        }
        FpCategory::Normal => {
            if neg {
                1 << 1
            } else {
                1 << 6
            }
        }
        FpCategory::Subnormal => {
            if neg {
                1 << 2
            } else {
                1 << 5
            }
        }
        FpCategory::Zero => {
            if neg {
                1 << 3
            } else {
                1 << 4
            }
        }
        FpCategory::Nan => {
            if bits >> 22 & 1 == 1 {
                1 << 9 // quiet
            } else {
                1 << 8 // signaling
            }
        }
    }
}

fn fclass64(bits: u64) -> u64 {
    let v = f64::from_bits(bits);
    let neg = v.is_sign_negative();
    use std::num::FpCategory;
    match v.classify() {
        FpCategory::Infinite => {
            if neg {
                1 << 0
            } else {
                1 << 7
            }
        }
        FpCategory::Normal => {
            if neg {
                1 << 1
            } else {
                1 << 6
            }
        }
        FpCategory::Subnormal => {
            if neg {
                1 << 2
            } else {
                1 << 5
            }
        }
        FpCategory::Zero => {
            if neg {
                1 << 3
            } else {
                1 << 4
            }
        }
        FpCategory::Nan => {
            if bits >> 51 & 1 == 1 {
                1 << 9
            } else {
                1 << 8
            }
        }
    }
}

fn flw(h: &mut Hart, i: u32) -> Result<(), Exception> {
    require_fpu(h, i)?;
    let addr = h.read_xreg(rs1(i)).wrapping_add(imm_i(i));
    let v = h.mem_read(addr, WORD)?;
    h.fregs.write_bits(rd(i), v | NAN_BOX);
    Ok(())
}

fn fld(h: &mut Hart, i: u32) -> Result<(), Exception> {
    require_fpu(h, i)?;
    let addr = h.read_xreg(rs1(i)).wrapping_add(imm_i(i));
    let v = h.mem_read(addr, DOUBLEWORD)?;
    h.fregs.write_bits(rd(i), v);
    Ok(())
}

fn fsw(h: &mut Hart, i: u32) -> Result<(), Exception> {
    require_fpu(h, i)?;
    let addr = h.read_xreg(rs1(i)).wrapping_add(imm_s(i));
    h.mem_write(addr, h.fregs.read_bits(rs2(i)) & 0xffff_ffff, WORD)
}

fn fsd(h: &mut Hart, i: u32) -> Result<(), Exception> {
    require_fpu(h, i)?;
    let addr = h.read_xreg(rs1(i)).wrapping_add(imm_s(i));
    h.mem_write(addr, h.fregs.read_bits(rs2(i)), DOUBLEWORD)
}

/// The fused multiply-add family. The format field (bits 25:26) selects
/// single or double precision.
fn fused(h: &mut Hart, i: u32, sign_product: bool, sign_addend: bool) -> Result<(), Exception> {
    require_fpu(h, i)?;
    match i >> 25 & 0b11 {
        0 => {
            let mut a = read_f32(h, rs1(i));
            let b = read_f32(h, rs2(i));
            let mut c = read_f32(h, rs3(i));
            if sign_product {
                a = -a;
            }
            if sign_addend {
                c = -c;
            }
            write_f32(h, rd(i), a.mul_add(b, c));
            Ok(())
        }
        1 => {
            let mut a = h.fregs.read(rs1(i));
            let b = h.fregs.read(rs2(i));
            let mut c = h.fregs.read(rs3(i));
            if sign_product {
                a = -a;
            }
            if sign_addend {
                c = -c;
            }
            let v = a.mul_add(b, c);
            h.fregs.write(rd(i), v);
            Ok(())
        }
        _ => illegal(h, i),
    }
}

fn fmadd(h: &mut Hart, i: u32) -> Result<(), Exception> {
    fused(h, i, false, false)
}

fn fmsub(h: &mut Hart, i: u32) -> Result<(), Exception> {
    fused(h, i, false, true)
}

fn fnmsub(h: &mut Hart, i: u32) -> Result<(), Exception> {
    fused(h, i, true, false)
}

fn fnmadd(h: &mut Hart, i: u32) -> Result<(), Exception> {
    fused(h, i, true, true)
}

/// The OP-FP opcode: funct7 selects the operation, funct3 carries either
/// the rounding mode or a sub-operation selector.
fn op_fp(h: &mut Hart, i: u32) -> Result<(), Exception> {
    require_fpu(h, i)?;
    let f7 = funct7(i);
    let rm = funct3(i);
    match f7 {
        // Single-precision arithmetic.
        0x00 => write_f32(h, rd(i), read_f32(h, rs1(i)) + read_f32(h, rs2(i))),
        0x04 => write_f32(h, rd(i), read_f32(h, rs1(i)) - read_f32(h, rs2(i))),
        0x08 => write_f32(h, rd(i), read_f32(h, rs1(i)) * read_f32(h, rs2(i))),
        0x0c => write_f32(h, rd(i), read_f32(h, rs1(i)) / read_f32(h, rs2(i))),
        0x2c => write_f32(h, rd(i), read_f32(h, rs1(i)).sqrt()),
        // Double-precision arithmetic.
        0x01 => {
            let v = h.fregs.read(rs1(i)) + h.fregs.read(rs2(i));
            h.fregs.write(rd(i), v);
        }
        0x05 => {
            let v = h.fregs.read(rs1(i)) - h.fregs.read(rs2(i));
            h.fregs.write(rd(i), v);
        }
        0x09 => {
            let v = h.fregs.read(rs1(i)) * h.fregs.read(rs2(i));
            h.fregs.write(rd(i), v);
        }
        0x0d => {
            let v = h.fregs.read(rs1(i)) / h.fregs.read(rs2(i));
            h.fregs.write(rd(i), v);
        }
        0x2d => {
            let v = h.fregs.read(rs1(i)).sqrt();
            h.fregs.write(rd(i), v);
        }
        // Sign injection.
        0x10 => {
            let a = read_f32(h, rs1(i)).to_bits();
            let b = read_f32(h, rs2(i)).to_bits();
            let sign = 1u32 << 31;
            let v = match rm {
                0 => (a & !sign) | (b & sign),
                1 => (a & !sign) | (!b & sign),
                2 => a ^ (b & sign),
                _ => return illegal(h, i),
            };
            h.fregs.write_bits(rd(i), v as u64 | NAN_BOX);
        }
        0x11 => {
            let a = h.fregs.read_bits(rs1(i));
            let b = h.fregs.read_bits(rs2(i));
            let sign = 1u64 << 63;
            let v = match rm {
                0 => (a & !sign) | (b & sign),
                1 => (a & !sign) | (!b & sign),
                2 => a ^ (b & sign),
                _ => return illegal(h, i),
            };
            h.fregs.write_bits(rd(i), v);
        }
        // Minimum/maximum.
        0x14 => {
            let a = read_f32(h, rs1(i));
            let b = read_f32(h, rs2(i));
            let v = match rm {
                0 => a.min(b),
                1 => a.max(b),
                _ => return illegal(h, i),
            };
            write_f32(h, rd(i), v);
        }
        0x15 => {
            let a = h.fregs.read(rs1(i));
            let b = h.fregs.read(rs2(i));
            let v = match rm {
                0 => a.min(b),
                1 => a.max(b),
                _ => return illegal(h, i),
            };
            h.fregs.write(rd(i), v);
        }
        // Precision conversions.
        0x20 => {
            if rs2(i) != 1 {
                return illegal(h, i);
            }
            write_f32(h, rd(i), h.fregs.read(rs1(i)) as f32);
        }
        0x21 => {
            if rs2(i) != 0 {
                return illegal(h, i);
            }
            let v = read_f32(h, rs1(i)) as f64;
            h.fregs.write(rd(i), v);
        }
        // Comparisons write an integer register; NaN compares false.
        0x50 => {
            let a = read_f32(h, rs1(i));
            let b = read_f32(h, rs2(i));
            let v = match rm {
                0 => a <= b,
                1 => a < b,
                2 => a == b,
                _ => return illegal(h, i),
            };
            h.write_xreg(rd(i), v as u64);
        }
        0x51 => {
            let a = h.fregs.read(rs1(i));
            let b = h.fregs.read(rs2(i));
            let v = match rm {
                0 => a <= b,
                1 => a < b,
                2 => a == b,
                _ => return illegal(h, i),
            };
            h.write_xreg(rd(i), v as u64);
        }
        // Float to integer conversions.
        0x60 => {
            let a = read_f32(h, rs1(i)) as f64;
            let v = match rs2(i) {
                0 => cvt_i32(h, rm, a),
                1 => cvt_u32(h, rm, a),
                2 if h.rv64 => cvt_i64(h, rm, a),
                3 if h.rv64 => cvt_u64(h, rm, a),
                _ => return illegal(h, i),
            };
            h.write_xreg(rd(i), v);
        }
        0x61 => {
            let a = h.fregs.read(rs1(i));
            let v = match rs2(i) {
                0 => cvt_i32(h, rm, a),
                1 => cvt_u32(h, rm, a),
                2 if h.rv64 => cvt_i64(h, rm, a),
                3 if h.rv64 => cvt_u64(h, rm, a),
                _ => return illegal(h, i),
            };
            h.write_xreg(rd(i), v);
        }
        // Integer to float conversions.
        0x68 => {
            let a = h.read_xreg(rs1(i));
            let v = match rs2(i) {
                0 => a as i32 as f32,
                1 => a as u32 as f32,
                2 if h.rv64 => a as i64 as f32,
                3 if h.rv64 => a as f32,
                _ => return illegal(h, i),
            };
            write_f32(h, rd(i), v);
        }
        0x69 => {
            let a = h.read_xreg(rs1(i));
            let v = match rs2(i) {
                0 => a as i32 as f64,
                1 => a as u32 as f64,
                2 if h.rv64 => a as i64 as f64,
                3 if h.rv64 => a as f64,
                _ => return illegal(h, i),
            };
            h.fregs.write(rd(i), v);
        }
        // Bit moves and classification.
        0x70 => match rm {
            0 => {
                let v = h.fregs.read_bits(rs1(i)) as u32;
                h.write_xreg(rd(i), v as i32 as i64 as u64);
            }
            1 => {
                let v = fclass32(read_f32(h, rs1(i)).to_bits());
                h.write_xreg(rd(i), v);
            }
            _ => return illegal(h, i),
        },
        0x71 => match rm {
            0 if h.rv64 => {
                let v = h.fregs.read_bits(rs1(i));
                h.write_xreg(rd(i), v);
            }
            1 => {
                let v = fclass64(h.fregs.read_bits(rs1(i)));
                h.write_xreg(rd(i), v);
            }
            _ => return illegal(h, i),
        },
        0x78 => {
            if rm != 0 {
                return illegal(h, i);
            }
            let v = h.read_xreg(rs1(i)) & 0xffff_ffff;
            h.fregs.write_bits(rd(i), v | NAN_BOX);
        }
        0x79 => {
            if rm != 0 || !h.rv64 {
                return illegal(h, i);
            }
            h.fregs.write_bits(rd(i), h.read_xreg(rs1(i)));
        }
        _ => return illegal(h, i),
    }
    Ok(())
}

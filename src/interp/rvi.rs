//! The RV32I/RV64I base integer instruction set, plus the dispatch into
//! the M extension for the shared OP/OP-32 table slots.

use super::*;
use crate::hart::{BYTE, DOUBLEWORD, HALFWORD, WORD};

pub(crate) const fn register(t: &mut [Handler; 512]) {
    // Loads.
    put_isb(t, 0x00, 0, lb);
    put_isb(t, 0x00, 1, lh);
    put_isb(t, 0x00, 2, lw);
    put_isb(t, 0x00, 3, ld);
    put_isb(t, 0x00, 4, lbu);
    put_isb(t, 0x00, 5, lhu);
    put_isb(t, 0x00, 6, lwu);
    // Fences.
    put_isb(t, 0x03, 0, fence);
    put_isb(t, 0x03, 1, fence_i);
    // Register-immediate operations.
    put_isb(t, 0x04, 0, addi);
    put(t, 0x04, 1, 0, slli);
    put_isb(t, 0x04, 2, slti);
    put_isb(t, 0x04, 3, sltiu);
    put_isb(t, 0x04, 4, xori);
    put(t, 0x04, 5, 0, srli);
    put(t, 0x04, 5, 1, srai);
    put_isb(t, 0x04, 6, ori);
    put_isb(t, 0x04, 7, andi);
    put_uj(t, 0x05, auipc);
    // RV64-only word-width register-immediate operations.
    put_isb(t, 0x06, 0, addiw);
    put(t, 0x06, 1, 0, slliw);
    put(t, 0x06, 5, 0, srliw);
    put(t, 0x06, 5, 1, sraiw);
    // Stores.
    put_isb(t, 0x08, 0, sb);
    put_isb(t, 0x08, 1, sh);
    put_isb(t, 0x08, 2, sw);
    put_isb(t, 0x08, 3, sd);
    // Register-register operations. The bit-30=0 slots are shared with
    // the M extension and split on funct7 inside the handler.
    put(t, 0x0c, 0, 0, add);
    put(t, 0x0c, 0, 1, sub);
    put(t, 0x0c, 1, 0, sll);
    put(t, 0x0c, 2, 0, slt);
    put(t, 0x0c, 3, 0, sltu);
    put(t, 0x0c, 4, 0, xor);
    put(t, 0x0c, 5, 0, srl);
    put(t, 0x0c, 5, 1, sra);
    put(t, 0x0c, 6, 0, or);
    put(t, 0x0c, 7, 0, and);
    put_uj(t, 0x0d, lui);
    // RV64-only word-width register-register operations.
    put(t, 0x0e, 0, 0, addw);
    put(t, 0x0e, 0, 1, subw);
    put(t, 0x0e, 1, 0, sllw);
    put(t, 0x0e, 4, 0, divw);
    put(t, 0x0e, 5, 0, srlw);
    put(t, 0x0e, 5, 1, sraw);
    put(t, 0x0e, 6, 0, remw);
    put(t, 0x0e, 7, 0, remuw);
    // Conditional branches.
    put_isb(t, 0x18, 0, beq);
    put_isb(t, 0x18, 1, bne);
    put_isb(t, 0x18, 4, blt);
    put_isb(t, 0x18, 5, bge);
    put_isb(t, 0x18, 6, bltu);
    put_isb(t, 0x18, 7, bgeu);
    // Unconditional jumps.
    put_isb(t, 0x19, 0, jalr);
    put_uj(t, 0x1b, jal);
}

fn lb(h: &mut Hart, i: u32) -> Result<(), Exception> {
    let addr = h.read_xreg(rs1(i)).wrapping_add(imm_i(i));
    let v = h.mem_read(addr, BYTE)?;
    h.write_xreg(rd(i), v as i8 as i64 as u64);
    Ok(())
}

fn lh(h: &mut Hart, i: u32) -> Result<(), Exception> {
    let addr = h.read_xreg(rs1(i)).wrapping_add(imm_i(i));
    let v = h.mem_read(addr, HALFWORD)?;
    h.write_xreg(rd(i), v as i16 as i64 as u64);
    Ok(())
}

fn lw(h: &mut Hart, i: u32) -> Result<(), Exception> {
    let addr = h.read_xreg(rs1(i)).wrapping_add(imm_i(i));
    let v = h.mem_read(addr, WORD)?;
    h.write_xreg(rd(i), v as i32 as i64 as u64);
    Ok(())
}

fn ld(h: &mut Hart, i: u32) -> Result<(), Exception> {
    if !h.rv64 {
        return illegal(h, i);
    }
    let addr = h.read_xreg(rs1(i)).wrapping_add(imm_i(i));
    let v = h.mem_read(addr, DOUBLEWORD)?;
    h.write_xreg(rd(i), v);
    Ok(())
}

fn lbu(h: &mut Hart, i: u32) -> Result<(), Exception> {
    let addr = h.read_xreg(rs1(i)).wrapping_add(imm_i(i));
    let v = h.mem_read(addr, BYTE)?;
    h.write_xreg(rd(i), v);
    Ok(())
}

fn lhu(h: &mut Hart, i: u32) -> Result<(), Exception> {
    let addr = h.read_xreg(rs1(i)).wrapping_add(imm_i(i));
    let v = h.mem_read(addr, HALFWORD)?;
    h.write_xreg(rd(i), v);
    Ok(())
}

fn lwu(h: &mut Hart, i: u32) -> Result<(), Exception> {
    if !h.rv64 {
        return illegal(h, i);
    }
    let addr = h.read_xreg(rs1(i)).wrapping_add(imm_i(i));
    let v = h.mem_read(addr, WORD)?;
    h.write_xreg(rd(i), v);
    Ok(())
}

fn sb(h: &mut Hart, i: u32) -> Result<(), Exception> {
    let addr = h.read_xreg(rs1(i)).wrapping_add(imm_s(i));
    h.mem_write(addr, h.read_xreg(rs2(i)), BYTE)
}

fn sh(h: &mut Hart, i: u32) -> Result<(), Exception> {
    let addr = h.read_xreg(rs1(i)).wrapping_add(imm_s(i));
    h.mem_write(addr, h.read_xreg(rs2(i)), HALFWORD)
}

fn sw(h: &mut Hart, i: u32) -> Result<(), Exception> {
    let addr = h.read_xreg(rs1(i)).wrapping_add(imm_s(i));
    h.mem_write(addr, h.read_xreg(rs2(i)), WORD)
}

fn sd(h: &mut Hart, i: u32) -> Result<(), Exception> {
    if !h.rv64 {
        return illegal(h, i);
    }
    let addr = h.read_xreg(rs1(i)).wrapping_add(imm_s(i));
    h.mem_write(addr, h.read_xreg(rs2(i)), DOUBLEWORD)
}

fn fence(_h: &mut Hart, _i: u32) -> Result<(), Exception> {
    // Loads and stores complete in program order within a hart, and the
    // shared memory is backed by host cache-coherent RAM.
    Ok(())
}

fn fence_i(h: &mut Hart, _i: u32) -> Result<(), Exception> {
    // The instruction stream may have been modified: drop every cached
    // native block.
    if let Some(jit) = h.jit.clone() {
        jit.flush();
    }
    Ok(())
}

fn addi(h: &mut Hart, i: u32) -> Result<(), Exception> {
    let v = h.read_xreg(rs1(i)).wrapping_add(imm_i(i));
    h.write_xreg(rd(i), v);
    Ok(())
}

fn slti(h: &mut Hart, i: u32) -> Result<(), Exception> {
    let v = (h.read_xreg(rs1(i)) as i64) < (imm_i(i) as i64);
    h.write_xreg(rd(i), v as u64);
    Ok(())
}

fn sltiu(h: &mut Hart, i: u32) -> Result<(), Exception> {
    let v = h.read_xreg(rs1(i)) < imm_i(i);
    h.write_xreg(rd(i), v as u64);
    Ok(())
}

fn xori(h: &mut Hart, i: u32) -> Result<(), Exception> {
    h.write_xreg(rd(i), h.read_xreg(rs1(i)) ^ imm_i(i));
    Ok(())
}

fn ori(h: &mut Hart, i: u32) -> Result<(), Exception> {
    h.write_xreg(rd(i), h.read_xreg(rs1(i)) | imm_i(i));
    Ok(())
}

fn andi(h: &mut Hart, i: u32) -> Result<(), Exception> {
    h.write_xreg(rd(i), h.read_xreg(rs1(i)) & imm_i(i));
    Ok(())
}

fn slli(h: &mut Hart, i: u32) -> Result<(), Exception> {
    let shamt = i >> 20 & 0x3f;
    if i >> 26 & 0x3f != 0 || (!h.rv64 && shamt > 31) {
        return illegal(h, i);
    }
    h.write_xreg(rd(i), h.read_xreg(rs1(i)) << shamt);
    Ok(())
}

fn srli(h: &mut Hart, i: u32) -> Result<(), Exception> {
    let shamt = i >> 20 & 0x3f;
    if i >> 26 & 0x3f != 0 || (!h.rv64 && shamt > 31) {
        return illegal(h, i);
    }
    let a = h.read_xreg(rs1(i));
    let v = if h.rv64 {
        a >> shamt
    } else {
        (a as u32 >> shamt) as u64
    };
    h.write_xreg(rd(i), v);
    Ok(())
}

fn srai(h: &mut Hart, i: u32) -> Result<(), Exception> {
    let shamt = i >> 20 & 0x3f;
    if i >> 26 & 0x3f != 0x10 || (!h.rv64 && shamt > 31) {
        return illegal(h, i);
    }
    let a = h.read_xreg(rs1(i));
    // RV32 values are stored sign-extended, so a 64-bit arithmetic shift
    // produces the 32-bit result directly.
    h.write_xreg(rd(i), ((a as i64) >> shamt) as u64);
    Ok(())
}

fn auipc(h: &mut Hart, i: u32) -> Result<(), Exception> {
    h.write_xreg(rd(i), h.pc.wrapping_add(imm_u(i)));
    Ok(())
}

fn lui(h: &mut Hart, i: u32) -> Result<(), Exception> {
    h.write_xreg(rd(i), imm_u(i));
    Ok(())
}

fn addiw(h: &mut Hart, i: u32) -> Result<(), Exception> {
    if !h.rv64 {
        return illegal(h, i);
    }
    let v = h.read_xreg(rs1(i)).wrapping_add(imm_i(i));
    h.write_xreg(rd(i), v as i32 as i64 as u64);
    Ok(())
}

fn slliw(h: &mut Hart, i: u32) -> Result<(), Exception> {
    if !h.rv64 || funct7(i) != 0 {
        return illegal(h, i);
    }
    let shamt = i >> 20 & 0x1f;
    let v = (h.read_xreg(rs1(i)) as u32) << shamt;
    h.write_xreg(rd(i), v as i32 as i64 as u64);
    Ok(())
}

fn srliw(h: &mut Hart, i: u32) -> Result<(), Exception> {
    if !h.rv64 || funct7(i) != 0 {
        return illegal(h, i);
    }
    let shamt = i >> 20 & 0x1f;
    let v = h.read_xreg(rs1(i)) as u32 >> shamt;
    h.write_xreg(rd(i), v as i32 as i64 as u64);
    Ok(())
}

fn sraiw(h: &mut Hart, i: u32) -> Result<(), Exception> {
    if !h.rv64 || funct7(i) != 0x20 {
        return illegal(h, i);
    }
    let shamt = i >> 20 & 0x1f;
    let v = h.read_xreg(rs1(i)) as i32 >> shamt;
    h.write_xreg(rd(i), v as i64 as u64);
    Ok(())
}

fn add(h: &mut Hart, i: u32) -> Result<(), Exception> {
    match funct7(i) {
        0x00 => {
            let v = h.read_xreg(rs1(i)).wrapping_add(h.read_xreg(rs2(i)));
            h.write_xreg(rd(i), v);
            Ok(())
        }
        0x01 => rvm::mul(h, i),
        _ => illegal(h, i),
    }
}

fn sub(h: &mut Hart, i: u32) -> Result<(), Exception> {
    if funct7(i) != 0x20 {
        return illegal(h, i);
    }
    let v = h.read_xreg(rs1(i)).wrapping_sub(h.read_xreg(rs2(i)));
    h.write_xreg(rd(i), v);
    Ok(())
}

fn sll(h: &mut Hart, i: u32) -> Result<(), Exception> {
    match funct7(i) {
        0x00 => {
            let shamt = h.read_xreg(rs2(i)) & if h.rv64 { 0x3f } else { 0x1f };
            h.write_xreg(rd(i), h.read_xreg(rs1(i)) << shamt);
            Ok(())
        }
        0x01 => rvm::mulh(h, i),
        _ => illegal(h, i),
    }
}

fn slt(h: &mut Hart, i: u32) -> Result<(), Exception> {
    match funct7(i) {
        0x00 => {
            let v = (h.read_xreg(rs1(i)) as i64) < (h.read_xreg(rs2(i)) as i64);
            h.write_xreg(rd(i), v as u64);
            Ok(())
        }
        0x01 => rvm::mulhsu(h, i),
        _ => illegal(h, i),
    }
}

fn sltu(h: &mut Hart, i: u32) -> Result<(), Exception> {
    match funct7(i) {
        0x00 => {
            let v = h.read_xreg(rs1(i)) < h.read_xreg(rs2(i));
            h.write_xreg(rd(i), v as u64);
            Ok(())
        }
        0x01 => rvm::mulhu(h, i),
        _ => illegal(h, i),
    }
}

fn xor(h: &mut Hart, i: u32) -> Result<(), Exception> {
    match funct7(i) {
        0x00 => {
            h.write_xreg(rd(i), h.read_xreg(rs1(i)) ^ h.read_xreg(rs2(i)));
            Ok(())
        }
        0x01 => rvm::div(h, i),
        _ => illegal(h, i),
    }
}

fn srl(h: &mut Hart, i: u32) -> Result<(), Exception> {
    match funct7(i) {
        0x00 => {
            let a = h.read_xreg(rs1(i));
            let v = if h.rv64 {
                a >> (h.read_xreg(rs2(i)) & 0x3f)
            } else {
                (a as u32 >> (h.read_xreg(rs2(i)) & 0x1f)) as u64
            };
            h.write_xreg(rd(i), v);
            Ok(())
        }
        0x01 => rvm::divu(h, i),
        _ => illegal(h, i),
    }
}

fn sra(h: &mut Hart, i: u32) -> Result<(), Exception> {
    if funct7(i) != 0x20 {
        return illegal(h, i);
    }
    let shamt = h.read_xreg(rs2(i)) & if h.rv64 { 0x3f } else { 0x1f };
    let v = (h.read_xreg(rs1(i)) as i64) >> shamt;
    h.write_xreg(rd(i), v as u64);
    Ok(())
}

fn or(h: &mut Hart, i: u32) -> Result<(), Exception> {
    match funct7(i) {
        0x00 => {
            h.write_xreg(rd(i), h.read_xreg(rs1(i)) | h.read_xreg(rs2(i)));
            Ok(())
        }
        0x01 => rvm::rem(h, i),
        _ => illegal(h, i),
    }
}

fn and(h: &mut Hart, i: u32) -> Result<(), Exception> {
    match funct7(i) {
        0x00 => {
            h.write_xreg(rd(i), h.read_xreg(rs1(i)) & h.read_xreg(rs2(i)));
            Ok(())
        }
        0x01 => rvm::remu(h, i),
        _ => illegal(h, i),
    }
}

fn addw(h: &mut Hart, i: u32) -> Result<(), Exception> {
    if !h.rv64 {
        return illegal(h, i);
    }
    match funct7(i) {
        0x00 => {
            let v = h.read_xreg(rs1(i)).wrapping_add(h.read_xreg(rs2(i)));
            h.write_xreg(rd(i), v as i32 as i64 as u64);
            Ok(())
        }
        0x01 => rvm::mulw(h, i),
        _ => illegal(h, i),
    }
}

fn subw(h: &mut Hart, i: u32) -> Result<(), Exception> {
    if !h.rv64 || funct7(i) != 0x20 {
        return illegal(h, i);
    }
    let v = h.read_xreg(rs1(i)).wrapping_sub(h.read_xreg(rs2(i)));
    h.write_xreg(rd(i), v as i32 as i64 as u64);
    Ok(())
}

fn sllw(h: &mut Hart, i: u32) -> Result<(), Exception> {
    if !h.rv64 || funct7(i) != 0 {
        return illegal(h, i);
    }
    let v = (h.read_xreg(rs1(i)) as u32) << (h.read_xreg(rs2(i)) & 0x1f);
    h.write_xreg(rd(i), v as i32 as i64 as u64);
    Ok(())
}

fn srlw(h: &mut Hart, i: u32) -> Result<(), Exception> {
    match funct7(i) {
        0x00 if h.rv64 => {
            let v = h.read_xreg(rs1(i)) as u32 >> (h.read_xreg(rs2(i)) & 0x1f);
            h.write_xreg(rd(i), v as i32 as i64 as u64);
            Ok(())
        }
        0x01 => rvm::divuw(h, i),
        _ => illegal(h, i),
    }
}

fn sraw(h: &mut Hart, i: u32) -> Result<(), Exception> {
    if !h.rv64 || funct7(i) != 0x20 {
        return illegal(h, i);
    }
    let v = h.read_xreg(rs1(i)) as i32 >> (h.read_xreg(rs2(i)) & 0x1f);
    h.write_xreg(rd(i), v as i64 as u64);
    Ok(())
}

fn divw(h: &mut Hart, i: u32) -> Result<(), Exception> {
    if funct7(i) != 0x01 {
        return illegal(h, i);
    }
    rvm::divw(h, i)
}

fn remw(h: &mut Hart, i: u32) -> Result<(), Exception> {
    if funct7(i) != 0x01 {
        return illegal(h, i);
    }
    rvm::remw(h, i)
}

fn remuw(h: &mut Hart, i: u32) -> Result<(), Exception> {
    if funct7(i) != 0x01 {
        return illegal(h, i);
    }
    rvm::remuw(h, i)
}

fn beq(h: &mut Hart, i: u32) -> Result<(), Exception> {
    if h.read_xreg(rs1(i)) == h.read_xreg(rs2(i)) {
        h.next_pc = h.pc.wrapping_add(imm_b(i));
    }
    Ok(())
}

fn bne(h: &mut Hart, i: u32) -> Result<(), Exception> {
    if h.read_xreg(rs1(i)) != h.read_xreg(rs2(i)) {
        h.next_pc = h.pc.wrapping_add(imm_b(i));
    }
    Ok(())
}

fn blt(h: &mut Hart, i: u32) -> Result<(), Exception> {
    if (h.read_xreg(rs1(i)) as i64) < (h.read_xreg(rs2(i)) as i64) {
        h.next_pc = h.pc.wrapping_add(imm_b(i));
    }
    Ok(())
}

fn bge(h: &mut Hart, i: u32) -> Result<(), Exception> {
    if (h.read_xreg(rs1(i)) as i64) >= (h.read_xreg(rs2(i)) as i64) {
        h.next_pc = h.pc.wrapping_add(imm_b(i));
    }
    Ok(())
}

fn bltu(h: &mut Hart, i: u32) -> Result<(), Exception> {
    if h.read_xreg(rs1(i)) < h.read_xreg(rs2(i)) {
        h.next_pc = h.pc.wrapping_add(imm_b(i));
    }
    Ok(())
}

fn bgeu(h: &mut Hart, i: u32) -> Result<(), Exception> {
    if h.read_xreg(rs1(i)) >= h.read_xreg(rs2(i)) {
        h.next_pc = h.pc.wrapping_add(imm_b(i));
    }
    Ok(())
}

fn jalr(h: &mut Hart, i: u32) -> Result<(), Exception> {
    let target = h.read_xreg(rs1(i)).wrapping_add(imm_i(i)) & !1;
    let link = h.next_pc;
    h.next_pc = target;
    h.write_xreg(rd(i), link);
    Ok(())
}

fn jal(h: &mut Hart, i: u32) -> Result<(), Exception> {
    let link = h.next_pc;
    h.next_pc = h.pc.wrapping_add(imm_j(i));
    h.write_xreg(rd(i), link);
    Ok(())
}

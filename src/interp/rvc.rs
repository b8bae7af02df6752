//! The C standard extension. Compressed parcels are expanded to their
//! 32-bit equivalents and dispatched through the regular handler table;
//! only the pc increment differs.

use crate::bits::sign_extend;
use crate::trap::Exception;

const OPC_LOAD: u32 = 0x03;
const OPC_LOAD_FP: u32 = 0x07;
const OPC_OP_IMM: u32 = 0x13;
const OPC_OP_IMM_32: u32 = 0x1b;
const OPC_STORE: u32 = 0x23;
const OPC_STORE_FP: u32 = 0x27;
const OPC_OP: u32 = 0x33;
const OPC_OP_32: u32 = 0x3b;
const OPC_LUI: u32 = 0x37;
const OPC_BRANCH: u32 = 0x63;
const OPC_JALR: u32 = 0x67;
const OPC_JAL: u32 = 0x6f;

fn enc_r(opcode: u32, rd: u32, f3: u32, rs1: u32, rs2: u32, f7: u32) -> u32 {
    f7 << 25 | rs2 << 20 | rs1 << 15 | f3 << 12 | rd << 7 | opcode
}

fn enc_i(opcode: u32, rd: u32, f3: u32, rs1: u32, imm: u32) -> u32 {
    (imm & 0xfff) << 20 | rs1 << 15 | f3 << 12 | rd << 7 | opcode
}

fn enc_s(opcode: u32, f3: u32, rs1: u32, rs2: u32, imm: u32) -> u32 {
    (imm >> 5 & 0x7f) << 25 | rs2 << 20 | rs1 << 15 | f3 << 12 | (imm & 0x1f) << 7 | opcode
}

fn enc_b(opcode: u32, f3: u32, rs1: u32, rs2: u32, imm: u32) -> u32 {
    (imm >> 12 & 1) << 31
        | (imm >> 5 & 0x3f) << 25
        | rs2 << 20
        | rs1 << 15
        | f3 << 12
        | (imm >> 1 & 0xf) << 8
        | (imm >> 11 & 1) << 7
        | opcode
}

fn enc_u(opcode: u32, rd: u32, imm20: u32) -> u32 {
    (imm20 & 0xfffff) << 12 | rd << 7 | opcode
}

fn enc_j(opcode: u32, rd: u32, imm: u32) -> u32 {
    (imm >> 20 & 1) << 31
        | (imm >> 1 & 0x3ff) << 21
        | (imm >> 11 & 1) << 20
        | (imm >> 12 & 0xff) << 12
        | rd << 7
        | opcode
}

/// The CJ-format jump offset.
fn imm_cj(c: u32) -> u32 {
    let imm = (c >> 12 & 1) << 11
        | (c >> 11 & 1) << 4
        | (c >> 9 & 3) << 8
        | (c >> 8 & 1) << 10
        | (c >> 7 & 1) << 6
        | (c >> 6 & 1) << 7
        | (c >> 3 & 7) << 1
        | (c >> 2 & 1) << 5;
    sign_extend(imm as u64, 12) as u32
}

/// The CB-format branch offset.
fn imm_cb(c: u32) -> u32 {
    let imm = (c >> 12 & 1) << 8
        | (c >> 10 & 3) << 3
        | (c >> 5 & 3) << 6
        | (c >> 3 & 3) << 1
        | (c >> 2 & 1) << 5;
    sign_extend(imm as u64, 9) as u32
}

/// The CI-format 6-bit signed immediate.
fn imm_ci(c: u32) -> u32 {
    sign_extend(((c >> 12 & 1) << 5 | (c >> 2 & 0x1f)) as u64, 6) as u32
}

/// Doubleword offset used by c.fld/c.ld/c.fsd/c.sd.
fn imm_cld(c: u32) -> u32 {
    (c >> 10 & 7) << 3 | (c >> 5 & 3) << 6
}

/// Word offset used by c.lw/c.flw/c.sw/c.fsw.
fn imm_clw(c: u32) -> u32 {
    (c >> 10 & 7) << 3 | (c >> 6 & 1) << 2 | (c >> 5 & 1) << 6
}

/// Expand a 16-bit parcel into the equivalent 32-bit instruction.
/// Reserved encodings expand to an illegal-instruction trap carrying the
/// original parcel.
pub fn expand(parcel: u16, rv64: bool) -> Result<u32, Exception> {
    let c = parcel as u32;
    let ill = Err(Exception::IllegalInstruction(c));
    let f3 = c >> 13 & 7;
    // Full-width register fields of the CR/CI formats.
    let rd = c >> 7 & 0x1f;
    let rs2 = c >> 2 & 0x1f;
    // Popular-register fields (x8..x15) of the CIW/CL/CS/CA formats.
    let rd_s = (c >> 2 & 7) + 8;
    let rs1_s = (c >> 7 & 7) + 8;
    let rs2_s = (c >> 2 & 7) + 8;

    match (c & 3, f3) {
        // Quadrant 0.
        (0, 0) => {
            // c.addi4spn
            let imm = (c >> 11 & 3) << 4 | (c >> 7 & 0xf) << 6 | (c >> 6 & 1) << 2 | (c >> 5 & 1) << 3;
            if imm == 0 {
                return ill;
            }
            Ok(enc_i(OPC_OP_IMM, rd_s, 0, 2, imm))
        }
        (0, 1) => Ok(enc_i(OPC_LOAD_FP, rd_s, 3, rs1_s, imm_cld(c))), // c.fld
        (0, 2) => Ok(enc_i(OPC_LOAD, rd_s, 2, rs1_s, imm_clw(c))),    // c.lw
        (0, 3) => {
            if rv64 {
                Ok(enc_i(OPC_LOAD, rd_s, 3, rs1_s, imm_cld(c))) // c.ld
            } else {
                Ok(enc_i(OPC_LOAD_FP, rd_s, 2, rs1_s, imm_clw(c))) // c.flw
            }
        }
        (0, 5) => Ok(enc_s(OPC_STORE_FP, 3, rs1_s, rs2_s, imm_cld(c))), // c.fsd
        (0, 6) => Ok(enc_s(OPC_STORE, 2, rs1_s, rs2_s, imm_clw(c))),    // c.sw
        (0, 7) => {
            if rv64 {
                Ok(enc_s(OPC_STORE, 3, rs1_s, rs2_s, imm_cld(c))) // c.sd
            } else {
                Ok(enc_s(OPC_STORE_FP, 2, rs1_s, rs2_s, imm_clw(c))) // c.fsw
            }
        }

        // Quadrant 1.
        (1, 0) => Ok(enc_i(OPC_OP_IMM, rd, 0, rd, imm_ci(c))), // c.addi / c.nop
        (1, 1) => {
            if rv64 {
                // c.addiw
                if rd == 0 {
                    return ill;
                }
                Ok(enc_i(OPC_OP_IMM_32, rd, 0, rd, imm_ci(c)))
            } else {
                // c.jal
                Ok(enc_j(OPC_JAL, 1, imm_cj(c)))
            }
        }
        (1, 2) => Ok(enc_i(OPC_OP_IMM, rd, 0, 0, imm_ci(c))), // c.li
        (1, 3) => {
            if rd == 2 {
                // c.addi16sp
                let imm = (c >> 12 & 1) << 9
                    | (c >> 6 & 1) << 4
                    | (c >> 5 & 1) << 6
                    | (c >> 3 & 3) << 7
                    | (c >> 2 & 1) << 5;
                if imm == 0 {
                    return ill;
                }
                Ok(enc_i(OPC_OP_IMM, 2, 0, 2, sign_extend(imm as u64, 10) as u32))
            } else {
                // c.lui
                let imm = (c >> 12 & 1) << 17 | (c >> 2 & 0x1f) << 12;
                if imm == 0 {
                    return ill;
                }
                Ok(enc_u(OPC_LUI, rd, (sign_extend(imm as u64, 18) >> 12) as u32))
            }
        }
        (1, 4) => {
            let shamt = (c >> 12 & 1) << 5 | (c >> 2 & 0x1f);
            match c >> 10 & 3 {
                0 => {
                    // c.srli
                    if !rv64 && shamt > 31 {
                        return ill;
                    }
                    Ok(enc_i(OPC_OP_IMM, rs1_s, 5, rs1_s, shamt))
                }
                1 => {
                    // c.srai
                    if !rv64 && shamt > 31 {
                        return ill;
                    }
                    Ok(enc_i(OPC_OP_IMM, rs1_s, 5, rs1_s, 0x400 | shamt))
                }
                2 => Ok(enc_i(OPC_OP_IMM, rs1_s, 7, rs1_s, imm_ci(c))), // c.andi
                _ => match (c >> 12 & 1, c >> 5 & 3) {
                    (0, 0) => Ok(enc_r(OPC_OP, rs1_s, 0, rs1_s, rs2_s, 0x20)), // c.sub
                    (0, 1) => Ok(enc_r(OPC_OP, rs1_s, 4, rs1_s, rs2_s, 0)),    // c.xor
                    (0, 2) => Ok(enc_r(OPC_OP, rs1_s, 6, rs1_s, rs2_s, 0)),    // c.or
                    (0, 3) => Ok(enc_r(OPC_OP, rs1_s, 7, rs1_s, rs2_s, 0)),    // c.and
                    (1, 0) if rv64 => Ok(enc_r(OPC_OP_32, rs1_s, 0, rs1_s, rs2_s, 0x20)), // c.subw
                    (1, 1) if rv64 => Ok(enc_r(OPC_OP_32, rs1_s, 0, rs1_s, rs2_s, 0)), // c.addw
                    _ => ill,
                },
            }
        }
        (1, 5) => Ok(enc_j(OPC_JAL, 0, imm_cj(c))),                  // c.j
        (1, 6) => Ok(enc_b(OPC_BRANCH, 0, rs1_s, 0, imm_cb(c))),     // c.beqz
        (1, 7) => Ok(enc_b(OPC_BRANCH, 1, rs1_s, 0, imm_cb(c))),     // c.bnez

        // Quadrant 2.
        (2, 0) => {
            // c.slli
            let shamt = (c >> 12 & 1) << 5 | (c >> 2 & 0x1f);
            if !rv64 && shamt > 31 {
                return ill;
            }
            Ok(enc_i(OPC_OP_IMM, rd, 1, rd, shamt))
        }
        (2, 1) => {
            // c.fldsp
            let imm = (c >> 12 & 1) << 5 | (c >> 5 & 3) << 3 | (c >> 2 & 7) << 6;
            Ok(enc_i(OPC_LOAD_FP, rd, 3, 2, imm))
        }
        (2, 2) => {
            // c.lwsp
            let imm = (c >> 12 & 1) << 5 | (c >> 4 & 7) << 2 | (c >> 2 & 3) << 6;
            if rd == 0 {
                return ill;
            }
            Ok(enc_i(OPC_LOAD, rd, 2, 2, imm))
        }
        (2, 3) => {
            if rv64 {
                // c.ldsp
                let imm = (c >> 12 & 1) << 5 | (c >> 5 & 3) << 3 | (c >> 2 & 7) << 6;
                if rd == 0 {
                    return ill;
                }
                Ok(enc_i(OPC_LOAD, rd, 3, 2, imm))
            } else {
                // c.flwsp
                let imm = (c >> 12 & 1) << 5 | (c >> 4 & 7) << 2 | (c >> 2 & 3) << 6;
                Ok(enc_i(OPC_LOAD_FP, rd, 2, 2, imm))
            }
        }
        (2, 4) => {
            if c >> 12 & 1 == 0 {
                if rs2 == 0 {
                    // c.jr
                    if rd == 0 {
                        return ill;
                    }
                    Ok(enc_i(OPC_JALR, 0, 0, rd, 0))
                } else {
                    // c.mv
                    Ok(enc_r(OPC_OP, rd, 0, 0, rs2, 0))
                }
            } else if rs2 == 0 {
                if rd == 0 {
                    // c.ebreak
                    Ok(0x0010_0073)
                } else {
                    // c.jalr
                    Ok(enc_i(OPC_JALR, 1, 0, rd, 0))
                }
            } else {
                // c.add
                Ok(enc_r(OPC_OP, rd, 0, rd, rs2, 0))
            }
        }
        (2, 5) => {
            // c.fsdsp
            let imm = (c >> 10 & 7) << 3 | (c >> 7 & 7) << 6;
            Ok(enc_s(OPC_STORE_FP, 3, 2, rs2, imm))
        }
        (2, 6) => {
            // c.swsp
            let imm = (c >> 9 & 0xf) << 2 | (c >> 7 & 3) << 6;
            Ok(enc_s(OPC_STORE, 2, 2, rs2, imm))
        }
        (2, 7) => {
            let imm = (c >> 10 & 7) << 3 | (c >> 7 & 7) << 6;
            if rv64 {
                // c.sdsp
                Ok(enc_s(OPC_STORE, 3, 2, rs2, imm))
            } else {
                // c.fswsp
                let imm = (c >> 9 & 0xf) << 2 | (c >> 7 & 3) << 6;
                Ok(enc_s(OPC_STORE_FP, 2, 2, rs2, imm))
            }
        }
        _ => ill,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addi_forms() {
        // c.addi x31, -1 = 0x1ffd
        assert_eq!(expand(0x1ffd, true).unwrap(), enc_i(0x13, 31, 0, 31, 0xfff));
        // c.li x10, 5 = 0x4515
        assert_eq!(expand(0x4515, true).unwrap(), enc_i(0x13, 10, 0, 0, 5));
        // c.nop = 0x0001
        assert_eq!(expand(0x0001, true).unwrap(), enc_i(0x13, 0, 0, 0, 0));
    }

    #[test]
    fn memory_forms() {
        // c.lw x15, 0(x10) = 0x411c
        assert_eq!(expand(0x411c, true).unwrap(), enc_i(0x03, 15, 2, 10, 0));
        // c.sw x15, 0(x10) = 0xc11c
        assert_eq!(expand(0xc11c, true).unwrap(), enc_s(0x23, 2, 10, 15, 0));
        // c.ld x8, 8(x9) = 0x6480 on RV64, c.flw on RV32
        assert_eq!(expand(0x6480, true).unwrap(), enc_i(0x03, 8, 3, 9, 8));
        assert_eq!(expand(0x6480, false).unwrap(), enc_i(0x07, 8, 2, 9, 8));
    }

    #[test]
    fn control_transfer_forms() {
        // c.j . (offset 0... use offset -2) c.j -2 = 0xbffd
        assert_eq!(expand(0xbffd, true).unwrap(), enc_j(0x6f, 0, -2i32 as u32));
        // c.jr x1 = 0x8082 (ret)
        assert_eq!(expand(0x8082, true).unwrap(), enc_i(0x67, 0, 0, 1, 0));
        // c.ebreak = 0x9002
        assert_eq!(expand(0x9002, true).unwrap(), 0x0010_0073);
        // c.beqz x10, 8 = 0xc501
        assert_eq!(expand(0xc501, true).unwrap(), enc_b(0x63, 0, 10, 0, 8));
    }

    #[test]
    fn reserved_encodings_are_illegal() {
        // c.addi4spn with zero immediate.
        assert!(expand(0x0000, true).is_err());
        // c.lwsp with rd = 0.
        assert!(expand(0x4002, true).is_err());
        // Quadrant-0 funct3 4 is reserved.
        assert!(expand(0x8000, true).is_err());
    }
}

//! The M standard extension: multiply and divide. These handlers are
//! reached through the shared OP/OP-32 table slots when funct7 is 1.

use super::*;

pub(crate) fn mul(h: &mut Hart, i: u32) -> Result<(), Exception> {
    let v = h.read_xreg(rs1(i)).wrapping_mul(h.read_xreg(rs2(i)));
    h.write_xreg(rd(i), v);
    Ok(())
}

pub(crate) fn mulh(h: &mut Hart, i: u32) -> Result<(), Exception> {
    let a = h.read_xreg(rs1(i)) as i64;
    let b = h.read_xreg(rs2(i)) as i64;
    let v = if h.rv64 {
        ((a as i128 * b as i128) >> 64) as u64
    } else {
        // RV32 operands are stored sign-extended already.
        ((a * b) >> 32) as u64
    };
    h.write_xreg(rd(i), v);
    Ok(())
}

pub(crate) fn mulhsu(h: &mut Hart, i: u32) -> Result<(), Exception> {
    let a = h.read_xreg(rs1(i));
    let b = h.read_xreg(rs2(i));
    let v = if h.rv64 {
        ((a as i64 as i128).wrapping_mul(b as u128 as i128) >> 64) as u64
    } else {
        ((a as i64).wrapping_mul(b as u32 as i64) >> 32) as u64
    };
    h.write_xreg(rd(i), v);
    Ok(())
}

pub(crate) fn mulhu(h: &mut Hart, i: u32) -> Result<(), Exception> {
    let a = h.read_xreg(rs1(i));
    let b = h.read_xreg(rs2(i));
    let v = if h.rv64 {
        ((a as u128 * b as u128) >> 64) as u64
    } else {
        (a as u32 as u64 * b as u32 as u64) >> 32
    };
    h.write_xreg(rd(i), v);
    Ok(())
}

pub(crate) fn div(h: &mut Hart, i: u32) -> Result<(), Exception> {
    let a = h.read_xreg(rs1(i)) as i64;
    let b = h.read_xreg(rs2(i)) as i64;
    // Division by zero yields all ones; signed overflow wraps back to the
    // dividend, as the M extension specifies.
    let v = if b == 0 {
        u64::MAX
    } else {
        a.wrapping_div(b) as u64
    };
    h.write_xreg(rd(i), v);
    Ok(())
}

pub(crate) fn divu(h: &mut Hart, i: u32) -> Result<(), Exception> {
    let v = if h.rv64 {
        let a = h.read_xreg(rs1(i));
        let b = h.read_xreg(rs2(i));
        if b == 0 {
            u64::MAX
        } else {
            a / b
        }
    } else {
        let a = h.read_xreg(rs1(i)) as u32;
        let b = h.read_xreg(rs2(i)) as u32;
        if b == 0 {
            u64::MAX
        } else {
            (a / b) as u64
        }
    };
    h.write_xreg(rd(i), v);
    Ok(())
}

pub(crate) fn rem(h: &mut Hart, i: u32) -> Result<(), Exception> {
    let a = h.read_xreg(rs1(i)) as i64;
    let b = h.read_xreg(rs2(i)) as i64;
    let v = if b == 0 {
        a as u64
    } else {
        a.wrapping_rem(b) as u64
    };
    h.write_xreg(rd(i), v);
    Ok(())
}

pub(crate) fn remu(h: &mut Hart, i: u32) -> Result<(), Exception> {
    let v = if h.rv64 {
        let a = h.read_xreg(rs1(i));
        let b = h.read_xreg(rs2(i));
        if b == 0 {
            a
        } else {
            a % b
        }
    } else {
        let a = h.read_xreg(rs1(i)) as u32;
        let b = h.read_xreg(rs2(i)) as u32;
        if b == 0 {
            a as u64
        } else {
            (a % b) as u64
        }
    };
    h.write_xreg(rd(i), v);
    Ok(())
}

pub(crate) fn mulw(h: &mut Hart, i: u32) -> Result<(), Exception> {
    if !h.rv64 {
        return illegal(h, i);
    }
    let v = (h.read_xreg(rs1(i)) as i32).wrapping_mul(h.read_xreg(rs2(i)) as i32);
    h.write_xreg(rd(i), v as i64 as u64);
    Ok(())
}

pub(crate) fn divw(h: &mut Hart, i: u32) -> Result<(), Exception> {
    if !h.rv64 {
        return illegal(h, i);
    }
    let a = h.read_xreg(rs1(i)) as i32;
    let b = h.read_xreg(rs2(i)) as i32;
    let v = if b == 0 {
        u64::MAX
    } else {
        a.wrapping_div(b) as i64 as u64
    };
    h.write_xreg(rd(i), v);
    Ok(())
}

pub(crate) fn divuw(h: &mut Hart, i: u32) -> Result<(), Exception> {
    if !h.rv64 {
        return illegal(h, i);
    }
    let a = h.read_xreg(rs1(i)) as u32;
    let b = h.read_xreg(rs2(i)) as u32;
    let v = if b == 0 {
        u64::MAX
    } else {
        (a / b) as i32 as i64 as u64
    };
    h.write_xreg(rd(i), v);
    Ok(())
}

pub(crate) fn remw(h: &mut Hart, i: u32) -> Result<(), Exception> {
    if !h.rv64 {
        return illegal(h, i);
    }
    let a = h.read_xreg(rs1(i)) as i32;
    let b = h.read_xreg(rs2(i)) as i32;
    let v = if b == 0 {
        a as i64 as u64
    } else {
        a.wrapping_rem(b) as i64 as u64
    };
    h.write_xreg(rd(i), v);
    Ok(())
}

pub(crate) fn remuw(h: &mut Hart, i: u32) -> Result<(), Exception> {
    if !h.rv64 {
        return illegal(h, i);
    }
    let a = h.read_xreg(rs1(i)) as u32;
    let b = h.read_xreg(rs2(i)) as u32;
    let v = if b == 0 {
        a as i32 as i64 as u64
    } else {
        (a % b) as i32 as i64 as u64
    };
    h.write_xreg(rd(i), v);
    Ok(())
}

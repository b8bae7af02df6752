
use helper::asm;
use helper::*;
use rivet::csr::{self, CsrOp};
use rivet::hart::Mode;
use rivet::trap::IP_STIP;

fn csr_read(hart: &mut rivet::hart::Hart, addr: u16) -> Option<u64> {
    let mut value = 0;
    hart.csr_op(addr, &mut value, CsrOp::SetBits).then_some(value)
}

fn csr_write(hart: &mut rivet::hart::Hart, addr: u16, value: u64) -> bool {
    let mut value = value;
    hart.csr_op(addr, &mut value, CsrOp::Swap)
}

#[test]
fn privileged_csrs_reject_lower_modes() {
    let (mut machine, _) = machine(true);
    let hart = &mut machine.harts[0];

    hart.mode = Mode::User;
    assert!(!csr_write(hart, csr::MSTATUS, 0));
    assert!(csr_read(hart, csr::MSTATUS).is_none());
    assert!(csr_read(hart, csr::SATP).is_none());

    hart.mode = Mode::Supervisor;
    assert!(csr_read(hart, csr::SSTATUS).is_some());
    assert!(csr_read(hart, csr::MSTATUS).is_none());

    hart.mode = Mode::Machine;
    assert!(csr_read(hart, csr::MSTATUS).is_some());
}

#[test]
fn privileged_access_raises_exactly_one_illegal_instruction() {
    let (mut machine, _) = machine(true);
    let mut program = words(&[
        // Jump to U-mode code that pokes a machine CSR. lui would
        // sign-extend on RV64, so build the RAM base with a shift.
        asm::addi(2, 0, 1),
        asm::slli(2, 2, 31),
        asm::addi(4, 2, 0x100),
        asm::csrrw(0, csr::MEPC, 4),
        asm::addi(3, 2, 0x200),
        asm::csrrw(0, csr::MTVEC, 3),
        asm::mret(),
    ]);
    program.resize(0x100, 0);
    program.extend_from_slice(&words(&[asm::csrrs(5, csr::MSTATUS, 0)]));
    program.resize(0x104, 0);
    boot(&mut machine, &program);

    let hart = &machine.harts[0];
    assert_eq!(hart.csr.cause[3], 2, "illegal instruction");
    assert_eq!(hart.csr.epc[3], DRAM_BASE + 0x100);
    assert_eq!(
        hart.csr.tval[3],
        asm::csrrs(5, csr::MSTATUS, 0) as u64,
        "tval carries the faulting instruction"
    );
    assert_eq!(hart.read_xreg(5), 0, "destination register unmodified");
    assert_eq!(hart.pc, DRAM_BASE + 0x200);
}

#[test]
fn read_only_csrs_reject_writes() {
    let (mut machine, _) = machine(true);
    let hart = &mut machine.harts[0];

    // A pure read of a read-only CSR succeeds.
    let mut value = 0;
    assert!(hart.csr_op(csr::MHARTID, &mut value, CsrOp::SetBits));
    assert_eq!(value, 0);

    // Any write shape is rejected.
    assert!(!csr_write(hart, csr::MHARTID, 0));
    let mut nonzero = 1;
    assert!(!hart.csr_op(csr::MHARTID, &mut nonzero, CsrOp::SetBits));
}

#[test]
fn status_validation() {
    let (mut machine, _) = machine(true);
    let hart = &mut machine.harts[0];

    // MPP=2 is reserved and clamps to 0.
    assert!(csr_write(hart, csr::MSTATUS, 0b10 << 11));
    assert_eq!(csr_read(hart, csr::MSTATUS).unwrap() >> 11 & 3, 0);

    // UXL/SXL out of range are forced back to 64-bit.
    assert!(csr_write(hart, csr::MSTATUS, 0xf << 32));
    let status = csr_read(hart, csr::MSTATUS).unwrap();
    assert_eq!(status >> 32 & 3, 2);
    assert_eq!(status >> 34 & 3, 2);

    // Enabling the FPU dirties its state and sets SD on reads.
    assert!(csr_write(hart, csr::MSTATUS, 1 << 13));
    let status = csr_read(hart, csr::MSTATUS).unwrap();
    assert_eq!(status >> 13 & 3, 3, "FS promoted to dirty");
    assert_eq!(status >> 63, 1, "SD mirrors dirty XS");
}

#[test]
fn sstatus_exposes_a_subset() {
    let (mut machine, _) = machine(true);
    let hart = &mut machine.harts[0];
    hart.mode = Mode::Supervisor;

    assert!(csr_write(hart, csr::SSTATUS, u64::MAX));
    let sstatus = csr_read(hart, csr::SSTATUS).unwrap();
    assert_eq!(sstatus & (1 << 3), 0, "MIE invisible through sstatus");
    assert_eq!(sstatus & (1 << 7), 0, "MPIE invisible through sstatus");
    assert_ne!(sstatus & (1 << 1), 0, "SIE visible");
    assert_ne!(sstatus & (1 << 18), 0, "SUM visible");
}

#[test]
fn misa_reports_extensions_and_switches_xlen() {
    let (mut machine, _) = machine(true);
    let hart = &mut machine.harts[0];

    let misa = csr_read(hart, csr::MISA).unwrap();
    assert_eq!(misa >> 62, 2, "MXL = 64-bit");
    for letter in ['a', 'c', 'd', 'f', 'i', 'm', 's', 'u'] {
        let bit = letter as u32 - 'a' as u32;
        assert_ne!(misa & (1 << bit), 0, "extension {letter} advertised");
    }

    // Writing the RV32 MXL pattern narrows the hart.
    assert!(csr_write(hart, csr::MISA, 1 << 30));
    assert!(!hart.rv64);
    assert_eq!(csr_read(hart, csr::MISA).unwrap() >> 30 & 3, 1);

    // And back up, since the machine is RV64-capable.
    assert!(csr_write(hart, csr::MISA, 2 << 30));
    assert!(hart.rv64);
}

#[test]
fn satp_validates_the_translation_mode() {
    let (mut machine, _) = machine(true);
    let hart = &mut machine.harts[0];

    // Sv39 sticks.
    assert!(csr_write(hart, csr::SATP, 8 << 60 | 0x80000));
    assert_eq!(csr_read(hart, csr::SATP).unwrap() >> 60, 8);

    // A reserved mode falls back to bare; the root PPN is retained.
    assert!(csr_write(hart, csr::SATP, 5 << 60 | 0x80000));
    assert_eq!(csr_read(hart, csr::SATP).unwrap() >> 60, 0);

    // TVM traps supervisor satp accesses.
    assert!(csr_write(hart, csr::MSTATUS, 1 << 20));
    hart.mode = Mode::Supervisor;
    assert!(!csr_write(hart, csr::SATP, 0));
}

#[test]
fn counters_read_zero_and_pmp_is_stubbed() {
    let (mut machine, _) = machine(true);
    let hart = &mut machine.harts[0];

    assert!(csr_write(hart, csr::MCYCLE, 1234));
    assert_eq!(csr_read(hart, csr::MCYCLE).unwrap(), 0);
    assert_eq!(csr_read(hart, csr::MINSTRET).unwrap(), 0);
    assert_eq!(csr_read(hart, csr::MHPMCOUNTER3).unwrap(), 0);
    assert_eq!(csr_read(hart, csr::PMPCFG0).unwrap(), 0);
    assert_eq!(csr_read(hart, csr::PMPADDR0).unwrap(), 0);
    assert!(csr_write(hart, csr::PMPADDR0, u64::MAX));
    assert_eq!(csr_read(hart, csr::PMPADDR0).unwrap(), 0);
}

#[test]
fn time_is_gated_by_counteren() {
    let (mut machine, _) = machine(true);
    let hart = &mut machine.harts[0];

    let t0 = csr_read(hart, csr::TIME).unwrap();
    assert!(csr_read(hart, csr::TIME).unwrap() >= t0);

    hart.mode = Mode::Supervisor;
    assert!(csr_read(hart, csr::TIME).is_none(), "mcounteren.TM clear");

    hart.mode = Mode::Machine;
    assert!(csr_write(hart, csr::MCOUNTEREN, 0x2));
    hart.mode = Mode::Supervisor;
    assert!(csr_read(hart, csr::TIME).is_some());

    hart.mode = Mode::User;
    assert!(csr_read(hart, csr::TIME).is_none(), "scounteren.TM clear");
}

#[test]
fn seed_needs_enabling_below_machine_mode() {
    let (mut machine, _) = machine(true);
    let hart = &mut machine.harts[0];

    let seed = csr_read(hart, csr::SEED).unwrap();
    assert!(seed <= 0xffff, "16 bits of entropy");
    let mut changed = false;
    for _ in 0..64 {
        if csr_read(hart, csr::SEED).unwrap() != seed {
            changed = true;
            break;
        }
    }
    assert!(changed, "seed returns fresh bits");

    hart.mode = Mode::Supervisor;
    assert!(csr_read(hart, csr::SEED).is_none());

    hart.mode = Mode::Machine;
    assert!(csr_write(hart, csr::MSECCFG, 1 << 9));
    hart.mode = Mode::Supervisor;
    assert!(csr_read(hart, csr::SEED).is_some());
}

#[test]
fn stimecmp_is_gated_by_sstc_and_raises_the_timer_line() {
    let (mut machine, _) = machine(true);
    let hart = &mut machine.harts[0];

    assert!(
        !csr_write(hart, csr::STIMECMP, 0),
        "Sstc disabled without menvcfg.STCE"
    );
    assert!(csr_write(hart, csr::MENVCFG, 1 << 63));

    // A compare in the past asserts STIP immediately.
    assert!(csr_write(hart, csr::STIMECMP, 0));
    assert_ne!(hart.signal().raised() & IP_STIP, 0);

    // Pushing it to the far future clears the line again.
    assert!(csr_write(hart, csr::STIMECMP, u64::MAX));
    assert_eq!(hart.signal().raised() & IP_STIP, 0);

    // The raised line is visible through sip reads.
    assert!(csr_write(hart, csr::STIMECMP, 0));
    let sip = csr_read(hart, csr::SIP).unwrap();
    assert_ne!(sip & IP_STIP, 0);
}

#[test]
fn fpu_csrs_are_gated_by_fs() {
    let (mut machine, _) = machine(true);
    let hart = &mut machine.harts[0];

    assert!(csr_read(hart, csr::FCSR).is_none(), "FS off");
    assert!(csr_write(hart, csr::MSTATUS, 1 << 13));
    assert!(csr_read(hart, csr::FCSR).is_some());

    // frm round-trips through fcsr.
    assert!(csr_write(hart, csr::FRM, 0b010));
    assert_eq!(csr_read(hart, csr::FRM).unwrap(), 0b010);
    assert_eq!(csr_read(hart, csr::FCSR).unwrap() >> 5 & 7, 0b010);
    assert!(csr_write(hart, csr::FRM, 0));
}

#[test]
fn rv32_results_are_zero_extended() {
    let (mut machine, _) = machine(false);
    let hart = &mut machine.harts[0];

    assert!(csr_write(hart, csr::MSCRATCH, u64::MAX));
    let value = csr_read(hart, csr::MSCRATCH).unwrap();
    assert_eq!(value, 0xffff_ffff, "upper half zeroed in the result");
}

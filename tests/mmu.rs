
use helper::*;
use rivet::csr::{self, CsrOp};
use rivet::hart::{Hart, Mode};
use rivet::machine::Machine;
use rivet::mmu::Access;
use rivet::trap::Exception;

// Page table flag bits.
const V: u64 = 1 << 0;
const R: u64 = 1 << 1;
const W: u64 = 1 << 2;
const X: u64 = 1 << 3;
const U: u64 = 1 << 4;
const A: u64 = 1 << 6;
const D: u64 = 1 << 7;

// Physical layout of the test page tables and data pages.
const ROOT: u64 = DRAM_BASE + 0x10000;
const L1: u64 = DRAM_BASE + 0x11000;
const L0: u64 = DRAM_BASE + 0x12000;
/// Virtual base mapped by ROOT[1] -> L1[0] -> L0[..].
const VBASE: u64 = 0x4000_0000;

fn pte(pa: u64, flags: u64) -> u64 {
    (pa >> 12) << 10 | flags
}

/// Build a three-level Sv39 page table over the fixed layout above and
/// switch hart 0 into supervisor mode with translation on.
fn sv39_machine() -> Machine {
    let (mut machine, _) = machine(true);
    let mem = machine.mem().clone();
    mem.write_int(ROOT + 8, pte(L1, V), 8);
    mem.write_int(L1, pte(L0, V), 8);
    // VBASE + 0x0000: plain RWX page.
    mem.write_int(L0, pte(DRAM_BASE + 0x3000, V | R | W | X | A | D), 8);
    // VBASE + 0x1000: no execute permission.
    mem.write_int(L0 + 8, pte(DRAM_BASE + 0x4000, V | R | W | A | D), 8);
    // VBASE + 0x2000: not mapped.
    // VBASE + 0x3000: user page.
    mem.write_int(L0 + 24, pte(DRAM_BASE + 0x5000, V | R | W | U | A | D), 8);
    // VBASE + 0x4000: execute-only page.
    mem.write_int(L0 + 32, pte(DRAM_BASE + 0x6000, V | X | A), 8);
    // VBASE + 0x5000: accessed/dirty bits still clear.
    mem.write_int(L0 + 40, pte(DRAM_BASE + 0x7000, V | R | W), 8);
    // L1[1]: a 2 MiB superpage onto the start of RAM.
    mem.write_int(L1 + 8, pte(DRAM_BASE, V | R | W | X | A | D), 8);
    // L1[2]: a misaligned superpage (low PPN bits set).
    mem.write_int(L1 + 16, pte(DRAM_BASE + 0x1000, V | R | A | D), 8);

    let hart = &mut machine.harts[0];
    let mut satp = 8 << 60 | ROOT >> 12;
    assert!(hart.csr_op(csr::SATP, &mut satp, CsrOp::Swap));
    hart.mode = Mode::Supervisor;
    machine
}

fn set_sstatus_bit(hart: &mut Hart, bit: u32) {
    let mut value = 1u64 << bit;
    assert!(hart.csr_op(csr::SSTATUS, &mut value, CsrOp::SetBits));
}

#[test]
fn walk_translates_a_mapped_page() {
    let mut machine = sv39_machine();
    let hart = &mut machine.harts[0];
    assert_eq!(
        hart.translate(VBASE + 0x123, Access::Load).unwrap(),
        DRAM_BASE + 0x3123
    );
    assert_eq!(
        hart.translate(VBASE + 0xfff, Access::Store).unwrap(),
        DRAM_BASE + 0x3fff
    );
    // Loads and stores through the mapping reach the physical page.
    hart.mem_write(VBASE + 0x10, 0xabcd, 4).unwrap();
    assert_eq!(hart.mem_read(VBASE + 0x10, 4).unwrap(), 0xabcd);
    assert_eq!(machine.mem().read_int(DRAM_BASE + 0x3010, 4), Some(0xabcd));
}

#[test]
fn unmapped_and_nonexecutable_pages_fault() {
    let mut machine = sv39_machine();
    let hart = &mut machine.harts[0];
    assert_eq!(
        hart.translate(VBASE + 0x2000, Access::Load),
        Err(Exception::LoadPageFault(VBASE + 0x2000))
    );
    assert_eq!(
        hart.translate(VBASE + 0x1000, Access::Instruction),
        Err(Exception::InstructionPageFault(VBASE + 0x1000))
    );
    // The readable mapping of the same page still works.
    assert!(hart.translate(VBASE + 0x1000, Access::Load).is_ok());
}

/// Fetching from a page without X delivers an instruction page fault with
/// the faulting virtual address in mtval.
#[test]
fn instruction_page_fault_reports_the_virtual_address() {
    let mut machine = sv39_machine();
    let hart = &mut machine.harts[0];
    hart.pc = VBASE + 0x1000;
    hart.step();
    assert_eq!(hart.csr.cause[3], 12, "instruction page fault");
    assert_eq!(hart.csr.tval[3], VBASE + 0x1000);
    assert_eq!(hart.csr.epc[3], VBASE + 0x1000);
    assert_eq!(hart.mode, Mode::Machine);
}

#[test]
fn sum_gates_user_pages_from_supervisor() {
    let mut machine = sv39_machine();
    let hart = &mut machine.harts[0];
    assert_eq!(
        hart.translate(VBASE + 0x3000, Access::Load),
        Err(Exception::LoadPageFault(VBASE + 0x3000))
    );
    set_sstatus_bit(hart, 18); // SUM
    assert!(hart.translate(VBASE + 0x3000, Access::Load).is_ok());
    // Supervisor never executes user pages, SUM or not.
    assert_eq!(
        hart.translate(VBASE + 0x3000, Access::Instruction),
        Err(Exception::InstructionPageFault(VBASE + 0x3000))
    );
}

#[test]
fn mxr_makes_executable_pages_readable() {
    let mut machine = sv39_machine();
    let hart = &mut machine.harts[0];
    assert_eq!(
        hart.translate(VBASE + 0x4000, Access::Load),
        Err(Exception::LoadPageFault(VBASE + 0x4000))
    );
    set_sstatus_bit(hart, 19); // MXR
    assert!(hart.translate(VBASE + 0x4000, Access::Load).is_ok());
    assert!(hart.translate(VBASE + 0x4000, Access::Instruction).is_ok());
}

#[test]
fn walker_sets_accessed_and_dirty_bits() {
    let mut machine = sv39_machine();
    let mem = machine.mem().clone();
    let hart = &mut machine.harts[0];

    assert_eq!(mem.read_int(L0 + 40, 8).unwrap() & (A | D), 0);
    hart.translate(VBASE + 0x5000, Access::Load).unwrap();
    assert_eq!(mem.read_int(L0 + 40, 8).unwrap() & (A | D), A);
    hart.translate(VBASE + 0x5000, Access::Store).unwrap();
    assert_eq!(mem.read_int(L0 + 40, 8).unwrap() & (A | D), A | D);
}

#[test]
fn superpages_translate_and_must_be_aligned() {
    let mut machine = sv39_machine();
    let hart = &mut machine.harts[0];
    // VBASE + 2 MiB lands in the L1[1] superpage: the low 21 bits come
    // from the virtual address.
    assert_eq!(
        hart.translate(VBASE + 0x20_0000 + 0x3456, Access::Load).unwrap(),
        DRAM_BASE + 0x3456
    );
    // L1[2] has low PPN bits set: a misaligned superpage.
    assert_eq!(
        hart.translate(VBASE + 0x40_0000, Access::Load),
        Err(Exception::LoadPageFault(VBASE + 0x40_0000))
    );
}

#[test]
fn non_canonical_addresses_fault() {
    let mut machine = sv39_machine();
    let hart = &mut machine.harts[0];
    assert_eq!(
        hart.translate(1 << 46, Access::Load),
        Err(Exception::LoadPageFault(1 << 46))
    );
    // The sign-extended upper half is canonical (and here, unmapped).
    assert_eq!(
        hart.translate(u64::MAX << 12, Access::Load),
        Err(Exception::LoadPageFault(u64::MAX << 12))
    );
}

#[test]
fn tlb_serves_hits_until_satp_is_rewritten() {
    let mut machine = sv39_machine();
    let mem = machine.mem().clone();
    let hart = &mut machine.harts[0];

    assert_eq!(
        hart.translate(VBASE, Access::Load).unwrap(),
        DRAM_BASE + 0x3000
    );
    // Repoint the leaf. The TLB still holds the old translation.
    mem.write_int(L0, pte(DRAM_BASE + 0x8000, V | R | W | X | A | D), 8);
    assert_eq!(
        hart.translate(VBASE, Access::Load).unwrap(),
        DRAM_BASE + 0x3000
    );
    // Any satp write invalidates every cached translation.
    let mut satp = 8 << 60 | ROOT >> 12;
    hart.mode = Mode::Machine;
    assert!(hart.csr_op(csr::SATP, &mut satp, CsrOp::Swap));
    hart.mode = Mode::Supervisor;
    assert_eq!(
        hart.translate(VBASE, Access::Load).unwrap(),
        DRAM_BASE + 0x8000
    );
}

#[test]
fn sfence_vma_flushes_the_tlb() {
    let mut machine = sv39_machine();
    let mem = machine.mem().clone();
    let hart = &mut machine.harts[0];

    assert_eq!(
        hart.translate(VBASE, Access::Load).unwrap(),
        DRAM_BASE + 0x3000
    );
    mem.write_int(L0, pte(DRAM_BASE + 0x8000, V | R | W | X | A | D), 8);
    // sfence.vma x0, x0
    hart.execute(0x1200_0073).unwrap();
    assert_eq!(
        hart.translate(VBASE, Access::Load).unwrap(),
        DRAM_BASE + 0x8000
    );
}

#[test]
fn machine_mode_bypasses_translation() {
    let mut machine = sv39_machine();
    let hart = &mut machine.harts[0];
    hart.mode = Mode::Machine;
    assert_eq!(
        hart.translate(DRAM_BASE + 0x42, Access::Load).unwrap(),
        DRAM_BASE + 0x42
    );
}

#[test]
fn mprv_uses_the_previous_privilege_for_data() {
    let mut machine = sv39_machine();
    let hart = &mut machine.harts[0];
    hart.mode = Mode::Machine;
    // MPRV with MPP=S: data accesses translate as supervisor.
    let mut value = (1 << 17) | (1 << 11);
    assert!(hart.csr_op(csr::MSTATUS, &mut value, CsrOp::SetBits));
    assert_eq!(
        hart.translate(VBASE + 0x10, Access::Load).unwrap(),
        DRAM_BASE + 0x3010
    );
    // Instruction fetches keep using the real privilege (M: bare).
    assert_eq!(
        hart.translate(VBASE + 0x10, Access::Instruction).unwrap(),
        VBASE + 0x10
    );
}


use std::time::Duration;

use helper::asm::*;
use helper::*;
use rivet::csr::{self, CsrOp};
use rivet::hart::Mode;
use rivet::trap::{IP_MSIP, IP_SEIP};

const INT_BIT: u64 = 1 << 63;

fn csr_write(hart: &mut rivet::hart::Hart, addr: u16, value: u64) {
    let mut value = value;
    assert!(hart.csr_op(addr, &mut value, CsrOp::Swap));
}

#[test]
fn software_interrupt_through_the_clint() {
    let (mut machine, _) = machine(true);
    // Writing our own msip register raises the machine software line.
    machine.bus().write(0x0200_0000, 1, 4);
    assert_ne!(machine.harts[0].signal().raised() & IP_MSIP, 0);

    let hart = &mut machine.harts[0];
    csr_write(hart, csr::MIE, IP_MSIP);
    csr_write(hart, csr::MSTATUS, 1 << 3); // MIE
    hart.step();
    assert_eq!(hart.csr.cause[3], INT_BIT | 3, "machine software interrupt");

    // Clearing msip deasserts the line.
    machine.bus().write(0x0200_0000, 0, 4);
    assert_eq!(machine.harts[0].signal().raised() & IP_MSIP, 0);
}

#[test]
fn interrupts_wait_for_the_global_enable() {
    let (mut machine, _) = machine(true);
    load(&machine, &words(&[addi(1, 1, 1), jal(0, -4)]));
    machine.bus().write(0x0200_0000, 1, 4);

    let hart = &mut machine.harts[0];
    csr_write(hart, csr::MIE, IP_MSIP);
    // mstatus.MIE is clear: the interrupt stays pending.
    for _ in 0..8 {
        hart.step();
    }
    assert_eq!(hart.csr.cause[3], 0);
    assert!(hart.check_pending_interrupt().is_none());

    csr_write(hart, csr::MSTATUS, 1 << 3);
    hart.step();
    assert_eq!(hart.csr.cause[3], INT_BIT | 3);
}

#[test]
fn external_interrupt_line() {
    let (mut machine, _) = machine(true);
    machine.raise_external(0, true);
    assert_ne!(machine.harts[0].signal().raised() & IP_SEIP, 0);

    let hart = &mut machine.harts[0];
    csr_write(hart, csr::MIE, IP_SEIP);
    csr_write(hart, csr::MSTATUS, 1 << 3);
    hart.step();
    assert_eq!(hart.csr.cause[3], INT_BIT | 9, "supervisor external interrupt");

    machine.raise_external(0, false);
    assert_eq!(machine.harts[0].signal().raised() & IP_SEIP, 0);
}

#[test]
fn delegated_interrupt_lands_in_supervisor_mode() {
    let (mut machine, _) = machine(true);
    let hart = &mut machine.harts[0];
    csr_write(hart, csr::MIDELEG, IP_SEIP);
    csr_write(hart, csr::MIE, IP_SEIP);
    csr_write(hart, csr::STVEC, DRAM_BASE + 0x400);
    // Drop to S-mode with SIE set.
    csr_write(hart, csr::MEPC, DRAM_BASE);
    let mut status = (1 << 11) | (1 << 1); // MPP=S, SIE
    assert!(hart.csr_op(csr::MSTATUS, &mut status, CsrOp::SetBits));
    hart.execute(mret()).unwrap();
    assert_eq!(hart.mode, Mode::Supervisor);

    machine.raise_external(0, true);
    let hart = &mut machine.harts[0];
    hart.step();
    assert_eq!(hart.mode, Mode::Supervisor);
    assert_eq!(hart.csr.cause[1], INT_BIT | 9);
    assert_eq!(hart.pc, DRAM_BASE + 0x400);
}

#[test]
fn vectored_trap_base_offsets_by_cause() {
    let (mut machine, _) = machine(true);
    machine.bus().write(0x0200_0000, 1, 4); // msip
    let hart = &mut machine.harts[0];
    csr_write(hart, csr::MTVEC, (DRAM_BASE + 0x100) | 1);
    csr_write(hart, csr::MIE, IP_MSIP);
    csr_write(hart, csr::MSTATUS, 1 << 3);
    hart.step();
    assert_eq!(hart.csr.cause[3], INT_BIT | 3);
    assert_eq!(hart.pc, DRAM_BASE + 0x100 + 4 * 3, "vectored entry");
}

/// Scenario: a supervisor-timer deadline programmed through stimecmp
/// (Sstc) wakes a hart out of WFI once the machine timer crosses it.
#[test]
fn sstc_timer_interrupt_wakes_wfi() {
    let (mut machine, _) = machine(true);
    let hart = &mut machine.harts[0];
    csr_write(hart, csr::MENVCFG, 1 << 63); // STCE
    csr_write(hart, csr::MIE, 1 << 5); // STIE
    csr_write(hart, csr::MSTATUS, 1 << 3);

    let deadline = machine.timer().now() + 10_000; // one millisecond out
    let hart = &mut machine.harts[0];
    csr_write(hart, csr::STIMECMP, deadline);
    hart.execute(wfi()).unwrap();
    assert!(hart.check_pending_interrupt().is_none(), "not due yet");

    // Let the deadline pass, then run one event-loop tick as the machine
    // event loop would.
    while !machine.timer().pending(deadline) {
        std::thread::sleep(Duration::from_millis(1));
    }
    machine.poll();

    let hart = &mut machine.harts[0];
    hart.step();
    assert_eq!(hart.csr.cause[3], INT_BIT | 5, "supervisor timer interrupt");
}

#[test]
fn mtimecmp_drives_the_machine_timer_line() {
    let (mut machine, _) = machine(true);
    let mtimecmp = 0x0200_4000u64;
    // A deadline already in the past asserts MTIP at the next poll.
    machine.bus().write(mtimecmp, 1, 8);
    machine.poll();
    let hart = &mut machine.harts[0];
    csr_write(hart, csr::MIE, 1 << 7);
    csr_write(hart, csr::MSTATUS, 1 << 3);
    hart.step();
    assert_eq!(hart.csr.cause[3], INT_BIT | 7, "machine timer interrupt");

    // Pushing the deadline out clears the line.
    machine.bus().write(mtimecmp, u64::MAX, 8);
    machine.poll();
    assert!(machine.harts[0].check_pending_interrupt().is_none());
}

#[test]
fn plic_routes_and_claims_device_interrupts() {
    let (mut machine, _) = machine(true);
    let plic_base = 0x0c00_0000u64;
    // Priority for source 10, enable it for hart 0's S context.
    machine.bus().write(plic_base + 10 * 4, 1, 4);
    machine.bus().write(plic_base + 0x2080, 1 << 10, 4);
    machine.plic().raise(10);
    assert_ne!(machine.harts[0].signal().raised() & IP_SEIP, 0);

    // Claiming returns the source and drops the line.
    let claimed = machine.bus().read(plic_base + 0x20_1004, 4);
    assert_eq!(claimed, 10);
    assert_eq!(machine.harts[0].signal().raised() & IP_SEIP, 0);
    // Completion.
    machine.bus().write(plic_base + 0x20_1004, claimed, 4);
}

/// End-to-end: a threaded machine runs a guest that sleeps in WFI until
/// the Sstc deadline fires, then reports through the UART.
#[test]
fn threaded_machine_wakes_from_wfi() {
    let (mut machine, output) = machine(true);
    let program = words(&[
        // menvcfg.STCE = 1
        addi(1, 0, 1),
        slli(1, 1, 63),
        csrrs(0, csr::MENVCFG, 1),
        // mie.STIE, mstatus.MIE
        addi(2, 0, 1 << 5),
        csrrs(0, csr::MIE, 2),
        csrrwi(0, csr::MTVEC, 0), // handler at address 0 never runs: MIE stays off
        // stimecmp = time + 20000 (2 ms)
        csrrs(3, csr::TIME, 0),
        lui(4, 5), // 0x5000 = 20480
        add(3, 3, 4),
        csrrw(0, csr::STIMECMP, 3),
        wfi(),
        // Report 'T' on the UART after waking.
        lui(5, 0x10000),
        addi(6, 0, 'T' as i32),
        sb(5, 6, 0),
        jal(0, 0), // spin until shutdown
    ]);
    load(&machine, &program);

    let power = machine.power();
    let done = output.clone();
    let watcher = std::thread::spawn(move || {
        for _ in 0..2000 {
            if !done.lock().unwrap().is_empty() {
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        power.shutdown();
    });
    machine.run();
    watcher.join().unwrap();

    assert_eq!(output.lock().unwrap().as_slice(), b"T");
}

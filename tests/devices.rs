
use helper::*;
use rivet::blk::MemBackend;
use rivet::trap::IP_SEIP;

const UART_BASE: u64 = 0x1000_0000;
const ATA_BASE: u64 = 0x4000_0000;
const SECTOR: usize = 512;

/// Scenario: a store of ASCII "A" to the UART transmit register shows up
/// on the host console sink, and the line status register reports the
/// transmitter as empty.
#[test]
fn uart_transmit_and_line_status() {
    let (mut machine, output) = machine(true);
    let hart = &mut machine.harts[0];
    hart.mem_write(UART_BASE, 'A' as u64, 1).unwrap();
    assert_eq!(output.lock().unwrap().as_slice(), b"A");

    let lsr = hart.mem_read(UART_BASE + 5, 1).unwrap();
    assert_ne!(lsr & 0x20, 0, "THRE is asserted");
}

#[test]
fn uart_receive_path() {
    let (mut machine, _) = machine(true);
    machine.uart_input().send(b'x').unwrap();
    machine.poll();

    let hart = &mut machine.harts[0];
    assert_ne!(
        hart.mem_read(UART_BASE + 5, 1).unwrap() & 0x01,
        0,
        "data ready"
    );
    assert_eq!(hart.mem_read(UART_BASE, 1).unwrap(), b'x' as u64);
    assert_eq!(
        hart.mem_read(UART_BASE + 5, 1).unwrap() & 0x01,
        0,
        "FIFO drained"
    );
}

#[test]
fn uart_interrupts_through_the_plic() {
    let (mut machine, _) = machine(true);
    let plic_base = 0x0c00_0000u64;
    machine.bus().write(plic_base + 10 * 4, 1, 4); // priority
    machine.bus().write(plic_base + 0x2080, 1 << 10, 4); // enable
    machine.bus().write(UART_BASE + 1, 0x01, 1); // IER: rx data

    machine.uart_input().send(b'!').unwrap();
    machine.poll();
    assert_ne!(machine.harts[0].signal().raised() & IP_SEIP, 0);

    // Draining the FIFO drops the interrupt.
    machine.harts[0].mem_read(UART_BASE, 1).unwrap();
    assert_eq!(machine.harts[0].signal().raised() & IP_SEIP, 0);
}

/// Unmapped MMIO never faults the guest: reads return zero and writes
/// are discarded.
#[test]
fn unmapped_mmio_is_benign() {
    let (mut machine, _) = machine(true);
    let hart = &mut machine.harts[0];
    assert_eq!(hart.mem_read(0x5000_0000, 4).unwrap(), 0);
    hart.mem_write(0x5000_0000, 0xdead_beef, 4).unwrap();
}

fn disk_machine() -> rivet::machine::Machine {
    let (machine, _) = machine(true);
    // Four sectors, each filled with its own index.
    let mut image = vec![0u8; 4 * SECTOR];
    for (sector, chunk) in image.chunks_mut(SECTOR).enumerate() {
        chunk.fill(sector as u8);
    }
    machine.attach_drive(Box::new(MemBackend::new(image)));
    machine
}

fn ata_command(machine: &rivet::machine::Machine, count: u64, lba: u64, cmd: u64) {
    let bus = machine.bus();
    bus.write(ATA_BASE + 2 * 4, count, 1);
    bus.write(ATA_BASE + 3 * 4, lba & 0xff, 1);
    bus.write(ATA_BASE + 4 * 4, lba >> 8 & 0xff, 1);
    bus.write(ATA_BASE + 5 * 4, lba >> 16 & 0xff, 1);
    bus.write(ATA_BASE + 6 * 4, 0xe0 | (lba >> 24 & 0xf), 1);
    bus.write(ATA_BASE + 7 * 4, cmd, 1);
}

fn ata_read_sector(machine: &rivet::machine::Machine) -> Vec<u8> {
    let bus = machine.bus();
    let mut data = Vec::with_capacity(SECTOR);
    for _ in 0..SECTOR / 4 {
        data.extend_from_slice(&(bus.read(ATA_BASE, 4) as u32).to_le_bytes());
    }
    data
}

#[test]
fn ata_identify_reports_the_geometry() {
    let machine = disk_machine();
    ata_command(&machine, 0, 0, 0xec);
    let status = machine.bus().read(ATA_BASE + 7 * 4, 1);
    assert_ne!(status & 0x08, 0, "DRQ after IDENTIFY");
    assert_ne!(status & 0x40, 0, "DRDY");

    let id = ata_read_sector(&machine);
    let lba_sectors = u32::from_le_bytes([id[120], id[121], id[122], id[123]]);
    assert_eq!(lba_sectors, 4);
    // The model string is ASCII with swapped byte pairs.
    assert_eq!(&id[54..58], b"IREV");

    let status = machine.bus().read(ATA_BASE + 7 * 4, 1);
    assert_eq!(status & 0x08, 0, "DRQ clears once drained");
}

#[test]
fn ata_reads_sectors() {
    let machine = disk_machine();
    ata_command(&machine, 2, 1, 0x20);
    let first = ata_read_sector(&machine);
    assert!(first.iter().all(|&b| b == 1));
    let second = ata_read_sector(&machine);
    assert!(second.iter().all(|&b| b == 2));
    assert_eq!(machine.bus().read(ATA_BASE + 7 * 4, 1) & 0x08, 0);
}

#[test]
fn ata_writes_and_reads_back() {
    let machine = disk_machine();
    ata_command(&machine, 1, 3, 0x30);
    assert_ne!(machine.bus().read(ATA_BASE + 7 * 4, 1) & 0x08, 0);
    for _ in 0..SECTOR / 4 {
        machine.bus().write(ATA_BASE, 0xa5a5_a5a5, 4);
    }
    assert_eq!(machine.bus().read(ATA_BASE + 7 * 4, 1) & 0x08, 0);

    ata_command(&machine, 1, 3, 0x20);
    let sector = ata_read_sector(&machine);
    assert!(sector.iter().all(|&b| b == 0xa5));
}

#[test]
fn ata_rejects_out_of_range_reads() {
    let machine = disk_machine();
    ata_command(&machine, 1, 100, 0x20);
    let status = machine.bus().read(ATA_BASE + 7 * 4, 1);
    assert_ne!(status & 0x01, 0, "ERR for an out-of-range LBA");
}

//! The ata module contains a PIO-mode ATA drive, the primary disk of the
//! default machine. The taskfile registers live word-spaced in the data
//! window; the control window follows one page later. Drivers poll the
//! status register, so no interrupt line is wired up.

use crate::blk::BlockBackend;
use crate::bus::Mmio;

/// Size of the combined data+control register window.
pub const ATA_SIZE: u64 = 0x2000;
/// Bytes per sector.
pub const SECTOR_SIZE: usize = 512;

// Taskfile register indices (offset / 4) in the data window.
const REG_DATA: u64 = 0;
const REG_ERROR: u64 = 1;
const REG_SECT_COUNT: u64 = 2;
const REG_LBA0: u64 = 3;
const REG_LBA1: u64 = 4;
const REG_LBA2: u64 = 5;
const REG_DRIVE: u64 = 6;
const REG_STATUS: u64 = 7;

// Status bits.
const STATUS_ERR: u8 = 1 << 0;
const STATUS_DRQ: u8 = 1 << 3;
const STATUS_DSC: u8 = 1 << 4;
const STATUS_DRDY: u8 = 1 << 6;

// Error bits.
const ERROR_ABRT: u8 = 1 << 2;
const ERROR_UNC: u8 = 1 << 6;

const CMD_READ_SECTORS: u8 = 0x20;
const CMD_WRITE_SECTORS: u8 = 0x30;
const CMD_IDENTIFY: u8 = 0xec;
const CMD_FLUSH_CACHE: u8 = 0xe7;

#[derive(Debug, PartialEq)]
enum Transfer {
    Idle,
    /// Draining the sector buffer to the host (reads, identify).
    ToHost,
    /// Filling the sector buffer from the host (writes).
    FromHost,
}

/// A PIO ATA drive on top of a [`BlockBackend`].
pub struct Ata {
    disk: Box<dyn BlockBackend>,
    buf: [u8; SECTOR_SIZE],
    buf_pos: usize,
    transfer: Transfer,
    /// Sectors left in the current command, current LBA.
    remaining: u32,
    lba: u64,
    error: u8,
    sect_count: u8,
    lba_regs: [u8; 3],
    drive: u8,
}

impl Ata {
    pub fn new(disk: Box<dyn BlockBackend>) -> Self {
        log::info!(
            "ata: {} of {} sectors attached",
            disk.name(),
            disk.size() / SECTOR_SIZE as u64
        );
        Self {
            disk,
            buf: [0; SECTOR_SIZE],
            buf_pos: 0,
            transfer: Transfer::Idle,
            remaining: 0,
            lba: 0,
            error: 0,
            sect_count: 0,
            lba_regs: [0; 3],
            drive: 0,
        }
    }

    fn sectors(&self) -> u64 {
        self.disk.size() / SECTOR_SIZE as u64
    }

    fn status(&self) -> u8 {
        let mut status = STATUS_DRDY | STATUS_DSC;
        if self.transfer != Transfer::Idle {
            status |= STATUS_DRQ;
        }
        if self.error != 0 {
            status |= STATUS_ERR;
        }
        status
    }

    /// The 28-bit LBA from the taskfile.
    fn taskfile_lba(&self) -> u64 {
        self.lba_regs[0] as u64
            | (self.lba_regs[1] as u64) << 8
            | (self.lba_regs[2] as u64) << 16
            | ((self.drive & 0xf) as u64) << 24
    }

    fn abort(&mut self) {
        self.error = ERROR_ABRT;
        self.transfer = Transfer::Idle;
        self.remaining = 0;
    }

    /// The 512-byte IDENTIFY DEVICE block.
    fn identify(&self) -> [u8; SECTOR_SIZE] {
        let mut id = [0u8; SECTOR_SIZE];
        let mut word = |index: usize, value: u16| {
            id[index * 2] = value as u8;
            id[index * 2 + 1] = (value >> 8) as u8;
        };
        word(0, 0x0040); // fixed drive
        word(1, 16383); // legacy cylinders
        word(3, 16); // legacy heads
        word(6, 63); // legacy sectors per track
        word(47, 0x8001); // one sector per DRQ block
        word(49, 1 << 9); // LBA supported
        let lba = self.sectors().min(0x0fff_ffff) as u32;
        word(60, lba as u16);
        word(61, (lba >> 16) as u16);
        // Model string, ASCII with each byte pair swapped.
        let model = b"RIVET ATA DRIVE                         ";
        for (i, pair) in model.chunks(2).enumerate() {
            word(27 + i, (pair[0] as u16) << 8 | pair[1] as u16);
        }
        id
    }

    fn load_sector(&mut self) {
        if self.lba >= self.sectors() {
            self.error = ERROR_UNC;
            self.transfer = Transfer::Idle;
            return;
        }
        if self
            .disk
            .read(&mut self.buf, self.lba * SECTOR_SIZE as u64)
            != SECTOR_SIZE
        {
            self.error = ERROR_UNC;
            self.transfer = Transfer::Idle;
            return;
        }
        self.buf_pos = 0;
    }

    fn store_sector(&mut self) {
        if self.lba >= self.sectors()
            || self.disk.write(&self.buf, self.lba * SECTOR_SIZE as u64) != SECTOR_SIZE
        {
            self.error = ERROR_UNC;
            self.transfer = Transfer::Idle;
        }
    }

    fn command(&mut self, cmd: u8) {
        self.error = 0;
        match cmd {
            CMD_IDENTIFY => {
                self.buf = self.identify();
                self.buf_pos = 0;
                self.remaining = 1;
                self.transfer = Transfer::ToHost;
            }
            CMD_READ_SECTORS => {
                self.lba = self.taskfile_lba();
                self.remaining = if self.sect_count == 0 {
                    256
                } else {
                    self.sect_count as u32
                };
                self.transfer = Transfer::ToHost;
                self.load_sector();
            }
            CMD_WRITE_SECTORS => {
                self.lba = self.taskfile_lba();
                self.remaining = if self.sect_count == 0 {
                    256
                } else {
                    self.sect_count as u32
                };
                self.buf_pos = 0;
                self.transfer = Transfer::FromHost;
            }
            CMD_FLUSH_CACHE => {
                if !self.disk.sync() {
                    self.error = ERROR_UNC;
                }
            }
            _ => {
                log::debug!("ata: unknown command {:#04x}", cmd);
                self.abort();
            }
        }
    }

    /// Hand out the next bytes of the sector buffer.
    fn data_read(&mut self, size: u8) -> u64 {
        if self.transfer != Transfer::ToHost {
            return 0;
        }
        let size = (size as usize).min(SECTOR_SIZE - self.buf_pos);
        let mut value = [0u8; 8];
        value[..size].copy_from_slice(&self.buf[self.buf_pos..self.buf_pos + size]);
        self.buf_pos += size;
        if self.buf_pos >= SECTOR_SIZE {
            self.remaining -= 1;
            if self.remaining == 0 {
                self.transfer = Transfer::Idle;
            } else {
                self.lba += 1;
                self.load_sector();
            }
        }
        u64::from_le_bytes(value)
    }

    /// Accept the next bytes of a sector being written.
    fn data_write(&mut self, value: u64, size: u8) {
        if self.transfer != Transfer::FromHost {
            return;
        }
        let size = (size as usize).min(SECTOR_SIZE - self.buf_pos);
        self.buf[self.buf_pos..self.buf_pos + size].copy_from_slice(&value.to_le_bytes()[..size]);
        self.buf_pos += size;
        if self.buf_pos >= SECTOR_SIZE {
            self.store_sector();
            self.buf_pos = 0;
            self.remaining -= 1;
            if self.remaining == 0 {
                self.transfer = Transfer::Idle;
            } else {
                self.lba += 1;
            }
        }
    }
}

impl Mmio for Ata {
    fn name(&self) -> &'static str {
        "ata"
    }

    fn read(&mut self, offset: u64, size: u8) -> u64 {
        if offset >= 0x1000 {
            // Control window: alternate status.
            return self.status() as u64;
        }
        match offset / 4 {
            REG_DATA => self.data_read(size),
            REG_ERROR => self.error as u64,
            REG_SECT_COUNT => self.sect_count as u64,
            REG_LBA0 => self.lba_regs[0] as u64,
            REG_LBA1 => self.lba_regs[1] as u64,
            REG_LBA2 => self.lba_regs[2] as u64,
            REG_DRIVE => self.drive as u64,
            REG_STATUS => self.status() as u64,
            _ => 0,
        }
    }

    fn write(&mut self, offset: u64, value: u64, size: u8) {
        if offset >= 0x1000 {
            // Device control: reset/nIEN bits, nothing to model.
            return;
        }
        match offset / 4 {
            REG_DATA => self.data_write(value, size),
            REG_ERROR => {} // features: unused
            REG_SECT_COUNT => self.sect_count = value as u8,
            REG_LBA0 => self.lba_regs[0] = value as u8,
            REG_LBA1 => self.lba_regs[1] = value as u8,
            REG_LBA2 => self.lba_regs[2] = value as u8,
            REG_DRIVE => self.drive = value as u8,
            REG_STATUS => self.command(value as u8),
            _ => {}
        }
    }

    fn reset(&mut self) {
        self.transfer = Transfer::Idle;
        self.remaining = 0;
        self.error = 0;
        self.buf_pos = 0;
    }
}

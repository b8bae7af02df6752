//! The mmu module contains the software MMU: the Sv32/Sv39/Sv48/Sv57 page
//! walker, the per-hart translation lookaside buffer, and the translated
//! memory accessors used by the interpreter.

use std::sync::atomic::Ordering;

use bitflags::bitflags;

use crate::bits;
use crate::csr::{MSTATUS_MPRV, MSTATUS_MXR, MSTATUS_SUM};
use crate::hart::{Hart, Mode, BYTE, HALFWORD, WORD};
use crate::memory::PAGE_SIZE;
use crate::trap::Exception;

/// Access type used in the virtual address translation process. It decides
/// which page-fault exception is raised on failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// An instruction fetch; failures raise InstructionPageFault.
    Instruction,
    /// A data load; failures raise LoadPageFault.
    Load,
    /// A store or AMO; failures raise StoreAmoPageFault.
    Store,
}

/// The address-translation scheme selected by satp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MmuMode {
    Bare,
    Sv32,
    Sv39,
    Sv48,
    Sv57,
}

impl MmuMode {
    /// Decode the RV64 satp MODE field; invalid values fall back to bare.
    pub fn from_satp_rv64(mode: u64) -> Self {
        match mode {
            8 => MmuMode::Sv39,
            9 => MmuMode::Sv48,
            10 => MmuMode::Sv57,
            _ => MmuMode::Bare,
        }
    }

    /// Decode the RV32 satp MODE bit.
    pub fn from_satp_rv32(mode: u64) -> Self {
        if mode == 1 {
            MmuMode::Sv32
        } else {
            MmuMode::Bare
        }
    }

    /// The RV64 satp MODE encoding of this scheme.
    pub fn satp_mode_rv64(self) -> u64 {
        match self {
            MmuMode::Bare => 0,
            MmuMode::Sv39 => 8,
            MmuMode::Sv48 => 9,
            MmuMode::Sv57 => 10,
            // Sv32 cannot be represented in the RV64 layout.
            MmuMode::Sv32 => 0,
        }
    }

    /// The RV32 satp MODE bit of this scheme.
    pub fn satp_mode_rv32(self) -> u64 {
        match self {
            MmuMode::Sv32 => 1,
            _ => 0,
        }
    }
}

bitflags! {
    /// Page table entry flag bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PteFlags: u64 {
        const V = 1 << 0;
        const R = 1 << 1;
        const W = 1 << 2;
        const X = 1 << 3;
        const U = 1 << 4;
        const G = 1 << 5;
        const A = 1 << 6;
        const D = 1 << 7;
    }
}

/// Number of direct-mapped TLB entries; must stay a power of two.
pub const TLB_SIZE: usize = 256;

pub(crate) const PERM_R: u8 = 1;
pub(crate) const PERM_W: u8 = 2;
pub(crate) const PERM_X: u8 = 4;

/// One cached translation: the guest virtual page, the accesses it has
/// earned under the current satp/status/mode, the host pointer to the
/// backing RAM page, and the physical page base for dirty tracking.
#[derive(Clone, Copy)]
pub(crate) struct TlbEntry {
    tag: u64,
    perm: u8,
    host: *mut u8,
    ppage: u64,
}

impl TlbEntry {
    const INVALID: TlbEntry = TlbEntry {
        tag: u64::MAX,
        perm: 0,
        host: std::ptr::null_mut(),
        ppage: 0,
    };
}

/// The per-hart direct-mapped TLB, hashed by virtual page number.
pub(crate) struct Tlb {
    entries: Vec<TlbEntry>,
}

impl Tlb {
    pub(crate) fn new() -> Self {
        Self {
            entries: vec![TlbEntry::INVALID; TLB_SIZE],
        }
    }

    fn index(vaddr: u64) -> usize {
        ((vaddr >> 12) as usize) & (TLB_SIZE - 1)
    }

    /// Invalidate every entry. sfence.vma with ASID/VA operands also lands
    /// here: flushing everything is conservative but correct.
    pub(crate) fn flush(&mut self) {
        self.entries.fill(TlbEntry::INVALID);
    }

    fn lookup(&self, vaddr: u64, perm: u8) -> Option<&TlbEntry> {
        let entry = &self.entries[Self::index(vaddr)];
        (entry.tag == vaddr >> 12 && entry.perm & perm != 0).then_some(entry)
    }

    fn insert(&mut self, vaddr: u64, ppage: u64, host: *mut u8, perm: u8) {
        let entry = &mut self.entries[Self::index(vaddr)];
        if entry.tag == vaddr >> 12 && entry.ppage == ppage {
            entry.perm |= perm;
            entry.host = host;
        } else {
            *entry = TlbEntry {
                tag: vaddr >> 12,
                perm,
                host,
                ppage,
            };
        }
    }
}

fn page_fault(access: Access, vaddr: u64) -> Exception {
    match access {
        Access::Instruction => Exception::InstructionPageFault(vaddr),
        Access::Load => Exception::LoadPageFault(vaddr),
        Access::Store => Exception::StoreAmoPageFault(vaddr),
    }
}

fn access_fault(access: Access, vaddr: u64) -> Exception {
    match access {
        Access::Instruction => Exception::InstructionAccessFault(vaddr),
        Access::Load => Exception::LoadAccessFault(vaddr),
        Access::Store => Exception::StoreAmoAccessFault(vaddr),
    }
}

unsafe fn read_le(ptr: *const u8, size: u8) -> u64 {
    let mut buf = [0u8; 8];
    std::ptr::copy_nonoverlapping(ptr, buf.as_mut_ptr(), size as usize);
    u64::from_le_bytes(buf)
}

unsafe fn write_le(ptr: *mut u8, value: u64, size: u8) {
    std::ptr::copy_nonoverlapping(value.to_le_bytes().as_ptr(), ptr, size as usize);
}

impl Hart {
    /// Invalidate every cached translation of this hart.
    pub fn tlb_flush(&mut self) {
        self.tlb.flush();
    }

    /// The privilege the access is checked against: loads and stores honour
    /// mstatus.MPRV, instruction fetches never do.
    fn effective_mode(&self, access: Access) -> Mode {
        if access != Access::Instruction && self.csr.status & MSTATUS_MPRV != 0 {
            Mode::from_bits(bits::cut(self.csr.status, 11, 2))
        } else {
            self.mode
        }
    }

    /// Translate a virtual address to a physical address.
    ///
    /// Bare mode and machine-mode accesses pass through unchanged; all
    /// other accesses hit the TLB or take a full page walk.
    pub fn translate(&mut self, vaddr: u64, access: Access) -> Result<u64, Exception> {
        let vaddr = self.mask_xlen(vaddr);
        if self.mmu_mode == MmuMode::Bare || self.effective_mode(access) == Mode::Machine {
            return Ok(vaddr);
        }
        let perm = match access {
            Access::Instruction => PERM_X,
            Access::Load => PERM_R,
            Access::Store => PERM_W,
        };
        if let Some(entry) = self.tlb.lookup(vaddr, perm) {
            return Ok(entry.ppage | (vaddr & (PAGE_SIZE - 1)));
        }
        self.page_walk(vaddr, access)
    }

    /// Atomically load a page table entry out of guest RAM.
    fn read_pte(&self, paddr: u64, size: u8) -> Option<u64> {
        if size == 4 {
            Some(self.mem.atomic_u32(paddr)?.load(Ordering::Acquire) as u64)
        } else {
            Some(self.mem.atomic_u64(paddr)?.load(Ordering::Acquire))
        }
    }

    /// Atomically set the A/D bits of a page table entry. Racing updates
    /// from another hart merge instead of being lost.
    fn set_pte_bits(&mut self, paddr: u64, size: u8, set: u64) -> Option<()> {
        if size == 4 {
            self.mem
                .atomic_u32(paddr)?
                .fetch_or(set as u32, Ordering::AcqRel);
        } else {
            self.mem.atomic_u64(paddr)?.fetch_or(set, Ordering::AcqRel);
        }
        self.jit_dirty(paddr, size as u64);
        Some(())
    }

    /// The Sv32/Sv39/Sv48/Sv57 virtual address translation process, as
    /// defined by the privileged specification. On success the resulting
    /// leaf is installed in the TLB with the access it just earned.
    fn page_walk(&mut self, vaddr: u64, access: Access) -> Result<u64, Exception> {
        let mode = self.effective_mode(access);
        let (levels, vpn_bits, pte_size): (u32, u32, u8) = match self.mmu_mode {
            MmuMode::Bare => return Ok(vaddr),
            MmuMode::Sv32 => (2, 10, 4),
            MmuMode::Sv39 => (3, 9, 8),
            MmuMode::Sv48 => (4, 9, 8),
            MmuMode::Sv57 => (5, 9, 8),
        };

        // The 64-bit schemes require canonical addresses: every bit above
        // the virtual address width must equal the top in-range bit.
        if pte_size == 8 {
            let va_width = 12 + levels * vpn_bits;
            let rest = vaddr >> (va_width - 1);
            let canonical = rest == 0 || rest == bits::mask(64 - va_width + 1);
            if !canonical {
                return Err(page_fault(access, vaddr));
            }
        }

        let sum = self.csr.status & MSTATUS_SUM != 0;
        let mxr = self.csr.status & MSTATUS_MXR != 0;
        let mut table = self.root_page_table;
        let mut level = levels as i32 - 1;
        loop {
            let vpn = bits::cut(vaddr, 12 + vpn_bits * level as u32, vpn_bits);
            let pte_addr = table + vpn * pte_size as u64;
            let pte = self
                .read_pte(pte_addr, pte_size)
                .ok_or_else(|| access_fault(access, vaddr))?;
            let flags = PteFlags::from_bits_truncate(pte);

            if !flags.contains(PteFlags::V)
                || (!flags.contains(PteFlags::R) && flags.contains(PteFlags::W))
            {
                return Err(page_fault(access, vaddr));
            }

            if !flags.intersects(PteFlags::R | PteFlags::X) {
                // Pointer to the next level of the page table.
                level -= 1;
                if level < 0 {
                    return Err(page_fault(access, vaddr));
                }
                table = (pte >> 10) << 12;
                continue;
            }

            // A leaf PTE. Check the U bit against the effective privilege:
            // U pages are reachable from S only with SUM set and never for
            // execution; S pages are never reachable from U.
            if flags.contains(PteFlags::U) {
                if mode == Mode::Supervisor && (access == Access::Instruction || !sum) {
                    return Err(page_fault(access, vaddr));
                }
            } else if mode == Mode::User {
                return Err(page_fault(access, vaddr));
            }

            // R/W/X permission; MXR promotes executable pages to readable.
            let allowed = match access {
                Access::Instruction => flags.contains(PteFlags::X),
                Access::Load => {
                    flags.contains(PteFlags::R) || (mxr && flags.contains(PteFlags::X))
                }
                Access::Store => flags.contains(PteFlags::W),
            };
            if !allowed {
                return Err(page_fault(access, vaddr));
            }

            // A misaligned superpage.
            if level > 0 && bits::cut(pte, 10, vpn_bits * level as u32) != 0 {
                return Err(page_fault(access, vaddr));
            }

            // Update A (and D for stores) atomically in guest memory.
            let mut set = PteFlags::empty();
            if !flags.contains(PteFlags::A) {
                set |= PteFlags::A;
            }
            if access == Access::Store && !flags.contains(PteFlags::D) {
                set |= PteFlags::D;
            }
            if !set.is_empty()
                && self.set_pte_bits(pte_addr, pte_size, set.bits()).is_none()
            {
                return Err(access_fault(access, vaddr));
            }

            // Compose the physical address; for a superpage the low PPN
            // chunks come from the virtual address.
            let ppn = pte >> 10;
            let low_mask = bits::mask(vpn_bits * level as u32) << 12;
            let page = (((ppn << 12) & !low_mask) | (vaddr & low_mask)) & !(PAGE_SIZE - 1);
            let paddr = page | (vaddr & (PAGE_SIZE - 1));

            // Cache the translation for RAM pages. Only the access just
            // checked is granted; other access kinds re-walk and earn
            // their own bit (a store walk is also what sets the D bit).
            if let Some(host) = self.mem.host_ptr(page) {
                let perm = match access {
                    Access::Instruction => PERM_X,
                    Access::Load => PERM_R,
                    Access::Store => PERM_W,
                };
                self.tlb.insert(vaddr, page, host, perm);
            }
            return Ok(paddr);
        }
    }

    /// Host pointer for a TLB hit, already offset into the page.
    fn tlb_host(&self, vaddr: u64, perm: u8) -> Option<*mut u8> {
        self.tlb
            .lookup(vaddr, perm)
            .map(|e| unsafe { e.host.add((vaddr & (PAGE_SIZE - 1)) as usize) })
    }

    /// Physical read: RAM directly, everything else through the device
    /// bus. Unmapped MMIO reads as zero.
    pub(crate) fn phys_read(&mut self, paddr: u64, size: u8) -> u64 {
        match self.mem.read_int(paddr, size) {
            Some(value) => value,
            None => self.bus.read(paddr, size),
        }
    }

    /// Physical write: RAM stores also notify the translation cache's
    /// dirty tracker; unmapped MMIO writes are discarded.
    pub(crate) fn phys_write(&mut self, paddr: u64, value: u64, size: u8) {
        if self.mem.write_int(paddr, value, size) {
            self.jit_dirty(paddr, size as u64);
        } else {
            self.bus.write(paddr, value, size);
        }
    }

    /// Record a guest store for the translation cache's self-modifying
    /// code protocol.
    pub(crate) fn jit_dirty(&self, paddr: u64, len: u64) {
        if let Some(jit) = &self.jit {
            jit.mark_dirty(paddr, len);
        }
    }

    /// Translated read of up to 8 bytes. Accesses crossing a page boundary
    /// are split so each half translates (and may fault) on its own.
    pub fn mem_read(&mut self, vaddr: u64, size: u8) -> Result<u64, Exception> {
        let vaddr = self.mask_xlen(vaddr);
        if (vaddr & (PAGE_SIZE - 1)) + size as u64 > PAGE_SIZE {
            let mut bytes = [0u8; 8];
            for (i, byte) in bytes.iter_mut().take(size as usize).enumerate() {
                *byte = self.mem_read(vaddr.wrapping_add(i as u64), BYTE)? as u8;
            }
            return Ok(u64::from_le_bytes(bytes));
        }
        if let Some(host) = self.tlb_host(vaddr, PERM_R) {
            return Ok(unsafe { read_le(host, size) });
        }
        let paddr = self.translate(vaddr, Access::Load)?;
        Ok(self.phys_read(paddr, size))
    }

    /// Translated write of up to 8 bytes, split on page crossings.
    pub fn mem_write(&mut self, vaddr: u64, value: u64, size: u8) -> Result<(), Exception> {
        let vaddr = self.mask_xlen(vaddr);
        if (vaddr & (PAGE_SIZE - 1)) + size as u64 > PAGE_SIZE {
            for i in 0..size {
                self.mem_write(vaddr.wrapping_add(i as u64), value >> (8 * i), BYTE)?;
            }
            return Ok(());
        }
        if let Some(entry) = self.tlb.lookup(vaddr, PERM_W) {
            let off = vaddr & (PAGE_SIZE - 1);
            let (host, ppage) = (entry.host, entry.ppage);
            unsafe { write_le(host.add(off as usize), value, size) };
            self.jit_dirty(ppage | off, size as u64);
            return Ok(());
        }
        let paddr = self.translate(vaddr, Access::Store)?;
        self.phys_write(paddr, value, size);
        Ok(())
    }

    /// Fetch the instruction parcel at pc. Fetches that fit in one page
    /// take the TLB fast path; a fetch straddling a page boundary reads
    /// two halfwords so each page translates independently.
    pub fn fetch(&mut self) -> Result<u32, Exception> {
        let pc = self.mask_xlen(self.pc);
        if pc & 1 != 0 {
            return Err(Exception::InstructionAddressMisaligned(pc));
        }
        if pc & (PAGE_SIZE - 1) <= PAGE_SIZE - 4 {
            if let Some(host) = self.tlb_host(pc, PERM_X) {
                return Ok(unsafe { read_le(host, WORD) } as u32);
            }
            let paddr = self.translate(pc, Access::Instruction)?;
            Ok(self.phys_read(paddr, WORD) as u32)
        } else {
            let lo = self.fetch_half(pc)?;
            if lo & 0b11 != 0b11 {
                return Ok(lo as u32);
            }
            let hi = self.fetch_half(pc.wrapping_add(2))?;
            Ok(lo as u32 | (hi as u32) << 16)
        }
    }

    fn fetch_half(&mut self, vaddr: u64) -> Result<u16, Exception> {
        if let Some(host) = self.tlb_host(vaddr, PERM_X) {
            return Ok(unsafe { read_le(host, HALFWORD) } as u16);
        }
        let paddr = self.translate(vaddr, Access::Instruction)?;
        Ok(self.phys_read(paddr, HALFWORD) as u16)
    }

    /// Atomic read-modify-write of a naturally aligned word, for the AMO
    /// instructions. Returns the old value.
    pub(crate) fn amo_u32<F: Fn(u32) -> u32>(
        &mut self,
        vaddr: u64,
        f: F,
    ) -> Result<u32, Exception> {
        let vaddr = self.mask_xlen(vaddr);
        if vaddr % 4 != 0 {
            return Err(Exception::StoreAmoAddressMisaligned(vaddr));
        }
        let paddr = self.translate(vaddr, Access::Store)?;
        if let Some(cell) = self.mem.atomic_u32(paddr) {
            let old = cell
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| Some(f(v)))
                .unwrap();
            self.jit_dirty(paddr, 4);
            Ok(old)
        } else {
            // Device registers: a plain read-modify-write through the bus.
            let old = self.phys_read(paddr, WORD) as u32;
            self.phys_write(paddr, f(old) as u64, WORD);
            Ok(old)
        }
    }

    /// Atomic read-modify-write of a naturally aligned doubleword.
    pub(crate) fn amo_u64<F: Fn(u64) -> u64>(
        &mut self,
        vaddr: u64,
        f: F,
    ) -> Result<u64, Exception> {
        let vaddr = self.mask_xlen(vaddr);
        if vaddr % 8 != 0 {
            return Err(Exception::StoreAmoAddressMisaligned(vaddr));
        }
        let paddr = self.translate(vaddr, Access::Store)?;
        if let Some(cell) = self.mem.atomic_u64(paddr) {
            let old = cell
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| Some(f(v)))
                .unwrap();
            self.jit_dirty(paddr, 8);
            Ok(old)
        } else {
            let old = self.phys_read(paddr, 8);
            self.phys_write(paddr, f(old), 8);
            Ok(old)
        }
    }

    /// Load-reserved: record the reservation on the physical word.
    pub(crate) fn load_reserved(&mut self, vaddr: u64, size: u8) -> Result<u64, Exception> {
        let vaddr = self.mask_xlen(vaddr);
        if vaddr % size as u64 != 0 {
            return Err(Exception::LoadAddressMisaligned(vaddr));
        }
        let paddr = self.translate(vaddr, Access::Load)?;
        let value = if size == 4 {
            match self.mem.atomic_u32(paddr) {
                Some(cell) => cell.load(Ordering::SeqCst) as u64,
                None => self.phys_read(paddr, size),
            }
        } else {
            match self.mem.atomic_u64(paddr) {
                Some(cell) => cell.load(Ordering::SeqCst),
                None => self.phys_read(paddr, size),
            }
        };
        self.reservation = Some((paddr, value, size));
        Ok(value)
    }

    /// Store-conditional: succeeds only if the reservation still matches
    /// and the reserved word is unchanged, via a host compare-exchange.
    pub(crate) fn store_conditional(
        &mut self,
        vaddr: u64,
        value: u64,
        size: u8,
    ) -> Result<bool, Exception> {
        let vaddr = self.mask_xlen(vaddr);
        if vaddr % size as u64 != 0 {
            return Err(Exception::StoreAmoAddressMisaligned(vaddr));
        }
        let paddr = self.translate(vaddr, Access::Store)?;
        let reservation = self.reservation.take();
        let (rpaddr, old) = match reservation {
            Some((rpaddr, old, rsize)) if rpaddr == paddr && rsize == size => (rpaddr, old),
            _ => return Ok(false),
        };
        let success = if size == 4 {
            match self.mem.atomic_u32(rpaddr) {
                Some(cell) => cell
                    .compare_exchange(
                        old as u32,
                        value as u32,
                        Ordering::SeqCst,
                        Ordering::SeqCst,
                    )
                    .is_ok(),
                None => {
                    self.phys_write(paddr, value, size);
                    true
                }
            }
        } else {
            match self.mem.atomic_u64(rpaddr) {
                Some(cell) => cell
                    .compare_exchange(old, value, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok(),
                None => {
                    self.phys_write(paddr, value, size);
                    true
                }
            }
        };
        if success {
            self.jit_dirty(paddr, size as u64);
        }
        Ok(success)
    }
}

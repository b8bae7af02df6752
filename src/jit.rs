//! The jit module contains the translation-cache manager: the mapping
//! from guest physical PC to generated native code, the per-page
//! dirty/jited tracking that upholds the self-modifying-code contract,
//! and the block linker. Instruction emission itself lives in the host
//! code generator; only cache management is handled here.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::memory::PAGE_SIZE;
use crate::vma::{
    self, CodeHeap, HeapError, COALESCED_ICACHE_FLUSH, NATIVE_LINKER,
};

/// Default code heap size (16 MiB).
pub const HEAP_DEFAULT_SIZE: usize = 16 << 20;
/// The heap is considered near-full once less than this much room is left.
const HEAP_SLACK: usize = 64 * 1024;

/// A pending direct-branch patch: the site at `site` (an offset into the
/// heap) wants to jump straight to the block at some guest physical PC
/// once that block materialises.
#[derive(Debug, Clone, Copy)]
pub struct BlockLink {
    /// Guest physical PC of the branch target block.
    pub target: u64,
    /// Byte offset of the patch site within the block's code buffer.
    pub site: usize,
}

#[derive(Default)]
struct BlockMaps {
    /// phys_pc -> offset of the generated block in the heap.
    blocks: HashMap<u64, usize>,
    /// phys_pc -> patch sites (heap offsets) waiting for that block.
    links: HashMap<u64, Vec<usize>>,
}

/// The translation cache.
///
/// Blocks are keyed by guest *physical* PC, so the cache is immune to
/// remapping games; coherence with guest stores is kept by the paired
/// per-page bitmasks. A page never marked `jited` costs stores nothing
/// but a relaxed load.
pub struct TranslationCache {
    heap: CodeHeap,
    cursor: AtomicUsize,
    maps: Mutex<BlockMaps>,
    jited_pages: Box<[AtomicU32]>,
    dirty_pages: Box<[AtomicU32]>,
    mask: usize,
}

impl TranslationCache {
    /// Create a cache with a code heap of `heap_size` bytes, tracking
    /// dirtiness of `mem_size` bytes of guest RAM.
    pub fn new(heap_size: usize, mem_size: u64) -> Result<Self, HeapError> {
        let heap = CodeHeap::new(heap_size)?;
        // One u32 covers 32 pages (128 KiB of guest RAM).
        let words = (((mem_size + 0x1ffff) >> 17) as usize).next_power_of_two();
        let jited_pages = (0..words).map(|_| AtomicU32::new(0)).collect();
        let dirty_pages = (0..words).map(|_| AtomicU32::new(0)).collect();
        Ok(Self {
            heap,
            cursor: AtomicUsize::new(0),
            maps: Mutex::new(BlockMaps::default()),
            jited_pages,
            dirty_pages,
            mask: words - 1,
        })
    }

    #[inline]
    fn word_index(&self, paddr: u64) -> usize {
        (paddr >> 17) as usize & self.mask
    }

    #[inline]
    fn page_bit(paddr: u64) -> u32 {
        1 << (paddr >> 12 & 0x1f)
    }

    fn mark_jited_page(&self, paddr: u64) {
        self.jited_pages[self.word_index(paddr)].fetch_or(Self::page_bit(paddr), Ordering::Relaxed);
    }

    fn mark_dirty_page(&self, paddr: u64) {
        let index = self.word_index(paddr);
        let bit = Self::page_bit(paddr);
        // Fast path: pages without generated code take no atomic writes.
        if self.jited_pages[index].load(Ordering::Relaxed) & bit != 0 {
            self.dirty_pages[index].fetch_or(bit, Ordering::Relaxed);
            self.jited_pages[index].fetch_and(!bit, Ordering::Relaxed);
        }
    }

    /// Record a guest store. Invoked from every physical write path.
    pub fn mark_dirty(&self, paddr: u64, len: u64) {
        let first = paddr & !(PAGE_SIZE - 1);
        let last = paddr.wrapping_add(len.max(1) - 1) & !(PAGE_SIZE - 1);
        let mut page = first;
        loop {
            self.mark_dirty_page(page);
            if page >= last {
                break;
            }
            page += PAGE_SIZE;
        }
    }

    /// Returns true (once) if the page holding `paddr` was written since
    /// its last block ran, atomically consuming the dirty mark.
    fn page_needs_flush(&self, paddr: u64) -> bool {
        let index = self.word_index(paddr);
        let bit = Self::page_bit(paddr);
        self.dirty_pages[index].load(Ordering::Relaxed) & bit != 0
            && self.dirty_pages[index].fetch_and(!bit, Ordering::AcqRel) & bit != 0
    }

    /// Look up the native code for a block at `phys_pc`.
    ///
    /// If the page was dirtied by a guest store, every block and patch
    /// list keyed inside that page is purged first and the lookup misses,
    /// forcing the caller to re-decode — the self-modifying-code
    /// guarantee.
    pub fn lookup(&self, phys_pc: u64) -> Option<*const u8> {
        if self.page_needs_flush(phys_pc) {
            let page = phys_pc & !(PAGE_SIZE - 1);
            let mut maps = self.maps.lock().unwrap();
            maps.blocks
                .retain(|pc, _| *pc & !(PAGE_SIZE - 1) != page);
            maps.links.retain(|pc, _| *pc & !(PAGE_SIZE - 1) != page);
            log::trace!("jit: invalidated dirty page {:#x}", page);
            return None;
        }
        let maps = self.maps.lock().unwrap();
        maps.blocks
            .get(&phys_pc)
            .map(|&offset| self.heap.code_ptr(offset))
    }

    /// Whether the heap is close enough to full that the caller should
    /// [`flush`](Self::flush) before generating more code.
    pub fn near_full(&self) -> bool {
        self.cursor.load(Ordering::Relaxed) + HEAP_SLACK > self.heap.size()
    }

    /// Install a generated block: copy it into the heap, register it,
    /// queue its outgoing patch sites, and resolve every site that was
    /// waiting for this block. Returns None when the heap is out of room
    /// (flush and retry).
    pub fn finalize(&self, phys_pc: u64, code: &[u8], links: &[BlockLink]) -> Option<*const u8> {
        let mut maps = self.maps.lock().unwrap();
        let offset = self.cursor.load(Ordering::Relaxed);
        if offset + code.len() > self.heap.size() {
            return None;
        }

        vma::jit_write_protect(true);
        unsafe {
            std::ptr::copy_nonoverlapping(code.as_ptr(), self.heap.data_ptr(offset), code.len());
        }
        self.cursor.store(offset + code.len(), Ordering::Relaxed);
        maps.blocks.insert(phys_pc, offset);

        if NATIVE_LINKER {
            for link in links {
                maps.links
                    .entry(link.target)
                    .or_default()
                    .push(offset + link.site);
            }
            if let Some(sites) = maps.links.remove(&phys_pc) {
                for site in sites {
                    vma::patch_jump(
                        self.heap.data_ptr(site),
                        self.heap.code_ptr(site) as usize,
                        self.heap.code_ptr(offset) as usize,
                    );
                    if !COALESCED_ICACHE_FLUSH {
                        vma::flush_icache(self.heap.code_ptr(site), 8);
                    }
                }
            }
        }

        vma::flush_icache(self.heap.code_ptr(offset), code.len());
        vma::jit_write_protect(false);

        self.mark_jited_page(phys_pc);
        Some(self.heap.code_ptr(offset))
    }

    /// Tear the whole cache down: drop every block and patch list, clear
    /// the dirty marks and return the heap's physical pages to the host.
    /// Called at the near-full watermark and by fence.i.
    pub fn flush(&self) {
        let mut maps = self.maps.lock().unwrap();
        if self.cursor.load(Ordering::Relaxed) > 0x10000 {
            self.heap.decommit();
        }
        maps.blocks.clear();
        maps.links.clear();
        self.cursor.store(0, Ordering::Relaxed);
        for word in self.dirty_pages.iter() {
            word.store(0, Ordering::Relaxed);
        }
        log::debug!("jit: cache flushed");
    }

    /// Bytes of heap currently in use.
    pub fn used(&self) -> usize {
        self.cursor.load(Ordering::Relaxed)
    }
}

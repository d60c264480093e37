// # Slab Pool Implementation
//
// Fixed-page slab allocator over one contiguous region, designed so the
// region can live in memory shared between processes. The region is laid
// out as `[header][slot array][page descriptor array][aligned page area]`;
// chunk addresses are byte offsets into the region, never native pointers,
// because different processes map the region at different base addresses.
//
// Requests below half a page are served by subdividing a page into
// equal-sized chunks tracked by a bitmap; where that bitmap lives depends
// on the chunk size regime:
//
// - SMALL: bitmap occupies the first chunks of the page itself
// - EXACT: bitmap is exactly the descriptor's `slab` word
// - BIG:   high half of `slab` is the bitmap, low bits hold the shift
// - PAGE:  whole-page allocation, `slab` holds the run length
//
// Free pages form a LIFO list of runs; runs split when a smaller request
// arrives and are never coalesced.
//
// The pool owns one mutex. `alloc`/`free` acquire it per call; `lock`
// hands out the guard so an outer critical section can group the locked
// variants.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::NonNull;

use log::{debug, error};
use parking_lot::{Mutex, MutexGuard};

use crate::error::{CoreError, Result};

use super::{align_up, PAGE_SHIFT, PAGE_SIZE};

const WORD_BITS: usize = usize::BITS as usize;

/// Chunk size whose per-page bitmap fits exactly in one `slab` word.
pub const EXACT_SIZE: usize = PAGE_SIZE / (8 * std::mem::size_of::<usize>());
const EXACT_SHIFT: usize = EXACT_SIZE.trailing_zeros() as usize;

/// Boundary between chunk-subdivided pages and whole-page allocation.
pub const MAX_SLAB_SIZE: usize = PAGE_SIZE / 2;

/// Smallest chunk class by default: 8 bytes.
pub const DEFAULT_MIN_SHIFT: usize = 3;

const PAGE_FREE: usize = 0;
const PAGE_BUSY: usize = usize::MAX;
const PAGE_START: usize = 1 << (WORD_BITS - 1);

const SHIFT_MASK: usize = 0x0f;
const MAP_SHIFT: usize = WORD_BITS / 2;
const MAP_MASK: usize = usize::MAX << MAP_SHIFT;

/// All chunks of a one-word bitmap in use.
const BUSY: usize = usize::MAX;

/// Region bytes reserved for the pool header in the shared layout.
const POOL_HEADER_SIZE: usize = 128;

/// Page regime, stored explicitly instead of packing it into the low bits
/// of the descriptor's `prev` link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Regime {
    Small,
    Exact,
    Big,
    Page,
}

/// Intrusive list link. Descriptors are addressed by page index; slot
/// sentinels and the free-list head are their own node kinds so list
/// splicing never needs raw pointers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Link {
    Page(u32),
    Slot(u32),
    Free,
    Detached,
}

#[derive(Debug, Clone, Copy)]
struct PageDesc {
    slab: usize,
    next: Link,
    prev: Link,
    tag: Regime,
}

impl PageDesc {
    fn cleared() -> PageDesc {
        PageDesc {
            slab: PAGE_FREE,
            next: Link::Detached,
            prev: Link::Detached,
            tag: Regime::Page,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SlotHead {
    next: Link,
    prev: Link,
}

struct Region {
    base: NonNull<u8>,
    layout: Layout,
}

impl Region {
    fn new(size: usize) -> Result<Region> {
        let layout = Layout::from_size_align(size, PAGE_SIZE)
            .map_err(|_| CoreError::OutOfMemory(format!("invalid region size {}", size)))?;
        let p = unsafe { alloc_zeroed(layout) };
        let base = NonNull::new(p)
            .ok_or_else(|| CoreError::OutOfMemory(format!("slab region of {} bytes", size)))?;
        Ok(Region { base, layout })
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        unsafe { dealloc(self.base.as_ptr(), self.layout) };
    }
}

// The region is exclusively owned; the raw base pointer is what makes the
// type !Send by default.
unsafe impl Send for Region {}

/// Pool state guarded by the mutex. Methods on this type are the locked
/// forms of `alloc`/`free`.
pub struct SlabShared {
    region: Region,
    /// Offset of the aligned page area.
    start: usize,
    /// Region size; chunk offsets are always below this.
    end: usize,
    min_shift: usize,
    min_size: usize,
    slots: Vec<SlotHead>,
    pages: Vec<PageDesc>,
    free: SlotHead,
}

unsafe impl Send for SlabShared {}

/// Slab pool. Chunk offsets returned by `alloc` are non-owning references
/// into the pool's region, valid until `free` or pool teardown.
pub struct SlabPool {
    base: NonNull<u8>,
    size: usize,
    shared: Mutex<SlabShared>,
}

// Chunk data is only reachable through offsets the allocator handed out;
// all descriptor state is behind the mutex.
unsafe impl Send for SlabPool {}
unsafe impl Sync for SlabPool {}

impl SlabPool {
    /// Creates a pool over a fresh region of `size` bytes with the default
    /// smallest chunk class.
    pub fn new(size: usize) -> Result<SlabPool> {
        SlabPool::with_min_shift(size, DEFAULT_MIN_SHIFT)
    }

    pub fn with_min_shift(size: usize, min_shift: usize) -> Result<SlabPool> {
        if min_shift == 0 || min_shift >= PAGE_SHIFT {
            return Err(CoreError::Configuration(format!(
                "slab min_shift {} out of range",
                min_shift
            )));
        }

        let n_slots = PAGE_SHIFT - min_shift;
        let desc_size = std::mem::size_of::<PageDesc>();

        // Region budget: header, slot array, one descriptor per page, then
        // the page area aligned up to a page boundary.
        let head = POOL_HEADER_SIZE + n_slots * desc_size;
        if size <= head + PAGE_SIZE {
            return Err(CoreError::NoFit(format!("slab region of {} bytes", size)));
        }
        let mut page_count = (size - head) / (PAGE_SIZE + desc_size);
        let start = align_up(head + page_count * desc_size, PAGE_SIZE);
        // The alignment gap can push the last page past the region end.
        let fit = (size - start) / PAGE_SIZE;
        if fit < page_count {
            page_count = fit;
        }
        if page_count == 0 {
            return Err(CoreError::NoFit(format!("slab region of {} bytes", size)));
        }

        let region = Region::new(size)?;
        let slots: Vec<SlotHead> = (0..n_slots)
            .map(|i| SlotHead {
                next: Link::Slot(i as u32),
                prev: Link::Slot(i as u32),
            })
            .collect();

        let mut pages = vec![PageDesc::cleared(); page_count];
        pages[0] = PageDesc {
            slab: page_count,
            next: Link::Free,
            prev: Link::Free,
            tag: Regime::Page,
        };
        let free = SlotHead {
            next: Link::Page(0),
            prev: Link::Detached,
        };

        let base = region.base;
        Ok(SlabPool {
            base,
            size,
            shared: Mutex::new(SlabShared {
                region,
                start,
                end: size,
                min_shift,
                min_size: 1 << min_shift,
                slots,
                pages,
                free,
            }),
        })
    }

    /// Allocates `size` bytes, taking the pool mutex for the duration.
    pub fn alloc(&self, size: usize) -> Result<usize> {
        self.shared.lock().alloc(size)
    }

    /// Frees the chunk at `offset`, taking the pool mutex.
    pub fn free(&self, offset: usize) -> Result<()> {
        self.shared.lock().free(offset)
    }

    /// Acquires the pool mutex. The guard's `alloc`/`free` are the locked
    /// variants for callers grouping several operations.
    pub fn lock(&self) -> MutexGuard<'_, SlabShared> {
        self.shared.lock()
    }

    /// Raw pointer to the chunk at `offset`. The caller owns the chunk
    /// from `alloc` until `free`; the pool never touches live chunk data.
    pub fn chunk_ptr(&self, offset: usize) -> *mut u8 {
        assert!(offset < self.size, "chunk offset outside of pool");
        unsafe { self.base.as_ptr().add(offset) }
    }

    pub fn page_count(&self) -> usize {
        self.shared.lock().pages.len()
    }

    /// Total pages currently on the free list.
    pub fn free_page_total(&self) -> usize {
        self.shared.lock().free_page_total()
    }
}

impl SlabShared {
    /// Locked allocation. Whole pages for `size >= MAX_SLAB_SIZE`,
    /// otherwise a chunk from the matching size-class slot.
    pub fn alloc(&mut self, size: usize) -> Result<usize> {
        if size >= MAX_SLAB_SIZE {
            debug!("slab alloc: {}", size);
            let count = (size >> PAGE_SHIFT) + usize::from(size & (PAGE_SIZE - 1) != 0);
            let page = self.alloc_pages(count)?;
            return Ok(self.start + ((page as usize) << PAGE_SHIFT));
        }

        let (shift, slot) = if size > self.min_size {
            let shift = (usize::BITS - (size - 1).leading_zeros()) as usize;
            (shift, shift - self.min_shift)
        } else {
            (self.min_shift, 0)
        };
        debug!("slab alloc: {} slot: {}", size, slot);

        if let Some(offset) = self.alloc_from_slot(slot, shift) {
            return Ok(offset);
        }

        // No partial page for this class; take a fresh page and carve it.
        let page = self.alloc_pages(1)?;
        let page_off = self.start + ((page as usize) << PAGE_SHIFT);

        if shift < EXACT_SHIFT {
            let chunk_size = 1 << shift;
            let reserved = small_bitmap_chunks(shift);
            self.write_word(page_off, 0, (2usize << reserved) - 1);
            let map = (PAGE_SIZE >> shift) / WORD_BITS;
            for w in 1..map {
                self.write_word(page_off, w, 0);
            }
            self.pages[page as usize].slab = shift;
            self.link_to_slot(page, slot as u32, Regime::Small);
            Ok(page_off + chunk_size * reserved)
        } else if shift == EXACT_SHIFT {
            self.pages[page as usize].slab = 1;
            self.link_to_slot(page, slot as u32, Regime::Exact);
            Ok(page_off)
        } else {
            self.pages[page as usize].slab = (1 << MAP_SHIFT) | shift;
            self.link_to_slot(page, slot as u32, Regime::Big);
            Ok(page_off)
        }
    }

    /// Locked free. Validates the offset, clears the chunk's bitmap bit,
    /// relinks pages that were full, and returns fully-empty pages to the
    /// free list. Corruption is reported without touching state.
    pub fn free(&mut self, offset: usize) -> Result<()> {
        debug!("slab free: {:#x}", offset);

        if offset < self.start || offset >= self.end {
            error!("slab free(): offset outside of pool");
            return Err(CoreError::Corruption("free: offset outside of pool".into()));
        }

        let page = (offset - self.start) >> PAGE_SHIFT;
        if page >= self.pages.len() {
            error!("slab free(): offset outside of pool");
            return Err(CoreError::Corruption("free: offset outside of pool".into()));
        }
        let slab = self.pages[page].slab;

        match self.pages[page].tag {
            Regime::Small => {
                let shift = slab & SHIFT_MASK;
                let chunk_size = 1usize << shift;
                if offset & (chunk_size - 1) != 0 {
                    return self.wrong_chunk();
                }

                let chunk = (offset & (PAGE_SIZE - 1)) >> shift;
                let m = 1usize << (chunk & (WORD_BITS - 1));
                let w = chunk / WORD_BITS;
                let page_off = offset & !(PAGE_SIZE - 1);

                let word = self.read_word(page_off, w);
                if word & m == 0 {
                    return self.chunk_already_free();
                }

                if self.pages[page].next == Link::Detached {
                    let slot = shift - self.min_shift;
                    self.link_to_slot(page as u32, slot as u32, Regime::Small);
                }
                self.write_word(page_off, w, word & !m);

                let reserved = small_bitmap_chunks(shift);
                if self.read_word(page_off, 0) & !((1usize << reserved) - 1) != 0 {
                    return Ok(());
                }
                let map = (PAGE_SIZE >> shift) / WORD_BITS;
                for k in 1..map {
                    if self.read_word(page_off, k) != 0 {
                        return Ok(());
                    }
                }
                self.free_pages(page as u32, 1);
                Ok(())
            }

            Regime::Exact => {
                let m = 1usize << ((offset & (PAGE_SIZE - 1)) >> EXACT_SHIFT);
                if offset & (EXACT_SIZE - 1) != 0 {
                    return self.wrong_chunk();
                }
                if slab & m == 0 {
                    return self.chunk_already_free();
                }

                if slab == BUSY {
                    let slot = EXACT_SHIFT - self.min_shift;
                    self.link_to_slot(page as u32, slot as u32, Regime::Exact);
                }
                self.pages[page].slab &= !m;
                if self.pages[page].slab != 0 {
                    return Ok(());
                }
                self.free_pages(page as u32, 1);
                Ok(())
            }

            Regime::Big => {
                let shift = slab & SHIFT_MASK;
                let chunk_size = 1usize << shift;
                if offset & (chunk_size - 1) != 0 {
                    return self.wrong_chunk();
                }

                let m = 1usize << (((offset & (PAGE_SIZE - 1)) >> shift) + MAP_SHIFT);
                if slab & m == 0 {
                    return self.chunk_already_free();
                }

                if self.pages[page].next == Link::Detached {
                    let slot = shift - self.min_shift;
                    self.link_to_slot(page as u32, slot as u32, Regime::Big);
                }
                self.pages[page].slab &= !m;
                if self.pages[page].slab & MAP_MASK != 0 {
                    return Ok(());
                }
                self.free_pages(page as u32, 1);
                Ok(())
            }

            Regime::Page => {
                if offset & (PAGE_SIZE - 1) != 0 {
                    return self.wrong_chunk();
                }
                if slab == PAGE_FREE {
                    error!("slab free(): page is already free");
                    return Err(CoreError::Corruption("free: page is already free".into()));
                }
                if slab == PAGE_BUSY {
                    error!("slab free(): pointer to wrong page");
                    return Err(CoreError::Corruption("free: pointer to wrong page".into()));
                }

                let count = slab & !PAGE_START;
                self.free_pages(page as u32, count);
                Ok(())
            }
        }
    }

    /// Walks the partial pages of a slot for a zero bitmap bit. A page
    /// whose last chunk is taken is unlinked from the slot list.
    fn alloc_from_slot(&mut self, slot: usize, shift: usize) -> Option<usize> {
        let mut link = self.slots[slot].next;

        while let Link::Page(pi) = link {
            let page = pi as usize;
            let page_off = self.start + (page << PAGE_SHIFT);

            if shift < EXACT_SHIFT {
                let map = (PAGE_SIZE >> shift) / WORD_BITS;
                for w in 0..map {
                    let word = self.read_word(page_off, w);
                    if word == BUSY {
                        continue;
                    }
                    let bit = (!word).trailing_zeros() as usize;
                    self.write_word(page_off, w, word | (1 << bit));

                    if word | (1 << bit) == BUSY {
                        let mut full = true;
                        for k in w + 1..map {
                            if self.read_word(page_off, k) != BUSY {
                                full = false;
                                break;
                            }
                        }
                        if full {
                            self.unlink_page(pi);
                        }
                    }
                    return Some(page_off + ((w * WORD_BITS + bit) << shift));
                }
            } else if shift == EXACT_SHIFT {
                let slab = self.pages[page].slab;
                if slab != BUSY {
                    let bit = (!slab).trailing_zeros() as usize;
                    self.pages[page].slab |= 1 << bit;
                    if self.pages[page].slab == BUSY {
                        self.unlink_page(pi);
                    }
                    return Some(page_off + (bit << shift));
                }
            } else {
                let chunks = PAGE_SIZE >> shift;
                let mask = ((1usize << chunks) - 1) << MAP_SHIFT;
                let slab = self.pages[page].slab;
                if slab & MAP_MASK != mask {
                    for i in 0..chunks {
                        let m = 1usize << (MAP_SHIFT + i);
                        if slab & m != 0 {
                            continue;
                        }
                        self.pages[page].slab |= m;
                        if self.pages[page].slab & MAP_MASK == mask {
                            self.unlink_page(pi);
                        }
                        return Some(page_off + (i << shift));
                    }
                }
            }

            link = self.pages[page].next;
        }
        None
    }

    /// Free-run walker: first run with at least `count` pages wins. A
    /// longer run is split and the remainder spliced back in place.
    fn alloc_pages(&mut self, count: usize) -> Result<u32> {
        let mut link = self.free.next;

        while let Link::Page(pi) = link {
            let page = pi as usize;

            if self.pages[page].slab >= count {
                let prev = self.pages[page].prev;
                let next = self.pages[page].next;

                if self.pages[page].slab > count {
                    let remaining = self.pages[page].slab - count;
                    let rest = page + count;
                    self.pages[rest] = PageDesc {
                        slab: remaining,
                        next,
                        prev,
                        tag: Regime::Page,
                    };
                    self.set_next(prev, Link::Page(rest as u32));
                    self.set_prev(next, Link::Page(rest as u32));
                } else {
                    self.set_next(prev, next);
                    self.set_prev(next, prev);
                }

                self.pages[page] = PageDesc {
                    slab: count | PAGE_START,
                    next: Link::Detached,
                    prev: Link::Detached,
                    tag: Regime::Page,
                };
                for k in 1..count {
                    self.pages[page + k] = PageDesc {
                        slab: PAGE_BUSY,
                        next: Link::Detached,
                        prev: Link::Detached,
                        tag: Regime::Page,
                    };
                }
                return Ok(pi);
            }

            link = self.pages[page].next;
        }

        error!("slab alloc() failed: no memory");
        Err(CoreError::NoFit(format!("{} pages", count)))
    }

    /// Returns a run to the free list. The head keeps the run length; the
    /// rest of the descriptors are cleared. LIFO, no coalescing.
    fn free_pages(&mut self, page: u32, count: usize) {
        let pi = page as usize;
        self.pages[pi].slab = count;
        for k in 1..count {
            self.pages[pi + k] = PageDesc::cleared();
        }

        if self.pages[pi].next != Link::Detached {
            let prev = self.pages[pi].prev;
            let next = self.pages[pi].next;
            self.set_next(prev, next);
            self.set_prev(next, prev);
        }

        let old = self.free.next;
        self.pages[pi].prev = Link::Free;
        self.pages[pi].next = old;
        self.pages[pi].tag = Regime::Page;
        self.set_prev(old, Link::Page(page));
        self.free.next = Link::Page(page);
    }

    fn link_to_slot(&mut self, page: u32, slot: u32, tag: Regime) {
        let old = self.slots[slot as usize].next;
        let pi = page as usize;
        self.pages[pi].next = old;
        self.pages[pi].prev = Link::Slot(slot);
        self.pages[pi].tag = tag;
        self.set_prev(old, Link::Page(page));
        self.slots[slot as usize].next = Link::Page(page);
    }

    fn unlink_page(&mut self, page: u32) {
        let pi = page as usize;
        let prev = self.pages[pi].prev;
        let next = self.pages[pi].next;
        self.set_next(prev, next);
        self.set_prev(next, prev);
        self.pages[pi].next = Link::Detached;
        self.pages[pi].prev = Link::Detached;
    }

    fn set_next(&mut self, at: Link, to: Link) {
        match at {
            Link::Page(i) => self.pages[i as usize].next = to,
            Link::Slot(s) => self.slots[s as usize].next = to,
            Link::Free => self.free.next = to,
            Link::Detached => {}
        }
    }

    fn set_prev(&mut self, at: Link, to: Link) {
        match at {
            Link::Page(i) => self.pages[i as usize].prev = to,
            Link::Slot(s) => self.slots[s as usize].prev = to,
            Link::Free => self.free.prev = to,
            Link::Detached => {}
        }
    }

    fn read_word(&self, page_off: usize, word: usize) -> usize {
        unsafe { *(self.region.base.as_ptr().add(page_off) as *const usize).add(word) }
    }

    fn write_word(&mut self, page_off: usize, word: usize, value: usize) {
        unsafe { *(self.region.base.as_ptr().add(page_off) as *mut usize).add(word) = value };
    }

    fn wrong_chunk(&self) -> Result<()> {
        error!("slab free(): pointer to wrong chunk");
        Err(CoreError::Corruption("free: pointer to wrong chunk".into()))
    }

    fn chunk_already_free(&self) -> Result<()> {
        error!("slab free(): chunk is already free");
        Err(CoreError::Corruption("free: chunk is already free".into()))
    }

    fn free_page_total(&self) -> usize {
        let mut total = 0;
        let mut link = self.free.next;
        while let Link::Page(pi) = link {
            total += self.pages[pi as usize].slab;
            link = self.pages[pi as usize].next;
        }
        total
    }
}

/// Chunks of a SMALL page reserved for its in-page bitmap:
/// `PAGE_SIZE / S` bits is `PAGE_SIZE / S / 8` bytes, divided again by `S`
/// to convert bytes to chunks, at least one.
fn small_bitmap_chunks(shift: usize) -> usize {
    (((PAGE_SIZE >> shift) / 8) >> shift).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn pool_1m() -> SlabPool {
        SlabPool::with_min_shift(1024 * 1024, 3).unwrap()
    }

    fn page_of(pool: &SlabPool, offset: usize) -> usize {
        let shared = pool.lock();
        (offset - shared.start) >> PAGE_SHIFT
    }

    #[test]
    fn derived_constants() {
        assert_eq!(EXACT_SIZE, PAGE_SIZE / (8 * std::mem::size_of::<usize>()));
        assert_eq!(1 << EXACT_SHIFT, EXACT_SIZE);
        assert_eq!(MAX_SLAB_SIZE, PAGE_SIZE / 2);
    }

    #[test]
    fn page_area_is_page_aligned() {
        let pool = pool_1m();
        let shared = pool.lock();
        assert_eq!(shared.start % PAGE_SIZE, 0);
        assert!(shared.start + shared.pages.len() * PAGE_SIZE <= shared.end);
    }

    #[test]
    fn small_page_reserves_bitmap_chunks() {
        let pool = pool_1m();
        let offset = pool.alloc(8).unwrap();
        // 512 chunks of 8 bytes need 64 bitmap bytes = 8 leading chunks.
        assert_eq!(offset & (PAGE_SIZE - 1), 8 * 8);
        assert_eq!(offset % 8, 0);
    }

    #[test]
    fn small_page_overflows_to_second_page() {
        let pool = pool_1m();
        let per_page = PAGE_SIZE / 8 - small_bitmap_chunks(3);
        let mut offsets = Vec::new();
        for _ in 0..per_page {
            offsets.push(pool.alloc(8).unwrap());
        }
        let first_page = page_of(&pool, offsets[0]);
        assert!(offsets.iter().all(|&o| page_of(&pool, o) == first_page));

        let extra = pool.alloc(8).unwrap();
        assert_ne!(page_of(&pool, extra), first_page);
    }

    #[test]
    fn exact_regime_fills_one_word() {
        let pool = pool_1m();
        let mut offsets = Vec::new();
        for _ in 0..WORD_BITS {
            offsets.push(pool.alloc(EXACT_SIZE).unwrap());
        }
        let first_page = page_of(&pool, offsets[0]);
        assert!(offsets.iter().all(|&o| page_of(&pool, o) == first_page));
        assert_ne!(page_of(&pool, pool.alloc(EXACT_SIZE).unwrap()), first_page);

        // Freeing one chunk relinks the full page and the slot serves it.
        pool.free(offsets[7]).unwrap();
        assert_eq!(pool.alloc(EXACT_SIZE).unwrap(), offsets[7]);
    }

    #[test]
    fn big_regime_chunks_are_aligned() {
        let pool = pool_1m();
        let a = pool.alloc(300).unwrap();
        let b = pool.alloc(300).unwrap();
        assert_eq!(a % 512, 0);
        assert_eq!(b % 512, 0);
        assert_ne!(a, b);
        assert_eq!(page_of(&pool, a), page_of(&pool, b));
    }

    #[test]
    fn page_run_reuse_is_lifo() {
        let pool = pool_1m();
        let run = pool.alloc(PAGE_SIZE * 3).unwrap();
        assert_eq!(run % PAGE_SIZE, 0);
        pool.free(run).unwrap();
        // The freed run sits at the head of the free list, so the next
        // request of the same size gets the same offset back.
        assert_eq!(pool.alloc(PAGE_SIZE * 3).unwrap(), run);
    }

    #[test]
    fn free_run_split_serves_smaller_requests() {
        let pool = pool_1m();
        let total = pool.free_page_total();
        let run = pool.alloc(PAGE_SIZE * 4).unwrap();
        assert_eq!(pool.free_page_total(), total - 4);
        pool.free(run).unwrap();
        assert_eq!(pool.free_page_total(), total);

        // Any request at or below the freed run size is satisfiable.
        let a = pool.alloc(PAGE_SIZE * 2).unwrap();
        let b = pool.alloc(PAGE_SIZE).unwrap();
        let c = pool.alloc(PAGE_SIZE).unwrap();
        assert_eq!(pool.free_page_total(), total - 4);
        for offset in [a, b, c] {
            pool.free(offset).unwrap();
        }
    }

    #[test]
    fn double_free_is_detected() {
        let pool = pool_1m();
        let chunk = pool.alloc(64).unwrap();
        pool.free(chunk).unwrap();
        assert!(matches!(pool.free(chunk), Err(CoreError::Corruption(_))));

        let page = pool.alloc(PAGE_SIZE).unwrap();
        pool.free(page).unwrap();
        assert!(matches!(pool.free(page), Err(CoreError::Corruption(_))));
    }

    #[test]
    fn misaligned_free_is_detected() {
        let pool = pool_1m();
        let chunk = pool.alloc(256).unwrap();
        assert!(matches!(
            pool.free(chunk + 1),
            Err(CoreError::Corruption(_))
        ));
        // The original chunk is untouched and still freeable.
        pool.free(chunk).unwrap();
    }

    #[test]
    fn out_of_region_free_is_detected() {
        let pool = pool_1m();
        assert!(matches!(pool.free(0), Err(CoreError::Corruption(_))));
        assert!(matches!(
            pool.free(usize::MAX / 2),
            Err(CoreError::Corruption(_))
        ));
    }

    #[test]
    fn interior_page_free_is_detected() {
        let pool = pool_1m();
        let run = pool.alloc(PAGE_SIZE * 2).unwrap();
        assert!(matches!(
            pool.free(run + PAGE_SIZE),
            Err(CoreError::Corruption(_))
        ));
        pool.free(run).unwrap();
    }

    #[test]
    fn exhaustion_reports_no_fit() {
        let pool = SlabPool::new(64 * 1024).unwrap();
        assert!(matches!(
            pool.alloc(PAGE_SIZE * 1024),
            Err(CoreError::NoFit(_))
        ));
    }

    #[test]
    fn empty_small_page_returns_to_free_list() {
        let pool = pool_1m();
        let free_before = pool.free_page_total();
        let a = pool.alloc(32).unwrap();
        let b = pool.alloc(32).unwrap();
        assert_eq!(pool.free_page_total(), free_before - 1);
        pool.free(a).unwrap();
        pool.free(b).unwrap();
        assert_eq!(pool.free_page_total(), free_before);
    }

    #[test]
    fn locked_variants_group_operations() {
        let pool = pool_1m();
        let (a, b) = {
            let mut shared = pool.lock();
            let a = shared.alloc(128).unwrap();
            let b = shared.alloc(128).unwrap();
            (a, b)
        };
        assert_ne!(a, b);
        let mut shared = pool.lock();
        shared.free(a).unwrap();
        shared.free(b).unwrap();
    }

    #[test]
    fn chunk_writes_do_not_clobber_neighbors() {
        let pool = pool_1m();
        let mut rng = rand::rng();
        let mut live: Vec<(usize, usize)> = Vec::new();

        for _ in 0..200 {
            let size = 1usize << rng.random_range(3..=11);
            let offset = pool.alloc(size).unwrap();
            assert_eq!(offset % size, 0, "chunk must be size-aligned");
            unsafe {
                std::ptr::write_bytes(pool.chunk_ptr(offset), (offset & 0xff) as u8, size)
            };
            live.push((offset, size));
        }

        for (i, &(a, alen)) in live.iter().enumerate() {
            for &(b, blen) in &live[i + 1..] {
                assert!(a + alen <= b || b + blen <= a, "live chunks overlap");
            }
        }
        for &(offset, size) in &live {
            let p = pool.chunk_ptr(offset);
            let bytes = unsafe { std::slice::from_raw_parts(p, size) };
            assert!(bytes.iter().all(|&x| x == (offset & 0xff) as u8));
            pool.free(offset).unwrap();
        }
    }
}

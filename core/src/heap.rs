//! Bucketed+paged heap (§4.2): McKusick/Karels-style allocator over one or
//! more fixed extents.
//!
//! The spec's extents are physical page ranges donated by the caller; this
//! core has no physical-memory donor (it is a library, not a kernel image),
//! so an extent is an `alloc`-owned `Box<[u8]>` instead (§9 Design Notes
//! licenses representing spec structures "as indices" where pointers would
//! be unsound). Blocks are returned as a [`Block`] handle — `(extent index,
//! byte offset, size)` — rather than a raw pointer: a `Vec`/`Box` never
//! promises a stable address across the allocator's own lifetime the way a
//! donated physical page does, so an index into the owning extent is the
//! only representation that stays valid and needs no `unsafe`.
//!
//! Sub-page requests are served from power-of-two buckets (`MINLOG2` up to
//! `log2(pagesize)`); a bucket refills by carving one free page and slicing
//! it into equal blocks. Requests larger than one page are served by a
//! contiguous run of free pages. Each page carries a 1-byte state: free,
//! continuation of a multi-page run, the head of a multi-page run, or the
//! log2 of the bucket it has been carved into.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::vec;
use alloc::vec::Vec;

use nanopod_abi::{HEAP_EXTENT_MAX_SIZE, HEAP_MAXLOG2, HEAP_MINLOG2, HeapError, HeapResult};
use nanopod_lib::{klog_debug, klog_warn};

/// A handle to a live allocation: which extent it lives in, its byte offset
/// within that extent, and the size it was allocated at (not the bucket's
/// rounded-up size, so callers can slice exactly what they asked for).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Block {
    extent: u32,
    offset: u32,
    size: u32,
}

impl Block {
    pub fn size(&self) -> usize {
        self.size as usize
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PageState {
    Free,
    Cont,
    ListHead { pages: u32 },
    Bucket { log2: u32 },
}

struct Extent {
    memory: Box<[u8]>,
    pagesize: usize,
    npages: usize,
    page_state: Vec<PageState>,
    /// Free block offsets (within `memory`) per bucket log2.
    bucket_free: BTreeMap<u32, Vec<usize>>,
}

impl Extent {
    fn new(size: usize, pagesize: usize) -> Self {
        let npages = size / pagesize;
        Self {
            memory: vec![0u8; size].into_boxed_slice(),
            pagesize,
            npages,
            page_state: vec![PageState::Free; npages],
            bucket_free: BTreeMap::new(),
        }
    }

    /// Finds and claims a run of `pages` contiguous free pages, in ascending
    /// page-index order (so multi-page requests always prefer
    /// lower addresses, which is what keeps the free scan produced by
    /// `free()`'s coalescing in ascending order too).
    fn claim_page_run(&mut self, pages: usize) -> Option<usize> {
        let mut run_start = None;
        let mut run_len = 0;
        for i in 0..self.npages {
            if self.page_state[i] == PageState::Free {
                if run_len == 0 {
                    run_start = Some(i);
                }
                run_len += 1;
                if run_len == pages {
                    let start = run_start.unwrap();
                    self.page_state[start] = PageState::ListHead {
                        pages: pages as u32,
                    };
                    for p in start + 1..start + pages {
                        self.page_state[p] = PageState::Cont;
                    }
                    return Some(start);
                }
            } else {
                run_len = 0;
                run_start = None;
            }
        }
        None
    }

    fn claim_one_free_page(&mut self) -> Option<usize> {
        self.page_state.iter().position(|s| *s == PageState::Free)
    }

    fn refill_bucket(&mut self, log2: u32) -> HeapResult<()> {
        let page = self.claim_one_free_page().ok_or(HeapError::Nomem)?;
        self.page_state[page] = PageState::Bucket { log2 };
        let block_size = 1usize << log2;
        let page_base = page * self.pagesize;
        let blocks_per_page = self.pagesize / block_size;
        let free_list = self.bucket_free.entry(log2).or_default();
        for b in 0..blocks_per_page {
            free_list.push(page_base + b * block_size);
        }
        Ok(())
    }

    fn alloc_bucket(&mut self, log2: u32) -> HeapResult<usize> {
        if self
            .bucket_free
            .get(&log2)
            .is_none_or(|list| list.is_empty())
        {
            self.refill_bucket(log2)?;
        }
        let list = self.bucket_free.get_mut(&log2).expect("just refilled");
        list.pop().ok_or(HeapError::Nomem)
    }

    fn free_offset(&mut self, offset: usize, size: u32) -> HeapResult<()> {
        let page = offset / self.pagesize;
        if page >= self.npages {
            return Err(HeapError::NotInHeap);
        }
        match self.page_state[page] {
            PageState::Bucket { log2 } => {
                let block_size = 1usize << log2;
                if offset % block_size != 0 {
                    return Err(HeapError::BadBlock);
                }
                self.bucket_free.entry(log2).or_default().push(offset);
                Ok(())
            }
            PageState::ListHead { pages } => {
                if offset != page * self.pagesize {
                    return Err(HeapError::BadBlock);
                }
                let _ = size;
                for p in page..page + pages as usize {
                    self.page_state[p] = PageState::Free;
                }
                Ok(())
            }
            PageState::Free | PageState::Cont => Err(HeapError::BadBlock),
        }
    }

    fn as_slice(&self, offset: usize, size: usize) -> &[u8] {
        &self.memory[offset..offset + size]
    }

    fn as_slice_mut(&mut self, offset: usize, size: usize) -> &mut [u8] {
        &mut self.memory[offset..offset + size]
    }
}

/// A bucketed+paged heap over one or more extents, all sharing one
/// `pagesize`.
pub struct Heap {
    pagesize: usize,
    pagesize_log2: u32,
    extents: Vec<Extent>,
}

fn log2_exact(value: usize) -> Option<u32> {
    if value == 0 || !value.is_power_of_two() {
        None
    } else {
        Some(value.trailing_zeros())
    }
}

impl Heap {
    /// Creates an empty heap for the given `pagesize`. `pagesize` must be a
    /// power of two in `[2^MINLOG2 .. 2^MAXLOG2]`.
    pub fn new(pagesize: usize) -> HeapResult<Self> {
        let log2 = log2_exact(pagesize).ok_or(HeapError::Param)?;
        if !(HEAP_MINLOG2..=HEAP_MAXLOG2).contains(&log2) {
            return Err(HeapError::Param);
        }
        Ok(Self {
            pagesize,
            pagesize_log2: log2,
            extents: Vec::new(),
        })
    }

    pub fn pagesize(&self) -> usize {
        self.pagesize
    }

    /// Adds a fresh extent of `size` bytes. `size` must be a multiple of
    /// `pagesize`, cover at least two pages, and not exceed
    /// [`HEAP_EXTENT_MAX_SIZE`].
    pub fn add_extent(&mut self, size: usize) -> HeapResult<()> {
        if size == 0 || size % self.pagesize != 0 {
            return Err(HeapError::Param);
        }
        if size < 2 * self.pagesize {
            return Err(HeapError::Param);
        }
        if size > HEAP_EXTENT_MAX_SIZE {
            return Err(HeapError::Param);
        }
        self.extents.push(Extent::new(size, self.pagesize));
        klog_debug!("heap: added extent of {} bytes ({} pages)", size, size / self.pagesize);
        Ok(())
    }

    /// Allocates `size` bytes, returning a handle. Requests at or under one
    /// page are rounded up to a power-of-two bucket and served from a
    /// bucket page; larger requests are served by a contiguous page run of
    /// `ceil(size / pagesize)` pages (the spec's "> 2*pagesize" wording
    /// leaves `(pagesize, 2*pagesize]` requests unaddressed — this
    /// implementation treats the whole `> pagesize` range uniformly as a
    /// multi-page carve, documented in `DESIGN.md`).
    pub fn alloc(&mut self, size: usize) -> HeapResult<Block> {
        if size == 0 {
            return Err(HeapError::Param);
        }
        if size <= self.pagesize {
            let log2 = bucket_log2_for(size, self.pagesize_log2);
            for (idx, extent) in self.extents.iter_mut().enumerate() {
                if let Ok(offset) = extent.alloc_bucket(log2) {
                    return Ok(Block {
                        extent: idx as u32,
                        offset: offset as u32,
                        size: size as u32,
                    });
                }
            }
            klog_warn!("heap: bucket alloc of {} bytes failed, out of memory", size);
            Err(HeapError::Nomem)
        } else {
            let pages = size.div_ceil(self.pagesize);
            for (idx, extent) in self.extents.iter_mut().enumerate() {
                if let Some(page) = extent.claim_page_run(pages) {
                    return Ok(Block {
                        extent: idx as u32,
                        offset: (page * self.pagesize) as u32,
                        size: size as u32,
                    });
                }
            }
            klog_warn!("heap: page-run alloc of {} pages failed, out of memory", pages);
            Err(HeapError::Nomem)
        }
    }

    pub fn free(&mut self, block: Block) -> HeapResult<()> {
        let extent = self
            .extents
            .get_mut(block.extent as usize)
            .ok_or(HeapError::NotInHeap)?;
        extent.free_offset(block.offset as usize, block.size)
    }

    pub fn as_slice(&self, block: Block) -> &[u8] {
        self.extents[block.extent as usize].as_slice(block.offset as usize, block.size as usize)
    }

    pub fn as_slice_mut(&mut self, block: Block) -> &mut [u8] {
        self.extents[block.extent as usize]
            .as_slice_mut(block.offset as usize, block.size as usize)
    }
}

fn bucket_log2_for(size: usize, pagesize_log2: u32) -> u32 {
    let mut log2 = HEAP_MINLOG2;
    while (1usize << log2) < size && log2 < pagesize_log2 {
        log2 += 1;
    }
    log2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_power_of_two_pagesize() {
        assert_eq!(Heap::new(100).err(), Some(HeapError::Param));
    }

    #[test]
    fn rejects_pagesize_outside_bucket_range() {
        assert!(Heap::new(1 << (HEAP_MINLOG2 - 1)).is_err());
        assert!(Heap::new(1 << (HEAP_MAXLOG2 + 1)).is_err());
    }

    #[test]
    fn extent_must_cover_at_least_two_pages() {
        let mut heap = Heap::new(4096).unwrap();
        assert_eq!(heap.add_extent(4096), Err(HeapError::Param));
        assert!(heap.add_extent(8192).is_ok());
    }

    #[test]
    fn extent_size_must_be_page_multiple() {
        let mut heap = Heap::new(4096).unwrap();
        assert_eq!(heap.add_extent(4096 * 2 + 10), Err(HeapError::Param));
    }

    #[test]
    fn extent_over_cap_rejected() {
        let mut heap = Heap::new(4096).unwrap();
        assert_eq!(heap.add_extent(HEAP_EXTENT_MAX_SIZE + 4096), Err(HeapError::Param));
    }

    #[test]
    fn small_alloc_round_trips_through_a_bucket() {
        let mut heap = Heap::new(4096).unwrap();
        heap.add_extent(8192).unwrap();
        let block = heap.alloc(24).unwrap();
        assert_eq!(block.size(), 24);
        heap.as_slice_mut(block)[0] = 0xAB;
        assert_eq!(heap.as_slice(block)[0], 0xAB);
        heap.free(block).unwrap();
    }

    #[test]
    fn large_alloc_carves_a_page_run() {
        let mut heap = Heap::new(4096).unwrap();
        heap.add_extent(4096 * 8).unwrap();
        let block = heap.alloc(4096 * 3).unwrap();
        heap.free(block).unwrap();
    }

    #[test]
    fn free_of_foreign_extent_index_is_not_in_heap() {
        let mut heap = Heap::new(4096).unwrap();
        heap.add_extent(8192).unwrap();
        let bogus = Block {
            extent: 7,
            offset: 0,
            size: 16,
        };
        assert_eq!(heap.free(bogus), Err(HeapError::NotInHeap));
    }

    #[test]
    fn free_of_misaligned_offset_is_bad_block() {
        let mut heap = Heap::new(4096).unwrap();
        heap.add_extent(8192).unwrap();
        let block = heap.alloc(24).unwrap();
        let misaligned = Block {
            extent: block.extent,
            offset: block.offset + 1,
            size: block.size,
        };
        assert_eq!(heap.free(misaligned), Err(HeapError::BadBlock));
    }

    #[test]
    fn exhausting_a_single_page_extent_returns_nomem() {
        let mut heap = Heap::new(4096).unwrap();
        heap.add_extent(8192).unwrap();
        // Two pages available: first alloc forces a bucket refill of one
        // whole page, second large alloc wants the only remaining page plus
        // one more and must fail.
        let _b = heap.alloc(16).unwrap();
        assert!(heap.alloc(4096 * 4).is_err());
    }
}

//! The kernel heap behind `alloc`.
//!
//! Sub-page allocations come from power-of-two bins refilled from the page
//! allocator. Bounded tables that must not grow (files, inodes) do not use
//! this; they draw from their own slabs.

use page_alloc::{BinAllocator, FreePageList, HeapSource, KernelHeap, PageSource};

use crate::{
    memory::{PAGE_SIZE, page},
    sync::{SpinLock, SpinLockGuard},
};

static HEAP: SpinLock<BinAllocator<PAGE_SIZE>> = SpinLock::new(BinAllocator::new());

struct Pages;
impl PageSource<PAGE_SIZE> for Pages {
    type Ref = SpinLockGuard<'static, FreePageList<PAGE_SIZE>>;

    fn pages() -> Self::Ref {
        page::frames()
    }
}

struct Bins;
impl HeapSource<PAGE_SIZE> for Bins {
    type Ref = SpinLockGuard<'static, BinAllocator<PAGE_SIZE>>;

    fn heap() -> Self::Ref {
        HEAP.lock()
    }
}

#[global_allocator]
static GLOBAL: KernelHeap<Pages, Bins, PAGE_SIZE> = KernelHeap::new();

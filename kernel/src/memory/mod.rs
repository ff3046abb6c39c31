//! Memory management: physical frames, Sv39 page tables, the kernel direct
//! map, and per-process user address spaces.

pub use self::addr::{PhysAddr, VirtAddr, page_round_down, page_round_up};

pub mod addr;
pub mod heap;
pub mod layout;
pub mod page;
pub mod page_table;
pub mod vm_kernel;
pub mod vm_user;

/// Bytes per page.
pub const PAGE_SIZE: usize = 4096;

/// Bits of the in-page offset.
pub const PAGE_SHIFT: usize = 12;

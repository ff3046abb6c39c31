//! Sizing constants shared across the kernel.

#![no_std]

/// Maximum number of processes.
pub const NPROC: usize = 64;

/// Maximum number of CPUs (harts).
pub const NCPU: usize = 8;

/// Open files per process.
pub const NOFILE: usize = 16;

/// Open files in the whole system.
pub const NFILE: usize = 100;

/// In-memory inode table size.
pub const NINODE: usize = 50;

/// Device-driver table size (major device numbers).
pub const NDEV: usize = 10;

/// Device number of the file-system root disk.
pub const ROOT_DEV: u32 = 1;

/// Maximum number of exec() arguments.
pub const MAX_ARG: usize = 32;

/// Maximum path length in bytes.
pub const MAX_PATH: usize = 128;

/// Maximum blocks any single FS syscall may write.
pub const MAX_OP_BLOCKS: usize = 10;

/// Maximum data blocks in the on-disk log.
pub const LOG_BLOCKS: usize = MAX_OP_BLOCKS * 3;

/// Buffers in the block cache.
pub const NBUF: usize = MAX_OP_BLOCKS * 3;

/// User stack pages set up by exec.
pub const USER_STACK_PAGES: usize = 1;

//! The qemu virtio-mmio block device.
//!
//! Outside the core proper: the file system needs exactly one thing from
//! it, blocking whole-block [`read`]/[`write`]. A request is a chain of
//! three descriptors (header, data, status); the caller sleeps until the
//! completion interrupt fires.

use alloc::boxed::Box;
use core::{
    mem, ptr,
    sync::atomic::{Ordering, fence},
};

use nv6_fs_types::BLOCK_SIZE;
use once_init::OnceInit;

use crate::{
    memory::{PAGE_SIZE, layout::VIRTIO0, page::PageFrame},
    proc,
    sync::{Chan, SpinLock},
};

/// Virtqueue size. Must be a power of two.
const QUEUE_LEN: usize = 8;

const SECTOR_SIZE: usize = 512;
const SECTORS_PER_BLOCK: u64 = (BLOCK_SIZE / SECTOR_SIZE) as u64;

// MMIO register offsets.
const MAGIC_VALUE: usize = 0x000;
const VERSION: usize = 0x004;
const DEVICE_ID: usize = 0x008;
const VENDOR_ID: usize = 0x00c;
const DEVICE_FEATURES: usize = 0x010;
const DRIVER_FEATURES: usize = 0x020;
const QUEUE_SEL: usize = 0x030;
const QUEUE_NUM_MAX: usize = 0x034;
const QUEUE_NUM: usize = 0x038;
const QUEUE_READY: usize = 0x044;
const QUEUE_NOTIFY: usize = 0x050;
const INTERRUPT_STATUS: usize = 0x060;
const INTERRUPT_ACK: usize = 0x064;
const STATUS: usize = 0x070;
const QUEUE_DESC_LOW: usize = 0x080;
const QUEUE_DESC_HIGH: usize = 0x084;
const QUEUE_DRIVER_LOW: usize = 0x090;
const QUEUE_DRIVER_HIGH: usize = 0x094;
const QUEUE_DEVICE_LOW: usize = 0x0a0;
const QUEUE_DEVICE_HIGH: usize = 0x0a4;

// status register bits
const STATUS_ACKNOWLEDGE: u32 = 1;
const STATUS_DRIVER: u32 = 2;
const STATUS_DRIVER_OK: u32 = 4;
const STATUS_FEATURES_OK: u32 = 8;

// device feature bits the driver refuses
const FEATURE_BLK_RO: u32 = 1 << 5;
const FEATURE_BLK_SCSI: u32 = 1 << 7;
const FEATURE_BLK_CONFIG_WCE: u32 = 1 << 11;
const FEATURE_BLK_MQ: u32 = 1 << 12;
const FEATURE_ANY_LAYOUT: u32 = 1 << 27;
const FEATURE_RING_INDIRECT_DESC: u32 = 1 << 28;
const FEATURE_RING_EVENT_IDX: u32 = 1 << 29;

const DESC_F_NEXT: u16 = 1;
const DESC_F_WRITE: u16 = 2;

const BLK_T_IN: u32 = 0; // device-to-memory: a read
const BLK_T_OUT: u32 = 1;

fn read_reg(offset: usize) -> u32 {
    unsafe { ptr::with_exposed_provenance::<u32>(VIRTIO0 + offset).read_volatile() }
}

fn write_reg(offset: usize, value: u32) {
    unsafe {
        ptr::with_exposed_provenance_mut::<u32>(VIRTIO0 + offset).write_volatile(value);
    }
}

#[repr(C)]
struct Desc {
    addr: u64,
    len: u32,
    flags: u16,
    next: u16,
}

#[repr(C)]
struct Avail {
    flags: u16,
    idx: u16,
    ring: [u16; QUEUE_LEN],
    unused: u16,
}

#[repr(C)]
struct UsedElem {
    id: u32,
    len: u32,
}

#[repr(C)]
struct Used {
    flags: u16,
    idx: u16,
    ring: [UsedElem; QUEUE_LEN],
}

#[repr(C)]
struct BlkReq {
    ty: u32,
    reserved: u32,
    sector: u64,
}

struct Request {
    /// Completion status byte the device writes; 0 = success.
    status: u8,
    done: bool,
}

struct Disk {
    /// The three virtqueue structures, each in its own frame so their
    /// physical addresses are simply their kernel addresses.
    desc: Box<[Desc; QUEUE_LEN], PageFrame>,
    avail: Box<Avail, PageFrame>,
    used: Box<Used, PageFrame>,

    free: [bool; QUEUE_LEN],
    used_idx: u16,
    requests: [Request; QUEUE_LEN],
    headers: [BlkReq; QUEUE_LEN],
}

static DISK: OnceInit<SpinLock<Disk>> = OnceInit::new();

pub fn init() {
    assert_eq!(read_reg(MAGIC_VALUE), 0x7472_6976, "virtio magic");
    assert_eq!(read_reg(VERSION), 2, "virtio mmio version");
    assert_eq!(read_reg(DEVICE_ID), 2, "not a block device");
    assert_eq!(read_reg(VENDOR_ID), 0x554d_4551, "virtio vendor");

    let mut status = 0;
    write_reg(STATUS, status); // reset

    status |= STATUS_ACKNOWLEDGE;
    write_reg(STATUS, status);
    status |= STATUS_DRIVER;
    write_reg(STATUS, status);

    let mut features = read_reg(DEVICE_FEATURES);
    features &= !(FEATURE_BLK_RO
        | FEATURE_BLK_SCSI
        | FEATURE_BLK_CONFIG_WCE
        | FEATURE_BLK_MQ
        | FEATURE_ANY_LAYOUT
        | FEATURE_RING_INDIRECT_DESC
        | FEATURE_RING_EVENT_IDX);
    write_reg(DRIVER_FEATURES, features);

    status |= STATUS_FEATURES_OK;
    write_reg(STATUS, status);
    assert!(
        read_reg(STATUS) & STATUS_FEATURES_OK != 0,
        "virtio features rejected"
    );

    let disk = Disk {
        desc: Box::new_in(unsafe { mem::zeroed() }, PageFrame),
        avail: Box::new_in(unsafe { mem::zeroed() }, PageFrame),
        used: Box::new_in(unsafe { mem::zeroed() }, PageFrame),
        free: [true; QUEUE_LEN],
        used_idx: 0,
        requests: [const {
            Request {
                status: 0,
                done: false,
            }
        }; QUEUE_LEN],
        headers: [const {
            BlkReq {
                ty: BLK_T_IN,
                reserved: 0,
                sector: 0,
            }
        }; QUEUE_LEN],
    };

    write_reg(QUEUE_SEL, 0);
    assert_eq!(read_reg(QUEUE_READY), 0, "queue already live");
    assert!(read_reg(QUEUE_NUM_MAX) as usize >= QUEUE_LEN, "queue too small");
    write_reg(QUEUE_NUM, QUEUE_LEN as u32);

    let desc_addr = ptr::from_ref(&*disk.desc).addr() as u64;
    let avail_addr = ptr::from_ref(&*disk.avail).addr() as u64;
    let used_addr = ptr::from_ref(&*disk.used).addr() as u64;
    write_reg(QUEUE_DESC_LOW, desc_addr as u32);
    write_reg(QUEUE_DESC_HIGH, (desc_addr >> 32) as u32);
    write_reg(QUEUE_DRIVER_LOW, avail_addr as u32);
    write_reg(QUEUE_DRIVER_HIGH, (avail_addr >> 32) as u32);
    write_reg(QUEUE_DEVICE_LOW, used_addr as u32);
    write_reg(QUEUE_DEVICE_HIGH, (used_addr >> 32) as u32);

    write_reg(QUEUE_READY, 1);

    status |= STATUS_DRIVER_OK;
    write_reg(STATUS, status);

    DISK.init(SpinLock::new(disk));
}

impl Disk {
    fn take_desc(&mut self) -> Option<u16> {
        let i = self.free.iter().position(|&f| f)?;
        self.free[i] = false;
        Some(i as u16)
    }

    fn release_desc(&mut self, i: u16) {
        let i = i as usize;
        assert!(!self.free[i], "descriptor double free");
        self.desc[i] = Desc {
            addr: 0,
            len: 0,
            flags: 0,
            next: 0,
        };
        self.free[i] = true;
    }

    /// Reserves a three-descriptor chain, or `None` to retry.
    fn take_chain(&mut self) -> Option<[u16; 3]> {
        let mut chain = [0; 3];
        for i in 0..3 {
            match self.take_desc() {
                Some(d) => chain[i] = d,
                None => {
                    for &d in &chain[..i] {
                        self.release_desc(d);
                    }
                    return None;
                }
            }
        }
        Some(chain)
    }
}

fn transfer(bno: u32, buf: *mut u8, writing: bool) {
    let mut disk = DISK.get().lock();

    // wait for three free descriptors
    let chain = loop {
        match disk.take_chain() {
            Some(chain) => break chain,
            None => {
                let chan = Chan::of(&disk.free);
                disk = proc::sleep(chan, disk);
            }
        }
    };
    let [head, data, tail] = chain;

    let header = &mut disk.headers[head as usize];
    header.ty = if writing { BLK_T_OUT } else { BLK_T_IN };
    header.reserved = 0;
    header.sector = u64::from(bno) * SECTORS_PER_BLOCK;

    disk.desc[head as usize] = Desc {
        addr: ptr::from_ref(&disk.headers[head as usize]).addr() as u64,
        len: size_of::<BlkReq>() as u32,
        flags: DESC_F_NEXT,
        next: data,
    };
    disk.desc[data as usize] = Desc {
        addr: buf.addr() as u64,
        len: BLOCK_SIZE as u32,
        // a read means the device writes the buffer
        flags: if writing { DESC_F_NEXT } else { DESC_F_NEXT | DESC_F_WRITE },
        next: tail,
    };
    disk.requests[head as usize].status = 0xff; // device overwrites on success
    disk.requests[head as usize].done = false;
    disk.desc[tail as usize] = Desc {
        addr: ptr::from_ref(&disk.requests[head as usize].status).addr() as u64,
        len: 1,
        flags: DESC_F_WRITE,
        next: 0,
    };

    let slot = disk.avail.idx as usize % QUEUE_LEN;
    disk.avail.ring[slot] = head;
    fence(Ordering::SeqCst);
    disk.avail.idx = disk.avail.idx.wrapping_add(1);
    fence(Ordering::SeqCst);

    write_reg(QUEUE_NOTIFY, 0);

    // park until the interrupt handler marks the request done
    while !disk.requests[head as usize].done {
        let chan = Chan::of(&disk.requests[head as usize]);
        disk = proc::sleep(chan, disk);
    }
    assert_eq!(disk.requests[head as usize].status, 0, "disk request failed");

    for d in chain {
        disk.release_desc(d);
    }
    proc::wakeup(Chan::of(&disk.free));
}

/// Reads block `bno` into `buf`, sleeping until the disk finishes.
pub fn read(bno: u32, buf: &mut [u8; BLOCK_SIZE]) {
    transfer(bno, buf.as_mut_ptr(), false);
}

/// Writes `buf` to block `bno`, sleeping until the disk finishes.
pub fn write(bno: u32, buf: &[u8; BLOCK_SIZE]) {
    transfer(bno, buf.as_ptr().cast_mut(), true);
}

/// The disk raised its completion interrupt.
pub fn handle_interrupt() {
    let mut disk = DISK.get().lock();

    // ack both interrupt bits; new completions may still arrive
    write_reg(INTERRUPT_ACK, read_reg(INTERRUPT_STATUS) & 0x3);
    fence(Ordering::SeqCst);

    while disk.used_idx != disk.used.idx {
        fence(Ordering::SeqCst);
        let elem = disk.used_idx as usize % QUEUE_LEN;
        let head = disk.used.ring[elem].id as usize;

        disk.requests[head].done = true;
        proc::wakeup(Chan::of(&disk.requests[head]));

        disk.used_idx = disk.used_idx.wrapping_add(1);
    }
}

const _: () = {
    assert!(QUEUE_LEN.is_power_of_two());
    assert!(size_of::<[Desc; QUEUE_LEN]>() <= PAGE_SIZE);
    assert!(size_of::<Avail>() <= PAGE_SIZE);
    assert!(size_of::<Used>() <= PAGE_SIZE);
};

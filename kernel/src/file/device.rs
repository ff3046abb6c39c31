//! Character devices, routed by major number.

use nv6_kernel_params::NDEV;
use nv6_syscall::Stat;

use crate::{
    error::{Error, Result},
    fs::Inode,
    memory::vm_user::{VmDst, VmSrc},
    proc::Proc,
    sync::SpinLock,
};

/// A device major number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Major(pub u16);

impl Major {
    pub const CONSOLE: Self = Self(1);
}

/// A driver's read/write entry points over tagged user-or-kernel memory.
pub struct DeviceIo {
    pub read: fn(p: &Proc, dst: VmDst, n: usize) -> Result<usize>,
    pub write: fn(p: &Proc, src: VmSrc, n: usize) -> Result<usize>,
}

static DEVICES: SpinLock<[Option<DeviceIo>; NDEV]> = SpinLock::new([const { None }; NDEV]);

/// Installs the driver for `major`. Drivers register at boot.
pub fn register_device(major: Major, io: DeviceIo) {
    DEVICES.lock()[major.0 as usize] = Some(io);
}

/// Copies the driver's entry points out from under the table lock.
fn driver(major: Major) -> Result<(
    fn(&Proc, VmDst, usize) -> Result<usize>,
    fn(&Proc, VmSrc, usize) -> Result<usize>,
)> {
    let table = DEVICES.lock();
    let io = table
        .get(major.0 as usize)
        .and_then(Option::as_ref)
        .ok_or(Error::UnknownDevice(major.0))?;
    Ok((io.read, io.write))
}

pub(super) struct DeviceFile {
    major: Major,
    inode: Inode,
}

impl DeviceFile {
    pub(super) fn new(major: Major, inode: Inode) -> Self {
        Self { major, inode }
    }

    pub(super) fn close(self) {
        super::common::close_inode(self.inode);
    }

    pub(super) fn stat(&self) -> Stat {
        super::common::stat_inode(&self.inode)
    }

    pub(super) fn read(&self, p: &Proc, dst: VmDst, n: usize) -> Result<usize> {
        let (read, _) = driver(self.major)?;
        read(p, dst, n)
    }

    pub(super) fn write(&self, p: &Proc, src: VmSrc, n: usize) -> Result<usize> {
        let (_, write) = driver(self.major)?;
        write(p, src, n)
    }
}

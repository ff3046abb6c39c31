//! The process table, lifecycle operations, and sleep/wakeup.
//!
//! Each slot has two halves. The shared half (state, pid, kill flag, saved
//! context) sits behind a per-process spin lock and may be touched by any
//! hart. The owned half (address space, trapframe, open files, cwd) is
//! touched only by the process's own kernel thread, which is what makes the
//! unlocked [`Proc::owned_mut`] access sound. The parent link is guarded
//! separately by the global wait lock.

use core::{
    cell::UnsafeCell,
    fmt,
    ptr::{self, NonNull},
    sync::atomic::{AtomicBool, AtomicI32, AtomicPtr, Ordering},
};

use arrayvec::ArrayString;
use nv6_kernel_params::{NOFILE, NPROC};

use crate::{
    cpu::Cpu,
    error::{Error, Result},
    file::File,
    fs::{self, Inode},
    interrupt::{self, trap::TrapFrame},
    memory::{
        PAGE_SIZE, VirtAddr,
        layout::{KSTACK_PAGES, kstack},
        page,
        page_table::PageTable,
        vm_user::UserVm,
    },
    println,
    sync::{Chan, SpinLock, SpinLockGuard},
};

use self::wait_lock::ParentLink;

pub use self::scheduler::Context;

pub mod exec;
mod elf;
mod scheduler;
mod wait_lock;

static PROCS: [Proc; NPROC] = [const { Proc::new() }; NPROC];
static INIT_PROC: AtomicPtr<Proc> = AtomicPtr::new(ptr::null_mut());

/// A process id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct Pid(i32);

impl Pid {
    pub const INVALID: Self = Self(-1);

    pub const fn new(pid: i32) -> Self {
        Self(pid)
    }

    pub const fn value(self) -> i32 {
        self.0
    }

    fn next() -> Self {
        static NEXT: AtomicI32 = AtomicI32::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProcState {
    Unused,
    Used,
    Sleeping(Chan),
    Runnable,
    Running,
    Zombie(i32),
}

/// The lock-guarded half of a process slot.
pub struct ProcShared {
    pid: Pid,
    name: ArrayString<16>,
    state: ProcState,
    killed: bool,
    /// Switch here to resume the process's kernel thread.
    context: Context,
}

impl ProcShared {
    const fn unused() -> Self {
        Self {
            pid: Pid::INVALID,
            name: ArrayString::new_const(),
            state: ProcState::Unused,
            killed: false,
            context: Context::zeroed(),
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: &[u8]) {
        self.name.clear();
        for chunk in name.utf8_chunks() {
            for c in chunk.valid().chars() {
                if self.name.try_push(c).is_err() {
                    return;
                }
            }
            if !chunk.invalid().is_empty()
                && self.name.try_push(char::REPLACEMENT_CHARACTER).is_err()
            {
                return;
            }
        }
    }

    pub fn kill(&mut self) {
        self.killed = true;
    }

    pub fn killed(&self) -> bool {
        self.killed
    }
}

/// The half only the owning kernel thread touches.
pub struct ProcOwned {
    /// Virtual address of the kernel stack.
    kstack: usize,
    vm: Option<UserVm>,
    trapframe: Option<NonNull<TrapFrame>>,
    files: [Option<File>; NOFILE],
    cwd: Option<Inode>,
}

impl ProcOwned {
    const fn new() -> Self {
        Self {
            kstack: 0,
            vm: None,
            trapframe: None,
            files: [const { None }; NOFILE],
            cwd: None,
        }
    }

    pub fn kstack(&self) -> usize {
        self.kstack
    }

    pub fn vm(&self) -> &UserVm {
        self.vm.as_ref().unwrap()
    }

    pub fn vm_mut(&mut self) -> &mut UserVm {
        self.vm.as_mut().unwrap()
    }

    /// Commits a freshly built image; the old one is freed.
    pub fn replace_vm(&mut self, vm: UserVm) {
        self.vm = Some(vm);
    }

    pub fn trapframe(&self) -> &TrapFrame {
        unsafe { self.trapframe.unwrap().as_ref() }
    }

    pub fn trapframe_mut(&mut self) -> &mut TrapFrame {
        unsafe { self.trapframe.unwrap().as_mut() }
    }

    pub fn file(&self, fd: usize) -> Result<&File> {
        self.files
            .get(fd)
            .and_then(Option::as_ref)
            .ok_or(Error::BadFileDescriptor(fd))
    }

    /// Places `file` in the lowest free descriptor slot.
    pub fn add_file(&mut self, file: File) -> Result<usize> {
        let (fd, slot) = self
            .files
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| slot.is_none())
            .ok_or(Error::OutOfFileDescriptors)?;
        *slot = Some(file);
        Ok(fd)
    }

    pub fn take_file(&mut self, fd: usize) -> Result<File> {
        self.files
            .get_mut(fd)
            .and_then(Option::take)
            .ok_or(Error::BadFileDescriptor(fd))
    }

    pub fn cwd(&self) -> &Inode {
        self.cwd.as_ref().unwrap()
    }

    /// Swaps the working directory, returning the old one for the caller
    /// to drop inside its transaction.
    pub fn swap_cwd(&mut self, cwd: Inode) -> Inode {
        self.cwd.replace(cwd).unwrap()
    }
}

/// One process-table slot.
pub struct Proc {
    shared: SpinLock<ProcShared>,
    parent: ParentLink,
    owned: UnsafeCell<ProcOwned>,
}

unsafe impl Sync for Proc {}

impl Proc {
    const fn new() -> Self {
        Self {
            shared: SpinLock::new(ProcShared::unused()),
            parent: ParentLink::none(),
            owned: UnsafeCell::new(ProcOwned::new()),
        }
    }

    /// The process running on this hart.
    pub fn current() -> &'static Self {
        Self::try_current().expect("no current process")
    }

    pub fn try_current() -> Option<&'static Self> {
        let p = interrupt::with_off(|| unsafe { Cpu::current().proc() })?;
        Some(unsafe { p.as_ref() })
    }

    pub fn shared(&self) -> &SpinLock<ProcShared> {
        &self.shared
    }

    /// The owned half.
    ///
    /// # Safety
    ///
    /// Only the process's own kernel thread may call this, and must not
    /// create overlapping references.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn owned_mut(&self) -> &mut ProcOwned {
        unsafe { &mut *self.owned.get() }
    }

    /// Finds an unused slot, marks it used, and prepares the trapframe,
    /// empty address space, and first-return context.
    fn allocate() -> Result<(&'static Self, SpinLockGuard<'static, ProcShared>)> {
        let (p, mut shared) = PROCS
            .iter()
            .find_map(|p| {
                let shared = p.shared.lock();
                (shared.state == ProcState::Unused).then_some((p, shared))
            })
            .ok_or(Error::OutOfProcSlots)?;

        shared.pid = Pid::next();
        shared.state = ProcState::Used;

        // SAFETY: the slot was Unused; no other thread references it.
        let owned = unsafe { p.owned_mut() };
        let prepared = (|| -> Result<()> {
            let tf = page::alloc()?.cast::<TrapFrame>();
            unsafe {
                tf.write(TrapFrame::zeroed());
            }
            owned.trapframe = Some(tf);
            owned.vm = Some(UserVm::new(owned.trapframe())?);

            // first scheduling enters fork_return on a fresh stack
            shared.context.reset();
            shared.context.ra = fork_return as usize as u64;
            shared.context.sp = (owned.kstack + KSTACK_PAGES * PAGE_SIZE) as u64;
            Ok(())
        })();

        if let Err(e) = prepared {
            p.release_slot(owned, &mut shared);
            return Err(e);
        }
        Ok((p, shared))
    }

    /// Returns a slot to the unused pool, freeing whatever `allocate` (and
    /// later life) hung off it. Caller holds the slot's lock.
    fn release_slot(&self, owned: &mut ProcOwned, shared: &mut SpinLockGuard<ProcShared>) {
        // drop the address space before the trapframe page it references
        owned.vm = None;
        if let Some(tf) = owned.trapframe.take() {
            unsafe {
                page::free(tf.cast());
            }
        }
        unsafe {
            self.parent.clear();
        }
        shared.pid = Pid::INVALID;
        shared.name.clear();
        shared.killed = false;
        shared.state = ProcState::Unused;
    }

    fn is_child_of(&self, parent: &Self, wait: &mut SpinLockGuard<wait_lock::WaitLock>) -> bool {
        self.parent
            .get(wait)
            .is_some_and(|pp| ptr::eq(pp.as_ptr(), parent))
    }
}

/// Enters this hart's scheduler; never returns.
pub fn scheduler_loop() -> ! {
    scheduler::run()
}

/// Records each slot's kernel stack address. Before the first allocation.
pub fn init() {
    for (i, p) in PROCS.iter().enumerate() {
        unsafe { p.owned_mut() }.kstack = kstack(i).addr();
    }
}

/// Maps one stack per slot into the kernel page table, guard gaps between.
pub fn map_kernel_stacks(table: &mut PageTable) {
    use crate::memory::{PhysAddr, page_table::PteFlags};

    for i in 0..NPROC {
        for page in 0..KSTACK_PAGES {
            let frame = page::alloc().unwrap();
            let va = kstack(i).byte_add(page * PAGE_SIZE).unwrap();
            table
                .map_page(va, PhysAddr::new(frame.addr().get()), PteFlags::RW)
                .unwrap();
        }
    }
}

/// Pid of the process on this hart, without taking its lock.
pub fn current_pid() -> Pid {
    interrupt::with_off(|| unsafe { Cpu::current().pid() })
}

/// The assembled `exec("/init", &["/init", 0])` shim loaded at user
/// address 0 of the first process. Falls into `exit` if exec fails.
static INIT_CODE: &[u8] = &[
    0x17, 0x05, 0x00, 0x00, // auipc a0, 0      ; a0 = "/init"
    0x13, 0x05, 0x45, 0x02, // addi a0, a0, 36
    0x97, 0x05, 0x00, 0x00, // auipc a1, 0      ; a1 = argv
    0x93, 0x85, 0x35, 0x02, // addi a1, a1, 35
    0x93, 0x08, 0x70, 0x00, // li a7, 7         ; exec
    0x73, 0x00, 0x00, 0x00, // ecall
    0x93, 0x08, 0x20, 0x00, // li a7, 2         ; exit
    0x73, 0x00, 0x00, 0x00, // ecall
    0xef, 0xf0, 0x9f, 0xff, // jal back to exit
    0x2f, 0x69, 0x6e, 0x69, // "/ini"
    0x74, 0x00, 0x00, 0x24, // "t\0" ; argv[0] = 0x24
    0x00, 0x00, 0x00, 0x00, //
    0x00, 0x00, 0x00, 0x00, // argv[1] = 0
    0x00, 0x00, 0x00, 0x00,
];

/// Creates the first user process around [`INIT_CODE`].
pub fn user_init() {
    let (p, mut shared) = Proc::allocate().expect("first process");
    INIT_PROC.store(ptr::from_ref(p).cast_mut(), Ordering::Release);

    let owned = unsafe { p.owned_mut() };
    owned.vm_mut().load_first(INIT_CODE).unwrap();

    // the very first kernel-to-user return
    let tf = owned.trapframe_mut();
    tf.epc = 0;
    tf.sp = PAGE_SIZE as u64;

    // root directory exists on any valid image; no disk access yet
    owned.cwd = Some(Inode::get_root());

    shared.name = ArrayString::from("initcode").unwrap();
    shared.state = ProcState::Runnable;
    drop(shared);
}

/// Grows or shrinks the current image by `delta` bytes.
pub fn grow(owned: &mut ProcOwned, delta: isize) -> Result<()> {
    let old = owned.vm().size();
    let new = old.checked_add_signed(delta).ok_or(Error::BadAddress(0))?;
    if new > old {
        owned
            .vm_mut()
            .grow_to(new, crate::memory::page_table::PteFlags::W)?;
    } else {
        owned.vm_mut().shrink_to(new);
    }
    Ok(())
}

/// Creates a copy of the calling process.
///
/// Returns the child pid in the parent; the child wakes up in
/// `fork_return` with 0 in `a0`.
pub fn fork(p: &'static Proc, owned: &mut ProcOwned) -> Result<Pid> {
    let name = p.shared.lock().name;

    let (child, mut child_shared) = Proc::allocate()?;
    let child_owned = unsafe { child.owned_mut() };

    if let Err(e) = owned.vm().clone_into(child_owned.vm_mut()) {
        child.release_slot(child_owned, &mut child_shared);
        return Err(e);
    }

    *child_owned.trapframe_mut() = owned.trapframe().clone();
    // fork returns 0 in the child
    child_owned.trapframe_mut().a0 = 0;

    for (ours, theirs) in owned.files.iter().zip(&mut child_owned.files) {
        *theirs = ours.as_ref().map(File::dup);
    }
    child_owned.cwd = Some(owned.cwd().dup());

    child_shared.name = name;
    let pid = child_shared.pid;
    drop(child_shared);

    let mut wait = wait_lock::lock();
    child.parent.set(Some(p.into()), &mut wait);
    drop(wait);

    child.shared.lock().state = ProcState::Runnable;

    Ok(pid)
}

/// Hands `p`'s children to the init process. Wait lock held.
fn reparent(p: &Proc, wait: &mut SpinLockGuard<wait_lock::WaitLock>) {
    let init = INIT_PROC.load(Ordering::Acquire);
    for child in &PROCS {
        if child.is_child_of(p, wait) {
            child.parent.set(NonNull::new(init), wait);
            wakeup(Chan::of(unsafe { &*init }));
        }
    }
}

/// Terminates the calling process with `status`; never returns.
///
/// The slot stays a zombie until the parent reaps it in [`wait`].
pub fn exit(p: &Proc, owned: &mut ProcOwned, status: i32) -> ! {
    assert!(
        !ptr::eq(p, INIT_PROC.load(Ordering::Acquire)),
        "init exited"
    );

    for file in &mut owned.files {
        if let Some(file) = file.take() {
            file.close();
        }
    }

    let tx = fs::begin_tx();
    owned.cwd.take().unwrap().attach(&tx).put();
    drop(tx);

    let mut wait = wait_lock::lock();

    reparent(p, &mut wait);

    // the parent may be blocked in wait()
    if let Some(parent) = p.parent.get(&mut wait) {
        wakeup(Chan::of(unsafe { parent.as_ref() }));
    }

    let mut shared = p.shared.lock();
    shared.state = ProcState::Zombie(status);
    drop(wait);

    scheduler::yield_to_scheduler(&mut shared);
    unreachable!("zombie scheduled");
}

/// Waits for any child to exit; copies its status to `status_addr` when
/// nonzero and frees the slot.
pub fn wait(p: &'static Proc, owned: &ProcOwned, status_addr: VirtAddr) -> Result<Pid> {
    let mut wait = wait_lock::lock();

    loop {
        let mut any_children = false;
        for child in &PROCS {
            if !child.is_child_of(p, &mut wait) {
                continue;
            }

            // the lock also ensures the child is out of exit()'s tail
            let mut child_shared = child.shared.lock();
            any_children = true;

            if let ProcState::Zombie(status) = child_shared.state {
                let pid = child_shared.pid;

                if status_addr != VirtAddr::ZERO
                    && owned.vm().copy_out(status_addr, &status).is_err()
                {
                    return Err(Error::BadAddress(status_addr.addr()));
                }

                // SAFETY: a zombie has no running kernel thread.
                let child_owned = unsafe { child.owned_mut() };
                child.release_slot(child_owned, &mut child_shared);
                return Ok(pid);
            }
            drop(child_shared);
        }

        if !any_children {
            return Err(Error::NoChildren);
        }
        if p.shared.lock().killed() {
            return Err(Error::Killed);
        }

        // sleep on our own slot; exit() wakes this channel
        wait = sleep(Chan::of(p), wait);
    }
}

/// Marks the process with `pid` killed and kicks it out of any sleep.
///
/// The victim actually dies at its next return to user mode.
pub fn kill(pid: Pid) -> Result<()> {
    for p in &PROCS {
        let mut shared = p.shared.lock();
        if shared.pid == pid && shared.state != ProcState::Unused {
            shared.killed = true;
            if matches!(shared.state, ProcState::Sleeping(_)) {
                shared.state = ProcState::Runnable;
            }
            return Ok(());
        }
    }
    Err(Error::ProcessNotFound(pid))
}

/// Gives up the CPU for one scheduling round.
pub fn yield_now(p: &Proc) {
    let mut shared = p.shared.lock();
    shared.state = ProcState::Runnable;
    scheduler::yield_to_scheduler(&mut shared);
}

/// First scheduling of every fresh process lands here, still holding the
/// process lock from the scheduler.
extern "C" fn fork_return() -> ! {
    static FIRST: AtomicBool = AtomicBool::new(true);

    let p = Proc::current();
    // the scheduler acquired our lock before switching here
    drop(unsafe { p.shared.steal_guard() });

    if FIRST.swap(false, Ordering::AcqRel) {
        // The file system brings itself up here rather than in main():
        // recovery sleeps on disk I/O, which needs a process context.
        fs::init_in_proc(fs::Dev::ROOT);
    }

    let owned = unsafe { p.owned_mut() };
    crate::interrupt::trap::return_to_user(owned);
}

/// Releases `guard`, sleeps on `chan`, and reacquires `guard`'s lock.
///
/// The process lock is taken before `guard` is released, so a concurrent
/// `wakeup` (which needs the process lock) cannot slip between the release
/// and the state change: no lost wakeups.
pub fn sleep<T>(chan: Chan, guard: SpinLockGuard<'_, T>) -> SpinLockGuard<'_, T> {
    let p = Proc::current();
    let mut shared = p.shared.lock();
    let lock = guard.into_lock();

    shared.state = ProcState::Sleeping(chan);
    scheduler::yield_to_scheduler(&mut shared);

    drop(shared);
    lock.lock()
}

/// Makes every process sleeping on `chan` runnable.
///
/// Callers must hold the condition's lock (the one the sleepers passed to
/// [`sleep`]).
pub fn wakeup(chan: Chan) {
    let me = Proc::try_current().map(ptr::from_ref);
    for p in &PROCS {
        if me == Some(ptr::from_ref(p)) {
            continue;
        }
        let mut shared = p.shared.lock();
        if shared.state == ProcState::Sleeping(chan) {
            shared.state = ProcState::Runnable;
        }
    }
}

/// Prints the process table. ^P from the console.
pub fn dump() {
    println!();
    for p in &PROCS {
        let shared = p.shared.lock();
        let (pid, state, name) = (shared.pid, shared.state, shared.name);
        drop(shared);

        if state == ProcState::Unused {
            continue;
        }
        let state = match state {
            ProcState::Unused => "unused",
            ProcState::Used => "used",
            ProcState::Sleeping(_) => "sleep",
            ProcState::Runnable => "ready",
            ProcState::Running => "run",
            ProcState::Zombie(_) => "zombie",
        };
        println!("{pid:5} {state:<8} {name}");
    }
}

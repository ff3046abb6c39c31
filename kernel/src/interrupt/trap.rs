//! Trap dispatch: classification and routing of every kernel entry.

use core::mem;

use riscv::{
    interrupt::{
        Trap,
        supervisor::{Exception, Interrupt},
    },
    register::{
        satp, scause, sepc,
        sstatus::{self, SPP},
        stval,
        stvec::{self, Stvec, TrapMode},
    },
};

use crate::{
    console::uart,
    cpu, fs, interrupt,
    memory::{
        PAGE_SIZE,
        layout::{KSTACK_PAGES, UART0_IRQ, VIRTIO0_IRQ},
    },
    println,
    proc::{self, Proc, ProcOwned},
    syscall,
};

use super::{kernel_vec, plic, timer, trampoline};

/// Saved user state, one page per process, mapped at the fixed trapframe
/// address in that process's space.
///
/// The four `kernel_*` fields are refreshed on every return to user; the
/// trampoline reads them on the next entry.
#[repr(C)]
#[derive(Debug, Clone)]
pub struct TrapFrame {
    /// Kernel page table for the trampoline to install.
    pub kernel_satp: u64,
    /// Top of this process's kernel stack.
    pub kernel_sp: u64,
    /// Address of `trap_from_user`.
    pub kernel_trap: u64,
    /// Saved user program counter.
    pub epc: u64,
    /// Hartid, restored into `tp`.
    pub kernel_hartid: u64,
    pub ra: u64,
    pub sp: u64,
    pub gp: u64,
    pub tp: u64,
    pub t0: u64,
    pub t1: u64,
    pub t2: u64,
    pub s0: u64,
    pub s1: u64,
    pub a0: u64,
    pub a1: u64,
    pub a2: u64,
    pub a3: u64,
    pub a4: u64,
    pub a5: u64,
    pub a6: u64,
    pub a7: u64,
    pub s2: u64,
    pub s3: u64,
    pub s4: u64,
    pub s5: u64,
    pub s6: u64,
    pub s7: u64,
    pub s8: u64,
    pub s9: u64,
    pub s10: u64,
    pub s11: u64,
    pub t3: u64,
    pub t4: u64,
    pub t5: u64,
    pub t6: u64,
}

impl TrapFrame {
    pub const fn zeroed() -> Self {
        // SAFETY: all fields are u64; all-zero is a valid value.
        unsafe { mem::zeroed() }
    }
}

fn install_kernel_vec() {
    let mut vec = Stvec::from_bits(0);
    vec.set_address(kernel_vec::kernelvec as usize);
    vec.set_trap_mode(TrapMode::Direct);
    unsafe {
        stvec::write(vec);
    }
}

/// Points this hart's traps at the kernel vector.
pub fn init_hart() {
    install_kernel_vec();
}

fn read_cause() -> Trap<Interrupt, Exception> {
    scause::read().cause().try_into().expect("unknown scause")
}

/// Entered (via the trampoline) on any trap from user mode.
pub extern "C" fn trap_from_user() {
    assert_eq!(sstatus::read().spp(), SPP::User, "trap not from user mode");

    // we are in the kernel now; traps go to kernelvec
    install_kernel_vec();

    let p = Proc::current();
    // SAFETY: this kernel thread owns the process's private half.
    let owned = unsafe { p.owned_mut() };

    owned.trapframe_mut().epc = sepc::read() as u64;

    let mut timer_tick = false;
    match read_cause() {
        Trap::Exception(Exception::UserEnvCall) => {
            if p.shared().lock().killed() {
                proc::exit(p, owned, -1);
            }

            // return past the ecall instruction
            owned.trapframe_mut().epc += 4;

            // done with sepc/scause/sstatus; interrupts may come in
            interrupt::enable();

            syscall::dispatch(p, owned);
        }
        Trap::Exception(e) => {
            // No demand paging: sbrk maps eagerly, so a user page fault is
            // a stray access like any other exception.
            report_user_fault(p, &e);
            p.shared().lock().kill();
        }
        Trap::Interrupt(int) => match route_interrupt(int) {
            IntSource::Timer => timer_tick = true,
            IntSource::Device => {}
            IntSource::Unknown => {
                report_user_fault(p, &int);
                p.shared().lock().kill();
            }
        },
    }

    if p.shared().lock().killed() {
        proc::exit(p, owned, -1);
    }

    if timer_tick {
        proc::yield_now(p);
    }

    return_to_user(owned);
}

fn report_user_fault(p: &Proc, cause: &dyn core::fmt::Debug) {
    let shared = p.shared().lock();
    let pid = shared.pid();
    let name = shared.name();
    println!("user trap: {cause:?} pid={pid} name={name}");
    println!("           sepc={:#x} stval={:#x}", sepc::read(), stval::read());
}

/// Restores user state and enters user mode through the trampoline.
pub fn return_to_user(owned: &mut ProcOwned) -> ! {
    // about to point stvec at uservec, which must not run until we are
    // back in user mode
    interrupt::disable();

    let mut vec = Stvec::from_bits(0);
    vec.set_address(trampoline::user_vec_addr().addr());
    vec.set_trap_mode(TrapMode::Direct);
    unsafe {
        stvec::write(vec);
    }

    // what uservec needs on the next trap
    let kstack_top = owned.kstack() + KSTACK_PAGES * PAGE_SIZE;
    let kernel_satp = satp::read().bits() as u64;
    let tf = owned.trapframe_mut();
    tf.kernel_satp = kernel_satp;
    tf.kernel_sp = kstack_top as u64;
    tf.kernel_trap = trap_from_user as usize as u64;
    tf.kernel_hartid = cpu::id() as u64;

    unsafe {
        // sret will drop to user mode with interrupts re-enabled
        sstatus::set_spp(SPP::User);
        sstatus::set_spie();
        sepc::write(owned.trapframe().epc as usize);
    }

    let user_satp = owned.vm().satp();

    let enter: extern "C" fn(usize) -> ! =
        unsafe { mem::transmute(trampoline::user_ret_addr().addr()) };
    enter(user_satp)
}

/// Interrupts and exceptions while in supervisor mode.
///
/// Runs on the interrupted kernel stack via `kernelvec`.
pub extern "C" fn trap_from_kernel() {
    let saved_sepc = sepc::read();
    let saved_sstatus = sstatus::read();

    assert_eq!(saved_sstatus.spp(), SPP::Supervisor, "trap not from kernel");
    assert!(!interrupt::is_enabled());

    match read_cause() {
        Trap::Exception(e) => {
            println!("kernel trap: {e:?}");
            println!(
                "             sepc={:#x} stval={:#x}",
                saved_sepc,
                stval::read()
            );
            panic!("unexpected exception in the kernel");
        }
        Trap::Interrupt(int) => match route_interrupt(int) {
            IntSource::Timer => {
                // preempt whoever was running, if anyone
                if let Some(p) = Proc::try_current() {
                    proc::yield_now(p);
                }
            }
            IntSource::Device => {}
            IntSource::Unknown => {
                println!("kernel trap: {int:?} stval={:#x}", stval::read());
                panic!("unexpected interrupt in the kernel");
            }
        },
    }

    // yield_now may have run other traps; restore for kernelvec's sret
    unsafe {
        sepc::write(saved_sepc);
        sstatus::write(saved_sstatus);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IntSource {
    Timer,
    Device,
    Unknown,
}

/// Classifies an interrupt and runs the matching driver handler.
fn route_interrupt(int: Interrupt) -> IntSource {
    match int {
        Interrupt::SupervisorTimer => {
            timer::on_tick();
            IntSource::Timer
        }
        Interrupt::SupervisorExternal => {
            let irq = plic::claim();
            match irq {
                0 => {}
                UART0_IRQ => uart::handle_interrupt(),
                VIRTIO0_IRQ => fs::virtio_disk::handle_interrupt(),
                other => println!("unexpected PLIC irq {other}"),
            }
            // a device may raise one interrupt at a time; completion
            // re-arms it
            if irq != 0 {
                plic::complete(irq);
            }
            IntSource::Device
        }
        Interrupt::SupervisorSoft => IntSource::Unknown,
    }
}

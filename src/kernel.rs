//! # Kernel Entry Points
//!
//! The global kernel instance and everything that crosses the privilege
//! boundary: the supervisor-call dispatcher on the kernel side, and the
//! task-facing API wrappers that reach it by executing `svc`.
//!
//! ## Startup Sequence
//!
//! ```text
//! reset_handler (cortex-m-rt)
//!   └─► main()
//!         ├─► kernel::init()            ← SVC #18: clean kernel + heap
//!         ├─► kernel::create_task()     ← SVC #2/#3: register tasks (×N)
//!         └─► kernel::start()           ← configure SysTick, SVC #0
//!               └─► first dispatch: tasks run unprivileged on the PSP
//! ```
//!
//! ## Calling convention
//!
//! A wrapper places its arguments in r0/r1 and traps; the dispatcher
//! reads them from the hardware-stacked frame and writes the result over
//! the stacked r0, which the hardware restores into the caller's r0.
//! Yield-style calls first update the task table under a masked section,
//! then trap with SVC #1 so the switch completes on exception return.

use core::arch::asm;
use core::ptr::NonNull;

use crate::arch::cortex_m4 as arch;
use crate::scheduler::Scheduler;
use crate::svc;
use crate::sync;
use crate::task::{TaskId, TaskInfo, TaskInit, TaskState};

// ---------------------------------------------------------------------------
// Global kernel instance
// ---------------------------------------------------------------------------

/// The one kernel. All access goes through [`KERNEL_PTR`].
static mut KERNEL: Scheduler = Scheduler::new();

/// Raw pointer to the kernel for the exception handlers, which cannot
/// carry a reference. Set once in [`init`], before the first trap.
#[no_mangle]
pub static mut KERNEL_PTR: *mut Scheduler = core::ptr::null_mut();

/// # Safety
/// Only meaningful after [`init`]; callers run in a masked section or in
/// handler context, which serializes access on this single core.
unsafe fn kernel() -> &'static mut Scheduler {
    &mut *KERNEL_PTR
}

// ---------------------------------------------------------------------------
// Kernel lifecycle API
// ---------------------------------------------------------------------------

/// Reset the kernel to a clean pre-start state: empty task table, ready
/// null task, fresh heap over the linker-delimited region.
///
/// Must run before any task is created. Calling it again re-initializes
/// everything.
pub fn init() {
    unsafe {
        KERNEL_PTR = core::ptr::addr_of_mut!(KERNEL);
        asm!("svc #18");
    }
}

/// Start multitasking. **Does not return on success.**
///
/// Configures the 1 ms SysTick and the exception priorities, commits the
/// earliest-deadline task as the first to run, and traps so the first
/// dispatch happens by exception return. Fails if [`init`] has not run,
/// the kernel is already running, or no task has been created.
pub fn start(mut core_peripherals: cortex_m::Peripherals) -> Result<(), ()> {
    unsafe {
        if KERNEL_PTR.is_null() {
            return Err(());
        }
    }

    arch::configure_systick(&mut core_peripherals.SYST);
    arch::set_exception_priorities();

    sync::critical_section(|_cs| unsafe { kernel().start_prepare() })?;

    unsafe { asm!("svc #0", options(noreturn)) }
}

// ---------------------------------------------------------------------------
// Task API
// ---------------------------------------------------------------------------

/// Create a task with the default deadline. On success the assigned
/// identifier (also written back into `init`) is returned.
pub fn create_task(init: &mut TaskInit) -> Result<TaskId, ()> {
    let arg = init as *mut TaskInit as usize;
    let code: usize;
    unsafe { asm!("svc #2", inout("r0") arg => code) };
    if code == svc::OK {
        Ok(init.tid)
    } else {
        Err(())
    }
}

/// Create a periodic task with deadline and period `deadline` ticks.
pub fn create_deadline_task(deadline: u32, init: &mut TaskInit) -> Result<TaskId, ()> {
    let arg = init as *mut TaskInit as usize;
    let code: usize;
    unsafe { asm!("svc #3", inout("r0") deadline as usize => code, in("r1") arg) };
    if code == svc::OK {
        Ok(init.tid)
    } else {
        Err(())
    }
}

/// Re-deadline a ready or running task. A tighter deadline than the
/// caller's may switch before this returns.
pub fn set_deadline(deadline: u32, tid: TaskId) -> Result<(), ()> {
    let code: usize;
    unsafe { asm!("svc #4", inout("r0") deadline as usize => code, in("r1") tid) };
    if code == svc::OK {
        Ok(())
    } else {
        Err(())
    }
}

/// Snapshot of task `tid`'s state.
pub fn task_info(tid: TaskId) -> Result<TaskInfo, ()> {
    let mut info = TaskInfo::empty();
    let out = &mut info as *mut TaskInfo as usize;
    let code: usize;
    unsafe { asm!("svc #5", inout("r0") tid => code, in("r1") out) };
    if code == svc::OK {
        Ok(info)
    } else {
        Err(())
    }
}

/// Identifier of the calling task.
pub fn current_tid() -> TaskId {
    let tid: usize;
    unsafe { asm!("svc #15", out("r0") tid) };
    tid
}

/// Give up the CPU. The caller stays ready and runs again when the
/// scheduler next picks it; equal-deadline peers get their turn first.
pub fn yield_task() {
    let handoff = sync::critical_section(|_cs| unsafe { kernel().prepare_yield() });
    if handoff {
        unsafe { asm!("svc #1") };
    }
}

/// Sleep for `ms` milliseconds. With no other task ready the CPU halts
/// in place until the wake tick; otherwise the successor runs.
pub fn sleep(ms: u32) {
    let verdict = sync::critical_section(|_cs| unsafe { kernel().prepare_sleep(ms) });
    match verdict {
        Ok(Some(_successor)) => unsafe { asm!("svc #1") },
        Ok(None) => {
            let me = sync::critical_section(|_cs| unsafe { kernel().current_tid() });
            while sync::critical_section(|_cs| unsafe { kernel().task_state(me) })
                == TaskState::Sleeping
            {
                cortex_m::asm::wfi();
            }
        }
        Err(()) => {}
    }
}

/// Sleep out the remainder of the caller's period. At the period
/// boundary this refills the slice and returns immediately, so a
/// periodic task calling it in a loop runs once per period.
pub fn period_yield() {
    let remaining = sync::critical_section(|_cs| unsafe { kernel().period_sleep_ms() });
    if let Some(ms) = remaining {
        sleep(ms);
    }
}

/// Terminate the calling task and return its stack to the heap. The
/// null task cannot exit; for it this is a no-op.
pub fn exit_task() {
    unsafe { asm!("svc #17") };
}

// ---------------------------------------------------------------------------
// Memory API
// ---------------------------------------------------------------------------

/// Rebuild the heap from scratch. Fails before [`init`].
pub fn mem_init() -> Result<(), ()> {
    let code: usize;
    unsafe { asm!("svc #7", out("r0") code) };
    if code == svc::OK {
        Ok(())
    } else {
        Err(())
    }
}

/// Allocate `size` bytes owned by the calling task.
pub fn mem_alloc(size: usize) -> Option<NonNull<u8>> {
    let ptr: usize;
    unsafe { asm!("svc #8", inout("r0") size => ptr) };
    NonNull::new(ptr as *mut u8)
}

/// Free an allocation made by the calling task (null is a no-op).
/// Freeing another task's memory is refused.
pub fn mem_dealloc(ptr: *mut u8) -> Result<(), ()> {
    let code: usize;
    unsafe { asm!("svc #9", inout("r0") ptr as usize => code) };
    if code == svc::OK {
        Ok(())
    } else {
        Err(())
    }
}

/// Number of free blocks too small to serve a `size`-byte request.
pub fn mem_count_extfrag(size: usize) -> usize {
    let count: usize;
    unsafe { asm!("svc #10", inout("r0") size => count) };
    count
}

// ---------------------------------------------------------------------------
// Kernel-side trap handling
// ---------------------------------------------------------------------------

/// Demultiplex one supervisor call. `frame` is the hardware-stacked
/// exception frame; arguments are read from its r0/r1 slots and the
/// result is written over r0 before the hardware restores it.
///
/// Called from the `SVCall` handler with the frame of whichever stack
/// the caller was on.
#[no_mangle]
pub(crate) unsafe extern "C" fn svc_dispatch(frame: *mut usize) {
    let k = kernel();

    match svc::number(frame) {
        svc::SVC_START => {
            // First dispatch: adopt the prepared task's stack and
            // exception-return into it. Never comes back.
            arch::start_first_task(k.target_stack());
        }

        svc::SVC_YIELD => {
            k.finalize_switch();
            arch::pend_switch();
        }

        svc::SVC_CREATE_TASK => {
            let init = *frame.add(svc::FRAME_R0) as *mut TaskInit;
            let mut code = svc::ERROR;
            if !init.is_null() {
                if let Ok(tid) = k.create_task(&mut *init) {
                    code = svc::OK;
                    if k.preempts_current(tid) && k.schedule_switch() {
                        arch::pend_switch();
                    }
                }
            }
            *frame.add(svc::FRAME_R0) = code;
        }

        svc::SVC_CREATE_DEADLINE_TASK => {
            let deadline = *frame.add(svc::FRAME_R0) as u32;
            let init = *frame.add(svc::FRAME_R1) as *mut TaskInit;
            let mut code = svc::ERROR;
            if !init.is_null() {
                if let Ok(tid) = k.create_deadline_task(deadline, &mut *init) {
                    code = svc::OK;
                    if k.preempts_current(tid) && k.schedule_switch() {
                        arch::pend_switch();
                    }
                }
            }
            *frame.add(svc::FRAME_R0) = code;
        }

        svc::SVC_SET_DEADLINE => {
            let deadline = *frame.add(svc::FRAME_R0) as u32;
            let tid = *frame.add(svc::FRAME_R1);
            let result = cortex_m::interrupt::free(|_cs| k.set_deadline(deadline, tid));
            match result {
                Ok(()) => {
                    *frame.add(svc::FRAME_R0) = svc::OK;
                    if k.preempts_current(tid) && k.schedule_switch() {
                        arch::pend_switch();
                    }
                }
                Err(()) => *frame.add(svc::FRAME_R0) = svc::ERROR,
            }
        }

        svc::SVC_TASK_INFO => {
            let tid = *frame.add(svc::FRAME_R0);
            let out = *frame.add(svc::FRAME_R1) as *mut TaskInfo;
            let mut code = svc::ERROR;
            if !out.is_null() {
                if let Ok(info) = k.task_info(tid) {
                    *out = info;
                    code = svc::OK;
                }
            }
            *frame.add(svc::FRAME_R0) = code;
        }

        svc::SVC_MEM_INIT => {
            *frame.add(svc::FRAME_R0) = match k.mem_init() {
                Ok(()) => svc::OK,
                Err(()) => svc::ERROR,
            };
        }

        svc::SVC_MEM_ALLOC => {
            let size = *frame.add(svc::FRAME_R0);
            let owner = k.current_tid();
            *frame.add(svc::FRAME_R0) = match k.heap.alloc(size, owner) {
                Some(p) => p.as_ptr() as usize,
                None => 0,
            };
        }

        svc::SVC_MEM_DEALLOC => {
            let ptr = *frame.add(svc::FRAME_R0) as *mut u8;
            let caller = k.current_tid();
            *frame.add(svc::FRAME_R0) = match k.heap.dealloc(ptr, caller) {
                Ok(()) => svc::OK,
                Err(()) => svc::ERROR,
            };
        }

        svc::SVC_MEM_COUNT_EXTFRAG => {
            let size = *frame.add(svc::FRAME_R0);
            *frame.add(svc::FRAME_R0) = k.heap.count_extfrag(size);
        }

        svc::SVC_GET_TID => {
            *frame.add(svc::FRAME_R0) = k.current_tid();
        }

        svc::SVC_TASK_EXIT => {
            if k.exit_current() {
                arch::pend_switch();
            }
        }

        svc::SVC_KERNEL_INIT => {
            let (lo, hi) = arch::heap_region();
            k.kernel_init(lo, hi);
        }

        // Reserved numbers fall through untouched.
        _ => {}
    }
}

/// PendSV-side stack swap: store the outgoing PSP, return the target's.
/// The handler wraps this with the r4–r11 save/restore.
#[no_mangle]
pub(crate) unsafe extern "C" fn pendsv_swap(psp: *mut usize) -> *mut usize {
    kernel().context_switch(psp)
}

//! # Cortex-M4 Port Layer
//!
//! Everything that must be expressed in Thumb-2 assembly or against
//! system registers: the SysTick timer, the exception priorities, the
//! `SVCall`/`PendSV`/`SysTick` handlers, process-stack-pointer handling,
//! and the first-task launch. The kernel core stays portable behind this
//! boundary.
//!
//! ## Context Switch Mechanism
//!
//! The Cortex-M4 runs the kernel on the MSP and tasks on the PSP. On
//! exception entry the hardware stacks r0–r3, r12, lr, pc and xPSR onto
//! the interrupted stack; the PendSV handler adds r4–r11, trades stack
//! pointers through the kernel, and exception-returns, letting the
//! hardware unstack the target's frame. PendSV sits at the lowest
//! priority so the swap tail-chains after every other exception has
//! finished — register state for two exceptions is never stacked on a
//! task stack.

use core::arch::naked_asm;

use cortex_m::peripheral::syst::SystClkSource;

use crate::config::{HEAP_GUARD, MAIN_STACK_RESERVE, SYSTEM_CLOCK_HZ, TICK_HZ};

// ---------------------------------------------------------------------------
// SysTick configuration
// ---------------------------------------------------------------------------

/// Run SysTick off the processor clock at [`TICK_HZ`]. Every tick drives
/// the sleep queue and the deadline countdowns.
pub fn configure_systick(syst: &mut cortex_m::peripheral::SYST) {
    let reload = SYSTEM_CLOCK_HZ / TICK_HZ - 1;
    syst.set_reload(reload);
    syst.clear_current();
    syst.set_clock_source(SystClkSource::Core);
    syst.enable_counter();
    syst.enable_interrupt();
}

// ---------------------------------------------------------------------------
// Exception priorities
// ---------------------------------------------------------------------------

/// Drop PendSV and SysTick to the lowest priority (0xFF in SHPR3).
/// SVC keeps its higher default, so a system call is never torn by the
/// tick, and the context switch runs only once no other handler is
/// active.
pub fn set_exception_priorities() {
    // System Handler Priority Register 3: PendSV [23:16], SysTick [31:24].
    const SHPR3: *mut u32 = 0xE000_ED20 as *mut u32;
    unsafe {
        let val = core::ptr::read_volatile(SHPR3);
        core::ptr::write_volatile(SHPR3, val | (0xFF << 16) | (0xFF << 24));
    }
}

// ---------------------------------------------------------------------------
// Deferred switch request
// ---------------------------------------------------------------------------

/// Pend the PendSV exception and synchronize, so the switch is taken as
/// soon as the exception priority allows.
#[inline]
pub fn pend_switch() {
    // Interrupt Control and State Register, PENDSVSET is bit 28.
    const ICSR: *mut u32 = 0xE000_ED04 as *mut u32;
    unsafe {
        core::ptr::write_volatile(ICSR, 1 << 28);
    }
    cortex_m::asm::dsb();
    cortex_m::asm::isb();
}

// ---------------------------------------------------------------------------
// Heap region from the linker
// ---------------------------------------------------------------------------

/// Heap bounds: just past the loaded image (plus a guard gap), up to the
/// main-stack top minus its reservation. `__sheap` and `_stack_start`
/// come from the cortex-m-rt link script.
pub fn heap_region() -> (*mut u8, *mut u8) {
    extern "C" {
        static mut __sheap: u8;
        static _stack_start: u8;
    }

    let lo = unsafe { core::ptr::addr_of_mut!(__sheap) } as usize + HEAP_GUARD;
    let hi = unsafe { core::ptr::addr_of!(_stack_start) } as usize - MAIN_STACK_RESERVE;
    (lo as *mut u8, hi as *mut u8)
}

// ---------------------------------------------------------------------------
// First task launch
// ---------------------------------------------------------------------------

/// Exception-return into the first task.
///
/// `sp` points at a full 16-word primed frame. The software half
/// (r4–r11) is popped here, the PSP is left on the hardware half, and
/// CONTROL is set so Thread mode runs unprivileged on the PSP. The
/// magic link value 0xFFFFFFFD makes the return unstack from the PSP.
///
/// # Safety
/// Must be called from handler mode (the start trap), exactly once,
/// with a primed frame.
#[unsafe(naked)]
pub unsafe extern "C" fn start_first_task(sp: *mut usize) -> ! {
    naked_asm!(
        "ldmia r0!, {{r4-r11}}",
        "msr psp, r0",
        "movs r0, #3", // Thread mode: PSP, unprivileged
        "msr control, r0",
        "isb",
        "mvn lr, #2", // EXC_RETURN 0xFFFFFFFD: Thread mode, PSP
        "bx lr",
    )
}

// ---------------------------------------------------------------------------
// Exception handlers
// ---------------------------------------------------------------------------

/// PendSV — the context switch itself.
///
/// 1. Push r4–r11 below the hardware frame on the outgoing PSP
/// 2. Trade stack pointers through the kernel (`pendsv_swap`)
/// 3. Pop the target's r4–r11, install its PSP
/// 4. Exception-return; the hardware unstacks the rest
#[unsafe(naked)]
#[no_mangle]
pub unsafe extern "C" fn PendSV() {
    naked_asm!(
        "mrs r0, psp",
        "stmdb r0!, {{r4-r11}}",
        "bl {swap}", // in: outgoing psp, out: target psp
        "ldmia r0!, {{r4-r11}}",
        "msr psp, r0",
        "mvn lr, #2",
        "bx lr",
        swap = sym crate::kernel::pendsv_swap,
    )
}

/// SVCall — the system-call gate.
///
/// Bit 2 of the link value says which stack the caller's frame went to;
/// that frame pointer is the dispatcher's argument and result channel.
#[unsafe(naked)]
#[no_mangle]
pub unsafe extern "C" fn SVCall() {
    naked_asm!(
        "tst lr, #4",
        "ite eq",
        "mrseq r0, msp",
        "mrsne r0, psp",
        "push {{r4, lr}}",
        "bl {dispatch}",
        "pop {{r4, pc}}",
        dispatch = sym crate::kernel::svc_dispatch,
    )
}

/// SysTick — the scheduler tick.
///
/// Ages slices, wakes sleepers, and pends a switch when a strictly more
/// urgent task than the incumbent is ready.
#[no_mangle]
pub unsafe extern "C" fn SysTick() {
    let ptr = crate::kernel::KERNEL_PTR;
    if ptr.is_null() {
        return;
    }
    let k = &mut *ptr;
    if !k.is_running() {
        return;
    }
    if k.tick() && k.schedule_switch() {
        pend_switch();
    }
}

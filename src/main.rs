//! # Demo Firmware
//!
//! Three periodic tasks sharing counters:
//!
//! | Task | Deadline | Behavior |
//! |------|----------|----------|
//! | `sampler_task` | 4 ms | snapshots both counters once per period |
//! | `producer_task` | 4 ms | increments the sample counter |
//! | `sweeper_task` | 12 ms | slow housekeeping pass |
//!
//! The two 4 ms tasks share the earliest deadline, so they alternate in
//! round-robin order; the 12 ms task runs whenever both are sleeping out
//! their period. Each body does its work and calls `period_yield`, which
//! puts it to sleep until its next period boundary.

#![cfg_attr(all(target_arch = "arm", target_os = "none"), no_std)]
#![cfg_attr(all(target_arch = "arm", target_os = "none"), no_main)]

#[cfg(all(target_arch = "arm", target_os = "none"))]
mod firmware {
    use core::ffi::c_void;
    use core::sync::atomic::{AtomicU32, Ordering};

    use cortex_m_rt::entry;
    use panic_halt as _;

    use edfos::config::MIN_STACK_SIZE;
    use edfos::kernel;
    use edfos::task::TaskInit;

    /// Monotonic counter fed by the producer.
    static SAMPLES: AtomicU32 = AtomicU32::new(0);
    /// Last value the sampler observed; watchable from a debugger.
    static LAST_SEEN: AtomicU32 = AtomicU32::new(0);
    /// Housekeeping passes completed.
    static SWEEPS: AtomicU32 = AtomicU32::new(0);

    /// Reads the shared counters once per 4 ms period.
    extern "C" fn sampler_task(_arg: *mut c_void) {
        loop {
            let seen = SAMPLES.load(Ordering::Relaxed);
            LAST_SEEN.store(seen, Ordering::Relaxed);
            kernel::period_yield();
        }
    }

    /// Produces one sample per 4 ms period.
    extern "C" fn producer_task(_arg: *mut c_void) {
        loop {
            SAMPLES.fetch_add(1, Ordering::Relaxed);
            kernel::period_yield();
        }
    }

    /// Slow background pass every 12 ms.
    extern "C" fn sweeper_task(_arg: *mut c_void) {
        loop {
            SWEEPS.fetch_add(1, Ordering::Relaxed);
            kernel::period_yield();
        }
    }

    #[entry]
    fn main() -> ! {
        let cp = cortex_m::Peripherals::take().unwrap();

        kernel::init();

        let mut init = TaskInit::new(sampler_task, MIN_STACK_SIZE);
        kernel::create_deadline_task(4, &mut init).expect("create sampler_task");

        init.entry = Some(producer_task);
        kernel::create_deadline_task(4, &mut init).expect("create producer_task");

        init.entry = Some(sweeper_task);
        kernel::create_deadline_task(12, &mut init).expect("create sweeper_task");

        // Does not return once the first task is dispatched.
        let _ = kernel::start(cp);
        loop {
            cortex_m::asm::wfi();
        }
    }
}

#[cfg(not(all(target_arch = "arm", target_os = "none")))]
fn main() {}

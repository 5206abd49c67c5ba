//! # edfos — an Earliest-Deadline-First RTOS kernel
//!
//! A small preemptive real-time kernel for single-core ARM Cortex-M4
//! microcontrollers. Up to sixteen tasks are multiplexed under an
//! earliest-deadline-first policy with round-robin rotation among
//! equal-deadline peers; stacks and user allocations come from a
//! first-fit heap; and every privileged operation is reached through a
//! supervisor-call gate, so tasks run unprivileged on their own process
//! stacks.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                  Application Tasks (PSP)                │
//! ├─────────────────────────────────────────────────────────┤
//! │              Task API (kernel.rs) — svc #N              │
//! │   create · start · yield · sleep · period_yield · exit  │
//! │   set_deadline · task_info · mem_alloc/dealloc/...      │
//! ├───────────────────────────┬─────────────────────────────┤
//! │  Kernel core              │  First-fit heap             │
//! │  scheduler.rs             │  heap.rs                    │
//! │  ─ EDF select + RR ties   │  ─ address-sorted free list │
//! │  ─ tick & sleep engine    │  ─ split / coalesce         │
//! │  ─ task factory & exit    │  ─ owner-checked free       │
//! ├───────────────────────────┴─────────────────────────────┤
//! │        Task model (task.rs) · SVC table (svc.rs)        │
//! ├─────────────────────────────────────────────────────────┤
//! │        Port (arch/cortex_m4.rs)                         │
//! │   SVCall · PendSV · SysTick · PSP · first dispatch      │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Scheduling Model
//!
//! A scheduling decision happens at a tick, a yield or sleep, task
//! creation, a deadline change, or task exit — never in the middle of
//! anything else. The decision rewrites the task table and pends PendSV;
//! the register-level switch then tail-chains at the lowest exception
//! priority, so it runs only once every other handler has finished.
//! Slot 0 holds the null task: an idle `wfi` loop with an infinite
//! deadline that carries the CPU whenever no user task is ready.
//!
//! ## Memory Model
//!
//! - One heap between the image end and the reserved main stack,
//!   first-fit over an address-sorted free list, owner-checked frees
//! - Task stacks are heap blocks owned by their task
//! - All kernel state lives in one static [`scheduler::Scheduler`];
//!   mutation is serialized by the SVC gate and masked sections
//! - Errors are integer codes at the trap boundary, `Result` inside;
//!   the kernel has no panic path
//!
//! The kernel core, heap, and task model are portable and unit-tested on
//! the host; only `arch` and `kernel` require the target.

#![no_std]

pub mod config;
pub mod heap;
pub mod scheduler;
pub mod svc;
pub mod sync;
pub mod task;

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod arch;
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod kernel;

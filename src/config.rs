//! # Kernel Configuration
//!
//! Compile-time constants governing the task table, the scheduler tick,
//! and the heap layout. All limits are fixed at compile time — the kernel
//! allocates only from the linker-delimited heap region.

/// Maximum number of task slots, including the null task at slot 0.
/// Task identifiers are indices into the task table; a dormant slot
/// becomes reusable.
pub const MAX_TASKS: usize = 16;

/// Smallest stack a task may be created with, in bytes. Covers the
/// 16-word initial exception frame plus working headroom.
pub const MIN_STACK_SIZE: usize = 1024;

/// Deadline (and time slice) in ticks for tasks created without an
/// explicit deadline.
pub const DEFAULT_DEADLINE: u32 = 5;

/// Deadline of the null task. Any real deadline beats it, so the null
/// task runs only when nothing else is ready.
pub const DEADLINE_INFINITE: u32 = u32::MAX;

/// SysTick frequency in Hz. One tick is the scheduler's time unit, so
/// deadlines and sleep durations are milliseconds at 1 kHz.
pub const TICK_HZ: u32 = 1000;

/// System clock frequency in Hz (STM32F4 on the 16 MHz HSI).
pub const SYSTEM_CLOCK_HZ: u32 = 16_000_000;

/// Bytes of statically reserved stack for the null task. It only ever
/// runs a `wfi` loop, so an exception frame plus headroom suffices.
pub const IDLE_STACK_SIZE: usize = 256;

/// Word written into every scratch-register slot of a freshly primed
/// stack frame. Recognizable in a debugger as never-written state.
pub const STACK_FILL: usize = 0xAAAA_AAAA;

/// xPSR for a fresh task frame: thumb bit (bit 24) set, all else clear.
pub const XPSR_THUMB: usize = 1 << 24;

/// Safety gap in bytes between the end of the loaded image and the first
/// heap byte.
pub const HEAP_GUARD: usize = 0x200;

/// Bytes below the main-stack top excluded from the heap. Exception
/// handlers and pre-start code run on this stack.
pub const MAIN_STACK_RESERVE: usize = 0x1000;

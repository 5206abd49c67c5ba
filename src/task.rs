//! # Task Model
//!
//! Defines the task control block and its lifecycle states. Tasks live in
//! a fixed-size table inside the kernel; a task identifier is the slot
//! index, so identifiers are reused once a slot returns to [`Dormant`].
//!
//! [`Dormant`]: TaskState::Dormant

use core::ffi::c_void;
use core::ptr;

use crate::config::DEFAULT_DEADLINE;

/// Task identifier: an index into the kernel's task table.
pub type TaskId = usize;

/// Identifier of the null task. Slot 0 idles when nothing else is ready
/// and acts as the privileged owner for kernel-made heap allocations.
pub const TID_NULL: TaskId = 0;

/// A task body. The argument pointer is opaque to the kernel; a fresh
/// frame primes it with the scratch sentinel, so bodies that ignore it
/// lose nothing.
pub type TaskEntry = extern "C" fn(*mut c_void);

// ---------------------------------------------------------------------------
// Task state machine
// ---------------------------------------------------------------------------

/// Execution state of a task.
///
/// ```text
///   ┌─────────┐  create   ┌───────┐  dispatch  ┌─────────┐
///   │ Dormant │ ────────► │ Ready │ ─────────► │ Running │
///   └─────────┘           └───────┘ ◄───────── └─────────┘
///        ▲                    ▲    yield/preempt    │
///        │                    │ wake        sleep   ▼
///        │                ┌──────────┐         ┌──────────┐
///        └─────────────── │ Sleeping │ ◄────── │ (exit)   │
///             exit        └──────────┘         └──────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Slot is unused; no entry point, no stack.
    Dormant,
    /// Schedulable and waiting for the CPU.
    Ready,
    /// Currently executing. At most one task at a time.
    Running,
    /// Waiting for its sleep countdown to reach zero.
    Sleeping,
}

// ---------------------------------------------------------------------------
// Task Control Block
// ---------------------------------------------------------------------------

/// Task Control Block (TCB) — per-task kernel state.
///
/// Stacks are not inline: the task factory allocates each stack from the
/// kernel heap and records the ownership handle in `stack_base` so the
/// memory returns to the heap on exit. `stack_saved` holds the process
/// stack pointer while the task is switched out.
pub struct Tcb {
    /// Task body, `None` while the slot is dormant.
    pub entry: Option<TaskEntry>,
    /// Heap handle backing the stack; the exact pointer the allocator
    /// returned, used to free it. Null for the null task.
    pub stack_base: *mut u8,
    /// Byte address one past the top of the stack (full-descending).
    pub stack_high: usize,
    /// Saved process stack pointer while the task is not running.
    pub stack_saved: *mut usize,
    /// Allocated stack size in bytes.
    pub stack_size: usize,
    /// This slot's own identifier.
    pub tid: TaskId,
    /// Lifecycle state.
    pub state: TaskState,
    /// True until the task has been dispatched once; a fresh task needs
    /// its initial exception frame built before the first switch to it.
    pub fresh: bool,
    /// Configured deadline / time slice in ticks.
    pub deadline: u32,
    /// Ticks remaining in the current slice or period.
    pub time_left: u32,
    /// Ticks until a sleeping task becomes ready again.
    pub sleep_left: u32,
    /// Periodic tasks refill their slice only at period boundaries.
    pub is_periodic: bool,
}

impl Tcb {
    /// An unused slot. Used to build the table in const context.
    pub const EMPTY: Tcb = Tcb {
        entry: None,
        stack_base: ptr::null_mut(),
        stack_high: 0,
        stack_saved: ptr::null_mut(),
        stack_size: 0,
        tid: 0,
        state: TaskState::Dormant,
        fresh: true,
        deadline: DEFAULT_DEADLINE,
        time_left: 0,
        sleep_left: 0,
        is_periodic: false,
    };

    /// Return the slot to its dormant default, keeping only the identifier.
    pub fn reset(&mut self, tid: TaskId) {
        *self = Tcb::EMPTY;
        self.tid = tid;
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        self.state == TaskState::Ready
    }
}

// ---------------------------------------------------------------------------
// User-facing task descriptors
// ---------------------------------------------------------------------------

/// Creation parameters handed to the task factory. The factory writes the
/// assigned identifier and the resulting stack top back into it, so the
/// same value can be reused to create several tasks.
pub struct TaskInit {
    /// Task body. Required.
    pub entry: Option<TaskEntry>,
    /// Requested stack size in bytes; at least [`MIN_STACK_SIZE`].
    ///
    /// [`MIN_STACK_SIZE`]: crate::config::MIN_STACK_SIZE
    pub stack_size: usize,
    /// Written by the factory: the assigned identifier.
    pub tid: TaskId,
    /// Written by the factory: byte address of the stack top.
    pub stack_high: usize,
}

impl TaskInit {
    /// Creation request for `entry` with a `stack_size`-byte stack.
    pub const fn new(entry: TaskEntry, stack_size: usize) -> Self {
        TaskInit {
            entry: Some(entry),
            stack_size,
            tid: 0,
            stack_high: 0,
        }
    }
}

/// Copy-out snapshot of one task's state, filled in by the task-info
/// system call. Deliberately pointer-free: handing saved stack pointers
/// to unprivileged code would serve nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskInfo {
    pub tid: TaskId,
    pub state: TaskState,
    pub deadline: u32,
    pub time_left: u32,
    pub sleep_left: u32,
    pub is_periodic: bool,
    pub stack_size: usize,
    pub stack_high: usize,
}

impl TaskInfo {
    /// Zeroed snapshot, to be overwritten by the copy-out.
    pub const fn empty() -> Self {
        TaskInfo {
            tid: 0,
            state: TaskState::Dormant,
            deadline: 0,
            time_left: 0,
            sleep_left: 0,
            is_periodic: false,
            stack_size: 0,
            stack_high: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

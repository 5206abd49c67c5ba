//! # Kernel Core
//!
//! The task table, the earliest-deadline-first selector, the tick and
//! sleep engine, the task factory, and the context-switch bookkeeping.
//! One [`Scheduler`] value holds all of it, including the heap; the
//! hardware layers reach it through a single global pointer and every
//! mutation arrives through an exception handler or a masked section, so
//! the value itself needs no internal locking.
//!
//! ## Scheduling policy
//!
//! The runnable task with the smallest deadline wins. A tie is broken by
//! round-robin rotation: the scan for the tied deadline starts just after
//! the incumbent and wraps, so equal-deadline tasks take turns in slot
//! order. Slot 0 — the null task, deadline infinity — is the fallback
//! when nothing else is ready.
//!
//! ## Switch protocol
//!
//! A scheduling decision only rewrites table state and records the
//! `target`; the register-level swap happens later, when the PendSV
//! handler calls [`Scheduler::context_switch`] to trade process stack
//! pointers. Fresh tasks get a synthetic exception frame built on their
//! stack first, so the hardware unstacking of that frame *is* their
//! first dispatch.

use core::ffi::c_void;
use core::ptr;

use crate::config::{
    DEADLINE_INFINITE, DEFAULT_DEADLINE, IDLE_STACK_SIZE, MAX_TASKS, MIN_STACK_SIZE, STACK_FILL,
    XPSR_THUMB,
};
use crate::heap::Heap;
use crate::task::{TaskId, TaskInfo, TaskInit, TaskState, Tcb, TID_NULL};

// ---------------------------------------------------------------------------
// Built-in task bodies
// ---------------------------------------------------------------------------

/// Body of the null task: halt until an interrupt arrives. Runs only
/// when no user task is ready.
extern "C" fn idle_entry(_arg: *mut c_void) {
    loop {
        #[cfg(all(target_arch = "arm", target_os = "none"))]
        cortex_m::asm::wfi();
        #[cfg(not(all(target_arch = "arm", target_os = "none")))]
        core::hint::spin_loop();
    }
}

/// Every fresh frame primes its link register with this routine, so a
/// task body that plainly returns still exits through the task-exit
/// system call.
extern "C" fn task_return() {
    #[cfg(all(target_arch = "arm", target_os = "none"))]
    unsafe {
        core::arch::asm!("svc #17")
    };
    loop {
        #[cfg(all(target_arch = "arm", target_os = "none"))]
        cortex_m::asm::wfi();
        #[cfg(not(all(target_arch = "arm", target_os = "none")))]
        core::hint::spin_loop();
    }
}

/// Statically reserved stack for the null task, aligned for AAPCS.
#[repr(align(8))]
struct IdleStack([u8; IDLE_STACK_SIZE]);

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// The whole kernel state: task table, heap, tick counter, and the
/// pending switch target. Lives in a single global in `kernel`.
pub struct Scheduler {
    /// Fixed task table; slot 0 is the null task.
    tasks: [Tcb; MAX_TASKS],
    /// Task currently owning the CPU (or about to, before the first
    /// dispatch completes).
    current: TaskId,
    /// Task the next PendSV will switch to.
    target: TaskId,
    /// Live user tasks; the null task is not counted.
    num_tasks: usize,
    initialized: bool,
    running: bool,
    /// Milliseconds since the kernel started.
    ticks: u32,
    /// Heap bounds, kept for rebuilding on a memory re-init.
    heap_lo: *mut u8,
    heap_hi: *mut u8,
    pub(crate) heap: Heap,
    idle_stack: IdleStack,
}

impl Scheduler {
    pub const fn new() -> Self {
        Scheduler {
            tasks: [Tcb::EMPTY; MAX_TASKS],
            current: TID_NULL,
            target: TID_NULL,
            num_tasks: 0,
            initialized: false,
            running: false,
            ticks: 0,
            heap_lo: ptr::null_mut(),
            heap_hi: ptr::null_mut(),
            heap: Heap::new(),
            idle_stack: IdleStack([0; IDLE_STACK_SIZE]),
        }
    }

    // -----------------------------------------------------------------------
    // Initialization & startup
    // -----------------------------------------------------------------------

    /// Reset the whole kernel to a clean pre-start state and build the
    /// heap over `[heap_lo, heap_hi)`.
    ///
    /// Every slot returns to dormant; slot 0 becomes the always-ready
    /// null task on its static stack, with an infinite deadline so any
    /// user task outranks it.
    pub fn kernel_init(&mut self, heap_lo: *mut u8, heap_hi: *mut u8) {
        for (i, tcb) in self.tasks.iter_mut().enumerate() {
            tcb.reset(i);
        }

        let idle_top = self.idle_stack.0.as_ptr() as usize + IDLE_STACK_SIZE;
        let t = &mut self.tasks[TID_NULL];
        t.entry = Some(idle_entry);
        t.state = TaskState::Ready;
        t.deadline = DEADLINE_INFINITE;
        t.time_left = DEADLINE_INFINITE;
        t.stack_high = idle_top;
        t.stack_size = IDLE_STACK_SIZE;

        self.num_tasks = 0;
        self.current = TID_NULL;
        self.target = TID_NULL;
        self.running = false;
        self.ticks = 0;
        self.heap_lo = heap_lo;
        self.heap_hi = heap_hi;
        self.initialized = true;

        let _ = self.heap.init(heap_lo, heap_hi);
    }

    /// Rebuild the heap. Fails before `kernel_init`; afterwards it wipes
    /// the region and starts the free list over.
    pub fn mem_init(&mut self) -> Result<(), ()> {
        if !self.initialized {
            return Err(());
        }
        self.heap.init(self.heap_lo, self.heap_hi)
    }

    /// Pick, prime, and commit the first task. Called once, right before
    /// the start trap loads its stack pointer.
    ///
    /// Fails if the kernel is uninitialized, already running, or no user
    /// task is ready. Every ready task leaves with a full slice and the
    /// tick counter starts from zero.
    pub fn start_prepare(&mut self) -> Result<TaskId, ()> {
        if !self.initialized || self.running {
            return Err(());
        }
        let first = self.select_next();
        if first == TID_NULL {
            return Err(());
        }

        self.current = first;
        self.target = first;
        self.prime_stack(first);
        let t = &mut self.tasks[first];
        t.state = TaskState::Running;
        t.fresh = false;
        t.time_left = t.deadline;

        for i in 1..MAX_TASKS {
            if self.tasks[i].is_ready() {
                self.tasks[i].time_left = self.tasks[i].deadline;
            }
        }

        self.running = true;
        self.ticks = 0;
        Ok(first)
    }

    // -----------------------------------------------------------------------
    // Task factory
    // -----------------------------------------------------------------------

    /// Create a task in the lowest dormant slot.
    ///
    /// Requires an entry point and at least [`MIN_STACK_SIZE`] bytes of
    /// stack. The stack comes from the heap and the block is re-owned to
    /// the new task so its exit path can free it. The assigned identifier
    /// and the stack top are written back into `init`. Defaults:
    /// deadline 5, non-periodic.
    pub fn create_task(&mut self, init: &mut TaskInit) -> Result<TaskId, ()> {
        if !self.initialized {
            return Err(());
        }
        let entry = init.entry.ok_or(())?;
        if init.stack_size < MIN_STACK_SIZE {
            return Err(());
        }

        let mut tid = TID_NULL;
        for i in 1..MAX_TASKS {
            if self.tasks[i].state == TaskState::Dormant {
                tid = i;
                break;
            }
        }
        if tid == TID_NULL || self.num_tasks >= MAX_TASKS - 1 {
            return Err(());
        }

        let stack = self.heap.alloc(init.stack_size, self.current).ok_or(())?;
        let stack_base = stack.as_ptr();
        self.heap.set_block_owner(stack_base, tid);

        let t = &mut self.tasks[tid];
        t.entry = Some(entry);
        t.stack_base = stack_base;
        t.stack_size = init.stack_size;
        t.stack_high = stack_base as usize + init.stack_size;
        t.stack_saved = ptr::null_mut();
        t.state = TaskState::Ready;
        t.fresh = true;
        t.deadline = DEFAULT_DEADLINE;
        t.time_left = DEFAULT_DEADLINE;
        t.sleep_left = 0;
        t.is_periodic = false;

        init.tid = tid;
        init.stack_high = t.stack_high;
        self.num_tasks += 1;
        Ok(tid)
    }

    /// Create a periodic task whose deadline and period are `deadline`
    /// ticks. `deadline` must be non-zero.
    pub fn create_deadline_task(
        &mut self,
        deadline: u32,
        init: &mut TaskInit,
    ) -> Result<TaskId, ()> {
        if deadline == 0 {
            return Err(());
        }
        let tid = self.create_task(init)?;
        let t = &mut self.tasks[tid];
        t.deadline = deadline;
        t.time_left = deadline;
        t.is_periodic = true;
        Ok(tid)
    }

    /// Re-deadline a ready or running task and restart its slice.
    pub fn set_deadline(&mut self, deadline: u32, tid: TaskId) -> Result<(), ()> {
        if deadline == 0 || tid >= MAX_TASKS {
            return Err(());
        }
        match self.tasks[tid].state {
            TaskState::Ready | TaskState::Running => {
                self.tasks[tid].deadline = deadline;
                self.tasks[tid].time_left = deadline;
                Ok(())
            }
            _ => Err(()),
        }
    }

    /// Whether dispatching `tid` would beat the incumbent — strictly
    /// smaller deadline, and only once the kernel is running.
    pub fn preempts_current(&self, tid: TaskId) -> bool {
        self.running && self.tasks[tid].deadline < self.tasks[self.current].deadline
    }

    /// Copy out a snapshot of `tid`'s state.
    pub fn task_info(&self, tid: TaskId) -> Result<TaskInfo, ()> {
        if tid >= MAX_TASKS {
            return Err(());
        }
        let t = &self.tasks[tid];
        Ok(TaskInfo {
            tid: t.tid,
            state: t.state,
            deadline: t.deadline,
            time_left: t.time_left,
            sleep_left: t.sleep_left,
            is_periodic: t.is_periodic,
            stack_size: t.stack_size,
            stack_high: t.stack_high,
        })
    }

    // -----------------------------------------------------------------------
    // EDF selection
    // -----------------------------------------------------------------------

    /// Identifier of the next task to run.
    ///
    /// Scans slots 1.. for the smallest deadline among ready tasks. A
    /// unique minimum wins outright. On a tie the scan restarts just
    /// after the incumbent and wraps through it, which rotates
    /// equal-deadline tasks FIFO-fashion. Returns slot 0 when no user
    /// task is ready.
    pub fn select_next(&self) -> TaskId {
        let mut earliest = DEADLINE_INFINITE;
        let mut selected = TID_NULL;
        let mut ties = 0;

        for i in 1..MAX_TASKS {
            if !self.tasks[i].is_ready() {
                continue;
            }
            if self.tasks[i].deadline < earliest {
                earliest = self.tasks[i].deadline;
                selected = i;
                ties = 1;
            } else if self.tasks[i].deadline == earliest {
                ties += 1;
            }
        }

        if ties > 1 {
            for i in self.current + 1..MAX_TASKS {
                if self.tasks[i].is_ready() && self.tasks[i].deadline == earliest {
                    return i;
                }
            }
            for i in 1..=self.current.min(MAX_TASKS - 1) {
                if self.tasks[i].is_ready() && self.tasks[i].deadline == earliest {
                    return i;
                }
            }
        }

        selected
    }

    // -----------------------------------------------------------------------
    // Tick & sleep engine
    // -----------------------------------------------------------------------

    /// One timer tick: age slices, count down sleepers, wake the expired
    /// ones with a fresh slice.
    ///
    /// Returns whether the caller should run [`schedule_switch`]: true
    /// when the EDF winner differs from the incumbent and either beats
    /// it outright or the incumbent is not actually running (sleeping in
    /// place, or just woken). A periodic task whose slice hits zero is
    /// not preempted here — it cedes at its next period yield.
    ///
    /// [`schedule_switch`]: Scheduler::schedule_switch
    pub fn tick(&mut self) -> bool {
        self.ticks = self.ticks.wrapping_add(1);

        for i in 1..MAX_TASKS {
            let t = &mut self.tasks[i];
            match t.state {
                TaskState::Ready | TaskState::Running => {
                    if t.time_left > 0 {
                        t.time_left -= 1;
                    }
                }
                TaskState::Sleeping => {
                    if t.sleep_left > 0 {
                        t.sleep_left -= 1;
                        if t.sleep_left == 0 {
                            t.state = TaskState::Ready;
                            t.time_left = t.deadline;
                        }
                    }
                }
                TaskState::Dormant => {}
            }
        }

        // A sleeper with no successor halts in place rather than
        // handing the CPU to the null task, so slot 0 never preempts.
        let next = self.select_next();
        next != TID_NULL
            && next != self.current
            && (self.tasks[self.current].state != TaskState::Running
                || self.tasks[next].deadline < self.tasks[self.current].deadline)
    }

    // -----------------------------------------------------------------------
    // Context switching
    // -----------------------------------------------------------------------

    /// Full scheduling decision: pick the EDF winner, prime it if fresh,
    /// demote the incumbent, promote the winner, and record it as the
    /// pending switch target.
    ///
    /// Returns whether a switch is actually pending; the caller pends
    /// the switch exception on `true`. A preempted incumbent keeps its
    /// remaining slice unless it was exhausted, in which case it
    /// restarts full.
    pub fn schedule_switch(&mut self) -> bool {
        let next = self.select_next();
        if next == self.current {
            return false;
        }

        if self.tasks[next].fresh {
            self.prime_stack(next);
        }

        let cur = self.current;
        if self.tasks[cur].state == TaskState::Running {
            self.tasks[cur].state = TaskState::Ready;
            if self.tasks[cur].time_left == 0 {
                self.tasks[cur].time_left = self.tasks[cur].deadline;
            }
        }

        let t = &mut self.tasks[next];
        t.state = TaskState::Running;
        t.fresh = false;
        if t.time_left == 0 {
            t.time_left = t.deadline;
        }

        self.target = next;
        true
    }

    /// Commit the target picked by a yield or sleep: prime it if fresh
    /// and mark it running. The demotion already happened on the yield
    /// side; the caller pends the switch exception next.
    pub fn finalize_switch(&mut self) {
        let tid = self.target;
        if self.tasks[tid].fresh {
            self.prime_stack(tid);
        }
        let t = &mut self.tasks[tid];
        t.fresh = false;
        t.state = TaskState::Running;
        if t.time_left == 0 {
            t.time_left = t.deadline;
        }
    }

    /// The PendSV-side swap: record the outgoing task's process stack
    /// pointer, adopt the target as current, and hand back the stack
    /// pointer to resume from. Register save/restore around this is the
    /// handler's job.
    pub fn context_switch(&mut self, psp: *mut usize) -> *mut usize {
        self.tasks[self.current].stack_saved = psp;
        self.current = self.target;
        self.tasks[self.current].stack_saved
    }

    /// Build the synthetic exception frame a fresh task starts from.
    ///
    /// Full-descending, 16 words below the 8-aligned stack top: xPSR with
    /// the thumb bit, the entry point, the exit trampoline, then
    /// r12/r3/r2/r1/r0 and r11..r4 filled with the scratch sentinel. The
    /// hardware unstacks the top eight on dispatch; the handler restores
    /// the rest.
    fn prime_stack(&mut self, tid: TaskId) {
        let t = &mut self.tasks[tid];
        let Some(entry) = t.entry else {
            return;
        };

        let top = t.stack_high & !7;
        let mut sp = top as *mut usize;
        unsafe {
            sp = sp.sub(1);
            sp.write(XPSR_THUMB);
            sp = sp.sub(1);
            sp.write(entry as usize);
            sp = sp.sub(1);
            sp.write(task_return as usize);
            for _ in 0..13 {
                sp = sp.sub(1);
                sp.write(STACK_FILL);
            }
        }
        t.stack_saved = sp;
    }

    // -----------------------------------------------------------------------
    // Voluntary suspension & exit
    // -----------------------------------------------------------------------

    /// Demote the caller to ready and pick a successor, recording it as
    /// the switch target. Non-periodic tasks restart with a full slice;
    /// periodic tasks keep their position in the period.
    ///
    /// Returns whether a successor exists — the caller follows up with
    /// the yield trap when it does.
    pub fn prepare_yield(&mut self) -> bool {
        let cur = self.current;
        if cur == TID_NULL {
            return false;
        }
        let t = &mut self.tasks[cur];
        t.state = TaskState::Ready;
        if !t.is_periodic {
            t.time_left = t.deadline;
        }
        self.target = self.select_next();
        self.target != TID_NULL
    }

    /// Put the caller to sleep for `ms` ticks and pick a successor.
    ///
    /// `Ok(Some(tid))` — successor recorded, caller should trap into the
    /// yield path. `Ok(None)` — nothing else is ready; the caller halts
    /// in place until the wake tick flips its state back. `Err` — the
    /// null task, or a zero duration; nothing changed.
    pub fn prepare_sleep(&mut self, ms: u32) -> Result<Option<TaskId>, ()> {
        let cur = self.current;
        if cur == TID_NULL || ms == 0 {
            return Err(());
        }
        self.tasks[cur].state = TaskState::Sleeping;
        self.tasks[cur].sleep_left = ms;

        let target = self.select_next();
        self.target = target;
        if target != TID_NULL {
            Ok(Some(target))
        } else {
            Ok(None)
        }
    }

    /// Decide what a period yield means for the caller right now.
    ///
    /// A periodic task mid-period sleeps out its remaining slice
    /// (`Some(ms)`); one exactly at its boundary refills and keeps
    /// running (`None`). A non-periodic task sleeps its full deadline.
    pub fn period_sleep_ms(&mut self) -> Option<u32> {
        let cur = self.current;
        if cur == TID_NULL {
            return None;
        }
        let t = &mut self.tasks[cur];
        if t.is_periodic {
            if t.time_left > 0 {
                Some(t.time_left)
            } else {
                t.time_left = t.deadline;
                None
            }
        } else {
            Some(t.deadline)
        }
    }

    /// Terminate the caller: return its stack to the heap, clear the
    /// slot to dormant, and schedule whatever is next (the null task if
    /// nothing is). The null task itself cannot exit.
    ///
    /// Returns whether a switch is pending.
    pub fn exit_current(&mut self) -> bool {
        let cur = self.current;
        if cur == TID_NULL {
            return false;
        }

        let base = self.tasks[cur].stack_base;
        let _ = self.heap.dealloc(base, cur);
        self.tasks[cur].reset(cur);
        self.num_tasks -= 1;

        self.schedule_switch()
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    #[inline]
    pub fn current_tid(&self) -> TaskId {
        self.current
    }

    /// Live user tasks (the null task is not counted).
    #[inline]
    pub fn task_count(&self) -> usize {
        self.num_tasks
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Milliseconds since kernel start.
    #[inline]
    pub fn ticks(&self) -> u32 {
        self.ticks
    }

    /// State of slot `tid`. Callers pass identifiers they own.
    pub(crate) fn task_state(&self, tid: TaskId) -> TaskState {
        self.tasks[tid].state
    }

    /// Saved stack pointer of the pending switch target; the start trap
    /// loads this into the PSP for the first dispatch.
    pub(crate) fn target_stack(&self) -> *mut usize {
        self.tasks[self.target].stack_saved
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const ARENA_SIZE: usize = 32 * 1024;

    #[repr(align(8))]
    struct Arena([u8; ARENA_SIZE]);

    extern "C" fn body(_arg: *mut c_void) {}

    /// Initialize in place: `kernel_init` records the address of the
    /// idle stack inside `k`, so `k` must already sit where it will stay.
    fn boot(k: &mut Scheduler, mem: &mut Arena) {
        let lo = mem.0.as_mut_ptr();
        let hi = unsafe { lo.add(ARENA_SIZE) };
        k.kernel_init(lo, hi);
    }

    fn spawn(k: &mut Scheduler) -> TaskId {
        let mut init = TaskInit::new(body, MIN_STACK_SIZE);
        k.create_task(&mut init).unwrap()
    }

    fn spawn_deadline(k: &mut Scheduler, deadline: u32) -> TaskId {
        let mut init = TaskInit::new(body, MIN_STACK_SIZE);
        k.create_deadline_task(deadline, &mut init).unwrap()
    }

    /// Stand-in for the PendSV swap: hand the kernel some outgoing PSP
    /// and adopt the target, exactly what the handler hook does.
    fn complete_switch(k: &mut Scheduler) {
        let mut outgoing = [0usize; 2];
        k.context_switch(outgoing.as_mut_ptr());
    }

    fn running_count(k: &Scheduler) -> usize {
        (0..MAX_TASKS)
            .filter(|&i| k.tasks[i].state == TaskState::Running)
            .count()
    }

    #[test]
    fn kernel_init_builds_null_task() {
        let mut mem = Arena([0; ARENA_SIZE]);
        let mut k = Scheduler::new();
        boot(&mut k, &mut mem);

        assert_eq!(k.current_tid(), TID_NULL);
        assert_eq!(k.task_count(), 0);
        assert!(!k.is_running());

        let idle = k.task_info(TID_NULL).unwrap();
        assert_eq!(idle.state, TaskState::Ready);
        assert_eq!(idle.deadline, DEADLINE_INFINITE);
        assert_eq!(idle.stack_size, IDLE_STACK_SIZE);

        // With no user task ready the selector falls back to slot 0.
        assert_eq!(k.select_next(), TID_NULL);
    }

    #[test]
    fn create_requires_initialized_kernel() {
        let mut k = Scheduler::new();
        let mut init = TaskInit::new(body, MIN_STACK_SIZE);
        assert_eq!(k.create_task(&mut init), Err(()));
    }

    #[test]
    fn create_validates_entry_and_stack() {
        let mut mem = Arena([0; ARENA_SIZE]);
        let mut k = Scheduler::new();
        boot(&mut k, &mut mem);

        let mut no_entry = TaskInit {
            entry: None,
            stack_size: MIN_STACK_SIZE,
            tid: 0,
            stack_high: 0,
        };
        assert_eq!(k.create_task(&mut no_entry), Err(()));

        let mut small = TaskInit::new(body, MIN_STACK_SIZE - 1);
        assert_eq!(k.create_task(&mut small), Err(()));
        assert_eq!(k.task_count(), 0);
    }

    #[test]
    fn create_assigns_lowest_slot_and_reports_back() {
        let mut mem = Arena([0; ARENA_SIZE]);
        let mut k = Scheduler::new();
        boot(&mut k, &mut mem);

        let mut init = TaskInit::new(body, MIN_STACK_SIZE);
        assert_eq!(k.create_task(&mut init), Ok(1));
        assert_eq!(init.tid, 1);
        assert_ne!(init.stack_high, 0);

        let info = k.task_info(1).unwrap();
        assert_eq!(info.stack_high, init.stack_high);
        assert_eq!(info.state, TaskState::Ready);
        assert_eq!(info.deadline, DEFAULT_DEADLINE);
        assert!(!info.is_periodic);

        assert_eq!(k.create_task(&mut init), Ok(2));
        assert_eq!(k.task_count(), 2);
    }

    #[test]
    fn create_reuses_dormant_slot() {
        let mut mem = Arena([0; ARENA_SIZE]);
        let mut k = Scheduler::new();
        boot(&mut k, &mut mem);

        spawn(&mut k);
        spawn(&mut k);
        spawn(&mut k);

        k.current = 2;
        assert!(k.exit_current());
        assert_eq!(k.task_state(2), TaskState::Dormant);
        assert_eq!(k.task_count(), 2);

        // The freed slot is the lowest dormant one again.
        assert_eq!(spawn(&mut k), 2);
    }

    #[test]
    fn task_table_fills_up() {
        let mut mem = Arena([0; ARENA_SIZE]);
        let mut k = Scheduler::new();
        boot(&mut k, &mut mem);

        for expected in 1..MAX_TASKS {
            assert_eq!(spawn(&mut k), expected);
        }
        let mut init = TaskInit::new(body, MIN_STACK_SIZE);
        assert_eq!(k.create_task(&mut init), Err(()));
        assert_eq!(k.task_count(), MAX_TASKS - 1);
    }

    #[test]
    fn task_stack_is_owned_by_its_task() {
        let mut mem = Arena([0; ARENA_SIZE]);
        let mut k = Scheduler::new();
        boot(&mut k, &mut mem);

        let tid = spawn(&mut k);
        let info = k.task_info(tid).unwrap();
        let base = (info.stack_high - info.stack_size) as *mut u8;

        // Some other task may not free it; the owning task may.
        assert_eq!(k.heap.dealloc(base, tid + 1), Err(()));
        assert_eq!(k.heap.dealloc(base, tid), Ok(()));
    }

    #[test]
    fn deadline_task_is_periodic() {
        let mut mem = Arena([0; ARENA_SIZE]);
        let mut k = Scheduler::new();
        boot(&mut k, &mut mem);

        assert_eq!(
            k.create_deadline_task(0, &mut TaskInit::new(body, MIN_STACK_SIZE)),
            Err(())
        );

        let tid = spawn_deadline(&mut k, 12);
        let info = k.task_info(tid).unwrap();
        assert!(info.is_periodic);
        assert_eq!(info.deadline, 12);
        assert_eq!(info.time_left, 12);
    }

    #[test]
    fn edf_selects_earliest_deadline() {
        let mut mem = Arena([0; ARENA_SIZE]);
        let mut k = Scheduler::new();
        boot(&mut k, &mut mem);

        let _x = spawn_deadline(&mut k, 20);
        let y = spawn_deadline(&mut k, 5);
        assert_eq!(k.select_next(), y);
    }

    #[test]
    fn edf_tie_breaks_round_robin() {
        let mut mem = Arena([0; ARENA_SIZE]);
        let mut k = Scheduler::new();
        boot(&mut k, &mut mem);

        spawn_deadline(&mut k, 4);
        spawn_deadline(&mut k, 4);
        spawn_deadline(&mut k, 4);

        assert_eq!(k.select_next(), 1);
        k.current = 1;
        assert_eq!(k.select_next(), 2);
        k.current = 2;
        assert_eq!(k.select_next(), 3);
        k.current = 3;
        assert_eq!(k.select_next(), 1);
    }

    #[test]
    fn start_dispatches_earliest_and_refills_slices() {
        let mut mem = Arena([0; ARENA_SIZE]);
        let mut k = Scheduler::new();
        boot(&mut k, &mut mem);

        let x = spawn_deadline(&mut k, 20);
        let y = spawn_deadline(&mut k, 5);
        k.tasks[x].time_left = 1;

        assert_eq!(k.start_prepare(), Ok(y));
        assert!(k.is_running());
        assert_eq!(k.current_tid(), y);
        assert_eq!(k.task_state(y), TaskState::Running);
        assert_eq!(running_count(&k), 1);
        assert_eq!(k.ticks(), 0);

        // Everyone ready starts the run with a full slice.
        assert_eq!(k.tasks[x].time_left, 20);
    }

    #[test]
    fn start_needs_a_ready_user_task_and_runs_once() {
        let mut mem = Arena([0; ARENA_SIZE]);
        let mut k = Scheduler::new();
        boot(&mut k, &mut mem);
        assert_eq!(k.start_prepare(), Err(()));

        spawn(&mut k);
        assert!(k.start_prepare().is_ok());
        assert_eq!(k.start_prepare(), Err(()));
    }

    #[test]
    fn start_primes_a_hardware_style_frame() {
        let mut mem = Arena([0; ARENA_SIZE]);
        let mut k = Scheduler::new();
        boot(&mut k, &mut mem);

        let tid = spawn(&mut k);
        k.start_prepare().unwrap();

        let t = &k.tasks[tid];
        assert!(!t.fresh);
        let top = (t.stack_high & !7) as *mut usize;
        let sp = t.stack_saved;
        assert_eq!(unsafe { top.offset_from(sp) }, 16);
        // The start trap loads exactly this frame.
        assert_eq!(k.target_stack(), sp);

        unsafe {
            assert_eq!(*sp.add(15), XPSR_THUMB);
            assert_eq!(*sp.add(14), body as usize);
            assert_eq!(*sp.add(13), task_return as usize);
            for i in 0..13 {
                assert_eq!(*sp.add(i), STACK_FILL);
            }
        }
    }

    #[test]
    fn yield_rotates_equal_deadline_tasks() {
        let mut mem = Arena([0; ARENA_SIZE]);
        let mut k = Scheduler::new();
        boot(&mut k, &mut mem);

        for _ in 0..3 {
            spawn_deadline(&mut k, 4);
        }
        k.start_prepare().unwrap();
        assert_eq!(k.current_tid(), 1);

        for expected in [2, 3, 1, 2] {
            assert!(k.prepare_yield());
            k.finalize_switch();
            complete_switch(&mut k);
            assert_eq!(k.current_tid(), expected);
            assert_eq!(running_count(&k), 1);
        }
    }

    #[test]
    fn yield_refills_only_non_periodic_slices() {
        let mut mem = Arena([0; ARENA_SIZE]);
        let mut k = Scheduler::new();
        boot(&mut k, &mut mem);

        let plain = spawn(&mut k);
        let periodic = spawn_deadline(&mut k, 8);

        k.start_prepare().unwrap();

        k.current = plain;
        k.tasks[plain].state = TaskState::Running;
        k.tasks[plain].time_left = 2;
        assert!(k.prepare_yield());
        assert_eq!(k.tasks[plain].time_left, DEFAULT_DEADLINE);

        k.current = periodic;
        k.tasks[periodic].state = TaskState::Running;
        k.tasks[periodic].time_left = 3;
        assert!(k.prepare_yield());
        assert_eq!(k.tasks[periodic].time_left, 3);
    }

    #[test]
    fn sleep_hands_off_to_successor() {
        let mut mem = Arena([0; ARENA_SIZE]);
        let mut k = Scheduler::new();
        boot(&mut k, &mut mem);

        let a = spawn_deadline(&mut k, 4);
        let b = spawn_deadline(&mut k, 4);
        k.start_prepare().unwrap();
        assert_eq!(k.current_tid(), a);

        assert_eq!(k.prepare_sleep(10), Ok(Some(b)));
        k.finalize_switch();
        complete_switch(&mut k);

        assert_eq!(k.current_tid(), b);
        assert_eq!(k.task_state(a), TaskState::Sleeping);
        assert_eq!(k.tasks[a].sleep_left, 10);
    }

    #[test]
    fn sleep_rejects_zero_and_the_null_task() {
        let mut mem = Arena([0; ARENA_SIZE]);
        let mut k = Scheduler::new();
        boot(&mut k, &mut mem);

        let a = spawn(&mut k);
        k.start_prepare().unwrap();
        assert_eq!(k.prepare_sleep(0), Err(()));
        assert_eq!(k.task_state(a), TaskState::Running);

        k.current = TID_NULL;
        assert_eq!(k.prepare_sleep(5), Err(()));
    }

    #[test]
    fn sleep_with_no_successor_waits_in_place() {
        let mut mem = Arena([0; ARENA_SIZE]);
        let mut k = Scheduler::new();
        boot(&mut k, &mut mem);

        let only = spawn_deadline(&mut k, 5);
        k.start_prepare().unwrap();

        assert_eq!(k.prepare_sleep(3), Ok(None));
        assert_eq!(k.current_tid(), only);
        assert_eq!(k.task_state(only), TaskState::Sleeping);

        // Wakes in place: once the countdown ends the task is ready and
        // no switch is suggested, it simply resumes.
        assert!(!k.tick());
        assert!(!k.tick());
        assert!(!k.tick());
        assert_eq!(k.task_state(only), TaskState::Ready);
        assert_eq!(k.tasks[only].time_left, 5);
    }

    #[test]
    fn sleep_wake_order_follows_durations() {
        let mut mem = Arena([0; ARENA_SIZE]);
        let mut k = Scheduler::new();
        boot(&mut k, &mut mem);

        let a = spawn_deadline(&mut k, 4);
        let b = spawn_deadline(&mut k, 4);
        k.start_prepare().unwrap();

        // A sleeps 10, B sleeps 5.
        assert_eq!(k.prepare_sleep(10), Ok(Some(b)));
        k.finalize_switch();
        complete_switch(&mut k);
        assert_eq!(k.prepare_sleep(5), Ok(None));

        for _ in 0..5 {
            k.tick();
        }
        assert_eq!(k.task_state(b), TaskState::Ready);
        assert_eq!(k.task_state(a), TaskState::Sleeping);
        assert_eq!(k.tasks[a].sleep_left, 5);

        for _ in 0..4 {
            assert!(!k.tick());
        }
        // Tick 10: A wakes; the incumbent is not running, so a switch
        // back to the earlier-slot tied task is suggested.
        assert!(k.tick());
        assert_eq!(k.task_state(a), TaskState::Ready);
        assert!(k.schedule_switch());
        complete_switch(&mut k);
        assert_eq!(k.current_tid(), a);
    }

    #[test]
    fn period_yield_sleeps_remainder_and_refills_at_boundary() {
        let mut mem = Arena([0; ARENA_SIZE]);
        let mut k = Scheduler::new();
        boot(&mut k, &mut mem);

        let p = spawn_deadline(&mut k, 6);
        let plain = spawn(&mut k);
        k.start_prepare().unwrap();

        k.current = p;
        k.tasks[p].time_left = 4;
        assert_eq!(k.period_sleep_ms(), Some(4));

        k.tasks[p].time_left = 0;
        assert_eq!(k.period_sleep_ms(), None);
        assert_eq!(k.tasks[p].time_left, 6);

        // Non-periodic tasks sleep their whole deadline.
        k.current = plain;
        assert_eq!(k.period_sleep_ms(), Some(DEFAULT_DEADLINE));

        k.current = TID_NULL;
        assert_eq!(k.period_sleep_ms(), None);
    }

    #[test]
    fn tick_preempts_for_strictly_earlier_deadline_only() {
        let mut mem = Arena([0; ARENA_SIZE]);
        let mut k = Scheduler::new();
        boot(&mut k, &mut mem);

        spawn_deadline(&mut k, 5);
        spawn_deadline(&mut k, 5);
        k.start_prepare().unwrap();

        // An equal-deadline peer never preempts on the tick.
        assert!(!k.tick());

        // A strictly tighter deadline does.
        let urgent = spawn_deadline(&mut k, 2);
        assert!(k.tick());
        assert!(k.schedule_switch());
        complete_switch(&mut k);
        assert_eq!(k.current_tid(), urgent);
        assert_eq!(running_count(&k), 1);
    }

    #[test]
    fn tick_ages_slices_and_wakes_sleepers() {
        let mut mem = Arena([0; ARENA_SIZE]);
        let mut k = Scheduler::new();
        boot(&mut k, &mut mem);

        let a = spawn_deadline(&mut k, 4);
        let b = spawn_deadline(&mut k, 4);
        k.start_prepare().unwrap();

        k.prepare_sleep(2).unwrap();
        k.finalize_switch();
        complete_switch(&mut k);
        assert_eq!(k.current_tid(), b);

        k.tick();
        assert_eq!(k.tasks[b].time_left, 3);
        assert_eq!(k.tasks[a].sleep_left, 1);

        // Wake tick: sleeper becomes ready with a full slice, and at an
        // equal deadline it does not preempt the incumbent.
        assert!(!k.tick());
        assert_eq!(k.task_state(a), TaskState::Ready);
        assert_eq!(k.tasks[a].time_left, 4);
    }

    #[test]
    fn edf_preemption_scenario() {
        let mut mem = Arena([0; ARENA_SIZE]);
        let mut k = Scheduler::new();
        boot(&mut k, &mut mem);

        let x = spawn_deadline(&mut k, 20);
        let y = spawn_deadline(&mut k, 5);

        // The tighter deadline runs first.
        assert_eq!(k.start_prepare(), Ok(y));

        // Y sleeps out its period; X takes over.
        let ms = k.period_sleep_ms().unwrap();
        assert_eq!(ms, 5);
        assert_eq!(k.prepare_sleep(ms), Ok(Some(x)));
        k.finalize_switch();
        complete_switch(&mut k);
        assert_eq!(k.current_tid(), x);

        // Next period: Y wakes and preempts X.
        for _ in 0..4 {
            assert!(!k.tick());
        }
        assert!(k.tick());
        assert!(k.schedule_switch());
        complete_switch(&mut k);
        assert_eq!(k.current_tid(), y);
        assert_eq!(k.task_state(x), TaskState::Ready);
        assert_eq!(running_count(&k), 1);
    }

    #[test]
    fn period_yield_round_robins_three_equal_tasks() {
        let mut mem = Arena([0; ARENA_SIZE]);
        let mut k = Scheduler::new();
        boot(&mut k, &mut mem);

        for _ in 0..3 {
            spawn_deadline(&mut k, 4);
        }
        k.start_prepare().unwrap();

        // Drive the same loop the tasks would: run, period-yield, and
        // follow the handoff until everyone sleeps.
        fn drain(k: &mut Scheduler, order: &mut [usize; 12], logged: &mut usize) {
            loop {
                order[*logged] = k.current_tid();
                *logged += 1;
                match k.period_sleep_ms() {
                    Some(ms) => match k.prepare_sleep(ms) {
                        Ok(Some(_)) => {
                            k.finalize_switch();
                            complete_switch(k);
                        }
                        _ => return,
                    },
                    None => return,
                }
            }
        }

        let mut order = [0usize; 12];
        let mut logged = 0;

        drain(&mut k, &mut order, &mut logged);
        for _ in 0..12 {
            if k.tick() && k.schedule_switch() {
                complete_switch(&mut k);
                drain(&mut k, &mut order, &mut logged);
            }
        }

        assert_eq!(logged, 12);
        assert_eq!(order, [1, 2, 3, 1, 2, 3, 1, 2, 3, 1, 2, 3]);
    }

    #[test]
    fn set_deadline_is_observed_by_the_next_decision() {
        let mut mem = Arena([0; ARENA_SIZE]);
        let mut k = Scheduler::new();
        boot(&mut k, &mut mem);

        let a = spawn_deadline(&mut k, 20);
        let b = spawn_deadline(&mut k, 20);
        k.start_prepare().unwrap();
        assert_eq!(k.current_tid(), a);

        assert_eq!(k.set_deadline(3, b), Ok(()));
        assert_eq!(k.select_next(), b);
        assert!(k.preempts_current(b));

        assert_eq!(k.set_deadline(0, b), Err(()));
        assert_eq!(k.set_deadline(3, MAX_TASKS), Err(()));
        assert_eq!(k.set_deadline(3, 9), Err(())); // dormant slot
    }

    #[test]
    fn create_preempts_a_laxer_incumbent() {
        let mut mem = Arena([0; ARENA_SIZE]);
        let mut k = Scheduler::new();
        boot(&mut k, &mut mem);

        let x = spawn_deadline(&mut k, 20);
        k.start_prepare().unwrap();

        let y = spawn_deadline(&mut k, 5);
        assert!(k.preempts_current(y));
        assert!(k.schedule_switch());
        complete_switch(&mut k);

        assert_eq!(k.current_tid(), y);
        assert_eq!(k.task_state(x), TaskState::Ready);
        // Preempted mid-slice: the remainder is kept, not refilled.
        assert_eq!(k.tasks[x].time_left, 20);

        // An equal or laxer deadline does not preempt.
        let z = spawn_deadline(&mut k, 5);
        assert!(!k.preempts_current(z));
    }

    #[test]
    fn exit_recycles_the_stack_and_falls_back_to_idle() {
        let mut mem = Arena([0; ARENA_SIZE]);
        let mut k = Scheduler::new();
        boot(&mut k, &mut mem);

        let t = spawn(&mut k);
        k.start_prepare().unwrap();
        assert_eq!(k.heap.count_extfrag(usize::MAX), 1);

        assert!(k.exit_current());
        complete_switch(&mut k);

        assert_eq!(k.task_state(t), TaskState::Dormant);
        assert_eq!(k.task_count(), 0);

        // Stack memory went back and coalesced into the single free
        // block, so an equally big allocation succeeds again.
        assert_eq!(k.heap.count_extfrag(usize::MAX), 1);
        assert!(k.heap.alloc(MIN_STACK_SIZE, TID_NULL).is_some());

        // With no user task left the null task carries the CPU.
        assert_eq!(k.current_tid(), TID_NULL);
        assert_eq!(k.task_state(TID_NULL), TaskState::Running);
    }

    #[test]
    fn null_task_cannot_exit() {
        let mut mem = Arena([0; ARENA_SIZE]);
        let mut k = Scheduler::new();
        boot(&mut k, &mut mem);

        assert!(!k.exit_current());
        assert_eq!(k.task_state(TID_NULL), TaskState::Ready);
    }

    #[test]
    fn mem_init_requires_kernel_and_rebuilds() {
        let mut k = Scheduler::new();
        assert_eq!(k.mem_init(), Err(()));

        let mut mem = Arena([0; ARENA_SIZE]);
        let mut k = Scheduler::new();
        boot(&mut k, &mut mem);
        let _ = k.heap.alloc(128, 1).unwrap();
        let _ = k.heap.alloc(64, 1).unwrap();

        assert_eq!(k.mem_init(), Ok(()));
        assert_eq!(k.heap.count_extfrag(usize::MAX), 1);
    }
}

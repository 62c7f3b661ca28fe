//! Task scheduler: round-robin over a fixed TCB arena.
//!
//! The arena holds boxed TCBs addressed by slot index; the ready queue is a
//! FIFO threaded through the TCBs' `next` links. Switches happen on
//! cooperative yield, on blocking IPC, on exit, and on the timer tick when
//! preemption is enabled. The idle task is created first and halts until
//! work arrives, so the ready queue can always supply a runnable task.
//!
//! The decision logic ([`Scheduler`]) is pure and host-tested; the actual
//! stack switch and the global entry points live behind
//! `target_os = "none"`.

pub mod task;

extern crate alloc;

use alloc::boxed::Box;

use planck_noalloc::vec::ArrayVec;
use quantum_abi::SysError;
use quantum_core::sync::IrqSpinLock;

pub use task::{
    DEFAULT_STACK_BYTES, KernelStack, MIN_STACK_BYTES, Task, TaskId, TaskState, UserTask,
    WaitOutcome,
};

/// Maximum concurrently existing tasks.
pub const MAX_TASKS: usize = 32;

/// What a schedule decision asks the switch glue to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchDecision {
    /// Slot whose context must be saved, or `None` when the outgoing
    /// context is dead (first dispatch, exit).
    pub save_slot: Option<usize>,
    /// Slot to run next.
    pub next_slot: usize,
}

/// The scheduler state machine.
pub struct Scheduler {
    slots: [Option<Box<Task>>; MAX_TASKS],
    current: Option<usize>,
    ready_head: Option<usize>,
    ready_tail: Option<usize>,
    next_id: TaskId,
    ticks: u64,
    preemption: bool,
    need_resched: bool,
    sleepers: ArrayVec<(usize, u64), MAX_TASKS>,
    reap: ArrayVec<usize, MAX_TASKS>,
}

impl Scheduler {
    /// An empty scheduler; task ids start at 1.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: [const { None }; MAX_TASKS],
            current: None,
            ready_head: None,
            ready_tail: None,
            next_id: 1,
            ticks: 0,
            preemption: false,
            need_resched: false,
            sleepers: ArrayVec::new(),
            reap: ArrayVec::new(),
        }
    }

    // ── Arena access ─────────────────────────────────────────────────────

    fn task(&self, slot: usize) -> &Task {
        self.slots[slot].as_deref().expect("live task slot")
    }

    fn task_mut(&mut self, slot: usize) -> &mut Task {
        self.slots[slot].as_deref_mut().expect("live task slot")
    }

    /// Finds the arena slot of a task id.
    #[must_use]
    pub fn slot_of(&self, id: TaskId) -> Option<usize> {
        self.slots
            .iter()
            .position(|t| t.as_ref().is_some_and(|t| t.id == id))
    }

    /// Runs `f` on the TCB of `id`, if it exists.
    pub fn with_task<R>(&mut self, id: TaskId, f: impl FnOnce(&mut Task) -> R) -> Option<R> {
        let slot = self.slot_of(id)?;
        Some(f(self.task_mut(slot)))
    }

    /// The currently running task's id (kernel sentinel 0 before the first
    /// dispatch).
    #[must_use]
    pub fn current_id(&self) -> TaskId {
        self.current.map(|slot| self.task(slot).id).unwrap_or(0)
    }

    /// Runs `f` on the current task's TCB.
    pub fn with_current<R>(&mut self, f: impl FnOnce(&mut Task) -> R) -> Option<R> {
        let slot = self.current?;
        Some(f(self.task_mut(slot)))
    }

    // ── Ready queue ──────────────────────────────────────────────────────

    fn enqueue_ready(&mut self, slot: usize) {
        self.task_mut(slot).state = TaskState::Ready;
        self.task_mut(slot).next = None;
        match self.ready_tail {
            None => {
                self.ready_head = Some(slot);
                self.ready_tail = Some(slot);
            }
            Some(tail) => {
                self.task_mut(tail).next = Some(slot);
                self.ready_tail = Some(slot);
            }
        }
    }

    fn pop_ready(&mut self) -> Option<usize> {
        let head = self.ready_head?;
        self.ready_head = self.task(head).next;
        if self.ready_head.is_none() {
            self.ready_tail = None;
        }
        self.task_mut(head).next = None;
        Some(head)
    }

    fn unlink_ready(&mut self, slot: usize) {
        let mut prev: Option<usize> = None;
        let mut cursor = self.ready_head;
        while let Some(at) = cursor {
            let next = self.task(at).next;
            if at == slot {
                match prev {
                    None => self.ready_head = next,
                    Some(p) => self.task_mut(p).next = next,
                }
                if self.ready_tail == Some(slot) {
                    self.ready_tail = prev;
                }
                self.task_mut(slot).next = None;
                return;
            }
            prev = cursor;
            cursor = next;
        }
    }

    /// True when `id` sits on the ready queue.
    #[must_use]
    pub fn in_ready_queue(&self, id: TaskId) -> bool {
        let mut cursor = self.ready_head;
        while let Some(slot) = cursor {
            if self.task(slot).id == id {
                return true;
            }
            cursor = self.task(slot).next;
        }
        false
    }

    // ── Admission and teardown ───────────────────────────────────────────

    /// Places a new task in the arena and on the ready queue, assigning its
    /// id.
    pub fn admit(&mut self, mut task: Box<Task>) -> Result<TaskId, SysError> {
        let slot = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(SysError::ResourceExhausted)?;
        let id = self.next_id;
        self.next_id += 1;
        task.id = id;
        task.state = TaskState::Ready;
        self.slots[slot] = Some(task);
        self.enqueue_ready(slot);
        Ok(id)
    }

    /// Adopts the boot context as the first running task (the idle task).
    ///
    /// The boot stack becomes its kernel stack; no initial frame is needed
    /// because the context is already live.
    pub fn adopt_current(&mut self, mut task: Box<Task>) -> TaskId {
        let slot = self
            .slots
            .iter()
            .position(Option::is_none)
            .expect("adopt_current before the arena can fill");
        let id = self.next_id;
        self.next_id += 1;
        task.id = id;
        task.state = TaskState::Running;
        self.slots[slot] = Some(task);
        self.current = Some(slot);
        id
    }

    /// Marks the current task Terminated and schedules its storage for
    /// deferred release. Returns the port it was parked on, if any.
    pub fn terminate_current(&mut self) -> Option<u32> {
        let slot = self.current.expect("terminate_current with no current");
        let task = self.task_mut(slot);
        task.state = TaskState::Terminated;
        let port = task.wait_port.take();
        task.handles.clear();
        self.current = None;
        self.reap.push(slot);
        port
    }

    /// Terminates an arbitrary task (fault kill). Returns its wait port for
    /// IPC cleanup, or `None` when the task does not exist.
    pub fn terminate(&mut self, id: TaskId) -> Option<Option<u32>> {
        let slot = self.slot_of(id)?;
        if self.current == Some(slot) {
            return Some(self.terminate_current());
        }
        match self.task(slot).state {
            TaskState::Ready => self.unlink_ready(slot),
            TaskState::Blocked => self.remove_sleeper(slot),
            TaskState::Running | TaskState::Terminated => {}
        }
        let task = self.task_mut(slot);
        task.state = TaskState::Terminated;
        let port = task.wait_port.take();
        task.handles.clear();
        self.reap.push(slot);
        Some(port)
    }

    /// Drops the storage of terminated tasks. Never called from the
    /// terminated task's own context: the exit path switches away first and
    /// the next schedule pass reaps.
    pub fn reap(&mut self) {
        while let Some(slot) = self.reap.pop() {
            self.slots[slot] = None;
        }
    }

    /// Number of live (non-terminated) tasks.
    #[must_use]
    pub fn live_tasks(&self) -> usize {
        self.slots
            .iter()
            .flatten()
            .filter(|t| t.state != TaskState::Terminated)
            .count()
    }

    // ── Blocking and waking ──────────────────────────────────────────────

    /// Marks the current task Blocked, recording the awaited port and an
    /// optional tick deadline.
    ///
    /// Returns `false` when a wake already arrived (`pending_wake`): the
    /// caller must not switch away.
    pub fn block_current(&mut self, port: Option<u32>, deadline: Option<u64>) -> bool {
        let slot = self.current.expect("block_current with no current");
        let task = self.task_mut(slot);
        if task.pending_wake {
            task.pending_wake = false;
            task.wait_outcome = WaitOutcome::Woken;
            return false;
        }
        task.state = TaskState::Blocked;
        task.wait_outcome = WaitOutcome::None;
        task.wait_port = port;
        if let Some(deadline) = deadline {
            self.sleepers.push((slot, deadline));
        }
        true
    }

    /// Wakes a blocked task; a wake racing ahead of the block is remembered
    /// via `pending_wake`.
    pub fn wake(&mut self, id: TaskId) {
        let Some(slot) = self.slot_of(id) else {
            return;
        };
        match self.task(slot).state {
            TaskState::Blocked => {
                self.remove_sleeper(slot);
                let task = self.task_mut(slot);
                task.wait_outcome = WaitOutcome::Woken;
                task.wait_port = None;
                self.enqueue_ready(slot);
            }
            TaskState::Ready | TaskState::Running => {
                self.task_mut(slot).pending_wake = true;
            }
            TaskState::Terminated => {}
        }
    }

    fn remove_sleeper(&mut self, slot: usize) {
        let mut i = 0;
        while i < self.sleepers.len() {
            if self.sleepers[i].0 == slot {
                self.sleepers.swap_remove(i);
            } else {
                i += 1;
            }
        }
    }

    // ── Time ─────────────────────────────────────────────────────────────

    /// Advances the tick counter, expiring sleepers. Returns true when the
    /// caller should reschedule (preemption enabled, or a sleeper woke).
    pub fn tick(&mut self) -> bool {
        self.ticks += 1;
        let now = self.ticks;
        let mut woke = false;
        let mut i = 0;
        while i < self.sleepers.len() {
            if self.sleepers[i].1 <= now {
                let slot = self.sleepers[i].0;
                self.sleepers.swap_remove(i);
                let task = self.task_mut(slot);
                if task.state == TaskState::Blocked {
                    task.wait_outcome = WaitOutcome::TimedOut;
                    self.enqueue_ready(slot);
                    woke = true;
                }
            } else {
                i += 1;
            }
        }
        if self.preemption || woke {
            self.need_resched = true;
        }
        self.need_resched
    }

    /// Current tick count.
    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Enables timer preemption.
    pub fn enable_preemption(&mut self) {
        self.preemption = true;
    }

    /// Disables timer preemption.
    pub fn disable_preemption(&mut self) {
        self.preemption = false;
    }

    /// Consumes the pending-reschedule flag.
    pub fn take_need_resched(&mut self) -> bool {
        core::mem::take(&mut self.need_resched)
    }

    // ── Scheduling decision ──────────────────────────────────────────────

    /// Round-robin step: returns the switch to perform, or `None` when the
    /// current task simply keeps running.
    ///
    /// A Running current task goes back to the ready queue, so the queue is
    /// never empty while anything (the idle task included) is runnable.
    pub fn decide(&mut self) -> Option<SwitchDecision> {
        if let Some(current) = self.current {
            if self.task(current).state == TaskState::Running {
                self.enqueue_ready(current);
            }
        }

        let next = self.pop_ready().expect("ready queue empty: no idle task");

        let prev = self.current;
        if prev == Some(next) {
            self.task_mut(next).state = TaskState::Running;
            return None;
        }

        self.current = Some(next);
        self.task_mut(next).state = TaskState::Running;

        let save_slot = prev.filter(|&p| self.task(p).state != TaskState::Terminated);
        Some(SwitchDecision {
            save_slot,
            next_slot: next,
        })
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Global scheduler
// ---------------------------------------------------------------------------

/// Global scheduler instance.
// Lock level: scheduler (between heap and port registry; the switch glue
// releases it before switching stacks).
static SCHEDULER: IrqSpinLock<Scheduler> = IrqSpinLock::new(Scheduler::new());

/// Runs `f` with the global scheduler.
pub fn with_scheduler<R>(f: impl FnOnce(&mut Scheduler) -> R) -> R {
    f(&mut SCHEDULER.lock())
}

/// The current task's id (0 before tasking starts).
pub fn current_task_id() -> TaskId {
    SCHEDULER.lock().current_id()
}

/// Wakes `id` if it is blocked.
pub fn wake(id: TaskId) {
    SCHEDULER.lock().wake(id);
}

// ── Switch glue (kernel builds only) ─────────────────────────────────────

#[cfg(target_os = "none")]
mod switch {
    use super::*;
    use crate::arch::x86 as arch;

    /// Performs one scheduling pass and, when the decision says so,
    /// switches stacks. Runs with interrupts disabled throughout; the
    /// scheduler lock itself is released before the switch.
    pub fn schedule() {
        let flags = arch::save_flags_cli();
        schedule_locked();
        arch::restore_flags(flags);
    }

    fn schedule_locked() {
        let (save_ptr, next_sp) = {
            let mut sched = SCHEDULER.lock();
            sched.reap();
            let Some(decision) = sched.decide() else {
                return;
            };

            let next = sched.slots[decision.next_slot]
                .as_deref_mut()
                .expect("decision names a live slot");
            let next_sp = next.saved_sp;
            let stack_top = next.kernel_stack.frame_top();
            if let Some(user) = next.user.as_ref() {
                user.space.activate();
            }
            arch::gdt::set_kernel_stack(stack_top as u32);

            let save_ptr = decision.save_slot.map(|slot| {
                let prev = sched.slots[slot]
                    .as_deref_mut()
                    .expect("save slot names a live task");
                core::ptr::addr_of_mut!(prev.saved_sp)
            });
            (save_ptr, next_sp)
        };

        // SAFETY: `next_sp` was written by a previous switch (or by the
        // initial frame builder) and the TCB boxes are stable in memory.
        unsafe {
            arch::context::switch_context(
                save_ptr.unwrap_or(core::ptr::null_mut()),
                next_sp,
            );
        }
    }

    /// Cooperative yield.
    pub fn yield_now() {
        schedule();
    }

    /// Called from the interrupt epilogue when the tick handler asked for a
    /// reschedule.
    pub fn preempt_if_needed() {
        let needed = SCHEDULER.lock().take_need_resched();
        if needed {
            schedule();
        }
    }

    /// Terminates the calling task and switches away; never returns.
    pub fn exit_current() -> ! {
        let _ = arch::save_flags_cli();
        let (id, wait_port) = {
            let mut sched = SCHEDULER.lock();
            let id = sched.current_id();
            let port = sched.terminate_current();
            (id, port)
        };
        crate::ktrace!("sched: task {} exiting", id);
        crate::ipc::blocking::on_task_exit(id, wait_port);
        schedule_locked();
        unreachable!("scheduler returned into a terminated task");
    }

    /// Creates a kernel task running `entry` and places it on the ready
    /// queue.
    pub fn spawn_kernel_task(
        entry: extern "C" fn(),
        stack_size: usize,
    ) -> Result<TaskId, SysError> {
        let mut stack = KernelStack::new(stack_size)?;
        let sp = arch::context::build_kernel_frame(&mut stack, entry);
        let mut task = Box::new(Task::new(stack));
        task.saved_sp = sp;
        with_scheduler(|sched| sched.admit(task))
    }

    /// Creates a user task entering ring 3 at `entry` on `user_stack_top`
    /// inside `space`.
    pub fn spawn_user_task(
        space: crate::mm::paging::AddressSpace,
        entry: u32,
        user_stack_top: u32,
        heap_break: u32,
        coordinator: bool,
    ) -> Result<TaskId, SysError> {
        let mut stack = KernelStack::new(DEFAULT_STACK_BYTES)?;
        let sp = arch::context::build_user_frame(&mut stack, entry, user_stack_top);
        let mut task = Box::new(Task::new(stack));
        task.saved_sp = sp;
        task.user = Some(UserTask { space, heap_break });
        task.coordinator = coordinator;
        task.io_access = coordinator;
        with_scheduler(|sched| sched.admit(task))
    }

    /// Blocks the current task until [`wake`](super::wake) (or the deadline)
    /// fires. Returns the wait outcome.
    pub fn block_current(port: Option<u32>, deadline: Option<u64>) -> WaitOutcome {
        let flags = arch::save_flags_cli();
        let parked = SCHEDULER.lock().block_current(port, deadline);
        if parked {
            schedule_locked();
        }
        let outcome = SCHEDULER
            .lock()
            .with_current(|task| {
                task.wait_port = None;
                task.wait_outcome
            })
            .unwrap_or(WaitOutcome::None);
        arch::restore_flags(flags);
        outcome
    }
}

#[cfg(target_os = "none")]
pub use switch::{
    block_current, exit_current, preempt_if_needed, schedule, spawn_kernel_task,
    spawn_user_task, yield_now,
};

#[cfg(test)]
mod tests {
    use super::*;

    fn new_task() -> Box<Task> {
        Box::new(Task::new(KernelStack::new(MIN_STACK_BYTES).unwrap()))
    }

    fn scheduler_with_idle() -> Scheduler {
        let mut sched = Scheduler::new();
        // Slot 0 plays the boot/idle context.
        sched.adopt_current(new_task());
        sched
    }

    #[test]
    fn ids_are_monotone_from_one() {
        let mut sched = Scheduler::new();
        assert_eq!(sched.adopt_current(new_task()), 1);
        assert_eq!(sched.admit(new_task()).unwrap(), 2);
        assert_eq!(sched.admit(new_task()).unwrap(), 3);
    }

    #[test]
    fn round_robin_rotates_through_ready_tasks() {
        let mut sched = scheduler_with_idle();
        let a = sched.admit(new_task()).unwrap();
        let b = sched.admit(new_task()).unwrap();

        let first = sched.decide().expect("switch to a");
        assert_eq!(sched.task(first.next_slot).id, a);
        let second = sched.decide().expect("switch to b");
        assert_eq!(sched.task(second.next_slot).id, b);
        // Idle (the old current) comes around again.
        let third = sched.decide().expect("switch to idle");
        assert_eq!(sched.task(third.next_slot).id, 1);
    }

    #[test]
    fn running_task_is_never_on_the_ready_queue() {
        let mut sched = scheduler_with_idle();
        sched.admit(new_task()).unwrap();
        sched.decide().unwrap();
        let current = sched.current_id();
        assert!(!sched.in_ready_queue(current));
    }

    #[test]
    fn sole_task_keeps_running_without_a_switch() {
        let mut sched = scheduler_with_idle();
        assert_eq!(sched.decide(), None);
        assert_eq!(sched.current_id(), 1);
    }

    #[test]
    fn blocked_tasks_leave_the_queue_until_woken() {
        let mut sched = scheduler_with_idle();
        let worker = sched.admit(new_task()).unwrap();
        sched.decide().unwrap();
        assert_eq!(sched.current_id(), worker);

        assert!(sched.block_current(Some(7), None));
        sched.decide().unwrap();
        assert!(!sched.in_ready_queue(worker));

        sched.wake(worker);
        assert!(sched.in_ready_queue(worker));
        let outcome = sched.with_task(worker, |t| t.wait_outcome).unwrap();
        assert_eq!(outcome, WaitOutcome::Woken);
    }

    #[test]
    fn wake_before_block_is_not_lost() {
        let mut sched = scheduler_with_idle();
        let worker = sched.admit(new_task()).unwrap();
        sched.decide().unwrap();
        assert_eq!(sched.current_id(), worker);

        // The wake arrives while the task is still Running.
        sched.wake(worker);
        // The block attempt must complete immediately.
        assert!(!sched.block_current(None, None));
        assert_eq!(sched.current_id(), worker);
    }

    #[test]
    fn tick_expires_sleepers_with_timeout_outcome() {
        let mut sched = scheduler_with_idle();
        let worker = sched.admit(new_task()).unwrap();
        sched.decide().unwrap();

        let deadline = sched.ticks() + 2;
        assert!(sched.block_current(Some(3), Some(deadline)));
        sched.decide().unwrap();

        assert!(!sched.tick());
        assert!(sched.tick());
        let outcome = sched.with_task(worker, |t| t.wait_outcome).unwrap();
        assert_eq!(outcome, WaitOutcome::TimedOut);
        assert!(sched.in_ready_queue(worker));
    }

    #[test]
    fn preemption_flag_gates_resched_request() {
        let mut sched = scheduler_with_idle();
        assert!(!sched.tick());
        sched.enable_preemption();
        assert!(sched.tick());
        assert!(sched.take_need_resched());
        assert!(!sched.take_need_resched());
    }

    #[test]
    fn exit_defers_reap_and_scheduler_continues() {
        let mut sched = scheduler_with_idle();
        let worker = sched.admit(new_task()).unwrap();
        sched.decide().unwrap();
        assert_eq!(sched.current_id(), worker);

        sched.terminate_current();
        // Storage still present until the next schedule pass reaps.
        assert!(sched.slot_of(worker).is_some());

        sched.reap();
        let decision = sched.decide().expect("switch back to idle");
        assert_eq!(decision.save_slot, None);
        assert!(sched.slot_of(worker).is_none());
        assert_eq!(sched.live_tasks(), 1);
    }

    #[test]
    fn fault_kill_terminates_only_the_faulting_task() {
        let mut sched = scheduler_with_idle();
        let victim = sched.admit(new_task()).unwrap();
        let survivor = sched.admit(new_task()).unwrap();

        sched.terminate(victim).unwrap();
        sched.reap();

        assert!(sched.slot_of(victim).is_none());
        assert!(sched.slot_of(survivor).is_some());
        // The scheduler still makes progress.
        let decision = sched.decide().unwrap();
        assert_eq!(sched.task(decision.next_slot).id, survivor);
    }

    #[test]
    fn fault_kill_of_blocked_task_reports_wait_port() {
        let mut sched = scheduler_with_idle();
        let worker = sched.admit(new_task()).unwrap();
        sched.decide().unwrap();
        sched.block_current(Some(42), Some(sched.ticks() + 100));
        sched.decide().unwrap();

        let port = sched.terminate(worker).unwrap();
        assert_eq!(port, Some(42));
        // Its sleeper entry is gone: a later tick must not resurrect it.
        for _ in 0..200 {
            sched.tick();
        }
        assert!(!sched.in_ready_queue(worker));
    }
}

//! Task Control Block (TCB) definition
//!
//! The TCB carries two list hookups that are active at different times:
//! `next_ptr`/`prev_ptr` ("state node") link the task into whichever
//! scheduler-owned list currently holds it — exactly one of a ready
//! bucket, the delay list, the timed-block list or the suspend list,
//! since those memberships are mutually exclusive. `pend_next_ptr`/
//! `pend_prev_ptr` ("event node") separately link the task into a
//! semaphore, mutex or queue wait list, which a task can be on at the
//! same time it's on the timed-block list.

use core::ptr::NonNull;

use crate::types::{OsNestingCtr, OsOpt, OsPendOn, OsPendStatus, OsPrio, OsStkElement, OsTaskState, OsTick};

/// Task Control Block.
#[repr(C)]
pub struct OsTcb {
    // ============ Stack ============
    /// Current stack pointer (saved context on block/switch).
    pub stk_ptr: *mut OsStkElement,
    /// Base of the stack region (lowest address).
    pub stk_base: *mut OsStkElement,
    /// High-water-mark check limit (10% watermark from the base).
    pub stk_limit: *mut OsStkElement,
    /// Stack size in words.
    pub stk_size: usize,

    /// Task name, used in logs and diagnostics.
    pub name: &'static str,

    // ============ Scheduler state-node links ============
    /// Next TCB in whichever scheduler list currently owns this task.
    pub next_ptr: Option<NonNull<OsTcb>>,
    /// Previous TCB in whichever scheduler list currently owns this task.
    pub prev_ptr: Option<NonNull<OsTcb>>,
    /// Absolute tick at which a delayed or timed-block wait expires.
    /// Meaningless outside the delay and timed-block lists.
    pub wake_up_time: OsTick,
    /// Set by the tick handler when this task is popped off the
    /// timed-block list due to expiry, so the woken primitive knows to
    /// report `Timeout` instead of `Ok`.
    pub timeout_wakeup: bool,
    /// True while this task has a pending entry in the timed-block list,
    /// so the wakeup path (post vs. timeout) that runs first can safely
    /// undo the other's bookkeeping.
    pub in_timed_block: bool,

    // ============ Event-node links (primitive wait lists) ============
    /// Next TCB in the wait list of the object this task is pending on.
    pub pend_next_ptr: Option<NonNull<OsTcb>>,
    /// Previous TCB in the wait list of the object this task is pending on.
    pub pend_prev_ptr: Option<NonNull<OsTcb>>,
    /// Object this task is pending on.
    pub pend_obj_ptr: *const (),
    /// What kind of object `pend_obj_ptr` refers to.
    pub pend_on: OsPendOn,
    /// Outcome recorded when this task is woken from a pend.
    pub pend_status: OsPendStatus,

    // ============ Priority ============
    /// Current effective priority (may be boosted by priority inheritance).
    pub prio: OsPrio,
    /// Priority the task was created with; the floor priority inheritance
    /// restores to.
    pub base_prio: OsPrio,

    // ============ State ============
    pub task_state: OsTaskState,
    pub opt: OsOpt,

    /// Suspend nesting counter; task is suspended while this is nonzero.
    pub suspend_ctr: OsNestingCtr,

    // ============ Round robin ============
    /// Time slice length assigned to this task.
    pub time_quanta: OsTick,
    /// Ticks remaining in the current time slice.
    pub time_quanta_ctr: OsTick,

    // ============ Runtime accounting ============
    /// Accumulated ticks this task has spent running.
    pub run_time_ticks: OsTick,
    /// Tick at which this task was last switched in; 0 means it has
    /// never run yet.
    pub last_switch_in_time: OsTick,

    // ============ Mutex priority inheritance ============
    /// Head of the chain of mutexes currently held by this task, cast to
    /// `OsMutex` by `sync::mutex`. Kept as an untyped pointer here to
    /// avoid a module cycle between `task` and `sync::mutex`.
    pub mutex_chain_head: Option<NonNull<()>>,
}

impl OsTcb {
    /// Create a new, uninitialized TCB.
    pub const fn new() -> Self {
        OsTcb {
            stk_ptr: core::ptr::null_mut(),
            stk_base: core::ptr::null_mut(),
            stk_limit: core::ptr::null_mut(),
            stk_size: 0,

            name: "",

            next_ptr: None,
            prev_ptr: None,
            wake_up_time: 0,
            timeout_wakeup: false,
            in_timed_block: false,

            pend_next_ptr: None,
            pend_prev_ptr: None,
            pend_obj_ptr: core::ptr::null(),
            pend_on: OsPendOn::Nothing,
            pend_status: OsPendStatus::Ok,

            prio: 0,
            base_prio: 0,

            task_state: OsTaskState::Ready,
            opt: 0,

            suspend_ctr: 0,

            time_quanta: 0,
            time_quanta_ctr: 0,

            run_time_ticks: 0,
            last_switch_in_time: 0,

            mutex_chain_head: None,
        }
    }

    /// Reset a TCB to its just-created state.
    pub fn init(&mut self) {
        *self = Self::new();
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        self.task_state == OsTaskState::Ready
    }

    #[inline]
    pub fn is_pending(&self) -> bool {
        matches!(
            self.task_state,
            OsTaskState::Pend
                | OsTaskState::PendTimeout
                | OsTaskState::PendSuspended
                | OsTaskState::PendTimeoutSuspended
        )
    }

    #[inline]
    pub fn is_suspended(&self) -> bool {
        matches!(
            self.task_state,
            OsTaskState::Suspended
                | OsTaskState::DelayedSuspended
                | OsTaskState::PendSuspended
                | OsTaskState::PendTimeoutSuspended
        )
    }

    #[inline]
    pub fn is_delayed(&self) -> bool {
        matches!(self.task_state, OsTaskState::Delayed | OsTaskState::DelayedSuspended)
    }

    /// CPU usage in hundredths of a percent (0..=10000), given the total
    /// elapsed tick count since boot. Returns 0 if `total_ticks` is 0.
    #[inline]
    pub fn cpu_usage(&self, total_ticks: OsTick) -> u32 {
        if total_ticks == 0 {
            return 0;
        }
        (self.run_time_ticks as u64 * 10_000 / total_ticks as u64) as u32
    }

    /// Fold the time since this task was last switched in into its
    /// run-time counter. A no-op on the task's very first dispatch
    /// (`last_switch_in_time` still at its initial 0 with nothing run
    /// yet would undercount, so callers only invoke this once the task
    /// has actually been switched in before).
    #[inline]
    pub fn record_run_time(&mut self, now: OsTick) {
        self.run_time_ticks = self.run_time_ticks.wrapping_add(now.wrapping_sub(self.last_switch_in_time));
    }
}

impl Default for OsTcb {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl Send for OsTcb {}
unsafe impl Sync for OsTcb {}

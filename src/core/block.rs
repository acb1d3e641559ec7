//! Shared blocking-primitive engine
//!
//! Semaphores, mutexes and queues each keep their own [`WaitList`] of
//! blocked tasks, but they share the same insertion order, the same
//! timed-block bookkeeping and the same timeout-driven wakeup path. This
//! module holds that common machinery so each primitive only has to
//! implement what's actually specific to it (what "available" means,
//! what a successful wakeup hands over).

use core::ptr::NonNull;

use crate::kernel;
use crate::task::OsTcb;
use crate::types::{OsPendOn, OsPendStatus, OsPrio, OsTaskState, OsTick, TIMEOUT_INFINITE};

/// Order new waiters are inserted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// Plain FIFO — used when all waiters are treated equally.
    Fifo,
    /// Highest priority (lowest numeric value) first, FIFO among ties.
    PriorityDescending,
}

/// Intrusive wait list of blocked tasks, linked via the TCB's event-node
/// fields (`pend_next_ptr`/`pend_prev_ptr`).
#[derive(Debug)]
pub struct WaitList {
    head: Option<NonNull<OsTcb>>,
    tail: Option<NonNull<OsTcb>>,
    #[cfg(feature = "defmt")]
    count: usize,
}

impl WaitList {
    pub const fn new() -> Self {
        WaitList {
            head: None,
            tail: None,
            #[cfg(feature = "defmt")]
            count: 0,
        }
    }

    pub fn init(&mut self) {
        self.head = None;
        self.tail = None;
        #[cfg(feature = "defmt")]
        {
            self.count = 0;
        }
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    #[inline(always)]
    pub fn head(&self) -> Option<NonNull<OsTcb>> {
        self.head
    }

    /// Insert `tcb` at the tail (FIFO).
    pub fn insert_fifo(&mut self, tcb: NonNull<OsTcb>) {
        let tcb_ref = unsafe { &mut *tcb.as_ptr() };

        tcb_ref.pend_next_ptr = None;
        tcb_ref.pend_prev_ptr = self.tail;

        match self.tail {
            Some(tail) => unsafe { (*tail.as_ptr()).pend_next_ptr = Some(tcb) },
            None => self.head = Some(tcb),
        }

        self.tail = Some(tcb);

        #[cfg(feature = "defmt")]
        {
            self.count += 1;
        }
    }

    /// Insert `tcb` ordered by priority, ties broken FIFO.
    pub fn insert_by_prio(&mut self, tcb: NonNull<OsTcb>) {
        let prio = unsafe { tcb.as_ref() }.prio;

        let mut current = self.head;
        let mut prev: Option<NonNull<OsTcb>> = None;

        while let Some(cur_ptr) = current {
            let cur_ref = unsafe { cur_ptr.as_ref() };
            if prio < cur_ref.prio {
                break;
            }
            prev = current;
            current = cur_ref.pend_next_ptr;
        }

        let tcb_mut = unsafe { &mut *tcb.as_ptr() };
        tcb_mut.pend_prev_ptr = prev;
        tcb_mut.pend_next_ptr = current;

        match prev {
            Some(p) => unsafe { (*p.as_ptr()).pend_next_ptr = Some(tcb) },
            None => self.head = Some(tcb),
        }

        match current {
            Some(c) => unsafe { (*c.as_ptr()).pend_prev_ptr = Some(tcb) },
            None => self.tail = Some(tcb),
        }

        #[cfg(feature = "defmt")]
        {
            self.count += 1;
        }
    }

    pub fn insert(&mut self, order: SortOrder, tcb: NonNull<OsTcb>) {
        match order {
            SortOrder::Fifo => self.insert_fifo(tcb),
            SortOrder::PriorityDescending => self.insert_by_prio(tcb),
        }
    }

    /// Highest-priority waiter's priority, or `None` if empty. Used by
    /// mutex priority-restore to fold in a held mutex's waiters.
    pub fn head_prio(&self) -> Option<OsPrio> {
        self.head.map(|h| unsafe { h.as_ref() }.prio)
    }

    pub fn remove(&mut self, tcb: NonNull<OsTcb>) {
        let tcb_ref = unsafe { &mut *tcb.as_ptr() };

        match tcb_ref.pend_prev_ptr {
            Some(prev) => unsafe { (*prev.as_ptr()).pend_next_ptr = tcb_ref.pend_next_ptr },
            None => self.head = tcb_ref.pend_next_ptr,
        }

        match tcb_ref.pend_next_ptr {
            Some(next) => unsafe { (*next.as_ptr()).pend_prev_ptr = tcb_ref.pend_prev_ptr },
            None => self.tail = tcb_ref.pend_prev_ptr,
        }

        tcb_ref.pend_prev_ptr = None;
        tcb_ref.pend_next_ptr = None;

        #[cfg(feature = "defmt")]
        {
            self.count = self.count.saturating_sub(1);
        }
    }
}

impl Default for WaitList {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl Send for WaitList {}
unsafe impl Sync for WaitList {}

/// Move the current task off the ready list and onto `wait_list`,
/// registering it for timeout-driven wakeup if `timeout` is finite.
/// Caller must have already confirmed the wait is actually necessary
/// (object unavailable) and that a non-blocking wait was not requested.
///
/// # Safety
/// Must be called with a critical section held and `tcb` must be the
/// currently running task.
pub(crate) unsafe fn block_current(
    tcb: NonNull<OsTcb>,
    wait_list: &mut WaitList,
    order: SortOrder,
    pend_on: OsPendOn,
    obj_ptr: *const (),
    timeout: OsTick,
) {
    let tcb_ref = unsafe { &mut *tcb.as_ptr() };

    unsafe { crate::sched::os_rdy_list_remove(tcb) };

    tcb_ref.pend_on = pend_on;
    tcb_ref.pend_status = OsPendStatus::Ok;
    tcb_ref.pend_obj_ptr = obj_ptr;

    if timeout == TIMEOUT_INFINITE {
        tcb_ref.task_state = if tcb_ref.is_suspended() {
            OsTaskState::PendSuspended
        } else {
            OsTaskState::Pend
        };
    } else {
        let now = kernel::KERNEL.tick_get();
        tcb_ref.wake_up_time = now.wrapping_add(timeout);
        tcb_ref.timeout_wakeup = false;
        tcb_ref.in_timed_block = true;
        unsafe { kernel::timed_block_list().insert(tcb) };
        tcb_ref.task_state = if tcb_ref.is_suspended() {
            OsTaskState::PendTimeoutSuspended
        } else {
            OsTaskState::PendTimeout
        };
    }

    wait_list.insert(order, tcb);
}

/// Undo the timed-block registration made by `block_current`, if it's
/// still in place. Idempotent: a no-op if the tick handler already
/// popped this task off the timed-block list.
///
/// # Safety
/// Must be called with a critical section held.
pub(crate) unsafe fn clear_timed_block(tcb: NonNull<OsTcb>) {
    let tcb_ref = unsafe { &mut *tcb.as_ptr() };
    if tcb_ref.in_timed_block {
        unsafe { kernel::timed_block_list().remove(tcb) };
        tcb_ref.in_timed_block = false;
    }
}

/// Remove the highest-priority waiter and make it ready, handing it a
/// successful wakeup. Caller is responsible for primitive-specific
/// payload transfer (ownership, count, message copy) before or after
/// calling this.
///
/// # Safety
/// Must be called with a critical section held.
pub(crate) unsafe fn wake_one(wait_list: &mut WaitList) -> Option<NonNull<OsTcb>> {
    let tcb = wait_list.head()?;
    wait_list.remove(tcb);
    unsafe { clear_timed_block(tcb) };

    let tcb_ref = unsafe { &mut *tcb.as_ptr() };
    tcb_ref.pend_on = OsPendOn::Nothing;
    tcb_ref.pend_obj_ptr = core::ptr::null();
    tcb_ref.pend_status = OsPendStatus::Ok;

    if tcb_ref.is_suspended() {
        tcb_ref.task_state = OsTaskState::Suspended;
    } else {
        tcb_ref.task_state = OsTaskState::Ready;
        unsafe { crate::sched::os_rdy_list_insert(tcb) };
    }

    Some(tcb)
}

/// Translate the pend-status an awakened task finds on its TCB into a
/// `Result`, running `on_ok` to produce the success payload.
///
/// Per §4.4, this must run in a *fresh* critical section entered after
/// `schedule()` has returned control to this task — never reused from
/// the critical section that called `block_current`, since the switch
/// itself only happens once that section's guard drops and interrupts
/// are re-enabled.
///
/// # Safety
/// Must be called with a critical section held.
pub(crate) unsafe fn resolve_pend<T>(
    tcb: NonNull<OsTcb>,
    on_ok: impl FnOnce() -> T,
) -> crate::error::OsResult<T> {
    use crate::error::OsError;

    let tcb_ref = unsafe { tcb.as_ref() };
    match tcb_ref.pend_status {
        OsPendStatus::Ok => Ok(on_ok()),
        OsPendStatus::Timeout => Err(OsError::Timeout),
        OsPendStatus::Abort => Err(OsError::Failed),
        OsPendStatus::Del => Err(OsError::SyncInvalid),
    }
}

/// Called by the tick handler when a task's timed wait has expired:
/// removes it from whichever primitive wait list it's on and marks the
/// wakeup as a timeout.
///
/// # Safety
/// Must be called with a critical section held; `tcb` must currently be
/// on a primitive's wait list (its `pend_on` must not be `Nothing`).
pub(crate) unsafe fn cancel_wait(tcb: NonNull<OsTcb>) {
    let pend_on = unsafe { tcb.as_ref() }.pend_on;
    match pend_on {
        #[cfg(feature = "mutex")]
        OsPendOn::Mutex => unsafe { crate::sync::mutex::remove_waiter(tcb) },
        #[cfg(feature = "queue")]
        OsPendOn::QueueRead | OsPendOn::QueueWrite => unsafe { crate::sync::queue::remove_waiter(tcb, pend_on) },
        #[cfg(feature = "sem")]
        OsPendOn::Semaphore => unsafe { crate::sync::sem::remove_waiter(tcb) },
        _ => {}
    }
}

/// Shared tail of a primitive's `remove_waiter`: unlink from `wait_list`
/// and make the task ready, reporting a timeout.
///
/// # Safety
/// Must be called with a critical section held.
pub(crate) unsafe fn wake_for_timeout(wait_list: &mut WaitList, tcb: NonNull<OsTcb>) {
    wait_list.remove(tcb);

    let tcb_ref = unsafe { &mut *tcb.as_ptr() };
    tcb_ref.pend_on = OsPendOn::Nothing;
    tcb_ref.pend_obj_ptr = core::ptr::null();
    tcb_ref.pend_status = OsPendStatus::Timeout;
    tcb_ref.timeout_wakeup = true;
    tcb_ref.in_timed_block = false;

    if tcb_ref.is_suspended() {
        tcb_ref.task_state = OsTaskState::Suspended;
    } else {
        tcb_ref.task_state = OsTaskState::Ready;
        unsafe { crate::sched::os_rdy_list_insert(tcb) };
    }
}

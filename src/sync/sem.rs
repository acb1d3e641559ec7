//! Counting semaphores
//!
//! Built on the shared [`crate::block`] engine: waiters queue in
//! priority order and a `post` either hands off directly to the
//! highest-priority waiter or, if none is waiting, bumps the count.

use core::cell::UnsafeCell;
use core::ptr::NonNull;

use crate::block::{self, SortOrder, WaitList};
use crate::config::CFG_SEM_COUNT_MAX;
use crate::critical::{critical_section, is_isr_context};
use crate::error::{OsError, OsResult};
use crate::kernel;
use crate::sched;
use crate::task::OsTcb;
use crate::types::{opt, OsObjType, OsOpt, OsSemCtr, OsTick};

/// Counting semaphore.
pub struct OsSem {
    obj_type: OsObjType,
    wait_list: WaitList,
    count: OsSemCtr,
    #[cfg_attr(not(feature = "defmt"), allow(dead_code))]
    name: &'static str,
}

impl OsSem {
    pub const fn new(count: OsSemCtr) -> Self {
        OsSem {
            obj_type: OsObjType::Sem,
            wait_list: WaitList::new(),
            count,
            name: "",
        }
    }

    pub fn create(&mut self, count: OsSemCtr, name: &'static str) -> OsResult<()> {
        if is_isr_context() {
            return Err(OsError::InInterrupt);
        }

        critical_section(|_cs| {
            self.obj_type = OsObjType::Sem;
            self.wait_list.init();
            self.count = count;
            self.name = name;
            Ok(())
        })
    }

    /// Wait on the semaphore.
    ///
    /// # Returns
    /// * `Ok(count)` - acquired, returns the count left behind
    /// * `Err(OsError::ResourceUnavailable)` - non-blocking and unavailable
    /// * `Err(OsError::Timeout)` - timeout expired
    pub fn pend(&mut self, timeout: OsTick, pend_opt: OsOpt) -> OsResult<OsSemCtr> {
        if is_isr_context() {
            return Err(OsError::InInterrupt);
        }

        if !kernel::KERNEL.is_running() {
            return Err(OsError::State);
        }

        if self.obj_type != OsObjType::Sem {
            return Err(OsError::SyncInvalid);
        }

        enum Phase {
            Resolved(OsSemCtr),
            Blocked(NonNull<OsTcb>),
        }

        let phase = critical_section(|_cs| {
            if self.count > 0 {
                self.count -= 1;
                return Ok(Phase::Resolved(self.count));
            }

            if timeout == 0 || pend_opt & opt::PEND_NON_BLOCKING != 0 {
                return Err(OsError::ResourceUnavailable);
            }

            if kernel::KERNEL.sched_lock_nesting() > 0 {
                return Err(OsError::State);
            }

            let cur_tcb_ptr = unsafe { kernel::tcb_cur_ptr() }.ok_or(OsError::TaskInvalid)?;

            unsafe {
                block::block_current(
                    cur_tcb_ptr,
                    &mut self.wait_list,
                    SortOrder::PriorityDescending,
                    crate::types::OsPendOn::Semaphore,
                    self as *const _ as *const (),
                    timeout,
                );
            }

            Ok(Phase::Blocked(cur_tcb_ptr))
        })?;

        let cur_tcb_ptr = match phase {
            Phase::Resolved(count) => return Ok(count),
            Phase::Blocked(tcb) => tcb,
        };

        // The switch only actually runs once we're outside the critical
        // section above (interrupts stay masked while it's held). Resolve
        // the outcome in a fresh critical section after it returns.
        sched::os_sched();

        critical_section(|_cs| unsafe { block::resolve_pend(cur_tcb_ptr, || self.count) })
    }

    /// Signal the semaphore: wakes the highest-priority waiter if any,
    /// otherwise increments the count (capped at `CFG_SEM_COUNT_MAX`).
    pub fn post(&mut self, post_opt: OsOpt) -> OsResult<OsSemCtr> {
        if self.obj_type != OsObjType::Sem {
            return Err(OsError::SyncInvalid);
        }

        critical_section(|_cs| {
            if !self.wait_list.is_empty() {
                unsafe { block::wake_one(&mut self.wait_list) };

                if post_opt & opt::POST_NO_SCHED == 0 && !is_isr_context() {
                    sched::os_sched();
                }

                return Ok(self.count);
            }

            if self.count >= CFG_SEM_COUNT_MAX {
                return Err(OsError::OutOfRange);
            }
            self.count += 1;
            Ok(self.count)
        })
    }

    #[inline(always)]
    pub fn count(&self) -> OsSemCtr {
        self.count
    }

    pub fn set(&mut self, count: OsSemCtr) -> OsResult<()> {
        if is_isr_context() {
            return Err(OsError::InInterrupt);
        }

        critical_section(|_cs| {
            self.count = count.min(CFG_SEM_COUNT_MAX);
            Ok(())
        })
    }
}

impl Default for OsSem {
    fn default() -> Self {
        Self::new(0)
    }
}

unsafe impl Send for OsSem {}
unsafe impl Sync for OsSem {}

/// Remove `tcb` from the semaphore it's pending on, reporting a timeout.
/// Called by [`crate::block::cancel_wait`] when a timed wait expires or
/// the task is deleted out from under it.
///
/// # Safety
/// `tcb`'s `pend_obj_ptr` must point at the `OsSem` it is currently
/// queued on, and a critical section must be held.
pub(crate) unsafe fn remove_waiter(tcb: NonNull<OsTcb>) {
    let obj_ptr = unsafe { tcb.as_ref() }.pend_obj_ptr as *mut OsSem;
    if obj_ptr.is_null() {
        return;
    }
    let sem = unsafe { &mut *obj_ptr };
    unsafe { block::wake_for_timeout(&mut sem.wait_list, tcb) };
}

// ============ Safe wrapper ============

pub struct Semaphore {
    inner: UnsafeCell<OsSem>,
}

unsafe impl Sync for Semaphore {}
unsafe impl Send for Semaphore {}

impl Semaphore {
    pub const fn new(count: OsSemCtr) -> Self {
        Semaphore {
            inner: UnsafeCell::new(OsSem::new(count)),
        }
    }

    pub fn create(&self, count: OsSemCtr, name: &'static str) -> OsResult<()> {
        unsafe { (*self.inner.get()).create(count, name) }
    }

    /// `timeout` of `0` is a non-blocking try; use
    /// [`crate::types::TIMEOUT_INFINITE`] to wait forever.
    pub fn wait(&self, timeout: OsTick, opt: OsOpt) -> OsResult<OsSemCtr> {
        unsafe { (*self.inner.get()).pend(timeout, opt) }
    }

    pub fn try_wait(&self) -> OsResult<OsSemCtr> {
        unsafe { (*self.inner.get()).pend(0, opt::PEND_NON_BLOCKING) }
    }

    pub fn signal(&self, opt: OsOpt) -> OsResult<OsSemCtr> {
        unsafe { (*self.inner.get()).post(opt) }
    }

    #[inline]
    pub fn count(&self) -> OsSemCtr {
        unsafe { (*self.inner.get()).count() }
    }
}

impl Default for Semaphore {
    fn default() -> Self {
        Self::new(0)
    }
}

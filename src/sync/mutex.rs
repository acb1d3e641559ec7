//! Mutexes with chained priority inheritance
//!
//! A blocked higher-priority waiter boosts its mutex's owner to its own
//! priority. If that owner is itself blocked waiting on another mutex,
//! the boost propagates to *that* mutex's owner, and so on, up to
//! [`CFG_MUTEX_MAX_CHAIN_DEPTH`] hops — deeper than that is treated as a
//! deadlock rather than walked forever.
//!
//! Release restores priority by recomputing
//! `max(base_prio, waiter priorities across every mutex still held)`
//! rather than snapshotting a single prior value, so releasing one of
//! several held mutexes can never drop the owner below what its
//! remaining mutexes still require.

use core::cell::UnsafeCell;
use core::ptr::NonNull;

use crate::block::{self, SortOrder, WaitList};
use crate::config::CFG_MUTEX_MAX_CHAIN_DEPTH;
use crate::critical::{critical_section, is_isr_context};
use crate::error::{OsError, OsResult};
use crate::kernel;
use crate::sched;
use crate::task::OsTcb;
use crate::types::{opt, OsNestingCtr, OsObjType, OsOpt, OsPendOn, OsPrio, OsTick};

/// Mutex with priority inheritance.
pub struct OsMutex {
    obj_type: OsObjType,
    wait_list: WaitList,
    owner: Option<NonNull<OsTcb>>,
    nesting_ctr: OsNestingCtr,
    /// Next mutex in the owning task's held-mutex chain (`OsTcb::mutex_chain_head`).
    next_in_owner_chain: Option<NonNull<OsMutex>>,
    #[cfg_attr(not(feature = "defmt"), allow(dead_code))]
    name: &'static str,
}

impl OsMutex {
    pub const fn new() -> Self {
        OsMutex {
            obj_type: OsObjType::Mutex,
            wait_list: WaitList::new(),
            owner: None,
            nesting_ctr: 0,
            next_in_owner_chain: None,
            name: "",
        }
    }

    pub fn create(&mut self, name: &'static str) -> OsResult<()> {
        if is_isr_context() {
            return Err(OsError::InInterrupt);
        }

        critical_section(|_cs| {
            self.obj_type = OsObjType::Mutex;
            self.wait_list.init();
            self.owner = None;
            self.nesting_ctr = 0;
            self.next_in_owner_chain = None;
            self.name = name;
            Ok(())
        })
    }

    /// Acquire the mutex, blocking if it's held by another task.
    pub fn pend(&mut self, timeout: OsTick, pend_opt: OsOpt) -> OsResult<()> {
        if is_isr_context() {
            return Err(OsError::InInterrupt);
        }

        if !kernel::KERNEL.is_running() {
            return Err(OsError::State);
        }

        if self.obj_type != OsObjType::Mutex {
            return Err(OsError::SyncInvalid);
        }

        let blocked_tcb = critical_section(|_cs| {
            let cur_tcb_ptr = unsafe { kernel::tcb_cur_ptr() }.ok_or(OsError::TaskInvalid)?;

            if self.owner.is_none() {
                self.acquire(cur_tcb_ptr);
                return Ok(None);
            }

            if self.owner == Some(cur_tcb_ptr) {
                if self.nesting_ctr == OsNestingCtr::MAX {
                    return Err(OsError::OutOfRange);
                }
                self.nesting_ctr += 1;
                return Ok(None);
            }

            if timeout == 0 || pend_opt & opt::PEND_NON_BLOCKING != 0 {
                return Err(OsError::ResourceUnavailable);
            }

            if kernel::KERNEL.sched_lock_nesting() > 0 {
                return Err(OsError::State);
            }

            let cur_prio = unsafe { cur_tcb_ptr.as_ref() }.prio;
            let owner_ptr = self.owner.expect("checked above");
            self.boost_chain(owner_ptr, cur_prio)?;

            unsafe {
                block::block_current(
                    cur_tcb_ptr,
                    &mut self.wait_list,
                    SortOrder::PriorityDescending,
                    OsPendOn::Mutex,
                    self as *const _ as *const (),
                    timeout,
                );
            }

            Ok(Some(cur_tcb_ptr))
        })?;

        let Some(cur_tcb_ptr) = blocked_tcb else {
            return Ok(());
        };

        // The switch only actually runs once we're outside the critical
        // section above (interrupts stay masked while it's held). Resolve
        // the outcome in a fresh critical section after it returns.
        sched::os_sched();

        critical_section(|_cs| unsafe { block::resolve_pend(cur_tcb_ptr, || ()) })
    }

    /// Release the mutex. Restores the calling task's priority (via
    /// recompute, see module docs) and hands ownership straight to the
    /// highest-priority waiter, if any.
    pub fn post(&mut self, post_opt: OsOpt) -> OsResult<()> {
        if is_isr_context() {
            return Err(OsError::InInterrupt);
        }

        if !kernel::KERNEL.is_running() {
            return Err(OsError::State);
        }

        if self.obj_type != OsObjType::Mutex {
            return Err(OsError::SyncInvalid);
        }

        critical_section(|_cs| {
            let cur_tcb_ptr = unsafe { kernel::tcb_cur_ptr() }.ok_or(OsError::TaskInvalid)?;

            if self.owner != Some(cur_tcb_ptr) {
                return Err(OsError::SyncNotOwner);
            }

            if self.nesting_ctr > 1 {
                self.nesting_ctr -= 1;
                return Ok(());
            }

            self.nesting_ctr = 0;
            let self_ptr = unsafe { NonNull::new_unchecked(self as *mut OsMutex) };

            let owner_tcb = unsafe { &mut *cur_tcb_ptr.as_ptr() };
            unlink_from_chain(owner_tcb, self_ptr);

            let new_prio = recompute_prio(owner_tcb);
            if new_prio != owner_tcb.prio {
                if owner_tcb.is_ready() {
                    unsafe { sched::os_rdy_list_change_prio(cur_tcb_ptr, new_prio) };
                } else {
                    owner_tcb.prio = new_prio;
                }
            }

            if let Some(waiter_ptr) = unsafe { block::wake_one(&mut self.wait_list) } {
                self.owner = Some(waiter_ptr);
                self.nesting_ctr = 1;

                let waiter_ref = unsafe { &mut *waiter_ptr.as_ptr() };
                self.next_in_owner_chain = waiter_ref.mutex_chain_head.map(|p| p.cast());
                waiter_ref.mutex_chain_head = Some(self_ptr.cast());

                if post_opt & opt::POST_NO_SCHED == 0 {
                    sched::os_sched();
                }
            } else {
                self.owner = None;
            }

            Ok(())
        })
    }

    /// Tear down the mutex. Rejected while it is held or any task is
    /// waiting on it.
    pub fn destroy(&mut self) -> OsResult<()> {
        if is_isr_context() {
            return Err(OsError::InInterrupt);
        }

        critical_section(|_cs| {
            if self.owner.is_some() || !self.wait_list.is_empty() {
                return Err(OsError::State);
            }

            self.obj_type = OsObjType::None;
            self.nesting_ctr = 0;
            self.next_in_owner_chain = None;
            Ok(())
        })
    }

    #[inline]
    pub fn is_owned(&self) -> bool {
        self.owner.is_some()
    }

    pub fn owner_prio(&self) -> Option<OsPrio> {
        self.owner.map(|ptr| unsafe { ptr.as_ref() }.prio)
    }

    fn acquire(&mut self, tcb_ptr: NonNull<OsTcb>) {
        self.owner = Some(tcb_ptr);
        self.nesting_ctr = 1;

        let self_ptr = unsafe { NonNull::new_unchecked(self as *mut OsMutex) };
        let tcb_ref = unsafe { &mut *tcb_ptr.as_ptr() };
        self.next_in_owner_chain = tcb_ref.mutex_chain_head.map(|p| p.cast());
        tcb_ref.mutex_chain_head = Some(self_ptr.cast());
    }

    /// Boost `owner_ptr`'s priority to `target_prio`, following the
    /// chain through any mutex `owner_ptr` is itself blocked on.
    fn boost_chain(&self, owner_ptr: NonNull<OsTcb>, target_prio: OsPrio) -> OsResult<()> {
        let mut cur = owner_ptr;
        let mut depth = 0usize;

        loop {
            let cur_ref = unsafe { &mut *cur.as_ptr() };

            if cur_ref.prio <= target_prio {
                break;
            }

            if cur_ref.is_ready() {
                unsafe { sched::os_rdy_list_change_prio(cur, target_prio) };
            } else {
                cur_ref.prio = target_prio;
            }

            if cur_ref.pend_on == OsPendOn::Mutex && !cur_ref.pend_obj_ptr.is_null() {
                let next_mutex = unsafe { &*(cur_ref.pend_obj_ptr as *const OsMutex) };
                if let Some(next_owner) = next_mutex.owner {
                    depth += 1;
                    if depth > CFG_MUTEX_MAX_CHAIN_DEPTH {
                        return Err(OsError::SyncDeadlock);
                    }
                    cur = next_owner;
                    continue;
                }
            }

            break;
        }

        Ok(())
    }
}

impl Default for OsMutex {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl Send for OsMutex {}
unsafe impl Sync for OsMutex {}

/// Remove `target` from `owner_tcb`'s held-mutex chain, wherever it is.
fn unlink_from_chain(owner_tcb: &mut OsTcb, target: NonNull<OsMutex>) {
    let mut cur = owner_tcb.mutex_chain_head;
    let mut prev: Option<NonNull<OsMutex>> = None;

    while let Some(cur_erased) = cur {
        let cur_mtx: NonNull<OsMutex> = cur_erased.cast();
        if cur_mtx == target {
            let next = unsafe { cur_mtx.as_ref() }.next_in_owner_chain;
            match prev {
                Some(p) => unsafe { (*p.as_ptr()).next_in_owner_chain = next },
                None => owner_tcb.mutex_chain_head = next.map(|n| n.cast()),
            }
            return;
        }
        prev = Some(cur_mtx);
        cur = unsafe { cur_mtx.as_ref() }.next_in_owner_chain.map(|n| n.cast());
    }
}

/// `max(base_prio, waiter priorities across every mutex still held)`,
/// bounded by `CFG_MUTEX_MAX_HELD` so a corrupted chain can't loop
/// forever.
fn recompute_prio(owner_tcb: &OsTcb) -> OsPrio {
    let mut best = owner_tcb.base_prio;
    let mut cur = owner_tcb.mutex_chain_head;
    let mut walked = 0usize;

    while let Some(cur_erased) = cur {
        walked += 1;
        if walked > crate::config::CFG_MUTEX_MAX_HELD {
            break;
        }

        let mtx: NonNull<OsMutex> = cur_erased.cast();
        let mtx_ref = unsafe { mtx.as_ref() };
        if let Some(waiter_prio) = mtx_ref.wait_list.head_prio() {
            if waiter_prio < best {
                best = waiter_prio;
            }
        }
        cur = mtx_ref.next_in_owner_chain.map(|n| n.cast());
    }

    best
}

/// Remove `tcb` from the mutex it's pending on, reporting a timeout.
/// Called by [`crate::block::cancel_wait`].
///
/// # Safety
/// `tcb`'s `pend_obj_ptr` must point at the `OsMutex` it is currently
/// queued on, and a critical section must be held.
pub(crate) unsafe fn remove_waiter(tcb: NonNull<OsTcb>) {
    let obj_ptr = unsafe { tcb.as_ref() }.pend_obj_ptr as *mut OsMutex;
    if obj_ptr.is_null() {
        return;
    }
    let mtx = unsafe { &mut *obj_ptr };
    unsafe { block::wake_for_timeout(&mut mtx.wait_list, tcb) };
}

// ============ Safe wrapper ============

pub struct Mutex {
    inner: UnsafeCell<OsMutex>,
}

unsafe impl Sync for Mutex {}
unsafe impl Send for Mutex {}

impl Mutex {
    pub const fn new() -> Self {
        Mutex {
            inner: UnsafeCell::new(OsMutex::new()),
        }
    }

    pub fn create(&self, name: &'static str) -> OsResult<()> {
        unsafe { (*self.inner.get()).create(name) }
    }

    /// `timeout` of `0` is a non-blocking try; use
    /// [`crate::types::TIMEOUT_INFINITE`] to wait forever.
    pub fn lock(&self, timeout: OsTick, opt: OsOpt) -> OsResult<()> {
        unsafe { (*self.inner.get()).pend(timeout, opt) }
    }

    pub fn unlock(&self, opt: OsOpt) -> OsResult<()> {
        unsafe { (*self.inner.get()).post(opt) }
    }

    pub fn destroy(&self) -> OsResult<()> {
        unsafe { (*self.inner.get()).destroy() }
    }

    #[inline]
    pub fn is_owned(&self) -> bool {
        unsafe { (*self.inner.get()).is_owned() }
    }

    pub fn owner_prio(&self) -> Option<OsPrio> {
        unsafe { (*self.inner.get()).owner_prio() }
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

//! Bounded message queues
//!
//! Fixed-size elements copied by value into a ring buffer backed by the
//! kernel heap. Readers and writers queue on two separate wait lists,
//! both priority-ordered, sharing the blocking engine in [`crate::block`].
//! Emptiness and fullness are tracked via a used-element count rather
//! than a one-slot gap between the read and write indices.

use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::ptr::NonNull;

use crate::block::{self, SortOrder, WaitList};
use crate::critical::{critical_section, is_isr_context};
use crate::error::{OsError, OsResult};
use crate::kernel;
use crate::sched;
use crate::task::OsTcb;
use crate::types::{opt, OsObjType, OsOpt, OsPendOn, OsTick};

/// Bounded queue of fixed-size, byte-copied elements.
pub struct OsQueue {
    obj_type: OsObjType,
    reader_wait: WaitList,
    writer_wait: WaitList,
    storage: Option<NonNull<u8>>,
    elem_size: usize,
    capacity: usize,
    read_idx: usize,
    write_idx: usize,
    count: usize,
    #[cfg_attr(not(feature = "defmt"), allow(dead_code))]
    name: &'static str,
}

impl OsQueue {
    pub const fn new() -> Self {
        OsQueue {
            obj_type: OsObjType::Queue,
            reader_wait: WaitList::new(),
            writer_wait: WaitList::new(),
            storage: None,
            elem_size: 0,
            capacity: 0,
            read_idx: 0,
            write_idx: 0,
            count: 0,
            name: "",
        }
    }

    /// Create the queue, allocating `capacity * elem_size` bytes of
    /// backing storage from the kernel heap.
    pub fn create(&mut self, elem_size: usize, capacity: usize, name: &'static str) -> OsResult<()> {
        if is_isr_context() {
            return Err(OsError::InInterrupt);
        }

        if elem_size == 0 || capacity == 0 {
            return Err(OsError::InvalidParam);
        }

        let bytes = elem_size.checked_mul(capacity).ok_or(OsError::OutOfRange)?;

        critical_section(|cs| {
            let storage = kernel::HEAP.get(cs).alloc(bytes).ok_or(OsError::NotEnoughMemory)?;

            self.obj_type = OsObjType::Queue;
            self.reader_wait.init();
            self.writer_wait.init();
            self.storage = Some(storage);
            self.elem_size = elem_size;
            self.capacity = capacity;
            self.read_idx = 0;
            self.write_idx = 0;
            self.count = 0;
            self.name = name;

            Ok(())
        })
    }

    /// Release the queue's backing storage. Rejected while the queue is
    /// non-empty or any task is waiting on it.
    pub fn destroy(&mut self) -> OsResult<()> {
        if is_isr_context() {
            return Err(OsError::InInterrupt);
        }

        critical_section(|cs| {
            if self.count != 0 || !self.reader_wait.is_empty() || !self.writer_wait.is_empty() {
                return Err(OsError::State);
            }

            if let Some(storage) = self.storage.take() {
                unsafe { kernel::HEAP.get(cs).free(storage) };
            }
            self.obj_type = OsObjType::None;

            Ok(())
        })
    }

    unsafe fn slot_ptr(&self, idx: usize) -> *mut u8 {
        let base = self.storage.expect("queue not created").as_ptr();
        unsafe { base.add(idx * self.elem_size) }
    }

    /// Write `elem` into the queue, blocking while full.
    ///
    /// # Returns
    /// * `Err(OsError::QueueSizeMismatch)` - `elem.len()` doesn't match the configured element size
    /// * `Err(OsError::ResourceUnavailable)` - full and non-blocking
    /// * `Err(OsError::Timeout)` - timeout expired while full
    pub fn write(&mut self, elem: &[u8], timeout: OsTick, send_opt: OsOpt) -> OsResult<()> {
        if is_isr_context() {
            return Err(OsError::InInterrupt);
        }

        if !kernel::KERNEL.is_running() {
            return Err(OsError::State);
        }

        if self.obj_type != OsObjType::Queue {
            return Err(OsError::SyncInvalid);
        }

        if elem.len() != self.elem_size {
            return Err(OsError::QueueSizeMismatch);
        }

        enum Phase {
            Done,
            Blocked(NonNull<OsTcb>),
        }

        loop {
            let phase = critical_section(|_cs| {
                if self.count < self.capacity {
                    unsafe {
                        core::ptr::copy_nonoverlapping(elem.as_ptr(), self.slot_ptr(self.write_idx), self.elem_size);
                    }
                    self.write_idx = (self.write_idx + 1) % self.capacity;
                    self.count += 1;

                    let woke = unsafe { block::wake_one(&mut self.reader_wait) }.is_some();
                    if woke && send_opt & opt::POST_NO_SCHED == 0 {
                        sched::os_sched();
                    }

                    return Ok(Phase::Done);
                }

                if timeout == 0 || send_opt & opt::PEND_NON_BLOCKING != 0 {
                    return Err(OsError::ResourceUnavailable);
                }

                if kernel::KERNEL.sched_lock_nesting() > 0 {
                    return Err(OsError::State);
                }

                let cur_tcb_ptr = unsafe { kernel::tcb_cur_ptr() }.ok_or(OsError::TaskInvalid)?;

                unsafe {
                    block::block_current(
                        cur_tcb_ptr,
                        &mut self.writer_wait,
                        SortOrder::PriorityDescending,
                        OsPendOn::QueueWrite,
                        self as *const _ as *const (),
                        timeout,
                    );
                }

                Ok(Phase::Blocked(cur_tcb_ptr))
            })?;

            let cur_tcb_ptr = match phase {
                Phase::Done => return Ok(()),
                Phase::Blocked(tcb) => tcb,
            };

            // The switch only actually runs once we're outside the critical
            // section above. Resolve the wakeup in a fresh one afterwards
            // and, unless it timed out, loop back to recheck fullness.
            sched::os_sched();

            critical_section(|_cs| unsafe { block::resolve_pend(cur_tcb_ptr, || ()) })?;
        }
    }

    /// Read an element into `out`, blocking while empty.
    pub fn read(&mut self, out: &mut [u8], timeout: OsTick, recv_opt: OsOpt) -> OsResult<()> {
        if is_isr_context() {
            return Err(OsError::InInterrupt);
        }

        if !kernel::KERNEL.is_running() {
            return Err(OsError::State);
        }

        if self.obj_type != OsObjType::Queue {
            return Err(OsError::SyncInvalid);
        }

        if out.len() != self.elem_size {
            return Err(OsError::QueueSizeMismatch);
        }

        enum Phase {
            Done,
            Blocked(NonNull<OsTcb>),
        }

        loop {
            let phase = critical_section(|_cs| {
                if self.count > 0 {
                    unsafe {
                        core::ptr::copy_nonoverlapping(self.slot_ptr(self.read_idx), out.as_mut_ptr(), self.elem_size);
                    }
                    self.read_idx = (self.read_idx + 1) % self.capacity;
                    self.count -= 1;

                    let woke = unsafe { block::wake_one(&mut self.writer_wait) }.is_some();
                    if woke && recv_opt & opt::POST_NO_SCHED == 0 {
                        sched::os_sched();
                    }

                    return Ok(Phase::Done);
                }

                if timeout == 0 || recv_opt & opt::PEND_NON_BLOCKING != 0 {
                    return Err(OsError::ResourceUnavailable);
                }

                if kernel::KERNEL.sched_lock_nesting() > 0 {
                    return Err(OsError::State);
                }

                let cur_tcb_ptr = unsafe { kernel::tcb_cur_ptr() }.ok_or(OsError::TaskInvalid)?;

                unsafe {
                    block::block_current(
                        cur_tcb_ptr,
                        &mut self.reader_wait,
                        SortOrder::PriorityDescending,
                        OsPendOn::QueueRead,
                        self as *const _ as *const (),
                        timeout,
                    );
                }

                Ok(Phase::Blocked(cur_tcb_ptr))
            })?;

            let cur_tcb_ptr = match phase {
                Phase::Done => return Ok(()),
                Phase::Blocked(tcb) => tcb,
            };

            // The switch only actually runs once we're outside the critical
            // section above. Resolve the wakeup in a fresh one afterwards
            // and, unless it timed out, loop back to recheck emptiness.
            sched::os_sched();

            critical_section(|_cs| unsafe { block::resolve_pend(cur_tcb_ptr, || ()) })?;
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.count == self.capacity
    }
}

impl Default for OsQueue {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl Send for OsQueue {}
unsafe impl Sync for OsQueue {}

/// Remove `tcb` from whichever of the queue's two wait lists it's
/// actually queued on, reporting a timeout. Called by
/// [`crate::block::cancel_wait`].
///
/// # Safety
/// `tcb`'s `pend_obj_ptr` must point at the `OsQueue` it is currently
/// queued on, and a critical section must be held.
pub(crate) unsafe fn remove_waiter(tcb: NonNull<OsTcb>, pend_on: OsPendOn) {
    let obj_ptr = unsafe { tcb.as_ref() }.pend_obj_ptr as *mut OsQueue;
    if obj_ptr.is_null() {
        return;
    }
    let queue = unsafe { &mut *obj_ptr };
    let list = match pend_on {
        OsPendOn::QueueRead => &mut queue.reader_wait,
        OsPendOn::QueueWrite => &mut queue.writer_wait,
        _ => return,
    };
    unsafe { block::wake_for_timeout(list, tcb) };
}

// ============ Safe wrapper ============

/// Type-safe queue of `T`, copied by value. `T` must be `Copy` since
/// elements are moved in and out via a raw byte copy.
pub struct Queue<T: Copy> {
    inner: UnsafeCell<OsQueue>,
    _marker: core::marker::PhantomData<T>,
}

unsafe impl<T: Copy> Sync for Queue<T> {}
unsafe impl<T: Copy> Send for Queue<T> {}

impl<T: Copy> Queue<T> {
    pub const fn new() -> Self {
        Queue {
            inner: UnsafeCell::new(OsQueue::new()),
            _marker: core::marker::PhantomData,
        }
    }

    pub fn create(&self, capacity: usize, name: &'static str) -> OsResult<()> {
        unsafe { (*self.inner.get()).create(core::mem::size_of::<T>(), capacity, name) }
    }

    pub fn destroy(&self) -> OsResult<()> {
        unsafe { (*self.inner.get()).destroy() }
    }

    /// `timeout` of `0` is a non-blocking try; use
    /// [`crate::types::TIMEOUT_INFINITE`] to wait forever.
    pub fn send(&self, item: T, timeout: OsTick, opt: OsOpt) -> OsResult<()> {
        let bytes =
            unsafe { core::slice::from_raw_parts(&item as *const T as *const u8, core::mem::size_of::<T>()) };
        unsafe { (*self.inner.get()).write(bytes, timeout, opt) }
    }

    pub fn receive(&self, timeout: OsTick, opt: OsOpt) -> OsResult<T> {
        let mut item = MaybeUninit::<T>::uninit();
        let out = unsafe { core::slice::from_raw_parts_mut(item.as_mut_ptr() as *mut u8, core::mem::size_of::<T>()) };
        unsafe { (*self.inner.get()).read(out, timeout, opt) }?;
        Ok(unsafe { item.assume_init() })
    }

    #[inline]
    pub fn len(&self) -> usize {
        unsafe { (*self.inner.get()).len() }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        unsafe { (*self.inner.get()).is_empty() }
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        unsafe { (*self.inner.get()).is_full() }
    }
}

impl<T: Copy> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

//! Sorted-by-deadline intrusive list of TCBs, over the same `next_ptr`/
//! `prev_ptr` state-node fields the ready buckets use.
//!
//! Used for both the delay list and the timed-block list: in either
//! case a task carries an absolute `wake_up_time` and the list is kept
//! sorted ascending by that value, so the tick handler only ever has to
//! look at the head to decide whether anything is due.

use core::ptr::NonNull;

use crate::task::OsTcb;
use crate::time::tick_reached;

/// Ascending-by-`wake_up_time` intrusive list of tasks.
#[derive(Debug)]
pub struct TimeSortedList {
    head: Option<NonNull<OsTcb>>,
}

impl TimeSortedList {
    pub const fn new() -> Self {
        TimeSortedList { head: None }
    }

    pub fn init(&mut self) {
        self.head = None;
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    #[inline]
    pub fn head(&self) -> Option<NonNull<OsTcb>> {
        self.head
    }

    /// Insert `tcb` in order of its `wake_up_time`, ties broken FIFO
    /// (an equal deadline is inserted after existing equal entries).
    pub fn insert(&mut self, tcb: NonNull<OsTcb>) {
        let wake = unsafe { tcb.as_ref() }.wake_up_time;

        let mut prev: Option<NonNull<OsTcb>> = None;
        let mut cur = self.head;

        while let Some(cur_ptr) = cur {
            let cur_ref = unsafe { cur_ptr.as_ref() };
            if !tick_reached(wake, cur_ref.wake_up_time) {
                break;
            }
            prev = cur;
            cur = cur_ref.next_ptr;
        }

        let tcb_mut = unsafe { &mut *tcb.as_ptr() };
        tcb_mut.prev_ptr = prev;
        tcb_mut.next_ptr = cur;

        match prev {
            Some(p) => unsafe { (*p.as_ptr()).next_ptr = Some(tcb) },
            None => self.head = Some(tcb),
        }

        if let Some(c) = cur {
            unsafe { (*c.as_ptr()).prev_ptr = Some(tcb) };
        }
    }

    /// Remove `tcb` from the list.
    pub fn remove(&mut self, tcb: NonNull<OsTcb>) {
        let tcb_ref = unsafe { &mut *tcb.as_ptr() };

        match tcb_ref.prev_ptr {
            Some(prev) => unsafe { (*prev.as_ptr()).next_ptr = tcb_ref.next_ptr },
            None => self.head = tcb_ref.next_ptr,
        }

        if let Some(next) = tcb_ref.next_ptr {
            unsafe { (*next.as_ptr()).prev_ptr = tcb_ref.prev_ptr };
        }

        tcb_ref.prev_ptr = None;
        tcb_ref.next_ptr = None;
    }

    /// Remove and return the head if its `wake_up_time` has been
    /// reached as of `now`, else leave the list untouched.
    pub fn pop_if_due(&mut self, now: crate::types::OsTick) -> Option<NonNull<OsTcb>> {
        let head = self.head?;
        let head_ref = unsafe { head.as_ref() };
        if tick_reached(now, head_ref.wake_up_time) {
            self.remove(head);
            Some(head)
        } else {
            None
        }
    }
}

impl Default for TimeSortedList {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl Send for TimeSortedList {}
unsafe impl Sync for TimeSortedList {}

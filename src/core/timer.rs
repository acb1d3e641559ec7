//! Software timers
//!
//! A single list of active timers sorted ascending by absolute wake-up
//! tick, so the tick handler only has to look at the head. Expiry is
//! two-phase: due timers are popped out of the shared list under a
//! critical section into a private, per-call list, then their callbacks
//! run with interrupts enabled. Auto-reload re-insertion and one-shot
//! deactivation each take their own short critical-section entry,
//! rather than holding one across every callback.

use core::cell::UnsafeCell;
use core::ptr::NonNull;

use crate::core::cs_cell::CsCell;
use crate::critical::critical_section;
use crate::error::{OsError, OsResult};
use crate::time::tick_reached;
use crate::types::OsTick;

pub type TimerCallback = fn(arg: *mut ());

/// A software timer.
pub struct OsTimer {
    name: &'static str,
    callback: Option<TimerCallback>,
    arg: *mut (),
    /// Reload period in ticks; 0 means one-shot.
    period: OsTick,
    wake_up_time: OsTick,
    active: bool,
    next: Option<NonNull<OsTimer>>,
    prev: Option<NonNull<OsTimer>>,
}

unsafe impl Send for OsTimer {}
unsafe impl Sync for OsTimer {}

impl OsTimer {
    pub const fn new() -> Self {
        OsTimer {
            name: "",
            callback: None,
            arg: core::ptr::null_mut(),
            period: 0,
            wake_up_time: 0,
            active: false,
            next: None,
            prev: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_auto_reload(&self) -> bool {
        self.period != 0
    }

    /// Configure the timer. Stops it first if it was running.
    pub fn create(
        &mut self,
        name: &'static str,
        callback: TimerCallback,
        arg: *mut (),
        period: OsTick,
    ) -> OsResult<()> {
        critical_section(|cs| {
            if self.active {
                unsafe { list(cs).remove(self.into()) };
            }
            self.name = name;
            self.callback = Some(callback);
            self.arg = arg;
            self.period = period;
            self.active = false;
            Ok(())
        })
    }

    /// Start (or restart) the timer, firing `delay` ticks from now and
    /// then, if this is an auto-reload timer, every `period` ticks.
    pub fn start(&mut self, delay: OsTick) -> OsResult<()> {
        if self.callback.is_none() {
            return Err(OsError::SyncInvalid);
        }
        if delay == 0 {
            return Err(OsError::OutOfRange);
        }

        critical_section(|cs| {
            if self.active {
                unsafe { list(cs).remove(self.into()) };
            }
            let now = crate::kernel::KERNEL.tick_get();
            self.wake_up_time = now.wrapping_add(delay);
            self.active = true;
            unsafe { list(cs).insert(self.into()) };
            Ok(())
        })
    }

    pub fn stop(&mut self) -> OsResult<()> {
        if !self.active {
            return Err(OsError::State);
        }
        critical_section(|cs| {
            unsafe { list(cs).remove(self.into()) };
            self.active = false;
            Ok(())
        })
    }

    /// Restart the countdown without changing the configured period,
    /// firing `delay` ticks from now.
    pub fn reset(&mut self, delay: OsTick) -> OsResult<()> {
        self.start(delay)
    }

    /// Ticks remaining until the next expiry, clamped to 0 if the timer
    /// is inactive or already due.
    pub fn remaining(&self) -> OsTick {
        if !self.active {
            return 0;
        }
        let now = crate::kernel::KERNEL.tick_get();
        if tick_reached(now, self.wake_up_time) {
            0
        } else {
            self.wake_up_time.wrapping_sub(now)
        }
    }
}

impl Default for OsTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&mut OsTimer> for NonNull<OsTimer> {
    fn from(t: &mut OsTimer) -> Self {
        unsafe { NonNull::new_unchecked(t as *mut OsTimer) }
    }
}

/// Ascending-by-`wake_up_time` intrusive list of timers.
struct TimerList {
    head: Option<NonNull<OsTimer>>,
}

impl TimerList {
    const fn new() -> Self {
        TimerList { head: None }
    }

    fn insert(&mut self, timer: NonNull<OsTimer>) {
        let wake = unsafe { timer.as_ref() }.wake_up_time;

        let mut prev: Option<NonNull<OsTimer>> = None;
        let mut cur = self.head;
        while let Some(cur_ptr) = cur {
            let cur_ref = unsafe { cur_ptr.as_ref() };
            if !tick_reached(wake, cur_ref.wake_up_time) {
                break;
            }
            prev = cur;
            cur = cur_ref.next;
        }

        let timer_mut = unsafe { &mut *timer.as_ptr() };
        timer_mut.prev = prev;
        timer_mut.next = cur;

        match prev {
            Some(p) => unsafe { (*p.as_ptr()).next = Some(timer) },
            None => self.head = Some(timer),
        }
        if let Some(c) = cur {
            unsafe { (*c.as_ptr()).prev = Some(timer) };
        }
    }

    fn remove(&mut self, timer: NonNull<OsTimer>) {
        let timer_ref = unsafe { &mut *timer.as_ptr() };
        match timer_ref.prev {
            Some(prev) => unsafe { (*prev.as_ptr()).next = timer_ref.next },
            None => self.head = timer_ref.next,
        }
        if let Some(next) = timer_ref.next {
            unsafe { (*next.as_ptr()).prev = timer_ref.prev };
        }
        timer_ref.prev = None;
        timer_ref.next = None;
    }

    fn pop_if_due(&mut self, now: OsTick) -> Option<NonNull<OsTimer>> {
        let head = self.head?;
        if tick_reached(now, unsafe { head.as_ref() }.wake_up_time) {
            self.remove(head);
            Some(head)
        } else {
            None
        }
    }
}

unsafe impl Send for TimerList {}
unsafe impl Sync for TimerList {}

static TIMER_LIST: CsCell<TimerList> = CsCell::new(TimerList::new());

#[inline(always)]
fn list(cs: &crate::critical::CriticalSection) -> &mut TimerList {
    TIMER_LIST.get(cs)
}

/// Drain and run every timer due as of `now`. Called once per tick by
/// the tick handler, outside the scheduler's own critical section.
pub fn timer_check(now: OsTick) {
    let mut expired: Option<NonNull<OsTimer>> = None;

    critical_section(|cs| {
        while let Some(t) = list(cs).pop_if_due(now) {
            unsafe { (*t.as_ptr()).next = expired };
            expired = Some(t);
        }
    });

    let mut cur = expired;
    while let Some(t) = cur {
        let timer_ref = unsafe { &mut *t.as_ptr() };
        let next = timer_ref.next;
        timer_ref.next = None;

        if let Some(cb) = timer_ref.callback {
            cb(timer_ref.arg);
        }

        if timer_ref.period != 0 {
            critical_section(|cs| {
                timer_ref.wake_up_time = now.wrapping_add(timer_ref.period);
                list(cs).insert(t);
            });
        } else {
            timer_ref.active = false;
        }

        cur = next;
    }
}

// ============ Safe wrapper ============

pub struct Timer {
    inner: UnsafeCell<OsTimer>,
}

unsafe impl Sync for Timer {}
unsafe impl Send for Timer {}

impl Timer {
    pub const fn new() -> Self {
        Timer {
            inner: UnsafeCell::new(OsTimer::new()),
        }
    }

    pub fn create(&self, name: &'static str, callback: TimerCallback, arg: *mut (), period: OsTick) -> OsResult<()> {
        unsafe { (*self.inner.get()).create(name, callback, arg, period) }
    }

    pub fn start(&self, delay: OsTick) -> OsResult<()> {
        unsafe { (*self.inner.get()).start(delay) }
    }

    pub fn stop(&self) -> OsResult<()> {
        unsafe { (*self.inner.get()).stop() }
    }

    pub fn reset(&self, delay: OsTick) -> OsResult<()> {
        unsafe { (*self.inner.get()).reset(delay) }
    }

    pub fn remaining(&self) -> OsTick {
        unsafe { (*self.inner.get()).remaining() }
    }

    pub fn is_active(&self) -> bool {
        unsafe { (*self.inner.get()).is_active() }
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

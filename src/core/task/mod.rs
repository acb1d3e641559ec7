//! Task management
//!
//! Task creation, deletion, suspend/resume. Every entry point here runs
//! under the critical section for the duration of its state change; the
//! actual context switch, if one is owed, is requested through
//! `sched::os_sched()` after state is consistent again.

mod tcb;

pub use tcb::OsTcb;

use core::ptr::NonNull;

use crate::config::{CFG_PRIO_IDLE, CFG_PRIO_MAX, CFG_STK_SIZE_MIN, CFG_TIME_QUANTA_DEFAULT};
use crate::critical::{critical_section, is_isr_context};
use crate::error::{OsError, OsResult};
use crate::kernel;
use crate::types::{OsOpt, OsPrio, OsStkElement, OsTaskState, OsTick};

/// Task entry point function type.
pub type OsTaskFn = fn(*mut ()) -> !;

/// Fill the stack with the high-water-mark sentinel byte before handing
/// it to the port's frame layout, so `stack_high_water_mark` can later
/// count untouched bytes from the base.
unsafe fn stack_paint(stk_base: *mut OsStkElement, stk_size: usize) {
    let bytes = stk_size * core::mem::size_of::<OsStkElement>();
    unsafe {
        core::ptr::write_bytes(stk_base as *mut u8, crate::config::CFG_STACK_FILL_BYTE, bytes);
    }
}

/// Shared task-creation body used by both the public API and the
/// kernel's own idle-task bring-up. Caller already holds the critical
/// section.
unsafe fn create_under_cs(
    tcb: *mut OsTcb,
    name: &'static str,
    task_fn: OsTaskFn,
    arg: *mut (),
    prio: OsPrio,
    stk_base: *mut OsStkElement,
    stk_size: usize,
    time_quanta: OsTick,
    opt: OsOpt,
) -> OsResult<()> {
    if tcb.is_null() {
        return Err(OsError::InvalidHandle);
    }

    if stk_base.is_null() {
        return Err(OsError::InvalidParam);
    }

    if stk_size < CFG_STK_SIZE_MIN {
        return Err(OsError::OutOfRange);
    }

    if prio as usize >= CFG_PRIO_MAX {
        return Err(OsError::OutOfRange);
    }

    unsafe { stack_paint(stk_base, stk_size) };

    let tcb_ref = unsafe { &mut *tcb };
    tcb_ref.init();

    tcb_ref.name = name;
    tcb_ref.prio = prio;
    tcb_ref.base_prio = prio;
    tcb_ref.time_quanta = if time_quanta == 0 { CFG_TIME_QUANTA_DEFAULT } else { time_quanta };
    tcb_ref.time_quanta_ctr = tcb_ref.time_quanta;
    tcb_ref.opt = opt;
    tcb_ref.task_state = OsTaskState::Ready;

    let stk_ptr = unsafe { crate::port::os_task_stk_init(task_fn, arg, stk_base, stk_size, opt) };
    tcb_ref.stk_ptr = stk_ptr;
    tcb_ref.stk_base = stk_base;
    tcb_ref.stk_size = stk_size;
    tcb_ref.stk_limit = unsafe { stk_base.add(stk_size / 10) };

    let tcb_nonnull = unsafe { NonNull::new_unchecked(tcb) };
    unsafe { crate::sched::os_rdy_list_insert(tcb_nonnull) };

    Ok(())
}

/// Internal task creation used by `kernel::os_init` to bring up the idle
/// task before the kernel is marked running.
#[doc(hidden)]
pub(crate) unsafe fn os_task_create_internal(
    tcb: *mut OsTcb,
    name: &'static str,
    task_fn: OsTaskFn,
    arg: *mut (),
    prio: OsPrio,
    stk_base: *mut OsStkElement,
    stk_size: usize,
    time_quanta: OsTick,
    opt: OsOpt,
) -> OsResult<()> {
    unsafe { create_under_cs(tcb, name, task_fn, arg, prio, stk_base, stk_size, time_quanta, opt) }
}

/// Create a task from static storage and add it to its ready bucket.
///
/// # Arguments
/// * `tcb` - static storage for the task control block
/// * `stack` - static storage for the task's stack
/// * `name` - task name, used in logs and diagnostics
/// * `task_fn` - task entry point, must never return
/// * `prio` - task priority (0 = highest, `CFG_PRIO_IDLE` is reserved for the idle task)
///
/// # Example
/// ```ignore
/// static mut TASK_TCB: OsTcb = OsTcb::new();
/// static mut TASK_STK: [OsStkElement; 256] = [0; 256];
///
/// fn my_task(_: *mut ()) -> ! {
///     loop { /* ... */ }
/// }
///
/// os_task_create(
///     unsafe { &mut TASK_TCB },
///     unsafe { &mut TASK_STK },
///     "MyTask",
///     my_task,
///     5,
/// ).expect("task creation failed");
/// ```
pub fn os_task_create(
    tcb: &'static mut OsTcb,
    stack: &'static mut [OsStkElement],
    name: &'static str,
    task_fn: OsTaskFn,
    prio: OsPrio,
) -> OsResult<()> {
    if is_isr_context() {
        return Err(OsError::InInterrupt);
    }

    if prio == CFG_PRIO_IDLE {
        return Err(OsError::TaskPriorityConflict);
    }

    let stk_len = stack.len();
    let result = critical_section(|_cs| unsafe {
        create_under_cs(
            tcb as *mut OsTcb,
            name,
            task_fn,
            core::ptr::null_mut(),
            prio,
            stack.as_mut_ptr(),
            stk_len,
            CFG_TIME_QUANTA_DEFAULT,
            0,
        )
    });

    if result.is_ok() && kernel::KERNEL.is_running() {
        crate::sched::os_sched();
    }

    result
}

/// Delete a task (`None` deletes the calling task). The task is removed
/// from whichever scheduler list currently holds it and left parked in
/// `Suspended` state; there is no task pool reclamation since TCB
/// storage is caller-owned static memory.
pub fn os_task_del(tcb: Option<NonNull<OsTcb>>) -> OsResult<()> {
    if !kernel::KERNEL.is_running() {
        return Err(OsError::State);
    }

    if is_isr_context() {
        return Err(OsError::InInterrupt);
    }

    critical_section(|_cs| {
        let tcb_ptr = match tcb {
            Some(ptr) => ptr,
            None => unsafe { kernel::tcb_cur_ptr() }.ok_or(OsError::InvalidHandle)?,
        };

        let tcb_ref = unsafe { tcb_ptr.as_ref() };

        if tcb_ref.prio == CFG_PRIO_IDLE {
            return Err(OsError::TaskPriorityConflict);
        }

        let already_suspended = tcb_ref.task_state == OsTaskState::Suspended;

        match tcb_ref.task_state {
            OsTaskState::Ready => unsafe { crate::sched::os_rdy_list_remove(tcb_ptr) },
            OsTaskState::Delayed | OsTaskState::DelayedSuspended => unsafe {
                kernel::delay_list().remove(tcb_ptr)
            },
            OsTaskState::Pend | OsTaskState::PendTimeout | OsTaskState::PendSuspended | OsTaskState::PendTimeoutSuspended => unsafe {
                crate::block::cancel_wait(tcb_ptr);
            },
            OsTaskState::Suspended => {}
        }

        let tcb_mut = unsafe { &mut *tcb_ptr.as_ptr() };
        tcb_mut.task_state = OsTaskState::Suspended;

        // A task parked in a compound *Suspended state stays on its
        // original list (delay/wait); only a task that ends up in plain
        // `Suspended` needs a list of its own to satisfy "on exactly one
        // scheduler list".
        if !already_suspended {
            unsafe { kernel::suspend_list().insert_tail(tcb_ptr) };
        }

        let is_current = unsafe { kernel::tcb_cur_ptr() } == Some(tcb_ptr);
        if is_current {
            crate::sched::os_sched();
        }

        Ok(())
    })
}

/// Suspend a task (`None` suspends the calling task). Suspension layers
/// onto whatever state the task was already in via the nesting counter:
/// a delayed or blocked task keeps counting down / waiting, but will not
/// be made `Ready` on wakeup until every suspend has a matching resume.
pub fn os_task_suspend(tcb: Option<NonNull<OsTcb>>) -> OsResult<()> {
    if !kernel::KERNEL.is_running() {
        return Err(OsError::State);
    }

    if is_isr_context() {
        return Err(OsError::InInterrupt);
    }

    critical_section(|_cs| {
        let tcb_ptr = match tcb {
            Some(ptr) => ptr,
            None => unsafe { kernel::tcb_cur_ptr() }.ok_or(OsError::InvalidHandle)?,
        };

        let tcb_ref = unsafe { &mut *tcb_ptr.as_ptr() };

        if tcb_ref.prio == CFG_PRIO_IDLE {
            return Err(OsError::TaskPriorityConflict);
        }

        tcb_ref.suspend_ctr = tcb_ref.suspend_ctr.saturating_add(1);

        match tcb_ref.task_state {
            OsTaskState::Ready => {
                tcb_ref.task_state = OsTaskState::Suspended;
                unsafe { crate::sched::os_rdy_list_remove(tcb_ptr) };
                unsafe { kernel::suspend_list().insert_tail(tcb_ptr) };
            }
            OsTaskState::Delayed => tcb_ref.task_state = OsTaskState::DelayedSuspended,
            OsTaskState::Pend => tcb_ref.task_state = OsTaskState::PendSuspended,
            OsTaskState::PendTimeout => tcb_ref.task_state = OsTaskState::PendTimeoutSuspended,
            _ => {} // already suspended
        }

        let is_current = unsafe { kernel::tcb_cur_ptr() } == Some(tcb_ptr);
        if is_current {
            crate::sched::os_sched();
        }

        Ok(())
    })
}

/// Resume a suspended task, undoing one level of suspend nesting. Only
/// rejoins a scheduler list once the nesting counter reaches zero.
pub fn os_task_resume(tcb: NonNull<OsTcb>) -> OsResult<()> {
    if !kernel::KERNEL.is_running() {
        return Err(OsError::State);
    }

    if is_isr_context() {
        return Err(OsError::InInterrupt);
    }

    critical_section(|_cs| {
        let tcb_ref = unsafe { &mut *tcb.as_ptr() };

        if tcb_ref.suspend_ctr == 0 {
            return Err(OsError::State);
        }

        tcb_ref.suspend_ctr -= 1;

        if tcb_ref.suspend_ctr == 0 {
            match tcb_ref.task_state {
                OsTaskState::Suspended => {
                    unsafe { kernel::suspend_list().remove(tcb) };
                    tcb_ref.task_state = OsTaskState::Ready;
                    unsafe { crate::sched::os_rdy_list_insert(tcb) };
                }
                OsTaskState::DelayedSuspended => tcb_ref.task_state = OsTaskState::Delayed,
                OsTaskState::PendSuspended => tcb_ref.task_state = OsTaskState::Pend,
                OsTaskState::PendTimeoutSuspended => tcb_ref.task_state = OsTaskState::PendTimeout,
                _ => {}
            }

            crate::sched::os_sched();
        }

        Ok(())
    })
}

/// Stack high-water mark: bytes of `tcb`'s stack that have been touched
/// at least once, counted as `stack_size - leading_untouched_bytes`.
pub fn os_task_stk_high_water_mark(tcb: &OsTcb) -> usize {
    let total_bytes = tcb.stk_size * core::mem::size_of::<OsStkElement>();
    let base = tcb.stk_base as *const u8;

    let mut untouched = 0usize;
    for i in 0..total_bytes {
        let byte = unsafe { *base.add(i) };
        if byte != crate::config::CFG_STACK_FILL_BYTE {
            break;
        }
        untouched += 1;
    }

    total_bytes - untouched
}

/// Scan the lowest 16 bytes (or the whole stack, if smaller) of `tcb`'s
/// stack for the fill byte. A mismatch means the stack has been
/// overrun. Invokes the stack-overflow hook and returns `true` if so.
pub fn os_task_stk_check_overflow(tcb: &OsTcb) -> bool {
    let check_len = core::cmp::min(16, tcb.stk_size * core::mem::size_of::<OsStkElement>());
    let base = tcb.stk_base as *const u8;

    for i in 0..check_len {
        let byte = unsafe { *base.add(i) };
        if byte != crate::config::CFG_STACK_FILL_BYTE {
            crate::hook::call_stack_overflow(tcb as *const OsTcb);
            return true;
        }
    }

    false
}

/// Accumulated ticks `tcb` has spent running, not counting time since its
/// last switch-in if it happens to be the task currently executing.
pub fn os_task_get_runtime(tcb: &OsTcb) -> OsTick {
    tcb.run_time_ticks
}

/// `tcb`'s CPU usage in hundredths of a percent (0..=10000), against the
/// total tick count elapsed since the kernel started.
pub fn os_task_get_cpu_usage(tcb: &OsTcb) -> u32 {
    tcb.cpu_usage(kernel::KERNEL.tick_get())
}

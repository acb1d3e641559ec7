//! Time management
//!
//! Tick handling, task delays, and the overflow-safe comparison the
//! delay list, timed-block list and timer wheel all sort on.

use core::ptr::NonNull;

use crate::config::CFG_TICK_RATE_HZ;
use crate::critical::{critical_section, is_isr_context};
use crate::error::{OsError, OsResult};
use crate::kernel;
use crate::sched;
use crate::task::OsTcb;
use crate::types::{OsTaskState, OsTick};

/// Maximum delay/timeout accepted in ticks, chosen so a wake-up-time
/// computed as `now.wrapping_add(ticks)` never lands "behind" `now` by
/// the time overflow-safe comparison sees it.
pub const TICK_DELAY_MAX: OsTick = OsTick::MAX / 2;

/// Overflow-safe "has `target` been reached as of `now`" comparison:
/// `(i32)(now - target) >= 0`. Correct across a tick-counter wraparound
/// as long as `now` and `target` are never more than `OsTick::MAX / 2`
/// apart, which `TICK_DELAY_MAX` enforces at the call sites that accept
/// a caller-supplied delay.
#[inline]
pub fn tick_reached(now: OsTick, target: OsTick) -> bool {
    (now.wrapping_sub(target) as i32) >= 0
}

/// Delay the calling task for `ticks` system ticks.
///
/// # Returns
/// * `Err(OsError::InInterrupt)` - called from an ISR
/// * `Err(OsError::State)` - scheduler is suspended, or kernel not running
/// * `Err(OsError::OutOfRange)` - `ticks` exceeds `TICK_DELAY_MAX`
pub fn os_time_dly(ticks: OsTick) -> OsResult<()> {
    if !kernel::KERNEL.is_running() {
        return Err(OsError::State);
    }

    if is_isr_context() {
        return Err(OsError::InInterrupt);
    }

    if kernel::KERNEL.sched_lock_nesting() > 0 {
        return Err(OsError::State);
    }

    if ticks == 0 {
        return Ok(());
    }

    if ticks > TICK_DELAY_MAX {
        return Err(OsError::OutOfRange);
    }

    critical_section(|_cs| {
        unsafe {
            if let Some(cur_tcb) = kernel::tcb_cur_ptr() {
                let tcb = &mut *cur_tcb.as_ptr();

                let now = kernel::KERNEL.tick_get();
                tcb.wake_up_time = now.wrapping_add(ticks);
                tcb.task_state = OsTaskState::Delayed;

                sched::os_rdy_list_remove(cur_tcb);
                kernel::delay_list().insert(cur_tcb);
            }
        }
    });

    sched::os_sched();

    Ok(())
}

/// Delay the calling task for the given hours/minutes/seconds/ms.
pub fn os_time_dly_hmsm(hours: u16, minutes: u8, seconds: u8, milliseconds: u16) -> OsResult<()> {
    if minutes > 59 || seconds > 59 || milliseconds > 999 {
        return Err(OsError::InvalidParam);
    }

    let total_ms =
        (hours as u32) * 3_600_000 + (minutes as u32) * 60_000 + (seconds as u32) * 1000 + (milliseconds as u32);

    let ticks = (total_ms * CFG_TICK_RATE_HZ) / 1000;

    os_time_dly(ticks)
}

/// Wake a delayed task before its delay expires.
pub fn os_time_dly_resume(tcb: NonNull<OsTcb>) -> OsResult<()> {
    if !kernel::KERNEL.is_running() {
        return Err(OsError::State);
    }

    if is_isr_context() {
        return Err(OsError::InInterrupt);
    }

    critical_section(|_cs| {
        let tcb_ref = unsafe { &mut *tcb.as_ptr() };

        if !tcb_ref.is_delayed() {
            return Err(OsError::TaskInvalid);
        }

        unsafe { kernel::delay_list().remove(tcb) };

        match tcb_ref.task_state {
            OsTaskState::Delayed => {
                tcb_ref.task_state = OsTaskState::Ready;
                unsafe { sched::os_rdy_list_insert(tcb) };
            }
            OsTaskState::DelayedSuspended => {
                tcb_ref.task_state = OsTaskState::Suspended;
            }
            _ => {}
        }

        sched::os_sched();

        Ok(())
    })
}

/// Current tick count since `os_start()`.
#[inline]
pub fn os_time_get() -> OsTick {
    kernel::KERNEL.tick_get()
}

/// Tick interrupt handler: advances the tick counter, wakes due delayed
/// and timed-out tasks, runs round-robin bookkeeping, then — outside
/// the critical section used for all of the above — checks the running
/// task's stack, runs the timer expiry pass and the tick hook, in that
/// order.
pub fn os_tick_handler() {
    if !kernel::KERNEL.is_running() {
        return;
    }

    kernel::KERNEL.int_enter();

    let now = kernel::KERNEL.tick_increment();

    critical_section(|_cs| {
        drain_delay_list(now);
        drain_timed_block_list(now);
        sched::os_sched_round_robin();
    });

    if let Some(cur_tcb) = unsafe { kernel::tcb_cur_ptr() } {
        crate::task::os_task_stk_check_overflow(unsafe { cur_tcb.as_ref() });
    }

    #[cfg(feature = "timer")]
    crate::timer::timer_check(now);
    crate::hook::call_tick();

    kernel::os_int_exit();
}

fn drain_delay_list(now: OsTick) {
    unsafe {
        while let Some(tcb_ptr) = kernel::delay_list().pop_if_due(now) {
            let tcb = &mut *tcb_ptr.as_ptr();
            match tcb.task_state {
                OsTaskState::Delayed => {
                    tcb.task_state = OsTaskState::Ready;
                    sched::os_rdy_list_insert(tcb_ptr);
                }
                OsTaskState::DelayedSuspended => {
                    tcb.task_state = OsTaskState::Suspended;
                }
                _ => {}
            }
        }
    }
}

fn drain_timed_block_list(now: OsTick) {
    unsafe {
        while let Some(tcb_ptr) = kernel::timed_block_list().pop_if_due(now) {
            (*tcb_ptr.as_ptr()).in_timed_block = false;
            crate::block::cancel_wait(tcb_ptr);
        }
    }
}

/// SysTick interrupt handler.
#[no_mangle]
pub extern "C" fn SysTick() {
    os_tick_handler();
}

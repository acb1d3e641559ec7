//! Hook registry
//!
//! A single function-pointer slot per hook point. Registering `None`
//! (or never registering at all) makes the call site a no-op; there is
//! no multi-subscriber dispatch, matching the rest of the kernel's
//! preference for a single owner per piece of state.

use core::sync::atomic::{AtomicUsize, Ordering};

use crate::error::OsError;
use crate::task::OsTcb;

pub type IdleHook = fn();
pub type TaskSwitchHook = fn(from: *const OsTcb, to: *const OsTcb);
pub type TickHook = fn();
pub type StackOverflowHook = fn(task: *const OsTcb);
pub type AllocFailedHook = fn(requested_size: usize);
/// Called on a fatal heap-corruption finding (bad pointer, implausible
/// size, double free) before the kernel halts. `reason` is always
/// [`OsError::MemoryCorruption`]; it's passed through rather than
/// hardcoded so the hook signature reads the same as every other kernel
/// callback.
pub type MemoryCorruptionHook = fn(ptr: *const u8, reason: OsError);

static IDLE_HOOK: AtomicUsize = AtomicUsize::new(0);
static TASK_SWITCH_HOOK: AtomicUsize = AtomicUsize::new(0);
static TICK_HOOK: AtomicUsize = AtomicUsize::new(0);
static STACK_OVERFLOW_HOOK: AtomicUsize = AtomicUsize::new(0);
static ALLOC_FAILED_HOOK: AtomicUsize = AtomicUsize::new(0);
static MEMORY_CORRUPTION_HOOK: AtomicUsize = AtomicUsize::new(0);

macro_rules! hook_slot {
    ($set_name:ident, $call_name:ident, $slot:ident, $fn_ty:ty, $($arg:ident : $arg_ty:ty),*) => {
        pub fn $set_name(hook: Option<$fn_ty>) {
            let raw = hook.map_or(0, |f| f as usize);
            $slot.store(raw, Ordering::SeqCst);
        }

        pub(crate) fn $call_name($($arg: $arg_ty),*) {
            let raw = $slot.load(Ordering::SeqCst);
            if raw != 0 {
                let f: $fn_ty = unsafe { core::mem::transmute(raw) };
                f($($arg),*);
            }
        }
    };
}

hook_slot!(set_idle_hook, call_idle, IDLE_HOOK, IdleHook,);
hook_slot!(
    set_task_switch_hook,
    call_task_switch,
    TASK_SWITCH_HOOK,
    TaskSwitchHook,
    from: *const OsTcb,
    to: *const OsTcb
);
hook_slot!(set_tick_hook, call_tick, TICK_HOOK, TickHook,);
hook_slot!(
    set_stack_overflow_hook,
    call_stack_overflow,
    STACK_OVERFLOW_HOOK,
    StackOverflowHook,
    task: *const OsTcb
);
hook_slot!(
    set_alloc_failed_hook,
    call_alloc_failed,
    ALLOC_FAILED_HOOK,
    AllocFailedHook,
    requested_size: usize
);
hook_slot!(
    set_memory_corruption_hook,
    call_memory_corruption,
    MEMORY_CORRUPTION_HOOK,
    MemoryCorruptionHook,
    ptr: *const u8,
    reason: OsError
);

//! A preemptive real-time kernel
//!
//! Provides:
//! - Priority-based preemptive scheduling with round-robin time-slicing
//! - Synchronization primitives (semaphores, mutexes, queues) with
//!   chained priority inheritance
//! - Software timers and tick-based task delays
//! - A kernel heap and context switching for ARM Cortex-M

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

// ============ Critical Section ============

#[cfg(target_arch = "arm")]
mod cs_impl {
    use cortex_m::interrupt;
    use cortex_m::register::primask;
    use critical_section::{set_impl, Impl, RawRestoreState};

    struct SingleCoreCriticalSection;
    set_impl!(SingleCoreCriticalSection);

    unsafe impl Impl for SingleCoreCriticalSection {
        unsafe fn acquire() -> RawRestoreState {
            let was_active = primask::read().is_active();
            interrupt::disable();
            was_active
        }

        unsafe fn release(was_active: RawRestoreState) {
            if was_active {
                unsafe { interrupt::enable() }
            }
        }
    }
}

// ============ Modules ============

pub mod log;
mod lang_items;

pub mod core;
pub mod sync;
pub mod port;

// ============ Re-exports ============

pub use core::config;
pub use core::config::*;
pub use core::critical;
pub use core::error;
pub use core::error::OsError;
pub use core::kernel;
pub use core::kernel::{os_init, os_sched_lock, os_sched_unlock, os_start};
pub use core::prio;
pub use core::types;
pub use core::types::*;
pub use core::task;
pub use core::task::{os_task_create, os_task_get_cpu_usage, os_task_get_runtime};
pub use core::sched;
pub use core::time;

#[cfg(feature = "sem")]
pub use sync::sem;
#[cfg(feature = "mutex")]
pub use sync::mutex;
#[cfg(feature = "queue")]
pub use sync::queue;

pub use core::block;
pub use core::heap;
pub use core::hook;
#[cfg(feature = "timer")]
pub use core::timer;

#[cfg(feature = "pac")]
pub use stm32_metapac as pac;

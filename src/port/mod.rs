//! Port layer - CPU-specific implementations
//!
//! This module provides the hardware abstraction layer for context switching
//! and other CPU-specific operations.

#[cfg(target_arch = "arm")]
pub mod cortex_m4;

#[cfg(target_arch = "arm")]
pub use cortex_m4::*;

// Stub implementations for non-ARM targets (for testing)
#[cfg(not(target_arch = "arm"))]
pub mod stub {
    use crate::task::OsTaskFn;
    use crate::types::{OsOpt, OsStkElement};

    /// No real task ever executes on a host build: there's no assembly
    /// stack-restore to run, so this just returns instead of launching
    /// anything, mirroring `os_ctx_sw`/`os_int_ctx_sw` being no-ops here.
    /// Host tests exercise kernel logic directly (primitive calls, the
    /// tick handler) rather than by letting real task bodies run.
    pub unsafe fn os_start_high_rdy() {}

    pub fn os_ctx_sw() {
        // No-op for testing
    }

    pub fn os_int_ctx_sw() {
        // No-op for testing
    }

    pub unsafe fn os_task_stk_init(
        _task_fn: OsTaskFn,
        _arg: *mut (),
        stk_base: *mut OsStkElement,
        stk_size: usize,
        _opt: OsOpt,
    ) -> *mut OsStkElement {
        // Return top of stack for testing
        unsafe { stk_base.add(stk_size - 1) }
    }

    pub fn os_cpu_systick_init(_freq: u32) {
        // No-op for testing
    }

    /// Host builds have no CPU to park; callers of a fatal path are
    /// expected to have installed a hook that diverges (panics) before
    /// this would ever be reached in a test.
    pub fn fatal_halt() -> ! {
        loop {
            core::hint::spin_loop();
        }
    }
}

#[cfg(not(target_arch = "arm"))]
pub use stub::*;

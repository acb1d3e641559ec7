//! Critical section handling
//!
//! Critical sections nest via a depth counter: interrupts are actually
//! disabled only on the transition from 0 to 1, and actually re-enabled
//! only on the transition from 1 back to 0. This lets any function take
//! its own critical section without worrying about whether a caller
//! further up the stack already holds one.

use core::sync::atomic::{AtomicU32, Ordering};

/// Critical-section nesting depth. Zero means interrupts are enabled.
static NESTING: AtomicU32 = AtomicU32::new(0);

/// RAII guard for critical sections.
///
/// When the outermost guard is created, interrupts are disabled. When
/// the outermost guard is dropped, interrupts are restored. Nested
/// guards are no-ops at the hardware level, tracked only by the depth
/// counter.
pub struct CriticalSection {
    _private: (),
}

impl CriticalSection {
    /// Enter a critical section, disabling interrupts if this is not
    /// already nested inside another one.
    #[inline(always)]
    pub fn enter() -> Self {
        let prev = NESTING.fetch_add(1, Ordering::Acquire);
        if prev == 0 {
            #[cfg(target_arch = "arm")]
            cortex_m::interrupt::disable();
        }
        CriticalSection { _private: () }
    }

    /// Check if we're currently in a critical section.
    #[inline(always)]
    pub fn is_active() -> bool {
        NESTING.load(Ordering::Acquire) != 0
    }
}

impl Drop for CriticalSection {
    #[inline(always)]
    fn drop(&mut self) {
        let prev = NESTING.fetch_sub(1, Ordering::Release);
        if prev == 1 {
            #[cfg(target_arch = "arm")]
            unsafe { cortex_m::interrupt::enable() };
        }
    }
}

/// Execute a closure with interrupts disabled
/// 
/// The closure receives a reference to the critical section guard,
/// which can be used to access [`CsCell`] protected data.
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce(&CriticalSection) -> R,
{
    let cs = CriticalSection::enter();
    f(&cs)
}

/// Check if currently executing in an ISR context
#[inline]
pub fn is_isr_context() -> bool {
    #[cfg(target_arch = "arm")]
    {
        let ipsr: u32;
        unsafe {
            core::arch::asm!(
                "mrs {}, IPSR",
                out(reg) ipsr,
                options(nomem, nostack, preserves_flags)
            );
        }
        ipsr != 0
    }
    
    #[cfg(not(target_arch = "arm"))]
    {
        false
    }
}

/// Mask priority levels using BASEPRI (Cortex-M3/M4/M7)
/// 
/// This allows selective interrupt masking where only interrupts
/// with a priority value >= the mask value are blocked.
#[inline]
pub fn set_basepri(priority: u8) {
    #[cfg(target_arch = "arm")]
    unsafe {
        core::arch::asm!(
            "msr BASEPRI, {}",
            in(reg) priority as u32,
            options(nomem, nostack, preserves_flags)
        );
    }
    
    #[cfg(not(target_arch = "arm"))]
    {
        let _ = priority;
    }
}

/// Get current BASEPRI value
#[inline]
pub fn get_basepri() -> u8 {
    #[cfg(target_arch = "arm")]
    {
        let basepri: u32;
        unsafe {
            core::arch::asm!(
                "mrs {}, BASEPRI",
                out(reg) basepri,
                options(nomem, nostack, preserves_flags)
            );
        }
        basepri as u8
    }
    
    #[cfg(not(target_arch = "arm"))]
    {
        0
    }
}

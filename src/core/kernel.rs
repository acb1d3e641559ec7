//! Global kernel state and initialization
//!
//! This module owns the global OS state: initialization, starting the
//! scheduler, and the atomic flags that track kernel status from both
//! task and interrupt context.

use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};

use crate::config::CFG_PRIO_MAX;
use crate::core::cs_cell::CsCell;
use crate::critical::{critical_section, CriticalSection};
use crate::error::{OsError, OsResult};
use crate::prio::PrioTable;
use crate::sched::rdy_list::ReadyList;
use crate::sched::time_list::TimeSortedList;
use crate::task::OsTcb;
use crate::types::{OsNestingCtr, OsPrio, OsTick};

// ============ Kernel State Structures ============

/// Atomic kernel flags, readable from both task and interrupt context.
pub struct KernelFlags {
    initialized: AtomicBool,
    running: AtomicBool,
    int_nesting: AtomicU8,
    sched_lock_nesting: AtomicU8,
    tick_counter: AtomicU32,
}

impl KernelFlags {
    const fn new() -> Self {
        Self {
            initialized: AtomicBool::new(false),
            running: AtomicBool::new(false),
            int_nesting: AtomicU8::new(0),
            sched_lock_nesting: AtomicU8::new(0),
            tick_counter: AtomicU32::new(0),
        }
    }

    pub(crate) fn reset(&self) {
        self.initialized.store(false, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        self.int_nesting.store(0, Ordering::SeqCst);
        self.sched_lock_nesting.store(0, Ordering::SeqCst);
        self.tick_counter.store(0, Ordering::SeqCst);
    }

    #[inline(always)]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    #[inline(always)]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    #[inline(always)]
    pub fn tick_get(&self) -> OsTick {
        self.tick_counter.load(Ordering::Relaxed)
    }

    #[inline(always)]
    pub fn int_nesting(&self) -> OsNestingCtr {
        self.int_nesting.load(Ordering::Relaxed)
    }

    #[inline(always)]
    pub fn sched_lock_nesting(&self) -> OsNestingCtr {
        self.sched_lock_nesting.load(Ordering::SeqCst)
    }

    #[inline(always)]
    pub(crate) fn tick_increment(&self) -> OsTick {
        self.tick_counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    #[inline(always)]
    pub(crate) fn int_enter(&self) {
        if self.is_running() {
            let nesting = self.int_nesting.fetch_add(1, Ordering::Relaxed);
            if nesting == 254 {
                self.int_nesting.store(254, Ordering::Relaxed);
            }
        }
    }

    #[inline(always)]
    pub(crate) fn set_initialized(&self, val: bool) {
        self.initialized.store(val, Ordering::SeqCst);
    }

    #[inline(always)]
    pub(crate) fn set_running(&self, val: bool) {
        self.running.store(val, Ordering::SeqCst);
    }

    #[inline(always)]
    pub(crate) fn int_nesting_dec(&self) -> OsNestingCtr {
        let nesting = self.int_nesting.load(Ordering::Relaxed);
        if nesting > 0 {
            self.int_nesting.store(nesting - 1, Ordering::Relaxed);
        }
        nesting.saturating_sub(1)
    }

    /// Raise the scheduler-suspend nesting counter by one.
    pub(crate) fn try_sched_lock(&self) -> OsResult<()> {
        let nesting = self.sched_lock_nesting.load(Ordering::SeqCst);
        if nesting == 255 {
            return Err(OsError::OutOfRange);
        }
        self.sched_lock_nesting.store(nesting + 1, Ordering::SeqCst);
        Ok(())
    }

    /// Lower the scheduler-suspend nesting counter by one, returning the
    /// remaining nesting depth.
    pub(crate) fn try_sched_unlock(&self) -> OsResult<OsNestingCtr> {
        let nesting = self.sched_lock_nesting.load(Ordering::SeqCst);
        if nesting == 0 {
            return Err(OsError::State);
        }
        self.sched_lock_nesting.store(nesting - 1, Ordering::SeqCst);
        Ok(nesting - 1)
    }
}

// ============ Global Instances ============

pub(crate) static KERNEL: KernelFlags = KernelFlags::new();

/// Scheduler-owned lists and bitmap.
///
/// A task is a member of exactly one of `rdy_list[prio]`, `delay_list`,
/// `timed_block_list` or `suspend_list` at any time (via its state-node
/// links); it may additionally be a member of a primitive's wait list
/// (via its event-node links) at the same time it's on `timed_block_list`.
pub struct SchedState {
    pub(crate) prio_tbl: PrioTable,
    pub(crate) rdy_list: [ReadyList; CFG_PRIO_MAX],
    pub(crate) delay_list: TimeSortedList,
    pub(crate) timed_block_list: TimeSortedList,
    pub(crate) suspend_list: ReadyList,
    /// Set when `schedule()` is called while the scheduler is suspended;
    /// consumed by `sched_unlock()` when the nesting count reaches zero.
    pub(crate) reschedule_pending: bool,
}

impl SchedState {
    const fn new() -> Self {
        Self {
            prio_tbl: PrioTable::new(),
            rdy_list: [ReadyList::new(); CFG_PRIO_MAX],
            delay_list: TimeSortedList::new(),
            timed_block_list: TimeSortedList::new(),
            suspend_list: ReadyList::new(),
            reschedule_pending: false,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.prio_tbl = PrioTable::new();
        self.rdy_list = [ReadyList::new(); CFG_PRIO_MAX];
        self.delay_list.init();
        self.timed_block_list.init();
        self.suspend_list.init();
        self.reschedule_pending = false;
    }

    #[inline(always)]
    pub fn prio_table(&mut self) -> &mut PrioTable {
        &mut self.prio_tbl
    }

    #[inline(always)]
    pub fn rdy_list(&mut self, prio: OsPrio) -> &mut ReadyList {
        &mut self.rdy_list[prio as usize]
    }
}

/// Global scheduler state instance.
pub(crate) static SCHED: CsCell<SchedState> = CsCell::new(SchedState::new());

/// Kernel heap, used for dynamically allocated task stacks, queue
/// backing storage and anything else requesting kernel memory.
pub(crate) static HEAP: CsCell<crate::heap::Heap> = CsCell::new(crate::heap::Heap::new());

/// IDLE task TCB and stack.
static mut IDLE_TCB: OsTcb = OsTcb::new();
static mut IDLE_STK: [crate::types::OsStkElement; 128] = [0; 128];

// ============ CPU/Context Switch State ============

/// CPU context switch state, read directly by the port's assembly trampoline.
#[repr(C)]
pub struct CpuState {
    pub tcb_cur: *mut OsTcb,
    pub tcb_high_rdy: *mut OsTcb,
    pub prio_cur: OsPrio,
    pub prio_high_rdy: OsPrio,
    pub except_stk_base: u32,
}

impl CpuState {
    pub const fn new() -> Self {
        Self {
            tcb_cur: core::ptr::null_mut(),
            tcb_high_rdy: core::ptr::null_mut(),
            prio_cur: 0,
            prio_high_rdy: 0,
            except_stk_base: 0,
        }
    }

    pub fn reset(&mut self) {
        self.tcb_cur = core::ptr::null_mut();
        self.tcb_high_rdy = core::ptr::null_mut();
        self.prio_cur = 0;
        self.prio_high_rdy = 0;
    }

    #[inline(always)]
    pub unsafe fn tcb_cur_ptr(&self) -> Option<NonNull<OsTcb>> {
        NonNull::new(self.tcb_cur)
    }

    #[inline(always)]
    pub unsafe fn set_tcb_cur(&mut self, tcb: Option<NonNull<OsTcb>>) {
        self.tcb_cur = tcb.map_or(core::ptr::null_mut(), |p| p.as_ptr());
    }

    #[inline(always)]
    pub unsafe fn tcb_high_rdy_ptr(&self) -> Option<NonNull<OsTcb>> {
        NonNull::new(self.tcb_high_rdy)
    }

    #[inline(always)]
    pub unsafe fn set_tcb_high_rdy(&mut self, tcb: Option<NonNull<OsTcb>>) {
        self.tcb_high_rdy = tcb.map_or(core::ptr::null_mut(), |p| p.as_ptr());
    }

    #[inline(always)]
    pub unsafe fn get_prio_cur(&self) -> OsPrio {
        self.prio_cur
    }

    #[inline(always)]
    pub unsafe fn set_prio_cur(&mut self, prio: OsPrio) {
        self.prio_cur = prio;
    }

    #[inline(always)]
    pub unsafe fn get_prio_high_rdy(&self) -> OsPrio {
        self.prio_high_rdy
    }

    #[inline(always)]
    pub unsafe fn set_prio_high_rdy(&mut self, prio: OsPrio) {
        self.prio_high_rdy = prio;
    }
}

#[no_mangle]
#[used]
pub static mut CPU_STATE: CpuState = CpuState::new();

#[no_mangle]
pub static OS_KA_BASEPRI_Boundary: u32 = 0;

// ============ Initialization ============

fn os_idle_task(_: *mut ()) -> ! {
    loop {
        crate::hook::call_idle();
        cortex_m::asm::nop();
    }
}

unsafe fn os_reset_globals() {
    KERNEL.reset();

    unsafe {
        CPU_STATE.reset();
    }

    unsafe {
        SCHED.get_unchecked().reset();
        *HEAP.get_unchecked() = crate::heap::Heap::new();
    }
}

// ============ Public API ============

/// Initialize the kernel. Must be called once before any other kernel
/// function; creates the idle task and the kernel heap.
#[allow(static_mut_refs)]
pub fn os_init() -> OsResult<()> {
    unsafe {
        os_reset_globals();
    }

    if KERNEL.is_running() {
        return Err(OsError::State);
    }

    critical_section(|cs| {
        let sched = SCHED.get(cs);

        sched.prio_tbl.init();
        for list in sched.rdy_list.iter_mut() {
            list.init();
        }

        unsafe {
            HEAP.get(cs).init();

            crate::task::os_task_create_internal(
                &raw mut IDLE_TCB,
                "Idle",
                os_idle_task,
                core::ptr::null_mut(),
                crate::config::CFG_PRIO_IDLE,
                IDLE_STK.as_mut_ptr(),
                IDLE_STK.len(),
                0,
                0,
            )
            .expect("idle task creation failed");
        }

        KERNEL.set_initialized(true);
    });

    Ok(())
}

/// Start multitasking, running the highest-priority ready task. Never
/// returns under normal operation.
pub fn os_start() -> OsResult<()> {
    if !KERNEL.is_initialized() {
        return Err(OsError::State);
    }

    if KERNEL.is_running() {
        return Err(OsError::State);
    }

    critical_section(|cs| {
        let sched = SCHED.get(cs);

        let high_prio = sched.prio_tbl.get_highest();

        unsafe {
            CPU_STATE.prio_high_rdy = high_prio;
            CPU_STATE.prio_cur = high_prio;

            if let Some(head) = sched.rdy_list[high_prio as usize].head() {
                CPU_STATE.tcb_high_rdy = head.as_ptr();
                CPU_STATE.tcb_cur = head.as_ptr();
            } else {
                return;
            }
        }

        KERNEL.set_running(true);
    });

    crate::port::os_cpu_systick_init(16_000_000 / crate::config::CFG_TICK_RATE_HZ);

    unsafe {
        CPU_STATE.tcb_cur = CPU_STATE.tcb_high_rdy;
        crate::port::os_start_high_rdy()
    };

    Ok(())
}

/// Exit ISR context, triggering a context switch if a higher-priority
/// task became ready while handling the interrupt.
pub fn os_int_exit() {
    if !KERNEL.is_running() {
        return;
    }

    let _cs = CriticalSection::enter();

    let old_nesting = KERNEL.int_nesting();
    if old_nesting == 0 {
        return;
    }

    let new_nesting = KERNEL.int_nesting_dec();

    if new_nesting == 0 && KERNEL.sched_lock_nesting() == 0 {
        let high_prio = unsafe { SCHED.get_unchecked().prio_tbl.get_highest() };

        unsafe {
            if high_prio < CPU_STATE.prio_cur {
                CPU_STATE.prio_high_rdy = high_prio;

                if let Some(head) = SCHED.get_unchecked().rdy_list[high_prio as usize].head() {
                    CPU_STATE.tcb_high_rdy = head.as_ptr();
                    crate::port::os_int_ctx_sw();
                }
            }
        }
    }
}

/// Suspend the scheduler. While suspended, `schedule()` only records
/// that a switch is owed rather than performing one.
pub fn os_sched_lock() -> OsResult<()> {
    if !KERNEL.is_running() {
        return Err(OsError::State);
    }

    if KERNEL.int_nesting() > 0 {
        return Err(OsError::InInterrupt);
    }

    critical_section(|_cs| KERNEL.try_sched_lock())
}

/// Resume the scheduler. When the suspend nesting count reaches zero and
/// a schedule was requested while suspended, performs it immediately.
pub fn os_sched_unlock() -> OsResult<()> {
    if !KERNEL.is_running() {
        return Err(OsError::State);
    }

    if KERNEL.int_nesting() > 0 {
        return Err(OsError::InInterrupt);
    }

    critical_section(|cs| {
        let remaining = KERNEL.try_sched_unlock()?;
        if remaining == 0 {
            let sched = SCHED.get(cs);
            if core::mem::take(&mut sched.reschedule_pending) {
                crate::sched::os_sched();
            }
        }
        Ok(())
    })
}

// ============ Internal accessors for other modules ============

#[inline(always)]
pub(crate) unsafe fn prio_table() -> &'static mut PrioTable {
    unsafe { &mut SCHED.get_unchecked().prio_tbl }
}

#[inline(always)]
pub(crate) unsafe fn rdy_list(prio: OsPrio) -> &'static mut ReadyList {
    unsafe { &mut SCHED.get_unchecked().rdy_list[prio as usize] }
}

#[inline]
#[allow(static_mut_refs)]
pub(crate) unsafe fn tcb_cur_ptr() -> Option<NonNull<OsTcb>> {
    unsafe { CPU_STATE.tcb_cur_ptr() }
}

#[inline]
#[allow(dead_code, static_mut_refs)]
pub(crate) unsafe fn set_tcb_cur_ptr(tcb: Option<NonNull<OsTcb>>) {
    unsafe { CPU_STATE.set_tcb_cur(tcb) }
}

#[inline]
#[allow(dead_code, static_mut_refs)]
pub(crate) unsafe fn tcb_high_rdy_ptr() -> Option<NonNull<OsTcb>> {
    unsafe { CPU_STATE.tcb_high_rdy_ptr() }
}

#[inline]
#[allow(static_mut_refs)]
pub(crate) unsafe fn set_tcb_high_rdy_ptr(tcb: Option<NonNull<OsTcb>>) {
    unsafe { CPU_STATE.set_tcb_high_rdy(tcb) }
}

#[inline]
#[allow(dead_code, static_mut_refs)]
pub(crate) unsafe fn prio_cur() -> OsPrio {
    unsafe { CPU_STATE.get_prio_cur() }
}

#[inline]
#[allow(dead_code, static_mut_refs)]
pub(crate) unsafe fn set_prio_cur(prio: OsPrio) {
    unsafe { CPU_STATE.set_prio_cur(prio) }
}

#[inline]
#[allow(dead_code, static_mut_refs)]
pub(crate) unsafe fn prio_high_rdy() -> OsPrio {
    unsafe { CPU_STATE.get_prio_high_rdy() }
}

#[inline]
#[allow(static_mut_refs)]
pub(crate) unsafe fn set_prio_high_rdy(prio: OsPrio) {
    unsafe { CPU_STATE.set_prio_high_rdy(prio) }
}

// ============ Scheduler time-list accessors ============

#[inline(always)]
pub(crate) unsafe fn delay_list() -> &'static mut TimeSortedList {
    unsafe { &mut SCHED.get_unchecked().delay_list }
}

#[inline(always)]
pub(crate) unsafe fn timed_block_list() -> &'static mut TimeSortedList {
    unsafe { &mut SCHED.get_unchecked().timed_block_list }
}

#[inline(always)]
pub(crate) unsafe fn suspend_list() -> &'static mut ReadyList {
    unsafe { &mut SCHED.get_unchecked().suspend_list }
}

/// Record that a schedule is owed once the scheduler resumes.
#[inline(always)]
pub(crate) unsafe fn set_reschedule_pending() {
    unsafe { SCHED.get_unchecked().reschedule_pending = true };
}

/// Total elapsed ticks since `os_start()`, for CPU usage queries.
#[inline(always)]
pub(crate) fn total_ticks() -> OsTick {
    KERNEL.tick_get()
}

//! Scheduler and tick-handler tests
//!
//! The host stub never performs a real context switch (`os_ctx_sw`/
//! `os_int_ctx_sw` are no-ops off-target), so these tests don't try to
//! observe one. Instead they drive `CPU_STATE.tcb_cur` by hand to
//! simulate "who is currently running" and assert on the scheduler's
//! bookkeeping: `tcb_high_rdy`/`prio_high_rdy`, ready-bucket rotation,
//! and the TCB state a blocking call or tick leaves behind. Blocking
//! calls (`Semaphore::wait`) return immediately and spuriously on this
//! port once a task is parked, since there's no real suspend to resume
//! from — that return value is deliberately ignored, with assertions
//! made against the TCB itself afterward.
//!
//! `os_init`/`os_start` reset kernel and scheduler globals shared across
//! every test in this binary, so all of them serialize through
//! `TEST_LOCK`.

use std::sync::Mutex;

use ember::block::{SortOrder, WaitList};
use ember::error::OsError;
use ember::kernel::{os_init, os_sched_lock, os_sched_unlock, os_start, CPU_STATE};
use ember::sched::os_sched_round_robin;
use ember::sem::Semaphore;
use ember::task::{
    os_task_create, os_task_del, os_task_get_cpu_usage, os_task_get_runtime, os_task_resume, os_task_suspend, OsTcb,
};
use ember::time::{os_tick_handler, tick_reached};
use ember::types::{opt, OsPendStatus, OsStkElement, OsTaskState, TIMEOUT_INFINITE};

static TEST_LOCK: Mutex<()> = Mutex::new(());

fn boot() {
    os_init().unwrap();
    os_start().unwrap();
}

fn spawn(name: &'static str, prio: u8) -> *mut OsTcb {
    let tcb: &'static mut OsTcb = Box::leak(Box::new(OsTcb::new()));
    let stack: &'static mut [OsStkElement] = Box::leak(vec![0u32; 128].into_boxed_slice());
    let tcb_ptr = tcb as *mut OsTcb;
    os_task_create(tcb, stack, name, dummy_task, prio).unwrap();
    tcb_ptr
}

fn dummy_task(_: *mut ()) -> ! {
    loop {}
}

#[test]
fn higher_priority_waiter_is_selected_after_a_post() {
    let _guard = TEST_LOCK.lock().unwrap();
    boot();

    let sem = Semaphore::new(0);
    sem.create(0, "s1").unwrap();

    let low_ptr = spawn("low", 10);
    let high_ptr = spawn("high", 2);

    // high blocks on the semaphore first.
    unsafe { CPU_STATE.tcb_cur = high_ptr };
    let _ = sem.wait(TIMEOUT_INFINITE, opt::NONE);
    assert_eq!(unsafe { &*high_ptr }.task_state, OsTaskState::Pend);

    // low is "running" and posts, which must hand off straight to high.
    unsafe { CPU_STATE.tcb_cur = low_ptr };
    sem.signal(opt::NONE).unwrap();

    assert_eq!(unsafe { &*high_ptr }.task_state, OsTaskState::Ready);
    assert_eq!(unsafe { &*low_ptr }.task_state, OsTaskState::Ready);
    unsafe {
        assert_eq!(CPU_STATE.tcb_high_rdy, high_ptr);
        assert_eq!(CPU_STATE.prio_high_rdy, 2);
    }
}

#[test]
fn round_robin_rotates_equal_priority_tasks_in_fifo_order() {
    let _guard = TEST_LOCK.lock().unwrap();
    boot();

    let x_ptr = spawn("x", 20);
    let y_ptr = spawn("y", 20);
    let z_ptr = spawn("z", 20);

    // Creation order puts x at the head of the prio-20 bucket.
    unsafe { CPU_STATE.tcb_cur = x_ptr };
    for _ in 0..10 {
        os_sched_round_robin();
    }
    assert_eq!(unsafe { CPU_STATE.tcb_high_rdy }, y_ptr, "x's quantum expired, y is next");

    unsafe { CPU_STATE.tcb_cur = y_ptr };
    for _ in 0..10 {
        os_sched_round_robin();
    }
    assert_eq!(unsafe { CPU_STATE.tcb_high_rdy }, z_ptr, "y's quantum expired, z is next");

    unsafe { CPU_STATE.tcb_cur = z_ptr };
    for _ in 0..10 {
        os_sched_round_robin();
    }
    assert_eq!(
        unsafe { CPU_STATE.tcb_high_rdy },
        x_ptr,
        "z's quantum expired, back around to x"
    );
}

#[test]
fn round_robin_leaves_a_sole_task_at_its_priority_alone() {
    let _guard = TEST_LOCK.lock().unwrap();
    boot();

    let solo_ptr = spawn("solo", 21);
    unsafe { CPU_STATE.tcb_cur = solo_ptr };

    for _ in 0..30 {
        os_sched_round_robin();
    }

    // No other task at this priority to rotate in, so it just keeps running.
    assert_eq!(unsafe { CPU_STATE.tcb_high_rdy }, solo_ptr);
}

#[test]
fn timed_wait_is_cancelled_by_the_tick_handler_at_deadline() {
    let _guard = TEST_LOCK.lock().unwrap();
    boot();

    let sem = Semaphore::new(0);
    sem.create(0, "s3").unwrap();

    let waiter_ptr = spawn("waiter", 30);
    let other_ptr = spawn("other", 31);

    unsafe { CPU_STATE.tcb_cur = waiter_ptr };
    let _ = sem.wait(10, opt::NONE);
    assert_eq!(unsafe { &*waiter_ptr }.task_state, OsTaskState::PendTimeout);

    // Drive the tick handler as some other, genuinely-ready task.
    unsafe { CPU_STATE.tcb_cur = other_ptr };
    for tick in 1..10 {
        os_tick_handler();
        assert_eq!(
            unsafe { &*waiter_ptr }.task_state,
            OsTaskState::PendTimeout,
            "must not wake before tick {tick}"
        );
    }
    os_tick_handler();

    let waiter = unsafe { &*waiter_ptr };
    assert_eq!(waiter.task_state, OsTaskState::Ready);
    assert_eq!(waiter.pend_status, OsPendStatus::Timeout);
    assert!(waiter.timeout_wakeup);

    // A later signal and non-blocking retry succeeds, same semaphore.
    sem.signal(opt::NONE).unwrap();
    assert_eq!(sem.wait(0, opt::NONE).unwrap(), 0);
}

#[test]
fn tick_reached_handles_counter_wraparound() {
    let wake_up_time = 0xFFFF_FFFEu32.wrapping_add(5);
    assert_eq!(wake_up_time, 3);

    assert!(!tick_reached(2, wake_up_time), "two ticks before the wrap, not reached yet");
    assert!(!tick_reached(0xFFFF_FFFE, wake_up_time), "old tick value, long before target");
    assert!(!tick_reached(0, wake_up_time), "just wrapped to zero, still short of target");
    assert!(tick_reached(3, wake_up_time), "exactly at target");
    assert!(tick_reached(4, wake_up_time), "past target");

    assert!(tick_reached(2, 0xFFFF_FFFE));
    assert!(!tick_reached(0xFFFF_FFFE, 2));
}

#[test]
fn suspend_nesting_requires_a_matching_number_of_resumes() {
    let _guard = TEST_LOCK.lock().unwrap();
    boot();

    let task_ptr = spawn("nested", 15);
    let nn = std::ptr::NonNull::new(task_ptr).unwrap();

    os_task_suspend(Some(nn)).unwrap();
    os_task_suspend(Some(nn)).unwrap();
    assert_eq!(unsafe { &*task_ptr }.task_state, OsTaskState::Suspended);
    assert_eq!(unsafe { &*task_ptr }.suspend_ctr, 2);

    os_task_resume(nn).unwrap();
    assert_eq!(
        unsafe { &*task_ptr }.task_state,
        OsTaskState::Suspended,
        "still one suspend outstanding"
    );

    os_task_resume(nn).unwrap();
    assert_eq!(unsafe { &*task_ptr }.task_state, OsTaskState::Ready);

    assert_eq!(os_task_resume(nn).unwrap_err(), OsError::State);
}

#[test]
fn wait_list_orders_by_priority_then_fifo_among_ties() {
    let a: &'static mut OsTcb = Box::leak(Box::new(OsTcb::new()));
    let b: &'static mut OsTcb = Box::leak(Box::new(OsTcb::new()));
    let c: &'static mut OsTcb = Box::leak(Box::new(OsTcb::new()));
    let d: &'static mut OsTcb = Box::leak(Box::new(OsTcb::new()));
    a.prio = 5;
    b.prio = 2;
    c.prio = 2;
    d.prio = 8;

    let a_ptr = std::ptr::NonNull::new(a as *mut OsTcb).unwrap();
    let b_ptr = std::ptr::NonNull::new(b as *mut OsTcb).unwrap();
    let c_ptr = std::ptr::NonNull::new(c as *mut OsTcb).unwrap();
    let d_ptr = std::ptr::NonNull::new(d as *mut OsTcb).unwrap();

    let mut list = WaitList::new();
    list.insert(SortOrder::PriorityDescending, a_ptr);
    list.insert(SortOrder::PriorityDescending, b_ptr);
    list.insert(SortOrder::PriorityDescending, c_ptr);
    list.insert(SortOrder::PriorityDescending, d_ptr);

    let expected = [b_ptr, c_ptr, a_ptr, d_ptr];
    for expect in expected {
        let head = list.head().unwrap();
        assert_eq!(head, expect);
        list.remove(head);
    }
    assert!(list.is_empty());
}

#[test]
fn deleting_a_ready_task_drops_it_from_its_bucket() {
    let _guard = TEST_LOCK.lock().unwrap();
    boot();

    let victim_ptr = spawn("victim", 18);
    let nn = std::ptr::NonNull::new(victim_ptr).unwrap();

    os_task_del(Some(nn)).unwrap();
    assert_eq!(unsafe { &*victim_ptr }.task_state, OsTaskState::Suspended);

    // A second delete on an already-deleted task is a no-op on its list
    // membership (it's parked in Suspended, matched by the no-op arm).
    assert!(os_task_del(Some(nn)).is_ok());
}

#[test]
fn deleting_a_blocked_waiter_cancels_its_wait() {
    let _guard = TEST_LOCK.lock().unwrap();
    boot();

    let sem = Semaphore::new(0);
    sem.create(0, "del_wait").unwrap();

    let waiter_ptr = spawn("waiter", 19);
    let nn = std::ptr::NonNull::new(waiter_ptr).unwrap();

    unsafe { CPU_STATE.tcb_cur = waiter_ptr };
    let _ = sem.wait(TIMEOUT_INFINITE, opt::NONE);
    assert_eq!(unsafe { &*waiter_ptr }.task_state, OsTaskState::Pend);

    os_task_del(Some(nn)).unwrap();
    assert_eq!(unsafe { &*waiter_ptr }.task_state, OsTaskState::Suspended);
}

#[test]
fn scheduler_lock_defers_a_switch_until_matching_unlock() {
    let _guard = TEST_LOCK.lock().unwrap();
    boot();

    let low_ptr = spawn("low", 25);
    let high_ptr = spawn("high", 1);

    unsafe { CPU_STATE.tcb_cur = low_ptr };
    os_sched_lock().unwrap();
    os_sched_lock().unwrap();

    let sem = Semaphore::new(0);
    sem.create(0, "lock_defer").unwrap();

    unsafe { CPU_STATE.tcb_cur = high_ptr };
    let _ = sem.wait(TIMEOUT_INFINITE, opt::NONE);
    assert_eq!(unsafe { &*high_ptr }.task_state, OsTaskState::Pend);

    unsafe { CPU_STATE.tcb_cur = low_ptr };
    sem.signal(opt::NONE).unwrap();
    assert_eq!(unsafe { &*high_ptr }.task_state, OsTaskState::Ready, "posted regardless of the lock");

    os_sched_unlock().unwrap();
    assert_eq!(os_sched_unlock().unwrap_err(), OsError::State, "nesting already unwound");
}

#[test]
fn runtime_and_cpu_usage_reflect_accumulated_ticks() {
    let _guard = TEST_LOCK.lock().unwrap();
    boot();

    let tcb_ptr = spawn("busy", 30);
    let tcb = unsafe { &mut *tcb_ptr };

    assert_eq!(os_task_get_runtime(tcb), 0);
    assert_eq!(os_task_get_cpu_usage(tcb), 0);

    tcb.run_time_ticks = 250;
    assert_eq!(os_task_get_runtime(tcb), 250);
    assert_eq!(os_task_get_cpu_usage(tcb), 2500, "250 of 1000 total ticks is 25.00%");
}

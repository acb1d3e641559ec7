//! Software timer tests
//!
//! `timer_check` takes the current tick explicitly rather than reading
//! the global tick counter, so timer expiry is testable without ever
//! calling `os_start()`. The timer list itself is a shared global
//! (`TIMER_LIST`), so tests that touch it still serialize through
//! `TEST_LOCK` to avoid cross-test interference within this binary.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use ember::kernel::os_init;
use ember::timer::{timer_check, Timer};

static TEST_LOCK: Mutex<()> = Mutex::new(());

static ONE_SHOT_CALLS: AtomicU32 = AtomicU32::new(0);
fn one_shot_cb(_arg: *mut ()) {
    ONE_SHOT_CALLS.fetch_add(1, Ordering::SeqCst);
}

static RELOAD_CALLS: AtomicU32 = AtomicU32::new(0);
fn reload_cb(_arg: *mut ()) {
    RELOAD_CALLS.fetch_add(1, Ordering::SeqCst);
}

#[test]
fn one_shot_fires_once_at_deadline() {
    let _guard = TEST_LOCK.lock().unwrap();
    os_init().unwrap();
    ONE_SHOT_CALLS.store(0, Ordering::SeqCst);

    let timer = Timer::new();
    timer.create("one_shot", one_shot_cb, core::ptr::null_mut(), 0).unwrap();
    timer.start(5).unwrap();
    assert!(timer.is_active());

    timer_check(4);
    assert_eq!(ONE_SHOT_CALLS.load(Ordering::SeqCst), 0, "must not fire early");

    timer_check(5);
    assert_eq!(ONE_SHOT_CALLS.load(Ordering::SeqCst), 1);
    assert!(!timer.is_active(), "one-shot deactivates after firing");

    timer_check(100);
    assert_eq!(ONE_SHOT_CALLS.load(Ordering::SeqCst), 1, "must not refire");
}

#[test]
fn auto_reload_refires_every_period_until_stopped() {
    let _guard = TEST_LOCK.lock().unwrap();
    os_init().unwrap();
    RELOAD_CALLS.store(0, Ordering::SeqCst);

    let timer = Timer::new();
    timer.create("reload", reload_cb, core::ptr::null_mut(), 10).unwrap();
    timer.start(10).unwrap();

    timer_check(10);
    assert_eq!(RELOAD_CALLS.load(Ordering::SeqCst), 1);
    assert!(timer.is_active());

    timer_check(20);
    assert_eq!(RELOAD_CALLS.load(Ordering::SeqCst), 2);

    timer.stop().unwrap();
    assert!(!timer.is_active());

    timer_check(30);
    assert_eq!(RELOAD_CALLS.load(Ordering::SeqCst), 2, "stopped timer must not refire");
}

#[test]
fn remaining_counts_down_and_reset_restarts_the_window() {
    let _guard = TEST_LOCK.lock().unwrap();
    os_init().unwrap();

    let timer = Timer::new();
    timer.create("remaining", one_shot_cb, core::ptr::null_mut(), 0).unwrap();

    assert_eq!(timer.remaining(), 0, "inactive timer reports no time remaining");

    timer.start(20).unwrap();
    assert_eq!(timer.remaining(), 20);

    timer.reset(5).unwrap();
    assert_eq!(timer.remaining(), 5, "reset rebases the countdown off the new delay");
}

#[test]
fn start_without_a_callback_is_rejected() {
    let _guard = TEST_LOCK.lock().unwrap();
    os_init().unwrap();

    let timer = Timer::new();
    assert!(timer.start(10).is_err(), "never-created timer has no callback to fire");
}

#[test]
fn stop_on_an_inactive_timer_is_rejected() {
    let _guard = TEST_LOCK.lock().unwrap();
    os_init().unwrap();

    let timer = Timer::new();
    timer.create("inactive", one_shot_cb, core::ptr::null_mut(), 0).unwrap();
    assert!(timer.stop().is_err());
}

static ORDER: Mutex<Vec<&'static str>> = Mutex::new(Vec::new());
fn order_t1_cb(_arg: *mut ()) {
    ORDER.lock().unwrap().push("T1");
}
fn order_t2_cb(_arg: *mut ()) {
    ORDER.lock().unwrap().push("T2");
}

#[test]
fn two_interleaved_timers_fire_in_tick_order() {
    let _guard = TEST_LOCK.lock().unwrap();
    os_init().unwrap();
    ORDER.lock().unwrap().clear();

    let t1 = Timer::new();
    t1.create("t1", order_t1_cb, core::ptr::null_mut(), 0).unwrap();
    t1.start(5).unwrap();

    let t2 = Timer::new();
    t2.create("t2", order_t2_cb, core::ptr::null_mut(), 3).unwrap();
    t2.start(3).unwrap();

    for tick in 1..=10 {
        timer_check(tick);
    }

    // T2 at 3, T1 at 5, T2 again at 6 (reloaded after firing at 3),
    // T2 again at 9. T1 is one-shot and deactivates after its single fire.
    assert_eq!(*ORDER.lock().unwrap(), vec!["T2", "T1", "T2", "T2"]);
    assert!(!t1.is_active());
    assert!(t2.is_active());
}

//! Bounded queue tests
//!
//! Exercised entirely through non-blocking sends/receives (`timeout ==
//! 0`): the queue never has to go through the shared blocking engine, so
//! these stay meaningful without a real scheduler behind them. `write`/
//! `read` still require the kernel to be running, so every test brings
//! it up with `os_init` + `os_start` (the idle task alone is enough for
//! `os_start` to pick a highest-ready task on the host stub). `os_init`
//! resets the shared kernel heap the queue allocates its backing storage
//! from, so tests serialize through `TEST_LOCK`.

use std::sync::Mutex;

use ember::error::OsError;
use ember::kernel::{os_init, os_start};
use ember::queue::{OsQueue, Queue};
use ember::types::opt;

static TEST_LOCK: Mutex<()> = Mutex::new(());

fn boot() {
    os_init().unwrap();
    os_start().unwrap();
}

#[test]
fn fifo_order_is_preserved() {
    let _guard = TEST_LOCK.lock().unwrap();
    boot();

    let q: Queue<u32> = Queue::new();
    q.create(4, "fifo").unwrap();

    q.send(1, 0, opt::NONE).unwrap();
    q.send(2, 0, opt::NONE).unwrap();
    q.send(3, 0, opt::NONE).unwrap();
    assert_eq!(q.len(), 3);

    assert_eq!(q.receive(0, opt::NONE).unwrap(), 1);
    assert_eq!(q.receive(0, opt::NONE).unwrap(), 2);
    assert_eq!(q.receive(0, opt::NONE).unwrap(), 3);
    assert!(q.is_empty());
}

#[test]
fn full_queue_rejects_non_blocking_send() {
    let _guard = TEST_LOCK.lock().unwrap();
    boot();

    let q: Queue<u8> = Queue::new();
    q.create(2, "full").unwrap();

    q.send(1, 0, opt::NONE).unwrap();
    q.send(2, 0, opt::NONE).unwrap();
    assert!(q.is_full());

    assert_eq!(q.send(3, 0, opt::NONE).unwrap_err(), OsError::ResourceUnavailable);
}

#[test]
fn empty_queue_rejects_non_blocking_receive() {
    let _guard = TEST_LOCK.lock().unwrap();
    boot();

    let q: Queue<u8> = Queue::new();
    q.create(2, "empty").unwrap();

    assert_eq!(q.receive(0, opt::NONE).unwrap_err(), OsError::ResourceUnavailable);
}

#[test]
fn destroy_rejected_while_non_empty_then_succeeds() {
    let _guard = TEST_LOCK.lock().unwrap();
    boot();

    let q: Queue<u8> = Queue::new();
    q.create(2, "destroy").unwrap();
    q.send(1, 0, opt::NONE).unwrap();

    assert_eq!(q.destroy().unwrap_err(), OsError::State);

    q.receive(0, opt::NONE).unwrap();
    assert!(q.destroy().is_ok());
}

#[test]
fn ring_buffer_wraps_after_interleaved_use() {
    let _guard = TEST_LOCK.lock().unwrap();
    boot();

    let q: Queue<u8> = Queue::new();
    q.create(3, "wrap").unwrap();

    q.send(1, 0, opt::NONE).unwrap();
    q.send(2, 0, opt::NONE).unwrap();
    assert_eq!(q.receive(0, opt::NONE).unwrap(), 1);

    q.send(3, 0, opt::NONE).unwrap();
    q.send(4, 0, opt::NONE).unwrap();
    assert!(q.is_full());

    assert_eq!(q.receive(0, opt::NONE).unwrap(), 2);
    assert_eq!(q.receive(0, opt::NONE).unwrap(), 3);
    assert_eq!(q.receive(0, opt::NONE).unwrap(), 4);
    assert!(q.is_empty());
}

#[test]
fn element_size_mismatch_is_rejected_at_the_byte_level() {
    let _guard = TEST_LOCK.lock().unwrap();
    boot();

    // Exercised against the untyped primitive directly: `Queue<T>`'s
    // `send`/`receive` always pass buffers matching `size_of::<T>()`, so
    // the mismatch path only shows up one level down.
    let mut q = OsQueue::new();
    q.create(4, 2, "mismatch").unwrap();
    q.write(&[1, 2, 3, 4], 0, opt::NONE).unwrap();

    let mut out = [0u8; 3];
    assert_eq!(q.read(&mut out, 0, opt::NONE).unwrap_err(), OsError::QueueSizeMismatch);
}

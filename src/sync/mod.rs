//! Synchronization primitives
//!
//! Semaphores, mutexes and bounded message queues, all built on the
//! shared blocking engine in [`crate::block`].

#[cfg(feature = "sem")]
pub mod sem;

#[cfg(feature = "mutex")]
pub mod mutex;

#[cfg(feature = "queue")]
pub mod queue;

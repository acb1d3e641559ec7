//! Compile-time configuration
//!
//! These constants control the resource limits and tunables of the kernel.
//! They are plain `const` so the optimizer can fold range checks at build
//! time; the assertions below turn an out-of-range value into a build
//! failure rather than a runtime surprise.

/// Maximum number of priority levels. Priority 0 is highest.
pub const CFG_PRIO_MAX: usize = 64;

/// Idle task priority (always the lowest).
pub const CFG_PRIO_IDLE: u8 = (CFG_PRIO_MAX - 1) as u8;

/// System tick rate in Hz.
pub const CFG_TICK_RATE_HZ: u32 = 1000;

/// Default round-robin time slice, in ticks.
pub const CFG_TIME_QUANTA_DEFAULT: u32 = 10;

/// Enable round-robin scheduling among same-priority ready tasks.
pub const CFG_SCHED_ROUND_ROBIN_EN: bool = true;

/// Minimum task stack size, in stack elements.
pub const CFG_STK_SIZE_MIN: usize = 64;

/// Maximum task name length, including the implicit terminator.
pub const CFG_TASK_NAME_LEN: usize = 16;

/// Byte alignment required for task stacks and heap blocks.
pub const CFG_BYTE_ALIGNMENT: usize = 8;

/// Byte value stack memory is filled with at task creation, used for
/// high-water-mark stack usage queries and overflow detection.
pub const CFG_STACK_FILL_BYTE: u8 = 0xA5;

/// Total size of the kernel heap, in bytes.
pub const CFG_HEAP_SIZE: usize = 10 * 1024;

/// Maximum number of mutexes a single task may hold at once (bounds the
/// priority-restore walk over a task's owned-mutex chain).
pub const CFG_MUTEX_MAX_HELD: usize = 8;

/// Maximum depth walked when propagating priority inheritance across a
/// chain of blocked owners.
pub const CFG_MUTEX_MAX_CHAIN_DEPTH: usize = 8;

/// Maximum semaphore count value. Kept well below the storage type's
/// range so overflow is an application bug, not a near-miss.
pub const CFG_SEM_COUNT_MAX: u32 = 0xFFFE;

const _: () = assert!(
    matches!(CFG_PRIO_MAX, 8 | 16 | 32 | 64),
    "CFG_PRIO_MAX must be 8, 16, 32 or 64 to match the priority bitmap width"
);

const _: () = assert!(
    CFG_TASK_NAME_LEN >= 4 && CFG_TASK_NAME_LEN <= 32,
    "CFG_TASK_NAME_LEN must be between 4 and 32"
);

const _: () = assert!(
    CFG_BYTE_ALIGNMENT == 4 || CFG_BYTE_ALIGNMENT == 8,
    "CFG_BYTE_ALIGNMENT must be 4 or 8"
);

const _: () = assert!(CFG_STK_SIZE_MIN >= 32, "CFG_STK_SIZE_MIN must be at least 32");

const _: () = assert!(
    CFG_TICK_RATE_HZ >= 10 && CFG_TICK_RATE_HZ <= 10_000,
    "CFG_TICK_RATE_HZ must be between 10 and 10000"
);

const _: () = assert!(CFG_HEAP_SIZE >= 256, "CFG_HEAP_SIZE must be large enough to hold at least one task stack");

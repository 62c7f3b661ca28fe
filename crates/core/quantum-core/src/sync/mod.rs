//! Synchronization primitives.
//!
//! The kernel runs on a single CPU: most shared structures are protected by
//! the "interrupts disabled within the critical section" discipline that
//! [`IrqSpinLock`] enforces. [`SpinLock`] is the plain TTAS variant for data
//! never touched from interrupt context. Lock ordering is fixed
//! (allocator < paging < heap < handle table < port registry) and noted at
//! each lock site.

mod irq_spinlock;
mod spinlock;

pub use irq_spinlock::{IrqSpinLock, IrqSpinLockGuard};
pub use spinlock::{SpinLock, SpinLockGuard};

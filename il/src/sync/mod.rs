//! Async synchronization primitives

mod async_mutex;

pub use async_mutex::{AcquireError, AsyncMutex, AsyncMutexGuard};

//! AsyncMutex - scoped mutual exclusion for async callers
//!
//! Waiting suspends the calling task; it never blocks a worker thread.

use thiserror::Error;
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Errors from acquiring an [`AsyncMutex`]
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AcquireError {
    #[error("Lock acquisition cancelled")]
    Cancelled,

    #[error("Lock closed")]
    Closed,
}

/// Mutual exclusion over a critical section, backed by a single-permit semaphore
#[derive(Debug)]
pub struct AsyncMutex {
    semaphore: Semaphore,
}

/// Proof of holding an [`AsyncMutex`]; the permit returns when this is dropped
#[derive(Debug)]
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct AsyncMutexGuard<'a> {
    _permit: SemaphorePermit<'a>,
}

impl Default for AsyncMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl AsyncMutex {
    pub fn new() -> Self {
        Self {
            semaphore: Semaphore::new(1),
        }
    }

    /// Wait for the lock without a cancellation signal
    pub async fn lock(&self) -> Result<AsyncMutexGuard<'_>, AcquireError> {
        let permit = self.semaphore.acquire().await.map_err(|_| AcquireError::Closed)?;
        Ok(AsyncMutexGuard { _permit: permit })
    }

    /// Wait for the lock until it is available or `cancel` fires
    ///
    /// A cancelled acquisition consumes no permit.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<AsyncMutexGuard<'_>, AcquireError> {
        debug!("AsyncMutex::acquire: called");
        if cancel.is_cancelled() {
            debug!("AsyncMutex::acquire: already cancelled");
            return Err(AcquireError::Cancelled);
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("AsyncMutex::acquire: cancelled while waiting");
                Err(AcquireError::Cancelled)
            }
            permit = self.semaphore.acquire() => match permit {
                Ok(permit) => Ok(AsyncMutexGuard { _permit: permit }),
                Err(_) => Err(AcquireError::Closed),
            },
        }
    }

    /// Try to take the lock without waiting
    pub fn try_lock(&self) -> Option<AsyncMutexGuard<'_>> {
        self.semaphore
            .try_acquire()
            .ok()
            .map(|permit| AsyncMutexGuard { _permit: permit })
    }

    /// True while some task holds the lock
    pub fn is_locked(&self) -> bool {
        self.semaphore.available_permits() == 0
    }

    /// Number of free permits (0 or 1)
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

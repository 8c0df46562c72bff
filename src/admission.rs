//! Admission control for concurrent sessions.
//!
//! A fixed pool of permits backed by a tokio [`Semaphore`]. The accept loop
//! takes a [`Permit`] for every connection and moves it into the session
//! task; the slot goes back to the pool when the permit is dropped, so each
//! acquisition is released exactly once on every exit path, panics included.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

/// Fixed-capacity permit pool shared by the accept loop and its sessions.
#[derive(Debug, Clone)]
pub struct Admission {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// One admitted session. Dropping it returns the slot.
#[derive(Debug)]
#[must_use = "dropping a permit releases its slot immediately"]
pub struct Permit {
    _permit: OwnedSemaphorePermit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("admission pool closed")]
    Closed,
}

impl Admission {
    /// Create a pool with `capacity` slots.
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a free slot.
    pub async fn acquire(&self) -> Result<Permit, AdmissionError> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| AdmissionError::Closed)?;
        Ok(Permit { _permit: permit })
    }

    /// Take a slot if one is free right now.
    pub fn try_acquire(&self) -> Result<Option<Permit>, AdmissionError> {
        match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => Ok(Some(Permit { _permit: permit })),
            Err(TryAcquireError::NoPermits) => Ok(None),
            Err(TryAcquireError::Closed) => Err(AdmissionError::Closed),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Number of permits currently held.
    pub fn in_use(&self) -> usize {
        self.capacity - self.available()
    }
}

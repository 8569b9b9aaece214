//! Bounded admission control for concurrent requests.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::{
    config::GateConfig,
    error::{Error, Result},
};

/// Limits how many requests execute at once.
///
/// Acquisition suspends the caller until a slot frees up. With a configured
/// timeout, a request that waits too long fails with [`Error::GateTimeout`]
/// before any resources are allocated for it.
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    in_flight: Arc<AtomicUsize>,
    acquire_timeout: Option<Duration>,
}

/// A held execution slot. Dropping it releases the slot.
pub struct GateSlot {
    _permit: OwnedSemaphorePermit,
    in_flight: Arc<AtomicUsize>,
}

impl Drop for GateSlot {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ConcurrencyGate {
    pub fn new(config: &GateConfig) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(config.permits)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            acquire_timeout: config.acquire_timeout_ms.map(Duration::from_millis),
        }
    }

    /// Waits for an execution slot.
    pub async fn acquire(&self) -> Result<GateSlot> {
        let permit = match self.acquire_timeout {
            Some(timeout) => {
                match tokio::time::timeout(timeout, self.semaphore.clone().acquire_owned()).await {
                    Ok(acquired) => acquired,
                    Err(_) => return Err(Error::GateTimeout(timeout.as_millis() as u64)),
                }
            }
            None => self.semaphore.clone().acquire_owned().await,
        }
        .map_err(|e| Error::Config(format!("Gate semaphore closed: {}", e)))?;

        self.in_flight.fetch_add(1, Ordering::SeqCst);
        debug!(in_flight = self.in_flight(), "gate slot acquired");
        Ok(GateSlot {
            _permit: permit,
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    /// Number of requests currently holding a slot.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

//! Rendezvous service contract
//!
//! Workers never talk to each other directly during coordination. They meet
//! through a rendezvous service that offers four primitives:
//!
//! - `signal_entry(state)`: bump a named counter, returning the new value.
//!   The `"setup"` counter hands out worker sequence numbers.
//! - `publish(topic, payload)`: append a JSON payload to a topic.
//! - `observe(topic, count)`: wait until `count` payloads exist on a topic.
//! - `barrier(state, target)`: wait until a counter reaches `target`.
//!
//! A channel is opened when a worker starts coordinating and released when it
//! finishes. `RendezvousLease` ties the release to scope exit so every path out
//! of the scenario, including early returns on error, closes the channel.

use std::ops::Deref;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::deadline::{Deadline, DeadlineExceeded};

pub mod local;
pub mod protocol;
pub mod server;
pub mod tcp;

pub use local::{LocalRendezvous, RendezvousHub};
pub use server::RendezvousServer;
pub use tcp::TcpRendezvous;

#[derive(Debug, Error)]
pub enum RendezvousError {
    #[error("rendezvous channel already released")]
    Released,

    #[error("context deadline exceeded while waiting on rendezvous")]
    DeadlineExceeded,

    #[error("rendezvous server error: {0}")]
    Remote(String),

    #[error("rendezvous protocol error: {0}")]
    Protocol(String),

    #[error("rendezvous i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<DeadlineExceeded> for RendezvousError {
    fn from(_: DeadlineExceeded) -> Self {
        RendezvousError::DeadlineExceeded
    }
}

impl From<serde_json::Error> for RendezvousError {
    fn from(e: serde_json::Error) -> Self {
        RendezvousError::Protocol(e.to_string())
    }
}

#[async_trait]
pub trait Rendezvous: Send + Sync {
    /// Increment the counter for `state` and return its new value (1-indexed)
    async fn signal_entry(&self, deadline: &Deadline, state: &str) -> Result<i64, RendezvousError>;

    /// Append `payload` to `topic`, returning its 1-indexed position
    async fn publish(
        &self,
        deadline: &Deadline,
        topic: &str,
        payload: Value,
    ) -> Result<i64, RendezvousError>;

    /// Wait for at least `count` payloads on `topic`; returns the first `count` in publish order
    async fn observe(
        &self,
        deadline: &Deadline,
        topic: &str,
        count: usize,
    ) -> Result<Vec<Value>, RendezvousError>;

    /// Wait until the counter for `state` reaches `target`
    async fn barrier(&self, deadline: &Deadline, state: &str, target: i64) -> Result<(), RendezvousError>;

    /// Close the channel. Idempotent; later calls fail with `Released`.
    fn release(&self);

    fn is_released(&self) -> bool;
}

/// Scoped ownership of an open rendezvous channel
///
/// Releases the channel on drop.
pub struct RendezvousLease {
    inner: Arc<dyn Rendezvous>,
}

impl RendezvousLease {
    pub fn acquire(inner: Arc<dyn Rendezvous>) -> Self {
        debug!("Rendezvous channel acquired");
        Self { inner }
    }
}

impl Deref for RendezvousLease {
    type Target = dyn Rendezvous;

    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

impl Drop for RendezvousLease {
    fn drop(&mut self) {
        if !self.inner.is_released() {
            self.inner.release();
            debug!("Rendezvous channel released");
        }
    }
}

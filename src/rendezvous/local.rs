// src/rendezvous/local.rs
//
// In-process rendezvous. `RendezvousHub` holds the shared counters and topics;
// each worker gets its own `LocalRendezvous` client so releasing one channel
// does not affect the others. The TCP server serves the same hub.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;
use tracing::trace;

use super::{Rendezvous, RendezvousError};
use crate::deadline::Deadline;

#[derive(Debug, Default)]
struct HubState {
    counters: HashMap<String, i64>,
    topics: HashMap<String, Vec<Value>>,
}

/// Shared coordination state
#[derive(Debug)]
pub struct RendezvousHub {
    state: Mutex<HubState>,
    /// Bumped on every change so waiters can re-check their condition
    version: watch::Sender<u64>,
}

impl RendezvousHub {
    pub fn new() -> Arc<Self> {
        let (version, _) = watch::channel(0);
        Arc::new(Self {
            state: Mutex::new(HubState::default()),
            version,
        })
    }

    /// A fresh client channel onto this hub
    pub fn client(self: &Arc<Self>) -> LocalRendezvous {
        LocalRendezvous {
            hub: Arc::clone(self),
            released: AtomicBool::new(false),
        }
    }

    pub fn signal_entry(&self, state: &str) -> i64 {
        let seq = {
            let mut s = self.state.lock();
            let counter = s.counters.entry(state.to_string()).or_insert(0);
            *counter += 1;
            *counter
        };
        self.notify();
        trace!("signal_entry({}) -> {}", state, seq);
        seq
    }

    pub fn publish(&self, topic: &str, payload: Value) -> i64 {
        let seq = {
            let mut s = self.state.lock();
            let entries = s.topics.entry(topic.to_string()).or_default();
            entries.push(payload);
            entries.len() as i64
        };
        self.notify();
        trace!("publish({}) -> {}", topic, seq);
        seq
    }

    pub fn counter(&self, state: &str) -> i64 {
        self.state.lock().counters.get(state).copied().unwrap_or(0)
    }

    pub fn topic_len(&self, topic: &str) -> usize {
        self.state.lock().topics.get(topic).map(|t| t.len()).unwrap_or(0)
    }

    /// Wait (unbounded) until `count` payloads exist on `topic`
    pub async fn observe(&self, topic: &str, count: usize) -> Vec<Value> {
        self.wait_until(|s| {
            let entries = s.topics.get(topic).map(|t| t.as_slice()).unwrap_or(&[]);
            if entries.len() >= count {
                Some(entries[..count].to_vec())
            } else {
                None
            }
        })
        .await
    }

    /// Wait (unbounded) until the counter for `state` reaches `target`
    pub async fn barrier(&self, state: &str, target: i64) {
        self.wait_until(|s| {
            let current = s.counters.get(state).copied().unwrap_or(0);
            (current >= target).then_some(())
        })
        .await
    }

    fn notify(&self) {
        self.version.send_modify(|v| *v = v.wrapping_add(1));
    }

    async fn wait_until<T>(&self, mut check: impl FnMut(&HubState) -> Option<T>) -> T {
        // Subscribe before checking so a change between the check and the wait is not lost
        let mut rx = self.version.subscribe();
        loop {
            let ready = {
                let state = self.state.lock();
                check(&state)
            };
            if let Some(value) = ready {
                return value;
            }
            if rx.changed().await.is_err() {
                // Sender lives as long as the hub, so this cannot happen while we hold &self
                std::future::pending::<()>().await;
            }
        }
    }
}

/// One worker's channel onto a `RendezvousHub`
#[derive(Debug)]
pub struct LocalRendezvous {
    hub: Arc<RendezvousHub>,
    released: AtomicBool,
}

impl LocalRendezvous {
    fn ensure_open(&self) -> Result<(), RendezvousError> {
        if self.is_released() {
            return Err(RendezvousError::Released);
        }
        Ok(())
    }
}

#[async_trait]
impl Rendezvous for LocalRendezvous {
    async fn signal_entry(&self, deadline: &Deadline, state: &str) -> Result<i64, RendezvousError> {
        self.ensure_open()?;
        if deadline.is_expired() {
            return Err(RendezvousError::DeadlineExceeded);
        }
        Ok(self.hub.signal_entry(state))
    }

    async fn publish(
        &self,
        deadline: &Deadline,
        topic: &str,
        payload: Value,
    ) -> Result<i64, RendezvousError> {
        self.ensure_open()?;
        if deadline.is_expired() {
            return Err(RendezvousError::DeadlineExceeded);
        }
        Ok(self.hub.publish(topic, payload))
    }

    async fn observe(
        &self,
        deadline: &Deadline,
        topic: &str,
        count: usize,
    ) -> Result<Vec<Value>, RendezvousError> {
        self.ensure_open()?;
        Ok(deadline.run(self.hub.observe(topic, count)).await?)
    }

    async fn barrier(&self, deadline: &Deadline, state: &str, target: i64) -> Result<(), RendezvousError> {
        self.ensure_open()?;
        Ok(deadline.run(self.hub.barrier(state, target)).await?)
    }

    fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
    }

    fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn deadline() -> Deadline {
        Deadline::after(Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_sequence_numbers_are_contiguous() {
        let hub = RendezvousHub::new();
        let mut seqs = Vec::new();
        for _ in 0..5 {
            let c = hub.client();
            seqs.push(c.signal_entry(&deadline(), "setup").await.unwrap());
        }
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
        // Counters are per state
        assert_eq!(hub.client().signal_entry(&deadline(), "other").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_signal_entry_unique() {
        let hub = RendezvousHub::new();
        let mut handles = Vec::new();
        for _ in 0..32 {
            let c = hub.client();
            handles.push(tokio::spawn(async move {
                c.signal_entry(&deadline(), "setup").await.unwrap()
            }));
        }
        let mut seqs = Vec::new();
        for h in handles {
            seqs.push(h.await.unwrap());
        }
        seqs.sort_unstable();
        assert_eq!(seqs, (1..=32).collect::<Vec<i64>>());
    }

    #[tokio::test]
    async fn test_observe_waits_for_publishers() {
        let hub = RendezvousHub::new();
        let observer = hub.client();
        let waiter = tokio::spawn(async move { observer.observe(&deadline(), "peers", 2).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        hub.client().publish(&deadline(), "peers", json!({"n": 1})).await.unwrap();
        hub.client().publish(&deadline(), "peers", json!({"n": 2})).await.unwrap();
        hub.client().publish(&deadline(), "peers", json!({"n": 3})).await.unwrap();

        let seen = waiter.await.unwrap().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0]["n"], 1);
        assert_eq!(seen[1]["n"], 2);
    }

    #[tokio::test]
    async fn test_barrier_releases_when_target_reached() {
        let hub = RendezvousHub::new();
        let mut waiters = Vec::new();
        for _ in 0..3 {
            let c = hub.client();
            waiters.push(tokio::spawn(async move {
                c.signal_entry(&deadline(), "ready").await.unwrap();
                c.barrier(&deadline(), "ready", 3).await
            }));
        }
        for w in waiters {
            w.await.unwrap().unwrap();
        }
        assert_eq!(hub.counter("ready"), 3);
    }

    #[tokio::test]
    async fn test_barrier_honours_deadline() {
        let hub = RendezvousHub::new();
        let c = hub.client();
        let short = Deadline::after(Duration::from_millis(30));
        let err = c.barrier(&short, "ready", 1).await.unwrap_err();
        assert!(matches!(err, RendezvousError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_released_channel_rejects_calls() {
        let hub = RendezvousHub::new();
        let c = hub.client();
        c.release();
        c.release();
        assert!(c.is_released());
        assert!(matches!(
            c.signal_entry(&deadline(), "setup").await,
            Err(RendezvousError::Released)
        ));
        // Other clients of the same hub are unaffected
        assert_eq!(hub.client().signal_entry(&deadline(), "setup").await.unwrap(), 1);
    }
}

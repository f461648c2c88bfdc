//! Keyed, context-bound broadcast.
//!
//! Each key holds a list of bounded channels. Delivery never blocks: a full
//! subscriber loses the update. A subscription ends when its context is done
//! or when the key is closed; in both cases the sender is dropped so the
//! receiver observes end-of-stream after draining.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::context::Context;

/// Default per-subscriber buffer.
pub const DEFAULT_BUFFER: usize = 10;

struct Subscriber<T> {
    id: u64,
    tx: mpsc::Sender<T>,
    done: CancellationToken,
}

struct Inner<T> {
    subscribers: DashMap<String, Vec<Subscriber<T>>>,
    buffer: usize,
    next_id: AtomicU64,
}

impl<T> Inner<T> {
    /// Drop the given subscribers of `key` and stop their watchers.
    fn remove(&self, key: &str, ids: &[u64]) {
        let mut removed = Vec::new();
        if let Some(mut subs) = self.subscribers.get_mut(key) {
            subs.retain(|s| {
                if ids.contains(&s.id) {
                    removed.push(s.done.clone());
                    false
                } else {
                    true
                }
            });
        }
        self.subscribers.remove_if(key, |_, subs| subs.is_empty());
        for done in removed {
            done.cancel();
        }
    }
}

/// Keyed broadcaster shared by resource and task subscriptions.
pub struct Fanout<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Fanout<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for Fanout<T>
where
    T: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER)
    }
}

impl<T> Fanout<T>
where
    T: Clone + Send + 'static,
{
    pub fn new(buffer: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                subscribers: DashMap::new(),
                buffer: buffer.max(1),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn buffer(&self) -> usize {
        self.inner.buffer
    }

    /// Add a subscriber for `key`. The subscription is removed and its channel
    /// closed when `ctx` is done.
    pub fn subscribe(&self, ctx: &Context, key: &str) -> mpsc::Receiver<T> {
        let (tx, rx) = mpsc::channel(self.inner.buffer);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let done = CancellationToken::new();

        self.inner
            .subscribers
            .entry(key.to_string())
            .or_default()
            .push(Subscriber {
                id,
                tx,
                done: done.clone(),
            });

        let inner = Arc::clone(&self.inner);
        let ctx = ctx.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            tokio::select! {
                _ = ctx.done() => {
                    debug!("Subscription {} on {} ended by context", id, key);
                    inner.remove(&key, &[id]);
                }
                _ = done.cancelled() => {}
            }
        });

        rx
    }

    /// Send `value` to every subscriber of `key` without blocking. Returns the
    /// number of subscribers that accepted it.
    pub fn notify(&self, key: &str, value: &T) -> usize {
        let targets: Vec<(u64, mpsc::Sender<T>)> = match self.inner.subscribers.get(key) {
            Some(subs) => subs.iter().map(|s| (s.id, s.tx.clone())).collect(),
            None => return 0,
        };

        let mut delivered = 0;
        let mut gone = Vec::new();
        for (id, tx) in targets {
            match tx.try_send(value.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!("Subscriber {} on {} is full, dropping update", id, key);
                }
                Err(TrySendError::Closed(_)) => gone.push(id),
            }
        }

        if !gone.is_empty() {
            self.inner.remove(key, &gone);
        }
        delivered
    }

    /// Close every subscriber of `key`. Returns false if there were none.
    pub fn close(&self, key: &str) -> bool {
        match self.inner.subscribers.remove(key) {
            Some((_, subs)) => {
                for sub in &subs {
                    sub.done.cancel();
                }
                debug!("Closed {} subscribers on {}", subs.len(), key);
                true
            }
            None => false,
        }
    }

    pub fn subscriber_count(&self, key: &str) -> usize {
        self.inner
            .subscribers
            .get(key)
            .map(|subs| subs.len())
            .unwrap_or(0)
    }

    pub fn has_subscribers(&self, key: &str) -> bool {
        self.subscriber_count(key) > 0
    }
}

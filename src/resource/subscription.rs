//! Per-URI resource update bus.

use tokio::sync::mpsc;
use tracing::debug;

use super::Contents;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::fanout::{Fanout, DEFAULT_BUFFER};

/// Delivers resource updates to subscribers of a URI.
#[derive(Clone)]
pub struct SubscriptionManager {
    fanout: Fanout<Contents>,
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER)
    }
}

impl SubscriptionManager {
    pub fn new(buffer: usize) -> Self {
        Self {
            fanout: Fanout::new(buffer),
        }
    }

    /// Subscribe to updates of `uri` until `ctx` is done.
    pub fn subscribe(&self, ctx: &Context, uri: &str) -> Result<mpsc::Receiver<Contents>> {
        ctx.check()?;
        if uri.is_empty() {
            return Err(Error::InvalidUri(uri.to_string()));
        }
        debug!("Subscribed to resource {}", uri);
        Ok(self.fanout.subscribe(ctx, uri))
    }

    /// Drop every subscriber of `uri`, closing their channels.
    pub fn unsubscribe(&self, ctx: &Context, uri: &str) -> Result<()> {
        ctx.check()?;
        if self.fanout.close(uri) {
            debug!("Unsubscribed all from resource {}", uri);
            Ok(())
        } else {
            Err(Error::NotSubscribed(uri.to_string()))
        }
    }

    /// Push `contents` to every subscriber of `uri`; full subscribers miss it.
    pub fn notify(&self, uri: &str, contents: &Contents) -> usize {
        self.fanout.notify(uri, contents)
    }

    pub fn subscriber_count(&self, uri: &str) -> usize {
        self.fanout.subscriber_count(uri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_empty_uri_rejected() {
        let manager = SubscriptionManager::default();
        assert!(matches!(
            manager.subscribe(&Context::new(), ""),
            Err(Error::InvalidUri(_))
        ));
    }

    #[tokio::test]
    async fn test_unsubscribe_closes_all() {
        let ctx = Context::new();
        let manager = SubscriptionManager::default();
        let mut a = manager.subscribe(&ctx, "file:///x").unwrap();
        let mut b = manager.subscribe(&ctx, "file:///x").unwrap();

        manager.unsubscribe(&ctx, "file:///x").unwrap();
        assert!(a.recv().await.is_none());
        assert!(b.recv().await.is_none());
        assert!(matches!(
            manager.unsubscribe(&ctx, "file:///x"),
            Err(Error::NotSubscribed(_))
        ));
    }

    #[tokio::test]
    async fn test_notify_order_preserved() {
        let manager = SubscriptionManager::new(4);
        let mut rx = manager.subscribe(&Context::new(), "mem://a").unwrap();
        for v in ["1", "2", "3"] {
            manager.notify("mem://a", &Contents::text("mem://a", v));
        }
        for v in ["1", "2", "3"] {
            assert_eq!(rx.recv().await.unwrap().text, v);
        }
    }

    #[tokio::test]
    async fn test_context_cancel_removes_subscription() {
        let manager = SubscriptionManager::default();
        let ctx = Context::new();
        let mut rx = manager.subscribe(&ctx, "mem://a").unwrap();
        ctx.cancel();

        let closed = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await;
        assert!(matches!(closed, Ok(None)));
        assert_eq!(manager.subscriber_count("mem://a"), 0);
    }

    #[tokio::test]
    async fn test_cancelled_subscriber_misses_later_updates() {
        let manager = SubscriptionManager::default();
        let gone = Context::new();
        let kept = Context::new();
        let mut a = manager.subscribe(&gone, "mem://a").unwrap();
        let mut b = manager.subscribe(&kept, "mem://a").unwrap();

        gone.cancel();
        tokio::time::timeout(Duration::from_secs(1), async {
            while manager.subscriber_count("mem://a") > 1 {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(manager.notify("mem://a", &Contents::text("mem://a", "v2")), 1);
        assert!(a.recv().await.is_none());
        assert_eq!(b.recv().await.unwrap().text, "v2");
    }
}

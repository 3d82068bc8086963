//! Per-owner live attachment lists.
//!
//! The registry maps an owner document id to one shared `watch` channel.
//! Entries are created on first observation and live as long as the
//! registry. Every observer of an owner holds a receiver on the same
//! channel, so all of them see identical emissions.
//!
//! Publishing re-reads the owner's list and sends it while holding the
//! entry's refresh lock. Two refreshes for one owner therefore never
//! interleave, and an older snapshot can never overwrite a newer one.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tokio_stream::wrappers::WatchStream;
use tracing::debug;

use crate::models::AttachmentRecord;

struct OwnerFeed {
    tx: watch::Sender<Vec<AttachmentRecord>>,
    /// Held while loading and publishing; `true` once a load has been sent.
    refresh: Mutex<bool>,
}

/// Registry of live per-owner feeds, owned by the metadata store.
#[derive(Default)]
pub struct OwnerFeedRegistry {
    feeds: Mutex<HashMap<String, Arc<OwnerFeed>>>,
}

impl OwnerFeedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to `owner`, loading its list with `load` if no load has
    /// been published for it yet.
    ///
    /// The registry lock only covers the map lookup; the load itself runs
    /// under the owner's refresh lock, so other owners are never held up.
    /// A failed first load leaves the feed unloaded for the next caller.
    pub async fn subscribe<F, Fut, E>(&self, owner: &str, load: F) -> Result<AttachmentFeed, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<AttachmentRecord>, E>>,
    {
        let feed = {
            let mut feeds = self.feeds.lock().await;
            let feed = feeds.entry(owner.to_string()).or_insert_with(|| {
                debug!(owner = %owner, "feeds: created");
                Arc::new(OwnerFeed {
                    tx: watch::channel(Vec::new()).0,
                    refresh: Mutex::new(false),
                })
            });
            Arc::clone(feed)
        };

        let mut loaded = feed.refresh.lock().await;
        if !*loaded {
            let initial = load().await?;
            feed.tx.send_replace(initial);
            *loaded = true;
        }
        Ok(AttachmentFeed {
            rx: feed.tx.subscribe(),
        })
    }

    /// Re-read and publish `owner`'s list if anyone has ever observed it.
    pub async fn refresh<F, Fut, E>(&self, owner: &str, load: F) -> Result<(), E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<AttachmentRecord>, E>>,
    {
        let feed = match self.feeds.lock().await.get(owner) {
            Some(feed) => Arc::clone(feed),
            None => return Ok(()),
        };

        let mut loaded = feed.refresh.lock().await;
        let records = load().await?;
        debug!(owner = %owner, count = records.len(), "feeds: publish");
        feed.tx.send_replace(records);
        *loaded = true;
        Ok(())
    }

    pub async fn is_tracked(&self, owner: &str) -> bool {
        self.feeds.lock().await.contains_key(owner)
    }

    pub async fn len(&self) -> usize {
        self.feeds.lock().await.len()
    }
}

/// A live view of one owner's attachments, newest first.
#[derive(Clone)]
pub struct AttachmentFeed {
    rx: watch::Receiver<Vec<AttachmentRecord>>,
}

impl AttachmentFeed {
    /// The most recently published list.
    pub fn current(&self) -> Vec<AttachmentRecord> {
        self.rx.borrow().clone()
    }

    /// Wait for the next publication and return it.
    ///
    /// Returns `None` once the owning store has been dropped.
    pub async fn changed(&mut self) -> Option<Vec<AttachmentRecord>> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    /// Stream yielding the current list immediately, then every update.
    pub fn into_stream(self) -> WatchStream<Vec<AttachmentRecord>> {
        WatchStream::new(self.rx)
    }
}

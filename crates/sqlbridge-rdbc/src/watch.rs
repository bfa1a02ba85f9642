//! Watch registry: backend notification channels mapped to pub/sub topics
//!
//! Each distinct channel gets one generated topic of the form
//! `<topic_base>.watch.<8 lowercase letters>`, stable for the lifetime of
//! the owning driver instance. The registry is read by the notification
//! listener task while `watch()` calls mutate it, hence the lock.

use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;

/// Channel → topic registry for one driver instance
pub struct WatchRegistry {
    topic_base: String,
    entries: Mutex<HashMap<String, String>>,
}

impl WatchRegistry {
    /// Create an empty registry rooted at `topic_base`
    pub fn new(topic_base: impl Into<String>) -> Self {
        Self {
            topic_base: topic_base.into(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Topic for a channel, generating one on first sight.
    ///
    /// Channel names are case-normalized; re-subscribing a channel returns
    /// the existing topic rather than minting a duplicate.
    pub fn topic_for(&self, channel: &str) -> String {
        let channel = channel.to_lowercase();
        let mut entries = self.entries.lock();
        entries
            .entry(channel)
            .or_insert_with(|| {
                let mut rng = rand::thread_rng();
                let suffix: String = (0..8).map(|_| rng.gen_range('a'..='z')).collect();
                format!("{}.watch.{}", self.topic_base, suffix)
            })
            .clone()
    }

    /// Topic for a channel, if one was already generated
    pub fn get(&self, channel: &str) -> Option<String> {
        self.entries.lock().get(&channel.to_lowercase()).cloned()
    }

    /// Number of watched channels
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether any channel is watched
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

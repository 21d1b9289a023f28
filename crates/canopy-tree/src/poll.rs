// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Named, cancelable periodic polls.
//!
//! Each poll is a tokio task ticking on a fixed interval. Registering a name
//! that is already taken aborts the old task first.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info};

/// Registry of running polls, keyed by name.
///
/// Must be used from within a tokio runtime. Dropping the registry aborts
/// every poll it owns.
#[derive(Debug, Default)]
pub struct PollRegistry {
    polls: HashMap<String, JoinHandle<()>>,
}

impl PollRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` every `period`, starting immediately.
    ///
    /// A poll already registered under `name` is cancelled and replaced. A
    /// tick that runs long delays the next one instead of bursting to catch up.
    pub fn register<F, Fut>(&mut self, name: impl Into<String>, period: Duration, mut task: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let handle = tokio::spawn(async move {
            let mut interval = time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                task().await;
            }
        });
        if let Some(previous) = self.polls.insert(name.clone(), handle) {
            debug!(poll = %name, "replacing poll");
            previous.abort();
        }
        info!(poll = %name, ?period, "poll registered");
    }

    /// Stop the poll called `name`. Returns `false` if none was running.
    pub fn cancel(&mut self, name: &str) -> bool {
        match self.polls.remove(name) {
            Some(handle) => {
                handle.abort();
                debug!(poll = %name, "poll cancelled");
                true
            }
            None => false,
        }
    }

    /// Stop every poll.
    pub fn cancel_all(&mut self) {
        for (name, handle) in self.polls.drain() {
            handle.abort();
            debug!(poll = %name, "poll cancelled");
        }
    }

    /// Whether a poll called `name` is registered.
    pub fn is_registered(&self, name: &str) -> bool {
        self.polls.contains_key(name)
    }

    /// Number of registered polls.
    pub fn len(&self) -> usize {
        self.polls.len()
    }

    /// Whether no poll is registered.
    pub fn is_empty(&self) -> bool {
        self.polls.is_empty()
    }
}

impl Drop for PollRegistry {
    fn drop(&mut self) {
        for handle in self.polls.values() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting(counter: &Arc<AtomicUsize>) -> impl FnMut() -> std::future::Ready<()> + Send {
        let counter = Arc::clone(counter);
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn poll_ticks_on_its_period() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut polls = PollRegistry::new();
        polls.register("services", Duration::from_secs(3), counting(&hits));

        // first tick fires immediately
        tokio::task::yield_now().await;
        time::sleep(Duration::from_millis(6500)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn registering_same_name_replaces_the_old_poll() {
        let old = Arc::new(AtomicUsize::new(0));
        let new = Arc::new(AtomicUsize::new(0));
        let mut polls = PollRegistry::new();
        polls.register("services", Duration::from_secs(1), counting(&old));
        tokio::task::yield_now().await;
        polls.register("services", Duration::from_secs(1), counting(&new));
        let before = old.load(Ordering::SeqCst);

        time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(old.load(Ordering::SeqCst), before);
        assert!(new.load(Ordering::SeqCst) >= 3);
        assert_eq!(polls.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_one_poll_and_cancel_all_stops_the_rest() {
        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));
        let mut polls = PollRegistry::new();
        polls.register("a", Duration::from_secs(1), counting(&a));
        polls.register("b", Duration::from_secs(1), counting(&b));

        assert!(polls.cancel("a"));
        assert!(!polls.cancel("a"));
        assert!(!polls.is_registered("a"));
        assert!(polls.is_registered("b"));

        time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(a.load(Ordering::SeqCst), 0);
        let b_hits = b.load(Ordering::SeqCst);
        assert!(b_hits >= 2);

        polls.cancel_all();
        assert!(polls.is_empty());
        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(b.load(Ordering::SeqCst), b_hits);
    }
}

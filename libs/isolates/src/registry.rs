//! Channels Registry
//!
//! System-wide directory of channels by full name (`isolate#channel`). All
//! mutating operations go through one lock, so concurrent registrations of
//! the same name produce exactly one winner.
//!
//! Lookups for names that are not registered yet return an [`Eventually`]:
//! a one-shot waiter is parked under the name and resolved, then removed,
//! by the first registration that satisfies its predicate. Waiters whose
//! lookup was dropped are pruned on the next lookup or removal.

use futures::future::{self, BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use tokio::sync::oneshot;
use tracing::debug;

use iso_config::service::channels;

use crate::connector::{AnyChannel, Channel};
use crate::error::{IsoError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Predicate {
    Any,
    Unsealed,
}

impl Predicate {
    fn matches(&self, channel: &AnyChannel) -> bool {
        match self {
            Predicate::Any => true,
            Predicate::Unsealed => !channel.is_sealed(),
        }
    }
}

struct Waiter {
    predicate: Predicate,
    sender: oneshot::Sender<AnyChannel>,
}

#[derive(Default)]
struct Directory {
    channels: HashMap<String, AnyChannel>,
    waiters: HashMap<String, Vec<Waiter>>,
    closed: bool,
}

impl Directory {
    /// Drop waiters whose `Eventually` was abandoned; returns how many
    fn prune_abandoned(&mut self) -> usize {
        let mut pruned = 0;
        self.waiters.retain(|_, waiters| {
            let before = waiters.len();
            waiters.retain(|waiter| !waiter.sender.is_closed());
            pruned += before - waiters.len();
            !waiters.is_empty()
        });
        pruned
    }
}

#[derive(Default)]
pub struct Channels {
    inner: Mutex<Directory>,
}

impl Channels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `channel` under `name`, resolving matching waiters once
    pub fn register(&self, name: &str, channel: AnyChannel) -> Result<()> {
        let mut dir = self.inner.lock();
        if dir.closed {
            return Err(IsoError::registry_closed(name));
        }
        if dir.channels.contains_key(name) {
            return Err(IsoError::name_conflict(name));
        }
        dir.channels.insert(name.to_string(), channel.clone());

        if let Some(waiters) = dir.waiters.remove(name) {
            let mut resolved = 0;
            let still_waiting: Vec<Waiter> = waiters
                .into_iter()
                .filter(|waiter| !waiter.sender.is_closed())
                .filter_map(|waiter| {
                    if waiter.predicate.matches(&channel) {
                        resolved += 1;
                        let _ = waiter.sender.send(channel.clone());
                        None
                    } else {
                        Some(waiter)
                    }
                })
                .collect();
            if !still_waiting.is_empty() {
                dir.waiters.insert(name.to_string(), still_waiting);
            }
            debug!(channel = name, resolved, "Resolved eventual lookups");
        }
        Ok(())
    }

    /// Best-effort removal
    pub fn remove(&self, name: &str) -> Option<AnyChannel> {
        let mut dir = self.inner.lock();
        dir.prune_abandoned();
        dir.channels.remove(name)
    }

    /// Remove every channel named `isolate#...`; returns how many were removed
    pub fn remove_for_isolate(&self, isolate: &str) -> usize {
        let prefix = format!("{isolate}{}", channels::SEPARATOR);
        let mut dir = self.inner.lock();
        dir.prune_abandoned();
        let before = dir.channels.len();
        dir.channels.retain(|name, _| !name.starts_with(&prefix));
        before - dir.channels.len()
    }

    /// Present-only lookup
    pub fn lookup(&self, name: &str) -> Option<AnyChannel> {
        self.inner.lock().channels.get(name).cloned()
    }

    /// Present-only typed lookup
    pub fn lookup_typed<T: Send + 'static>(&self, name: &str) -> Result<Channel<T>> {
        self.lookup(name)
            .ok_or_else(|| IsoError::unknown_channel(name))?
            .downcast()
    }

    /// Resolves with the channel registered under `name`, now or later
    pub fn get(&self, name: &str) -> Eventually {
        self.eventually(name, Predicate::Any)
    }

    /// Like [`get`](Self::get), but only accepts a channel that is not sealed
    /// when observed.
    ///
    /// The channel may be sealed again by the time the caller sends on it.
    pub fn get_unsealed(&self, name: &str) -> Eventually {
        self.eventually(name, Predicate::Unsealed)
    }

    fn eventually(&self, name: &str, predicate: Predicate) -> Eventually {
        let mut dir = self.inner.lock();
        if let Some(channel) = dir.channels.get(name) {
            if predicate.matches(channel) {
                return Eventually::ready(name, channel.clone());
            }
        }
        if dir.closed {
            return Eventually::failed(name, IsoError::registry_closed(name));
        }

        let pruned = dir.prune_abandoned();
        if pruned > 0 {
            debug!(pruned, "Pruned abandoned lookups");
        }

        let (sender, receiver) = oneshot::channel();
        dir.waiters
            .entry(name.to_string())
            .or_default()
            .push(Waiter { predicate, sender });
        Eventually::pending(name, receiver)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.lock().channels.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.inner.lock().channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Unresolved eventual lookups still parked
    pub fn waiting(&self) -> usize {
        self.inner
            .lock()
            .waiters
            .values()
            .flatten()
            .filter(|waiter| !waiter.sender.is_closed())
            .count()
    }

    /// Refuse further registrations and fail every parked lookup
    pub fn close(&self) {
        let mut dir = self.inner.lock();
        dir.closed = true;
        // Dropping the senders resolves the waiters with `RegistryClosed`
        dir.waiters.clear();
    }
}

impl fmt::Debug for Channels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dir = self.inner.lock();
        f.debug_struct("Channels")
            .field("channels", &dir.channels.len())
            .field("waiters", &dir.waiters.len())
            .field("closed", &dir.closed)
            .finish()
    }
}

/// A channel lookup that resolves exactly once.
///
/// Clones share the same resolution: every clone observes the same
/// channel, and resolving an already resolved value is a no-op.
#[derive(Clone)]
pub struct Eventually {
    name: Arc<str>,
    inner: Shared<BoxFuture<'static, Result<AnyChannel>>>,
}

impl Eventually {
    fn ready(name: &str, channel: AnyChannel) -> Self {
        Self {
            name: Arc::from(name),
            inner: future::ready(Ok(channel)).boxed().shared(),
        }
    }

    fn failed(name: &str, error: IsoError) -> Self {
        Self {
            name: Arc::from(name),
            inner: future::ready(Err(error)).boxed().shared(),
        }
    }

    fn pending(name: &str, receiver: oneshot::Receiver<AnyChannel>) -> Self {
        let name: Arc<str> = Arc::from(name);
        let missing = name.clone();
        Self {
            name,
            inner: receiver
                .map(move |received| received.map_err(|_| IsoError::registry_closed(&*missing)))
                .boxed()
                .shared(),
        }
    }

    /// Name being looked up
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolution so far, without blocking
    pub fn try_get(&self) -> Option<Result<AnyChannel>> {
        self.inner.clone().now_or_never()
    }

    pub fn is_resolved(&self) -> bool {
        self.try_get().is_some()
    }

    /// Block the current thread until resolved.
    ///
    /// Must not be called from inside an isolate handler waiting on a
    /// channel that only that isolate's progress could register.
    pub fn wait(self) -> Result<AnyChannel> {
        futures::executor::block_on(self.inner)
    }

    /// Resolve and downcast to a typed channel
    pub async fn channel<T: Send + 'static>(self) -> Result<Channel<T>> {
        self.await?.downcast()
    }
}

impl Future for Eventually {
    type Output = Result<AnyChannel>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.inner).poll(cx)
    }
}

impl fmt::Debug for Eventually {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Eventually")
            .field("name", &self.name)
            .field("resolved", &self.inner.peek().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    fn channel(name: &str) -> AnyChannel {
        Channel::<u32>::detached(name).erase()
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = Channels::new();
        registry.register("a#events", channel("a#events")).unwrap();

        assert_eq!(registry.lookup("a#events").unwrap().name(), "a#events");
        assert!(registry.lookup("b#events").is_none());
        assert!(registry.lookup_typed::<u32>("a#events").is_ok());
        assert!(matches!(
            registry.lookup_typed::<String>("a#events"),
            Err(IsoError::TypeMismatch { .. })
        ));
        assert_eq!(
            registry.lookup_typed::<u32>("b#events").unwrap_err(),
            IsoError::unknown_channel("b#events")
        );

        let err = registry.register("a#events", channel("a#events")).unwrap_err();
        assert_eq!(err, IsoError::name_conflict("a#events"));
    }

    #[test]
    fn test_concurrent_register_single_winner() {
        let registry = Arc::new(Channels::new());
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    registry.register("contended", channel("contended"))
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| *e == IsoError::name_conflict("contended")));
    }

    #[test]
    fn test_remove_for_isolate_only_touches_prefix() {
        let registry = Channels::new();
        for name in ["w#events", "w#internal", "w#extra", "ww#events", "other#w"] {
            registry.register(name, channel(name)).unwrap();
        }

        assert_eq!(registry.remove_for_isolate("w"), 3);
        assert_eq!(registry.names(), vec!["other#w".to_string(), "ww#events".to_string()]);
        assert!(registry.remove("missing").is_none());
        assert!(registry.remove("other#w").is_some());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_get_present_resolves_immediately() {
        let registry = Channels::new();
        registry.register("x", channel("x")).unwrap();
        let lookup = registry.get("x");
        assert_eq!(lookup.try_get().unwrap().unwrap().name(), "x");
        assert_eq!(registry.waiting(), 0);
    }

    #[test]
    fn test_get_resolves_once_on_registration() {
        let registry = Channels::new();
        let lookup = registry.get("later");
        let observer = lookup.clone();
        assert!(lookup.try_get().is_none());
        assert_eq!(registry.waiting(), 1);

        registry.register("later", channel("later")).unwrap();
        assert_eq!(registry.waiting(), 0);

        let first = lookup.wait().unwrap();
        let second = observer.wait().unwrap();
        assert_eq!(first.name(), "later");
        assert!(first.downcast::<u32>().unwrap().same_channel(&second.downcast::<u32>().unwrap()));
    }

    #[test]
    fn test_get_unsealed_skips_sealed_registration() {
        let registry = Channels::new();
        let sealed = Channel::<u32>::detached("s");
        sealed.seal();
        registry.register("s", sealed.erase()).unwrap();

        let any = registry.get("s");
        let unsealed = registry.get_unsealed("s");
        assert!(any.is_resolved());
        assert!(!unsealed.is_resolved());
        assert_eq!(registry.waiting(), 1);

        registry.remove("s");
        registry.register("s", channel("s")).unwrap();
        let resolved = unsealed.wait().unwrap();
        assert!(!resolved.is_sealed());
    }

    #[test]
    fn test_abandoned_waiters_are_pruned() {
        let registry = Channels::new();
        drop(registry.get("gone"));
        assert_eq!(registry.waiting(), 0);
        registry.register("gone", channel("gone")).unwrap();
        assert!(registry.inner.lock().waiters.is_empty());
    }

    #[test]
    fn test_abandoned_waiters_for_unregistered_names_do_not_accumulate() {
        let registry = Channels::new();
        for i in 0..1_000 {
            drop(registry.get(&format!("never-{i}")));
        }
        let parked: usize = registry.inner.lock().waiters.values().map(Vec::len).sum();
        assert!(parked <= 1, "{parked} abandoned waiters retained");

        let live = registry.get("pending");
        assert_eq!(registry.inner.lock().waiters.len(), 1);
        assert_eq!(registry.waiting(), 1);

        drop(live);
        registry.remove_for_isolate("other");
        assert!(registry.inner.lock().waiters.is_empty());
    }

    #[test]
    fn test_close_fails_pending_lookups() {
        let registry = Channels::new();
        let lookup = registry.get("never");
        registry.close();

        assert_eq!(lookup.wait().unwrap_err(), IsoError::registry_closed("never"));
        assert!(matches!(
            registry.register("never", channel("never")),
            Err(IsoError::RegistryClosed { .. })
        ));
        assert!(registry.get("never").wait().is_err());
    }
}

//! Thread-safe event emitter.
//!
//! A `tokio::sync::broadcast` channel is the right shape for "every
//! subscriber gets every event" but has no way to remove a single
//! subscription by identity — `broadcast::Sender` only supports
//! dropping a whole `Receiver`. This emitter is shared by every layer
//! (Engine, Transport, Manager, Socket) and each layer emits a
//! different payload shape, so this is generic over the argument type
//! `T` rather than fixed to `serde_json::Value`; the public-facing
//! socket API instantiates it as `Emitter<serde_json::Value>`, while
//! internal plumbing instantiates it with packet or state types.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// Opaque handle identifying a single registered listener, returned by
/// [`Emitter::on`]/[`Emitter::once`] so callers can later target it
/// with [`Emitter::off_listener`].
pub type ListenerId = u64;

type ListenerFn<T> = dyn Fn(&[T]) + Send + Sync + 'static;

struct Registration<T> {
    id: ListenerId,
    listener: Arc<ListenerFn<T>>,
}

impl<T> Clone for Registration<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            listener: self.listener.clone(),
        }
    }
}

struct State<T> {
    persistent: HashMap<String, Vec<Registration<T>>>,
    once: HashMap<String, Vec<Registration<T>>>,
    next_id: u64,
}

impl<T> Default for State<T> {
    fn default() -> Self {
        Self {
            persistent: HashMap::new(),
            once: HashMap::new(),
            next_id: 0,
        }
    }
}

/// A thread-safe, identity-addressable event emitter over argument
/// type `T`.
///
/// `emit` dispatches to the snapshot of listeners registered for that
/// event at the moment emission began; listeners added during dispatch
/// are not invoked in that same pass, and one-shot listeners present in
/// the snapshot are removed atomically before the next caller can
/// observe the table.
pub struct Emitter<T> {
    state: Arc<Mutex<State<T>>>,
}

impl<T> Clone for Emitter<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<T> Default for Emitter<T> {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Emitter<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(state: &mut State<T>) -> ListenerId {
        state.next_id += 1;
        state.next_id
    }

    /// Register a persistent listener for `event`. Returns an id usable
    /// with [`Emitter::off_listener`].
    pub fn on<F>(&self, event: &str, listener: F) -> ListenerId
    where
        F: Fn(&[T]) + Send + Sync + 'static,
    {
        let mut state = self.state.lock().unwrap();
        let id = Self::next_id(&mut state);
        state
            .persistent
            .entry(event.to_string())
            .or_default()
            .push(Registration {
                id,
                listener: Arc::new(listener),
            });
        id
    }

    /// Register a one-shot listener for `event`. It is invoked at most
    /// once and then removed, even if `emit` is never called again.
    pub fn once<F>(&self, event: &str, listener: F) -> ListenerId
    where
        F: Fn(&[T]) + Send + Sync + 'static,
    {
        let mut state = self.state.lock().unwrap();
        let id = Self::next_id(&mut state);
        state
            .once
            .entry(event.to_string())
            .or_default()
            .push(Registration {
                id,
                listener: Arc::new(listener),
            });
        id
    }

    /// Remove every listener for every event.
    pub fn off_all(&self) {
        let mut state = self.state.lock().unwrap();
        state.persistent.clear();
        state.once.clear();
    }

    /// Remove every listener registered for `event`.
    pub fn off_event(&self, event: &str) {
        let mut state = self.state.lock().unwrap();
        state.persistent.remove(event);
        state.once.remove(event);
    }

    /// Remove a single listener, identified by the id returned from
    /// `on`/`once`, from `event`.
    pub fn off_listener(&self, event: &str, id: ListenerId) {
        let mut state = self.state.lock().unwrap();
        if let Some(v) = state.persistent.get_mut(event) {
            v.retain(|r| r.id != id);
        }
        if let Some(v) = state.once.get_mut(event) {
            v.retain(|r| r.id != id);
        }
    }

    /// Dispatch `args` to every listener registered for `event` at the
    /// moment this call began.
    pub fn emit(&self, event: &str, args: &[T]) {
        let (persistent_snapshot, once_snapshot) = {
            let state = self.state.lock().unwrap();
            (
                state.persistent.get(event).cloned().unwrap_or_default(),
                state.once.get(event).cloned().unwrap_or_default(),
            )
        };

        for reg in persistent_snapshot.iter().chain(once_snapshot.iter()) {
            (reg.listener)(args);
        }

        if !once_snapshot.is_empty() {
            let fired: HashSet<ListenerId> = once_snapshot.iter().map(|r| r.id).collect();
            let mut state = self.state.lock().unwrap();
            if let Some(v) = state.once.get_mut(event) {
                v.retain(|r| !fired.contains(&r.id));
            }
        }
    }

    /// The ids of every listener (persistent and one-shot) currently
    /// registered for `event`.
    pub fn listeners(&self, event: &str) -> Vec<ListenerId> {
        let state = self.state.lock().unwrap();
        let mut ids: Vec<ListenerId> = state
            .persistent
            .get(event)
            .map(|v| v.iter().map(|r| r.id).collect())
            .unwrap_or_default();
        if let Some(v) = state.once.get(event) {
            ids.extend(v.iter().map(|r| r.id));
        }
        ids
    }

    /// Whether at least one listener is registered for `event`.
    pub fn has_listeners(&self, event: &str) -> bool {
        let state = self.state.lock().unwrap();
        state.persistent.get(event).is_some_and(|v| !v.is_empty())
            || state.once.get(event).is_some_and(|v| !v.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn on_listener_fires_every_emit() {
        let emitter: Emitter<()> = Emitter::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        emitter.on("msg", move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        emitter.emit("msg", &[]);
        emitter.emit("msg", &[]);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn once_listener_fires_exactly_once() {
        let emitter: Emitter<()> = Emitter::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        emitter.once("msg", move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        emitter.emit("msg", &[]);
        emitter.emit("msg", &[]);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!emitter.has_listeners("msg"));
    }

    #[test]
    fn off_listener_removes_only_that_listener() {
        let emitter: Emitter<()> = Emitter::new();
        let a_count = Arc::new(AtomicUsize::new(0));
        let b_count = Arc::new(AtomicUsize::new(0));
        let (ca, cb) = (a_count.clone(), b_count.clone());
        let id_a = emitter.on("e", move |_| {
            ca.fetch_add(1, Ordering::SeqCst);
        });
        emitter.on("e", move |_| {
            cb.fetch_add(1, Ordering::SeqCst);
        });
        emitter.off_listener("e", id_a);
        emitter.emit("e", &[]);
        assert_eq!(a_count.load(Ordering::SeqCst), 0);
        assert_eq!(b_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listeners_added_during_dispatch_do_not_see_that_pass() {
        let emitter: Emitter<()> = Emitter::new();
        let outer_fired = Arc::new(AtomicUsize::new(0));
        let inner_fired = Arc::new(AtomicUsize::new(0));
        let emitter_clone = emitter.clone();
        let inner = inner_fired.clone();
        let outer = outer_fired.clone();
        emitter.on("e", move |_| {
            outer.fetch_add(1, Ordering::SeqCst);
            let inner = inner.clone();
            emitter_clone.on("e", move |_| {
                inner.fetch_add(1, Ordering::SeqCst);
            });
        });
        emitter.emit("e", &[]);
        assert_eq!(outer_fired.load(Ordering::SeqCst), 1);
        assert_eq!(inner_fired.load(Ordering::SeqCst), 0);
        emitter.emit("e", &[]);
        assert_eq!(outer_fired.load(Ordering::SeqCst), 2);
        assert_eq!(inner_fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn off_event_clears_both_persistent_and_once() {
        let emitter: Emitter<()> = Emitter::new();
        emitter.on("e", |_| {});
        emitter.once("e", |_| {});
        assert!(emitter.has_listeners("e"));
        emitter.off_event("e");
        assert!(!emitter.has_listeners("e"));
    }

    #[test]
    fn off_all_clears_every_event() {
        let emitter: Emitter<()> = Emitter::new();
        emitter.on("a", |_| {});
        emitter.on("b", |_| {});
        emitter.off_all();
        assert!(!emitter.has_listeners("a"));
        assert!(!emitter.has_listeners("b"));
    }

    #[test]
    fn emit_carries_typed_arguments_to_listeners() {
        let emitter: Emitter<serde_json::Value> = Emitter::new();
        let received = Arc::new(Mutex::new(Vec::new()));
        let r = received.clone();
        emitter.on("data", move |args: &[serde_json::Value]| {
            r.lock().unwrap().extend_from_slice(args);
        });
        emitter.emit("data", &[serde_json::json!(42)]);
        assert_eq!(*received.lock().unwrap(), vec![serde_json::json!(42)]);
    }
}

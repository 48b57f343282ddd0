//! A single named wait/signal object

use bw_core::{BlockId, EngineError, EngineResult, TabId, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::trace;

/// Acceptance test applied to a signaled value
pub type Predicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Callback invoked for every accepted signal of a subscription
pub type SignalCallback = Arc<dyn Fn(Value) + Send + Sync>;

/// Handle returned by [`Lock::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

enum Delivery {
    Value(Value),
    Released,
}

struct Waiter {
    predicate: Option<Predicate>,
    sender: oneshot::Sender<Delivery>,
}

struct Subscription {
    id: SubscriptionId,
    predicate: Option<Predicate>,
    callback: SignalCallback,
}

#[derive(Default)]
struct LockState {
    value: Value,
    waiters: Vec<Waiter>,
    subscriptions: Vec<Subscription>,
    released: bool,
}

fn accepts(predicate: &Option<Predicate>, value: &Value) -> bool {
    predicate.as_ref().map(|p| p(value)).unwrap_or(true)
}

/// Named, tab-scoped wait/signal object
///
/// Waiters suspend until a signal their predicate accepts; subscriptions
/// get a callback for every accepted signal. Both are served in
/// registration order.
pub struct Lock {
    tab: TabId,
    owner: BlockId,
    key: String,
    state: Mutex<LockState>,
    next_subscription: AtomicU64,
}

impl std::fmt::Debug for Lock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lock")
            .field("tab", &self.tab)
            .field("owner", &self.owner)
            .field("key", &self.key)
            .finish()
    }
}

impl Lock {
    pub(crate) fn new(tab: &str, owner: &str, key: &str) -> Self {
        Self {
            tab: tab.to_string(),
            owner: owner.to_string(),
            key: key.to_string(),
            state: Mutex::new(LockState::default()),
            next_subscription: AtomicU64::new(1),
        }
    }

    fn state(&self) -> MutexGuard<'_, LockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn tab(&self) -> &str {
        &self.tab
    }

    /// Block that created the lock
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Last signaled value
    pub fn value(&self) -> Value {
        self.state().value.clone()
    }

    /// Register a waiter without suspending
    ///
    /// Lets a caller be in place before it triggers the signal it waits for.
    pub fn register_waiter(&self, predicate: Option<Predicate>) -> PendingSignal {
        let (sender, receiver) = oneshot::channel();
        let mut state = self.state();
        if state.released {
            let _ = sender.send(Delivery::Released);
        } else {
            state.waiters.retain(|w| !w.sender.is_closed());
            state.waiters.push(Waiter { predicate, sender });
        }
        PendingSignal {
            key: self.key.clone(),
            receiver,
        }
    }

    /// Suspend until an accepted signal arrives
    ///
    /// Returns `Ok(None)` on timeout; `None` timeout waits indefinitely.
    pub async fn await_signal(
        &self,
        predicate: Option<Predicate>,
        timeout: Option<Duration>,
    ) -> EngineResult<Option<Value>> {
        self.register_waiter(predicate).wait(timeout).await
    }

    /// Wake every accepting waiter, then run every accepting subscription
    ///
    /// Returns how many waiters and subscriptions accepted the value.
    pub fn signal_all(&self, value: Value) -> usize {
        let (woken, callbacks) = {
            let mut state = self.state();
            state.value = value.clone();

            let mut woken = 0;
            let mut pending = Vec::with_capacity(state.waiters.len());
            for waiter in state.waiters.drain(..) {
                if waiter.sender.is_closed() {
                    continue;
                }
                if !accepts(&waiter.predicate, &value) {
                    pending.push(waiter);
                } else if waiter.sender.send(Delivery::Value(value.clone())).is_ok() {
                    woken += 1;
                }
            }
            state.waiters = pending;

            let callbacks: Vec<SignalCallback> = state
                .subscriptions
                .iter()
                .filter(|s| accepts(&s.predicate, &value))
                .map(|s| s.callback.clone())
                .collect();
            (woken, callbacks)
        };

        trace!(key = %self.key, woken, subscribers = callbacks.len(), "Signaled lock");
        let accepted = woken + callbacks.len();
        // Callbacks run outside the state mutex so they may touch the lock
        for callback in callbacks {
            callback(value.clone());
        }
        accepted
    }

    /// Register a callback for every accepted signal
    pub fn subscribe(
        &self,
        predicate: Option<Predicate>,
        callback: SignalCallback,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::SeqCst));
        let mut state = self.state();
        if !state.released {
            state.subscriptions.push(Subscription {
                id,
                predicate,
                callback,
            });
        }
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut state = self.state();
        let before = state.subscriptions.len();
        state.subscriptions.retain(|s| s.id != id);
        state.subscriptions.len() != before
    }

    pub fn waiter_count(&self) -> usize {
        self.state()
            .waiters
            .iter()
            .filter(|w| !w.sender.is_closed())
            .count()
    }

    pub fn subscriber_count(&self) -> usize {
        self.state().subscriptions.len()
    }

    pub fn is_released(&self) -> bool {
        self.state().released
    }

    /// Drop every waiter and subscription; pending waits see a release
    pub(crate) fn release(&self) {
        let mut state = self.state();
        state.released = true;
        for waiter in state.waiters.drain(..) {
            let _ = waiter.sender.send(Delivery::Released);
        }
        state.subscriptions.clear();
    }
}

/// A registered waiter that has not been awaited yet
pub struct PendingSignal {
    key: String,
    receiver: oneshot::Receiver<Delivery>,
}

impl PendingSignal {
    /// Suspend until the waiter is served
    ///
    /// `Ok(None)` means the timeout elapsed first.
    pub async fn wait(self, timeout: Option<Duration>) -> EngineResult<Option<Value>> {
        let delivery = match timeout {
            Some(limit) => match tokio::time::timeout(limit, self.receiver).await {
                Ok(delivery) => delivery,
                Err(_) => return Ok(None),
            },
            None => self.receiver.await,
        };

        match delivery {
            Ok(Delivery::Value(value)) => Ok(Some(value)),
            Ok(Delivery::Released) | Err(_) => Err(EngineError::LockReleased { key: self.key }),
        }
    }
}

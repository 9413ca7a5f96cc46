//! Change notification: gateway boundary, in-process hub, and the
//! subscription objects managers hand to callers.
//!
//! # Responsibility
//! - Define the `ChangeGateway` boundary (subscribe/unsubscribe by handle).
//! - Provide `ChangeHub`, the in-process implementation gateways publish to.
//! - Define the caller-facing `Subscription` carrying a channel of typed
//!   change events.
//!
//! # Invariants
//! - Exactly one observer handle exists per subscription; cancelling (or
//!   dropping) the subscription releases it, and a second cancel is a no-op.
//! - The hub dispatches on the publisher's thread and never holds its
//!   registry lock while invoking callbacks.

use crate::contract::address::ResourceAddress;
use std::collections::HashMap;
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use uuid::Uuid;

/// Callback a change gateway invokes with the address that changed.
pub type ChangeCallback = Arc<dyn Fn(&ResourceAddress) + Send + Sync>;

/// Opaque handle identifying one registered observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverHandle(Uuid);

/// Subscription boundary gateways notify through.
pub trait ChangeGateway: Send + Sync {
    /// Registers an observer for `address`. With `include_descendants`, item
    /// addresses under a collection address notify the observer too.
    fn subscribe(
        &self,
        address: ResourceAddress,
        include_descendants: bool,
        on_change: ChangeCallback,
    ) -> ObserverHandle;

    /// Releases an observer. Returns false when the handle is unknown
    /// (already released).
    fn unsubscribe(&self, handle: ObserverHandle) -> bool;
}

struct ObserverEntry {
    address: ResourceAddress,
    include_descendants: bool,
    on_change: ChangeCallback,
}

impl ObserverEntry {
    fn covers(&self, address: &ResourceAddress) -> bool {
        if self.address == *address {
            return true;
        }

        self.include_descendants
            && !self.address.has_id()
            && address.has_id()
            && self.address.scheme() == address.scheme()
            && self.address.authority() == address.authority()
            && self.address.table() == address.table()
    }
}

/// In-process change hub: storage gateways publish changed addresses, and
/// every covering observer is invoked on the publisher's thread.
#[derive(Default)]
pub struct ChangeHub {
    observers: Mutex<HashMap<ObserverHandle, ObserverEntry>>,
}

impl ChangeHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifies every observer whose registration covers `address`.
    pub fn publish(&self, address: &ResourceAddress) {
        // Snapshot the covering callbacks so no lock is held during dispatch;
        // a callback may re-enter the hub (e.g. to unsubscribe).
        let callbacks: Vec<ChangeCallback> = {
            let observers = self
                .observers
                .lock()
                .unwrap_or_else(PoisonError::into_inner);

            observers
                .values()
                .filter(|entry| entry.covers(address))
                .map(|entry| Arc::clone(&entry.on_change))
                .collect()
        };

        for callback in callbacks {
            callback(address);
        }
    }
}

impl ChangeGateway for ChangeHub {
    fn subscribe(
        &self,
        address: ResourceAddress,
        include_descendants: bool,
        on_change: ChangeCallback,
    ) -> ObserverHandle {
        let handle = ObserverHandle(Uuid::new_v4());
        let entry = ObserverEntry {
            address,
            include_descendants,
            on_change,
        };

        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(handle, entry);

        handle
    }

    fn unsubscribe(&self, handle: ObserverHandle) -> bool {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle)
            .is_some()
    }
}

/// Watch scope for a manager subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchMode {
    /// Any change under the collection.
    Collection,
    /// Only the item with this id.
    Item(i64),
}

/// One change observed by a subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent<T> {
    /// The addressed item changed; carries its re-fetched state.
    Changed(T),
    /// The addressed item no longer exists.
    Deleted(i64),
    /// The collection changed as a whole; carries its full current state.
    /// Suppressed for item-mode subscriptions.
    CollectionChanged(Vec<T>),
}

/// A caller-held registration delivering typed change events over a channel.
///
/// Cancelling releases the underlying observer; dropping the subscription
/// cancels it implicitly.
pub struct Subscription<T> {
    id: Uuid,
    mode: WatchMode,
    receiver: Receiver<ChangeEvent<T>>,
    changes: Arc<dyn ChangeGateway>,
    registry: Arc<Mutex<HashMap<Uuid, ObserverHandle>>>,
}

impl<T> std::fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl<T> Subscription<T> {
    pub(crate) fn new(
        mode: WatchMode,
        receiver: Receiver<ChangeEvent<T>>,
        handle: ObserverHandle,
        changes: Arc<dyn ChangeGateway>,
        registry: Arc<Mutex<HashMap<Uuid, ObserverHandle>>>,
    ) -> Self {
        let id = Uuid::new_v4();

        registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, handle);

        Self {
            id,
            mode,
            receiver,
            changes,
            registry,
        }
    }

    pub fn mode(&self) -> WatchMode {
        self.mode
    }

    /// Next pending event, without blocking.
    pub fn try_recv(&self) -> Option<ChangeEvent<T>> {
        self.receiver.try_recv().ok()
    }

    /// Blocks until an event arrives or the timeout elapses.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<ChangeEvent<T>> {
        self.receiver.recv_timeout(timeout).ok()
    }

    /// Releases the underlying observer. Returns false when the subscription
    /// was already cancelled (documented no-op).
    pub fn cancel(&self) -> bool {
        let removed = self
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);

        match removed {
            Some(handle) => self.changes.unsubscribe(handle),
            None => false,
        }
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.cancel();
    }
}

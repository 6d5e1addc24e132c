//! # Priority Event Buses
//!
//! Small, independent publish/subscribe channels. Every bus instance owns a set
//! of `(handler, priority)` registrations and dispatches to them in priority
//! order, breaking ties by registration order.
//!
//! Two flavours exist:
//!
//! - [`PriorityEvent<T>`] - plain (`T = ()`) or typed events. Every handler runs.
//! - [`CancelablePriorityEvent<T>`] - handlers may cancel the event, which stops
//!   dispatch to the remaining non-monitor handlers. Handlers registered at
//!   [`EventPriority::Monitor`] always run last and observe the final outcome.
//!
//! ## Failure isolation
//!
//! A handler that returns an error or panics is logged and dispatch continues
//! with the next handler. Nothing a handler does can abort a publish.
//!
//! ## Concurrency
//!
//! Registrations live behind a read-write lock. `publish` takes a snapshot of
//! the ordered handler list and releases the lock before dispatching, so
//! handlers can subscribe or unsubscribe re-entrantly and concurrent
//! registration never affects a dispatch already in flight.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, trace, warn};

// ============================================================================
// Priorities and Registration Tokens
// ============================================================================

/// Dispatch priority of a handler.
///
/// Lower numeric values run first. `Monitor` is a special tier that always runs
/// after every other tier; on cancelable events it runs even when the event was
/// canceled, and it cannot change the cancellation state.
///
/// The variants are declared in dispatch order so the derived `Ord` matches the
/// numeric values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum EventPriority {
    /// Highest event priority.
    Highest = 1,
    /// Higher event priority.
    Higher = 2,
    /// High event priority.
    High = 3,
    /// Normal (default) event priority.
    Normal = 4,
    /// Low event priority.
    Low = 5,
    /// Lower event priority.
    Lower = 6,
    /// Lowest event priority.
    Lowest = 7,
    /// Observe-only tier. Runs last, regardless of cancellation.
    Monitor = 10,
}

impl EventPriority {
    /// Returns the numeric value of the priority.
    pub fn value(self) -> u8 {
        self as u8
    }

    /// Returns true for the observe-only [`EventPriority::Monitor`] tier.
    pub fn is_monitor(self) -> bool {
        self == EventPriority::Monitor
    }
}

impl Default for EventPriority {
    fn default() -> Self {
        EventPriority::Normal
    }
}

impl fmt::Display for EventPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.value())
    }
}

/// Token returned by `subscribe`, used to remove the registration later.
///
/// Closures have no identity in Rust, so the bus hands out a token instead of
/// comparing handlers. The priority is fixed for the lifetime of the token;
/// changing it requires `unsubscribe` followed by a new `subscribe_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId {
    priority: EventPriority,
    sequence: u64,
}

impl SubscriptionId {
    /// The priority this registration was made with.
    pub fn priority(&self) -> EventPriority {
        self.priority
    }
}

// ============================================================================
// Errors and Statistics
// ============================================================================

/// Errors produced by event handlers.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    /// The handler reported a failure.
    #[error("Handler execution error: {0}")]
    HandlerExecution(String),
    /// The handler panicked; the payload message is preserved.
    #[error("Handler panicked: {0}")]
    HandlerPanicked(String),
}

/// Per-bus counters for monitoring.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EventBusStats {
    /// Number of live registrations
    pub handlers: usize,
    /// Number of `publish` calls since creation
    pub published: u64,
    /// Number of handler invocations that returned an error or panicked
    pub handler_failures: u64,
}

/// Extracts a readable message from a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn invoke_guarded<F>(call: F) -> Result<(), EventError>
where
    F: FnOnce() -> Result<(), EventError>,
{
    match catch_unwind(AssertUnwindSafe(call)) {
        Ok(result) => result,
        Err(payload) => Err(EventError::HandlerPanicked(panic_message(payload.as_ref()))),
    }
}

// ============================================================================
// Shared Registration Storage
// ============================================================================

/// Ordered registration storage shared by every bus flavour.
///
/// Entries are keyed by `(priority, sequence)`; the sequence counter is
/// monotonically increasing per bus, which makes equal priorities dispatch in
/// registration order.
struct HandlerSet<F: ?Sized> {
    name: String,
    next_sequence: AtomicU64,
    handlers: RwLock<BTreeMap<(EventPriority, u64), Arc<F>>>,
    published: AtomicU64,
    failures: AtomicU64,
}

impl<F: ?Sized> HandlerSet<F> {
    fn new(name: String) -> Self {
        Self {
            name,
            next_sequence: AtomicU64::new(0),
            handlers: RwLock::new(BTreeMap::new()),
            published: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    fn insert(&self, priority: EventPriority, handler: Arc<F>) -> SubscriptionId {
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        self.handlers.write().insert((priority, sequence), handler);
        trace!("Subscribed handler #{} to {} at {}", sequence, self.name, priority);
        SubscriptionId { priority, sequence }
    }

    fn remove(&self, id: SubscriptionId) -> bool {
        self.handlers
            .write()
            .remove(&(id.priority, id.sequence))
            .is_some()
    }

    fn snapshot(&self) -> Vec<(EventPriority, Arc<F>)> {
        self.published.fetch_add(1, Ordering::Relaxed);
        self.handlers
            .read()
            .iter()
            .map(|((priority, _), handler)| (*priority, handler.clone()))
            .collect()
    }

    fn record(&self, priority: EventPriority, result: Result<(), EventError>) {
        if let Err(e) = result {
            self.failures.fetch_add(1, Ordering::Relaxed);
            error!("Exception while handling event {} ({}): {}", self.name, priority, e);
        }
    }

    fn len(&self) -> usize {
        self.handlers.read().len()
    }

    fn clear(&self) {
        self.handlers.write().clear();
    }

    fn stats(&self) -> EventBusStats {
        EventBusStats {
            handlers: self.len(),
            published: self.published.load(Ordering::Relaxed),
            handler_failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// Plain and Typed Events
// ============================================================================

/// Handler signature for [`PriorityEvent`]: `(sender, args)`.
pub type EventCallback<T> = dyn Fn(&str, &T) -> Result<(), EventError> + Send + Sync;

/// A named event with prioritized handlers.
///
/// `PriorityEvent` (with the default `T = ()`) carries no payload; any other
/// `T` is passed to handlers by reference. Every handler is invoked on every
/// publish.
///
/// # Examples
///
/// ```rust
/// use module_api::{EventPriority, PriorityEvent};
///
/// let ticked: PriorityEvent<u64> = PriorityEvent::new("tick");
/// ticked.subscribe_at(EventPriority::High, |_sender, frame| {
///     assert!(*frame > 0);
///     Ok(())
/// });
/// ticked.publish("host", &42);
/// ```
pub struct PriorityEvent<T = ()> {
    set: HandlerSet<EventCallback<T>>,
}

impl<T> PriorityEvent<T> {
    /// Creates an empty event. The name only appears in logs.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            set: HandlerSet::new(name.into()),
        }
    }

    /// The event name.
    pub fn name(&self) -> &str {
        &self.set.name
    }

    /// Registers a handler at [`EventPriority::Normal`].
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&str, &T) -> Result<(), EventError> + Send + Sync + 'static,
    {
        self.subscribe_at(EventPriority::Normal, handler)
    }

    /// Registers a handler at an explicit priority.
    pub fn subscribe_at<F>(&self, priority: EventPriority, handler: F) -> SubscriptionId
    where
        F: Fn(&str, &T) -> Result<(), EventError> + Send + Sync + 'static,
    {
        self.set.insert(priority, Arc::new(handler))
    }

    /// Removes a registration. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.set.remove(id)
    }

    /// Invokes every handler in priority order.
    pub fn publish(&self, sender: &str, args: &T) {
        trace!("Invoking event {} from {}", self.set.name, sender);
        for (priority, handler) in self.set.snapshot() {
            let result = invoke_guarded(|| handler(sender, args));
            self.set.record(priority, result);
        }
    }

    /// Number of live registrations.
    pub fn handler_count(&self) -> usize {
        self.set.len()
    }

    /// Removes every registration.
    pub fn clear(&self) {
        self.set.clear();
    }

    /// Snapshot of the bus counters.
    pub fn stats(&self) -> EventBusStats {
        self.set.stats()
    }
}

impl PriorityEvent<()> {
    /// Publishes a payload-less event.
    pub fn notify(&self, sender: &str) {
        self.publish(sender, &());
    }
}

impl<T> fmt::Debug for PriorityEvent<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PriorityEvent")
            .field("name", &self.set.name)
            .field("handlers", &self.set.len())
            .finish()
    }
}

// ============================================================================
// Cancelable Events
// ============================================================================

/// Event arguments that carry a cooperative cancellation flag.
pub trait Cancelable {
    /// Whether a handler has canceled the event.
    fn is_canceled(&self) -> bool;

    /// Sets or clears the cancellation flag.
    fn set_canceled(&mut self, canceled: bool);

    /// Convenience for `set_canceled(true)`.
    fn cancel(&mut self) {
        self.set_canceled(true);
    }
}

/// Handler signature for [`CancelablePriorityEvent`]: `(sender, args)`.
pub type CancelableCallback<T> = dyn Fn(&str, &mut T) -> Result<(), EventError> + Send + Sync;

/// A named event whose handlers can cancel further dispatch.
///
/// Non-monitor handlers run in priority order until one of them cancels the
/// arguments. Monitor handlers then always run, in registration order, and
/// any attempt they make to change the flag is reverted.
pub struct CancelablePriorityEvent<T: Cancelable> {
    set: HandlerSet<CancelableCallback<T>>,
}

impl<T: Cancelable> CancelablePriorityEvent<T> {
    /// Creates an empty event. The name only appears in logs.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            set: HandlerSet::new(name.into()),
        }
    }

    /// The event name.
    pub fn name(&self) -> &str {
        &self.set.name
    }

    /// Registers a handler at [`EventPriority::Normal`].
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&str, &mut T) -> Result<(), EventError> + Send + Sync + 'static,
    {
        self.subscribe_at(EventPriority::Normal, handler)
    }

    /// Registers a handler at an explicit priority.
    pub fn subscribe_at<F>(&self, priority: EventPriority, handler: F) -> SubscriptionId
    where
        F: Fn(&str, &mut T) -> Result<(), EventError> + Send + Sync + 'static,
    {
        self.set.insert(priority, Arc::new(handler))
    }

    /// Registers an observe-only handler at [`EventPriority::Monitor`].
    pub fn monitor<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&str, &T) -> Result<(), EventError> + Send + Sync + 'static,
    {
        self.subscribe_at(EventPriority::Monitor, move |sender, args: &mut T| {
            handler(sender, args)
        })
    }

    /// Removes a registration. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.set.remove(id)
    }

    /// Dispatches the event.
    ///
    /// Returns true if the event was *not* canceled, i.e. the publisher should
    /// go ahead with whatever the event announced.
    pub fn publish(&self, sender: &str, args: &mut T) -> bool {
        trace!("Invoking cancelable event {} from {}", self.set.name, sender);
        let (monitors, handlers): (Vec<_>, Vec<_>) = self
            .set
            .snapshot()
            .into_iter()
            .partition(|(priority, _)| priority.is_monitor());

        for (priority, handler) in handlers {
            if args.is_canceled() {
                break;
            }
            let result = invoke_guarded(|| handler(sender, &mut *args));
            self.set.record(priority, result);
        }

        let canceled = args.is_canceled();
        for (priority, monitor) in monitors {
            let result = invoke_guarded(|| monitor(sender, &mut *args));
            if args.is_canceled() != canceled {
                warn!(
                    "Monitor handler on {} tried to change cancellation state; reverted",
                    self.set.name
                );
                args.set_canceled(canceled);
            }
            self.set.record(priority, result);
        }

        !canceled
    }

    /// Number of live registrations, monitors included.
    pub fn handler_count(&self) -> usize {
        self.set.len()
    }

    /// Removes every registration.
    pub fn clear(&self) {
        self.set.clear();
    }

    /// Snapshot of the bus counters.
    pub fn stats(&self) -> EventBusStats {
        self.set.stats()
    }
}

impl<T: Cancelable> fmt::Debug for CancelablePriorityEvent<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelablePriorityEvent")
            .field("name", &self.set.name)
            .field("handlers", &self.set.len())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

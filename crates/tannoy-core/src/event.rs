//! Event observation utilities.
//!
//! Small multi-producer, single-consumer helpers used by services that
//! consume directory traffic on their own task: an [`Observer`] buffers
//! events in a bounded queue (dropping on overflow rather than blocking
//! the producer), an [`Event`] fans a trigger out to any number of
//! subscribed observers, and a [`Watcher`] runs a periodic check.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Producer-side handle of an [`Observer`]. Cheap to clone; delivery never
/// blocks.
pub struct ObserverHandle<T> {
    tx: mpsc::Sender<T>,
}

impl<T> Clone for ObserverHandle<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> ObserverHandle<T> {
    /// Queues an event for the observer. If the queue is full the event is
    /// dropped; producers are never blocked by a slow consumer.
    pub fn event(&self, event: T) {
        let _ = self.tx.try_send(event);
    }
}

/// Consumes asynchronous events in the order they were triggered.
///
/// Events are queued until the observing task polls for them, up to the
/// queue capacity; beyond that, new events are dropped until the consumer
/// catches up.
pub struct Observer<T> {
    tx: mpsc::Sender<T>,
    rx: mpsc::Receiver<T>,
}

impl<T> Default for Observer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Observer<T> {
    /// Creates an observer with the default queue capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    /// Creates an observer buffering at most `capacity` pending events.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self { tx, rx }
    }

    /// A producer-side handle for delivering events to this observer.
    pub fn handle(&self) -> ObserverHandle<T> {
        ObserverHandle {
            tx: self.tx.clone(),
        }
    }

    /// Number of queued, unprocessed events.
    pub fn num_pending(&self) -> usize {
        self.rx.len()
    }

    /// Drops all queued events.
    pub fn clear(&mut self) {
        while self.rx.try_recv().is_ok() {}
    }

    /// Returns the next event, waiting up to `timeout` for one to arrive.
    /// A zero timeout polls without waiting. `None` on timeout; the caller
    /// may simply poll again.
    pub async fn poll(&mut self, timeout: Duration) -> Option<T> {
        if timeout.is_zero() {
            return self.rx.try_recv().ok();
        }
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(event) => event,
            Err(_) => None,
        }
    }
}

/// An event source observed by any number of [`Observer`]s.
///
/// Triggering never blocks the producer; each subscribed observer receives
/// the event subject to its own queue capacity.
pub struct Event<T: Clone> {
    observers: Mutex<Vec<ObserverHandle<T>>>,
}

impl<T: Clone> Default for Event<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Event<T> {
    pub fn new() -> Self {
        Self {
            observers: Mutex::new(Vec::new()),
        }
    }

    /// Subscribes an observer to this event.
    pub fn subscribe(&self, observer: &Observer<T>) {
        self.attach(observer.handle());
    }

    /// Unsubscribes a previously subscribed observer.
    pub fn unsubscribe(&self, observer: &Observer<T>) {
        self.detach(&observer.handle());
    }

    fn attach(&self, handle: ObserverHandle<T>) {
        self.observers.lock().push(handle);
    }

    fn detach(&self, handle: &ObserverHandle<T>) {
        self.observers
            .lock()
            .retain(|subscribed| !subscribed.tx.same_channel(&handle.tx));
    }

    /// Delivers `event` to every subscribed observer.
    pub fn trigger(&self, event: T) {
        let observers = self.observers.lock();
        for observer in observers.iter() {
            observer.event(event.clone());
        }
    }
}

/// Processes subscribed events on its own task, in trigger order.
///
/// A processor owns an observer and drains it on a background task,
/// invoking the processing function for each event. Subscribe it to any
/// number of [`Event`] sources. Halting (or dropping) the processor stops
/// the task; queued events are discarded.
pub struct Processor<T> {
    name: String,
    handle: ObserverHandle<T>,
    task: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> Processor<T> {
    /// Spawns a processor named `name` running `process` for each event.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<F>(name: impl Into<String>, mut process: F) -> Self
    where
        F: FnMut(T) + Send + 'static,
    {
        let name = name.into();
        let mut observer = Observer::new();
        let handle = observer.handle();
        tracing::debug!(processor = %name, "starting processor");
        let task = tokio::spawn(async move {
            // The task keeps the observer's own sender alive, so recv only
            // ends when the task is aborted.
            while let Some(event) = observer.rx.recv().await {
                process(event);
            }
        });
        Self {
            name,
            handle,
            task: Some(task),
        }
    }

    /// The processor name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Routes `event`'s triggers into this processor.
    pub fn subscribe(&self, event: &Event<T>)
    where
        T: Clone,
    {
        event.attach(self.handle.clone());
    }

    /// Stops routing `event`'s triggers into this processor.
    pub fn unsubscribe(&self, event: &Event<T>)
    where
        T: Clone,
    {
        event.detach(&self.handle);
    }

    /// Stops the processor. Unprocessed events are dropped.
    pub fn halt(&mut self) {
        if let Some(task) = self.task.take() {
            tracing::debug!(processor = %self.name, "halting processor");
            task.abort();
        }
    }
}

impl<T> Drop for Processor<T> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Runs a periodic check on a background task.
///
/// The check runs `period` after the previous tick finished, not on a
/// fixed schedule. Dropping the watcher or calling [`halt`](Watcher::halt)
/// stops it.
pub struct Watcher {
    name: String,
    period: Arc<Mutex<Duration>>,
    task: Option<JoinHandle<()>>,
}

impl Watcher {
    /// Spawns a watcher named `name` invoking `watch` every `period`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<F>(name: impl Into<String>, period: Duration, mut watch: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let name = name.into();
        let period = Arc::new(Mutex::new(period));
        let current = period.clone();
        tracing::debug!(watcher = %name, "starting watcher");
        let task = tokio::spawn(async move {
            loop {
                let sleep_for = *current.lock();
                tokio::time::sleep(sleep_for).await;
                watch();
            }
        });
        Self {
            name,
            period,
            task: Some(task),
        }
    }

    /// The watcher name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The current watch period.
    pub fn period(&self) -> Duration {
        *self.period.lock()
    }

    /// Changes the watch period, effective from the next tick.
    pub fn reschedule(&self, period: Duration) {
        *self.period.lock() = period;
    }

    /// Stops the watcher. The current tick, if running, is aborted.
    pub fn halt(&mut self) {
        if let Some(task) = self.task.take() {
            tracing::debug!(watcher = %self.name, "halting watcher");
            task.abort();
        }
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.halt();
    }
}

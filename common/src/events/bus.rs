// In-process event bus
//
// Publishers push onto a broadcast channel; a single consumer task started by
// the lifecycle fans each event out to the handlers subscribed for its type.
// Every handler invocation runs as its own task on the worker pool, so a slow
// or failing handler never stalls delivery of other events.

use crate::errors::EventBusError;
use crate::events::event::{Event, EventType};
use crate::lifecycle::Subsystem;
use crate::worker_pool::WorkerPool;
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// Default ring buffer size of the broadcast channel
pub const DEFAULT_CAPACITY: usize = 1024;

/// Async callback invoked for each delivered event
pub type EventHandler = Arc<dyn Fn(Event) -> BoxFuture<'static, ()> + Send + Sync>;

struct BusShared {
    handlers: RwLock<HashMap<EventType, Vec<EventHandler>>>,
    workers: Arc<WorkerPool>,
    shutdown_flag: AtomicBool,
    shutdown_notify: Notify,
}

impl BusShared {
    fn deliver(&self, event: Event) {
        let handlers = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event.event_type)
            .cloned()
            .unwrap_or_default();

        if handlers.is_empty() {
            debug!(event_type = %event.event_type, "No handlers subscribed, event ignored");
            return;
        }

        for handler in handlers {
            let task_name = format!("event:{}", event.event_type);
            if let Err(e) = self.workers.spawn(&task_name, handler(event.clone())) {
                warn!(event_id = %event.id, error = %e, "Event handler could not be scheduled");
            }
        }
    }
}

pub struct EventBus {
    tx: broadcast::Sender<Event>,
    idle_rx: Mutex<Option<broadcast::Receiver<Event>>>,
    shared: Arc<BusShared>,
    consumer: Mutex<Option<JoinHandle<()>>>,
    running: AtomicBool,
}

impl EventBus {
    /// Create a bus; events published before `start` are buffered up to `capacity`.
    pub fn new(capacity: usize, workers: Arc<WorkerPool>) -> Self {
        let (tx, rx) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            idle_rx: Mutex::new(Some(rx)),
            shared: Arc::new(BusShared {
                handlers: RwLock::new(HashMap::new()),
                workers,
                shutdown_flag: AtomicBool::new(false),
                shutdown_notify: Notify::new(),
            }),
            consumer: Mutex::new(None),
            running: AtomicBool::new(false),
        }
    }

    fn consumer(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.consumer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register an async handler for one event type
    pub fn subscribe<F, Fut>(&self, event_type: EventType, handler: F)
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: EventHandler = Arc::new(move |event| handler(event).boxed());
        self.shared
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(event_type)
            .or_default()
            .push(handler);
        debug!(event_type = %event_type, "Event handler subscribed");
    }

    /// Publish an event to the consumer.
    ///
    /// Before the first `start_consumer` events are buffered, up to the channel
    /// capacity. Once a consumer has been stopped, events are dropped with a warning.
    pub fn publish(&self, event_type: EventType, data: serde_json::Value) {
        let event = Event::new(event_type, data);
        let event_id = event.id;
        match self.tx.send(event) {
            Ok(_) => debug!(event_id = %event_id, event_type = %event_type, "Event published"),
            Err(_) => warn!(
                event_id = %event_id,
                event_type = %event_type,
                "Event bus is not consuming, event dropped"
            ),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start the consumer task
    #[instrument(skip(self))]
    pub fn start_consumer(&self) -> Result<(), EventBusError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(EventBusError::AlreadyRunning);
        }

        let rx = self
            .idle_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .unwrap_or_else(|| self.tx.subscribe());

        self.shared.shutdown_flag.store(false, Ordering::SeqCst);
        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(consume(shared, rx));
        *self.consumer() = Some(handle);

        info!("Event bus consumer started");
        Ok(())
    }

    /// Stop the consumer task and wait for it to exit
    #[instrument(skip(self))]
    pub async fn stop_consumer(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            debug!("Event bus consumer is not running");
            return;
        }

        info!("Requesting event bus consumer shutdown");
        self.shared.shutdown_flag.store(true, Ordering::SeqCst);
        self.shared.shutdown_notify.notify_waiters();

        let handle = self.consumer().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Event bus consumer task failed");
            }
        }
        info!("Event bus consumer stopped");
    }
}

async fn consume(shared: Arc<BusShared>, mut rx: broadcast::Receiver<Event>) {
    loop {
        if shared.shutdown_flag.load(Ordering::SeqCst) {
            break;
        }

        tokio::select! {
            received = rx.recv() => {
                match received {
                    Ok(event) => shared.deliver(event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Event bus consumer lagged, events skipped");
                    }
                    Err(RecvError::Closed) => {
                        warn!("Event channel closed unexpectedly");
                        break;
                    }
                }
            }
            _ = shared.shutdown_notify.notified() => {
                break;
            }
            // Periodic wake-up to re-check the shutdown flag
            _ = tokio::time::sleep(Duration::from_secs(1)) => continue,
        }
    }
}

#[async_trait]
impl Subsystem for EventBus {
    async fn start(&self) -> anyhow::Result<()> {
        self.start_consumer()?;
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.stop_consumer().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn bus() -> EventBus {
        EventBus::new(16, Arc::new(WorkerPool::new(Duration::from_secs(1))))
    }

    #[tokio::test]
    async fn test_subscribed_handler_receives_event() {
        let bus = bus();
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.subscribe(EventType::PluginAction, move |event| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(event.data);
            }
        });

        bus.start_consumer().unwrap();
        bus.publish(EventType::PluginAction, json!({"action": "refresh"}));

        let data = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(data["action"], "refresh");
        bus.stop_consumer().await;
    }

    #[tokio::test]
    async fn test_events_published_before_start_are_buffered() {
        let bus = bus();
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.subscribe(EventType::NoticeMessage, move |event| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(event.event_type);
            }
        });

        bus.publish(EventType::NoticeMessage, json!({}));
        bus.start_consumer().unwrap();

        let received = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap();
        assert_eq!(received, Some(EventType::NoticeMessage));
        bus.stop_consumer().await;
    }

    #[tokio::test]
    async fn test_other_event_types_are_not_delivered() {
        let bus = bus();
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        bus.subscribe(EventType::CommandExecute, move |_| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(());
            }
        });

        bus.start_consumer().unwrap();
        bus.publish(EventType::PluginReload, json!({}));

        let received = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(received.is_err());
        bus.stop_consumer().await;
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let bus = bus();
        bus.start_consumer().unwrap();
        assert!(matches!(
            bus.start_consumer(),
            Err(EventBusError::AlreadyRunning)
        ));
        bus.stop_consumer().await;
        assert!(!bus.is_running());
    }

    #[tokio::test]
    async fn test_events_published_after_stop_are_dropped() {
        let bus = bus();
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        bus.subscribe(EventType::PluginAction, move |_| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(());
            }
        });
        bus.start_consumer().unwrap();
        bus.stop_consumer().await;

        bus.publish(EventType::PluginAction, json!({}));
        bus.start_consumer().unwrap();

        let received = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(received.is_err());
        bus.stop_consumer().await;
    }

    #[tokio::test]
    async fn test_consumer_can_restart_after_stop() {
        let bus = bus();
        bus.start_consumer().unwrap();
        bus.stop_consumer().await;

        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        bus.subscribe(EventType::PluginAction, move |_| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(());
            }
        });
        bus.start_consumer().unwrap();
        bus.publish(EventType::PluginAction, json!({}));

        assert!(tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .is_some());
        bus.stop_consumer().await;
    }
}

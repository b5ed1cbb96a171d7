//! Message bus - in-process pub/sub between channel adapters and the agent.
//!
//! ```text
//! adapter ──send──▶ [inbound queue] ──dispatch──▶ handlers(channel) + handlers("all")
//! agent ──publish─▶ [outbound queue] ─dispatch──▶ handlers(channel) + handlers("all")
//! ```
//!
//! Both queues are bounded. `send`/`publish` never wait: a full queue is
//! reported as `false` and the caller decides whether to retry or drop. The
//! `*_blocking` variants wait for room until the caller's token is cancelled.
//!
//! Every handler invocation runs as its own tracked task, so a slow or failing
//! handler never holds up other handlers or later messages, and [`MessageBus::stop`]
//! can wait for all of them.

pub mod message;
mod registry;

pub use message::{InboundMessage, OutboundMessage};
pub use registry::HandlerRegistry;

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use futures_util::FutureExt;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::error::Error;
use crate::Result;

/// Default capacity of each queue
pub const DEFAULT_QUEUE_SIZE: usize = 1000;

/// Well-known topics
pub mod topics {
    /// Wildcard: receives every message regardless of channel
    pub const ALL: &str = "all";
    pub const AGENT: &str = "agent";
    pub const COMMANDS: &str = "commands";
    pub const TELEGRAM: &str = "telegram";
    pub const CLI: &str = "cli";
    pub const OUTBOUND: &str = "outbound";
    /// Scheduled prompts from `HEARTBEAT.md`
    pub const HEARTBEAT: &str = "heartbeat";
}

/// Consumer of inbound messages (usually wraps `Agent::process`).
#[async_trait]
pub trait InboundHandler: Send + Sync {
    async fn handle(&self, msg: InboundMessage) -> Result<()>;
}

/// Consumer of outbound messages (usually a channel adapter).
#[async_trait]
pub trait OutboundHandler: Send + Sync {
    async fn deliver(&self, msg: OutboundMessage) -> Result<()>;
}

#[async_trait]
impl<F, Fut> InboundHandler for F
where
    F: Fn(InboundMessage) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn handle(&self, msg: InboundMessage) -> Result<()> {
        self(msg).await
    }
}

#[async_trait]
impl<F, Fut> OutboundHandler for F
where
    F: Fn(OutboundMessage) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn deliver(&self, msg: OutboundMessage) -> Result<()> {
        self(msg).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Inbound,
    Outbound,
}

/// Handle returned by `subscribe*`, consumed by [`MessageBus::unsubscribe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    id: u64,
    topic: String,
    direction: Direction,
}

struct Queues {
    inbound_tx: mpsc::Sender<InboundMessage>,
    outbound_tx: mpsc::Sender<OutboundMessage>,
    /// Held here while stopped; moved into the dispatch loops while running.
    inbound_rx: Option<mpsc::Receiver<InboundMessage>>,
    outbound_rx: Option<mpsc::Receiver<OutboundMessage>>,
}

impl Queues {
    fn new(capacity: usize) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity);
        Self {
            inbound_tx,
            outbound_tx,
            inbound_rx: Some(inbound_rx),
            outbound_rx: Some(outbound_rx),
        }
    }
}

struct DispatchLoop {
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Lifecycle {
    inbound: Option<DispatchLoop>,
    outbound: Option<DispatchLoop>,
}

struct Inner {
    capacity: usize,
    inbound_handlers: HandlerRegistry<dyn InboundHandler>,
    outbound_handlers: HandlerRegistry<dyn OutboundHandler>,
    queues: RwLock<Queues>,
    lifecycle: Mutex<Lifecycle>,
    running: AtomicBool,
    tasks: TaskTracker,
}

impl Inner {
    fn queues(&self) -> RwLockReadGuard<'_, Queues> {
        self.queues.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn queues_mut(&self) -> RwLockWriteGuard<'_, Queues> {
        self.queues.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn dispatch_inbound(&self, msg: InboundMessage) {
        let handlers = self.inbound_handlers.matching(&msg.channel);
        if handlers.is_empty() {
            debug!(channel = %msg.channel, "No inbound handlers, dropping message");
            return;
        }

        for handler in handlers {
            let msg = msg.clone();
            let channel = msg.channel.clone();
            self.tasks
                .spawn(isolated("inbound", channel, async move { handler.handle(msg).await }));
        }
    }

    fn dispatch_outbound(&self, msg: OutboundMessage) {
        let handlers = self.outbound_handlers.matching(&msg.channel);
        if handlers.is_empty() {
            debug!(channel = %msg.channel, "No outbound handlers, dropping message");
            return;
        }

        for handler in handlers {
            let msg = msg.clone();
            let channel = msg.channel.clone();
            self.tasks
                .spawn(isolated("outbound", channel, async move { handler.deliver(msg).await }));
        }
    }
}

/// Run one handler invocation, containing its error or panic.
async fn isolated<Fut>(direction: &'static str, channel: String, invocation: Fut)
where
    Fut: Future<Output = Result<()>>,
{
    match AssertUnwindSafe(invocation).catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(direction, channel = %channel, error = %e, "Handler failed"),
        Err(_) => error!(direction, channel = %channel, "Handler panicked"),
    }
}

/// Pull messages until shutdown, then hand off whatever is buffered exactly once.
async fn dispatch_loop<M, F>(
    direction: &'static str,
    mut rx: mpsc::Receiver<M>,
    shutdown: CancellationToken,
    dispatch: F,
) where
    F: Fn(M),
{
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            received = rx.recv() => match received {
                Some(msg) => dispatch(msg),
                None => return,
            },
        }
    }

    // Closing first makes late senders see `Closed` instead of queueing into a
    // receiver that is about to be dropped.
    rx.close();
    let mut drained = 0usize;
    while let Ok(msg) = rx.try_recv() {
        dispatch(msg);
        drained += 1;
    }
    debug!(direction, drained, "Dispatch loop stopped");
}

/// The central message bus. Cloning shares the same queues and handlers.
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<Inner>,
}

impl MessageBus {
    /// Create a bus whose inbound and outbound queues each hold `capacity` messages.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(Inner {
                capacity,
                inbound_handlers: HandlerRegistry::new(),
                outbound_handlers: HandlerRegistry::new(),
                queues: RwLock::new(Queues::new(capacity)),
                lifecycle: Mutex::new(Lifecycle::default()),
                running: AtomicBool::new(false),
                tasks: TaskTracker::new(),
            }),
        }
    }

    /// Launch the inbound and outbound dispatch loops. No-op if already running.
    pub async fn start(&self) {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        if lifecycle.inbound.is_some() {
            debug!("Message bus already running");
            return;
        }

        let (inbound_rx, outbound_rx) = {
            let mut queues = self.inner.queues_mut();
            if queues.inbound_rx.is_none() || queues.outbound_rx.is_none() {
                *queues = Queues::new(self.inner.capacity);
            }
            (queues.inbound_rx.take(), queues.outbound_rx.take())
        };
        let (Some(inbound_rx), Some(outbound_rx)) = (inbound_rx, outbound_rx) else {
            return;
        };

        let inbound_shutdown = CancellationToken::new();
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(dispatch_loop(
            "inbound",
            inbound_rx,
            inbound_shutdown.clone(),
            move |msg| inner.dispatch_inbound(msg),
        ));
        lifecycle.inbound = Some(DispatchLoop {
            shutdown: inbound_shutdown,
            handle,
        });

        let outbound_shutdown = CancellationToken::new();
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(dispatch_loop(
            "outbound",
            outbound_rx,
            outbound_shutdown.clone(),
            move |msg| inner.dispatch_outbound(msg),
        ));
        lifecycle.outbound = Some(DispatchLoop {
            shutdown: outbound_shutdown,
            handle,
        });

        self.inner.running.store(true, Ordering::SeqCst);
        info!(capacity = self.inner.capacity, "Message bus started");
    }

    /// Stop dispatching. No-op if not running.
    ///
    /// The inbound loop delivers what is already buffered, then every handler
    /// task is awaited (so replies they publish still go out), then the
    /// outbound loop drains the same way. Queues are recreated afterwards so
    /// the bus can be started again.
    pub async fn stop(&self) {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        let Some(inbound) = lifecycle.inbound.take() else {
            return;
        };

        inbound.shutdown.cancel();
        if let Err(e) = inbound.handle.await {
            error!(error = %e, "Inbound dispatch loop aborted");
        }

        self.inner.tasks.close();
        self.inner.tasks.wait().await;

        if let Some(outbound) = lifecycle.outbound.take() {
            outbound.shutdown.cancel();
            if let Err(e) = outbound.handle.await {
                error!(error = %e, "Outbound dispatch loop aborted");
            }
        }

        self.inner.tasks.wait().await;
        self.inner.tasks.reopen();

        *self.inner.queues_mut() = Queues::new(self.inner.capacity);
        self.inner.running.store(false, Ordering::SeqCst);
        info!("Message bus stopped");
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Register an inbound handler for a topic (a channel name or [`topics::ALL`]).
    pub fn subscribe<H>(&self, topic: &str, handler: H) -> Subscription
    where
        H: InboundHandler + 'static,
    {
        let id = self.inner.inbound_handlers.subscribe(topic, Arc::new(handler));
        debug!(topic, id, "Inbound handler subscribed");
        Subscription {
            id,
            topic: topic.to_string(),
            direction: Direction::Inbound,
        }
    }

    /// Register an outbound handler for a topic (a channel name or [`topics::ALL`]).
    pub fn subscribe_outbound<H>(&self, topic: &str, handler: H) -> Subscription
    where
        H: OutboundHandler + 'static,
    {
        let id = self.inner.outbound_handlers.subscribe(topic, Arc::new(handler));
        debug!(topic, id, "Outbound handler subscribed");
        Subscription {
            id,
            topic: topic.to_string(),
            direction: Direction::Outbound,
        }
    }

    /// Remove a handler. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        match subscription.direction {
            Direction::Inbound => self
                .inner
                .inbound_handlers
                .unsubscribe(&subscription.topic, subscription.id),
            Direction::Outbound => self
                .inner
                .outbound_handlers
                .unsubscribe(&subscription.topic, subscription.id),
        }
    }

    /// Enqueue an inbound message without waiting. `false` means the queue is full.
    pub fn send(&self, msg: InboundMessage) -> bool {
        match self.inner.queues().inbound_tx.try_send(msg) {
            Ok(()) => true,
            Err(TrySendError::Full(msg)) => {
                debug!(channel = %msg.channel, "Inbound queue full");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Enqueue an inbound message, waiting for room until `cancel` fires.
    pub async fn send_blocking(&self, cancel: &CancellationToken, msg: InboundMessage) -> Result<()> {
        let tx = self.inner.queues().inbound_tx.clone();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            sent = tx.send(msg) => sent.map_err(|_| Error::BusClosed),
        }
    }

    /// Enqueue an outbound message without waiting. `false` means the queue is full.
    pub fn publish(&self, msg: OutboundMessage) -> bool {
        match self.inner.queues().outbound_tx.try_send(msg) {
            Ok(()) => true,
            Err(TrySendError::Full(msg)) => {
                debug!(channel = %msg.channel, "Outbound queue full");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Enqueue an outbound message, waiting for room until `cancel` fires.
    pub async fn publish_blocking(&self, cancel: &CancellationToken, msg: OutboundMessage) -> Result<()> {
        let tx = self.inner.queues().outbound_tx.clone();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            sent = tx.send(msg) => sent.map_err(|_| Error::BusClosed),
        }
    }

    /// Messages currently buffered as `(inbound, outbound)`.
    pub fn queue_lengths(&self) -> (usize, usize) {
        let queues = self.inner.queues();
        (
            queues.inbound_tx.max_capacity() - queues.inbound_tx.capacity(),
            queues.outbound_tx.max_capacity() - queues.outbound_tx.capacity(),
        )
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn counter_handler(counter: Arc<AtomicUsize>) -> impl InboundHandler {
        move |_msg: InboundMessage| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<(), Error>(())
            }
        }
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let bus = MessageBus::new(10);
        assert!(!bus.is_running());

        bus.start().await;
        bus.start().await;
        assert!(bus.is_running());

        bus.stop().await;
        assert!(!bus.is_running());
        bus.stop().await;
        assert!(!bus.is_running());
    }

    #[tokio::test]
    async fn test_send_on_full_queue_returns_false() {
        let bus = MessageBus::new(2);

        assert!(bus.send(InboundMessage::new("cli", "u", "1")));
        assert!(bus.send(InboundMessage::new("cli", "u", "2")));
        assert!(!bus.send(InboundMessage::new("cli", "u", "3")));
        assert_eq!(bus.queue_lengths(), (2, 0));
    }

    #[tokio::test]
    async fn test_publish_on_full_queue_returns_false() {
        let bus = MessageBus::new(1);

        assert!(bus.publish(OutboundMessage::new("cli", "u", "1")));
        assert!(!bus.publish(OutboundMessage::new("cli", "u", "2")));
        assert_eq!(bus.queue_lengths(), (0, 1));
    }

    #[tokio::test]
    async fn test_send_blocking_cancelled_returns_immediately() {
        let bus = MessageBus::new(1);
        assert!(bus.send(InboundMessage::new("cli", "u", "fill")));

        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = tokio::time::timeout(
            Duration::from_secs(1),
            bus.send_blocking(&cancel, InboundMessage::new("cli", "u", "late")),
        )
        .await
        .expect("send_blocking must not hang");
        assert!(matches!(result, Err(Error::Cancelled)));

        let result = bus
            .publish_blocking(&cancel, OutboundMessage::new("cli", "u", "late"))
            .await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_send_blocking_waits_for_room() {
        let bus = MessageBus::new(1);
        let counter = Arc::new(AtomicUsize::new(0));
        bus.subscribe("cli", counter_handler(Arc::clone(&counter)));
        assert!(bus.send(InboundMessage::new("cli", "u", "first")));

        let sender = bus.clone();
        let pending = tokio::spawn(async move {
            sender
                .send_blocking(&CancellationToken::new(), InboundMessage::new("cli", "u", "second"))
                .await
        });

        bus.start().await;
        pending.await.unwrap().unwrap();
        bus.stop().await;

        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_sends_delivered_exactly_once() {
        const N: usize = 50;
        let bus = MessageBus::new(N);
        let on_channel = Arc::new(AtomicUsize::new(0));
        let on_all = Arc::new(AtomicUsize::new(0));
        let on_other = Arc::new(AtomicUsize::new(0));

        bus.subscribe("telegram", counter_handler(Arc::clone(&on_channel)));
        bus.subscribe(topics::ALL, counter_handler(Arc::clone(&on_all)));
        bus.subscribe("cli", counter_handler(Arc::clone(&on_other)));
        bus.start().await;

        let mut senders = Vec::new();
        for i in 0..N {
            let bus = bus.clone();
            senders.push(tokio::spawn(async move {
                bus.send(InboundMessage::new("telegram", &format!("user{i}"), "hi"))
            }));
        }
        for sender in senders {
            assert!(sender.await.unwrap());
        }

        bus.stop().await;

        assert_eq!(on_channel.load(Ordering::SeqCst), N);
        assert_eq!(on_all.load(Ordering::SeqCst), N);
        assert_eq!(on_other.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_all_topic_message_delivered_once() {
        let bus = MessageBus::new(10);
        let counter = Arc::new(AtomicUsize::new(0));
        bus.subscribe(topics::ALL, counter_handler(Arc::clone(&counter)));

        bus.start().await;
        assert!(bus.send(InboundMessage::new(topics::ALL, "u", "broadcast")));
        bus.stop().await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let bus = MessageBus::new(10);
        let counter = Arc::new(AtomicUsize::new(0));
        let subscription = bus.subscribe("cli", counter_handler(Arc::clone(&counter)));

        assert!(bus.unsubscribe(&subscription));
        assert!(!bus.unsubscribe(&subscription));

        bus.start().await;
        assert!(bus.send(InboundMessage::new("cli", "u", "ignored")));
        bus.stop().await;

        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failing_handlers_are_isolated() {
        let bus = MessageBus::new(10);
        let counter = Arc::new(AtomicUsize::new(0));

        bus.subscribe("cli", |_msg: InboundMessage| async move {
            Err::<(), Error>(Error::Other("handler error".into()))
        });
        bus.subscribe("cli", |msg: InboundMessage| async move {
            if msg.content == "boom" {
                panic!("handler panic");
            }
            Ok::<(), Error>(())
        });
        bus.subscribe("cli", counter_handler(Arc::clone(&counter)));

        bus.start().await;
        assert!(bus.send(InboundMessage::new("cli", "u", "boom")));
        assert!(bus.send(InboundMessage::new("cli", "u", "after")));
        bus.stop().await;

        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_slow_handler_does_not_block_others() {
        let bus = MessageBus::new(10);
        let counter = Arc::new(AtomicUsize::new(0));

        bus.subscribe("cli", |_msg: InboundMessage| async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            Ok::<(), Error>(())
        });
        bus.subscribe("cli", counter_handler(Arc::clone(&counter)));

        bus.start().await;
        assert!(bus.send(InboundMessage::new("cli", "u", "one")));
        assert!(bus.send(InboundMessage::new("cli", "u", "two")));

        tokio::time::timeout(Duration::from_millis(250), async {
            while counter.load(Ordering::SeqCst) < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("fast handler should not wait for the slow one");

        bus.stop().await;
    }

    #[tokio::test]
    async fn test_buffered_messages_delivered_after_start() {
        let bus = MessageBus::new(10);
        let counter = Arc::new(AtomicUsize::new(0));
        bus.subscribe("cli", counter_handler(Arc::clone(&counter)));

        for i in 0..3 {
            assert!(bus.send(InboundMessage::new("cli", "u", &i.to_string())));
        }
        bus.start().await;
        bus.stop().await;

        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(bus.queue_lengths(), (0, 0));
    }

    #[tokio::test]
    async fn test_stopped_loop_drains_then_refuses_late_sends() {
        let (tx, rx) = mpsc::channel(8);
        for i in 0..3 {
            tx.try_send(i).unwrap();
        }

        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        dispatch_loop("inbound", rx, shutdown, move |n: i32| sink.lock().unwrap().push(n)).await;

        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
        assert!(matches!(tx.try_send(3), Err(TrySendError::Closed(3))));
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let bus = MessageBus::new(10);
        let counter = Arc::new(AtomicUsize::new(0));
        bus.subscribe("cli", counter_handler(Arc::clone(&counter)));

        bus.start().await;
        assert!(bus.send(InboundMessage::new("cli", "u", "first run")));
        bus.stop().await;

        bus.start().await;
        assert!(bus.is_running());
        assert!(bus.send(InboundMessage::new("cli", "u", "second run")));
        bus.stop().await;

        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_reply_published_from_inbound_handler_is_delivered() {
        let bus = MessageBus::new(10);
        let delivered = Arc::new(std::sync::Mutex::new(Vec::new()));

        let replier = bus.clone();
        bus.subscribe(topics::ALL, move |msg: InboundMessage| {
            let replier = replier.clone();
            async move {
                let reply = OutboundMessage::reply_to(&msg, &format!("echo: {}", msg.content));
                replier.publish(reply);
                Ok::<(), Error>(())
            }
        });

        let sink = Arc::clone(&delivered);
        bus.subscribe_outbound("cli", move |msg: OutboundMessage| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().unwrap().push(msg.content);
                Ok::<(), Error>(())
            }
        });

        bus.start().await;
        assert!(bus.send(InboundMessage::new("cli", "u", "hello")));
        bus.stop().await;

        assert_eq!(*delivered.lock().unwrap(), vec!["echo: hello".to_string()]);
    }
}

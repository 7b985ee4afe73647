//! The poll-dispatch-reply cycle for one listener.
//!
//! An `Executor` owns a listener and a callback. Once started it polls the
//! listener on a background task and hands every message to the callback:
//!
//! - `Ok(Some(result))`: the result is sent back with `reply()`
//! - `Ok(None)`: nothing is sent back
//! - `Err(HandlerError::Requeue)`: the message is put back with `requeue()`
//! - `Err(HandlerError::Failed(_))`: the failure is logged and sent back
//!
//! `done()` is called on every message whatever the outcome.
//!
//! Dispatch concurrency is bounded by a semaphore acquired *before* each
//! poll: `Blocking` holds one permit, so the next message is not taken off
//! the listener until the current one is finished; `Pooled` holds
//! `max_in_flight` permits. Callback panics are contained in the dispatch
//! task and logged.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use courier_types::{MessagingConfig, RequestContext};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::driver::{IncomingMessage, Listener};
use crate::remote::Failure;

/// Pause after a failed poll before trying again.
const POLL_ERROR_BACKOFF: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// Callback contract
// ---------------------------------------------------------------------------

/// Outcome of a callback other than a result.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Put the message back for redelivery instead of answering it.
    #[error("message requeue requested")]
    Requeue,

    #[error("{0}")]
    Failed(Failure),
}

impl HandlerError {
    /// Capture `err` as a dispatch failure.
    pub fn failed<E: std::error::Error + 'static>(err: &E) -> Self {
        HandlerError::Failed(Failure::from_error(err))
    }
}

impl From<Failure> for HandlerError {
    fn from(failure: Failure) -> Self {
        HandlerError::Failed(failure)
    }
}

/// Application side of an executor.
pub trait MessageCallback: Send + Sync + 'static {
    fn call(
        &self,
        ctxt: &RequestContext,
        message: &Map<String, Value>,
    ) -> impl Future<Output = Result<Option<Value>, HandlerError>> + Send;
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// Dispatch model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorKind {
    /// One message at a time, in poll order.
    Blocking,
    /// Up to `max_in_flight` messages dispatched concurrently.
    Pooled { max_in_flight: usize },
}

impl ExecutorKind {
    /// `Pooled`, bounded by `executor_pool_size`.
    pub fn pooled(config: &MessagingConfig) -> Self {
        ExecutorKind::Pooled {
            max_in_flight: config.executor_pool_size,
        }
    }

    fn permits(&self) -> usize {
        match self {
            ExecutorKind::Blocking => 1,
            ExecutorKind::Pooled { max_in_flight } => (*max_in_flight).max(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorState {
    Stopped,
    Running,
    Stopping,
}

type ListenerSlot = Arc<Mutex<Option<Box<dyn Listener>>>>;

/// Runs a poll loop for one listener and one callback.
pub struct Executor<C: MessageCallback> {
    kind: ExecutorKind,
    callback: Arc<C>,
    /// Empty while the poll loop owns the listener.
    listener: ListenerSlot,
    state: Arc<watch::Sender<ExecutorState>>,
    cancel: Mutex<CancellationToken>,
}

impl<C: MessageCallback> Executor<C> {
    pub fn new(kind: ExecutorKind, listener: Box<dyn Listener>, callback: Arc<C>) -> Self {
        let (state, _) = watch::channel(ExecutorState::Stopped);
        Self {
            kind,
            callback,
            listener: Arc::new(Mutex::new(Some(listener))),
            state: Arc::new(state),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn kind(&self) -> ExecutorKind {
        self.kind
    }

    pub fn state(&self) -> ExecutorState {
        *self.state.borrow()
    }

    /// Start polling on a background task. A no-op unless `Stopped`.
    pub fn start(&self) {
        // Held across the transition so a concurrent `stop` sees either the
        // old state or the new token, never a Running state with a stale one.
        let mut cancel = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);

        let started = self.state.send_if_modified(|state| {
            if *state == ExecutorState::Stopped {
                *state = ExecutorState::Running;
                true
            } else {
                false
            }
        });
        if !started {
            debug!("executor already started");
            return;
        }

        let Some(listener) = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            // The slot is refilled before the state returns to Stopped.
            error!("executor listener missing, not starting");
            self.state.send_replace(ExecutorState::Stopped);
            return;
        };

        let token = CancellationToken::new();
        *cancel = token.clone();
        drop(cancel);

        let kind = self.kind;
        let callback = self.callback.clone();
        let slot = self.listener.clone();
        let state = self.state.clone();
        tokio::spawn(async move {
            let listener = poll_loop(kind, listener, callback, token).await;
            *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(listener);
            state.send_replace(ExecutorState::Stopped);
            debug!("executor stopped");
        });
        debug!(?kind, "executor started");
    }

    /// Ask the poll loop to exit. Dispatches already in flight finish first.
    pub fn stop(&self) {
        let cancel = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);
        self.state.send_if_modified(|state| {
            if *state == ExecutorState::Running {
                *state = ExecutorState::Stopping;
                true
            } else {
                false
            }
        });
        cancel.cancel();
    }

    /// Resolve once the executor is `Stopped`.
    pub async fn wait(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|state| *state == ExecutorState::Stopped).await;
    }
}

async fn poll_loop<C: MessageCallback>(
    kind: ExecutorKind,
    mut listener: Box<dyn Listener>,
    callback: Arc<C>,
    token: CancellationToken,
) -> Box<dyn Listener> {
    let permits = Arc::new(Semaphore::new(kind.permits()));
    let mut in_flight = JoinSet::new();

    loop {
        while let Some(finished) = in_flight.try_join_next() {
            log_join(finished);
        }

        let permit = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            permit = permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let polled = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            polled = listener.poll() => polled,
        };

        match polled {
            Ok(incoming) => {
                let callback = callback.clone();
                in_flight.spawn(async move {
                    dispatch(callback.as_ref(), incoming).await;
                    drop(permit);
                });
            }
            Err(err) => {
                drop(permit);
                warn!(error = %err, "failed to poll for messages");
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(POLL_ERROR_BACKOFF) => {}
                }
            }
        }
    }

    while let Some(finished) = in_flight.join_next().await {
        log_join(finished);
    }
    listener
}

fn log_join(result: Result<(), tokio::task::JoinError>) {
    if let Err(err) = result {
        error!(error = %err, "message dispatch task panicked");
    }
}

/// Run the callback for one message and settle it with the transport.
pub async fn dispatch<C: MessageCallback>(callback: &C, incoming: Box<dyn IncomingMessage>) {
    let outcome = callback.call(incoming.ctxt(), incoming.message()).await;

    let settled = match outcome {
        Ok(Some(result)) => incoming.reply(Some(result), None).await,
        Ok(None) => Ok(()),
        Err(HandlerError::Requeue) => {
            debug!("requeueing message");
            incoming.requeue().await
        }
        Err(HandlerError::Failed(failure)) => {
            if failure.expected {
                debug!(class = %failure.class, "expected failure: {}", failure.message);
            } else {
                error!(
                    class = %failure.class,
                    module = %failure.module,
                    trace = ?failure.trace,
                    "failed to process message, skipping it: {}",
                    failure.message
                );
            }
            incoming.reply(None, Some(failure)).await
        }
    };
    if let Err(err) = settled {
        warn!(error = %err, "failed to settle message with the transport");
    }

    incoming.done();
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures_util::future::BoxFuture;
    use serde_json::json;
    use tokio::sync::{Notify, mpsc};

    use crate::driver::DriverError;

    type Log = Arc<Mutex<Vec<String>>>;

    struct RecordingMessage {
        ctxt: RequestContext,
        message: Map<String, Value>,
        log: Log,
    }

    impl RecordingMessage {
        fn boxed(message: Value, log: &Log) -> Box<dyn IncomingMessage> {
            Box::new(Self {
                ctxt: RequestContext::new(),
                message: message.as_object().cloned().unwrap(),
                log: log.clone(),
            })
        }

        fn record(&self, entry: String) {
            self.log.lock().unwrap().push(entry);
        }
    }

    impl IncomingMessage for RecordingMessage {
        fn ctxt(&self) -> &RequestContext {
            &self.ctxt
        }

        fn message(&self) -> &Map<String, Value> {
            &self.message
        }

        fn reply(
            &self,
            reply: Option<Value>,
            failure: Option<Failure>,
        ) -> BoxFuture<'_, Result<(), DriverError>> {
            let entry = match (reply, failure) {
                (_, Some(f)) => format!("reply-failure:{}", f.class),
                (Some(v), None) => format!("reply:{v}"),
                (None, None) => "reply:none".to_string(),
            };
            self.record(entry);
            Box::pin(async { Ok(()) })
        }

        fn requeue(&self) -> BoxFuture<'_, Result<(), DriverError>> {
            self.record("requeue".to_string());
            Box::pin(async { Ok(()) })
        }

        fn done(&self) {
            self.record("done".to_string());
        }
    }

    /// Yields whatever is pushed into the channel; pends forever once empty
    /// and closed.
    struct ChannelListener {
        rx: mpsc::UnboundedReceiver<Box<dyn IncomingMessage>>,
        polls: Arc<AtomicUsize>,
    }

    impl Listener for ChannelListener {
        fn poll(&mut self) -> BoxFuture<'_, Result<Box<dyn IncomingMessage>, DriverError>> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                match self.rx.recv().await {
                    Some(msg) => Ok(msg),
                    None => std::future::pending().await,
                }
            })
        }
    }

    fn listener() -> (
        Box<dyn Listener>,
        mpsc::UnboundedSender<Box<dyn IncomingMessage>>,
        Arc<AtomicUsize>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let polls = Arc::new(AtomicUsize::new(0));
        let listener = ChannelListener {
            rx,
            polls: polls.clone(),
        };
        (Box::new(listener), tx, polls)
    }

    /// Behaviour chosen by the message's "action" field.
    struct ScriptedCallback;

    impl MessageCallback for ScriptedCallback {
        async fn call(
            &self,
            _ctxt: &RequestContext,
            message: &Map<String, Value>,
        ) -> Result<Option<Value>, HandlerError> {
            match message.get("action").and_then(Value::as_str) {
                Some("result") => Ok(Some(json!("result"))),
                Some("requeue") => Err(HandlerError::Requeue),
                Some("fail") => Err(Failure::new("app", "Boom", "it broke").into()),
                Some("expected") => Err(Failure::new("app", "NotFound", "gone").expected().into()),
                _ => Ok(None),
            }
        }
    }

    async fn dispatch_one(action: &str) -> Vec<String> {
        let log = Log::default();
        dispatch(&ScriptedCallback, RecordingMessage::boxed(json!({"action": action}), &log)).await;
        let entries = log.lock().unwrap().clone();
        entries
    }

    #[tokio::test]
    async fn result_is_replied_then_done() {
        assert_eq!(dispatch_one("result").await, vec!["reply:\"result\"", "done"]);
    }

    #[tokio::test]
    async fn no_result_means_no_reply() {
        assert_eq!(dispatch_one("nothing").await, vec!["done"]);
    }

    #[tokio::test]
    async fn requeue_signal_requeues_without_reply() {
        assert_eq!(dispatch_one("requeue").await, vec!["requeue", "done"]);
    }

    #[tokio::test]
    async fn failure_is_replied() {
        assert_eq!(dispatch_one("fail").await, vec!["reply-failure:Boom", "done"]);
        assert_eq!(dispatch_one("expected").await, vec!["reply-failure:NotFound", "done"]);
    }

    /// Blocks inside the callback until released.
    struct GatedCallback {
        entered: Arc<Notify>,
        release: Arc<Notify>,
        finished: Arc<AtomicUsize>,
    }

    impl MessageCallback for GatedCallback {
        async fn call(
            &self,
            _ctxt: &RequestContext,
            _message: &Map<String, Value>,
        ) -> Result<Option<Value>, HandlerError> {
            self.entered.notify_one();
            self.release.notified().await;
            self.finished.fetch_add(1, Ordering::SeqCst);
            Ok(Some(json!("late")))
        }
    }

    #[tokio::test]
    async fn stop_lets_in_flight_dispatch_finish() {
        let (listener, tx, _) = listener();
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let finished = Arc::new(AtomicUsize::new(0));
        let executor = Executor::new(
            ExecutorKind::Blocking,
            listener,
            Arc::new(GatedCallback {
                entered: entered.clone(),
                release: release.clone(),
                finished: finished.clone(),
            }),
        );

        let log = Log::default();
        tx.send(RecordingMessage::boxed(json!({}), &log)).unwrap();
        executor.start();
        entered.notified().await;

        executor.stop();
        assert_eq!(executor.state(), ExecutorState::Stopping);
        release.notify_one();
        executor.wait().await;

        assert_eq!(executor.state(), ExecutorState::Stopped);
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert_eq!(*log.lock().unwrap(), vec!["reply:\"late\"", "done"]);
    }

    #[tokio::test]
    async fn stop_before_any_message_returns() {
        let (listener, _tx, _) = listener();
        let executor = Executor::new(ExecutorKind::Blocking, listener, Arc::new(ScriptedCallback));
        executor.start();
        executor.stop();
        tokio::time::timeout(Duration::from_secs(1), executor.wait())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn double_start_runs_one_loop() {
        let (listener, _tx, polls) = listener();
        let executor = Executor::new(ExecutorKind::Blocking, listener, Arc::new(ScriptedCallback));
        executor.start();
        executor.start();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(polls.load(Ordering::SeqCst), 1);
        executor.stop();
        executor.wait().await;
    }

    #[tokio::test]
    async fn can_restart_after_wait() {
        let (listener, tx, _) = listener();
        let executor = Executor::new(ExecutorKind::Blocking, listener, Arc::new(ScriptedCallback));
        executor.start();
        executor.stop();
        executor.wait().await;

        let log = Log::default();
        tx.send(RecordingMessage::boxed(json!({"action": "result"}), &log)).unwrap();
        executor.start();
        assert_eq!(executor.state(), ExecutorState::Running);
        tokio::time::timeout(Duration::from_secs(1), async {
            while log.lock().unwrap().len() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        executor.stop();
        executor.wait().await;
    }

    /// Tracks how many calls overlap.
    struct OverlapCounter {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    impl MessageCallback for OverlapCounter {
        async fn call(
            &self,
            _ctxt: &RequestContext,
            _message: &Map<String, Value>,
        ) -> Result<Option<Value>, HandlerError> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(None)
        }
    }

    async fn peak_concurrency(kind: ExecutorKind, messages: usize) -> usize {
        let (listener, tx, _) = listener();
        let counter = Arc::new(OverlapCounter {
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let executor = Executor::new(kind, listener, counter.clone());
        let log = Log::default();
        for _ in 0..messages {
            tx.send(RecordingMessage::boxed(json!({}), &log)).unwrap();
        }

        executor.start();
        tokio::time::timeout(Duration::from_secs(5), async {
            while log.lock().unwrap().len() < messages {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        executor.stop();
        executor.wait().await;
        counter.peak.load(Ordering::SeqCst)
    }

    #[tokio::test]
    async fn blocking_dispatches_one_at_a_time() {
        assert_eq!(peak_concurrency(ExecutorKind::Blocking, 4).await, 1);
    }

    #[tokio::test]
    async fn pooled_is_bounded() {
        let peak = peak_concurrency(ExecutorKind::Pooled { max_in_flight: 2 }, 6).await;
        assert_eq!(peak, 2);
    }

    #[test]
    fn pooled_kind_follows_configured_pool_size() {
        let config = MessagingConfig {
            executor_pool_size: 3,
            ..MessagingConfig::default()
        };
        assert_eq!(ExecutorKind::pooled(&config), ExecutorKind::Pooled { max_in_flight: 3 });
        assert_eq!(
            ExecutorKind::pooled(&MessagingConfig::default()),
            ExecutorKind::Pooled { max_in_flight: 64 }
        );
        assert_eq!(ExecutorKind::Pooled { max_in_flight: 0 }.permits(), 1);
    }

    #[tokio::test]
    async fn pooled_from_config_dispatches_concurrently() {
        let config = MessagingConfig {
            executor_pool_size: 3,
            ..MessagingConfig::default()
        };
        assert_eq!(peak_concurrency(ExecutorKind::pooled(&config), 6).await, 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn racing_start_and_stop_never_strands_the_loop() {
        let handle = tokio::runtime::Handle::current();
        for _ in 0..500 {
            let (listener, _tx, _) = listener();
            let executor = Arc::new(Executor::new(
                ExecutorKind::Blocking,
                listener,
                Arc::new(ScriptedCallback),
            ));
            let barrier = Arc::new(std::sync::Barrier::new(2));

            let starter = {
                let executor = executor.clone();
                let barrier = barrier.clone();
                let handle = handle.clone();
                std::thread::spawn(move || {
                    let _runtime = handle.enter();
                    barrier.wait();
                    executor.start();
                })
            };
            let stopper = {
                let executor = executor.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    executor.stop();
                })
            };
            starter.join().unwrap();
            stopper.join().unwrap();

            // A stop that ran before start was a no-op. Any other order must
            // already have cancelled the loop.
            if executor.state() == ExecutorState::Running {
                executor.stop();
            }
            tokio::time::timeout(Duration::from_secs(1), executor.wait())
                .await
                .expect("poll loop kept running after stop");
        }
    }
}

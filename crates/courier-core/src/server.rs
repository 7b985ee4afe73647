//! Message handling server: a dispatcher bound to a transport and an
//! executor.
//!
//! `start()` asks the dispatcher for a listener and runs an executor over
//! it. `stop()` and `wait()` delegate to that executor; once `wait()`
//! returns the executor is released and the server may be started again.

use std::future::Future;
use std::sync::Arc;

use courier_types::TargetError;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use crate::driver::{DriverError, Listener};
use crate::executor::{Executor, ExecutorKind, MessageCallback};
use crate::transport::Transport;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid target: {0}")]
    InvalidTarget(TargetError),

    #[error(transparent)]
    Driver(DriverError),
}

impl From<DriverError> for ServerError {
    fn from(err: DriverError) -> Self {
        match err {
            DriverError::InvalidTarget(err) => ServerError::InvalidTarget(err),
            other => ServerError::Driver(other),
        }
    }
}

/// A callback that also knows which listener it should be fed from.
pub trait Dispatcher: MessageCallback {
    fn listen(
        &self,
        transport: &Transport,
    ) -> impl Future<Output = Result<Box<dyn Listener>, DriverError>> + Send;
}

pub struct MessageHandlingServer<D: Dispatcher> {
    transport: Transport,
    dispatcher: Arc<D>,
    kind: ExecutorKind,
    executor: Mutex<Option<Arc<Executor<D>>>>,
}

impl<D: Dispatcher> MessageHandlingServer<D> {
    pub fn new(transport: Transport, dispatcher: D, kind: ExecutorKind) -> Self {
        Self {
            transport,
            dispatcher: Arc::new(dispatcher),
            kind,
            executor: Mutex::new(None),
        }
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn dispatcher(&self) -> &D {
        &self.dispatcher
    }

    /// Start handling messages. A second call while started is a no-op.
    pub async fn start(&self) -> Result<(), ServerError> {
        let mut slot = self.executor.lock().await;
        if slot.is_some() {
            return Ok(());
        }

        let listener = self.dispatcher.listen(&self.transport).await?;
        let executor = Arc::new(Executor::new(self.kind, listener, self.dispatcher.clone()));
        executor.start();
        *slot = Some(executor);
        debug!(kind = ?self.kind, "message handling server started");
        Ok(())
    }

    /// Stop polling. Messages already being dispatched are finished.
    pub async fn stop(&self) {
        if let Some(executor) = self.executor.lock().await.as_ref() {
            executor.stop();
        }
    }

    /// Wait for the executor to stop, then release it.
    pub async fn wait(&self) {
        let Some(executor) = self.executor.lock().await.clone() else {
            return;
        };
        executor.wait().await;

        let mut slot = self.executor.lock().await;
        if slot.as_ref().is_some_and(|current| Arc::ptr_eq(current, &executor)) {
            *slot = None;
        }
    }

    /// Whether an executor is currently attached.
    pub async fn is_started(&self) -> bool {
        self.executor.lock().await.is_some()
    }
}

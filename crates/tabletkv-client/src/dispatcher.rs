//! Asynchronous dispatch of write RPCs under admission control.
//!
//! A submission estimates the request size and blocks in
//! [`AdmissionController::admit`] until capacity is available. It then hands
//! the start of the RPC to the worker pool, or starts it inline when the pool
//! has no workers. The returned future is driven on the I/O runtime. When it
//! resolves, the admission token is released first and only then is the
//! callback invoked.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::admission::{AdmissionController, AdmissionToken};
use crate::client::{DataClient, RpcFuture};
use crate::error::{ClientError, Result};
use crate::protocol::{
    CheckAndMutateRowRequest, CheckAndMutateRowResponse, EstimateSize, MutateRowRequest,
    MutateRowResponse, ReadModifyWriteRowRequest, ReadModifyWriteRowResponse,
};

type Callback<T> = Box<dyn FnOnce(Result<T>) + Send + 'static>;
type StartFn<Req, T> = fn(&dyn DataClient, Req) -> Result<RpcFuture<T>>;

/// Where submissions are started.
#[derive(Debug)]
pub enum WorkerPool {
    /// Start on the submitting thread.
    Inline,
    /// Start on a runtime owned, and shut down, by the dispatcher.
    Owned(Runtime),
    /// Start on a runtime owned by someone else.
    Shared(Handle),
}

impl WorkerPool {
    /// Builds a pool of `count` worker threads; zero means [`WorkerPool::Inline`].
    pub fn with_workers(count: usize) -> Result<Self> {
        if count == 0 {
            return Ok(WorkerPool::Inline);
        }
        let runtime = Builder::new_multi_thread()
            .worker_threads(count)
            .thread_name("tabletkv-async-worker")
            .enable_all()
            .build()?;
        Ok(WorkerPool::Owned(runtime))
    }

    /// Whether submissions run on the submitting thread.
    pub fn is_inline(&self) -> bool {
        matches!(self, WorkerPool::Inline)
    }
}

/// An admitted operation waiting for its outcome.
///
/// Completing it releases the admission token and then invokes the callback.
/// Dropping it unresolved does the same with [`ClientError::Cancelled`], so
/// the token is released exactly once on every path.
pub struct PendingOperation<T> {
    token: Option<AdmissionToken>,
    admission: Arc<AdmissionController>,
    callback: Option<Callback<T>>,
}

impl<T> PendingOperation<T> {
    /// Binds `token` to `callback`.
    pub fn new<F>(token: AdmissionToken, admission: Arc<AdmissionController>, callback: F) -> Self
    where
        F: FnOnce(Result<T>) + Send + 'static,
    {
        Self {
            token: Some(token),
            admission,
            callback: Some(Box::new(callback)),
        }
    }

    /// The admission token still held by this operation.
    pub fn token(&self) -> Option<&AdmissionToken> {
        self.token.as_ref()
    }

    /// Resolves the operation.
    pub fn complete(mut self, result: Result<T>) {
        self.finish(result);
    }

    fn finish(&mut self, result: Result<T>) {
        if let Some(token) = self.token.take() {
            self.admission.complete(&token);
        }
        if let Some(callback) = self.callback.take() {
            callback(result);
        }
    }
}

impl<T> Drop for PendingOperation<T> {
    fn drop(&mut self) {
        if self.token.is_some() || self.callback.is_some() {
            debug!("Pending operation dropped before completion");
            self.finish(Err(ClientError::Cancelled));
        }
    }
}

impl<T> fmt::Debug for PendingOperation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingOperation")
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}

/// Handle to the outcome of a submitted operation.
///
/// Await it from async code, or call [`OperationHandle::wait`] from a thread
/// that is not driving a runtime.
#[derive(Debug)]
pub struct OperationHandle<T> {
    receiver: oneshot::Receiver<Result<T>>,
}

impl<T> OperationHandle<T> {
    fn channel() -> (oneshot::Sender<Result<T>>, Self) {
        let (sender, receiver) = oneshot::channel();
        (sender, Self { receiver })
    }

    /// Blocks the current thread until the operation resolves.
    pub fn wait(self) -> Result<T> {
        self.receiver
            .blocking_recv()
            .unwrap_or(Err(ClientError::Cancelled))
    }
}

impl<T> Future for OperationHandle<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(ClientError::Cancelled)))
    }
}

/// Submits write RPCs under admission control.
pub struct AsyncDispatcher {
    client: Arc<dyn DataClient>,
    admission: Arc<AdmissionController>,
    io: Handle,
    workers: Mutex<Option<WorkerPool>>,
}

impl AsyncDispatcher {
    /// Creates a dispatcher.
    ///
    /// RPC futures and completion callbacks run on `io`.
    pub fn new(
        client: Arc<dyn DataClient>,
        admission: Arc<AdmissionController>,
        io: Handle,
        workers: WorkerPool,
    ) -> Self {
        Self {
            client,
            admission,
            io,
            workers: Mutex::new(Some(workers)),
        }
    }

    /// The controller gating submissions.
    pub fn admission(&self) -> &Arc<AdmissionController> {
        &self.admission
    }

    /// Whether [`shutdown`](Self::shutdown) has run.
    pub fn is_shutdown(&self) -> bool {
        self.workers.lock().is_none()
    }

    fn submit<Req, T>(
        &self,
        request: Req,
        start: StartFn<Req, T>,
        callback: Callback<T>,
    ) -> Result<()>
    where
        Req: EstimateSize + Send + 'static,
        T: Send + 'static,
    {
        if self.is_shutdown() {
            return Err(ClientError::Closed);
        }

        let token = self.admission.admit(request.estimated_size());
        let spawner = match self.workers.lock().as_ref() {
            Some(WorkerPool::Inline) => None,
            Some(WorkerPool::Owned(runtime)) => Some(runtime.handle().clone()),
            Some(WorkerPool::Shared(handle)) => Some(handle.clone()),
            // Shut down while blocked in admission. The caller gets the error
            // and the callback never runs.
            None => {
                self.admission.complete(&token);
                return Err(ClientError::Closed);
            }
        };

        let operation = PendingOperation {
            token: Some(token),
            admission: Arc::clone(&self.admission),
            callback: Some(callback),
        };
        let client = Arc::clone(&self.client);
        let io = self.io.clone();
        let job = move || match start(client.as_ref(), request) {
            Ok(future) => {
                io.spawn(async move {
                    let result = future.await;
                    operation.complete(result);
                });
            }
            Err(error) => {
                debug!(error = %error, "RPC failed to start");
                operation.complete(Err(error));
            }
        };

        match spawner {
            Some(handle) => {
                handle.spawn(async move { job() });
            }
            None => job(),
        }
        Ok(())
    }

    /// Submits a row mutation; `callback` receives the outcome.
    pub fn submit_mutate_row_with<F>(&self, request: MutateRowRequest, callback: F) -> Result<()>
    where
        F: FnOnce(Result<MutateRowResponse>) + Send + 'static,
    {
        self.submit(
            request,
            |client, request| client.mutate_row_async(request),
            Box::new(callback),
        )
    }

    /// Submits a row mutation.
    pub fn submit_mutate_row(
        &self,
        request: MutateRowRequest,
    ) -> Result<OperationHandle<MutateRowResponse>> {
        let (sender, handle) = OperationHandle::channel();
        self.submit_mutate_row_with(request, move |result| {
            let _ = sender.send(result);
        })?;
        Ok(handle)
    }

    /// Submits a conditional mutation; `callback` receives the outcome.
    pub fn submit_check_and_mutate_row_with<F>(
        &self,
        request: CheckAndMutateRowRequest,
        callback: F,
    ) -> Result<()>
    where
        F: FnOnce(Result<CheckAndMutateRowResponse>) + Send + 'static,
    {
        self.submit(
            request,
            |client, request| client.check_and_mutate_row_async(request),
            Box::new(callback),
        )
    }

    /// Submits a conditional mutation.
    pub fn submit_check_and_mutate_row(
        &self,
        request: CheckAndMutateRowRequest,
    ) -> Result<OperationHandle<CheckAndMutateRowResponse>> {
        let (sender, handle) = OperationHandle::channel();
        self.submit_check_and_mutate_row_with(request, move |result| {
            let _ = sender.send(result);
        })?;
        Ok(handle)
    }

    /// Submits an append/increment; `callback` receives the outcome.
    pub fn submit_read_modify_write_row_with<F>(
        &self,
        request: ReadModifyWriteRowRequest,
        callback: F,
    ) -> Result<()>
    where
        F: FnOnce(Result<ReadModifyWriteRowResponse>) + Send + 'static,
    {
        self.submit(
            request,
            |client, request| client.read_modify_write_row_async(request),
            Box::new(callback),
        )
    }

    /// Submits an append/increment.
    pub fn submit_read_modify_write_row(
        &self,
        request: ReadModifyWriteRowRequest,
    ) -> Result<OperationHandle<ReadModifyWriteRowResponse>> {
        let (sender, handle) = OperationHandle::channel();
        self.submit_read_modify_write_row_with(request, move |result| {
            let _ = sender.send(result);
        })?;
        Ok(handle)
    }

    /// Blocks until every admitted operation has completed.
    pub fn await_drained(&self) {
        self.admission.await_drained();
    }

    /// Stops accepting submissions and releases an owned worker pool.
    ///
    /// A shared pool is left running. Idempotent.
    pub fn shutdown(&self) {
        let workers = self.workers.lock().take();
        match workers {
            Some(WorkerPool::Owned(runtime)) => {
                runtime.shutdown_background();
                info!("Async worker pool shut down");
            }
            Some(_) => debug!("Dispatcher shut down"),
            None => {}
        }
    }
}

impl Drop for AsyncDispatcher {
    fn drop(&mut self) {
        if let Some(WorkerPool::Owned(runtime)) = self.workers.get_mut().take() {
            runtime.shutdown_background();
        }
    }
}

impl fmt::Debug for AsyncDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncDispatcher")
            .field("admission", &self.admission)
            .field("workers", &self.workers.lock())
            .finish_non_exhaustive()
    }
}

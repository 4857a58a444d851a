//! Common test utilities and fixtures for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use tabletkv_client::adapter::Put;
use tabletkv_client::client::{DataClient, RpcFuture};
use tabletkv_client::mutator::{BufferedMutator, ExceptionListener, MutationFailures};
use tabletkv_client::protocol::{
    CheckAndMutateRowRequest, CheckAndMutateRowResponse, MethodDescriptor, MutateRowRequest,
    MutateRowResponse, ReadModifyWriteRowRequest, ReadModifyWriteRowResponse, ReadRowsRequest,
    ReadRowsResponse, RpcRequest, RpcResponse, SampleRowKeysRequest, SampleRowKeysResponse,
    StatusCode,
};
use tabletkv_client::transport::{CallOptions, Channel, ChannelFactory, Metadata};
use tabletkv_client::{ClientError, Result};
use tokio::runtime::{Builder, Runtime};
use tokio::sync::oneshot;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Installs a test-friendly subscriber once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_test_writer())
        .with(EnvFilter::from_default_env())
        .try_init();
}

/// Multi-threaded runtime standing in for the network event loop.
pub fn io_runtime() -> Runtime {
    Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("test-io")
        .enable_all()
        .build()
        .unwrap()
}

/// Polls `condition` until it holds, failing the test after five seconds.
pub fn wait_until(condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(1));
    }
}

/// A one-cell put on a one-byte row, with a server-assigned timestamp.
pub fn simple_put() -> Put {
    Put::new(vec![0u8]).add_column("cf", vec![0u8], vec![0u8])
}

/// A put on `row` with an explicit timestamp.
pub fn put(row: &str) -> Put {
    Put::new(row.to_string()).add_column_at("cf", "q", 1_000, "v")
}

type Script = Arc<Mutex<VecDeque<Result<RpcResponse>>>>;

/// One recorded call on a [`FakeChannel`].
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: &'static str,
    pub headers: Metadata,
    pub request: RpcRequest,
}

/// Channel answering from a script shared by every channel of a factory;
/// once the script is empty every call succeeds.
pub struct FakeChannel {
    pub id: usize,
    authority: String,
    script: Script,
    pub calls: Mutex<Vec<RecordedCall>>,
}

impl FakeChannel {
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

fn default_response(request: &RpcRequest) -> RpcResponse {
    match request {
        RpcRequest::MutateRow(_) => RpcResponse::MutateRow(MutateRowResponse),
        RpcRequest::CheckAndMutateRow(_) => {
            RpcResponse::CheckAndMutateRow(CheckAndMutateRowResponse::default())
        }
        RpcRequest::ReadModifyWriteRow(_) => {
            RpcResponse::ReadModifyWriteRow(ReadModifyWriteRowResponse::default())
        }
        RpcRequest::ReadRows(_) => RpcResponse::ReadRows(ReadRowsResponse::default()),
        RpcRequest::SampleRowKeys(_) => {
            RpcResponse::SampleRowKeys(SampleRowKeysResponse::default())
        }
    }
}

#[async_trait]
impl Channel for FakeChannel {
    fn authority(&self) -> &str {
        &self.authority
    }

    async fn unary_call(
        &self,
        method: &'static MethodDescriptor,
        _options: &CallOptions,
        headers: Metadata,
        request: RpcRequest,
    ) -> Result<RpcResponse> {
        let response = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(default_response(&request)));
        self.calls.lock().push(RecordedCall {
            method: method.full_name,
            headers,
            request,
        });
        response
    }
}

/// Creates [`FakeChannel`]s and keeps track of them.
#[derive(Clone, Default)]
pub struct FakeChannels {
    created: Arc<Mutex<Vec<Arc<FakeChannel>>>>,
    script: Script,
    fail_after: Option<usize>,
    distinct_authorities: bool,
}

impl FakeChannels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every channel gets its own authority; used to tell channels apart.
    pub fn with_distinct_authorities(mut self) -> Self {
        self.distinct_authorities = true;
        self
    }

    /// Channel creation fails once `limit` channels exist.
    pub fn failing_after(mut self, limit: usize) -> Self {
        self.fail_after = Some(limit);
        self
    }

    /// Queues the outcome of the next call, whatever channel it lands on.
    pub fn push_response(&self, response: Result<RpcResponse>) {
        self.script.lock().push_back(response);
    }

    pub fn push_status(&self, code: StatusCode) {
        self.push_response(Err(ClientError::status(code, "scripted failure")));
    }

    pub fn channels(&self) -> Vec<Arc<FakeChannel>> {
        self.created.lock().clone()
    }

    pub fn total_calls(&self) -> usize {
        self.channels().iter().map(|c| c.call_count()).sum()
    }

    pub fn all_calls(&self) -> Vec<RecordedCall> {
        self.channels()
            .iter()
            .flat_map(|c| c.calls.lock().clone())
            .collect()
    }

    pub fn factory(&self) -> impl ChannelFactory {
        let fakes = self.clone();
        move || -> std::io::Result<Arc<dyn Channel>> {
            let mut created = fakes.created.lock();
            if fakes.fail_after.is_some_and(|limit| created.len() >= limit) {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "endpoint refused",
                ));
            }
            let id = created.len();
            let authority = if fakes.distinct_authorities {
                format!("tablet-{}.local:8086", id)
            } else {
                "tablet.local:8086".to_string()
            };
            let channel = Arc::new(FakeChannel {
                id,
                authority,
                script: Arc::clone(&fakes.script),
                calls: Mutex::new(Vec::new()),
            });
            created.push(Arc::clone(&channel));
            Ok(channel as Arc<dyn Channel>)
        }
    }
}

/// [`DataClient`] whose row mutations stay pending until the test resolves
/// them, or fail at start time when told to.
#[derive(Default)]
pub struct ScriptedClient {
    pending: Mutex<Vec<oneshot::Sender<Result<MutateRowResponse>>>>,
    requests: Mutex<Vec<MutateRowRequest>>,
    fail_start: AtomicBool,
    calls: AtomicUsize,
}

impl ScriptedClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_on_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<MutateRowRequest> {
        self.requests.lock().clone()
    }

    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    /// Resolves every pending call successfully.
    pub fn complete_all(&self) {
        for sender in self.pending.lock().drain(..) {
            let _ = sender.send(Ok(MutateRowResponse));
        }
    }

    /// Fails every pending call with `code`.
    pub fn fail_all(&self, code: StatusCode) {
        for sender in self.pending.lock().drain(..) {
            let _ = sender.send(Err(ClientError::status(code, "scripted failure")));
        }
    }
}

fn unimplemented<T>() -> Result<RpcFuture<T>> {
    Err(ClientError::status(StatusCode::Unimplemented, "not scripted"))
}

impl DataClient for ScriptedClient {
    fn mutate_row_async(&self, request: MutateRowRequest) -> Result<RpcFuture<MutateRowResponse>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request);
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(ClientError::status(StatusCode::Internal, "start failed"));
        }
        let (sender, receiver) = oneshot::channel();
        self.pending.lock().push(sender);
        Ok(async move { receiver.await.unwrap_or(Err(ClientError::Cancelled)) }.boxed())
    }

    fn check_and_mutate_row_async(
        &self,
        _request: CheckAndMutateRowRequest,
    ) -> Result<RpcFuture<CheckAndMutateRowResponse>> {
        unimplemented()
    }

    fn read_modify_write_row_async(
        &self,
        _request: ReadModifyWriteRowRequest,
    ) -> Result<RpcFuture<ReadModifyWriteRowResponse>> {
        unimplemented()
    }

    fn read_rows_async(&self, _request: ReadRowsRequest) -> Result<RpcFuture<ReadRowsResponse>> {
        unimplemented()
    }

    fn sample_row_keys_async(
        &self,
        _request: SampleRowKeysRequest,
    ) -> Result<RpcFuture<SampleRowKeysResponse>> {
        unimplemented()
    }
}

/// Listener that records every report and swallows it.
#[derive(Default)]
pub struct RecordingListener {
    reports: Mutex<Vec<Report>>,
}

/// One call of [`RecordingListener::on_exception`].
#[derive(Debug, Clone)]
pub struct Report {
    /// Row keys of the failed mutations, oldest first.
    pub rows: Vec<Vec<u8>>,
    /// Address of the mutator passed to the listener.
    pub mutator: usize,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reports(&self) -> Vec<Report> {
        self.reports.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.reports.lock().len()
    }
}

impl ExceptionListener for RecordingListener {
    fn on_exception(&self, failures: MutationFailures, mutator: &BufferedMutator) -> Result<()> {
        let rows = failures
            .failures()
            .iter()
            .map(|failed| failed.mutation.row().to_vec())
            .collect();
        self.reports.lock().push(Report {
            rows,
            mutator: mutator as *const BufferedMutator as usize,
        });
        Ok(())
    }
}

//! Data client: typed entry points for every data RPC.
//!
//! [`DataClient`] is the seam the dispatcher talks to. Its `*_async` methods
//! either fail synchronously (the call could not be started) or return a
//! future resolving to the terminal outcome of the call, retries included.

use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;

use crate::error::{ClientError, Result};
use crate::idempotency::{
    RetryPredicate, IS_RETRYABLE_CHECK_AND_MUTATE, IS_RETRYABLE_MUTATION,
    IS_RETRYABLE_READ_MODIFY_WRITE, IS_RETRYABLE_READ_ROWS, IS_RETRYABLE_SAMPLE_ROW_KEYS,
};
use crate::metrics::ClientMetrics;
use crate::pool::ChannelPool;
use crate::protocol::{
    CheckAndMutateRowRequest, CheckAndMutateRowResponse, MutateRowRequest, MutateRowResponse,
    ReadModifyWriteRowRequest, ReadModifyWriteRowResponse, ReadRowsRequest, ReadRowsResponse,
    SampleRowKeysRequest, SampleRowKeysResponse, UnaryMethod,
};
use crate::retry::{RetryPolicy, RetryingCall};
use crate::transport::CallOptions;

/// Future resolving to the terminal outcome of one logical RPC.
pub type RpcFuture<T> = BoxFuture<'static, Result<T>>;

/// Asynchronous data operations against a tablet cluster.
pub trait DataClient: Send + Sync + 'static {
    /// Starts a single-row mutation.
    fn mutate_row_async(&self, request: MutateRowRequest) -> Result<RpcFuture<MutateRowResponse>>;

    /// Starts a conditional single-row mutation.
    fn check_and_mutate_row_async(
        &self,
        request: CheckAndMutateRowRequest,
    ) -> Result<RpcFuture<CheckAndMutateRowResponse>>;

    /// Starts an append/increment on a single row.
    fn read_modify_write_row_async(
        &self,
        request: ReadModifyWriteRowRequest,
    ) -> Result<RpcFuture<ReadModifyWriteRowResponse>>;

    /// Starts a row read.
    fn read_rows_async(&self, request: ReadRowsRequest) -> Result<RpcFuture<ReadRowsResponse>>;

    /// Starts a row key sampling call.
    fn sample_row_keys_async(
        &self,
        request: SampleRowKeysRequest,
    ) -> Result<RpcFuture<SampleRowKeysResponse>>;
}

fn require_table(table_name: &str) -> Result<()> {
    if table_name.is_empty() {
        return Err(ClientError::InvalidRequest {
            reason: "table name must not be empty".to_string(),
        });
    }
    Ok(())
}

fn require_row(table_name: &str, row_key: &Bytes) -> Result<()> {
    require_table(table_name)?;
    if row_key.is_empty() {
        return Err(ClientError::InvalidRequest {
            reason: "row key must not be empty".to_string(),
        });
    }
    Ok(())
}

/// [`DataClient`] backed by a [`ChannelPool`] with retries.
#[derive(Debug, Clone)]
pub struct TabletDataClient {
    pool: Arc<ChannelPool>,
    policy: RetryPolicy,
    call_options: CallOptions,
    metrics: Arc<ClientMetrics>,
}

impl TabletDataClient {
    /// Creates a client issuing calls over `pool`.
    pub fn new(
        pool: Arc<ChannelPool>,
        policy: RetryPolicy,
        call_options: CallOptions,
        metrics: Arc<ClientMetrics>,
    ) -> Self {
        Self {
            pool,
            policy,
            call_options,
            metrics,
        }
    }

    fn start<Req: UnaryMethod>(
        &self,
        request: Req,
        predicate: RetryPredicate<Req>,
    ) -> RpcFuture<Req::Response> {
        RetryingCall::new(
            Arc::clone(&self.pool),
            self.call_options.clone(),
            request,
            predicate,
            self.policy.clone(),
            Arc::clone(&self.metrics),
        )
        .run()
        .boxed()
    }

    /// Mutates a row and waits for the outcome.
    pub async fn mutate_row(&self, request: MutateRowRequest) -> Result<MutateRowResponse> {
        self.mutate_row_async(request)?.await
    }

    /// Conditionally mutates a row and waits for the outcome.
    pub async fn check_and_mutate_row(
        &self,
        request: CheckAndMutateRowRequest,
    ) -> Result<CheckAndMutateRowResponse> {
        self.check_and_mutate_row_async(request)?.await
    }

    /// Applies append/increment rules and waits for the new row contents.
    pub async fn read_modify_write_row(
        &self,
        request: ReadModifyWriteRowRequest,
    ) -> Result<ReadModifyWriteRowResponse> {
        self.read_modify_write_row_async(request)?.await
    }

    /// Reads rows.
    pub async fn read_rows(&self, request: ReadRowsRequest) -> Result<ReadRowsResponse> {
        self.read_rows_async(request)?.await
    }

    /// Samples row keys.
    pub async fn sample_row_keys(
        &self,
        request: SampleRowKeysRequest,
    ) -> Result<SampleRowKeysResponse> {
        self.sample_row_keys_async(request)?.await
    }

    /// The pool calls are issued on.
    pub fn pool(&self) -> &Arc<ChannelPool> {
        &self.pool
    }

    /// The retry policy applied to every call.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Shared counters.
    pub fn metrics(&self) -> &Arc<ClientMetrics> {
        &self.metrics
    }
}

impl DataClient for TabletDataClient {
    fn mutate_row_async(&self, request: MutateRowRequest) -> Result<RpcFuture<MutateRowResponse>> {
        require_row(&request.table_name, &request.row_key)?;
        Ok(self.start(request, IS_RETRYABLE_MUTATION))
    }

    fn check_and_mutate_row_async(
        &self,
        request: CheckAndMutateRowRequest,
    ) -> Result<RpcFuture<CheckAndMutateRowResponse>> {
        require_row(&request.table_name, &request.row_key)?;
        Ok(self.start(request, IS_RETRYABLE_CHECK_AND_MUTATE))
    }

    fn read_modify_write_row_async(
        &self,
        request: ReadModifyWriteRowRequest,
    ) -> Result<RpcFuture<ReadModifyWriteRowResponse>> {
        require_row(&request.table_name, &request.row_key)?;
        if request.rules.is_empty() {
            return Err(ClientError::InvalidRequest {
                reason: "read-modify-write needs at least one rule".to_string(),
            });
        }
        Ok(self.start(request, IS_RETRYABLE_READ_MODIFY_WRITE))
    }

    fn read_rows_async(&self, request: ReadRowsRequest) -> Result<RpcFuture<ReadRowsResponse>> {
        require_table(&request.table_name)?;
        Ok(self.start(request, IS_RETRYABLE_READ_ROWS))
    }

    fn sample_row_keys_async(
        &self,
        request: SampleRowKeysRequest,
    ) -> Result<RpcFuture<SampleRowKeysResponse>> {
        require_table(&request.table_name)?;
        Ok(self.start(request, IS_RETRYABLE_SAMPLE_ROW_KEYS))
    }
}

//! Session bootstrap: validated options, the shared channel pool, the data
//! client and buffered mutators.

use std::fmt;
use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::info;

use crate::adapter::DefaultRequestAdapter;
use crate::admission::AdmissionController;
use crate::client::{DataClient, TabletDataClient};
use crate::config::TabletOptions;
use crate::dispatcher::{AsyncDispatcher, WorkerPool};
use crate::error::Result;
use crate::interceptor::{HeaderInterceptor, StaticHeaderInterceptor, UserAgentInterceptor};
use crate::metrics::ClientMetrics;
use crate::mutator::{BufferedMutator, ExceptionListener};
use crate::pool::ChannelPool;
use crate::retry::RetryPolicy;
use crate::transport::ChannelFactory;

/// Connection state shared by every operation against one cluster.
pub struct TabletSession {
    options: TabletOptions,
    pool: Arc<ChannelPool>,
    client: Arc<TabletDataClient>,
    metrics: Arc<ClientMetrics>,
    io: Handle,
}

impl TabletSession {
    /// Validates `options` and opens `channel_count` channels from `factory`.
    ///
    /// RPCs and their completion callbacks run on `io`.
    pub fn new<F>(options: TabletOptions, factory: F, io: Handle) -> Result<Self>
    where
        F: ChannelFactory,
    {
        options.validate()?;

        let interceptors: Vec<Arc<dyn HeaderInterceptor>> = vec![
            Arc::new(UserAgentInterceptor::new(options.user_agent.clone())?),
            Arc::new(StaticHeaderInterceptor::resource_prefix(
                options.cluster_name(),
            )),
        ];
        let pool = Arc::new(ChannelPool::new(interceptors, factory)?);
        pool.ensure_channel_count(options.channel_count)?;

        let metrics = Arc::new(ClientMetrics::new());
        let client = Arc::new(TabletDataClient::new(
            Arc::clone(&pool),
            RetryPolicy::new(options.retry.clone()),
            options.call_options(),
            Arc::clone(&metrics),
        ));

        info!(
            cluster = %options.cluster_name(),
            endpoint = %options.data_endpoint(),
            authority = %pool.authority(),
            channels = pool.size(),
            "Session created"
        );
        Ok(Self {
            options,
            pool,
            client,
            metrics,
            io,
        })
    }

    /// The data client.
    pub fn data_client(&self) -> &Arc<TabletDataClient> {
        &self.client
    }

    /// The channel pool.
    pub fn pool(&self) -> &Arc<ChannelPool> {
        &self.pool
    }

    /// The validated options.
    pub fn options(&self) -> &TabletOptions {
        &self.options
    }

    /// Counters shared by the client and its mutators.
    pub fn metrics(&self) -> &Arc<ClientMetrics> {
        &self.metrics
    }

    /// Creates a mutator for `table` with its own admission controller and a
    /// worker pool of `bulk.async_worker_count` threads.
    pub fn buffered_mutator(
        &self,
        table: &str,
        listener: Arc<dyn ExceptionListener>,
    ) -> Result<BufferedMutator> {
        let workers = WorkerPool::with_workers(self.options.bulk.async_worker_count)?;
        Ok(self.buffered_mutator_with(table, listener, workers))
    }

    /// Creates a mutator for `table` starting RPCs on `workers`.
    pub fn buffered_mutator_with(
        &self,
        table: &str,
        listener: Arc<dyn ExceptionListener>,
        workers: WorkerPool,
    ) -> BufferedMutator {
        let admission = Arc::new(AdmissionController::new(
            self.options.bulk.admission_config(),
        ));
        let dispatcher = AsyncDispatcher::new(
            Arc::clone(&self.client) as Arc<dyn DataClient>,
            admission,
            self.io.clone(),
            workers,
        );
        BufferedMutator::new(
            self.options.table_name(table),
            Arc::new(DefaultRequestAdapter),
            dispatcher,
            listener,
            Arc::clone(&self.metrics),
        )
    }
}

impl fmt::Debug for TabletSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TabletSession")
            .field("cluster", &self.options.cluster_name())
            .field("endpoint", &self.options.data_endpoint())
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

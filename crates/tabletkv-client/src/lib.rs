#![warn(missing_docs)]

//! tabletkv client runtime: round-robin channel pool, idempotent retries and
//! buffered async mutations.
//!
//! Write path: BufferedMutator → AsyncDispatcher (admission) → DataClient →
//! RetryingCall → ChannelPool → Channel

pub mod adapter;
pub mod admission;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod idempotency;
pub mod interceptor;
pub mod metrics;
pub mod mutator;
pub mod pool;
pub mod protocol;
pub mod retry;
pub mod session;
pub mod transport;

pub use adapter::{DefaultRequestAdapter, Delete, Put, RequestAdapter, RowMutation};
pub use admission::{AdmissionConfig, AdmissionController, AdmissionStats, AdmissionToken};
pub use client::{DataClient, RpcFuture, TabletDataClient};
pub use config::{BulkOptions, TabletOptions};
pub use dispatcher::{AsyncDispatcher, OperationHandle, PendingOperation, WorkerPool};
pub use error::{ClientError, Result};
pub use interceptor::{HeaderInterceptor, StaticHeaderInterceptor, UserAgentInterceptor};
pub use metrics::{ClientMetrics, MetricsSnapshot};
pub use mutator::{
    BufferedMutator, ExceptionListener, FailedMutation, MutationFailures, MutatorStats,
    RaisingListener,
};
pub use pool::{ChannelPool, PooledCall};
pub use protocol::{MethodDescriptor, Mutation, StatusCode, SERVER_ASSIGNED_TIMESTAMP};
pub use retry::{Clock, RetryOptions, RetryPolicy, RetryingCall, SystemClock};
pub use session::TabletSession;
pub use transport::{CallOptions, Channel, ChannelFactory, Metadata};

//! Round-robin channel pool.
//!
//! The pool holds a set of equivalent channels to one endpoint and spreads
//! calls across them. The channel list is an immutable `Vec` published through
//! an [`ArcSwap`]: readers load it once per call without locking, and growth
//! builds a new list and publishes it with a single store. Only concurrent
//! growers contend on a mutex.

use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::{ClientError, Result};
use crate::interceptor::HeaderInterceptor;
use crate::protocol::{MethodDescriptor, RpcRequest, RpcResponse, StatusCode};
use crate::transport::{CallOptions, Channel, ChannelFactory, Metadata};

/// Maps a request number onto a channel index.
///
/// The counter is a wrapping `i32`; the absolute value of the remainder keeps
/// the index in range after wraparound, at the cost of a slightly uneven
/// distribution around the wrap point.
pub fn round_robin_index(request_num: i32, len: usize) -> usize {
    debug_assert!(len > 0);
    (request_num % len as i32).unsigned_abs() as usize
}

/// A pool of channels used in round robin.
pub struct ChannelPool {
    channels: ArcSwap<Vec<Arc<dyn Channel>>>,
    request_count: AtomicI32,
    total_size: AtomicUsize,
    interceptors: Arc<[Arc<dyn HeaderInterceptor>]>,
    factory: Box<dyn ChannelFactory>,
    grow_lock: Mutex<()>,
    authority: String,
}

impl ChannelPool {
    /// Creates a pool holding exactly one channel from `factory`.
    ///
    /// All channels are assumed to route to the same endpoint, so the first
    /// channel's authority becomes the pool's authority.
    pub fn new<F>(interceptors: Vec<Arc<dyn HeaderInterceptor>>, factory: F) -> Result<Self>
    where
        F: ChannelFactory,
    {
        let channel = factory.create()?;
        let authority = channel.authority().to_string();
        debug!(authority = %authority, "Channel pool created");
        Ok(Self {
            channels: ArcSwap::from_pointee(vec![channel]),
            request_count: AtomicI32::new(0),
            total_size: AtomicUsize::new(1),
            interceptors: interceptors.into(),
            factory: Box::new(factory),
            grow_lock: Mutex::new(()),
            authority,
        })
    }

    /// Makes sure the pool holds at least `capacity` channels.
    ///
    /// Takes the lock only when the pool actually has to grow. If the factory
    /// fails, the error is returned and the previously published channels stay
    /// in use.
    pub fn ensure_channel_count(&self, capacity: usize) -> Result<()> {
        if self.total_size.load(Ordering::Acquire) >= capacity {
            return Ok(());
        }

        let _guard = self.grow_lock.lock();
        if self.total_size.load(Ordering::Acquire) >= capacity {
            return Ok(());
        }

        let current = self.channels.load_full();
        let mut grown: Vec<Arc<dyn Channel>> = current.iter().cloned().collect();
        while grown.len() < capacity {
            grown.push(self.factory.create()?);
        }

        let size = grown.len();
        self.channels.store(Arc::new(grown));
        self.total_size.store(size, Ordering::Release);
        info!(
            authority = %self.authority,
            from = current.len(),
            to = size,
            "Channel pool grown"
        );
        Ok(())
    }

    fn next_channel(&self) -> Arc<dyn Channel> {
        let request_num = self.request_count.fetch_add(1, Ordering::Relaxed);
        let channels = self.channels.load();
        let index = round_robin_index(request_num, channels.len());
        Arc::clone(&channels[index])
    }

    /// Creates a call bound to the next channel in round-robin order.
    ///
    /// Nothing is sent until [`PooledCall::start`] is awaited.
    pub fn new_call(&self, method: &'static MethodDescriptor, options: CallOptions) -> PooledCall {
        PooledCall {
            channel: self.next_channel(),
            method,
            options,
            interceptors: Arc::clone(&self.interceptors),
        }
    }

    /// Authority shared by every channel of the pool.
    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// Target number of channels.
    pub fn size(&self) -> usize {
        self.total_size.load(Ordering::Acquire)
    }

    /// Number of channels currently published.
    pub fn available_count(&self) -> usize {
        self.channels.load().len()
    }
}

impl std::fmt::Debug for ChannelPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelPool")
            .field("authority", &self.authority)
            .field("size", &self.size())
            .field("available", &self.available_count())
            .field("interceptors", &self.interceptors.len())
            .finish()
    }
}

/// A call handle bound to one channel of the pool.
pub struct PooledCall {
    channel: Arc<dyn Channel>,
    method: &'static MethodDescriptor,
    options: CallOptions,
    interceptors: Arc<[Arc<dyn HeaderInterceptor>]>,
}

impl PooledCall {
    /// The method this call targets.
    pub fn method(&self) -> &'static MethodDescriptor {
        self.method
    }

    /// Authority of the selected channel.
    pub fn authority(&self) -> &str {
        self.channel.authority()
    }

    /// Applies the header interceptors in registration order, then sends the
    /// request and waits for the response.
    ///
    /// An interceptor error aborts the call before anything reaches the channel.
    pub async fn start(self, request: RpcRequest) -> Result<RpcResponse> {
        let mut headers = Metadata::new();
        for interceptor in self.interceptors.iter() {
            interceptor.update_headers(&mut headers)?;
        }

        let call = self
            .channel
            .unary_call(self.method, &self.options, headers, request);
        let Some(deadline) = self.options.deadline else {
            return call.await;
        };
        let method = self.method.full_name;
        tokio::time::timeout(deadline, call).await.map_err(|_| {
            let message = format!("{method} exceeded deadline of {}ms", deadline.as_millis());
            ClientError::status(StatusCode::DeadlineExceeded, message)
        })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{MutateRowRequest, MutateRowResponse, METHOD_MUTATE_ROW};
    use async_trait::async_trait;
    use std::time::Duration;

    struct FakeChannel {
        id: usize,
        calls: AtomicUsize,
        headers: Mutex<Vec<Metadata>>,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl Channel for FakeChannel {
        fn authority(&self) -> &str {
            "tablet.local:8086"
        }

        async fn unary_call(
            &self,
            _method: &'static MethodDescriptor,
            _options: &CallOptions,
            headers: Metadata,
            _request: RpcRequest,
        ) -> Result<RpcResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.headers.lock().push(headers);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Ok(RpcResponse::MutateRow(MutateRowResponse))
        }
    }

    type Created = Arc<Mutex<Vec<Arc<FakeChannel>>>>;

    fn factory(
        created: Created,
        fail_after: Option<usize>,
        delay: Option<Duration>,
    ) -> impl ChannelFactory {
        move || -> std::io::Result<Arc<dyn Channel>> {
            let mut created = created.lock();
            if fail_after.is_some_and(|limit| created.len() >= limit) {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "endpoint refused",
                ));
            }
            let channel = Arc::new(FakeChannel {
                id: created.len(),
                calls: AtomicUsize::new(0),
                headers: Mutex::new(Vec::new()),
                delay,
            });
            created.push(Arc::clone(&channel));
            Ok(channel as Arc<dyn Channel>)
        }
    }

    fn pool_with(created: &Created, fail_after: Option<usize>) -> ChannelPool {
        let factory = factory(Arc::clone(created), fail_after, None);
        ChannelPool::new(Vec::new(), factory).unwrap()
    }

    fn request() -> RpcRequest {
        RpcRequest::MutateRow(MutateRowRequest::default())
    }

    #[test]
    fn test_new_creates_exactly_one_channel() {
        let created: Created = Arc::default();
        let pool = pool_with(&created, None);
        assert_eq!(created.lock().len(), 1);
        assert_eq!(pool.size(), 1);
        assert_eq!(pool.available_count(), 1);
        assert_eq!(pool.authority(), "tablet.local:8086");
    }

    #[test]
    fn test_new_propagates_factory_failure() {
        let created: Created = Arc::default();
        let result = ChannelPool::new(Vec::new(), factory(created, Some(0), None));
        assert!(matches!(result, Err(ClientError::Io(_))));
    }

    #[test]
    fn test_ensure_channel_count_grows_and_ignores_smaller() {
        let created: Created = Arc::default();
        let pool = pool_with(&created, None);

        pool.ensure_channel_count(4).unwrap();
        assert_eq!(pool.size(), 4);
        assert_eq!(pool.available_count(), 4);
        assert_eq!(created.lock().len(), 4);

        pool.ensure_channel_count(2).unwrap();
        pool.ensure_channel_count(4).unwrap();
        assert_eq!(pool.size(), 4);
        assert_eq!(created.lock().len(), 4);
    }

    #[tokio::test]
    async fn test_growth_failure_keeps_previous_channels() {
        let created: Created = Arc::default();
        let pool = pool_with(&created, Some(2));

        let err = pool.ensure_channel_count(5).unwrap_err();
        assert!(matches!(err, ClientError::Io(_)));
        assert_eq!(pool.size(), 1);
        assert_eq!(pool.available_count(), 1);

        pool.new_call(&METHOD_MUTATE_ROW, CallOptions::default())
            .start(request())
            .await
            .unwrap();
        assert_eq!(created.lock()[0].calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_round_robin_distribution() {
        let created: Created = Arc::default();
        let pool = pool_with(&created, None);
        pool.ensure_channel_count(4).unwrap();

        for _ in 0..12 {
            pool.new_call(&METHOD_MUTATE_ROW, CallOptions::default())
                .start(request())
                .await
                .unwrap();
        }

        for channel in created.lock().iter() {
            let calls = channel.calls.load(Ordering::SeqCst);
            assert_eq!(calls, 3, "channel {}", channel.id);
        }
    }

    #[test]
    fn test_round_robin_index_tolerates_wraparound() {
        for len in 1..8usize {
            for request_num in [i32::MAX, i32::MAX - 1, i32::MIN, i32::MIN + 1, -1, 0] {
                assert!(round_robin_index(request_num, len) < len);
            }
        }
        assert_eq!(round_robin_index(5, 3), 2);
        assert_eq!(round_robin_index(-5, 3), 2);
    }

    #[tokio::test]
    async fn test_counter_wraparound_keeps_serving() {
        let created: Created = Arc::default();
        let pool = pool_with(&created, None);
        pool.ensure_channel_count(3).unwrap();
        pool.request_count.store(i32::MAX - 2, Ordering::Relaxed);

        for _ in 0..6 {
            pool.new_call(&METHOD_MUTATE_ROW, CallOptions::default())
                .start(request())
                .await
                .unwrap();
        }

        let total: usize = created
            .lock()
            .iter()
            .map(|c| c.calls.load(Ordering::SeqCst))
            .sum();
        assert_eq!(total, 6);
    }

    #[tokio::test]
    async fn test_interceptors_run_in_registration_order() {
        let created: Created = Arc::default();
        let first: Arc<dyn HeaderInterceptor> = Arc::new(|headers: &mut Metadata| -> Result<()> {
            headers.append("x-order", "first");
            Ok(())
        });
        let second: Arc<dyn HeaderInterceptor> = Arc::new(|headers: &mut Metadata| -> Result<()> {
            headers.append("x-order", "second");
            Ok(())
        });
        let pool = ChannelPool::new(
            vec![first, second],
            factory(Arc::clone(&created), None, None),
        )
        .unwrap();

        pool.new_call(&METHOD_MUTATE_ROW, CallOptions::default())
            .start(request())
            .await
            .unwrap();

        let channel = Arc::clone(&created.lock()[0]);
        let headers = channel.headers.lock();
        let order: Vec<&str> = headers[0].get_all("x-order").collect();
        assert_eq!(order, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_interceptor_failure_aborts_start() {
        let created: Created = Arc::default();
        let failing: Arc<dyn HeaderInterceptor> = Arc::new(|_: &mut Metadata| -> Result<()> {
            Err(ClientError::HeaderInterceptor {
                reason: "credentials unavailable".to_string(),
            })
        });
        let factory = factory(Arc::clone(&created), None, None);
        let pool = ChannelPool::new(vec![failing], factory).unwrap();

        let err = pool
            .new_call(&METHOD_MUTATE_ROW, CallOptions::default())
            .start(request())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::HeaderInterceptor { .. }));
        assert_eq!(created.lock()[0].calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_exceeded() {
        let created: Created = Arc::default();
        let pool = ChannelPool::new(
            Vec::new(),
            factory(Arc::clone(&created), None, Some(Duration::from_secs(5))),
        )
        .unwrap();

        let err = pool
            .new_call(
                &METHOD_MUTATE_ROW,
                CallOptions::with_deadline(Duration::from_millis(10)),
            )
            .start(request())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), Some(StatusCode::DeadlineExceeded));
    }

    #[test]
    fn test_concurrent_growth_creates_each_channel_once() {
        let created: Created = Arc::default();
        let pool = pool_with(&created, None);

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| pool.ensure_channel_count(8).unwrap());
            }
        });

        assert_eq!(pool.size(), 8);
        assert_eq!(pool.available_count(), 8);
        assert_eq!(created.lock().len(), 8);
    }

    #[test]
    fn test_new_call_reports_method_and_authority() {
        let created: Created = Arc::default();
        let pool = pool_with(&created, None);
        let call = pool.new_call(&METHOD_MUTATE_ROW, CallOptions::default());
        assert!(std::ptr::eq(call.method(), &METHOD_MUTATE_ROW));
        assert_eq!(call.authority(), pool.authority());
    }
}

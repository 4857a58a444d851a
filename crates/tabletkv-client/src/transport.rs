//! Abstract transport layer for tabletkv RPCs.
//!
//! This module defines the [`Channel`] and [`ChannelFactory`] traits that the
//! channel pool is built on. Concrete implementations own the wire encoding and
//! the network connection; the pool only needs to start calls on them.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::protocol::{MethodDescriptor, RpcRequest, RpcResponse};

/// Outbound call metadata (headers), in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    entries: Vec<(String, String)>,
}

impl Metadata {
    /// Creates empty metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a header, keeping any previous value of the same key.
    pub fn append(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.push((key.into(), value.into()));
    }

    /// Sets a header, replacing every previous value of the same key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        self.entries.retain(|(k, _)| *k != key);
        self.entries.push((key, value.into()));
    }

    /// Returns the last value of a header.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Returns every value of a header in insertion order.
    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Iterates over all headers in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of header entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no headers.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Per-call options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallOptions {
    /// Deadline of a single attempt. `None` waits for the channel.
    pub deadline: Option<Duration>,
}

impl CallOptions {
    /// Options with a per-attempt deadline.
    pub fn with_deadline(deadline: Duration) -> Self {
        Self {
            deadline: Some(deadline),
        }
    }
}

/// A long-lived channel to one service endpoint.
///
/// Dropping the future returned by [`Channel::unary_call`] cancels the call.
#[async_trait]
pub trait Channel: Send + Sync + 'static {
    /// Authority (host:port) of the endpoint this channel routes to.
    fn authority(&self) -> &str;

    /// Sends one request and waits for its response.
    ///
    /// # Arguments
    /// * `method` - Identity of the remote method.
    /// * `options` - Per-call options.
    /// * `headers` - Outbound metadata, already decorated by the pool.
    /// * `request` - The request message.
    async fn unary_call(
        &self,
        method: &'static MethodDescriptor,
        options: &CallOptions,
        headers: Metadata,
        request: RpcRequest,
    ) -> Result<RpcResponse>;
}

impl fmt::Debug for dyn Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("authority", &self.authority())
            .finish()
    }
}

/// Creates new channels for the pool.
pub trait ChannelFactory: Send + Sync + 'static {
    /// Opens a new channel. Called synchronously by the pool.
    fn create(&self) -> std::io::Result<Arc<dyn Channel>>;
}

impl<F> ChannelFactory for F
where
    F: Fn() -> std::io::Result<Arc<dyn Channel>> + Send + Sync + 'static,
{
    fn create(&self) -> std::io::Result<Arc<dyn Channel>> {
        self()
    }
}

//! Header interceptors applied to every outbound call before it starts.

use crate::error::{ClientError, Result};
use crate::transport::Metadata;

/// Header carrying the client user agent.
pub const USER_AGENT_HEADER: &str = "user-agent";
/// Header carrying the resource (cluster or table) a call is scoped to.
pub const RESOURCE_PREFIX_HEADER: &str = "x-tabletkv-resource-prefix";

/// Decorates outbound call metadata.
///
/// Interceptors registered on a pool run in registration order. An error from
/// any of them aborts the start of the call.
pub trait HeaderInterceptor: Send + Sync {
    /// Updates the outbound headers of one call.
    fn update_headers(&self, headers: &mut Metadata) -> Result<()>;
}

impl<F> HeaderInterceptor for F
where
    F: Fn(&mut Metadata) -> Result<()> + Send + Sync,
{
    fn update_headers(&self, headers: &mut Metadata) -> Result<()> {
        self(headers)
    }
}

/// Prepends the client user agent to the `user-agent` header.
#[derive(Debug, Clone)]
pub struct UserAgentInterceptor {
    user_agent: String,
}

impl UserAgentInterceptor {
    /// Creates the interceptor. The user agent must not be empty.
    pub fn new(user_agent: impl Into<String>) -> Result<Self> {
        let user_agent = user_agent.into();
        if user_agent.trim().is_empty() {
            return Err(ClientError::MissingConfig {
                field: "user_agent",
            });
        }
        Ok(Self { user_agent })
    }
}

impl HeaderInterceptor for UserAgentInterceptor {
    fn update_headers(&self, headers: &mut Metadata) -> Result<()> {
        let value = match headers.get(USER_AGENT_HEADER) {
            Some(existing) => format!("{} {}", self.user_agent, existing),
            None => self.user_agent.clone(),
        };
        headers.insert(USER_AGENT_HEADER, value);
        Ok(())
    }
}

/// Sets a fixed header on every call.
#[derive(Debug, Clone)]
pub struct StaticHeaderInterceptor {
    key: String,
    value: String,
}

impl StaticHeaderInterceptor {
    /// Creates an interceptor setting `key: value`.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Interceptor scoping calls to a resource name.
    pub fn resource_prefix(resource: impl Into<String>) -> Self {
        Self::new(RESOURCE_PREFIX_HEADER, resource)
    }
}

impl HeaderInterceptor for StaticHeaderInterceptor {
    fn update_headers(&self, headers: &mut Metadata) -> Result<()> {
        headers.insert(self.key.clone(), self.value.clone());
        Ok(())
    }
}

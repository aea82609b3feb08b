//! Client configuration

use cirrus_core::retry::RetryPolicy;
use std::time::Duration;

/// Default dispatcher that hands out shard endpoints
pub const DEFAULT_DISPATCHER_URL: &str = "https://dispatcher.cloud.mail.ru";

/// Default client id sent with every download request
pub const DEFAULT_CLIENT_ID: &str = "cloud-win";

/// Default HTTP user agent
pub const DEFAULT_USER_AGENT: &str = concat!("cirrus/", env!("CARGO_PKG_VERSION"));

/// Settings for the read path
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the shard dispatcher
    pub dispatcher_url: String,

    /// Value of the `client_id` query parameter
    pub client_id: String,

    pub user_agent: String,

    /// Connect timeout, and the longest a download may go without receiving data
    pub timeout: Duration,

    /// How long a discovered shard list stays valid
    pub shard_cache_ttl: Duration,

    /// How long a banned endpoint stays excluded
    pub ban_ttl: Duration,

    /// Attempts made by `shard_info` before failing open
    pub shard_poll_attempts: u32,

    /// `shard_info` sleeps `shard_poll_step * i` before attempt `i`
    pub shard_poll_step: Duration,

    /// Retry policy for opening a ranged download
    pub download_retry: RetryPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            dispatcher_url: DEFAULT_DISPATCHER_URL.to_string(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: Duration::from_secs(15),
            shard_cache_ttl: Duration::from_secs(120),
            ban_ttl: Duration::from_secs(120),
            shard_poll_attempts: 10,
            shard_poll_step: Duration::from_millis(80),
            download_retry: RetryPolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Config for a dispatcher URL, other settings default
    pub fn new(dispatcher_url: impl Into<String>) -> Self {
        Self {
            dispatcher_url: dispatcher_url.into(),
            ..Default::default()
        }
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn with_download_retry(mut self, policy: RetryPolicy) -> Self {
        self.download_retry = policy;
        self
    }

    pub fn with_shard_polling(mut self, attempts: u32, step: Duration) -> Self {
        self.shard_poll_attempts = attempts;
        self.shard_poll_step = step;
        self
    }

    pub fn with_ban_ttl(mut self, ttl: Duration) -> Self {
        self.ban_ttl = ttl;
        self
    }
}

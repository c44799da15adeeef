//! Client configuration.
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::{Error, Result};

/// How the client fetches flag state from the upstream Flipt instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum FetchMode {
    /// Periodically poll the snapshot endpoint, revalidating with an ETag.
    #[default]
    Polling,
    /// Hold a long-lived connection and receive snapshots as they change.
    Streaming,
}

/// How the client serves evaluations while a synchronization error is
/// outstanding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ErrorStrategy {
    /// Refuse the call and return the stored synchronization error.
    #[default]
    Fail,
    /// Keep serving evaluations from the last known good snapshot.
    Fallback,
}

/// Authentication scheme used for requests to the upstream Flipt instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum Authentication {
    /// No authentication.
    #[default]
    None,
    /// Static client token, sent as `Authorization: Bearer {token}`.
    ClientToken(String),
    /// JWT, sent as `Authorization: JWT {token}`.
    JwtToken(String),
}

impl Authentication {
    /// The `Authorization` header value for this scheme, if any.
    pub(crate) fn header_value(&self) -> Option<String> {
        match self {
            Authentication::ClientToken(token) => Some(format!("Bearer {token}")),
            Authentication::JwtToken(token) => Some(format!("JWT {token}")),
            Authentication::None => None,
        }
    }
}

/// Configuration for [`Client`](crate::Client).
///
/// # Examples
/// ```
/// # use std::time::Duration;
/// use flipt_client::{ClientConfig, FetchMode};
///
/// let config = ClientConfig::new()
///     .url("http://localhost:8080")
///     .namespace("default")
///     .update_interval(Duration::from_secs(30))
///     .fetch_mode(FetchMode::Polling);
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub(crate) environment: String,
    pub(crate) namespace: String,
    pub(crate) url: String,
    pub(crate) reference: Option<String>,
    pub(crate) update_interval: Duration,
    pub(crate) request_timeout: Option<Duration>,
    pub(crate) authentication: Authentication,
    pub(crate) fetch_mode: FetchMode,
    pub(crate) error_strategy: ErrorStrategy,
}

impl Default for ClientConfig {
    fn default() -> ClientConfig {
        ClientConfig {
            environment: ClientConfig::DEFAULT_ENVIRONMENT.to_owned(),
            namespace: ClientConfig::DEFAULT_NAMESPACE.to_owned(),
            url: ClientConfig::DEFAULT_URL.to_owned(),
            reference: None,
            update_interval: ClientConfig::DEFAULT_UPDATE_INTERVAL,
            request_timeout: None,
            authentication: Authentication::None,
            fetch_mode: FetchMode::default(),
            error_strategy: ErrorStrategy::default(),
        }
    }
}

impl ClientConfig {
    /// Default environment to fetch flag state from.
    pub const DEFAULT_ENVIRONMENT: &'static str = "default";
    /// Default namespace to fetch flag state from.
    pub const DEFAULT_NAMESPACE: &'static str = "default";
    /// Default URL of the upstream Flipt instance.
    pub const DEFAULT_URL: &'static str = "http://localhost:8080";
    /// Default interval between snapshot fetches in polling mode.
    pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(120);

    /// Create a configuration with default settings.
    pub fn new() -> ClientConfig {
        ClientConfig::default()
    }

    /// Set the environment to fetch flag state from.
    pub fn environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    /// Set the namespace to fetch flag state from.
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the URL of the upstream Flipt instance.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Set the git reference to fetch flag state at.
    pub fn reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    /// Set how often new flag state is fetched in polling mode.
    pub fn update_interval(mut self, update_interval: Duration) -> Self {
        self.update_interval = update_interval;
        self
    }

    /// Set the per-request timeout. Only used in polling mode.
    pub fn request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = Some(request_timeout);
        self
    }

    /// Set the authentication scheme.
    pub fn authentication(mut self, authentication: Authentication) -> Self {
        self.authentication = authentication;
        self
    }

    /// Set how flag state is fetched.
    pub fn fetch_mode(mut self, fetch_mode: FetchMode) -> Self {
        self.fetch_mode = fetch_mode;
        self
    }

    /// Set how evaluations are served during a synchronization outage.
    pub fn error_strategy(mut self, error_strategy: ErrorStrategy) -> Self {
        self.error_strategy = error_strategy;
        self
    }

    /// Validate the configuration and normalize the URL.
    pub(crate) fn validated(mut self) -> Result<ClientConfig> {
        if self.namespace.is_empty() {
            return Err(Error::InvalidConfiguration(
                "namespace cannot be empty".into(),
            ));
        }

        if self.url.is_empty() {
            return Err(Error::InvalidConfiguration("url cannot be empty".into()));
        }

        Url::parse(&self.url)
            .map_err(|err| Error::InvalidConfiguration(format!("invalid url: {err}")))?;

        if self.fetch_mode == FetchMode::Polling {
            if self.update_interval < Duration::from_secs(1) {
                return Err(Error::InvalidConfiguration(
                    "update interval must be at least 1s".into(),
                ));
            }

            if let Some(timeout) = self.request_timeout {
                if timeout < Duration::from_secs(1) {
                    return Err(Error::InvalidConfiguration(
                        "request timeout must be at least 1s".into(),
                    ));
                }
            }
        }

        // Store the base URL without a trailing slash so endpoint paths can
        // be appended directly.
        while self.url.ends_with('/') {
            self.url.pop();
        }

        Ok(self)
    }
}

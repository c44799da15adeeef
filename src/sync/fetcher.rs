//! HTTP fetcher for namespace snapshots.
//!
//! One fetcher instance is built per client and reused for every request so
//! the underlying connection pool is shared between polling ticks (and
//! stream reconnects).
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, ETAG, IF_NONE_MATCH};
use reqwest::StatusCode;

use super::retry::{Backoff, MAX_RETRIES};
use crate::config::{ClientConfig, FetchMode};
use crate::{Error, Result};

static USER_AGENT: &str = concat!("flipt-client-rust/", env!("CARGO_PKG_VERSION"));

/// Server version whose snapshot wire format this client speaks.
const ACCEPT_SERVER_VERSION: &str = "1.47.0";

/// Outcome of one successful fetch, handed to the snapshot-apply task.
///
/// A revalidated fetch (HTTP 304) carries no payload: the apply task keeps
/// the engine untouched and only clears the error state.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SnapshotUpdate {
    pub(crate) payload: Option<Vec<u8>>,
    pub(crate) etag: Option<String>,
}

pub(crate) struct HttpFetcher {
    client: reqwest::Client,
    base_url: String,
    namespace: String,
    reference: Option<String>,
    headers: HeaderMap,
}

impl HttpFetcher {
    pub(crate) fn new(config: &ClientConfig) -> Result<HttpFetcher> {
        let mut builder = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .tcp_keepalive(Duration::from_secs(5))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(10));

        if config.fetch_mode == FetchMode::Polling {
            if let Some(timeout) = config.request_timeout {
                builder = builder.timeout(timeout);
            }
        }

        let client = builder
            .build()
            .map_err(|err| Error::InvalidConfiguration(format!("http client: {err}")))?;

        Ok(HttpFetcher {
            client,
            base_url: config.url.clone(),
            namespace: config.namespace.clone(),
            reference: config.reference.clone(),
            headers: base_headers(config)?,
        })
    }

    /// URL of the single-namespace snapshot endpoint used by polling (and
    /// the initial fetch).
    pub(crate) fn snapshot_url(&self) -> String {
        match &self.reference {
            Some(reference) => format!(
                "{}/internal/v1/evaluation/snapshot/namespace/{}?reference={}",
                self.base_url, self.namespace, reference
            ),
            None => format!(
                "{}/internal/v1/evaluation/snapshot/namespace/{}",
                self.base_url, self.namespace
            ),
        }
    }

    /// URL of the multi-namespace streaming endpoint.
    pub(crate) fn stream_url(&self) -> String {
        format!(
            "{}/internal/v1/evaluation/snapshots?[]namespaces={}",
            self.base_url, self.namespace
        )
    }

    /// One conditional fetch of the namespace snapshot.
    pub(crate) async fn fetch(&self, etag: Option<&str>) -> Result<SnapshotUpdate> {
        let mut headers = self.headers.clone();
        if let Some(etag) = etag {
            if let Ok(value) = HeaderValue::from_str(etag) {
                headers.insert(IF_NONE_MATCH, value);
            }
        }

        log::debug!(target: "flipt", url = self.snapshot_url().as_str(); "fetching snapshot");
        let response = self
            .client
            .get(self.snapshot_url())
            .headers(headers)
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_MODIFIED => Ok(SnapshotUpdate {
                payload: None,
                etag: etag.map(str::to_owned),
            }),
            StatusCode::OK => {
                let etag = response
                    .headers()
                    .get(ETAG)
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_owned);
                let payload = response.bytes().await?.to_vec();

                Ok(SnapshotUpdate {
                    payload: Some(payload),
                    etag,
                })
            }
            status => Err(Error::Server {
                status: status.as_u16(),
            }),
        }
    }

    /// Fetch with retry: transient failures back off and try again until the
    /// retry budget runs out, permanent failures surface immediately.
    pub(crate) async fn fetch_with_retry(&self, etag: Option<&str>) -> Result<SnapshotUpdate> {
        let mut backoff = Backoff::new();

        loop {
            match self.fetch(etag).await {
                Ok(update) => return Ok(update),
                Err(err) if err.is_transient() => {
                    log::warn!(target: "flipt", "transient fetch error: {err}");
                    if !backoff.next().await {
                        return Err(Error::RetriesExhausted {
                            attempts: MAX_RETRIES,
                            source: Box::new(err),
                        });
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Open the long-lived streaming connection. Status checking only; the
    /// caller consumes the body.
    pub(crate) async fn connect_stream(&self) -> Result<reqwest::Response> {
        let response = self
            .client
            .get(self.stream_url())
            .headers(self.headers.clone())
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(Error::Server {
                status: status.as_u16(),
            });
        }

        Ok(response)
    }
}

fn base_headers(config: &ClientConfig) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers.insert(
        "x-flipt-accept-server-version",
        HeaderValue::from_static(ACCEPT_SERVER_VERSION),
    );

    if !config.environment.is_empty() {
        headers.insert(
            "x-flipt-environment",
            HeaderValue::from_str(&config.environment).map_err(|_| {
                Error::InvalidConfiguration("environment is not a valid header value".into())
            })?,
        );
    }

    if let Some(authorization) = config.authentication.header_value() {
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&authorization).map_err(|_| {
                Error::InvalidConfiguration("authentication token is not a valid header value".into())
            })?,
        );
    }

    Ok(headers)
}

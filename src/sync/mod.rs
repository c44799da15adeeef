//! Background snapshot synchronization.
//!
//! The synchronizer keeps the engine's snapshot fresh by polling the
//! snapshot endpoint (with ETag revalidation) or holding a streaming
//! connection. Successful updates go to the snapshot channel; failures go to
//! the error channel. Neither failure mode terminates the loop — only the
//! shutdown signal does.
mod fetcher;
mod retry;
mod streaming;

use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use crate::config::{ClientConfig, FetchMode};
use crate::{Error, Result};

pub(crate) use fetcher::{HttpFetcher, SnapshotUpdate};
pub(crate) use retry::{Backoff, MAX_RETRIES};

/// Shared ETag slot: read by the polling loop to revalidate, written by the
/// apply task once an update lands.
pub(crate) type EtagState = Arc<RwLock<Option<String>>>;

pub(crate) struct Synchronizer {
    fetcher: HttpFetcher,
    namespace: String,
    mode: FetchMode,
    update_interval: Duration,
}

impl Synchronizer {
    pub(crate) fn new(config: &ClientConfig) -> Result<Synchronizer> {
        Ok(Synchronizer {
            fetcher: HttpFetcher::new(config)?,
            namespace: config.namespace.clone(),
            mode: config.fetch_mode,
            update_interval: config.update_interval,
        })
    }

    /// One synchronous fetch of the namespace snapshot, used to seed the
    /// engine before the background loops start. Always uses the polling
    /// endpoint, regardless of fetch mode.
    pub(crate) async fn initial_fetch(&self) -> Result<SnapshotUpdate> {
        self.fetcher.fetch_with_retry(None).await
    }

    /// Run the configured fetch loop until shutdown.
    pub(crate) async fn run(
        self,
        updates: mpsc::Sender<SnapshotUpdate>,
        errors: mpsc::Sender<Error>,
        etag: EtagState,
        shutdown: watch::Receiver<bool>,
    ) {
        match self.mode {
            FetchMode::Polling => self.poll(updates, errors, etag, shutdown).await,
            FetchMode::Streaming => self.stream(updates, errors, shutdown).await,
        }
    }

    async fn poll(
        self,
        updates: mpsc::Sender<SnapshotUpdate>,
        errors: mpsc::Sender<Error>,
        etag: EtagState,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let start = tokio::time::Instant::now() + self.update_interval;
        let mut ticker = tokio::time::interval_at(start, self.update_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => return,
                _ = ticker.tick() => {}
            }

            let revalidation = etag
                .read()
                .expect("thread holding etag lock should not panic")
                .clone();

            // dropping the in-flight request on shutdown cancels it
            let result = tokio::select! {
                _ = shutdown.changed() => return,
                result = self.fetcher.fetch_with_retry(revalidation.as_deref()) => result,
            };

            match result {
                Ok(update) => {
                    if updates.send(update).await.is_err() {
                        return;
                    }
                }
                Err(err) => {
                    log::warn!(target: "flipt", "snapshot poll failed: {err}");
                    let _ = errors.send(err).await;
                }
            }
        }
    }

    async fn stream(
        self,
        updates: mpsc::Sender<SnapshotUpdate>,
        errors: mpsc::Sender<Error>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut backoff = Backoff::new();

        loop {
            if *shutdown.borrow() {
                return;
            }

            let mut stream_shutdown = shutdown.clone();
            let result = tokio::select! {
                _ = shutdown.changed() => return,
                result = streaming::consume(
                    &self.fetcher,
                    &self.namespace,
                    &updates,
                    &mut stream_shutdown,
                ) => result,
            };

            match result {
                Ok(()) => {
                    // connection served to EOF; reconnect with a fresh
                    // retry budget
                    backoff.reset();
                }
                Err(err) if err.is_transient() => {
                    log::warn!(target: "flipt", "snapshot stream dropped: {err}");
                    if !backoff.next().await {
                        let _ = errors
                            .send(Error::RetriesExhausted {
                                attempts: MAX_RETRIES,
                                source: Box::new(err),
                            })
                            .await;
                        backoff.reset();
                    }
                }
                Err(err) => {
                    log::warn!(target: "flipt", "snapshot stream failed: {err}");
                    let _ = errors.send(err).await;
                    backoff.reset();
                }
            }
        }
    }
}

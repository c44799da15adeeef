//! Streaming snapshot updates.
//!
//! The streaming endpoint keeps one HTTP response open and writes
//! newline-delimited JSON chunks of the shape
//! `{"result": {"namespaces": {<ns>: <snapshot document>}}}`. Chunks may
//! arrive fragmented, and one JSON value may span several lines, so bytes
//! accumulate in a buffer that is re-parsed at every newline until a
//! complete value is available.
use std::collections::HashMap;

use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::{mpsc, watch};

use super::fetcher::{HttpFetcher, SnapshotUpdate};
use crate::{Error, Result};

#[derive(Deserialize)]
struct StreamChunk {
    result: StreamResult,
}

#[derive(Deserialize)]
struct StreamResult {
    namespaces: HashMap<String, serde_json::Value>,
}

/// Consume one streaming connection until EOF, a read error, or shutdown.
///
/// Payloads for `namespace` are forwarded to the apply channel; other
/// namespaces in the same chunk are ignored. Returns `Ok(())` on clean EOF
/// and on shutdown.
pub(crate) async fn consume(
    fetcher: &HttpFetcher,
    namespace: &str,
    updates: &mpsc::Sender<SnapshotUpdate>,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<()> {
    let response = fetcher.connect_stream().await?;
    let mut body = response.bytes_stream();

    let mut buffer: Vec<u8> = Vec::new();
    let mut pending: Vec<u8> = Vec::new();

    loop {
        let chunk = tokio::select! {
            _ = shutdown.changed() => return Ok(()),
            chunk = body.next() => chunk,
        };

        let chunk = match chunk {
            Some(Ok(chunk)) => chunk,
            Some(Err(err)) => return Err(Error::from(err)),
            // clean EOF; the caller decides whether to reconnect
            None => return Ok(()),
        };

        buffer.extend_from_slice(&chunk);

        while let Some(newline) = buffer.iter().position(|&byte| byte == b'\n') {
            let line: Vec<u8> = buffer.drain(..=newline).collect();
            pending.extend_from_slice(&line);

            let Ok(parsed) = serde_json::from_slice::<StreamChunk>(&pending) else {
                // not a complete JSON value yet; keep accumulating
                continue;
            };
            pending.clear();

            for (key, document) in parsed.result.namespaces {
                if key != namespace {
                    continue;
                }

                let payload = serde_json::to_vec(&document)
                    .map_err(|err| Error::InvalidSnapshot(err.to_string()))?;

                let update = SnapshotUpdate {
                    payload: Some(payload),
                    etag: None,
                };

                if updates.send(update).await.is_err() {
                    // apply task is gone; we're shutting down
                    return Ok(());
                }
            }
        }
    }
}

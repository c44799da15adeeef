//! The public evaluation client.
use std::mem;
use std::sync::{Arc, Mutex, RwLock};

use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::{ClientConfig, ErrorStrategy};
use crate::engine::{Engine, Envelope, Memory, ProtocolError, Region, RegionGuard, Status};
use crate::eval::{
    BatchEvaluationResponse, BooleanEvaluationResponse, EvaluationRequest, Flag,
    VariantEvaluationResponse,
};
use crate::sync::{EtagState, SnapshotUpdate, Synchronizer};
use crate::{Error, Result};

/// A client for evaluating Flipt feature flags against a locally synchronized
/// snapshot.
///
/// The client owns exactly one embedded [`Engine`] and keeps it fresh with
/// three background tasks: a fetch loop (polling or streaming), a
/// snapshot-apply task, and an error sink recording the last synchronization
/// failure. Construction performs one synchronous fetch-and-load, so a ready
/// client always has a snapshot; a failed initial fetch is fatal.
///
/// Evaluation calls are synchronous: they marshal the request across the
/// engine's call boundary and never touch the network. Because the engine is
/// a single stateful instance, all engine interactions (including reads) are
/// serialized behind one mutex; the critical section covers marshaling and
/// the engine call only.
///
/// # Examples
///
/// ```no_run
/// # async fn example() -> flipt_client::Result<()> {
/// use flipt_client::{Client, ClientConfig, EvaluationRequest};
///
/// let client = Client::new(ClientConfig::new().url("http://localhost:8080")).await?;
/// let response = client.evaluate_boolean(&EvaluationRequest {
///     flag_key: "my-flag".into(),
///     entity_id: "user-1".into(),
///     context: Default::default(),
/// })?;
/// println!("enabled: {}", response.enabled);
/// client.close().await;
/// # Ok(())
/// # }
/// ```
pub struct Client {
    engine: Arc<Mutex<Engine>>,
    error: Arc<RwLock<Option<Error>>>,
    error_strategy: ErrorStrategy,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Client {
    /// Construct a client: validate the configuration, perform the initial
    /// fetch-and-load, and start the background synchronization tasks.
    ///
    /// Must be called within a tokio runtime; the background tasks are
    /// spawned onto it.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidConfiguration`] for a bad configuration.
    /// - Any fetch or snapshot-parse error from the initial load.
    pub async fn new(config: ClientConfig) -> Result<Client> {
        let config = config.validated()?;
        let synchronizer = Synchronizer::new(&config)?;

        let initial = synchronizer.initial_fetch().await?;
        let payload = initial
            .payload
            .ok_or_else(|| Error::InvalidSnapshot("initial fetch returned no payload".into()))?;

        let engine = Arc::new(Mutex::new(Engine::new(&config.namespace, &payload)?));
        let error: Arc<RwLock<Option<Error>>> = Arc::new(RwLock::new(None));
        let etag: EtagState = Arc::new(RwLock::new(initial.etag));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (updates_tx, mut updates_rx) = mpsc::channel::<SnapshotUpdate>(1);
        let (errors_tx, mut errors_rx) = mpsc::channel::<Error>(1);

        let mut tasks = Vec::with_capacity(3);

        // error sink: records the last synchronization failure
        tasks.push(tokio::spawn({
            let error = error.clone();
            let mut shutdown = shutdown_rx.clone();
            async move {
                loop {
                    let err = tokio::select! {
                        _ = shutdown.changed() => return,
                        err = errors_rx.recv() => err,
                    };
                    let Some(err) = err else { return };

                    log::warn!(target: "flipt", "snapshot synchronization failed: {err}");
                    *error
                        .write()
                        .expect("thread holding error lock should not panic") = Some(err);
                }
            }
        }));

        // snapshot apply: marshals fetched payloads across the call boundary
        tasks.push(tokio::spawn({
            let engine = engine.clone();
            let error = error.clone();
            let etag = etag.clone();
            let mut shutdown = shutdown_rx.clone();
            async move {
                loop {
                    let update = tokio::select! {
                        _ = shutdown.changed() => return,
                        update = updates_rx.recv() => update,
                    };
                    let Some(update) = update else { return };

                    Client::apply(&engine, &error, &etag, update);
                }
            }
        }));

        // fetch loop, polling or streaming per the configuration
        tasks.push(tokio::spawn(synchronizer.run(
            updates_tx,
            errors_tx,
            etag,
            shutdown_rx,
        )));

        Ok(Client {
            engine,
            error,
            error_strategy: config.error_strategy,
            shutdown: shutdown_tx,
            tasks: Mutex::new(tasks),
        })
    }

    /// Evaluate a variant flag.
    pub fn evaluate_variant(
        &self,
        request: &EvaluationRequest,
    ) -> Result<VariantEvaluationResponse> {
        self.guard_strategy()?;
        let bytes = marshal(request)?;
        self.invoke(Engine::evaluate_variant, &bytes)
    }

    /// Evaluate a boolean flag.
    pub fn evaluate_boolean(
        &self,
        request: &EvaluationRequest,
    ) -> Result<BooleanEvaluationResponse> {
        self.guard_strategy()?;
        let bytes = marshal(request)?;
        self.invoke(Engine::evaluate_boolean, &bytes)
    }

    /// Evaluate a batch of requests. Unknown flag keys come back as per-item
    /// error entries; sibling requests still resolve.
    pub fn evaluate_batch(
        &self,
        requests: &[EvaluationRequest],
    ) -> Result<BatchEvaluationResponse> {
        self.guard_strategy()?;
        let bytes = marshal(&requests)?;
        self.invoke(Engine::evaluate_batch, &bytes)
    }

    /// List the flags of the configured namespace.
    pub fn list_flags(&self) -> Result<Vec<Flag>> {
        self.guard_strategy()?;

        let engine = self.lock_engine();
        let memory = engine.memory();
        let result = engine.list_flags()?;
        decode_result(memory, result)
    }

    /// The last synchronization error, if one is outstanding.
    pub fn err(&self) -> Option<Error> {
        self.error
            .read()
            .expect("thread holding error lock should not panic")
            .clone()
    }

    /// Shut down the background tasks and wait for them to exit.
    ///
    /// In-flight network operations are cancelled. The engine (and its
    /// memory) is released when the client itself is dropped. Calling
    /// `close` more than once is a no-op.
    pub async fn close(&self) {
        let _ = self.shutdown.send(true);

        let tasks = mem::take(
            &mut *self
                .tasks
                .lock()
                .expect("thread holding task list should not panic"),
        );
        for task in tasks {
            let _ = task.await;
        }
    }

    /// Apply one snapshot update to the engine.
    ///
    /// The validation token is recorded first; the error state is written
    /// while the engine lock is still held, so a `fail`-strategy check can
    /// never observe post-update data with a pre-update error state.
    fn apply(
        engine: &Mutex<Engine>,
        error: &RwLock<Option<Error>>,
        etag: &EtagState,
        update: SnapshotUpdate,
    ) {
        *etag
            .write()
            .expect("thread holding etag lock should not panic") = update.etag;

        let Some(payload) = update.payload else {
            // revalidated (304): data unchanged, the cycle still succeeded
            *error
                .write()
                .expect("thread holding error lock should not panic") = None;
            return;
        };

        let engine = engine
            .lock()
            .expect("thread holding engine lock should not panic");

        let result = Client::apply_payload(&engine, &payload);
        if let Err(err) = &result {
            log::warn!(target: "flipt", "snapshot apply failed: {err}");
        }

        *error
            .write()
            .expect("thread holding error lock should not panic") = result.err();
    }

    fn apply_payload(engine: &Engine, payload: &[u8]) -> Result<()> {
        let memory = engine.memory();
        let request = RegionGuard::new(memory, memory.store(payload));
        let result = RegionGuard::new(memory, engine.snapshot(request.region())?);

        let bytes = memory.read(result.region())?;
        let envelope: Envelope<serde_json::Value> = serde_json::from_slice(&bytes)
            .map_err(|err| ProtocolError::Envelope(err.to_string()))?;

        match envelope.status {
            Status::Success => Ok(()),
            Status::Failure => Err(Error::Engine(
                envelope
                    .error_message
                    .unwrap_or_else(|| "unknown engine failure".to_owned()),
            )),
        }
    }

    /// Marshal a request region, invoke an engine operation, and read back
    /// the result envelope. Request and result regions are released on every
    /// path by their guards.
    fn invoke<T: DeserializeOwned>(
        &self,
        op: fn(&Engine, Region) -> std::result::Result<Region, ProtocolError>,
        request_bytes: &[u8],
    ) -> Result<T> {
        let engine = self.lock_engine();
        let memory = engine.memory();

        let request = RegionGuard::new(memory, memory.store(request_bytes));
        let result = op(&engine, request.region())?;
        decode_result(memory, result)
    }

    fn lock_engine(&self) -> std::sync::MutexGuard<'_, Engine> {
        self.engine
            .lock()
            .expect("thread holding engine lock should not panic")
    }

    /// Under the `fail` strategy, refuse calls while a synchronization error
    /// is outstanding.
    fn guard_strategy(&self) -> Result<()> {
        if self.error_strategy == ErrorStrategy::Fail {
            if let Some(err) = self.err() {
                return Err(err);
            }
        }
        Ok(())
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        // stop the background tasks even if close() was never called
        let _ = self.shutdown.send(true);
    }
}

fn marshal<T: serde::Serialize>(request: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(request)
        .map_err(|err| ProtocolError::Envelope(err.to_string()).into())
}

fn decode_result<T: DeserializeOwned>(memory: &Memory, result: Region) -> Result<T> {
    let guard = RegionGuard::new(memory, result);
    let bytes = memory.read(guard.region())?;
    let envelope: Envelope<T> =
        serde_json::from_slice(&bytes).map_err(|err| ProtocolError::Envelope(err.to_string()))?;
    envelope.into_result()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::config::{ClientConfig, ErrorStrategy};
    use crate::eval::{ErrorEvaluationReason, EvaluationReason, ResponseType};

    const DOCUMENT: &str = r#"{
        "namespace": {"key": "default"},
        "flags": [
            {
                "key": "flag1",
                "name": "flag1",
                "type": "VARIANT_FLAG_TYPE",
                "enabled": true,
                "rules": [{
                    "id": "r1",
                    "rank": 1,
                    "segments": [{
                        "key": "seg1",
                        "matchType": "ANY_SEGMENT_MATCH_TYPE",
                        "constraints": [{
                            "type": "STRING_CONSTRAINT_COMPARISON_TYPE",
                            "property": "city_id", "operator": "eq", "value": "1"
                        }]
                    }],
                    "distributions": [{
                        "ruleId": "r1", "variantId": "v1", "variantKey": "var1", "rollout": 100
                    }]
                }]
            },
            {"key": "flag_boolean", "type": "BOOLEAN_FLAG_TYPE", "enabled": true}
        ]
    }"#;

    fn request(flag_key: &str, context: &[(&str, &str)]) -> EvaluationRequest {
        EvaluationRequest {
            flag_key: flag_key.into(),
            entity_id: "e1".into(),
            context: context
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    async fn snapshot_server(document: &str) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/internal/v1/evaluation/snapshot/namespace/default"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("etag", "v1")
                    .set_body_string(document),
            )
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn evaluates_variant_boolean_batch_and_list() {
        let _ = env_logger::builder().is_test(true).try_init();

        let server = snapshot_server(DOCUMENT).await;
        let client = Client::new(ClientConfig::new().url(server.uri()))
            .await
            .expect("client constructs");

        let variant = client
            .evaluate_variant(&request("flag1", &[("city_id", "1")]))
            .expect("variant evaluation succeeds");
        assert!(variant.matched);
        assert_eq!(variant.variant_key, "var1");
        assert_eq!(variant.reason, EvaluationReason::Match);

        let boolean = client
            .evaluate_boolean(&request("flag_boolean", &[]))
            .expect("boolean evaluation succeeds");
        assert!(boolean.enabled);
        assert_eq!(boolean.reason, EvaluationReason::Default);

        let batch = client
            .evaluate_batch(&[
                request("flag1", &[("city_id", "1")]),
                request("missing", &[]),
            ])
            .expect("batch evaluation succeeds");
        assert_eq!(batch.responses.len(), 2);
        assert_eq!(batch.responses[0].kind, ResponseType::Variant);
        assert_eq!(batch.responses[1].kind, ResponseType::Error);
        assert_eq!(
            batch.responses[1]
                .error_evaluation_response
                .as_ref()
                .expect("error entry")
                .reason,
            ErrorEvaluationReason::NotFound
        );

        let flags = client.list_flags().expect("list succeeds");
        assert_eq!(flags.len(), 2);
        assert_eq!(flags[0].key, "flag1");
        assert_eq!(flags[1].key, "flag_boolean");

        client.close().await;
    }

    #[tokio::test]
    async fn construction_fails_when_the_initial_fetch_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/internal/v1/evaluation/snapshot/namespace/default"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let result = Client::new(ClientConfig::new().url(server.uri())).await;
        assert!(matches!(result, Err(Error::Server { status: 404 })));
    }

    #[tokio::test]
    async fn construction_fails_on_a_malformed_initial_snapshot() {
        let server = snapshot_server("not json").await;
        let result = Client::new(ClientConfig::new().url(server.uri())).await;
        assert!(matches!(result, Err(Error::InvalidSnapshot(_))));
    }

    #[tokio::test]
    async fn unknown_flag_is_an_engine_error() {
        let server = snapshot_server(DOCUMENT).await;
        let client = Client::new(ClientConfig::new().url(server.uri()))
            .await
            .expect("client constructs");

        let result = client.evaluate_variant(&request("missing", &[]));
        match result {
            Err(Error::Engine(message)) => assert!(message.contains("missing")),
            other => panic!("expected an engine error, got {other:?}"),
        }

        client.close().await;
    }

    #[tokio::test]
    async fn fail_strategy_refuses_calls_during_an_outage() {
        let server = MockServer::start().await;
        // first fetch succeeds, everything after fails permanently
        Mock::given(method("GET"))
            .and(path("/internal/v1/evaluation/snapshot/namespace/default"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("etag", "v1")
                    .set_body_string(DOCUMENT),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/internal/v1/evaluation/snapshot/namespace/default"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = Client::new(
            ClientConfig::new()
                .url(server.uri())
                .update_interval(Duration::from_secs(1))
                .error_strategy(ErrorStrategy::Fail),
        )
        .await
        .expect("client constructs");

        // healthy until the first failed poll lands
        assert!(client.evaluate_boolean(&request("flag_boolean", &[])).is_ok());

        tokio::time::timeout(Duration::from_secs(10), async {
            while client.err().is_none() {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await
        .expect("synchronization error shows up");

        let result = client.evaluate_boolean(&request("flag_boolean", &[]));
        assert!(matches!(result, Err(Error::Server { status: 404 })));

        client.close().await;
    }

    #[tokio::test]
    async fn fallback_strategy_serves_the_last_good_snapshot() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/internal/v1/evaluation/snapshot/namespace/default"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("etag", "v1")
                    .set_body_string(DOCUMENT),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/internal/v1/evaluation/snapshot/namespace/default"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = Client::new(
            ClientConfig::new()
                .url(server.uri())
                .update_interval(Duration::from_secs(1))
                .error_strategy(ErrorStrategy::Fallback),
        )
        .await
        .expect("client constructs");

        tokio::time::timeout(Duration::from_secs(10), async {
            while client.err().is_none() {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await
        .expect("synchronization error shows up");

        // the outage is recorded, but evaluations keep working
        let response = client
            .evaluate_variant(&request("flag1", &[("city_id", "1")]))
            .expect("fallback serves the last good snapshot");
        assert!(response.matched);

        client.close().await;
    }

    #[tokio::test]
    async fn a_successful_refresh_clears_the_error_state() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/internal/v1/evaluation/snapshot/namespace/default"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("etag", "v1")
                    .set_body_string(DOCUMENT),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        // one transient-turned-permanent failure, then healthy again
        Mock::given(method("GET"))
            .and(path("/internal/v1/evaluation/snapshot/namespace/default"))
            .respond_with(ResponseTemplate::new(404))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/internal/v1/evaluation/snapshot/namespace/default"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("etag", "v2")
                    .set_body_string(DOCUMENT),
            )
            .mount(&server)
            .await;

        let client = Client::new(
            ClientConfig::new()
                .url(server.uri())
                .update_interval(Duration::from_secs(1)),
        )
        .await
        .expect("client constructs");

        tokio::time::timeout(Duration::from_secs(10), async {
            while client.err().is_none() {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await
        .expect("synchronization error shows up");

        tokio::time::timeout(Duration::from_secs(10), async {
            while client.err().is_some() {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await
        .expect("error state clears after the next good refresh");

        assert!(client.evaluate_boolean(&request("flag_boolean", &[])).is_ok());

        client.close().await;
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let server = snapshot_server(DOCUMENT).await;
        let client = Client::new(ClientConfig::new().url(server.uri()))
            .await
            .expect("client constructs");

        client.close().await;
        client.close().await;
    }

    #[tokio::test]
    async fn boundary_calls_leave_no_live_regions() {
        let server = snapshot_server(DOCUMENT).await;
        let client = Client::new(ClientConfig::new().url(server.uri()))
            .await
            .expect("client constructs");

        let _ = client.evaluate_variant(&request("flag1", &[("city_id", "1")]));
        let _ = client.evaluate_variant(&request("missing", &[])); // error path
        let _ = client.evaluate_batch(&[request("flag1", &[])]);
        let _ = client.list_flags();

        let engine = client.lock_engine();
        assert_eq!(engine.memory().allocated(), 0);
        drop(engine);

        client.close().await;
    }

    #[tokio::test]
    async fn context_round_trips_through_the_boundary() {
        let server = snapshot_server(DOCUMENT).await;
        let client = Client::new(ClientConfig::new().url(server.uri()))
            .await
            .expect("client constructs");

        let mut context = HashMap::new();
        context.insert("city_id".to_string(), "2".to_string());
        let response = client
            .evaluate_variant(&EvaluationRequest {
                flag_key: "flag1".into(),
                entity_id: "e1".into(),
                context,
            })
            .expect("evaluation succeeds");
        assert!(!response.matched);

        client.close().await;
    }
}

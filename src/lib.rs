//! `flipt-client` is a client-side evaluation SDK for Flipt feature flags:
//! it keeps a local snapshot of flag state fresh in the background and
//! answers evaluations from it, without a network round-trip per call.
//! Identical snapshot and input always produce the identical result, across
//! runs, processes and host languages.
//!
//! # Overview
//!
//! [`Client`] is the public surface. It owns one embedded evaluation
//! [`Engine`](engine::Engine), performs an initial fetch-and-load at
//! construction, and starts the background synchronization tasks. Evaluation
//! calls ([`Client::evaluate_variant`], [`Client::evaluate_boolean`],
//! [`Client::evaluate_batch`], [`Client::list_flags`]) are synchronous and
//! marshal their payloads across the engine's call boundary.
//!
//! [`engine::Engine`] is the boundary host bindings drive: byte regions in,
//! result envelopes out, with explicit allocate/release semantics modeled by
//! [`engine::Memory`] and [`engine::RegionGuard`].
//!
//! [`snapshot`] holds the data layer: the wire
//! [`Document`](snapshot::source::Document) schema, the denormalized
//! [`Namespace`](snapshot::Namespace) evaluation model, and the
//! [`SnapshotStore`](snapshot::SnapshotStore) — a thread-safe map that
//! replaces namespaces atomically, so a reader observes the fully-old or
//! fully-new snapshot for a key, never a mix.
//!
//! [`eval`] implements the evaluation semantics: typed constraint matching,
//! CRC-32 bucketing for percentage rollouts and variant distributions, and
//! the rule/rollout state machine.
//!
//! The synchronizer (internal) fetches snapshots by polling with ETag
//! revalidation or over a streaming connection, retries transient failures
//! with jittered exponential backoff, and hands updates to the apply task.
//! Whether a synchronization outage fails calls or falls back to the last
//! good snapshot is controlled by [`ErrorStrategy`].

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod engine;
pub mod eval;
pub mod snapshot;

mod client;
mod config;
mod error;
mod sync;

pub use client::Client;
pub use config::{Authentication, ClientConfig, ErrorStrategy, FetchMode};
pub use error::{Error, Result};
pub use eval::{
    BatchEvaluationResponse, BatchResponse, BooleanEvaluationResponse, ErrorEvaluationReason,
    ErrorEvaluationResponse, EvaluationReason, EvaluationRequest, Flag, ResponseType,
    VariantEvaluationResponse,
};

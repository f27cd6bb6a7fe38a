//! Error types surfaced to the host.
//!
//! Every failure ends up on the channel, either as a `response{ok:false}` or
//! as a streaming `error{id}` message. Nothing is swallowed inside the worker.

use oxrdfio::RdfParseError;
use thiserror::Error;

/// Malformed envelope, unknown command or bad payload shape.
///
/// Protocol errors never mutate worker state.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown or malformed message: {0}")]
    Malformed(String),
    #[error("{term} is not allowed in {position} position")]
    TermPosition {
        term: &'static str,
        position: &'static str,
    },
    #[error("invalid IRI: {0}")]
    InvalidIri(String),
    #[error("invalid graph name: {0}")]
    InvalidGraphName(String),
    #[error("{0}")]
    BadPayload(String),
}

/// Failure while turning bytes into quads.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("unable to resolve an RDF media type for this document")]
    UnresolvableFormat,
    #[error("unsupported export format: {0}")]
    UnsupportedExportFormat(String),
    #[error(transparent)]
    Parse(#[from] RdfParseError),
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("load cancelled by host")]
    Cancelled,
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("serialization failed: {0}")]
    Serialize(#[from] std::io::Error),
}

/// Network-level failure raised by a [`DocumentFetcher`](crate::ingest::DocumentFetcher).
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} timed out after {timeout_ms}ms")]
    Timeout { url: String, timeout_ms: u64 },
    #[error("request to {url} failed: {message}")]
    Http { url: String, message: String },
    #[error("invalid URL {url}: {message}")]
    InvalidUrl { url: String, message: String },
}

/// Failure inside the reasoner harness.
///
/// Per-ruleset fetch and parse failures are reported as stages and do not
/// abort the run; these errors cover the run-level failures.
#[derive(Debug, Error)]
pub enum ReasonerError {
    #[error("reasoning aborted: {0}")]
    Aborted(String),
    #[error("rule guard tripped: {0}")]
    GuardTripped(String),
}

/// Top-level worker error, converted into the host-facing error string.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Ingest(#[from] IngestError),
    #[error(transparent)]
    Reasoner(#[from] ReasonerError),
}

//! Telemetry metric name constants.
//!
//! Centralised metric names for muninn operations. The daemon (or an
//! embedding application) installs its own `metrics` recorder; without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `muninn_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `outcome`: request outcome: "ok", "cached", "streamed", "denied", "rejected" or "error"
//! - `model`: backend model name (e.g. "llama3.1:8b")
//! - `status`: backend call status: "ok" or "error"
//! - `language`: executed code language: "python" or "shell"

/// Total gateway requests handled.
///
/// Labels: `outcome`.
pub const REQUESTS_TOTAL: &str = "muninn_requests_total";

/// Gateway request duration in seconds (buffered requests only).
pub const REQUEST_DURATION_SECONDS: &str = "muninn_request_duration_seconds";

/// Total requests rejected by the rate limiter.
pub const ADMISSIONS_DENIED_TOTAL: &str = "muninn_admissions_denied_total";

/// Total response cache hits.
pub const CACHE_HITS_TOTAL: &str = "muninn_cache_hits_total";

/// Total response cache misses (including expired reads).
pub const CACHE_MISSES_TOTAL: &str = "muninn_cache_misses_total";

/// Total snapshot writes of the response cache.
///
/// Labels: `status` ("ok" | "error").
pub const CACHE_FLUSHES_TOTAL: &str = "muninn_cache_flushes_total";

/// Total calls made to the inference backend.
///
/// Labels: `model`, `status` ("ok" | "error").
pub const BACKEND_REQUESTS_TOTAL: &str = "muninn_backend_requests_total";

/// Total stream chunks relayed to clients.
pub const STREAM_CHUNKS_TOTAL: &str = "muninn_stream_chunks_total";

/// Total code executions attempted.
///
/// Labels: `language`, `outcome` ("ok" | "failed" | "denied" | "timeout").
pub const EXECUTIONS_TOTAL: &str = "muninn_executions_total";

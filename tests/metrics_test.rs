//! Tests for metrics integration.
//!
//! Uses `metrics_util::debugging::DebuggingRecorder` to capture and assert
//! on emitted metrics without needing a real exporter.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream;
use metrics_util::MetricKind;
use metrics_util::debugging::{DebugValue, DebuggingRecorder};

use muninn::limiter::RateLimitConfig;
use muninn::providers::InferenceBackend;
use muninn::telemetry;
use muninn::types::{ChunkStream, Completion, CompletionRequest};
use muninn::{GatewayRequest, Muninn, MuninnError, RequestGateway, Result};

// ============================================================================
// Mock backends
// ============================================================================

struct EchoBackend;

#[async_trait]
impl InferenceBackend for EchoBackend {
    fn name(&self) -> &str {
        "echo"
    }

    async fn generate(&self, request: &CompletionRequest) -> Result<Completion> {
        Ok(Completion {
            content: format!("echo: {}", request.prompt),
            model: request.model.clone(),
            token_count: 1,
            cost: 0.0,
            error: None,
        })
    }

    async fn generate_stream(&self, _request: &CompletionRequest) -> Result<ChunkStream> {
        Ok(Box::pin(stream::iter(vec![Ok("echo".to_string())])))
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        Ok(vec!["echo".to_string()])
    }
}

struct DownBackend;

#[async_trait]
impl InferenceBackend for DownBackend {
    fn name(&self) -> &str {
        "down"
    }

    async fn generate(&self, _request: &CompletionRequest) -> Result<Completion> {
        Err(MuninnError::Upstream("connection refused".into()))
    }

    async fn generate_stream(&self, _request: &CompletionRequest) -> Result<ChunkStream> {
        Err(MuninnError::Upstream("connection refused".into()))
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        Err(MuninnError::Upstream("connection refused".into()))
    }
}

fn gateway(backend: Arc<dyn InferenceBackend>) -> RequestGateway {
    Muninn::builder()
        .backend(backend)
        .without_executor()
        .rate_limit(RateLimitConfig::new().max_requests(2))
        .build()
        .unwrap()
}

// ============================================================================
// Snapshot type alias for readability
// ============================================================================

type SnapshotVec = Vec<(
    metrics_util::CompositeKey,
    Option<metrics::Unit>,
    Option<metrics::SharedString>,
    DebugValue,
)>;

// ============================================================================
// Helpers
// ============================================================================

/// Sum all counter values matching a given metric name.
fn counter_total(snapshot: &SnapshotVec, name: &str) -> u64 {
    snapshot
        .iter()
        .filter(|(key, _, _, _)| key.kind() == MetricKind::Counter && key.key().name() == name)
        .map(|(_, _, _, value)| match value {
            DebugValue::Counter(v) => *v,
            _ => 0,
        })
        .sum()
}

/// Counter value for `name` carrying `label = value`.
fn counter_with_label(snapshot: &SnapshotVec, name: &str, label: &str, value: &str) -> u64 {
    snapshot
        .iter()
        .filter(|(key, _, _, _)| {
            key.kind() == MetricKind::Counter
                && key.key().name() == name
                && key
                    .key()
                    .labels()
                    .any(|l| l.key() == label && l.value() == value)
        })
        .map(|(_, _, _, v)| match v {
            DebugValue::Counter(v) => *v,
            _ => 0,
        })
        .sum()
}

/// Check if any histogram entries exist for a given metric name.
fn has_histogram(snapshot: &SnapshotVec, name: &str) -> bool {
    snapshot
        .iter()
        .any(|(key, _, _, _)| key.kind() == MetricKind::Histogram && key.key().name() == name)
}

// ============================================================================
// Tests
// ============================================================================

/// Runs async code within a local recorder scope on the multi-thread runtime.
///
/// `block_in_place` ensures the sync `with_local_recorder` closure stays
/// on the current thread while `block_on` drives the inner async work.
#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn request_miss_then_hit_records_metrics() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    let gw = gateway(Arc::new(EchoBackend));

    metrics::with_local_recorder(&recorder, || {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async {
                gw.handle(GatewayRequest::text("alice", "2+2?")).await.unwrap();
                gw.handle(GatewayRequest::text("alice", "2+2?")).await.unwrap();
            })
        })
    });

    let snapshot = snapshotter.snapshot().into_vec();

    assert_eq!(counter_total(&snapshot, telemetry::REQUESTS_TOTAL), 2);
    assert_eq!(
        counter_with_label(&snapshot, telemetry::REQUESTS_TOTAL, "outcome", "ok"),
        1
    );
    assert_eq!(
        counter_with_label(&snapshot, telemetry::REQUESTS_TOTAL, "outcome", "cached"),
        1
    );
    assert_eq!(counter_total(&snapshot, telemetry::CACHE_MISSES_TOTAL), 1);
    assert_eq!(counter_total(&snapshot, telemetry::CACHE_HITS_TOTAL), 1);
    assert!(
        has_histogram(&snapshot, telemetry::REQUEST_DURATION_SECONDS),
        "expected a duration histogram entry"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn denied_request_records_admission_metrics() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    let gw = gateway(Arc::new(EchoBackend));

    metrics::with_local_recorder(&recorder, || {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async {
                for text in ["one", "two", "three"] {
                    let _ = gw.handle(GatewayRequest::text("bob", text)).await;
                }
            })
        })
    });

    let snapshot = snapshotter.snapshot().into_vec();

    assert_eq!(counter_total(&snapshot, telemetry::ADMISSIONS_DENIED_TOTAL), 1);
    assert_eq!(
        counter_with_label(&snapshot, telemetry::REQUESTS_TOTAL, "outcome", "denied"),
        1
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn degraded_reply_counts_as_ok_outcome() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    let gw = gateway(Arc::new(DownBackend));

    let reply = metrics::with_local_recorder(&recorder, || {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current()
                .block_on(async { gw.handle(GatewayRequest::text("carol", "hi")).await })
        })
    });
    assert!(reply.is_ok(), "degraded replies are still successes");

    let snapshot = snapshotter.snapshot().into_vec();

    assert_eq!(
        counter_with_label(&snapshot, telemetry::REQUESTS_TOTAL, "outcome", "ok"),
        1
    );
    // nothing cached, nothing hit
    assert_eq!(counter_total(&snapshot, telemetry::CACHE_HITS_TOTAL), 0);
}

#[tokio::test]
async fn metrics_are_noop_without_recorder() {
    // Verify no panics when no recorder is installed.
    let gw = gateway(Arc::new(EchoBackend));
    gw.handle(GatewayRequest::text("dave", "hello")).await.unwrap();
}

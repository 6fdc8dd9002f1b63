use lazy_static::lazy_static;
use prometheus::{Histogram, HistogramOpts, IntCounterVec, IntGauge, Opts, Registry};
use std::sync::Once;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    pub static ref PREDICTIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("predictions_total", "Total number of prediction requests by outcome"),
        &["status"]
    ).unwrap();

    pub static ref PREDICTION_ERRORS: IntCounterVec = IntCounterVec::new(
        Opts::new("prediction_errors_total", "Total number of failed predictions by error category"),
        &["category"]
    ).unwrap();

    // Wall time of the inference subprocess, launch to reap
    pub static ref INFERENCE_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "inference_duration_seconds",
            "Inference subprocess duration in seconds"
        )
        .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0])
    ).unwrap();

    pub static ref EPHEMERAL_ARTIFACTS_LIVE: IntGauge = IntGauge::new(
        "ephemeral_artifacts_live",
        "Number of request-scoped temp files currently on disk"
    ).unwrap();
}

static INIT: Once = Once::new();

/// Initialize metrics registry (safe to call more than once)
pub fn init_metrics() {
    INIT.call_once(|| {
        REGISTRY.register(Box::new(PREDICTIONS_TOTAL.clone())).unwrap();
        REGISTRY.register(Box::new(PREDICTION_ERRORS.clone())).unwrap();
        REGISTRY.register(Box::new(INFERENCE_DURATION.clone())).unwrap();
        REGISTRY.register(Box::new(EPHEMERAL_ARTIFACTS_LIVE.clone())).unwrap();

        tracing::info!("Metrics registry initialized with {} collectors", REGISTRY.gather().len());
    });
}

/// Export metrics in Prometheus format
pub fn export_metrics() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

//! Prometheus metrics HTTP endpoint
//!
//! Exposes engine metrics in Prometheus text format at /metrics and a
//! liveness probe at /health. Uses hyper for the HTTP server.

use crate::infra::metrics::{Metrics, MetricsTotals, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with site label
fn write_metric(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    site: &str,
    val: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

/// Write a counter split by a single label
fn write_labeled_counter(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    label: &str,
    values: &[(&str, u64)],
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} counter");
    for (value, count) in values {
        let _ = writeln!(output, "{name}{{site=\"{site}\",{label}=\"{value}\"}} {count}");
    }
}

/// Write a histogram metric with cumulative buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    bounds: &[u64; 10],
    sum: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in bounds.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"+Inf\"}} {cumulative}");
    let _ = writeln!(output, "{name}_sum{{site=\"{site}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{site=\"{site}\"}} {cumulative}");
}

/// Format metrics in Prometheus text exposition format
fn format_prometheus_metrics(metrics: &Metrics, site_id: &str) -> String {
    let totals = metrics.totals();
    let mut output = String::with_capacity(4096);

    write_batch_metrics(&mut output, site_id, &totals);
    write_position_metrics(&mut output, site_id, &totals);
    write_event_metrics(&mut output, site_id, &totals);
    write_zone_metrics(&mut output, site_id, &totals);

    output
}

fn write_batch_metrics(output: &mut String, site: &str, totals: &MetricsTotals) {
    write_metric(
        output,
        "geofence_batches_total",
        "Processing batches run",
        MetricType::Counter,
        site,
        totals.batches_total,
    );
    write_metric(
        output,
        "geofence_batches_failed_total",
        "Batches abandoned because the position source or zone registry was unavailable",
        MetricType::Counter,
        site,
        totals.batches_failed,
    );
    write_histogram(
        output,
        "geofence_batch_duration_ms",
        "Batch processing time in milliseconds",
        site,
        &totals.batch_buckets,
        &METRICS_BUCKET_BOUNDS,
        totals.batch_sum_ms,
    );
}

fn write_position_metrics(output: &mut String, site: &str, totals: &MetricsTotals) {
    write_labeled_counter(
        output,
        "geofence_positions_total",
        "Position outcomes",
        site,
        "outcome",
        &[
            ("processed", totals.positions_processed),
            ("failed", totals.positions_failed),
            ("malformed", totals.positions_malformed),
        ],
    );
    write_metric(
        output,
        "geofence_positions_stuck_total",
        "Positions that reached the retry attempt threshold",
        MetricType::Counter,
        site,
        totals.positions_stuck,
    );
}

fn write_event_metrics(output: &mut String, site: &str, totals: &MetricsTotals) {
    write_labeled_counter(
        output,
        "geofence_events_total",
        "Zone events emitted",
        site,
        "type",
        &[
            ("enter", totals.events_enter),
            ("exit", totals.events_exit),
            ("dwell", totals.events_dwell),
        ],
    );
    write_metric(
        output,
        "geofence_dwell_suppressed_total",
        "Dwell events withheld by the suppression window",
        MetricType::Counter,
        site,
        totals.dwell_suppressed,
    );
}

fn write_zone_metrics(output: &mut String, site: &str, totals: &MetricsTotals) {
    write_metric(
        output,
        "geofence_active_zones",
        "Zones in the most recent snapshot",
        MetricType::Gauge,
        site,
        totals.active_zones,
    );
    write_metric(
        output,
        "geofence_zones_skipped_total",
        "Zone definitions skipped for malformed geometry, counted per batch",
        MetricType::Counter,
        site,
        totals.zones_skipped,
    );
}

fn text_response(status: StatusCode, content_type: &'static str, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
    site_id: Arc<String>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => text_response(
            StatusCode::OK,
            "text/plain; version=0.0.4; charset=utf-8",
            format_prometheus_metrics(&metrics, &site_id),
        ),
        (&Method::GET, "/health") => {
            text_response(StatusCode::OK, "text/plain", "ok".to_string())
        }
        _ => text_response(StatusCode::NOT_FOUND, "text/plain", "Not Found".to_string()),
    };
    Ok(response)
}

/// Start the Prometheus metrics HTTP server
pub async fn start_metrics_server(
    port: u16,
    metrics: Arc<Metrics>,
    site_id: String,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    let site_id = Arc::new(site_id);

    info!(port = %port, site = %site_id, "prometheus_metrics_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let metrics = metrics.clone();
                        let site_id = site_id.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let metrics = metrics.clone();
                                let site_id = site_id.clone();
                                async move { handle_request(req, metrics, site_id).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "prometheus_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "prometheus_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("prometheus_metrics_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::EventType;

    #[test]
    fn test_format_prometheus_metrics() {
        let metrics = Metrics::new();
        metrics.record_batch(12);
        metrics.record_batch(30);
        metrics.record_event(EventType::Enter);
        metrics.record_event(EventType::Dwell);
        metrics.record_position_malformed();

        let output = format_prometheus_metrics(&metrics, "fleet");

        assert!(output.contains("geofence_batches_total{site=\"fleet\"} 2"));
        assert!(output.contains("geofence_batch_duration_ms_bucket{site=\"fleet\",le=\"+Inf\"} 2"));
        assert!(output.contains("geofence_batch_duration_ms_sum{site=\"fleet\"} 42"));
        assert!(output.contains("geofence_events_total{site=\"fleet\",type=\"enter\"} 1"));
        assert!(output.contains("geofence_events_total{site=\"fleet\",type=\"exit\"} 0"));
        assert!(output.contains("geofence_positions_total{site=\"fleet\",outcome=\"malformed\"} 1"));
    }

    #[test]
    fn test_scrape_does_not_reset_histogram() {
        let metrics = Metrics::new();
        metrics.record_batch(3);
        let _ = format_prometheus_metrics(&metrics, "fleet");
        let output = format_prometheus_metrics(&metrics, "fleet");
        assert!(output.contains("geofence_batch_duration_ms_count{site=\"fleet\"} 1"));
    }
}

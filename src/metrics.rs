use prometheus::{Encoder, TextEncoder, Gauge, Histogram, HistogramOpts, IntCounterVec, Opts, Registry};
use warp::Filter;
use warp::http::{header::CONTENT_TYPE, HeaderValue, Response, StatusCode};
use std::net::SocketAddr;
use once_cell::sync::{Lazy, OnceCell};
use anyhow::Result;
use tracing::error;

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

static LATENCY_GAUGE: Lazy<Gauge> = Lazy::new(|| {
    let opts = Opts::new("ping_connect_latency_milliseconds_current", "Latency of the latest successful connect in milliseconds");
    let gauge = Gauge::with_opts(opts).expect("valid gauge opts");
    REGISTRY.register(Box::new(gauge.clone())).expect("gauge registered once");
    gauge
});

static CHECK_COUNTER: Lazy<IntCounterVec> = Lazy::new(|| {
    let opts = Opts::new("ping_checks_total", "Total number of reachability checks by outcome");
    let ctr = IntCounterVec::new(opts, &["outcome"]).expect("valid counter opts");
    REGISTRY.register(Box::new(ctr.clone())).expect("counter registered once");
    ctr
});

// Only set when latency history is enabled at startup
static LATENCY_HIST: OnceCell<Histogram> = OnceCell::new();

pub fn initialize_metrics(enable_latency_history: bool) -> Result<()> {
    Lazy::force(&LATENCY_GAUGE);
    Lazy::force(&CHECK_COUNTER);

    if enable_latency_history {
        let opts = HistogramOpts::new("ping_connect_latency_milliseconds", "Connect latency in milliseconds")
            .buckets(vec![
                0.05, 0.1, 0.2, 0.5, 1.0,
                2.0, 5.0, 10.0, 20.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0
            ]);
        let hist = Histogram::with_opts(opts)?;
        REGISTRY.register(Box::new(hist.clone()))?;
        LATENCY_HIST
            .set(hist)
            .map_err(|_| anyhow::anyhow!("latency histogram already initialized"))?;
    }
    Ok(())
}

pub async fn serve_metrics(addr: SocketAddr) {
    let metrics_route = warp::path!("metrics").and(warp::get()).map(render_metrics);
    warp::serve(metrics_route).run(addr).await;
}

fn render_metrics() -> Response<Vec<u8>> {
    let encoder = TextEncoder::new();
    let mf = REGISTRY.gather();
    let mut buf = Vec::new();
    let mut resp = match encoder.encode(&mf, &mut buf) {
        Ok(()) => Response::new(buf),
        Err(e) => {
            error!("failed to encode metrics: {:?}", e);
            let mut resp = Response::new(Vec::new());
            *resp.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            return resp;
        }
    };
    if let Ok(value) = HeaderValue::from_str(encoder.format_type()) {
        resp.headers_mut().insert(CONTENT_TYPE, value);
    }
    resp
}

pub fn observe_latency(latency_ms: f64) {
    LATENCY_GAUGE.set(latency_ms);

    if let Some(hist) = LATENCY_HIST.get() {
        hist.observe(latency_ms);
    }
}

pub fn inc_check(outcome: &str) {
    CHECK_COUNTER
        .with_label_values(&[outcome])
        .inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcomes_show_up_in_exposition() {
        inc_check("reachable");
        inc_check("unreachable");
        observe_latency(1.5);

        let resp = render_metrics();
        assert_eq!(resp.status(), StatusCode::OK);
        let text = String::from_utf8(resp.into_body()).unwrap();
        assert!(text.contains("ping_checks_total{outcome=\"reachable\"}"));
        assert!(text.contains("ping_checks_total{outcome=\"unreachable\"}"));
        assert!(text.contains("ping_connect_latency_milliseconds_current"));
    }
}

//! HTTP front for the reachability check.
//!
//! `POST /ping` runs one check, any `OPTIONS` answers the preflight. Every
//! response, rejections included, carries the permissive CORS headers.

use std::convert::Infallible;
use std::sync::Arc;

use bytes::Bytes;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{error, warn};
use warp::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_TYPE,
};
use warp::http::{HeaderValue, Method, Response, StatusCode};
use warp::{Filter, Rejection, Reply};

use crate::check::{check, ReachabilityRequest, ReachabilityResult};
use crate::config::PingConfig;
use crate::error::RequestError;
use crate::metrics::inc_check;

pub const INTERNAL_ERROR_MESSAGE: &str = "Failed to process request";

/// Largest accepted `POST /ping` body; an `{ "ip": ... }` document is tiny.
pub const MAX_BODY_BYTES: u64 = 4 * 1024;

pub fn routes(
    config: Arc<RwLock<PingConfig>>,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let ping = warp::path!("ping")
        .and(warp::post())
        .and(with_config(config))
        .and(warp::body::content_length_limit(MAX_BODY_BYTES))
        .and(warp::body::bytes())
        .and_then(handle_ping);

    preflight().or(ping).unify().recover(handle_rejection)
}

/// Any `OPTIONS`, on any path, gets the empty CORS reply. Other methods fall
/// through as "not found" so they never mask a 404 with a 405.
fn preflight() -> impl Filter<Extract = (Response<Vec<u8>>,), Error = Rejection> + Clone {
    warp::method()
        .and_then(|method: Method| async move {
            if method == Method::OPTIONS {
                Ok(())
            } else {
                Err(warp::reject::not_found())
            }
        })
        .untuple_one()
        .map(preflight_response)
}

fn with_config(
    config: Arc<RwLock<PingConfig>>,
) -> impl Filter<Extract = (Arc<RwLock<PingConfig>>,), Error = Infallible> + Clone {
    warp::any().map(move || config.clone())
}

async fn handle_ping(config: Arc<RwLock<PingConfig>>, body: Bytes) -> Result<Response<Vec<u8>>, Rejection> {
    let request = match ReachabilityRequest::from_json(&body) {
        Ok(request) => request,
        Err(e) => return Ok(internal_error(&e)),
    };

    // Snapshot so the lock is not held across the dial.
    let settings = config.read().await.probe_settings();
    let result = check(&request, &settings).await;
    inc_check(result.outcome());

    Ok(result_response(&result))
}

fn result_response(result: &ReachabilityResult) -> Response<Vec<u8>> {
    match result {
        ReachabilityResult::Reachable => json_response(StatusCode::OK, json!({ "success": true })),
        ReachabilityResult::Unreachable => json_response(StatusCode::OK, json!({ "success": false })),
        ReachabilityResult::InvalidRequest(reason) => {
            json_response(StatusCode::BAD_REQUEST, json!({ "error": reason }))
        }
    }
}

fn internal_error(err: &RequestError) -> Response<Vec<u8>> {
    error!("ping request failed: {}", err);
    inc_check("internal_error");
    json_response(StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": INTERNAL_ERROR_MESSAGE }))
}

async fn handle_rejection(err: Rejection) -> Result<Response<Vec<u8>>, Infallible> {
    if err.is_not_found() {
        return Ok(json_response(StatusCode::NOT_FOUND, json!({ "error": "Not found" })));
    }
    if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        warn!("rejected request with unsupported method");
        return Ok(json_response(StatusCode::METHOD_NOT_ALLOWED, json!({ "error": "Method not allowed" })));
    }
    // Anything else (oversized or unreadable bodies and the like) is an internal fault.
    Ok(internal_error(&RequestError::BodyRead(format!("{:?}", err))))
}

fn preflight_response() -> Response<Vec<u8>> {
    with_cors(Response::new(Vec::new()))
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response<Vec<u8>> {
    let mut resp = Response::new(body.to_string().into_bytes());
    *resp.status_mut() = status;
    resp.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    with_cors(resp)
}

fn with_cors(mut resp: Response<Vec<u8>>) -> Response<Vec<u8>> {
    let headers = resp.headers_mut();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static("POST, OPTIONS"));
    headers.insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type, Authorization"),
    );
    resp
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::net::{TcpListener, TcpStream};

    /// Serve the routes on a free loopback port and wait until it accepts.
    async fn spawn_server(config: PingConfig) -> SocketAddr {
        let addr = {
            let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            probe.local_addr().unwrap()
        };
        let routes = routes(Arc::new(RwLock::new(config)));
        tokio::spawn(warp::serve(routes).run(addr));

        for _ in 0..50 {
            if TcpStream::connect(addr).await.is_ok() {
                return addr;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("server on {} never came up", addr);
    }

    fn config_probing(port: u16) -> PingConfig {
        PingConfig { probe_port: port, connect_timeout_ms: 1000, ..PingConfig::default() }
    }

    async fn post(addr: SocketAddr, body: &str) -> (StatusCode, reqwest::header::HeaderMap, serde_json::Value) {
        let resp = reqwest::Client::new()
            .post(format!("http://{}/ping", addr))
            .header("Content-Type", "application/json")
            .header("Authorization", "Bearer anon-key")
            .body(body.to_string())
            .send()
            .await
            .unwrap();
        let status = StatusCode::from_u16(resp.status().as_u16()).unwrap();
        let headers = resp.headers().clone();
        let json = serde_json::from_str(&resp.text().await.unwrap()).unwrap();
        (status, headers, json)
    }

    fn assert_cors(headers: &reqwest::header::HeaderMap) {
        assert_eq!(headers["access-control-allow-origin"], "*");
        assert_eq!(headers["access-control-allow-methods"], "POST, OPTIONS");
        assert_eq!(headers["access-control-allow-headers"], "Content-Type, Authorization");
    }

    #[tokio::test]
    async fn preflight_is_empty_with_cors_headers() {
        let addr = spawn_server(PingConfig::default()).await;
        let resp = reqwest::Client::new()
            .request(reqwest::Method::OPTIONS, format!("http://{}/ping", addr))
            .send()
            .await
            .unwrap();

        assert_eq!(resp.status().as_u16(), 200);
        assert_cors(resp.headers());
        assert!(resp.bytes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_ip_is_a_client_error() {
        let addr = spawn_server(PingConfig::default()).await;

        let (status, headers, body) = post(addr, r#"{"ip":""}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "error": "IP address is required" }));
        assert_cors(&headers);

        let (status, _, body) = post(addr, "{}").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "error": "IP address is required" }));
    }

    #[tokio::test]
    async fn falsy_ip_is_a_client_error() {
        let addr = spawn_server(PingConfig::default()).await;

        for body in [r#"{"ip":0}"#, r#"{"ip":false}"#, r#"{"ip":null}"#] {
            let (status, headers, json) = post(addr, body).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{}", body);
            assert_eq!(json, json!({ "error": "IP address is required" }));
            assert_cors(&headers);
        }
    }

    #[tokio::test]
    async fn non_string_ip_reports_failure_with_ok_status() {
        let addr = spawn_server(PingConfig::default()).await;

        for body in [r#"{"ip":42}"#, r#"{"ip":true}"#] {
            let (status, _, json) = post(addr, body).await;
            assert_eq!(status, StatusCode::OK, "{}", body);
            assert_eq!(json, json!({ "success": false }));
        }
    }

    #[tokio::test]
    async fn listening_device_reports_success() {
        let device = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = device.local_addr().unwrap().port();
        let addr = spawn_server(config_probing(port)).await;

        let (status, headers, body) = post(addr, r#"{"ip":"127.0.0.1"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "success": true }));
        assert_eq!(headers["content-type"], "application/json");
        assert_cors(&headers);
    }

    #[tokio::test]
    async fn silent_device_reports_failure_with_ok_status() {
        let device = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = device.local_addr().unwrap().port();
        drop(device);
        let addr = spawn_server(config_probing(port)).await;

        let (status, _, body) = post(addr, r#"{"ip":"127.0.0.1"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "success": false }));

        let (status, _, body) = post(addr, r#"{"ip":"not-a-real-host.invalid"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "success": false }));
    }

    #[tokio::test]
    async fn malformed_body_is_a_generic_server_error() {
        let addr = spawn_server(PingConfig::default()).await;

        let (status, headers, body) = post(addr, "{ip: 10.0.0.1").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({ "error": INTERNAL_ERROR_MESSAGE }));
        assert_cors(&headers);
    }

    #[tokio::test]
    async fn oversized_body_is_a_generic_server_error() {
        let addr = spawn_server(PingConfig::default()).await;
        let host = "a".repeat(MAX_BODY_BYTES as usize);

        let (status, headers, body) = post(addr, &format!(r#"{{"ip":"{}"}}"#, host)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({ "error": INTERNAL_ERROR_MESSAGE }));
        assert_cors(&headers);
    }

    #[tokio::test]
    async fn preflight_on_any_path_is_empty() {
        let addr = spawn_server(PingConfig::default()).await;
        let resp = reqwest::Client::new()
            .request(reqwest::Method::OPTIONS, format!("http://{}/functions/v1/ping", addr))
            .send()
            .await
            .unwrap();

        assert_eq!(resp.status().as_u16(), 200);
        assert_cors(resp.headers());
        assert!(resp.bytes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn other_methods_and_paths_still_carry_cors() {
        let addr = spawn_server(PingConfig::default()).await;
        let client = reqwest::Client::new();

        let resp = client.get(format!("http://{}/ping", addr)).send().await.unwrap();
        assert_eq!(resp.status().as_u16(), 405);
        assert_cors(resp.headers());

        let resp = client.post(format!("http://{}/devices", addr)).send().await.unwrap();
        assert_eq!(resp.status().as_u16(), 404);
        assert_cors(resp.headers());
    }

    #[tokio::test]
    async fn probe_port_follows_config_updates() {
        let device = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = device.local_addr().unwrap().port();

        let config = Arc::new(RwLock::new(PingConfig { connect_timeout_ms: 1000, ..PingConfig::default() }));
        let request = ReachabilityRequest { ip: Some(json!("127.0.0.1")) };

        config.write().await.probe_port = port;
        let settings = config.read().await.probe_settings();
        assert_eq!(check(&request, &settings).await, ReachabilityResult::Reachable);

        let resp = result_response(&ReachabilityResult::Reachable);
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.into_body(), br#"{"success":true}"#.to_vec());
    }
}

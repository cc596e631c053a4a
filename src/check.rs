//! The reachability check: one bounded TCP connect to the submitted address.

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::RequestError;
use crate::metrics::observe_latency;
use crate::prober::ProbeSettings;
use crate::prober::tcp_connect::probe_tcp;

pub const IP_REQUIRED: &str = "IP address is required";

/// Inbound body. `ip` is kept untyped: any JSON value is a well-formed
/// request, its truthiness decides between "missing" and "dial it".
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ReachabilityRequest {
    #[serde(default)]
    pub ip: Option<Value>,
}

/// What the `ip` field asks the checker to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeTarget<'a> {
    Missing,
    Host(&'a str),
    /// Present and truthy but not a string; can never connect.
    NotAHost,
}

impl ReachabilityRequest {
    pub fn from_json(body: &[u8]) -> Result<Self, RequestError> {
        Ok(serde_json::from_slice(body)?)
    }

    pub fn target(&self) -> ProbeTarget<'_> {
        match &self.ip {
            None | Some(Value::Null) | Some(Value::Bool(false)) => ProbeTarget::Missing,
            Some(Value::String(s)) if s.is_empty() => ProbeTarget::Missing,
            Some(Value::String(s)) => ProbeTarget::Host(s.as_str()),
            Some(Value::Number(n)) if n.as_f64() == Some(0.0) => ProbeTarget::Missing,
            Some(_) => ProbeTarget::NotAHost,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReachabilityResult {
    Reachable,
    Unreachable,
    InvalidRequest(String),
}

impl ReachabilityResult {
    /// Label used for the outcome counter.
    pub fn outcome(&self) -> &'static str {
        match self {
            ReachabilityResult::Reachable => "reachable",
            ReachabilityResult::Unreachable => "unreachable",
            ReachabilityResult::InvalidRequest(_) => "invalid_request",
        }
    }
}

pub async fn check(request: &ReachabilityRequest, settings: &ProbeSettings) -> ReachabilityResult {
    let ip = match request.target() {
        ProbeTarget::Host(ip) => ip,
        ProbeTarget::Missing => return ReachabilityResult::InvalidRequest(IP_REQUIRED.to_string()),
        ProbeTarget::NotAHost => {
            info!("ping {:?} unreachable: not a host name", request.ip);
            return ReachabilityResult::Unreachable;
        }
    };

    match probe_tcp(ip, settings.port, settings.timeout).await {
        Ok(latency) => {
            info!("ping {}:{} reachable in {:?}", ip, settings.port, latency);
            observe_latency(latency.as_secs_f64() * 1000.0);
            ReachabilityResult::Reachable
        }
        Err(e) => {
            // Cause stays in the logs; the caller only learns "unreachable".
            debug!("ping {}:{} failed: {:?}", ip, settings.port, e);
            info!("ping {}:{} unreachable", ip, settings.port);
            ReachabilityResult::Unreachable
        }
    }
}

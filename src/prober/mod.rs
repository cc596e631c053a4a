use std::time::Duration;

pub mod tcp_connect;

/// Per-request view of the probe parameters, taken from the live config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeSettings {
    pub port: u16,
    pub timeout: Duration,
}

use anyhow::Result;
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration, Instant};
use crate::util::resolve_host_to_ip;

/// Bare connect/close probe. Resolution and the single connect attempt share
/// one deadline; nothing is written to or read from the stream.
pub async fn probe_tcp(host: &str, port: u16, connect_timeout: Duration) -> Result<Duration> {
    let start = Instant::now();
    let attempt = async {
        let ip = resolve_host_to_ip(host).await?;
        let conn = TcpStream::connect(SocketAddr::new(ip, port)).await?;
        drop(conn);
        Ok::<(), anyhow::Error>(())
    };
    timeout(connect_timeout, attempt).await??;
    let elapsed = start.elapsed();
    Ok(elapsed)
}

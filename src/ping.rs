//! The replica's ping agent: answers the director's probe requests over the
//! control connection, one at a time.
use std::net::Ipv4Addr;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::time::timeout;

// probes per request; the short interval keeps a full round under a second
const PING_COUNT: u32 = 3;
const PING_INTERVAL: &str = "0.2";

/// Deadline on one oracle invocation, so an unreachable client cannot pile
/// up ping processes.
const PING_DEADLINE: Duration = Duration::from_secs(30);

/// The round-trip-time oracle: a few probes against the address, average in
/// milliseconds, or `None` when the target did not answer. The trait is the
/// seam that lets tests substitute a canned oracle.
#[async_trait]
pub trait RttProbe: Send + Sync {
    async fn probe(&self, addr: Ipv4Addr) -> Option<f64>;
}

/// Shells out to the system `ping` utility and pulls the "avg" figure out of
/// the trailing summary line.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPing;

#[async_trait]
impl RttProbe for SystemPing {
    async fn probe(&self, addr: Ipv4Addr) -> Option<f64> {
        let run = Command::new("ping")
            .arg("-c")
            .arg(PING_COUNT.to_string())
            .arg("-i")
            .arg(PING_INTERVAL)
            .arg(addr.to_string())
            .output();

        let output = match timeout(PING_DEADLINE, run).await {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => {
                debug!("ping {addr} could not run: {err}");
                return None;
            }
            Err(_) => {
                debug!("ping {addr} hit the {PING_DEADLINE:?} deadline");
                return None;
            }
        };
        if !output.status.success() {
            debug!("ping {addr} exited with {}", output.status);
            return None;
        }

        parse_ping_summary(&String::from_utf8_lossy(&output.stdout))
    }
}

/// The last line of `ping` output looks like
/// `rtt min/avg/max/mdev = 10.1/12.3/14.5/1.2 ms` (or `round-trip ...` on
/// BSDs); splitting on `/` puts the average in the fifth field.
pub fn parse_ping_summary(output: &str) -> Option<f64> {
    let line = output.lines().rev().find(|l| !l.trim().is_empty())?;
    let avg = line.split('/').nth(4)?;
    avg.trim().parse().ok()
}

/// Serve one control connection: read probe requests line by line, ping the
/// requested client, write the measurement back on the same connection.
/// Requests are processed serially. Unparsable requests are logged and
/// skipped; oracle failures are skipped silently; the loop ends when the
/// director hangs up.
pub async fn serve_probes<S>(
    mut channel: BufReader<S>,
    first_request: &str,
    oracle: &dyn RttProbe,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut request = first_request.trim().to_string();
    loop {
        if !request.is_empty() {
            match request.parse::<Ipv4Addr>() {
                Ok(addr) => {
                    if let Some(rtt) = oracle.probe(addr).await {
                        let line = format!("{addr} {rtt}\n");
                        if let Err(err) = channel.write_all(line.as_bytes()).await {
                            debug!("control channel closed while writing: {err}");
                            break;
                        }
                    }
                }
                Err(_) => warn!("skipping unparsable probe request: {request:?}"),
            }
        }

        request.clear();
        match channel.read_line(&mut request).await {
            Ok(0) => break,
            Ok(_) => {
                let trimmed = request.trim().to_string();
                request = trimmed;
            }
            Err(err) => {
                debug!("control channel read failed: {err}");
                break;
            }
        }
    }
}

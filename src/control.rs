//! The director's side of the persistent control channel to each replica.
//!
//! Framing is LF-terminated text both ways: the director writes one
//! `"<clientIP>\n"` line per probe request, the replica answers with
//! `"<clientIP> <rtt-ms>\n"` lines as probes complete.
use std::net::Ipv4Addr;
use std::sync::Arc;

use log::{info, warn};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::error::CdnResult;
use crate::geo::LatLong;
use crate::router::{Replica, Router, PROBE_QUEUE_SIZE};

/// Dial one replica and wire it into the router: a writer task drains the
/// probe queue onto the connection, a reader task feeds RTT samples back
/// into the latency table. Loss of the connection on either side removes
/// the replica from routing consideration.
pub async fn attach_replica(
    router: Arc<Router>,
    addr: Ipv4Addr,
    location: LatLong,
    port: u16,
) -> CdnResult<()> {
    let stream = TcpStream::connect((addr, port)).await?;
    let (read_half, write_half) = stream.into_split();

    let (probes, probe_queue) = mpsc::channel(PROBE_QUEUE_SIZE);
    router.add_replica(Replica {
        addr,
        location,
        probes,
    });

    tokio::spawn(write_probe_requests(write_half, probe_queue, addr));
    tokio::spawn(read_probe_responses(read_half, router, addr));

    Ok(())
}

async fn write_probe_requests<W>(
    mut writer: W,
    mut probe_queue: mpsc::Receiver<Ipv4Addr>,
    addr: Ipv4Addr,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(client) = probe_queue.recv().await {
        let line = format!("{client}\n");
        if let Err(err) = writer.write_all(line.as_bytes()).await {
            warn!("control channel to {addr} closed while writing: {err}");
            break;
        }
    }
}

async fn read_probe_responses<R>(reader: R, router: Arc<Router>, addr: Ipv4Addr)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match parse_probe_response(&line) {
                Some((client, rtt)) => router.record_sample(client, addr, rtt),
                None => warn!("skipping malformed probe response from {addr}: {line:?}"),
            },
            Ok(None) => break,
            Err(err) => {
                warn!("control channel from {addr} failed: {err}");
                break;
            }
        }
    }
    info!("replica {addr} disconnected, removing from routing");
    router.remove_replica(addr);
}

/// One completed probe: exactly two whitespace-separated fields, the probed
/// client and its RTT in milliseconds. Anything else is skipped.
pub fn parse_probe_response(line: &str) -> Option<(Ipv4Addr, f64)> {
    let mut fields = line.split_whitespace();
    let client = fields.next()?.parse().ok()?;
    let rtt = fields.next()?.parse().ok()?;
    if fields.next().is_some() {
        return None;
    }
    Some((client, rtt))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[test]
    fn probe_response_lines() {
        assert_eq!(
            parse_probe_response("203.0.113.5 12.5"),
            Some(("203.0.113.5".parse().unwrap(), 12.5))
        );
        // integral RTTs are fine too
        assert_eq!(
            parse_probe_response("203.0.113.5 12"),
            Some(("203.0.113.5".parse().unwrap(), 12.0))
        );
        assert_eq!(parse_probe_response(""), None);
        assert_eq!(parse_probe_response("203.0.113.5"), None);
        assert_eq!(parse_probe_response("203.0.113.5 fast"), None);
        assert_eq!(parse_probe_response("203.0.113.5 12 extra"), None);
        assert_eq!(parse_probe_response("not-an-ip 12"), None);
    }

    #[tokio::test]
    async fn reader_task_updates_table_and_tears_down() {
        let router = Arc::new(Router::new());
        let replica_addr: Ipv4Addr = "10.0.0.1".parse().unwrap();
        let client: Ipv4Addr = "203.0.113.5".parse().unwrap();

        let (probes, _queue) = mpsc::channel(PROBE_QUEUE_SIZE);
        router.add_replica(Replica {
            addr: replica_addr,
            location: LatLong::UNKNOWN,
            probes,
        });

        let (mut near, far) = tokio::io::duplex(1024);
        let reader = tokio::spawn(read_probe_responses(far, router.clone(), replica_addr));

        near.write_all(b"203.0.113.5 100\n").await.unwrap();
        near.write_all(b"garbage line\n").await.unwrap();
        near.write_all(b"203.0.113.5 50\n").await.unwrap();
        drop(near); // hang up

        reader.await.unwrap();
        assert_eq!(router.sample(client, replica_addr), Some(75.0));
        // disconnect removed the replica from the live set
        assert_eq!(router.replica_count(), 0);
    }

    #[tokio::test]
    async fn writer_task_frames_probe_requests() {
        let (tx, rx) = mpsc::channel(PROBE_QUEUE_SIZE);
        let (far, near) = tokio::io::duplex(1024);
        let writer = tokio::spawn(write_probe_requests(
            far,
            rx,
            "10.0.0.1".parse().unwrap(),
        ));

        tx.send("203.0.113.5".parse().unwrap()).await.unwrap();
        tx.send("198.51.100.7".parse().unwrap()).await.unwrap();
        drop(tx);
        writer.await.unwrap();

        let mut lines = BufReader::new(near).lines();
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "203.0.113.5");
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "198.51.100.7");
        assert!(lines.next_line().await.unwrap().is_none());
    }
}

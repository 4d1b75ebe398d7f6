//! The replica's TCP front-end. One listener serves two kinds of peer: HTTP
//! clients steered here by the director, and the director itself, whose
//! control connection arrives on the same port and is recognized by its
//! first line (a bare IPv4 address instead of a request line).
use std::net::Ipv4Addr;
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::OnceCell;

use crate::cache::TieredCache;
use crate::error::CdnResult;
use crate::http;
use crate::ping::{self, RttProbe};

/// Everything a connection handler needs; cloned into each task.
#[derive(Clone)]
pub struct ProxyContext {
    pub origin: String,
    pub client: reqwest::Client,
    /// Empty until warm-up completes; set exactly once with the sealed cache.
    pub cache: Arc<OnceCell<TieredCache>>,
    pub oracle: Arc<dyn RttProbe>,
}

/// Accept loop. Returns cleanly on SIGINT/SIGTERM; in-flight handlers finish
/// or die with their sockets.
pub async fn serve(listener: TcpListener, context: ProxyContext) -> CdnResult<()> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    loop {
        tokio::select! {
            _ = sigint.recv() => break,
            _ = sigterm.recv() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let context = context.clone();
                    tokio::spawn(async move {
                        if let Err(err) = handle_connection(stream, context).await {
                            debug!("connection from {peer} ended: {err:?}");
                        }
                    });
                }
                Err(err) => warn!("accept failed: {err}"),
            },
        }
    }

    info!("replica front-end shutting down");
    Ok(())
}

async fn handle_connection(stream: TcpStream, context: ProxyContext) -> CdnResult<()> {
    let mut reader = BufReader::new(stream);

    let mut first_line = String::new();
    if reader.read_line(&mut first_line).await? == 0 {
        return Ok(());
    }
    let first = first_line.trim_end();

    // only the director speaks bare-IPv4 framing
    if first.parse::<Ipv4Addr>().is_ok() {
        info!("director control channel attached");
        ping::serve_probes(reader, first, context.oracle.as_ref()).await;
        return Ok(());
    }

    handle_http(reader, first, &context).await
}

async fn handle_http(
    mut channel: BufReader<TcpStream>,
    request_line: &str,
    context: &ProxyContext,
) -> CdnResult<()> {
    let target = http::request_target(request_line)?;
    http::drain_request_head(&mut channel).await?;

    // cache first; any trouble there falls through to the origin
    if let Some(cache) = context.cache.get() {
        match cache.get(&target).await {
            Ok(bytes) => {
                debug!("cache hit for {target}");
                channel.write_all(&bytes).await?;
                return Ok(());
            }
            Err(err) => debug!("cache miss for {target}: {err:?}"),
        }
    }

    // a failed upstream fetch closes the connection without a response
    let response = context
        .client
        .get(format!("{}{}", context.origin, target))
        .send()
        .await?;
    let bytes = http::serialize_response(response).await?;
    channel.write_all(&bytes).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CacheError, CdnError};
    use crate::ping::SystemPing;
    use tokio::io::AsyncReadExt;

    async fn fake_origin(body: &'static str) -> String {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let origin = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let mut buffer = [0u8; 2048];
                let _ = stream.read(&mut buffer).await;
                let reply = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = stream.write_all(reply.as_bytes()).await;
            }
        });
        origin
    }

    #[tokio::test]
    async fn unwarmed_path_passes_through_to_origin() {
        let origin = fake_origin("origin body").await;
        let context = ProxyContext {
            origin,
            client: reqwest::Client::new(),
            cache: Arc::new(OnceCell::new()),
            oracle: Arc::new(SystemPing),
        };

        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let _ = handle_connection(stream, context).await;
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"GET /wiki/Cold HTTP/1.1\r\nHost: replica\r\n\r\n")
            .await
            .unwrap();

        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        let text = String::from_utf8_lossy(&reply);
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.ends_with("origin body"));
    }

    #[tokio::test]
    async fn unset_cache_cell_reads_as_not_built() {
        let cell: Arc<OnceCell<TieredCache>> = Arc::new(OnceCell::new());
        assert!(cell.get().is_none());

        let mut cache = TieredCache::new(100, 100, std::env::temp_dir());
        cache.seal();
        cell.set(cache).ok();

        let cache = cell.get().unwrap();
        match cache.get("/wiki/x").await {
            Err(CdnError::Cache(CacheError::Miss)) => {}
            other => panic!("expected Miss, got {other:?}"),
        }
    }
}

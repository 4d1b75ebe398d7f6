//! The CDN replica: HTTP proxy, warm-only cache, ping agent.
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use tokio::net::TcpListener;
use tokio::sync::OnceCell;

use cdnlib::cache::{self, TieredCache};
use cdnlib::error::CdnResult;
use cdnlib::ping::SystemPing;
use cdnlib::proxy::{self, ProxyContext};

mod args;
use args::CliOptions;

// deadline on every upstream fetch, warm-up and passthrough alike
const ORIGIN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> CdnResult<()> {
    env_logger::init();

    // manage arguments from command line
    let options = CliOptions::options()?;

    let client = reqwest::Client::builder().timeout(ORIGIN_TIMEOUT).build()?;

    let listener = TcpListener::bind(("0.0.0.0", options.port)).await?;
    info!("replica listening on TCP port {}", options.port);

    // warm the cache in the background; until it lands in the cell every
    // request passes through to the origin
    let cache_cell: Arc<OnceCell<TieredCache>> = Arc::new(OnceCell::new());
    {
        let cache = TieredCache::new(
            options.mem_capacity,
            options.disk_capacity,
            &options.cache_dir,
        );
        let cache_cell = cache_cell.clone();
        let client = client.clone();
        let origin = options.origin.clone();
        let popular = PathBuf::from(&options.popular_file);
        tokio::spawn(async move {
            let sealed = cache::warm(cache, &client, &origin, &popular).await;
            if cache_cell.set(sealed).is_err() {
                warn!("sealed cache was already installed");
            }
        });
    }

    let context = ProxyContext {
        origin: options.origin,
        client,
        cache: cache_cell,
        oracle: Arc::new(SystemPing),
    };
    proxy::serve(listener, context).await
}

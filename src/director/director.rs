//! The CDN director: authoritative DNS for the replica fleet plus the RTT
//! measurement collector behind the routing table.
use std::path::Path;
use std::sync::Arc;

use log::info;
use tokio::net::UdpSocket;

use cdnlib::control;
use cdnlib::dns;
use cdnlib::error::{CdnError, CdnResult};
use cdnlib::geo::{GeoLocator, GeoTable};
use cdnlib::rfc1035::DomainName;
use cdnlib::router::{self, Router};

mod args;
use args::CliOptions;

#[tokio::main]
async fn main() -> CdnResult<()> {
    env_logger::init();

    // manage arguments from command line
    let options = CliOptions::options()?;
    let name = DomainName::try_from(options.name.as_str())?;

    let geo: Arc<dyn GeoLocator> = match &options.geo_file {
        Some(path) => Arc::new(GeoTable::from_file(Path::new(path))?),
        None => Arc::new(GeoTable::default()),
    };

    // the replica fleet is fixed at startup
    let inventory = tokio::fs::read_to_string(&options.replica_file).await?;
    let replicas = router::parse_replica_list(&inventory);
    if replicas.is_empty() {
        return Err(CdnError::new("replica inventory is empty"));
    }

    let router = Arc::new(Router::new());
    for addr in &replicas {
        control::attach_replica(router.clone(), *addr, geo.locate(*addr), options.port).await?;
    }
    info!("control channels up to {} replicas", replicas.len());

    let socket = UdpSocket::bind(("0.0.0.0", options.port)).await?;
    info!(
        "authoritative for {name}, listening on UDP port {}",
        options.port
    );

    dns::serve(socket, name, router, geo).await
}

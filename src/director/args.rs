//! Manage command line arguments here.
use clap::{App, Arg};

use cdnlib::error::{CdnError, CdnResult};

/// This structure holds the command line arguments.
#[derive(Debug, Default)]
pub struct CliOptions {
    pub port: u16,
    pub name: String,
    pub replica_file: String,
    pub geo_file: Option<String>,
}

impl CliOptions {
    pub fn options() -> CdnResult<Self> {
        let matches = App::new("CDN director")
            .version("0.1")
            .about(
                r#"Authoritative DNS responder that steers each client to the
replica expected to serve it fastest, and the RTT measurement
collector that keeps the routing table honest.

            "#,
            )
            .arg(
                Arg::new("port")
                    .short('p')
                    .long("port")
                    .required(true)
                    .long_help("Port for the DNS responder to bind on; replicas are dialed on the same port")
                    .takes_value(true),
            )
            .arg(
                Arg::new("name")
                    .short('n')
                    .long("name")
                    .required(true)
                    .long_help("Base domain name this server answers for; queries for anything else are dropped")
                    .takes_value(true),
            )
            .arg(
                Arg::new("replicas")
                    .short('r')
                    .long("replicas")
                    .required(false)
                    .default_value("ec2-hosts.txt")
                    .long_help("Replica inventory file (tab-separated, ec2-A-B-C-D host names)")
                    .takes_value(true),
            )
            .arg(
                Arg::new("geo")
                    .short('g')
                    .long("geo")
                    .required(false)
                    .long_help("IP geo-location table file; without it every client looks unlocatable")
                    .takes_value(true),
            )
            .get_matches();

        // save all cli options into a structure
        let mut options = CliOptions::default();

        options.port = matches
            .value_of("port")
            .unwrap_or_default()
            .parse()
            .map_err(|_| CdnError::new("port must be a number in 1..65535"))?;
        options.name = String::from(matches.value_of("name").unwrap_or_default());
        options.replica_file = String::from(matches.value_of("replicas").unwrap_or_default());
        options.geo_file = matches.value_of("geo").map(String::from);

        Ok(options)
    }
}

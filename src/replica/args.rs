//! Manage command line arguments here.
use clap::{App, Arg};

use cdnlib::error::{CdnError, CdnResult};

// default tier capacities, 100 MB each
const DEFAULT_CAPACITY: &str = "100000000";

/// This structure holds the command line arguments.
#[derive(Debug, Default)]
pub struct CliOptions {
    pub port: u16,
    pub origin: String,
    pub popular_file: String,
    pub mem_capacity: u64,
    pub disk_capacity: u64,
    pub cache_dir: String,
}

impl CliOptions {
    pub fn options() -> CdnResult<Self> {
        let matches = App::new("CDN replica")
            .version("0.1")
            .about(
                r#"Edge node of the CDN: an HTTP proxy in front of the origin
with a warm-only two-tier cache, plus the ping agent that
answers the director's RTT probe requests.

            "#,
            )
            .arg(
                Arg::new("port")
                    .short('p')
                    .long("port")
                    .required(true)
                    .long_help("Port to serve HTTP clients (and the director's control channel) on")
                    .takes_value(true),
            )
            .arg(
                Arg::new("origin")
                    .short('o')
                    .long("origin")
                    .required(true)
                    .long_help("Origin base URL, e.g. http://origin.example.com:8080")
                    .takes_value(true),
            )
            .arg(
                Arg::new("popular")
                    .long("popular")
                    .required(false)
                    .default_value("popular.txt")
                    .long_help("Popular-path list used to warm the cache; first token per line is the path")
                    .takes_value(true),
            )
            .arg(
                Arg::new("mem-cache")
                    .long("mem-cache")
                    .required(false)
                    .default_value(DEFAULT_CAPACITY)
                    .long_help("Memory tier capacity in bytes")
                    .takes_value(true),
            )
            .arg(
                Arg::new("disk-cache")
                    .long("disk-cache")
                    .required(false)
                    .default_value(DEFAULT_CAPACITY)
                    .long_help("Disk tier capacity in bytes")
                    .takes_value(true),
            )
            .arg(
                Arg::new("cache-dir")
                    .long("cache-dir")
                    .required(false)
                    .default_value("cache")
                    .long_help("Directory holding the disk tier's files")
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
        options.origin = String::from(matches.value_of("origin").unwrap_or_default());
        options.popular_file = String::from(matches.value_of("popular").unwrap_or_default());
        options.mem_capacity = matches
            .value_of("mem-cache")
            .unwrap_or_default()
            .parse()
            .map_err(|_| CdnError::new("mem-cache must be a byte count"))?;
        options.disk_capacity = matches
            .value_of("disk-cache")
            .unwrap_or_default()
            .parse()
            .map_err(|_| CdnError::new("disk-cache must be a byte count"))?;
        options.cache_dir = String::from(matches.value_of("cache-dir").unwrap_or_default());

        Ok(options)
    }
}

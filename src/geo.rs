//! Great-circle math and the IP-to-location oracle behind geographic fallback.
use std::collections::HashMap;
use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;

use log::warn;

use crate::error::CdnResult;

// radius of the Earth in meters (hopefully Wikipedia is not wrong)
const EARTH_RADIUS_M: f64 = 6_378_137.0;

/// A point on the globe, in degrees.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct LatLong {
    pub lat: f64,
    pub long: f64,
}

impl LatLong {
    /// Sentinel for "location unknown". It is still a valid point for
    /// distance math; it just usually loses.
    pub const UNKNOWN: LatLong = LatLong {
        lat: 0.0,
        long: 0.0,
    };

    pub fn new(lat: f64, long: f64) -> Self {
        LatLong { lat, long }
    }

    pub fn is_unknown(&self) -> bool {
        self.lat == 0.0 && self.long == 0.0
    }
}

/// Great-circle distance in meters between two points, haversine formula.
///
/// ```
/// use cdnlib::geo::{distance, LatLong};
///
/// let boston = LatLong::new(42.36, -71.06);
/// let seattle = LatLong::new(47.61, -122.33);
/// assert_eq!(distance(boston, seattle), distance(seattle, boston));
/// assert_eq!(distance(boston, boston), 0.0);
/// ```
pub fn distance(a: LatLong, b: LatLong) -> f64 {
    let a_lat = a.lat.to_radians();
    let a_long = a.long.to_radians();
    let b_lat = b.lat.to_radians();
    let b_long = b.long.to_radians();

    let h = haversine(b_lat - a_lat) + a_lat.cos() * b_lat.cos() * haversine(b_long - a_long);
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

fn haversine(diff: f64) -> f64 {
    (diff / 2.0).sin().powi(2)
}

/// Resolves an IPv4 address to a location. Returns `LatLong::UNKNOWN` on any
/// failure; callers never see an error from the oracle. Purely an
/// input/output contract so the backing store (a database file, a service, a
/// baked-in table) is swappable.
pub trait GeoLocator: Send + Sync {
    fn locate(&self, addr: Ipv4Addr) -> LatLong;
}

/// Static lookup table read from a text file with one `<ip> <lat> <long>`
/// entry per whitespace-separated line. Lines starting with `#` and lines
/// that do not parse are skipped with a warning.
#[derive(Debug, Default)]
pub struct GeoTable {
    entries: HashMap<Ipv4Addr, LatLong>,
}

impl GeoTable {
    pub fn from_file(path: &Path) -> CdnResult<Self> {
        let contents = fs::read_to_string(path)?;
        Ok(Self::parse(&contents))
    }

    pub fn parse(contents: &str) -> Self {
        let mut entries = HashMap::new();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match parse_entry(line) {
                Some((addr, location)) => {
                    entries.insert(addr, location);
                }
                None => warn!("skipping unparsable geo table line: {line:?}"),
            }
        }
        GeoTable { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn parse_entry(line: &str) -> Option<(Ipv4Addr, LatLong)> {
    let mut fields = line.split_whitespace();
    let addr = fields.next()?.parse().ok()?;
    let lat = fields.next()?.parse().ok()?;
    let long = fields.next()?.parse().ok()?;
    Some((addr, LatLong::new(lat, long)))
}

impl GeoLocator for GeoTable {
    fn locate(&self, addr: Ipv4Addr) -> LatLong {
        self.entries.get(&addr).copied().unwrap_or(LatLong::UNKNOWN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_is_symmetric_and_zero_to_self() {
        let a = LatLong::new(40.0, -74.0);
        let b = LatLong::new(34.0, -118.0);
        assert_eq!(distance(a, b), distance(b, a));
        assert_eq!(distance(a, a), 0.0);
        assert_eq!(distance(b, b), 0.0);
    }

    #[test]
    fn distance_matches_known_pair() {
        // New York to Los Angeles is just shy of 4,000 km
        let nyc = LatLong::new(40.7128, -74.0060);
        let lax = LatLong::new(34.0522, -118.2437);
        let d = distance(nyc, lax);
        assert!(d > 3_900_000.0 && d < 4_050_000.0, "got {d}");
    }

    #[test]
    fn table_lookup_and_fallback() {
        let table = GeoTable::parse(
            "# ip        lat     long\n\
             10.0.0.1    42.36   -71.06\n\
             not a line at all\n\
             10.0.0.2    47.61   -122.33\n",
        );
        assert_eq!(table.len(), 2);
        assert_eq!(
            table.locate("10.0.0.1".parse().unwrap()),
            LatLong::new(42.36, -71.06)
        );
        // anything the table does not know comes back as the sentinel
        let unknown = table.locate("192.0.2.9".parse().unwrap());
        assert!(unknown.is_unknown());
    }
}

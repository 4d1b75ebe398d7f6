//! Replica selection: measured round-trip times first, great-circle distance
//! until the first probes come back.
use std::cmp::Ordering;
use std::collections::HashMap;
use std::net::Ipv4Addr;

use log::{debug, warn};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::geo::{distance, GeoLocator, LatLong};

/// Bound on each replica's outstanding probe queue. A full queue drops the
/// probe rather than blocking the DNS handler.
pub const PROBE_QUEUE_SIZE: usize = 64;

/// One live replica: where it sits and how to ask it for RTT probes.
#[derive(Debug, Clone)]
pub struct Replica {
    pub addr: Ipv4Addr,
    pub location: LatLong,
    pub probes: mpsc::Sender<Ipv4Addr>,
}

// client IP -> (replica IP -> smoothed RTT in milliseconds)
type LatencyTable = HashMap<Ipv4Addr, HashMap<Ipv4Addr, f64>>;

/// The director's routing state. The latency table sits behind a single
/// mutex; every critical section is one lookup or one update.
#[derive(Debug, Default)]
pub struct Router {
    replicas: Mutex<HashMap<Ipv4Addr, Replica>>,
    clients: Mutex<LatencyTable>,
}

impl Router {
    pub fn new() -> Self {
        Router::default()
    }

    pub fn add_replica(&self, replica: Replica) {
        self.replicas.lock().insert(replica.addr, replica);
    }

    /// Called on control-channel loss: the replica leaves routing
    /// consideration. Its latency entries stay in the table but are
    /// filtered out at selection time.
    pub fn remove_replica(&self, addr: Ipv4Addr) {
        self.replicas.lock().remove(&addr);
    }

    pub fn replica_count(&self) -> usize {
        self.replicas.lock().len()
    }

    /// Fold one RTT sample into the table: `new = (old + sample) / 2`, the
    /// first sample stored as-is. Samples that are not finite non-negative
    /// numbers are dropped.
    pub fn record_sample(&self, client: Ipv4Addr, replica: Ipv4Addr, rtt: f64) {
        if !rtt.is_finite() || rtt < 0.0 {
            warn!("dropping bogus RTT sample {rtt} for {client} from {replica}");
            return;
        }
        let mut clients = self.clients.lock();
        let samples = clients.entry(client).or_default();
        let smoothed = match samples.get(&replica) {
            Some(old) => (old + rtt) / 2.0,
            None => rtt,
        };
        samples.insert(replica, smoothed);
    }

    #[cfg(test)]
    pub(crate) fn sample(&self, client: Ipv4Addr, replica: Ipv4Addr) -> Option<f64> {
        self.clients.lock().get(&client)?.get(&replica).copied()
    }

    /// Pick the replica this client should be sent to: the one with minimum
    /// smoothed RTT when any sample exists, the geographically closest one
    /// otherwise. Either way, a fresh round of probes is scheduled, so the
    /// first answer for a client is geographic and later ones converge onto
    /// measured latency. `None` means routing failure and the caller drops
    /// the query.
    pub fn get_server(&self, client: Ipv4Addr, geo: &dyn GeoLocator) -> Option<Ipv4Addr> {
        let pick = self
            .best_by_rtt(client)
            .or_else(|| self.closest_replica(geo.locate(client)));
        self.schedule_probes(client);
        pick
    }

    fn best_by_rtt(&self, client: Ipv4Addr) -> Option<Ipv4Addr> {
        // lock order everywhere: replicas before clients
        let replicas = self.replicas.lock();
        let clients = self.clients.lock();
        clients
            .get(&client)?
            .iter()
            .filter(|(addr, _)| replicas.contains_key(addr))
            .min_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(Ordering::Equal))
            .map(|(addr, _)| *addr)
    }

    fn closest_replica(&self, client_location: LatLong) -> Option<Ipv4Addr> {
        // an unlocatable client with no samples is a routing failure
        if client_location.is_unknown() {
            return None;
        }
        let replicas = self.replicas.lock();
        replicas
            .values()
            .min_by(|a, b| {
                distance(client_location, a.location)
                    .partial_cmp(&distance(client_location, b.location))
                    .unwrap_or(Ordering::Equal)
            })
            .map(|replica| replica.addr)
    }

    fn schedule_probes(&self, client: Ipv4Addr) {
        let replicas = self.replicas.lock();
        for replica in replicas.values() {
            if let Err(err) = replica.probes.try_send(client) {
                debug!("dropping probe of {client} for {}: {err}", replica.addr);
            }
        }
    }
}

/// Parse the replica inventory file: tab-separated columns, the first being a
/// host name of the form `ec2-A-B-C-D.<suffix>` from which the replica IPv4
/// `A.B.C.D` is extracted. Lines containing `Origin` or starting with `#`
/// are skipped, as are lines whose host name does not fit the pattern.
pub fn parse_replica_list(contents: &str) -> Vec<Ipv4Addr> {
    let mut addrs = Vec::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.contains("Origin") {
            continue;
        }
        let name = line.split('\t').next().unwrap_or_default();
        match replica_addr_from_name(name) {
            Some(addr) => addrs.push(addr),
            None => warn!("skipping replica list line with bad host name: {name:?}"),
        }
    }
    addrs
}

fn replica_addr_from_name(name: &str) -> Option<Ipv4Addr> {
    let rest = name.strip_prefix("ec2-")?;
    let mut parts = rest.splitn(4, '-');
    let a = parts.next()?;
    let b = parts.next()?;
    let c = parts.next()?;
    let d = parts.next()?.split('.').next()?;
    format!("{a}.{b}.{c}.{d}").parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::GeoTable;

    fn ip(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    fn replica(addr: Ipv4Addr, location: LatLong) -> (Replica, mpsc::Receiver<Ipv4Addr>) {
        let (probes, rx) = mpsc::channel(PROBE_QUEUE_SIZE);
        (
            Replica {
                addr,
                location,
                probes,
            },
            rx,
        )
    }

    // two replicas on opposite coasts, client in the Bay Area
    fn coast_to_coast() -> (Router, mpsc::Receiver<Ipv4Addr>, mpsc::Receiver<Ipv4Addr>) {
        let router = Router::new();
        let (r1, rx1) = replica(ip("10.0.0.1"), LatLong::new(40.0, -74.0));
        let (r2, rx2) = replica(ip("10.0.0.2"), LatLong::new(34.0, -118.0));
        router.add_replica(r1);
        router.add_replica(r2);
        (router, rx1, rx2)
    }

    fn bay_area_geo() -> GeoTable {
        GeoTable::parse("203.0.113.5 37.0 -122.0\n")
    }

    #[test]
    fn unknown_client_falls_back_to_closest() {
        let (router, mut rx1, mut rx2) = coast_to_coast();
        let client = ip("203.0.113.5");

        let picked = router.get_server(client, &bay_area_geo());
        assert_eq!(picked, Some(ip("10.0.0.2")));

        // a probe of the client was scheduled on every replica
        assert_eq!(rx1.try_recv().unwrap(), client);
        assert_eq!(rx2.try_recv().unwrap(), client);
    }

    #[test]
    fn measured_rtt_beats_distance() {
        let (router, _rx1, _rx2) = coast_to_coast();
        let client = ip("203.0.113.5");

        // the distant replica answers fast, the close one slow
        router.record_sample(client, ip("10.0.0.1"), 12.0);
        router.record_sample(client, ip("10.0.0.2"), 200.0);

        assert_eq!(router.get_server(client, &bay_area_geo()), Some(ip("10.0.0.1")));
    }

    #[test]
    fn ewma_sequence() {
        let router = Router::new();
        let client = ip("203.0.113.5");
        let target = ip("10.0.0.1");

        router.record_sample(client, target, 100.0);
        assert_eq!(router.sample(client, target), Some(100.0));
        router.record_sample(client, target, 50.0);
        assert_eq!(router.sample(client, target), Some(75.0));
        router.record_sample(client, target, 30.0);
        assert_eq!(router.sample(client, target), Some(52.5));
    }

    #[test]
    fn bogus_samples_are_dropped() {
        let router = Router::new();
        let client = ip("203.0.113.5");
        let target = ip("10.0.0.1");

        router.record_sample(client, target, -1.0);
        router.record_sample(client, target, f64::NAN);
        router.record_sample(client, target, f64::INFINITY);
        assert_eq!(router.sample(client, target), None);
    }

    #[test]
    fn fastest_replica_always_wins() {
        let (router, _rx1, _rx2) = coast_to_coast();
        let client = ip("203.0.113.5");

        router.record_sample(client, ip("10.0.0.1"), 80.0);
        router.record_sample(client, ip("10.0.0.2"), 81.0);
        assert_eq!(router.get_server(client, &bay_area_geo()), Some(ip("10.0.0.1")));

        // enough fast samples flip the preference
        router.record_sample(client, ip("10.0.0.2"), 10.0);
        router.record_sample(client, ip("10.0.0.2"), 10.0);
        assert_eq!(router.get_server(client, &bay_area_geo()), Some(ip("10.0.0.2")));
    }

    #[test]
    fn departed_replica_is_not_returned() {
        let (router, _rx1, _rx2) = coast_to_coast();
        let client = ip("203.0.113.5");

        router.record_sample(client, ip("10.0.0.1"), 5.0);
        router.remove_replica(ip("10.0.0.1"));

        // its stale samples no longer count; geographic fallback kicks in
        assert_eq!(router.get_server(client, &bay_area_geo()), Some(ip("10.0.0.2")));
    }

    #[test]
    fn no_replicas_is_a_routing_failure() {
        let router = Router::new();
        assert_eq!(router.get_server(ip("203.0.113.5"), &bay_area_geo()), None);
    }

    #[test]
    fn unlocatable_client_without_samples_is_dropped() {
        let (router, _rx1, _rx2) = coast_to_coast();
        // empty table: every lookup comes back as the sentinel
        let geo = GeoTable::default();
        assert_eq!(router.get_server(ip("203.0.113.5"), &geo), None);
    }

    #[test]
    fn replica_list_parsing() {
        let contents = "\
# test inventory
ec2-54-164-7-90.compute-1.amazonaws.com\tus-east\n\
ec2-Origin-0-0-0.compute-1.amazonaws.com\tOrigin\n\
ec2-35-160-11-2.us-west-2.compute.amazonaws.com\tus-west\n\
not-a-replica-at-all\tmystery\n";

        let addrs = parse_replica_list(contents);
        assert_eq!(addrs, vec![ip("54.164.7.90"), ip("35.160.11.2")]);
    }
}

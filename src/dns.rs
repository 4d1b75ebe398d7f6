//! The director's authoritative UDP responder.
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::net::UdpSocket;
use tokio::signal::unix::{signal, SignalKind};

use crate::error::CdnResult;
use crate::geo::GeoLocator;
use crate::rfc1035::{DNSMessage, DomainName, PacketType, MAX_DNS_PACKET_SIZE};
use crate::router::Router;

/// Serve DNS queries until SIGINT/SIGTERM. The receive buffer is pinned to
/// the classic 512-byte DNS payload limit.
pub async fn serve(
    socket: UdpSocket,
    name: DomainName,
    router: Arc<Router>,
    geo: Arc<dyn GeoLocator>,
) -> CdnResult<()> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut buffer = [0u8; MAX_DNS_PACKET_SIZE];

    loop {
        tokio::select! {
            _ = sigint.recv() => break,
            _ = sigterm.recv() => break,
            received = socket.recv_from(&mut buffer) => {
                let (length, peer) = match received {
                    Ok(x) => x,
                    Err(err) => {
                        warn!("UDP receive failed: {err}");
                        continue;
                    }
                };
                if let Some(reply) = handle_query(&buffer[..length], peer, &name, &router, geo.as_ref()) {
                    if let Err(err) = socket.send_to(&reply, peer).await {
                        warn!("UDP send to {peer} failed: {err}");
                    }
                }
            }
        }
    }

    info!("DNS responder shutting down");
    Ok(())
}

/// One query in, at most one response out. Every failure path drops the
/// packet silently: this is a private replica-selection plane, not a public
/// resolver, so it owes strangers nothing, not even an NXDOMAIN.
fn handle_query(
    packet: &[u8],
    peer: SocketAddr,
    name: &DomainName,
    router: &Router,
    geo: &dyn GeoLocator,
) -> Option<Vec<u8>> {
    let message = match DNSMessage::from_wire(packet) {
        Ok(message) => message,
        Err(err) => {
            debug!("dropping malformed packet from {peer}: {err:?}");
            return None;
        }
    };

    if message.header.flags.packet_type != PacketType::Query {
        debug!("dropping non-query packet from {peer}");
        return None;
    }
    let question = message.question.as_ref()?;
    if !question.name.eq_ignore_case(name) {
        debug!("dropping query for foreign name {} from {peer}", question.name);
        return None;
    }

    let client = match peer.ip() {
        IpAddr::V4(v4) => v4,
        IpAddr::V6(_) => {
            debug!("dropping query from IPv6 source {peer}");
            return None;
        }
    };

    let replica = router.get_server(client, geo)?;
    debug!("routing {client} to {replica}");

    let reply = match message.answer_a(replica) {
        Ok(reply) => reply,
        Err(err) => {
            warn!("could not build reply for {peer}: {err:?}");
            return None;
        }
    };
    match reply.to_wire() {
        Ok(bytes) => Some(bytes),
        Err(err) => {
            warn!("could not serialize reply for {peer}: {err:?}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::{GeoTable, LatLong};
    use crate::rfc1035::{DNSQuestion, QCLASS_IN, QTYPE_A};
    use crate::router::{Replica, PROBE_QUEUE_SIZE};
    use tokio::sync::mpsc;

    fn query_for(name: &str) -> Vec<u8> {
        let mut query = DNSMessage::default();
        query.header.id = 0xbeef;
        query.header.qd_count = 1;
        query.question = Some(DNSQuestion {
            name: DomainName::try_from(name).unwrap(),
            r#type: QTYPE_A,
            class: QCLASS_IN,
        });
        query.to_wire().unwrap()
    }

    fn routed_setup() -> (Router, GeoTable) {
        let router = Router::new();
        let (probes, _queue) = mpsc::channel(PROBE_QUEUE_SIZE);
        router.add_replica(Replica {
            addr: "10.0.0.2".parse().unwrap(),
            location: LatLong::new(34.0, -118.0),
            probes,
        });
        let geo = GeoTable::parse("203.0.113.5 37.0 -122.0\n");
        (router, geo)
    }

    fn peer() -> SocketAddr {
        "203.0.113.5:53000".parse().unwrap()
    }

    #[test]
    fn authoritative_query_is_answered() {
        let (router, geo) = routed_setup();
        let name = DomainName::try_from("cdn.example.com").unwrap();

        let reply = handle_query(&query_for("cdn.example.com"), peer(), &name, &router, &geo)
            .expect("expected a response");
        let message = DNSMessage::from_wire(&reply).unwrap();

        assert_eq!(message.header.id, 0xbeef);
        assert!(message.header.flags.authoritative_answer);
        assert_eq!(message.header.an_count, 1);
        let answer = message.answer.unwrap();
        assert_eq!(answer.rd_data, vec![10, 0, 0, 2]);
    }

    #[test]
    fn foreign_name_is_dropped() {
        let (router, geo) = routed_setup();
        let name = DomainName::try_from("cdn.example.com").unwrap();

        let reply = handle_query(&query_for("other.example.com"), peer(), &name, &router, &geo);
        assert!(reply.is_none());
    }

    #[test]
    fn name_matching_folds_case() {
        let (router, geo) = routed_setup();
        let name = DomainName::try_from("cdn.example.com").unwrap();

        let reply = handle_query(&query_for("CDN.Example.Com"), peer(), &name, &router, &geo);
        assert!(reply.is_some());
    }

    #[test]
    fn malformed_and_empty_packets_are_dropped() {
        let (router, geo) = routed_setup();
        let name = DomainName::try_from("cdn.example.com").unwrap();

        assert!(handle_query(&[0u8; 5], peer(), &name, &router, &geo).is_none());

        // a response echoed back at us is not a query
        let mut query = DNSMessage::from_wire(&query_for("cdn.example.com")).unwrap();
        query.header.flags.packet_type = PacketType::Response;
        let packet = query.to_wire().unwrap();
        assert!(handle_query(&packet, peer(), &name, &router, &geo).is_none());
    }

    #[test]
    fn routing_failure_is_dropped() {
        let router = Router::new(); // no replicas at all
        let geo = GeoTable::default();
        let name = DomainName::try_from("cdn.example.com").unwrap();

        let reply = handle_query(&query_for("cdn.example.com"), peer(), &name, &router, &geo);
        assert!(reply.is_none());
    }
}

//! Core of a small content-delivery network.
//!
//! One *director* node answers DNS A queries authoritatively, steering each
//! client to the replica expected to serve it fastest: by measured RTT when
//! probes have come back, by great-circle distance until then. Each *replica*
//! node fronts the origin with a two-tier (memory + disk) cache warmed from a
//! popular-path list, and answers the director's RTT probe requests over a
//! persistent control connection.
pub mod cache;
pub mod control;
pub mod dns;
pub mod error;
pub mod geo;
pub mod http;
pub mod network_order;
pub mod ping;
pub mod proxy;
pub mod rfc1035;
pub mod router;

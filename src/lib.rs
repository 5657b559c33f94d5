//! Cache-control decision core for an edge reverse-proxy cache.
//!
//! Given what the platform knows about a request, decides whether the proxy
//! may cache the response, which tags identify it, what must be purged and
//! how logged-in visitors and commenters are partitioned away from the
//! anonymous cache.

pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
pub mod scenario;

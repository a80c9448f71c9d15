//! HTTP request routing, static serving and upstream forwarding.
//!
//! Matches incoming requests against the route table, serves experiment
//! pages and resources from disk with per-directory header enrichment,
//! and proxies everything else to the application server.

mod assets;
mod fallback;
mod gateway;
mod headers;
mod rewrite;
mod router;
mod upstream;

pub use fallback::FallbackPolicy;
pub use gateway::GatewayProxy;
pub use headers::{HeaderFileEnricher, ResponseEnricher};
pub use router::{Router, RouterSettings};
pub use upstream::UpstreamTarget;

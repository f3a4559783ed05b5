//! hax-bridge: relays third-party service-health reports into the cluster HA agent
//!
//! Health reports arrive over HTTP, are normalized into per-service
//! online/offline statuses, and are handed to a single relay worker through
//! an ordered channel. The same worker answers entrypoint requests queued by
//! ha_link.

pub mod bridge;
pub mod cluster;
pub mod config;
pub mod server;

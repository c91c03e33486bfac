//! devroute: header-routed reverse proxy for developer backends on private networks.
//!
//! Callers name their backends in an `X-Devroute` JSON header and pick one
//! with `X-Devroute-Matched`. The picked address must be an IP literal in a
//! private range; anything else is refused before a connection is made.

pub mod config;
pub mod contract;
pub mod error;
pub mod proxy;
pub mod ranges;
pub mod server;

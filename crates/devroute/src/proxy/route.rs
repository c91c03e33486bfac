//! Stages 1–5 of a routed request: everything decided before a backend is dialled.

use axum::http::HeaderMap;

use crate::contract::{selector_from_headers, ResolvedBackend, RoutingContract};
use crate::error::RouteError;
use crate::ranges::PrivateRanges;

/// Validate the routing headers and resolve the backend to forward to.
///
/// Pure and synchronous: parse the contract, look up the selector, split
/// `host:port`, then require the host to be an IP inside `ranges`. The
/// first failing stage decides the error.
pub fn resolve_backend(
    headers: &HeaderMap,
    ranges: &PrivateRanges,
) -> Result<ResolvedBackend, RouteError> {
    let contract = RoutingContract::from_headers(headers)?;
    let backend = contract.resolve(selector_from_headers(headers))?;

    if !ranges.permits(&backend.host) {
        return Err(RouteError::ForbiddenDestination { host: backend.host });
    }
    Ok(backend)
}

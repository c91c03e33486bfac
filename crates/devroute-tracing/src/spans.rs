//! Span builder helpers for devroute instrumentation.

/// Create a tracing span for one routed request.
///
/// Usage: `let span = devroute_request_span!(request_id, method, uri, host, contract, matched);`
///
/// The request fields are the ones needed to reconstruct a routing decision
/// from logs: the raw `X-Devroute` contract and the `X-Devroute-Matched`
/// selector are recorded verbatim, `upstream` is the original Host header.
///
/// Fields recorded later by the handler:
/// - `outcome`: routing outcome tag (e.g. `forbidden-destination`, `proxied-ok`)
/// - `status`: status code returned to the caller
/// - `latency_ms`: milliseconds until response headers were ready
#[macro_export]
macro_rules! devroute_request_span {
    ($request_id:expr, $method:expr, $uri:expr, $upstream:expr, $contract:expr, $matched:expr) => {
        tracing::info_span!(
            "devroute_request",
            request_id = %$request_id,
            method = %$method,
            uri = %$uri,
            upstream = %$upstream,
            contract = %$contract,
            matched_service = %$matched,
            outcome = tracing::field::Empty,
            status = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
        )
    };
}

/// Create a tracing span for the forward to a validated backend.
#[macro_export]
macro_rules! backend_forward_span {
    ($service:expr, $target:expr) => {
        tracing::info_span!(
            "backend_forward",
            service = %$service,
            target = %$target,
            status = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
            bytes_relayed = tracing::field::Empty,
        )
    };
}

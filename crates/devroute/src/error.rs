//! Request-scoped routing errors and their HTTP mapping.

use std::fmt;

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

/// Outcome tag attached to the per-request event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    MissingContract,
    MalformedContract,
    UnknownSelector,
    MalformedAddress,
    ForbiddenDestination,
    ProxyError,
    ProxiedOk,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::MissingContract => "missing-contract",
            Outcome::MalformedContract => "malformed-contract",
            Outcome::UnknownSelector => "unknown-selector",
            Outcome::MalformedAddress => "malformed-address",
            Outcome::ForbiddenDestination => "forbidden-destination",
            Outcome::ProxyError => "proxy-error",
            Outcome::ProxiedOk => "proxied-ok",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every way a request can fail before or during the forward.
///
/// The `Display` text is the body sent back to the caller.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("Missing \"X-Devroute\" header")]
    MissingContract,

    #[error("Failed to parse \"X-Devroute\" header: {detail}")]
    MalformedContract { detail: String },

    /// `contract` is the contract re-serialized for diagnostics.
    #[error("Matched service \"{selector}\" was not found in contract: {contract}")]
    UnknownSelector { selector: String, contract: String },

    #[error("Failed to parse host:port on key \"{key}\": {source}")]
    MalformedAddress {
        key: String,
        #[source]
        source: AddressError,
    },

    #[error("Proxying to non-private IPs ({host}) is forbidden")]
    ForbiddenDestination { host: String },

    /// `reason` is logged, never sent to the caller.
    #[error("Bad Gateway")]
    BackendUnavailable { reason: String },
}

impl RouteError {
    pub fn outcome(&self) -> Outcome {
        match self {
            RouteError::MissingContract => Outcome::MissingContract,
            RouteError::MalformedContract { .. } => Outcome::MalformedContract,
            RouteError::UnknownSelector { .. } => Outcome::UnknownSelector,
            RouteError::MalformedAddress { .. } => Outcome::MalformedAddress,
            RouteError::ForbiddenDestination { .. } => Outcome::ForbiddenDestination,
            RouteError::BackendUnavailable { .. } => Outcome::ProxyError,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            RouteError::MissingContract
            | RouteError::MalformedContract { .. }
            | RouteError::UnknownSelector { .. }
            | RouteError::MalformedAddress { .. } => StatusCode::BAD_REQUEST,
            RouteError::ForbiddenDestination { .. } => StatusCode::FORBIDDEN,
            RouteError::BackendUnavailable { .. } => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for RouteError {
    fn into_response(self) -> Response {
        let mut response = (self.status(), format!("{self}\n")).into_response();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        response.headers_mut().insert(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        );
        response
    }
}

/// Why a contract value is not a usable `host:port` pair.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("address {0}: missing port in address")]
    MissingPort(String),

    #[error("address {0}: too many colons in address")]
    TooManyColons(String),

    #[error("address {0}: missing ']' in address")]
    MissingBracket(String),

    #[error("address {0}: unexpected '[' or ']' in address")]
    UnexpectedBracket(String),

    #[error("address {address}: invalid port \"{port}\"")]
    InvalidPort { address: String, port: String },
}

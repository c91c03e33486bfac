//! The routing contract carried in `X-Devroute` and the backend it resolves to.

use std::collections::BTreeMap;

use axum::http::HeaderMap;

use crate::error::{AddressError, RouteError};

/// Header carrying the JSON service → `host:port` mapping.
pub const CONTRACT_HEADER: &str = "x-devroute";

/// Header naming which contract key this request is for.
pub const MATCHED_HEADER: &str = "x-devroute-matched";

/// Service name → backend address, as sent by the caller.
///
/// Sorted so the diagnostic dump in `UnknownSelector` is stable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingContract {
    services: BTreeMap<String, String>,
}

impl RoutingContract {
    /// Read and parse the contract header.
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, RouteError> {
        let raw = headers
            .get(CONTRACT_HEADER)
            .ok_or(RouteError::MissingContract)?;
        let raw = raw.to_str().map_err(|e| RouteError::MalformedContract {
            detail: e.to_string(),
        })?;
        Self::parse(raw)
    }

    /// Parse a JSON object whose values are all strings.
    pub fn parse(raw: &str) -> Result<Self, RouteError> {
        let services: BTreeMap<String, String> =
            serde_json::from_str(raw).map_err(|e| RouteError::MalformedContract {
                detail: e.to_string(),
            })?;
        Ok(Self { services })
    }

    /// Look up the address for `selector`. `None` never matches.
    pub fn address_for(&self, selector: Option<&str>) -> Result<&str, RouteError> {
        selector
            .and_then(|s| self.services.get(s))
            .map(String::as_str)
            .ok_or_else(|| RouteError::UnknownSelector {
                selector: selector.unwrap_or_default().to_string(),
                contract: self.to_string(),
            })
    }

    /// Resolve `selector` to a parsed backend address.
    ///
    /// Only the matched entry is parsed; other entries may be malformed
    /// without affecting the request.
    pub fn resolve(&self, selector: Option<&str>) -> Result<ResolvedBackend, RouteError> {
        let address = self.address_for(selector)?;
        let service = selector.unwrap_or_default();

        let (host, port) =
            split_host_port(address).map_err(|source| RouteError::MalformedAddress {
                key: service.to_string(),
                source,
            })?;

        Ok(ResolvedBackend {
            service: service.to_string(),
            address: address.to_string(),
            host: host.to_string(),
            port,
        })
    }
}

impl std::fmt::Display for RoutingContract {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match serde_json::to_string(&self.services) {
            Ok(json) => f.write_str(&json),
            Err(_) => write!(f, "{:?}", self.services),
        }
    }
}

/// Read the selector header. Absent or non-UTF-8 values are `None`.
pub fn selector_from_headers(headers: &HeaderMap) -> Option<&str> {
    headers.get(MATCHED_HEADER).and_then(|v| v.to_str().ok())
}

/// The contract entry picked by the selector, split into host and port.
///
/// `host` is not yet known to be an IP; that is checked against the
/// private ranges before any connection is made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBackend {
    pub service: String,
    /// Contract value as written, used as the forward authority.
    pub address: String,
    pub host: String,
    pub port: u16,
}

impl ResolvedBackend {
    /// Base URL for the forward. The scheme is always plain HTTP.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.address)
    }
}

/// Split `host:port`, accepting `[v6]:port` for IPv6 hosts.
///
/// Unbracketed hosts may not contain a colon. The port must be a decimal
/// number in 1..=65535.
pub fn split_host_port(address: &str) -> Result<(&str, u16), AddressError> {
    let (host, port) = if let Some(rest) = address.strip_prefix('[') {
        let end = rest
            .find(']')
            .ok_or_else(|| AddressError::MissingBracket(address.to_string()))?;
        let host = &rest[..end];
        let port = rest[end + 1..]
            .strip_prefix(':')
            .ok_or_else(|| AddressError::MissingPort(address.to_string()))?;
        if host.contains(is_bracket) {
            return Err(AddressError::UnexpectedBracket(address.to_string()));
        }
        (host, port)
    } else {
        let colon = address
            .rfind(':')
            .ok_or_else(|| AddressError::MissingPort(address.to_string()))?;
        let host = &address[..colon];
        if host.contains(':') {
            return Err(AddressError::TooManyColons(address.to_string()));
        }
        if host.contains(is_bracket) {
            return Err(AddressError::UnexpectedBracket(address.to_string()));
        }
        (host, &address[colon + 1..])
    };

    if port.contains(is_bracket) {
        return Err(AddressError::UnexpectedBracket(address.to_string()));
    }

    let invalid_port = || AddressError::InvalidPort {
        address: address.to_string(),
        port: port.to_string(),
    };
    if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid_port());
    }
    match port.parse::<u16>() {
        Ok(0) | Err(_) => Err(invalid_port()),
        Ok(port) => Ok((host, port)),
    }
}

fn is_bracket(c: char) -> bool {
    c == '[' || c == ']'
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(contract: Option<&str>, matched: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(c) = contract {
            headers.insert(CONTRACT_HEADER, HeaderValue::from_str(c).unwrap());
        }
        if let Some(m) = matched {
            headers.insert(MATCHED_HEADER, HeaderValue::from_str(m).unwrap());
        }
        headers
    }

    #[test]
    fn test_missing_contract_header() {
        let err = RoutingContract::from_headers(&headers(None, Some("foo"))).unwrap_err();
        assert!(matches!(err, RouteError::MissingContract));
    }

    #[test]
    fn test_non_string_values_are_malformed() {
        for raw in [
            r#"{"foo": [1,2,3]}"#,
            r#"{"foo": 9001}"#,
            r#"{"foo": null}"#,
            r#"["foo"]"#,
            "null",
            "",
            "{",
        ] {
            let err = RoutingContract::parse(raw).unwrap_err();
            assert!(
                matches!(err, RouteError::MalformedContract { .. }),
                "{raw} -> {err:?}"
            );
        }
    }

    #[test]
    fn test_parse_error_detail_is_kept() {
        let err = RoutingContract::parse(r#"{"foo": [1,2,3]}"#).unwrap_err();
        match err {
            RouteError::MalformedContract { detail } => assert!(detail.contains("line 1")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_empty_object_is_a_valid_contract() {
        let contract = RoutingContract::parse("{}").unwrap();
        assert_eq!(contract.to_string(), "{}");
        assert!(matches!(
            contract.resolve(Some("foo")),
            Err(RouteError::UnknownSelector { .. })
        ));
    }

    #[test]
    fn test_unknown_selector_echoes_contract() {
        let contract = RoutingContract::parse(r#"{"foo": "192.168.10.20:9001"}"#).unwrap();
        let err = contract.resolve(Some("bar")).unwrap_err();

        assert_eq!(
            err.to_string(),
            r#"Matched service "bar" was not found in contract: {"foo":"192.168.10.20:9001"}"#
        );
    }

    #[test]
    fn test_missing_selector_never_matches_empty_key() {
        let contract = RoutingContract::parse(r#"{"": "10.0.0.1:80"}"#).unwrap();

        assert!(matches!(
            contract.resolve(None),
            Err(RouteError::UnknownSelector { .. })
        ));
        assert!(contract.resolve(Some("")).is_ok());
    }

    #[test]
    fn test_only_matched_entry_is_used() {
        let contract = RoutingContract::parse(
            r#"{"foo": "127.0.0.1:4000", "bar": "127.0.0.1:4001", "baz": "not an address"}"#,
        )
        .unwrap();
        let backend = contract.resolve(Some("foo")).unwrap();

        assert_eq!(backend.service, "foo");
        assert_eq!(backend.host, "127.0.0.1");
        assert_eq!(backend.port, 4000);
        assert_eq!(backend.base_url(), "http://127.0.0.1:4000");
    }

    #[test]
    fn test_underscore_separator_is_malformed_address() {
        let contract = RoutingContract::parse(r#"{"foo": "192.168.10.20_9001"}"#).unwrap();
        let err = contract.resolve(Some("foo")).unwrap_err();

        match err {
            RouteError::MalformedAddress { key, source } => {
                assert_eq!(key, "foo");
                assert_eq!(
                    source,
                    AddressError::MissingPort("192.168.10.20_9001".into())
                );
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_selector_header_reading() {
        let h = headers(Some("{}"), Some("foo"));
        assert_eq!(selector_from_headers(&h), Some("foo"));
        assert_eq!(selector_from_headers(&headers(Some("{}"), None)), None);
    }

    #[test]
    fn test_split_host_port_accepts() {
        assert_eq!(split_host_port("10.0.0.1:80"), Ok(("10.0.0.1", 80)));
        assert_eq!(split_host_port("[fd00::1]:8080"), Ok(("fd00::1", 8080)));
        assert_eq!(split_host_port("localhost:3000"), Ok(("localhost", 3000)));
        assert_eq!(split_host_port(":9000"), Ok(("", 9000)));
    }

    #[test]
    fn test_split_host_port_rejects() {
        assert_eq!(
            split_host_port("10.0.0.1"),
            Err(AddressError::MissingPort("10.0.0.1".into()))
        );
        assert_eq!(
            split_host_port("fd00::1:80"),
            Err(AddressError::TooManyColons("fd00::1:80".into()))
        );
        assert_eq!(
            split_host_port("[fd00::1:80"),
            Err(AddressError::MissingBracket("[fd00::1:80".into()))
        );
        assert_eq!(
            split_host_port("[fd00::1]"),
            Err(AddressError::MissingPort("[fd00::1]".into()))
        );
        assert!(matches!(
            split_host_port("10.0.0.1:"),
            Err(AddressError::InvalidPort { .. })
        ));
        assert!(matches!(
            split_host_port("10.0.0.1:http"),
            Err(AddressError::InvalidPort { .. })
        ));
        assert!(matches!(
            split_host_port("10.0.0.1:70000"),
            Err(AddressError::InvalidPort { .. })
        ));
        assert!(matches!(
            split_host_port("10.0.0.1:0"),
            Err(AddressError::InvalidPort { .. })
        ));
        assert!(matches!(
            split_host_port("10.0.0.1]:80"),
            Err(AddressError::UnexpectedBracket(_))
        ));
    }
}

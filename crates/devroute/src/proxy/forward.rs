//! Plain-HTTP forwarding to a validated backend.
//!
//! Request and response bodies are streamed verbatim. Only hop-by-hop
//! headers are dropped, and the usual `X-Forwarded-*` headers are added.

use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use axum::body::{Body, HttpBody};
use axum::http::{HeaderMap, HeaderValue, Method, Uri};
use axum::response::Response;
use bytes::Bytes;
use futures_core::Stream;
use http::header::{HeaderName, CONNECTION, HOST};
use tracing::Instrument;

use crate::contract::ResolvedBackend;
use crate::error::{Outcome, RouteError};

/// Headers that should NOT be forwarded (hop-by-hop headers).
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "host",
    "connection",
    "transfer-encoding",
    "keep-alive",
    "upgrade",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "trailers",
];

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");

/// Everything the forward needs from the inbound request.
pub struct Inbound {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Body,
    pub client_addr: Option<SocketAddr>,
}

/// Build the HTTP client used for every forward.
///
/// Redirects are relayed to the caller, not followed. Environment proxy
/// settings are ignored so the validated address is dialled directly.
pub fn build_client(connect_timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(connect_timeout)
        .redirect(reqwest::redirect::Policy::none())
        .no_proxy()
        .build()
}

/// Target URL: the backend authority plus the inbound path and query.
pub fn target_url(backend: &ResolvedBackend, uri: &Uri) -> String {
    let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    format!("{}{path_and_query}", backend.base_url())
}

/// Copy `headers` minus the fixed hop-by-hop set and any header the
/// `Connection` header names. Used in both directions.
pub fn end_to_end_headers(headers: &HeaderMap) -> HeaderMap {
    let listed: Vec<String> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|token| token.trim().to_ascii_lowercase())
        .filter(|token| !token.is_empty())
        .collect();

    let mut kept = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers.iter() {
        let name_str = name.as_str();
        if HOP_BY_HOP_HEADERS.contains(&name_str) || listed.iter().any(|l| l == name_str) {
            continue;
        }
        kept.append(name.clone(), value.clone());
    }
    kept
}

/// Strip hop-by-hop headers and set the forwarding headers.
pub fn outbound_headers(inbound: &HeaderMap, client_addr: Option<SocketAddr>) -> HeaderMap {
    let mut headers = end_to_end_headers(inbound);

    if let Some(host) = inbound.get(HOST) {
        headers.insert(X_FORWARDED_HOST, host.clone());
    }

    if let Some(addr) = client_addr {
        let client_ip = addr.ip().to_string();
        let forwarded_for = match inbound
            .get_all(&X_FORWARDED_FOR)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect::<Vec<_>>()
        {
            prior if prior.is_empty() => client_ip,
            prior => format!("{}, {client_ip}", prior.join(", ")),
        };
        if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
            headers.insert(X_FORWARDED_FOR, value);
        }
    }

    headers
}

/// Forward `inbound` to `backend` and stream the response back.
///
/// Fails with `BackendUnavailable` when the connection cannot be made or
/// response headers do not arrive within `response_timeout`. Failures
/// after the headers have been relayed abort the body stream instead.
///
/// Must be called inside the request span: the returned body logs the
/// request's outcome event there once the relay ends.
pub async fn forward(
    client: &reqwest::Client,
    backend: &ResolvedBackend,
    inbound: Inbound,
    response_timeout: Duration,
) -> Result<Response, RouteError> {
    let url = target_url(backend, &inbound.uri);
    let request_span = tracing::Span::current();
    let span = devroute_tracing::backend_forward_span!(backend.service, backend.address);
    let start = Instant::now();

    async move {
        let headers = outbound_headers(&inbound.headers, inbound.client_addr);

        tracing::debug!(url = %url, "Forwarding request");

        let mut req_builder = client.request(inbound.method, &url).headers(headers);
        // A bodiless request stays bodiless rather than turning into an empty chunked one
        if inbound.body.size_hint().exact() != Some(0) {
            req_builder =
                req_builder.body(reqwest::Body::wrap_stream(inbound.body.into_data_stream()));
        }
        let send = req_builder.send();

        let upstream_resp = match tokio::time::timeout(response_timeout, send).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => {
                tracing::Span::current().record("status", 502_u16);
                return Err(RouteError::BackendUnavailable {
                    reason: error_chain(&e),
                });
            }
            Err(_) => {
                tracing::Span::current().record("status", 502_u16);
                return Err(RouteError::BackendUnavailable {
                    reason: format!(
                        "no response headers within {}s",
                        response_timeout.as_secs()
                    ),
                });
            }
        };

        let status = upstream_resp.status();
        let latency = start.elapsed().as_millis() as u64;
        tracing::Span::current().record("latency_ms", latency);
        tracing::Span::current().record("status", status.as_u16());

        Ok(build_response(
            upstream_resp,
            request_span,
            tracing::Span::current(),
        ))
    }
    .instrument(span)
    .await
}

/// Build an axum Response from the backend response, streaming the body
/// through a `RelayBody`.
fn build_response(
    upstream_resp: reqwest::Response,
    request_span: tracing::Span,
    forward_span: tracing::Span,
) -> Response {
    let status = upstream_resp.status();
    let headers = end_to_end_headers(upstream_resp.headers());

    let relay = RelayBody {
        inner: Box::pin(upstream_resp.bytes_stream()),
        request_span,
        forward_span,
        status: status.as_u16(),
        bytes_relayed: 0,
        reported: false,
    };

    let mut response = Response::new(Body::from_stream(relay));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

/// Passes backend body chunks through unchanged and logs the request's
/// single outcome event when the relay ends: `proxied-ok` once the body is
/// complete (or the caller stops reading), `proxy-error` if the backend
/// fails mid-body.
struct RelayBody {
    inner: Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>,
    request_span: tracing::Span,
    forward_span: tracing::Span,
    status: u16,
    bytes_relayed: u64,
    reported: bool,
}

impl RelayBody {
    fn report(&mut self, failure: Option<&reqwest::Error>) {
        if self.reported {
            return;
        }
        self.reported = true;
        self.forward_span.record("bytes_relayed", self.bytes_relayed);

        let outcome = match failure {
            Some(_) => Outcome::ProxyError,
            None => Outcome::ProxiedOk,
        };
        self.request_span.record("outcome", outcome.as_str());

        let _enter = self.request_span.enter();
        match failure {
            Some(e) => tracing::error!(
                outcome = %outcome,
                status = self.status,
                bytes_relayed = self.bytes_relayed,
                error = %error_chain(e),
                "Backend failed mid-response"
            ),
            None => tracing::info!(
                outcome = %outcome,
                status = self.status,
                bytes_relayed = self.bytes_relayed,
                "Proxied request"
            ),
        }
    }
}

impl Stream for RelayBody {
    type Item = Result<Bytes, reqwest::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                self.bytes_relayed += chunk.len() as u64;
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                self.report(Some(&e));
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                self.report(None);
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for RelayBody {
    // HEAD responses and early client disconnects never reach the end of
    // the stream.
    fn drop(&mut self) {
        self.report(None);
    }
}

/// reqwest's Display stops at the outermost error; the cause is what
/// tells a refused connection from a reset one.
fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}

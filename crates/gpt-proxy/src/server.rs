//! Actix Web forwarding handler.
//!
//! Exposes a single route, `/v1/chat/completions` (any method). Everything
//! else falls through to the default 404.
//!
//! Per request:
//! - pre-flight (`OPTIONS`) requests are forwarded untouched, without the
//!   credential, and the response gets CORS headers echoing the requester.
//! - all other requests get the marker stripped from `model` and
//!   `Authorization: Bearer <key>` set, replacing whatever the client sent.
//!
//! Upstream responses are streamed back as they arrive, so SSE completions
//! pass through without buffering.

use crate::config::ProxyConfig;
use crate::error::{ConfigError, LifecycleError, ProxyError};
use crate::rewrite;
use actix_web::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use actix_web::http::{Method, StatusCode};
use actix_web::{web, HttpRequest, HttpResponse};
use reqwest::Url;
use tracing::{debug, error};

pub const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";

/// Upper bound on inbound request bodies. Chat histories get large, and the
/// extractor default (256 KiB) is far too small for them. Larger bodies are
/// answered with 413 before anything is forwarded.
pub const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

const ALLOWED_METHODS: &str = "POST, OPTIONS";

/// Headers that describe a single hop and must not be forwarded.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Per-listener state. Rebuilt from a fresh [`ProxyConfig`] on every reload.
#[derive(Clone)]
pub struct AppState {
    pub target: Url,
    pub marker: String,
    pub client: reqwest::Client,
    authorization: reqwest::header::HeaderValue,
}

impl AppState {
    pub fn from_config(config: &ProxyConfig) -> Result<Self, LifecycleError> {
        let mut authorization =
            reqwest::header::HeaderValue::from_str(&format!("Bearer {}", config.api_key))
                .map_err(|_| ConfigError::InvalidApiKey)?;
        authorization.set_sensitive(true);

        Ok(Self {
            target: config.target.clone(),
            marker: config.marker(),
            client: build_client().map_err(LifecycleError::Client)?,
            authorization,
        })
    }
}

/// Upstream client. No timeouts: streamed completions can run for minutes.
pub fn build_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
}

/// Register the forwarding route. Expects `web::Data<AppState>` to be set.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::PayloadConfig::new(MAX_BODY_BYTES))
        .route(CHAT_COMPLETIONS_PATH, web::route().to(forward));
}

async fn forward(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Bytes,
) -> Result<HttpResponse, ProxyError> {
    let preflight = req.method() == Method::OPTIONS;
    let url = upstream_url(&state.target, req.query_string());

    // Both sides use the http crate's token grammar, so anything actix parsed
    // converts.
    let method =
        reqwest::Method::from_bytes(req.method().as_str().as_bytes()).unwrap_or_default();

    let mut headers = outbound_headers(req.headers());
    if let Some(peer) = req.peer_addr() {
        append_forwarded_for(&mut headers, &peer.ip().to_string());
    }

    let body = if preflight {
        body
    } else {
        headers.insert(reqwest::header::AUTHORIZATION, state.authorization.clone());
        rewrite::rewrite_or_passthrough(body, &state.marker)
    };

    debug!(method = %method, %url, preflight, bytes = body.len(), "forwarding request");

    let upstream = state
        .client
        .request(method, url)
        .headers(headers)
        .body(body)
        .send()
        .await
        .map_err(|e| {
            error!(error = %e, "upstream request failed");
            ProxyError::Upstream(e)
        })?;

    let status =
        StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    debug!(status = status.as_u16(), "upstream responded");

    let mut response = HttpResponse::build(status);
    let skip = connection_tokens(upstream.headers().get_all(reqwest::header::CONNECTION));
    for (name, value) in upstream.headers() {
        let lower = name.as_str();
        if is_hop_by_hop(lower) || lower == "content-length" || skip.iter().any(|t| t == lower) {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(lower.as_bytes()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            response.append_header((name, value));
        }
    }

    if preflight {
        let echo = |name: HeaderName| {
            req.headers()
                .get(name)
                .cloned()
                .unwrap_or_else(|| HeaderValue::from_static(""))
        };
        response
            .insert_header((header::ACCESS_CONTROL_ALLOW_ORIGIN, echo(header::ORIGIN)))
            .insert_header((header::ACCESS_CONTROL_ALLOW_METHODS, ALLOWED_METHODS))
            .insert_header((
                header::ACCESS_CONTROL_ALLOW_HEADERS,
                echo(header::ACCESS_CONTROL_REQUEST_HEADERS),
            ));
    }

    Ok(response.streaming(upstream.bytes_stream()))
}

/// Target URL with the inbound query string carried over.
fn upstream_url(target: &Url, query: &str) -> Url {
    let mut url = target.clone();
    if !query.is_empty() {
        let merged = match target.query() {
            Some(existing) if !existing.is_empty() => format!("{existing}&{query}"),
            _ => query.to_string(),
        };
        url.set_query(Some(&merged));
    }
    url
}

/// Copy inbound headers for the upstream request.
///
/// Drops hop-by-hop headers (including any named in `Connection`), `Host`
/// and `Content-Length` (both recomputed by the client), and the client's
/// `Authorization`: pre-flights must not carry one, and everything else gets
/// ours.
fn outbound_headers(inbound: &HeaderMap) -> reqwest::header::HeaderMap {
    let skip = connection_tokens(inbound.get_all(header::CONNECTION));

    let mut out = reqwest::header::HeaderMap::with_capacity(inbound.len());
    for (name, value) in inbound.iter() {
        let lower = name.as_str();
        if is_hop_by_hop(lower)
            || matches!(lower, "host" | "content-length" | "authorization")
            || skip.iter().any(|t| t == lower)
        {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            reqwest::header::HeaderName::from_bytes(lower.as_bytes()),
            reqwest::header::HeaderValue::from_bytes(value.as_bytes()),
        ) {
            out.append(name, value);
        }
    }
    out
}

fn append_forwarded_for(headers: &mut reqwest::header::HeaderMap, client_ip: &str) {
    let prior: Vec<&str> = headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();
    let value = if prior.is_empty() {
        client_ip.to_string()
    } else {
        format!("{}, {}", prior.join(", "), client_ip)
    };
    if let Ok(value) = reqwest::header::HeaderValue::from_str(&value) {
        headers.insert("x-forwarded-for", value);
    }
}

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.contains(&name)
}

/// Header names listed in `Connection`, lowercased.
fn connection_tokens<'a, V>(values: impl IntoIterator<Item = &'a V>) -> Vec<String>
where
    V: AsRef<[u8]> + 'a,
{
    values
        .into_iter()
        .filter_map(|v| std::str::from_utf8(v.as_ref()).ok())
        .flat_map(|v| v.split(','))
        .map(|t| t.trim().to_ascii_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test as actix_test, App};
    use std::path::PathBuf;
    use std::time::Duration;

    fn state() -> AppState {
        let config = ProxyConfig {
            port: 0,
            api_key: "sk-test".to_string(),
            target: Url::parse("http://127.0.0.1:9/v1/chat/completions").unwrap(),
            skip_word: "q".to_string(),
            tls: None,
            pid_file: PathBuf::from("gpt-proxy.pid"),
            shutdown_timeout: Duration::from_secs(1),
        };
        AppState::from_config(&config).unwrap()
    }

    #[actix_web::test]
    async fn test_oversized_body_is_rejected_before_forwarding() {
        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(state()))
                .configure(configure),
        )
        .await;

        let req = actix_test::TestRequest::post()
            .uri(CHAT_COMPLETIONS_PATH)
            .insert_header((header::CONTENT_TYPE, "application/json"))
            .set_payload(vec![b' '; MAX_BODY_BYTES + 1])
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn test_upstream_url_keeps_target_path() {
        let target = Url::parse("https://api.example.com/v1/chat/completions").unwrap();
        assert_eq!(
            upstream_url(&target, "").as_str(),
            "https://api.example.com/v1/chat/completions"
        );
        assert_eq!(
            upstream_url(&target, "stream=1").as_str(),
            "https://api.example.com/v1/chat/completions?stream=1"
        );
    }

    #[test]
    fn test_upstream_url_merges_queries() {
        let target = Url::parse("http://localhost:4000/chat?api-version=2024").unwrap();
        assert_eq!(
            upstream_url(&target, "x=1").as_str(),
            "http://localhost:4000/chat?api-version=2024&x=1"
        );
    }

    #[test]
    fn test_outbound_headers_filtering() {
        let mut inbound = HeaderMap::new();
        inbound.insert(header::HOST, HeaderValue::from_static("proxy.local"));
        inbound.insert(header::CONTENT_LENGTH, HeaderValue::from_static("12"));
        inbound.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer client"));
        inbound.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, X-Trace"));
        inbound.insert(
            HeaderName::from_static("x-trace"),
            HeaderValue::from_static("abc"),
        );
        inbound.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        inbound.insert(header::ACCEPT, HeaderValue::from_static("text/event-stream"));

        let out = outbound_headers(&inbound);
        assert_eq!(out.len(), 2);
        assert_eq!(out.get("content-type").unwrap(), "application/json");
        assert_eq!(out.get("accept").unwrap(), "text/event-stream");
    }

    #[test]
    fn test_forwarded_for_is_appended() {
        let mut headers = reqwest::header::HeaderMap::new();
        append_forwarded_for(&mut headers, "10.0.0.1");
        assert_eq!(headers.get("x-forwarded-for").unwrap(), "10.0.0.1");

        append_forwarded_for(&mut headers, "10.0.0.2");
        assert_eq!(
            headers.get("x-forwarded-for").unwrap(),
            "10.0.0.1, 10.0.0.2"
        );
    }
}

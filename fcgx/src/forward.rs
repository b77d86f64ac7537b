use crate::config::FcgxConfig;
use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use fcgx_core::{FastCgiClient, Response};
use http::header::{HeaderName, HeaderValue, HOST};
use http::{Method, Request, Uri};
use std::fmt::Write as _;
use tokio::time::Duration;
use tracing::{debug, info};

/// Build the HTTP request the CLI forwards.
///
/// `headers` entries use the curl form `Name: value`. A Host header is derived
/// from the URL authority unless one is given explicitly.
pub fn build_request(
    method: &str,
    url: &str,
    headers: &[String],
    data: Option<String>,
) -> Result<Request<Bytes>> {
    let method = Method::from_bytes(method.as_bytes())
        .map_err(|_| anyhow!("invalid method: {}", method))?;
    let uri: Uri = url.parse().with_context(|| format!("invalid url: {}", url))?;

    let mut req = Request::builder()
        .method(method)
        .uri(uri.clone())
        .body(data.map(Bytes::from).unwrap_or_default())?;

    for raw in headers {
        let (name, value) = raw
            .split_once(':')
            .ok_or_else(|| anyhow!("header must be 'Name: value': {}", raw))?;
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .with_context(|| format!("invalid header name: {}", raw))?;
        let value = HeaderValue::from_str(value.trim())
            .with_context(|| format!("invalid header value: {}", raw))?;
        req.headers_mut().append(name, value);
    }

    if !req.headers().contains_key(HOST) {
        if let Some(authority) = uri.authority() {
            req.headers_mut()
                .insert(HOST, HeaderValue::from_str(authority.as_str())?);
        }
    }
    Ok(req)
}

/// Connect to the configured application and forward one request.
pub async fn run(cfg: &FcgxConfig, req: &Request<Bytes>) -> Result<Response> {
    let backend = cfg.backend()?;
    let timeout_dur = Duration::from_millis(cfg.connect_timeout_ms);
    debug!(backend = %backend, "connecting to FastCGI application");

    let client = FastCgiClient::connect(&backend, timeout_dur)
        .await
        .with_context(|| format!("failed to connect to {}", backend))?
        .with_server_info(cfg.server_info())
        .with_response_format(cfg.response_format.into())
        .with_keep_conn(cfg.keep_conn)
        .with_max_stderr_bytes(cfg.max_stderr_bytes);

    let resp = client
        .forward(req, &cfg.document_root, &cfg.script)
        .await
        .with_context(|| format!("FastCGI request to {} failed", backend))?;
    info!(
        method = %req.method(),
        uri = %req.uri(),
        status = resp.status,
        "request complete"
    );

    // The application may already have closed its side.
    let _ = client.close().await;
    Ok(resp)
}

/// Status line and header block, as printed before the body.
pub fn render_head(resp: &Response) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{:?} {:03} {}", resp.version, resp.status, resp.reason);
    for (name, value) in &resp.headers {
        let _ = writeln!(out, "{}: {}", name, String::from_utf8_lossy(value.as_bytes()));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_request_applies_headers_and_body() {
        let req = build_request(
            "post",
            "http://example.com:8080/submit.php?a=1",
            &["Content-Type: application/json".to_string(), "X-Tag: a".to_string(), "X-Tag: b".to_string()],
            Some("{}".to_string()),
        )
        .expect("request");
        // Methods are case sensitive; "post" is an extension method, not POST.
        assert_eq!(req.method().as_str(), "post");
        assert_eq!(req.uri().path(), "/submit.php");
        assert_eq!(req.uri().query(), Some("a=1"));
        assert_eq!(req.headers()["content-type"], "application/json");
        assert_eq!(req.headers().get_all("x-tag").iter().count(), 2);
        assert_eq!(req.headers()[HOST], "example.com:8080");
        assert_eq!(req.body().as_ref(), b"{}");
    }

    #[test]
    fn explicit_host_is_kept() {
        let req = build_request(
            "GET",
            "http://127.0.0.1/",
            &["Host: app.internal".to_string()],
            None,
        )
        .expect("request");
        assert_eq!(req.headers()[HOST], "app.internal");
        assert!(req.body().is_empty());
    }

    #[test]
    fn origin_form_has_no_host() {
        let req = build_request("GET", "/status", &[], None).expect("request");
        assert!(req.headers().get(HOST).is_none());
    }

    #[test]
    fn build_request_rejects_bad_input() {
        assert!(build_request("GET", "/", &["NoColon".to_string()], None).is_err());
        assert!(build_request("GET", "/", &["Bad Name: v".to_string()], None).is_err());
        assert!(build_request("BAD METHOD", "/", &[], None).is_err());
        assert!(build_request("GET", "http://exa mple.com/", &[], None).is_err());
    }

    #[test]
    fn render_head_prints_status_line_and_headers() {
        let raw = Bytes::from_static(
            b"HTTP/1.1 404 Not Found\r\nContent-Type: text/html\r\nSet-Cookie: a=1\r\nSet-Cookie: b=2\r\n\r\nmissing",
        );
        let resp = fcgx_core::response::parse_response(raw).expect("parse");
        let head = render_head(&resp);
        let mut lines = head.lines();
        assert_eq!(lines.next(), Some("HTTP/1.1 404 Not Found"));
        let rest: Vec<&str> = lines.collect();
        assert!(rest.contains(&"content-type: text/html"));
        assert!(rest.contains(&"set-cookie: a=1"));
        assert!(rest.contains(&"set-cookie: b=2"));
    }
}

use crate::error::Result;
use crate::params::encode_pair;
use crate::record::MAX_CONTENT_LEN;
use crate::stream::split_body;
use bytes::Bytes;
use std::collections::HashMap;
use std::path::Path;

/// Every request on a connection uses this id; requests are never multiplexed.
pub const DEFAULT_REQUEST_ID: u16 = 1;

/// Identity of the forwarding server as reported to the application.
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub software: String,
    pub name: String,
    pub addr: String,
    pub port: u16,
    pub remote_addr: String,
    pub remote_port: Option<u16>,
    /// Static params applied before any request-derived value.
    pub params: HashMap<String, String>,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            software: concat!("fcgx/", env!("CARGO_PKG_VERSION")).to_string(),
            name: "localhost".to_string(),
            addr: "localhost".to_string(),
            port: 8000,
            remote_addr: "127.0.0.1".to_string(),
            remote_port: None,
            params: HashMap::new(),
        }
    }
}

/// A request ready to be encoded onto a FastCGI connection.
#[derive(Debug, Clone)]
pub struct FcgiRequest {
    pub id: u16,
    pub context: HashMap<String, String>,
    pub body: Bytes,
}

fn server_protocol(version: http::Version) -> &'static str {
    match version {
        http::Version::HTTP_09 => "HTTP/0.9",
        http::Version::HTTP_10 => "HTTP/1.0",
        http::Version::HTTP_11 => "HTTP/1.1",
        http::Version::HTTP_2 => "HTTP/2.0",
        http::Version::HTTP_3 => "HTTP/3.0",
        _ => "HTTP/1.1",
    }
}

/// `Content-Type` -> `CONTENT_TYPE`
fn env_name(header_name: &str) -> String {
    header_name
        .bytes()
        .map(|b| match b {
            b'-' => '_',
            _ => b.to_ascii_uppercase() as char,
        })
        .collect()
}

impl FcgiRequest {
    pub fn from_http(req: &http::Request<Bytes>, server: &ServerInfo) -> Self {
        let mut ctx: HashMap<String, String> = server.params.clone();
        let mut put = |k: &str, v: &str| {
            ctx.insert(k.to_string(), v.to_string());
        };

        put("SERVER_SOFTWARE", &server.software);
        put("QUERY_STRING", req.uri().query().unwrap_or(""));
        put("REMOTE_ADDR", &server.remote_addr);
        if let Some(port) = server.remote_port {
            put("REMOTE_PORT", &port.to_string());
        }
        put("REQUEST_METHOD", req.method().as_str());
        put("REQUEST_URI", req.uri().path());
        put("SERVER_ADDR", &server.addr);
        put("SERVER_PORT", &server.port.to_string());
        put("SERVER_NAME", &server.name);
        put("SERVER_PROTOCOL", server_protocol(req.version()));
        put("GATEWAY_INTERFACE", "CGI/1.1");
        if !req.body().is_empty() {
            put("CONTENT_LENGTH", &req.body().len().to_string());
        }

        // Params have no multi-value convention, so repeated headers are joined.
        // Both the bare and the HTTP_ prefixed names are sent since applications
        // disagree on which one they read.
        for name in req.headers().keys() {
            let joined = req
                .headers()
                .get_all(name)
                .iter()
                .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
                .collect::<Vec<_>>()
                .join(", ");
            let key = env_name(name.as_str());
            ctx.insert(format!("HTTP_{key}"), joined.clone());
            ctx.insert(key, joined);
        }

        Self {
            id: DEFAULT_REQUEST_ID,
            context: ctx,
            body: req.body().clone(),
        }
    }

    pub fn root(&mut self, path: &str) -> &mut Self {
        self.context
            .insert("DOCUMENT_ROOT".to_string(), path.to_string());
        self
    }

    /// Resolve the script against DOCUMENT_ROOT; call after [`FcgiRequest::root`].
    pub fn script(&mut self, filename: &str) -> &mut Self {
        let relative = filename.trim_start_matches('/');
        let root = self
            .context
            .get("DOCUMENT_ROOT")
            .map(String::as_str)
            .unwrap_or("");
        let full = Path::new(root).join(relative);
        self.context.insert(
            "SCRIPT_FILENAME".to_string(),
            full.to_string_lossy().into_owned(),
        );
        self.context
            .insert("SCRIPT_NAME".to_string(), format!("/{relative}"));
        self
    }

    /// One encoded name-value block per context entry, in map order.
    pub fn encode_context(&self) -> Result<Vec<Bytes>> {
        self.context
            .iter()
            .map(|(k, v)| encode_pair(k.as_bytes(), v.as_bytes()))
            .collect()
    }

    pub fn body_chunks(&self) -> Vec<Bytes> {
        split_body(&self.body, MAX_CONTENT_LEN)
    }
}

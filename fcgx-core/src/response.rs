//! Reconstruction of an HTTP response from the application's STDOUT bytes.

use crate::chunked::{read_line, ChunkedDecoder};
use crate::error::{Error, Result};
use bytes::{Bytes, BytesMut};
use http::header::{HeaderName, HeaderValue, CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{HeaderMap, StatusCode, Version};

/// How the application frames the head of its output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResponseFormat {
    /// `HTTP/1.1 200 OK` status line followed by headers.
    #[default]
    Http,
    /// CGI-style headers only; the status comes from a `Status:` header.
    Cgi,
}

#[derive(Debug)]
pub struct Response {
    pub version: Version,
    /// Always exactly three digits on the wire; may fall outside `StatusCode`'s range.
    pub status: u16,
    pub reason: String,
    pub headers: HeaderMap,
    /// Declared length, if any. Informational only: the body is never cut or padded to it.
    pub content_length: Option<u64>,
    pub body: ResponseBody,
}

impl Response {
    pub fn status_code(&self) -> Option<StatusCode> {
        StatusCode::from_u16(self.status).ok()
    }
}

/// Response body: either the literal remaining bytes or a lazy chunked decoder.
#[derive(Debug)]
pub enum ResponseBody {
    Full(Option<Bytes>),
    Chunked(ChunkedDecoder),
}

impl ResponseBody {
    pub fn is_chunked(&self) -> bool {
        matches!(self, Self::Chunked(_))
    }

    /// Drain the body into one buffer, decoding chunks as needed.
    pub fn collect_bytes(self) -> Result<Bytes> {
        match self {
            Self::Full(bytes) => Ok(bytes.unwrap_or_default()),
            Self::Chunked(decoder) => {
                let mut out = BytesMut::new();
                for chunk in decoder {
                    out.extend_from_slice(&chunk?);
                }
                Ok(out.freeze())
            }
        }
    }
}

impl Iterator for ResponseBody {
    type Item = Result<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Self::Full(bytes) => bytes.take().filter(|b| !b.is_empty()).map(Ok),
            Self::Chunked(decoder) => decoder.next(),
        }
    }
}

fn parse_version(proto: &str) -> Option<Version> {
    match proto {
        "HTTP/0.9" => Some(Version::HTTP_09),
        "HTTP/1.0" => Some(Version::HTTP_10),
        "HTTP/1.1" => Some(Version::HTTP_11),
        "HTTP/2" | "HTTP/2.0" => Some(Version::HTTP_2),
        "HTTP/3" | "HTTP/3.0" => Some(Version::HTTP_3),
        _ => None,
    }
}

fn parse_status_code(code: &str) -> Result<u16> {
    if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::MalformedStatus(code.to_string()));
    }
    code.parse()
        .map_err(|_| Error::MalformedStatus(code.to_string()))
}

/// Parse `PROTO CODE [REASON]`.
fn parse_status_line(line: &str) -> Result<(Version, u16, String)> {
    let Some((proto, rest)) = line.split_once(' ') else {
        return Err(Error::MalformedResponse(line.to_string()));
    };
    let rest = rest.trim_start_matches(' ');
    let (code, reason) = rest.split_once(' ').unwrap_or((rest, ""));
    let status = parse_status_code(code)?;
    let version = parse_version(proto).ok_or_else(|| Error::MalformedVersion(proto.to_string()))?;
    Ok((version, status, reason.to_string()))
}

fn append_header(headers: &mut HeaderMap, name: &[u8], value: &[u8]) -> Result<()> {
    let malformed = || {
        let mut line = String::from_utf8_lossy(name).into_owned();
        line.push(':');
        line.push_str(&String::from_utf8_lossy(value));
        Error::MalformedHeader(line)
    };
    let name = HeaderName::from_bytes(name).map_err(|_| malformed())?;
    let value = HeaderValue::from_bytes(value).map_err(|_| malformed())?;
    headers.append(name, value);
    Ok(())
}

/// Read `Name: value` lines up to a blank line, unfolding continuation lines.
///
/// Repeated names end up as multiple values of one entry.
fn read_header_block(buf: &mut Bytes) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    let mut pending: Option<(Bytes, Vec<u8>)> = None;

    loop {
        let line = read_line(buf).ok_or(Error::UnexpectedEof)?;
        if line.is_empty() {
            break;
        }
        if matches!(line[0], b' ' | b'\t') {
            let Some((_, value)) = pending.as_mut() else {
                return Err(Error::MalformedHeader(
                    String::from_utf8_lossy(&line).into_owned(),
                ));
            };
            let cont = line.trim_ascii();
            if !cont.is_empty() {
                if !value.is_empty() {
                    value.push(b' ');
                }
                value.extend_from_slice(cont);
            }
            continue;
        }
        if let Some((name, value)) = pending.take() {
            append_header(&mut headers, &name, &value)?;
        }
        let Some(colon) = line.iter().position(|&b| b == b':') else {
            return Err(Error::MalformedHeader(
                String::from_utf8_lossy(&line).into_owned(),
            ));
        };
        let name = line.slice(..colon);
        let value = line[colon + 1..].trim_ascii().to_vec();
        pending = Some((name, value));
    }
    if let Some((name, value)) = pending {
        append_header(&mut headers, &name, &value)?;
    }
    Ok(headers)
}

/// True when the first token of the first Transfer-Encoding value is `chunked`.
fn is_chunked(headers: &HeaderMap) -> bool {
    headers
        .get(TRANSFER_ENCODING)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .is_some_and(|token| token.trim() == "chunked")
}

fn finish(
    version: Version,
    status: u16,
    reason: String,
    headers: HeaderMap,
    rest: Bytes,
) -> Response {
    let content_length = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    let body = if is_chunked(&headers) {
        ResponseBody::Chunked(ChunkedDecoder::new(rest))
    } else {
        ResponseBody::Full(Some(rest))
    };
    Response {
        version,
        status,
        reason,
        headers,
        content_length,
        body,
    }
}

/// Parse raw application output that starts with an HTTP status line.
pub fn parse_response(raw: Bytes) -> Result<Response> {
    let mut buf = raw;
    if buf.is_empty() {
        return Err(Error::UnexpectedEof);
    }
    // A final line without a terminator still counts as the status line.
    let line = read_line(&mut buf).unwrap_or_else(|| std::mem::take(&mut buf));
    let line = String::from_utf8_lossy(&line).into_owned();
    let (version, status, reason) = parse_status_line(&line)?;
    let headers = read_header_block(&mut buf)?;
    Ok(finish(version, status, reason, headers, buf))
}

/// Parse CGI-style output: headers, optional `Status: NNN reason`, then body.
pub fn parse_cgi_response(raw: Bytes) -> Result<Response> {
    let mut buf = raw;
    let mut headers = read_header_block(&mut buf)?;
    let (status, reason) = match headers.remove("status") {
        Some(value) => {
            let value = value
                .to_str()
                .map_err(|_| Error::MalformedStatus(String::from_utf8_lossy(value.as_bytes()).into_owned()))?
                .trim()
                .to_string();
            let (code, reason) = value.split_once(' ').unwrap_or((value.as_str(), ""));
            (parse_status_code(code)?, reason.trim().to_string())
        }
        None => (200, "OK".to_string()),
    };
    Ok(finish(Version::HTTP_11, status, reason, headers, buf))
}

pub fn parse_with_format(raw: Bytes, format: ResponseFormat) -> Result<Response> {
    match format {
        ResponseFormat::Http => parse_response(raw),
        ResponseFormat::Cgi => parse_cgi_response(raw),
    }
}

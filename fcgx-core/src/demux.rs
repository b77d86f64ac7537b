use crate::error::{Error, Result};
use crate::record::{read_record, EndRequest, ProtocolStatus, RecordType};
use bytes::{Bytes, BytesMut};
use tokio::io::AsyncRead;
use tracing::{debug, warn};

pub const DEFAULT_MAX_STDERR_BYTES: usize = 1024 * 1024;

/// Application output collected for one request.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub stdout: Bytes,
    pub stderr: Bytes,
    pub end: EndRequest,
}

/// Drain records until FCGI_END_REQUEST.
///
/// STDOUT content is accumulated in arrival order; STDERR is kept apart and
/// capped at `max_stderr_bytes`. Nothing past the END_REQUEST record is read.
/// A failed read is returned as an error, never as a short successful buffer.
pub async fn read_response<R: AsyncRead + Unpin>(
    reader: &mut R,
    request_id: u16,
    max_stderr_bytes: usize,
) -> Result<RawResponse> {
    let mut stdout = BytesMut::new();
    let mut stderr = BytesMut::new();

    let end = loop {
        let rec = read_record(reader).await?;
        let rid = rec.request_id();
        if rid == 0 {
            // Management records never belong to the in-flight request.
            debug!(record_type = ?rec.record_type(), "skipping FastCGI management record");
            continue;
        }
        if rid != request_id {
            return Err(Error::UnexpectedRequestId(rid));
        }

        match rec.record_type() {
            RecordType::Stdout => {
                stdout.extend_from_slice(&rec.content);
            }
            RecordType::Stderr => {
                if !rec.content.is_empty() && stderr.len() < max_stderr_bytes {
                    let remaining = max_stderr_bytes.saturating_sub(stderr.len());
                    let take = std::cmp::min(remaining, rec.content.len());
                    stderr.extend_from_slice(&rec.content[..take]);
                }
            }
            RecordType::EndRequest => break EndRequest::decode(&rec.content),
            other => {
                debug!(record_type = ?other, "ignoring FastCGI record");
            }
        }
    };

    if !stderr.is_empty() {
        let stderr_str = String::from_utf8_lossy(&stderr);
        warn!(fastcgi_stderr = %stderr_str, "FastCGI backend stderr");
    }

    if end.protocol_status != ProtocolStatus::RequestComplete {
        return Err(Error::Rejected(end.protocol_status));
    }

    debug!(
        stdout_bytes = stdout.len(),
        app_status = end.app_status,
        "FastCGI request complete"
    );
    Ok(RawResponse {
        stdout: stdout.freeze(),
        stderr: stderr.freeze(),
        end,
    })
}

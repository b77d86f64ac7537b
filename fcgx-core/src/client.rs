use crate::context::{FcgiRequest, ServerInfo};
use crate::demux::{read_response, RawResponse, DEFAULT_MAX_STDERR_BYTES};
use crate::error::{Error, Result};
use crate::record::{write_record, BeginRequest, Record, RecordType};
use crate::response::{parse_with_format, Response, ResponseFormat};
use crate::stream::{frame_stream, write_stream};
use crate::transport::{connect, Backend, FastCgiStream};
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::time::Duration;
use tracing::{debug, warn};

/// One FastCGI connection carrying one request at a time.
///
/// The connection lock is held for the whole request cycle, so concurrent
/// callers never interleave records on the wire. A cycle that fails after the
/// first byte is written leaves the wire state unknown; every later request on
/// the same client then fails with [`Error::ConnectionBroken`].
#[derive(Debug)]
pub struct FastCgiClient<S> {
    conn: Mutex<Conn<S>>,
    server: ServerInfo,
    format: ResponseFormat,
    keep_conn: bool,
    max_stderr_bytes: usize,
}

#[derive(Debug)]
struct Conn<S> {
    stream: S,
    broken: bool,
}

impl FastCgiClient<FastCgiStream> {
    pub async fn connect(backend: &Backend, timeout_dur: Duration) -> Result<Self> {
        let stream = connect(backend, timeout_dur).await?;
        Ok(Self::new(stream))
    }
}

impl<S> FastCgiClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            conn: Mutex::new(Conn {
                stream,
                broken: false,
            }),
            server: ServerInfo::default(),
            format: ResponseFormat::default(),
            keep_conn: false,
            max_stderr_bytes: DEFAULT_MAX_STDERR_BYTES,
        }
    }

    pub fn with_server_info(mut self, server: ServerInfo) -> Self {
        self.server = server;
        self
    }

    pub fn with_response_format(mut self, format: ResponseFormat) -> Self {
        self.format = format;
        self
    }

    /// Ask the application to keep the connection open after each request.
    pub fn with_keep_conn(mut self, keep_conn: bool) -> Self {
        self.keep_conn = keep_conn;
        self
    }

    pub fn with_max_stderr_bytes(mut self, max: usize) -> Self {
        self.max_stderr_bytes = max;
        self
    }

    pub fn server_info(&self) -> &ServerInfo {
        &self.server
    }

    /// Forward an HTTP request to the script `script` under `root`.
    pub async fn forward(
        &self,
        req: &http::Request<Bytes>,
        root: &str,
        script: &str,
    ) -> Result<Response> {
        let mut fcgi_req = FcgiRequest::from_http(req, &self.server);
        fcgi_req.root(root).script(script);
        self.send_and_parse(&fcgi_req).await
    }

    /// Run one request cycle and parse STDOUT with the configured format.
    pub async fn send_and_parse(&self, req: &FcgiRequest) -> Result<Response> {
        let raw = self.send(req).await?;
        parse_with_format(raw.stdout, self.format)
    }

    /// Run one request cycle and return the raw application output.
    pub async fn send(&self, req: &FcgiRequest) -> Result<RawResponse> {
        // Encode up front so that encoding errors never leave a half-written request.
        let begin = BeginRequest::responder(self.keep_conn).into_record(req.id);
        let params = frame_stream(RecordType::Params, req.id, req.encode_context()?)?;
        let stdin = frame_stream(RecordType::Stdin, req.id, req.body_chunks())?;

        let mut conn = self.conn.lock().await;
        if conn.broken {
            return Err(Error::ConnectionBroken);
        }
        debug!(
            request_id = req.id,
            params = req.context.len(),
            body_bytes = req.body.len(),
            "sending FastCGI request"
        );
        let res = cycle(
            &mut conn.stream,
            req.id,
            &begin,
            &params,
            &stdin,
            self.max_stderr_bytes,
        )
        .await;
        // A rejection arrives in a complete END_REQUEST, so the wire is still in sync.
        if matches!(res, Err(ref e) if !matches!(e, Error::Rejected(_))) {
            warn!(request_id = req.id, "marking FastCGI connection unusable");
            conn.broken = true;
        }
        res
    }

    /// Shut the transport down.
    pub async fn close(self) -> Result<()> {
        let mut conn = self.conn.into_inner();
        conn.stream.shutdown().await?;
        Ok(())
    }
}

async fn cycle<S>(
    stream: &mut S,
    request_id: u16,
    begin: &Record,
    params: &[Record],
    stdin: &[Record],
    max_stderr_bytes: usize,
) -> Result<RawResponse>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    write_record(stream, begin).await?;
    write_stream(stream, params).await?;
    write_stream(stream, stdin).await?;
    stream.flush().await?;
    read_response(stream, request_id, max_stderr_bytes).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::decode_pairs;
    use crate::record::read_record;
    use std::collections::HashMap;
    use tokio::io::DuplexStream;

    async fn read_stream(app: &mut DuplexStream, expected: RecordType) -> Vec<Record> {
        let mut out = Vec::new();
        loop {
            let rec = read_record(app).await.expect("record");
            assert_eq!(rec.record_type(), expected);
            if rec.content.is_empty() {
                return out;
            }
            out.push(rec);
        }
    }

    async fn reply(app: &mut DuplexStream, stdout: &'static [u8]) {
        let out = Record::new(RecordType::Stdout, 1, Bytes::from_static(stdout)).expect("record");
        write_record(app, &out).await.expect("write");
        write_record(app, &Record::end_of_stream(RecordType::Stdout, 1))
            .await
            .expect("write");
        let end = Record::new(RecordType::EndRequest, 1, Bytes::from_static(&[0u8; 8])).expect("record");
        write_record(app, &end).await.expect("write");
    }

    #[tokio::test]
    async fn get_without_body_sends_no_stdin_stream() {
        let (client_io, mut app) = tokio::io::duplex(1 << 20);
        let client = FastCgiClient::new(client_io);

        let app_task = tokio::spawn(async move {
            let begin = read_record(&mut app).await.expect("begin");
            assert_eq!(begin.record_type(), RecordType::BeginRequest);
            assert_eq!(&begin.content[..3], &[0, 1, 0]);

            let params = read_stream(&mut app, RecordType::Params).await;
            let mut ctx = HashMap::new();
            for rec in &params {
                let pairs = decode_pairs(&rec.content).expect("pairs");
                assert_eq!(pairs.len(), 1);
                ctx.extend(pairs);
            }
            assert_eq!(ctx["REQUEST_METHOD"], "GET");
            assert_eq!(ctx["SCRIPT_FILENAME"], "/var/www/index.php");

            reply(&mut app, b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\n\r\nhi").await;

            // An empty body means no STDIN stream at all, not even a terminator.
            let extra =
                tokio::time::timeout(Duration::from_millis(100), read_record(&mut app)).await;
            assert!(extra.is_err(), "unexpected record after PARAMS");
        });

        let req = http::Request::builder()
            .uri("/index.php")
            .body(Bytes::new())
            .expect("request");
        let resp = client
            .forward(&req, "/var/www", "index.php")
            .await
            .expect("forward");
        app_task.await.expect("app");

        assert_eq!(resp.status, 200);
        assert_eq!(resp.body.collect_bytes().expect("body"), Bytes::from_static(b"hi"));
    }

    #[tokio::test]
    async fn post_body_is_streamed_on_stdin() {
        let (client_io, mut app) = tokio::io::duplex(1 << 20);
        let client = FastCgiClient::new(client_io).with_keep_conn(true);
        let body = Bytes::from(vec![b'x'; 70_000]);
        let expected = body.clone();

        let app_task = tokio::spawn(async move {
            let begin = read_record(&mut app).await.expect("begin");
            assert_eq!(begin.content[2], 1);
            read_stream(&mut app, RecordType::Params).await;
            let stdin = read_stream(&mut app, RecordType::Stdin).await;
            assert_eq!(stdin.len(), 2);
            let joined: Vec<u8> = stdin.iter().flat_map(|r| r.content.to_vec()).collect();
            assert_eq!(joined, expected);
            reply(&mut app, b"HTTP/1.1 201 Created\r\n\r\n").await;
        });

        let req = http::Request::builder()
            .method("POST")
            .uri("/upload")
            .body(body)
            .expect("request");
        let resp = client
            .forward(&req, "/srv", "upload.php")
            .await
            .expect("forward");
        app_task.await.expect("app");
        assert_eq!(resp.status, 201);
        assert_eq!(resp.reason, "Created");
    }

    #[tokio::test]
    async fn application_hangup_is_an_error() {
        let (client_io, mut app) = tokio::io::duplex(1 << 20);
        let client = FastCgiClient::new(client_io);

        let app_task = tokio::spawn(async move {
            read_record(&mut app).await.expect("begin");
            read_stream(&mut app, RecordType::Params).await;
            let out =
                Record::new(RecordType::Stdout, 1, Bytes::from_static(b"HTTP/1.1 200 OK\r\n"))
                    .expect("record");
            write_record(&mut app, &out).await.expect("write");
            drop(app);
        });

        let req = http::Request::builder()
            .uri("/")
            .body(Bytes::new())
            .expect("request");
        let err = client
            .forward(&req, "/srv", "index.php")
            .await
            .expect_err("must fail");
        app_task.await.expect("app");
        assert!(matches!(err, crate::Error::Io(_)));
    }

    #[tokio::test]
    async fn foreign_request_id_breaks_the_connection() {
        let (client_io, mut app) = tokio::io::duplex(1 << 20);
        let client = FastCgiClient::new(client_io).with_keep_conn(true);

        let app_task = tokio::spawn(async move {
            read_record(&mut app).await.expect("begin");
            read_stream(&mut app, RecordType::Params).await;
            let stray =
                Record::new(RecordType::Stdout, 7, Bytes::from_static(b"stale")).expect("record");
            write_record(&mut app, &stray).await.expect("write");
            // Leftovers of the broken cycle that a later request must never see.
            reply(&mut app, b"HTTP/1.1 200 OK\r\n\r\nstale").await;
            app
        });

        let req = http::Request::builder()
            .uri("/")
            .body(Bytes::new())
            .expect("request");
        let err = client
            .forward(&req, "/srv", "index.php")
            .await
            .expect_err("must fail");
        assert!(matches!(err, crate::Error::UnexpectedRequestId(7)));
        let _app = app_task.await.expect("app");

        let err = client
            .forward(&req, "/srv", "index.php")
            .await
            .expect_err("must fail");
        assert!(matches!(err, crate::Error::ConnectionBroken));
    }

    #[tokio::test]
    async fn rejected_request_keeps_the_connection_usable() {
        let (client_io, mut app) = tokio::io::duplex(1 << 20);
        let client = FastCgiClient::new(client_io).with_keep_conn(true);

        let app_task = tokio::spawn(async move {
            read_record(&mut app).await.expect("begin");
            read_stream(&mut app, RecordType::Params).await;
            let mut body = [0u8; 8];
            body[4] = 2; // overloaded
            let end = Record::new(RecordType::EndRequest, 1, Bytes::copy_from_slice(&body))
                .expect("record");
            write_record(&mut app, &end).await.expect("write");

            read_record(&mut app).await.expect("begin");
            read_stream(&mut app, RecordType::Params).await;
            reply(&mut app, b"HTTP/1.1 200 OK\r\n\r\nok").await;
        });

        let req = http::Request::builder()
            .uri("/")
            .body(Bytes::new())
            .expect("request");
        let err = client
            .forward(&req, "/srv", "index.php")
            .await
            .expect_err("must fail");
        assert!(matches!(err, crate::Error::Rejected(_)));
        let resp = client
            .forward(&req, "/srv", "index.php")
            .await
            .expect("second request");
        app_task.await.expect("app");
        assert_eq!(resp.body.collect_bytes().expect("body"), Bytes::from_static(b"ok"));
    }

    #[tokio::test]
    async fn cgi_format_reads_status_header() {
        let (client_io, mut app) = tokio::io::duplex(1 << 20);
        let client = FastCgiClient::new(client_io).with_response_format(ResponseFormat::Cgi);

        let app_task = tokio::spawn(async move {
            read_record(&mut app).await.expect("begin");
            read_stream(&mut app, RecordType::Params).await;
            reply(&mut app, b"Status: 302 Found\r\nLocation: /login\r\n\r\n").await;
        });

        let req = http::Request::builder()
            .uri("/")
            .body(Bytes::new())
            .expect("request");
        let resp = client
            .forward(&req, "/srv", "index.php")
            .await
            .expect("forward");
        app_task.await.expect("app");
        assert_eq!(resp.status, 302);
        assert_eq!(resp.headers.get("location").unwrap(), "/login");
    }
}

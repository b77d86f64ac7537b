use bytes::Bytes;
use fcgx::config::parse_config;
use fcgx::forward::{build_request, render_head, run};
use fcgx_core::params::decode_pairs;
use fcgx_core::record::{read_record, write_record, Record, RecordType};
use std::collections::HashMap;
use tokio::net::{TcpListener, TcpStream};

async fn read_params(stream: &mut TcpStream) -> HashMap<String, String> {
    let begin = read_record(stream).await.expect("begin");
    assert_eq!(begin.record_type(), RecordType::BeginRequest);
    let mut params = HashMap::new();
    loop {
        let rec = read_record(stream).await.expect("params");
        assert_eq!(rec.record_type(), RecordType::Params);
        if rec.content.is_empty() {
            return params;
        }
        params.extend(decode_pairs(&rec.content).expect("pairs"));
    }
}

async fn read_stdin(stream: &mut TcpStream) -> Vec<u8> {
    let mut body = Vec::new();
    loop {
        let rec = read_record(stream).await.expect("stdin");
        assert_eq!(rec.record_type(), RecordType::Stdin);
        if rec.content.is_empty() {
            return body;
        }
        body.extend_from_slice(&rec.content);
    }
}

async fn respond(stream: &mut TcpStream, stdout: &'static [u8]) {
    let out = Record::new(RecordType::Stdout, 1, Bytes::from_static(stdout)).expect("record");
    write_record(stream, &out).await.expect("stdout");
    write_record(stream, &Record::end_of_stream(RecordType::Stdout, 1))
        .await
        .expect("stdout end");
    let end = Record::new(RecordType::EndRequest, 1, Bytes::from_static(&[0u8; 8])).expect("record");
    write_record(stream, &end).await.expect("end");
}

#[tokio::test]
async fn forwards_post_using_config_values() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");

    let app = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("accept");
        let params = read_params(&mut stream).await;
        let body = read_stdin(&mut stream).await;
        respond(
            &mut stream,
            b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n",
        )
        .await;
        (params, body)
    });

    let cfg = parse_config(&format!(
        "address: fastcgi://{}\ndocument_root: /srv/www\nscript: api.php\nserver:\n  name: example.com\n  port: 443\nparams:\n  APP_ENV: test\n",
        addr
    ))
    .expect("config");
    cfg.validate().expect("valid");

    let req = build_request(
        "POST",
        "http://example.com/api?x=1",
        &["Content-Type: application/json".to_string()],
        Some(r#"{"k":1}"#.to_string()),
    )
    .expect("request");
    let resp = run(&cfg, &req).await.expect("forward");
    let (params, body) = app.await.expect("app");

    assert_eq!(params["SCRIPT_FILENAME"], "/srv/www/api.php");
    assert_eq!(params["SCRIPT_NAME"], "/api.php");
    assert_eq!(params["DOCUMENT_ROOT"], "/srv/www");
    assert_eq!(params["REQUEST_METHOD"], "POST");
    assert_eq!(params["QUERY_STRING"], "x=1");
    assert_eq!(params["CONTENT_LENGTH"], "7");
    assert_eq!(params["SERVER_NAME"], "example.com");
    assert_eq!(params["SERVER_PORT"], "443");
    assert_eq!(params["HTTP_HOST"], "example.com");
    assert_eq!(params["APP_ENV"], "test");
    assert_eq!(body, br#"{"k":1}"#);

    assert!(render_head(&resp).starts_with("HTTP/1.1 200 OK\n"));
    assert!(resp.body.is_chunked());
    assert_eq!(
        resp.body.collect_bytes().expect("body"),
        Bytes::from_static(b"hello")
    );
}

#[tokio::test]
async fn cgi_format_from_config() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");

    let app = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("accept");
        read_params(&mut stream).await;
        respond(&mut stream, b"Status: 404 Not Found\r\nContent-Type: text/html\r\n\r\nnope").await;
    });

    let cfg = parse_config(&format!(
        "address: \"{}\"\ndocument_root: /srv/www\nresponse_format: cgi\n",
        addr
    ))
    .expect("config");
    let req = build_request("GET", "/missing", &[], None).expect("request");
    let resp = run(&cfg, &req).await.expect("forward");
    app.await.expect("app");

    assert_eq!(resp.status, 404);
    assert_eq!(resp.reason, "Not Found");
    assert_eq!(resp.body.collect_bytes().expect("body"), Bytes::from_static(b"nope"));
}

#[tokio::test]
async fn unreachable_application_is_reported() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let cfg = parse_config(&format!("address: \"{}\"\ndocument_root: /srv/www\n", addr))
        .expect("config");
    let req = build_request("GET", "/", &[], None).expect("request");
    let err = run(&cfg, &req).await.expect_err("must fail");
    assert!(err.to_string().contains("failed to connect"), "{err:#}");
}

use std::fs;

use reqwest::Client;
use tempfile::tempdir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use ziputil::HttpTransfer;

/// One-shot HTTP server: accepts a single connection, captures the raw
/// request, and answers with `status` and `body`.
async fn serve_once(status: &'static str, body: &'static [u8]) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/files/payload.bin", listener.local_addr().unwrap());

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let request = read_request(&mut socket).await;

        let mut response = format!(
            "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            status,
            body.len()
        )
        .into_bytes();
        response.extend_from_slice(body);
        // The client may hang up as soon as it has seen the status line
        let _ = socket.write_all(&response).await;
        let _ = socket.shutdown().await;

        String::from_utf8_lossy(&request).into_owned()
    });

    (url, handle)
}

/// Read one request: headers, then a body framed by Content-Length or chunked encoding.
async fn read_request(socket: &mut tokio::net::TcpStream) -> Vec<u8> {
    let mut data = Vec::new();
    let mut buf = [0u8; 8192];

    loop {
        if let Some(end) = find(&data, b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&data[..end]).to_ascii_lowercase();
            let body_start = end + 4;

            let content_length = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok());

            let complete = match content_length {
                Some(len) => data.len() >= body_start + len,
                None if head.contains("transfer-encoding: chunked") => {
                    data[body_start..].ends_with(b"0\r\n\r\n")
                }
                None => true,
            };
            if complete {
                return data;
            }
        }

        let n = socket.read(&mut buf).await.unwrap();
        if n == 0 {
            return data;
        }
        data.extend_from_slice(&buf[..n]);
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn transfer() -> HttpTransfer {
    // Bypass any proxy configured in the environment
    HttpTransfer::with_client(Client::builder().no_proxy().build().unwrap())
}

#[tokio::test]
async fn download_writes_body_and_sends_api_key() {
    let (url, server) = serve_once("200 OK", b"archive bytes").await;
    let dir = tempdir().unwrap();
    let target = dir.path().join("payload.bin");

    let written = transfer().download(&target, &url, "secret").await.unwrap();

    assert_eq!(written, 13);
    assert_eq!(fs::read(&target).unwrap(), b"archive bytes");

    let request = server.await.unwrap().to_ascii_lowercase();
    assert!(request.starts_with("get /files/payload.bin "));
    assert!(request.contains("x-api-key: secret\r\n"));
}

#[tokio::test]
async fn download_omits_empty_api_key() {
    let (url, server) = serve_once("200 OK", b"").await;
    let dir = tempdir().unwrap();
    let target = dir.path().join("empty.bin");

    transfer().download(&target, &url, "").await.unwrap();

    assert!(fs::read(&target).unwrap().is_empty());
    let request = server.await.unwrap().to_ascii_lowercase();
    assert!(!request.contains("x-api-key"));
}

#[tokio::test]
async fn download_fails_on_not_found() {
    let (url, _server) = serve_once("404 Not Found", b"missing").await;
    let dir = tempdir().unwrap();

    let err = transfer()
        .download(&dir.path().join("x.bin"), &url, "")
        .await
        .unwrap_err();

    assert!(err.to_string().contains("404 Not Found"), "{err}");
}

#[tokio::test]
async fn download_fails_when_local_file_cannot_be_created() {
    let dir = tempdir().unwrap();
    let target = dir.path().join("no/such/dir/x.bin");

    let result = transfer()
        .download(&target, "http://127.0.0.1:9/never-contacted", "")
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn upload_sends_multipart_file_field() {
    let (url, server) = serve_once("200 OK", b"ok").await;
    let dir = tempdir().unwrap();
    let source = dir.path().join("report.txt");
    fs::write(&source, "quarterly numbers").unwrap();

    transfer().upload(&url, &source, "k3y").await.unwrap();

    let request = server.await.unwrap();
    let lower = request.to_ascii_lowercase();
    assert!(lower.starts_with("post /files/payload.bin "));
    assert!(lower.contains("x-api-key: k3y\r\n"));
    assert!(lower.contains("content-type: multipart/form-data; boundary="));
    assert!(request.contains("name=\"file\"; filename=\"report.txt\""));
    assert!(request.contains("quarterly numbers"));
}

#[tokio::test]
async fn upload_fails_on_server_error() {
    let (url, _server) = serve_once("500 Internal Server Error", b"boom").await;
    let dir = tempdir().unwrap();
    let source = dir.path().join("report.txt");
    fs::write(&source, "data").unwrap();

    let err = transfer().upload(&url, &source, "").await.unwrap_err();

    assert!(err.to_string().contains("500 Internal Server Error"), "{err}");
}

#[tokio::test]
async fn upload_fails_for_missing_file() {
    let dir = tempdir().unwrap();

    let result = transfer()
        .upload("http://127.0.0.1:9/never-contacted", &dir.path().join("nope.txt"), "")
        .await;
    assert!(result.is_err());
}

//! Test infrastructure for seaclient.
//!
//! Provides an in-process HTTP/1.1 server that answers each request path
//! with a canned [`MockResponse`] and records every request it receives.
//! Connections are closed after one exchange, so clients never reuse them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// How long a stalled response keeps its connection open.
const STALL_DURATION: Duration = Duration::from_secs(60);

/// A canned response for one route.
#[derive(Debug, Clone)]
pub struct MockResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    stall_after: Option<usize>,
    chunked: bool,
    trickle: Option<(usize, Duration)>,
}

impl MockResponse {
    /// `200 OK` with the given body.
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self::with_status(200, body)
    }

    /// Arbitrary status with the given body.
    pub fn with_status(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
            stall_after: None,
            chunked: false,
            trickle: None,
        }
    }

    /// `302 Found` pointing at `location`.
    pub fn redirect(location: &str) -> Self {
        Self::with_status(302, Vec::new()).header("Location", location)
    }

    /// Adds a response header.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Sends the headers and the first `bytes` of the body, then keeps the
    /// connection open without completing the response.
    pub fn stall_after(mut self, bytes: usize) -> Self {
        self.stall_after = Some(bytes);
        self
    }

    /// Sends the body with `Transfer-Encoding: chunked` and no
    /// `Content-Length`.
    pub fn chunked(mut self) -> Self {
        self.chunked = true;
        self
    }

    /// Writes the body `piece` bytes at a time, pausing `interval` after
    /// each write.
    pub fn trickle(mut self, piece: usize, interval: Duration) -> Self {
        self.trickle = Some((piece.max(1), interval));
        self
    }
}

/// A request as seen by the server.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub target: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    /// Request path without the query string.
    pub fn path(&self) -> &str {
        self.target.split('?').next().unwrap_or(&self.target)
    }

    /// Raw query string, if any.
    pub fn query(&self) -> Option<&str> {
        self.target.split_once('?').map(|(_, q)| q)
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

type Routes = Arc<Mutex<HashMap<String, MockResponse>>>;
type Requests = Arc<Mutex<Vec<RecordedRequest>>>;

/// Scripted HTTP server bound to an ephemeral localhost port.
pub struct MockServer {
    url: String,
    routes: Routes,
    requests: Requests,
    handle: JoinHandle<()>,
}

impl MockServer {
    /// Binds a listener and starts serving on the current runtime.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock listener");
        let port = listener.local_addr().expect("mock listener addr").port();
        let routes: Routes = Arc::new(Mutex::new(HashMap::new()));
        let requests: Requests = Arc::new(Mutex::new(Vec::new()));

        let handle = tokio::spawn({
            let routes = Arc::clone(&routes);
            let requests = Arc::clone(&requests);
            async move {
                while let Ok((stream, _)) = listener.accept().await {
                    tokio::spawn(serve(stream, Arc::clone(&routes), Arc::clone(&requests)));
                }
            }
        });

        Self {
            url: format!("http://127.0.0.1:{port}"),
            routes,
            requests,
            handle,
        }
    }

    /// Base URL without a trailing slash, e.g. `http://127.0.0.1:4321`.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Absolute URL for `path` (which must start with `/`).
    pub fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.url, path)
    }

    /// Installs (or replaces) the response for `path`.
    pub fn route(&self, path: &str, response: MockResponse) -> &Self {
        self.routes
            .lock()
            .expect("routes lock")
            .insert(path.to_string(), response);
        self
    }

    /// All requests received so far, in arrival order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    /// Number of requests received for `path`.
    pub fn hits(&self, path: &str) -> usize {
        self.requests
            .lock()
            .expect("requests lock")
            .iter()
            .filter(|r| r.path() == path)
            .count()
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve(mut stream: TcpStream, routes: Routes, requests: Requests) {
    let Some(request) = read_request(&mut stream).await else {
        return;
    };
    let response = routes
        .lock()
        .expect("routes lock")
        .get(request.path())
        .cloned()
        .unwrap_or_else(|| MockResponse::with_status(404, "not found"));
    requests.lock().expect("requests lock").push(request);
    write_response(&mut stream, &response).await;
}

async fn read_request(stream: &mut TcpStream) -> Option<RecordedRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];

    let head_end = loop {
        if let Some(pos) = find(&buf, b"\r\n\r\n") {
            break pos + 4;
        }
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let target = request_line.next()?.to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();

    let mut request = RecordedRequest {
        method,
        target,
        headers,
        body: buf[head_end..].to_vec(),
    };

    if let Some(len) = request
        .header("content-length")
        .and_then(|v| v.parse::<usize>().ok())
    {
        while request.body.len() < len {
            let n = stream.read(&mut chunk).await.ok()?;
            if n == 0 {
                break;
            }
            request.body.extend_from_slice(&chunk[..n]);
        }
        request.body.truncate(len);
    } else if request
        .header("transfer-encoding")
        .is_some_and(|v| v.eq_ignore_ascii_case("chunked"))
    {
        while !request.body.ends_with(b"0\r\n\r\n") {
            let n = stream.read(&mut chunk).await.ok()?;
            if n == 0 {
                break;
            }
            request.body.extend_from_slice(&chunk[..n]);
        }
        request.body = decode_chunked(&request.body);
    }

    Some(request)
}

async fn write_response(stream: &mut TcpStream, response: &MockResponse) {
    let mut head = format!("HTTP/1.1 {} Mock\r\n", response.status);
    for (name, value) in &response.headers {
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    if response.chunked {
        head.push_str("Transfer-Encoding: chunked\r\n");
    } else {
        head.push_str(&format!("Content-Length: {}\r\n", response.body.len()));
    }
    head.push_str("Connection: close\r\n\r\n");

    if stream.write_all(head.as_bytes()).await.is_err() {
        return;
    }

    let sent = response
        .stall_after
        .map_or(response.body.len(), |n| n.min(response.body.len()));
    let piece = response.trickle.map_or(sent.max(1), |(piece, _)| piece);
    for part in response.body[..sent].chunks(piece) {
        if write_piece(stream, part, response.chunked).await.is_err() {
            return;
        }
        if let Some((_, interval)) = response.trickle {
            tokio::time::sleep(interval).await;
        }
    }

    if response.stall_after.is_some() {
        tokio::time::sleep(STALL_DURATION).await;
        return;
    }

    if response.chunked {
        let _ = stream.write_all(b"0\r\n\r\n").await;
    }
    let _ = stream.flush().await;
    let _ = stream.shutdown().await;
}

async fn write_piece(stream: &mut TcpStream, data: &[u8], chunked: bool) -> std::io::Result<()> {
    if chunked {
        stream
            .write_all(format!("{:x}\r\n", data.len()).as_bytes())
            .await?;
        stream.write_all(data).await?;
        stream.write_all(b"\r\n").await?;
    } else {
        stream.write_all(data).await?;
    }
    stream.flush().await
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn decode_chunked(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut rest = raw;
    while let Some(line_end) = find(rest, b"\r\n") {
        let size_line = String::from_utf8_lossy(&rest[..line_end]);
        let size_hex = size_line.split(';').next().unwrap_or("").trim();
        let Ok(size) = usize::from_str_radix(size_hex, 16) else {
            break;
        };
        if size == 0 {
            break;
        }
        let start = line_end + 2;
        let end = (start + size).min(rest.len());
        out.extend_from_slice(&rest[start..end]);
        rest = rest.get(end + 2..).unwrap_or(&[]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_chunked_body() {
        let raw = b"5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n";
        assert_eq!(decode_chunked(raw), b"hello world");
    }

    #[test]
    fn recorded_request_splits_target() {
        let req = RecordedRequest {
            method: "GET".into(),
            target: "/api2/repos/r1/file/?p=/a.txt".into(),
            headers: vec![("Authorization".into(), "Token abc".into())],
            body: Vec::new(),
        };
        assert_eq!(req.path(), "/api2/repos/r1/file/");
        assert_eq!(req.query(), Some("p=/a.txt"));
        assert_eq!(req.header("authorization"), Some("Token abc"));
    }

    #[tokio::test]
    async fn serves_routes_and_records_requests() {
        let server = MockServer::start().await;
        server.route("/hello", MockResponse::ok("hi"));

        let mut stream = TcpStream::connect(server.url().trim_start_matches("http://"))
            .await
            .unwrap();
        stream
            .write_all(b"GET /hello HTTP/1.1\r\nHost: x\r\n\r\n")
            .await
            .unwrap();
        let mut resp = Vec::new();
        stream.read_to_end(&mut resp).await.unwrap();
        let text = String::from_utf8_lossy(&resp);

        assert!(text.starts_with("HTTP/1.1 200"));
        assert!(text.ends_with("hi"));
        assert_eq!(server.hits("/hello"), 1);
    }

    #[tokio::test]
    async fn chunked_trickle_response_framing() {
        let server = MockServer::start().await;
        server.route(
            "/slow",
            MockResponse::ok("hello world")
                .chunked()
                .trickle(6, Duration::from_millis(5)),
        );

        let mut stream = TcpStream::connect(server.url().trim_start_matches("http://"))
            .await
            .unwrap();
        stream
            .write_all(b"GET /slow HTTP/1.1\r\nHost: x\r\n\r\n")
            .await
            .unwrap();
        let mut resp = Vec::new();
        stream.read_to_end(&mut resp).await.unwrap();
        let text = String::from_utf8_lossy(&resp);

        assert!(text.contains("Transfer-Encoding: chunked\r\n"));
        assert!(!text.contains("Content-Length"));
        assert!(text.ends_with("\r\n\r\n6\r\nhello \r\n5\r\nworld\r\n0\r\n\r\n"));
        let body_start = text.find("\r\n\r\n").unwrap() + 4;
        assert_eq!(decode_chunked(&resp[body_start..]), b"hello world");
    }
}

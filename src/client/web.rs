use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Instant;

use rustls::ClientConfig;
use url::Url;

use super::tls::{webpki_config, ReadStep, TlsSession};
use super::{
    find_subsequence, local, would_block, ClientEvent, RequestState, StartError, MAX_BODY_SIZE,
    REQUEST_DEADLINE,
};

/// Redirect hops followed inside a single request.
const MAX_REDIRECTS: u8 = 5;
/// Raw response cap: body limit plus room for the header block.
const MAX_RAW_SIZE: usize = MAX_BODY_SIZE + 16 * 1024;

enum Transport {
    Plain(TcpStream),
    Tls(Box<TlsSession>),
}

/// One HTTP/1.1 GET over plain TCP or rustls, driven by `poll`.
///
/// The whole response is accumulated until the server closes (the
/// request always carries `Connection: close`), then parsed in one go.
/// Redirects are followed internally, so the navigation layer sees the
/// same progress/complete/failed contract as for the other protocols.
pub struct WebClient {
    state: RequestState,
    config: Arc<ClientConfig>,
    transport: Option<Transport>,
    url: Option<Url>,
    request: Vec<u8>,
    request_queued: bool,
    raw: Vec<u8>,
    redirects: u8,
    deadline: Option<Instant>,
}

impl WebClient {
    pub fn new() -> Self {
        Self {
            state: RequestState::Idle,
            config: Arc::new(webpki_config()),
            transport: None,
            url: None,
            request: Vec::new(),
            request_queued: false,
            raw: Vec::new(),
            redirects: 0,
            deadline: None,
        }
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    pub fn is_in_progress(&self) -> bool {
        self.transport.is_some()
    }

    pub fn start_request(&mut self, url: &Url) -> Result<(), StartError> {
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(StartError::BadScheme(url.scheme().to_string()));
        }
        if self.is_in_progress() {
            return Err(StartError::Busy);
        }
        self.redirects = 0;
        self.deadline = Some(Instant::now() + REQUEST_DEADLINE);
        self.open(url).map_err(|e| match e {
            OpenError::Connect(msg) => StartError::Connect(msg),
            OpenError::Tls(msg) => StartError::Tls(msg),
            OpenError::MissingHost => StartError::MissingHost,
        })?;
        tracing::debug!(%url, "starting http request");
        Ok(())
    }

    /// Silent and idempotent; aborts the transfer outright.
    pub fn cancel_request(&mut self) {
        self.transport = None;
        self.url = None;
        self.request.clear();
        self.request_queued = false;
        self.raw.clear();
        self.redirects = 0;
        self.deadline = None;
        self.state = RequestState::Idle;
    }

    pub fn poll(&mut self) -> Vec<ClientEvent> {
        match self.state {
            RequestState::Idle | RequestState::Closing => Vec::new(),
            RequestState::Connecting => self.poll_connect(),
            RequestState::AwaitingHeader | RequestState::StreamingBody => self.poll_read(),
        }
    }

    fn poll_connect(&mut self) -> Vec<ClientEvent> {
        if self.deadline_passed() {
            return self.fail("request timed out");
        }

        enum Outcome {
            Pending,
            Sent,
            Error(String),
        }

        let outcome = match self.transport.as_mut() {
            None => {
                self.state = RequestState::Idle;
                return Vec::new();
            }
            // The plain request already went out in `open`.
            Some(Transport::Plain(_)) => Outcome::Sent,
            Some(Transport::Tls(session)) => {
                if session.handshaking() {
                    match session.drive_handshake() {
                        Ok(true) => {}
                        Ok(false) => return Vec::new(),
                        Err(e) => return self.fail(&format!("TLS handshake failed: {e}")),
                    }
                }
                if !self.request_queued {
                    match session.queue_plaintext(&self.request) {
                        Ok(()) => self.request_queued = true,
                        Err(e) => return self.fail(&format!("failed to queue request: {e}")),
                    }
                }
                match session.flush() {
                    Ok(true) => Outcome::Sent,
                    Ok(false) => Outcome::Pending,
                    Err(e) => Outcome::Error(format!("failed to send request: {e}")),
                }
            }
        };

        match outcome {
            Outcome::Pending => Vec::new(),
            Outcome::Sent => {
                self.state = RequestState::AwaitingHeader;
                Vec::new()
            }
            Outcome::Error(reason) => self.fail(&reason),
        }
    }

    fn poll_read(&mut self) -> Vec<ClientEvent> {
        if self.deadline_passed() {
            return self.fail("request timed out");
        }

        enum Step {
            Data(Vec<u8>),
            Eof,
            Blocked,
            Error(String),
        }

        let step = match self.transport.as_mut() {
            None => {
                self.state = RequestState::Idle;
                return Vec::new();
            }
            Some(Transport::Plain(sock)) => {
                let mut chunk = [0u8; 8192];
                match sock.read(&mut chunk) {
                    Ok(0) => Step::Eof,
                    Ok(n) => Step::Data(chunk[..n].to_vec()),
                    Err(e) if would_block(&e) => Step::Blocked,
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => Step::Blocked,
                    Err(e) => Step::Error(format!("socket error: {e}")),
                }
            }
            Some(Transport::Tls(session)) => match session.read_step() {
                Ok(ReadStep::Data(data)) => Step::Data(data),
                Ok(ReadStep::Eof) => Step::Eof,
                Ok(ReadStep::Blocked) => Step::Blocked,
                Err(e) => Step::Error(format!("socket error: {e}")),
            },
        };

        match step {
            Step::Blocked => Vec::new(),
            Step::Data(data) => {
                self.raw.extend_from_slice(&data);
                if self.raw.len() > MAX_RAW_SIZE {
                    return self.fail("response is too large");
                }
                self.state = RequestState::StreamingBody;
                vec![ClientEvent::Progress(self.raw.len())]
            }
            Step::Eof => self.finish_response(),
            Step::Error(reason) => self.fail(&reason),
        }
    }

    fn finish_response(&mut self) -> Vec<ClientEvent> {
        let raw = std::mem::take(&mut self.raw);
        self.transport = None;
        let response = match parse_response(&raw) {
            Ok(response) => response,
            Err(reason) => return self.fail(&reason),
        };

        if is_redirect(response.status) {
            if let Some(location) = find_header(&response.headers, "location") {
                if self.redirects >= MAX_REDIRECTS {
                    return self.fail("too many redirects");
                }
                let location = location.to_string();
                let next = match self.url.as_ref().map(|u| u.join(&location)) {
                    Some(Ok(next)) => next,
                    _ => return self.fail(&format!("bad redirect Location: {location}")),
                };
                if next.scheme() != "http" && next.scheme() != "https" {
                    return self
                        .fail(&format!("redirect to unsupported scheme: {}", next.scheme()));
                }
                tracing::debug!(%next, "following http redirect");
                self.redirects += 1;
                return match self.open(&next) {
                    Ok(()) => Vec::new(),
                    Err(e) => self.fail(&e.to_string()),
                };
            }
        }

        let mime = find_header(&response.headers, "content-type")
            .map(str::to_string)
            .or_else(|| {
                self.url
                    .as_ref()
                    .and_then(local::mime_for_url)
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "application/octet-stream".to_string());
        self.state = RequestState::Idle;
        self.deadline = None;
        self.url = None;
        vec![ClientEvent::Complete {
            body: response.body,
            mime,
        }]
    }

    /// Connect and, for plain HTTP, send the request immediately. The
    /// TLS path queues the request and lets `poll` drive the handshake.
    fn open(&mut self, url: &Url) -> Result<(), OpenError> {
        let host = url.host_str().ok_or(OpenError::MissingHost)?.to_string();
        let is_https = url.scheme() == "https";
        let port = url.port().unwrap_or(if is_https { 443 } else { 80 });

        let request = build_request(url);
        let sock =
            super::connect(&host, port).map_err(|e| OpenError::Connect(e.to_string()))?;

        self.raw.clear();
        self.request_queued = false;
        if is_https {
            let session = TlsSession::new(self.config.clone(), &host, sock)
                .map_err(|e| OpenError::Tls(e.to_string()))?;
            self.transport = Some(Transport::Tls(Box::new(session)));
            self.request = request;
            self.state = RequestState::Connecting;
        } else {
            let mut sock = sock;
            sock.write_all(&request)
                .map_err(|e| OpenError::Connect(e.to_string()))?;
            self.transport = Some(Transport::Plain(sock));
            self.request = request;
            self.state = RequestState::AwaitingHeader;
        }
        self.url = Some(url.clone());
        Ok(())
    }

    fn fail(&mut self, reason: &str) -> Vec<ClientEvent> {
        tracing::warn!(%reason, "http request failed");
        self.transport = None;
        self.url = None;
        self.raw.clear();
        self.deadline = None;
        self.state = RequestState::Idle;
        vec![ClientEvent::Failed(reason.to_string())]
    }

    fn deadline_passed(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() > d)
    }
}

impl Default for WebClient {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, thiserror::Error)]
enum OpenError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("TLS setup failed: {0}")]
    Tls(String),
    #[error("URL has no host")]
    MissingHost,
}

fn build_request(url: &Url) -> Vec<u8> {
    let is_https = url.scheme() == "https";
    let default_port: u16 = if is_https { 443 } else { 80 };
    let host = url.host_str().unwrap_or_default();
    let host_header = match url.port() {
        Some(port) if port != default_port => format!("{host}:{port}"),
        _ => host.to_string(),
    };
    let path = match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    };
    format!(
        "GET {path} HTTP/1.1\r\n\
         Host: {host_header}\r\n\
         User-Agent: beryl/0.1\r\n\
         Accept: */*\r\n\
         Connection: close\r\n\
         \r\n"
    )
    .into_bytes()
}

struct HttpResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

/// Parse raw bytes into status code, headers and body.
fn parse_response(data: &[u8]) -> Result<HttpResponse, String> {
    let header_end = find_subsequence(data, b"\r\n\r\n")
        .ok_or_else(|| "malformed HTTP response: no header terminator".to_string())?;
    let header_bytes = &data[..header_end];
    let body_start = header_end + 4;

    let header_str =
        std::str::from_utf8(header_bytes).map_err(|_| "non-UTF-8 headers".to_string())?;
    let mut lines = header_str.split("\r\n");
    let status_line = lines.next().ok_or_else(|| "empty response".to_string())?;
    let status = parse_status_line(status_line)?;

    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_lowercase(), value.trim().to_string()));
        }
    }

    let raw_body = &data[body_start..];
    let body = if find_header(&headers, "transfer-encoding").is_some_and(|v| v.contains("chunked"))
    {
        decode_chunked(raw_body)?
    } else if let Some(length) = find_header(&headers, "content-length") {
        let length: usize = length
            .parse()
            .map_err(|_| "bad Content-Length".to_string())?;
        if length > MAX_BODY_SIZE {
            return Err("response body is too large".to_string());
        }
        raw_body[..raw_body.len().min(length)].to_vec()
    } else {
        raw_body.to_vec()
    };
    if body.len() > MAX_BODY_SIZE {
        return Err("response body is too large".to_string());
    }

    Ok(HttpResponse {
        status,
        headers,
        body,
    })
}

fn parse_status_line(line: &str) -> Result<u16, String> {
    let mut parts = line.splitn(3, ' ');
    let _version = parts.next();
    parts
        .next()
        .and_then(|code| code.parse().ok())
        .ok_or_else(|| format!("bad status line: {line}"))
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    let name = name.to_lowercase();
    headers
        .iter()
        .find(|(key, _)| key == &name)
        .map(|(_, value)| value.as_str())
}

fn decode_chunked(data: &[u8]) -> Result<Vec<u8>, String> {
    let mut result = Vec::new();
    let mut pos = 0;
    while let Some(i) = find_subsequence(&data[pos..], b"\r\n") {
        let line_end = pos + i;
        let size_str = std::str::from_utf8(&data[pos..line_end])
            .map_err(|_| "bad chunk size".to_string())?
            .trim();
        let size_str = size_str.split(';').next().unwrap_or("").trim();
        let chunk_size =
            usize::from_str_radix(size_str, 16).map_err(|_| "bad chunk size".to_string())?;
        if chunk_size == 0 {
            break;
        }
        let chunk_start = line_end + 2;
        let chunk_end = chunk_start + chunk_size;
        if chunk_end > data.len() {
            // Truncated chunk, keep what arrived.
            result.extend_from_slice(&data[chunk_start.min(data.len())..]);
            break;
        }
        if result.len() + chunk_size > MAX_BODY_SIZE {
            return Err("response body is too large".to_string());
        }
        result.extend_from_slice(&data[chunk_start..chunk_end]);
        pos = chunk_end + 2;
    }
    Ok(result)
}

fn is_redirect(status: u16) -> bool {
    matches!(status, 301 | 302 | 303 | 307 | 308)
}

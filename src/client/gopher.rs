use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Instant;

use url::Url;

use super::{
    find_subsequence, would_block, ClientEvent, RequestState, StartError, MAX_BODY_SIZE,
    REQUEST_DEADLINE,
};

/// End-of-document sentinel for text item types.
const LONE_DOT: &[u8] = b"\r\n.\r\n";

/// One Gopher request over plain TCP, driven by `poll`.
pub struct GopherClient {
    state: RequestState,
    sock: Option<TcpStream>,
    body: Vec<u8>,
    mime: &'static str,
    binary: bool,
    deadline: Option<Instant>,
}

/// The second character of the URL path carries the Gopher item type
/// (RFC 4266). It decides both the reported MIME type and whether the
/// lone-dot sentinel applies.
fn classify(path: &str) -> (&'static str, bool) {
    let kind = path.chars().nth(1);
    let mime = match kind {
        None | Some('1') => "text/gophermap",
        Some('0') => "text/plain",
        Some('g') => "image/gif",
        Some('I') => "image/unknown",
        Some('h') => "text/html",
        Some('s') => "audio/unknown",
        _ => "application/octet-stream",
    };
    let binary = matches!(kind, Some('5') | Some('9') | Some('I') | Some('g'));
    (mime, binary)
}

/// The wire selector is the URL path with the leading slash and type
/// character stripped.
fn selector(path: &str) -> &str {
    let mut chars = path.char_indices();
    chars.next();
    chars.next();
    match chars.next() {
        Some((i, _)) => &path[i..],
        None => "",
    }
}

impl GopherClient {
    pub fn new() -> Self {
        Self {
            state: RequestState::Idle,
            sock: None,
            body: Vec::new(),
            mime: "application/octet-stream",
            binary: false,
            deadline: None,
        }
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    pub fn is_in_progress(&self) -> bool {
        self.sock.is_some()
    }

    pub fn start_request(&mut self, url: &Url) -> Result<(), StartError> {
        if url.scheme() != "gopher" {
            return Err(StartError::BadScheme(url.scheme().to_string()));
        }
        if self.is_in_progress() {
            return Err(StartError::Busy);
        }
        let host = url.host_str().ok_or(StartError::MissingHost)?;
        let port = url.port().unwrap_or(70);

        let (mime, binary) = classify(url.path());
        let request = format!("{}\r\n", selector(url.path()));

        let mut sock = super::connect(host, port).map_err(|e| StartError::Connect(e.to_string()))?;
        sock.write_all(request.as_bytes())
            .map_err(|e| StartError::Connect(e.to_string()))?;

        tracing::debug!(%url, mime, binary, "starting gopher request");
        self.sock = Some(sock);
        self.body.clear();
        self.mime = mime;
        self.binary = binary;
        self.deadline = Some(Instant::now() + REQUEST_DEADLINE);
        self.state = RequestState::StreamingBody;
        Ok(())
    }

    /// Silent and idempotent.
    pub fn cancel_request(&mut self) {
        self.sock = None;
        self.body.clear();
        self.deadline = None;
        self.state = RequestState::Idle;
    }

    pub fn poll(&mut self) -> Vec<ClientEvent> {
        if self.state != RequestState::StreamingBody {
            return Vec::new();
        }
        if self.deadline.is_some_and(|d| Instant::now() > d) {
            return self.fail("request timed out");
        }
        let mut chunk = [0u8; 8192];
        let read = match self.sock.as_mut() {
            None => {
                self.state = RequestState::Idle;
                return Vec::new();
            }
            Some(sock) => sock.read(&mut chunk),
        };
        match read {
            Ok(0) => self.complete(),
            Ok(n) => {
                self.body.extend_from_slice(&chunk[..n]);
                if self.body.len() > MAX_BODY_SIZE {
                    return self.fail("response body is too large");
                }
                if !self.binary {
                    // Strip the lone dot and everything behind it.
                    if let Some(index) = find_subsequence(&self.body, LONE_DOT) {
                        self.body.truncate(index + 2);
                        return self.complete();
                    }
                }
                vec![ClientEvent::Progress(self.body.len())]
            }
            Err(e) if would_block(&e) => Vec::new(),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => Vec::new(),
            Err(e) => self.fail(&format!("socket error: {e}")),
        }
    }

    fn complete(&mut self) -> Vec<ClientEvent> {
        let body = std::mem::take(&mut self.body);
        self.sock = None;
        self.deadline = None;
        self.state = RequestState::Idle;
        vec![ClientEvent::Complete {
            body,
            mime: self.mime.to_string(),
        }]
    }

    fn fail(&mut self, reason: &str) -> Vec<ClientEvent> {
        tracing::warn!(%reason, "gopher request failed");
        self.sock = None;
        self.body.clear();
        self.deadline = None;
        self.state = RequestState::Idle;
        vec![ClientEvent::Failed(reason.to_string())]
    }
}

impl Default for GopherClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use std::net::TcpListener;
    use std::time::Duration;

    use super::*;

    #[test]
    fn item_types_map_to_mime() {
        assert_eq!(classify(""), ("text/gophermap", false));
        assert_eq!(classify("/"), ("text/gophermap", false));
        assert_eq!(classify("/1/dir"), ("text/gophermap", false));
        assert_eq!(classify("/0/file.txt"), ("text/plain", false));
        assert_eq!(classify("/g/pic.gif"), ("image/gif", true));
        assert_eq!(classify("/I/pic"), ("image/unknown", true));
        assert_eq!(classify("/h/page"), ("text/html", false));
        assert_eq!(classify("/s/sound"), ("audio/unknown", true));
        assert_eq!(classify("/5/archive"), ("application/octet-stream", true));
        assert_eq!(classify("/9/blob"), ("application/octet-stream", true));
        assert_eq!(classify("/7/search"), ("application/octet-stream", false));
    }

    #[test]
    fn selector_strips_type_prefix() {
        assert_eq!(selector("/0/doc.txt"), "/doc.txt");
        assert_eq!(selector("/1"), "");
        assert_eq!(selector("/"), "");
        assert_eq!(selector(""), "");
    }

    fn fetch(path: &str, payload: &'static [u8]) -> (Vec<ClientEvent>, String) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 512];
            let n = stream.read(&mut buf).unwrap();
            stream.write_all(payload).unwrap();
            String::from_utf8_lossy(&buf[..n]).into_owned()
        });

        let url = Url::parse(&format!("gopher://127.0.0.1:{port}{path}")).unwrap();
        let mut client = GopherClient::new();
        client.start_request(&url).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut events = Vec::new();
        while Instant::now() < deadline {
            let polled = client.poll();
            let done = polled.iter().any(ClientEvent::is_terminal);
            events.extend(polled);
            if done {
                break;
            }
        }
        let sent = server.join().unwrap();
        (events, sent)
    }

    #[test]
    fn lone_dot_truncates_text_documents() {
        let (events, sent) = fetch("/0/doc.txt", b"hello\r\n.\r\nGARBAGE");
        assert_eq!(sent, "/doc.txt\r\n");
        let terminal = events.last().unwrap();
        assert_eq!(
            terminal,
            &ClientEvent::Complete {
                body: b"hello\r\n".to_vec(),
                mime: "text/plain".to_string(),
            }
        );
    }

    #[test]
    fn binary_types_read_until_close() {
        let (events, sent) = fetch("/9/blob", b"raw\r\n.\r\nstill data");
        assert_eq!(sent, "/blob\r\n");
        let terminal = events.last().unwrap();
        assert_eq!(
            terminal,
            &ClientEvent::Complete {
                body: b"raw\r\n.\r\nstill data".to_vec(),
                mime: "application/octet-stream".to_string(),
            }
        );
    }

    #[test]
    fn cancel_is_idempotent_and_silent() {
        let mut client = GopherClient::new();
        client.cancel_request();
        client.cancel_request();
        assert_eq!(client.state(), RequestState::Idle);
        assert!(client.poll().is_empty());
    }
}

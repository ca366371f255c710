use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Instant;

use url::Url;

use super::{would_block, ClientEvent, RequestState, StartError, MAX_BODY_SIZE, REQUEST_DEADLINE};

/// One Finger (RFC 1288) request over plain TCP, driven by `poll`.
/// The response is everything the server sends before closing.
pub struct FingerClient {
    state: RequestState,
    sock: Option<TcpStream>,
    body: Vec<u8>,
    deadline: Option<Instant>,
}

/// `finger://user@host` and `finger://host/user` are both in use.
fn user_for(url: &Url) -> &str {
    if !url.username().is_empty() {
        url.username()
    } else {
        url.path().trim_start_matches('/')
    }
}

impl FingerClient {
    pub fn new() -> Self {
        Self {
            state: RequestState::Idle,
            sock: None,
            body: Vec::new(),
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
        if url.scheme() != "finger" {
            return Err(StartError::BadScheme(url.scheme().to_string()));
        }
        if self.is_in_progress() {
            return Err(StartError::Busy);
        }
        let host = url.host_str().ok_or(StartError::MissingHost)?;
        let port = url.port().unwrap_or(79);
        let request = format!("{}\r\n", user_for(url));

        let mut sock = super::connect(host, port).map_err(|e| StartError::Connect(e.to_string()))?;
        sock.write_all(request.as_bytes())
            .map_err(|e| StartError::Connect(e.to_string()))?;

        tracing::debug!(%url, "starting finger request");
        self.sock = Some(sock);
        self.body.clear();
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
            Ok(0) => {
                let body = std::mem::take(&mut self.body);
                self.sock = None;
                self.deadline = None;
                self.state = RequestState::Idle;
                vec![ClientEvent::Complete {
                    body,
                    mime: "text/finger".to_string(),
                }]
            }
            Ok(n) => {
                self.body.extend_from_slice(&chunk[..n]);
                if self.body.len() > MAX_BODY_SIZE {
                    return self.fail("response body is too large");
                }
                vec![ClientEvent::Progress(self.body.len())]
            }
            Err(e) if would_block(&e) => Vec::new(),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => Vec::new(),
            Err(e) => self.fail(&format!("socket error: {e}")),
        }
    }

    fn fail(&mut self, reason: &str) -> Vec<ClientEvent> {
        tracing::warn!(%reason, "finger request failed");
        self.sock = None;
        self.body.clear();
        self.deadline = None;
        self.state = RequestState::Idle;
        vec![ClientEvent::Failed(reason.to_string())]
    }
}

impl Default for FingerClient {
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
    fn user_from_path_or_userinfo() {
        let url = Url::parse("finger://example.com/alice").unwrap();
        assert_eq!(user_for(&url), "alice");
        let url = Url::parse("finger://bob@example.com").unwrap();
        assert_eq!(user_for(&url), "bob");
    }

    #[test]
    fn reads_until_close_and_reports_finger_mime() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 128];
            let n = stream.read(&mut buf).unwrap();
            stream.write_all(b"Login: alice\r\nPlan: none\r\n").unwrap();
            String::from_utf8_lossy(&buf[..n]).into_owned()
        });

        let url = Url::parse(&format!("finger://127.0.0.1:{port}/alice")).unwrap();
        let mut client = FingerClient::new();
        client.start_request(&url).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut terminal = None;
        while Instant::now() < deadline {
            if let Some(event) = client.poll().into_iter().find(ClientEvent::is_terminal) {
                terminal = Some(event);
                break;
            }
        }
        assert_eq!(server.join().unwrap(), "alice\r\n");
        assert_eq!(
            terminal,
            Some(ClientEvent::Complete {
                body: b"Login: alice\r\nPlan: none\r\n".to_vec(),
                mime: "text/finger".to_string(),
            })
        );
        assert_eq!(client.state(), RequestState::Idle);
    }
}

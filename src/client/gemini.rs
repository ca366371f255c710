use std::mem;
use std::sync::Arc;
use std::time::Instant;

use url::Url;

use crate::identity::CryptoIdentity;

use super::tls::{accept_all, trusting_config, ReadStep, TlsSession, TrustDecision};
use super::{
    CertificateRejection, CertificateScope, ClientEvent, PermanentFailure, RequestState,
    StartError, TemporaryFailure, MAX_BODY_SIZE, REQUEST_DEADLINE,
};

/// Longest legal response header: two status digits, a space, 1024
/// bytes of meta, CR LF.
const MAX_HEADER_LEN: usize = 2 + 1 + 1024 + 2;
/// A request is the URL plus CR LF and may not exceed 1024 bytes.
const MAX_REQUEST_LEN: usize = 1024;

/// One Gemini request over TLS at a time, driven by `poll`.
///
/// `start_request` opens the connection; `poll` advances the handshake,
/// sends the request line, parses the response header and streams the
/// body, returning events as values. Cancellation is silent and
/// returns the client to `Idle` from any state.
pub struct GeminiClient {
    state: RequestState,
    trust: TrustDecision,
    identity: Option<CryptoIdentity>,
    session: Option<TlsSession>,
    target_url: Option<Url>,
    request: Vec<u8>,
    request_queued: bool,
    parser: ResponseParser,
    deadline: Option<Instant>,
}

impl GeminiClient {
    pub fn new() -> Self {
        Self {
            state: RequestState::Idle,
            trust: accept_all(),
            identity: None,
            session: None,
            target_url: None,
            request: Vec::new(),
            request_queued: false,
            parser: ResponseParser::new(),
            deadline: None,
        }
    }

    /// Replace the server-certificate trust hook. Takes effect from the
    /// next `start_request`.
    pub fn set_trust_decision(&mut self, decision: TrustDecision) {
        self.trust = decision;
    }

    /// Install a client certificate for subsequent requests. The
    /// certificate/key pair is validated here so a mismatch surfaces
    /// immediately instead of mid-handshake.
    pub fn enable_client_certificate(
        &mut self,
        identity: CryptoIdentity,
    ) -> Result<(), rustls::Error> {
        trusting_config(self.trust.clone(), Some(&identity))?;
        self.identity = Some(identity);
        Ok(())
    }

    /// Clear the client certificate. An in-flight TLS session is not
    /// affected.
    pub fn disable_client_certificate(&mut self) {
        self.identity = None;
    }

    pub fn has_client_certificate(&self) -> bool {
        self.identity.is_some()
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(
            self.state,
            RequestState::Connecting | RequestState::AwaitingHeader | RequestState::StreamingBody
        )
    }

    pub fn start_request(&mut self, url: &Url) -> Result<(), StartError> {
        if url.scheme() != "gemini" {
            return Err(StartError::BadScheme(url.scheme().to_string()));
        }
        match self.state {
            RequestState::Idle => {}
            RequestState::Closing => self.session = None,
            _ => return Err(StartError::Busy),
        }
        let host = url.host_str().ok_or(StartError::MissingHost)?.to_string();
        let port = url.port().unwrap_or(1965);

        let mut url = url.clone();
        if url.path().is_empty() {
            url.set_path("/");
        }
        let request = format!("{url}\r\n");
        if request.len() > MAX_REQUEST_LEN {
            return Err(StartError::RequestTooLong);
        }

        let config = trusting_config(self.trust.clone(), self.identity.as_ref())
            .map_err(|e| StartError::Tls(e.to_string()))?;
        let sock = super::connect(&host, port).map_err(|e| StartError::Connect(e.to_string()))?;
        let session = TlsSession::new(Arc::new(config), &host, sock)
            .map_err(|e| StartError::Tls(e.to_string()))?;

        tracing::debug!(%url, "starting gemini request");
        self.session = Some(session);
        self.target_url = Some(url);
        self.request = request.into_bytes();
        self.request_queued = false;
        self.parser = ResponseParser::new();
        self.deadline = Some(Instant::now() + REQUEST_DEADLINE);
        self.state = RequestState::Connecting;
        Ok(())
    }

    /// Silent and idempotent: buffers are dropped and no terminal event
    /// is ever produced for a cancelled request.
    pub fn cancel_request(&mut self) {
        self.session = None;
        self.target_url = None;
        self.request.clear();
        self.request_queued = false;
        self.parser = ResponseParser::new();
        self.deadline = None;
        self.state = RequestState::Idle;
    }

    pub fn poll(&mut self) -> Vec<ClientEvent> {
        match self.state {
            RequestState::Idle => Vec::new(),
            RequestState::Connecting => self.poll_connect(),
            RequestState::AwaitingHeader | RequestState::StreamingBody => self.poll_read(),
            RequestState::Closing => {
                let expired = self.deadline_passed();
                let done = match self.session.as_mut() {
                    Some(session) => session.close_step() || expired,
                    None => true,
                };
                if done {
                    self.session = None;
                    self.state = RequestState::Idle;
                }
                Vec::new()
            }
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

        let outcome = match self.session.as_mut() {
            None => {
                self.state = RequestState::Idle;
                return Vec::new();
            }
            Some(session) => {
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
                        Err(e) => {
                            return self.fail(&format!("failed to queue request: {e}"));
                        }
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
        let step = match self.session.as_mut() {
            None => {
                self.state = RequestState::Idle;
                return Vec::new();
            }
            Some(session) => session.read_step(),
        };
        match step {
            Ok(ReadStep::Blocked) => Vec::new(),
            Ok(ReadStep::Data(bytes)) => self.consume(&bytes),
            Ok(ReadStep::Eof) => self.on_eof(),
            Err(e) => self.fail(&format!("socket error: {e}")),
        }
    }

    fn consume(&mut self, bytes: &[u8]) -> Vec<ClientEvent> {
        let Some(base) = self.target_url.clone() else {
            return self.fail("request state lost");
        };
        let consumed = self.parser.feed(bytes, &base);
        if self.parser.streaming() && self.state == RequestState::AwaitingHeader {
            self.state = RequestState::StreamingBody;
        }
        match consumed {
            Consumed::Nothing => Vec::new(),
            Consumed::Progress(n) => vec![ClientEvent::Progress(n)],
            Consumed::Terminal(event) => {
                self.begin_close();
                vec![event]
            }
        }
    }

    fn on_eof(&mut self) -> Vec<ClientEvent> {
        let outcome = self.parser.finish();
        self.session = None;
        self.state = RequestState::Idle;
        match outcome {
            Consumed::Terminal(event) => vec![event],
            _ => Vec::new(),
        }
    }

    /// Graceful teardown after a terminal event: send close_notify, and
    /// keep nursing the flush across polls if it cannot go out at once.
    fn begin_close(&mut self) {
        match self.session.as_mut() {
            Some(session) => {
                if session.close_step() {
                    self.session = None;
                    self.state = RequestState::Idle;
                } else {
                    self.state = RequestState::Closing;
                }
            }
            None => self.state = RequestState::Idle,
        }
    }

    fn fail(&mut self, reason: &str) -> Vec<ClientEvent> {
        tracing::warn!(%reason, "gemini request failed");
        self.session = None;
        self.state = RequestState::Idle;
        vec![ClientEvent::Failed(reason.to_string())]
    }

    fn deadline_passed(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() > d)
    }
}

impl Default for GeminiClient {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Header,
    Body,
    Done,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Consumed {
    Nothing,
    Progress(usize),
    Terminal(ClientEvent),
}

/// Incremental response parser, fed decrypted chunks.
///
/// Accumulates the header line up to the LF, validates its framing,
/// dispatches on the status code and then accumulates body bytes until
/// `finish` is called at end of stream. Once a terminal event has been
/// produced the parser goes `Done` and swallows everything else, which
/// keeps the one-terminal-event rule independent of socket timing.
pub(crate) struct ResponseParser {
    phase: Phase,
    header: Vec<u8>,
    body: Vec<u8>,
    mime: String,
}

enum HeaderOutcome {
    Streaming,
    Terminal(ClientEvent),
}

impl ResponseParser {
    pub(crate) fn new() -> Self {
        Self {
            phase: Phase::Header,
            header: Vec::new(),
            body: Vec::new(),
            mime: String::new(),
        }
    }

    pub(crate) fn streaming(&self) -> bool {
        self.phase == Phase::Body
    }

    pub(crate) fn feed(&mut self, chunk: &[u8], base: &Url) -> Consumed {
        match self.phase {
            Phase::Done => Consumed::Nothing,
            Phase::Body => self.feed_body(chunk),
            Phase::Header => match chunk.iter().position(|&b| b == b'\n') {
                Some(i) => {
                    self.header.extend_from_slice(&chunk[..=i]);
                    let rest = &chunk[i + 1..];
                    match self.dispatch_header(base) {
                        HeaderOutcome::Streaming => {
                            self.phase = Phase::Body;
                            if rest.is_empty() {
                                Consumed::Nothing
                            } else {
                                self.feed_body(rest)
                            }
                        }
                        HeaderOutcome::Terminal(event) => {
                            self.phase = Phase::Done;
                            Consumed::Terminal(event)
                        }
                    }
                }
                None => {
                    self.header.extend_from_slice(chunk);
                    if self.header.len() > MAX_HEADER_LEN {
                        self.phase = Phase::Done;
                        Consumed::Terminal(ClientEvent::ProtocolViolation(
                            "header line is too long".to_string(),
                        ))
                    } else {
                        Consumed::Nothing
                    }
                }
            },
        }
    }

    /// End of stream.
    pub(crate) fn finish(&mut self) -> Consumed {
        match self.phase {
            Phase::Done => Consumed::Nothing,
            Phase::Body => {
                self.phase = Phase::Done;
                Consumed::Terminal(ClientEvent::Complete {
                    body: mem::take(&mut self.body),
                    mime: mem::take(&mut self.mime),
                })
            }
            Phase::Header => {
                self.phase = Phase::Done;
                Consumed::Terminal(ClientEvent::ProtocolViolation(
                    "connection closed before the response header".to_string(),
                ))
            }
        }
    }

    fn feed_body(&mut self, chunk: &[u8]) -> Consumed {
        self.body.extend_from_slice(chunk);
        if self.body.len() > MAX_BODY_SIZE {
            self.phase = Phase::Done;
            return Consumed::Terminal(ClientEvent::Failed(
                "response body is too large".to_string(),
            ));
        }
        Consumed::Progress(self.body.len())
    }

    /// Validate the "XY META CR LF" framing and dispatch on the status
    /// code. `self.header` holds the line including the final LF.
    fn dispatch_header(&mut self, base: &Url) -> HeaderOutcome {
        let header = mem::take(&mut self.header);
        let violation =
            |reason: &str| HeaderOutcome::Terminal(ClientEvent::ProtocolViolation(reason.into()));

        if header.len() < 5 {
            return violation("line is too short for a valid header");
        }
        let lf = header.len() - 1;
        if header[lf - 1] != b'\r' {
            return violation("line does not end with <CR> <LF>");
        }
        if !header[0].is_ascii_digit() {
            return violation("first character is not a digit");
        }
        if !header[1].is_ascii_digit() {
            return violation("second character is not a digit");
        }
        if !header[2].is_ascii_whitespace() {
            return violation("third character is not a space");
        }
        let meta = match std::str::from_utf8(&header[3..lf - 1]) {
            Ok(meta) => meta.to_string(),
            Err(_) => return violation("meta is not valid UTF-8"),
        };
        let primary = header[0] - b'0';
        let secondary = header[1] - b'0';
        tracing::debug!(primary, secondary, meta = %meta, "gemini response header");

        let terminal = |event: ClientEvent| HeaderOutcome::Terminal(event);
        match primary {
            1 => terminal(ClientEvent::InputRequired { prompt: meta }),
            2 => {
                self.mime = meta;
                HeaderOutcome::Streaming
            }
            3 => match resolve_redirect(base, &meta) {
                Some(url) => terminal(ClientEvent::Redirected {
                    url,
                    is_permanent: secondary == 1,
                }),
                None => violation("invalid URL for redirection"),
            },
            4 => terminal(ClientEvent::TemporaryFailure {
                kind: match secondary {
                    1 => TemporaryFailure::ServerUnavailable,
                    2 => TemporaryFailure::CgiError,
                    3 => TemporaryFailure::ProxyError,
                    4 => TemporaryFailure::SlowDown,
                    _ => TemporaryFailure::Unspecified,
                },
                info: meta,
            }),
            5 => terminal(ClientEvent::PermanentFailure {
                kind: match secondary {
                    1 => PermanentFailure::NotFound,
                    2 => PermanentFailure::Gone,
                    3 => PermanentFailure::ProxyRequestRequired,
                    9 => PermanentFailure::BadRequest,
                    _ => PermanentFailure::Unspecified,
                },
                info: meta,
            }),
            6 => match secondary {
                1 => terminal(ClientEvent::CertificateRequested {
                    scope: CertificateScope::Transient,
                    prompt: meta,
                }),
                2 => terminal(ClientEvent::CertificateRequested {
                    scope: CertificateScope::Authorised,
                    prompt: meta,
                }),
                3 => terminal(ClientEvent::CertificateRejected {
                    kind: CertificateRejection::NotAccepted,
                    info: meta,
                }),
                4 => terminal(ClientEvent::CertificateRejected {
                    kind: CertificateRejection::FutureCertificateRejected,
                    info: meta,
                }),
                5 => terminal(ClientEvent::CertificateRejected {
                    kind: CertificateRejection::ExpiredCertificateRejected,
                    info: meta,
                }),
                _ => terminal(ClientEvent::CertificateRejected {
                    kind: CertificateRejection::Unspecified,
                    info: meta,
                }),
            },
            _ => violation("unspecified status code used"),
        }
    }
}

/// Redirect targets may be relative; they resolve against the URL of
/// the request that produced them.
fn resolve_redirect(base: &Url, meta: &str) -> Option<Url> {
    match Url::parse(meta) {
        Ok(url) => Some(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => base.join(meta).ok(),
        Err(_) => None,
    }
}

#[cfg(test)]
mod test {
    use std::net::TcpListener;

    use super::*;

    fn base() -> Url {
        Url::parse("gemini://example.com/dir/page").unwrap()
    }

    fn parse_one(header: &[u8]) -> Consumed {
        let mut parser = ResponseParser::new();
        parser.feed(header, &base())
    }

    #[test]
    fn success_with_streaming_body() {
        let mut parser = ResponseParser::new();
        let consumed = parser.feed(b"20 text/gemini\r\n# Hello\n", &base());
        assert_eq!(consumed, Consumed::Progress(8));
        assert!(parser.streaming());
        let finished = parser.finish();
        assert_eq!(
            finished,
            Consumed::Terminal(ClientEvent::Complete {
                body: b"# Hello\n".to_vec(),
                mime: "text/gemini".to_string(),
            })
        );
    }

    #[test]
    fn success_header_split_across_chunks() {
        let mut parser = ResponseParser::new();
        assert_eq!(parser.feed(b"20 te", &base()), Consumed::Nothing);
        assert_eq!(parser.feed(b"xt/gemini\r", &base()), Consumed::Nothing);
        assert_eq!(parser.feed(b"\nbody", &base()), Consumed::Progress(4));
        assert_eq!(parser.feed(b" more", &base()), Consumed::Progress(9));
        let Consumed::Terminal(ClientEvent::Complete { body, mime }) = parser.finish() else {
            panic!("expected completion");
        };
        assert_eq!(body, b"body more");
        assert_eq!(mime, "text/gemini");
    }

    #[test]
    fn empty_meta_success_is_valid() {
        let mut parser = ResponseParser::new();
        assert_eq!(parser.feed(b"20 \r\n", &base()), Consumed::Nothing);
        assert!(parser.streaming());
        let Consumed::Terminal(ClientEvent::Complete { body, mime }) = parser.finish() else {
            panic!("expected completion");
        };
        assert!(body.is_empty());
        assert_eq!(mime, "");
    }

    #[test]
    fn too_short_header_is_a_violation() {
        let Consumed::Terminal(ClientEvent::ProtocolViolation(reason)) = parse_one(b"20\r\n")
        else {
            panic!("expected protocol violation");
        };
        assert!(reason.contains("too short"));
    }

    #[test]
    fn missing_cr_is_a_violation() {
        let Consumed::Terminal(ClientEvent::ProtocolViolation(reason)) =
            parse_one(b"20 text/gemini\n")
        else {
            panic!("expected protocol violation");
        };
        assert!(reason.contains("<CR> <LF>"));
    }

    #[test]
    fn non_digit_status_is_a_violation() {
        assert!(matches!(
            parse_one(b"2A text/gemini\r\n"),
            Consumed::Terminal(ClientEvent::ProtocolViolation(_))
        ));
        assert!(matches!(
            parse_one(b"X0 text/gemini\r\n"),
            Consumed::Terminal(ClientEvent::ProtocolViolation(_))
        ));
    }

    #[test]
    fn missing_space_is_a_violation() {
        assert!(matches!(
            parse_one(b"20text/gemini\r\n"),
            Consumed::Terminal(ClientEvent::ProtocolViolation(_))
        ));
    }

    #[test]
    fn status_seven_is_a_violation() {
        let Consumed::Terminal(ClientEvent::ProtocolViolation(reason)) =
            parse_one(b"70 whatever\r\n")
        else {
            panic!("expected protocol violation");
        };
        assert!(reason.contains("unspecified status"));
    }

    #[test]
    fn overlong_header_is_a_violation() {
        let mut parser = ResponseParser::new();
        let chunk = vec![b'a'; 2048];
        assert!(matches!(
            parser.feed(&chunk, &base()),
            Consumed::Terminal(ClientEvent::ProtocolViolation(_))
        ));
    }

    #[test]
    fn input_required() {
        assert_eq!(
            parse_one(b"10 Enter query\r\n"),
            Consumed::Terminal(ClientEvent::InputRequired {
                prompt: "Enter query".to_string()
            })
        );
    }

    #[test]
    fn absolute_redirect() {
        assert_eq!(
            parse_one(b"31 gemini://other.example/next\r\n"),
            Consumed::Terminal(ClientEvent::Redirected {
                url: Url::parse("gemini://other.example/next").unwrap(),
                is_permanent: true,
            })
        );
    }

    #[test]
    fn relative_redirect_resolves_against_request_url() {
        assert_eq!(
            parse_one(b"30 /next\r\n"),
            Consumed::Terminal(ClientEvent::Redirected {
                url: Url::parse("gemini://example.com/next").unwrap(),
                is_permanent: false,
            })
        );
        assert_eq!(
            parse_one(b"30 sibling\r\n"),
            Consumed::Terminal(ClientEvent::Redirected {
                url: Url::parse("gemini://example.com/dir/sibling").unwrap(),
                is_permanent: false,
            })
        );
    }

    #[test]
    fn temporary_failure_secondary_mapping() {
        let cases = [
            (&b"40 oops\r\n"[..], TemporaryFailure::Unspecified),
            (b"41 oops\r\n", TemporaryFailure::ServerUnavailable),
            (b"42 oops\r\n", TemporaryFailure::CgiError),
            (b"43 oops\r\n", TemporaryFailure::ProxyError),
            (b"44 oops\r\n", TemporaryFailure::SlowDown),
            (b"47 oops\r\n", TemporaryFailure::Unspecified),
        ];
        for (header, expected) in cases {
            assert_eq!(
                parse_one(header),
                Consumed::Terminal(ClientEvent::TemporaryFailure {
                    kind: expected,
                    info: "oops".to_string(),
                })
            );
        }
    }

    #[test]
    fn permanent_failure_secondary_mapping() {
        let cases = [
            (&b"50 gone\r\n"[..], PermanentFailure::Unspecified),
            (b"51 gone\r\n", PermanentFailure::NotFound),
            (b"52 gone\r\n", PermanentFailure::Gone),
            (b"53 gone\r\n", PermanentFailure::ProxyRequestRequired),
            (b"59 gone\r\n", PermanentFailure::BadRequest),
            (b"55 gone\r\n", PermanentFailure::Unspecified),
        ];
        for (header, expected) in cases {
            assert_eq!(
                parse_one(header),
                Consumed::Terminal(ClientEvent::PermanentFailure {
                    kind: expected,
                    info: "gone".to_string(),
                })
            );
        }
    }

    #[test]
    fn certificate_status_mapping() {
        assert_eq!(
            parse_one(b"61 Authenticate\r\n"),
            Consumed::Terminal(ClientEvent::CertificateRequested {
                scope: CertificateScope::Transient,
                prompt: "Authenticate".to_string(),
            })
        );
        assert_eq!(
            parse_one(b"62 Authenticate\r\n"),
            Consumed::Terminal(ClientEvent::CertificateRequested {
                scope: CertificateScope::Authorised,
                prompt: "Authenticate".to_string(),
            })
        );
        let rejections = [
            (&b"63 no\r\n"[..], CertificateRejection::NotAccepted),
            (b"64 no\r\n", CertificateRejection::FutureCertificateRejected),
            (b"65 no\r\n", CertificateRejection::ExpiredCertificateRejected),
            (b"66 no\r\n", CertificateRejection::Unspecified),
            (b"60 no\r\n", CertificateRejection::Unspecified),
        ];
        for (header, expected) in rejections {
            assert_eq!(
                parse_one(header),
                Consumed::Terminal(ClientEvent::CertificateRejected {
                    kind: expected,
                    info: "no".to_string(),
                })
            );
        }
    }

    #[test]
    fn nothing_after_a_terminal_event() {
        let mut parser = ResponseParser::new();
        assert!(matches!(
            parser.feed(b"10 name?\r\n", &base()),
            Consumed::Terminal(_)
        ));
        assert_eq!(parser.feed(b"20 text/plain\r\nhm", &base()), Consumed::Nothing);
        assert_eq!(parser.finish(), Consumed::Nothing);
    }

    #[test]
    fn eof_before_header_is_a_violation() {
        let mut parser = ResponseParser::new();
        parser.feed(b"20 text/gem", &base());
        assert!(matches!(
            parser.finish(),
            Consumed::Terminal(ClientEvent::ProtocolViolation(_))
        ));
    }

    #[test]
    fn start_request_rejects_other_schemes() {
        let mut client = GeminiClient::new();
        let url = Url::parse("https://example.com/").unwrap();
        assert_eq!(
            client.start_request(&url),
            Err(StartError::BadScheme("https".to_string()))
        );
        assert_eq!(client.state(), RequestState::Idle);
    }

    #[test]
    fn start_request_rejects_overlong_request_lines() {
        let mut client = GeminiClient::new();
        let url = Url::parse(&format!("gemini://example.com/{}", "a".repeat(1200))).unwrap();
        assert_eq!(client.start_request(&url), Err(StartError::RequestTooLong));
    }

    #[test]
    fn busy_until_cancelled() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let url = Url::parse(&format!("gemini://127.0.0.1:{port}/")).unwrap();

        let mut client = GeminiClient::new();
        client.start_request(&url).unwrap();
        assert_eq!(client.state(), RequestState::Connecting);
        assert!(client.is_in_progress());
        assert_eq!(client.start_request(&url), Err(StartError::Busy));

        // A server that never talks: the handshake cannot finish, so a
        // poll step just reports no events.
        assert!(client.poll().is_empty());

        client.cancel_request();
        assert_eq!(client.state(), RequestState::Idle);
        assert!(client.poll().is_empty());

        // Cancelling twice is a no-op.
        client.cancel_request();
        assert_eq!(client.state(), RequestState::Idle);
    }

    #[test]
    fn empty_path_is_normalised() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let url = Url::parse(&format!("gemini://127.0.0.1:{port}")).unwrap();

        let mut client = GeminiClient::new();
        client.start_request(&url).unwrap();
        let target = client.target_url.clone().unwrap();
        assert_eq!(target.path(), "/");
        client.cancel_request();
    }
}

use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use thiserror::Error;
use url::Url;

pub mod finger;
pub mod gemini;
pub mod gopher;
pub mod local;
mod tls;
pub mod web;

pub use tls::TrustDecision;

pub(crate) const MAX_BODY_SIZE: usize = 1024 * 1024 * 8;
pub(crate) const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub(crate) const STEP_TIMEOUT: Duration = Duration::from_millis(120);
pub(crate) const REQUEST_DEADLINE: Duration = Duration::from_secs(30);

/// Lifecycle of a single request inside a protocol client.
///
/// Every client starts `Idle`, is driven forward by `poll` and returns
/// to `Idle` once a terminal event has been delivered or the request
/// was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestState {
    #[default]
    Idle,
    Connecting,
    AwaitingHeader,
    StreamingBody,
    Closing,
}

/// Why `start_request` refused to start.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum StartError {
    #[error("a request is already in flight")]
    Busy,
    #[error("scheme \"{0}\" is not handled by this client")]
    BadScheme(String),
    #[error("URL has no host")]
    MissingHost,
    #[error("request line exceeds 1024 bytes")]
    RequestTooLong,
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("TLS setup failed: {0}")]
    Tls(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemporaryFailure {
    Unspecified,
    ServerUnavailable,
    CgiError,
    ProxyError,
    SlowDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermanentFailure {
    Unspecified,
    NotFound,
    Gone,
    ProxyRequestRequired,
    BadRequest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateRejection {
    Unspecified,
    NotAccepted,
    FutureCertificateRejected,
    ExpiredCertificateRejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateScope {
    Transient,
    Authorised,
}

/// Everything a protocol client can report back from `poll`.
///
/// `Progress` may fire any number of times; every other variant is
/// terminal and ends the request. A client emits exactly one terminal
/// event per started request, and none at all for a cancelled one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Progress(usize),
    Complete { body: Vec<u8>, mime: String },
    Failed(String),
    ProtocolViolation(String),
    InputRequired { prompt: String },
    Redirected { url: Url, is_permanent: bool },
    TemporaryFailure { kind: TemporaryFailure, info: String },
    PermanentFailure { kind: PermanentFailure, info: String },
    CertificateRequested { scope: CertificateScope, prompt: String },
    CertificateRejected { kind: CertificateRejection, info: String },
}

impl ClientEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ClientEvent::Progress(_))
    }
}

/// Resolve and connect with a bounded connect timeout, then bound every
/// subsequent read/write so a single `poll` step cannot stall the loop.
pub(crate) fn connect(host: &str, port: u16) -> io::Result<TcpStream> {
    let addr = format!("{host}:{port}")
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no addresses for {host}:{port}"))
        })?;
    let stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)?;
    stream.set_read_timeout(Some(STEP_TIMEOUT))?;
    stream.set_write_timeout(Some(STEP_TIMEOUT))?;
    Ok(stream)
}

pub(crate) fn would_block(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

pub(crate) fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn progress_is_not_terminal() {
        assert!(!ClientEvent::Progress(12).is_terminal());
        assert!(ClientEvent::Failed("boom".into()).is_terminal());
        assert!(ClientEvent::Complete {
            body: Vec::new(),
            mime: "text/plain".into()
        }
        .is_terminal());
    }

    #[test]
    fn find_subsequence_hits_and_misses() {
        assert_eq!(find_subsequence(b"hello\r\n.\r\nrest", b"\r\n.\r\n"), Some(5));
        assert_eq!(find_subsequence(b"no sentinel here", b"\r\n.\r\n"), None);
    }
}

use std::fmt;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{
    aws_lc_rs::default_provider, verify_tls12_signature, verify_tls13_signature, CryptoProvider,
};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{
    ClientConfig, ClientConnection, DigitallySignedStruct, RootCertStore, SignatureScheme,
};

use crate::identity::CryptoIdentity;

use super::would_block;

/// Host-supplied accept/reject decision for a server's end-entity
/// certificate. A trust-on-first-use store would hash the DER bytes it
/// is handed; the default decision accepts everything.
pub type TrustDecision = Arc<dyn Fn(&CertificateDer<'_>) -> bool + Send + Sync>;

pub(crate) fn accept_all() -> TrustDecision {
    Arc::new(|_| true)
}

/// Verifier that delegates the trust decision to the host hook while
/// still checking handshake signatures against the real algorithms.
struct TrustVerifier {
    provider: CryptoProvider,
    decision: TrustDecision,
}

impl TrustVerifier {
    fn new(decision: TrustDecision) -> Self {
        Self {
            provider: default_provider(),
            decision,
        }
    }
}

impl fmt::Debug for TrustVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TrustVerifier")
    }
}

impl ServerCertVerifier for TrustVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        if (self.decision)(end_entity) {
            Ok(ServerCertVerified::assertion())
        } else {
            Err(rustls::Error::General(
                "server certificate rejected".to_string(),
            ))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Config for Gemini connections: trust decided by the hook, optional
/// client certificate. Building the config doubles as the consistency
/// check for a certificate/key pair.
pub(crate) fn trusting_config(
    decision: TrustDecision,
    identity: Option<&CryptoIdentity>,
) -> Result<ClientConfig, rustls::Error> {
    let builder = ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(TrustVerifier::new(decision)));
    match identity {
        Some(identity) => builder.with_client_auth_cert(
            identity.certificate.clone(),
            identity.private_key.clone_key(),
        ),
        None => Ok(builder.with_no_client_auth()),
    }
}

/// Config for HTTPS: ordinary Web-PKI validation.
pub(crate) fn webpki_config() -> ClientConfig {
    let roots = RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };
    ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth()
}

pub(crate) enum ReadStep {
    Data(Vec<u8>),
    Eof,
    Blocked,
}

/// A rustls connection pumped in bounded steps so callers stay
/// cancellable between polls. The socket keeps short read/write
/// timeouts; a timeout surfaces as `Blocked`, not as an error.
pub(crate) struct TlsSession {
    conn: ClientConnection,
    sock: TcpStream,
    peer_closed: bool,
    close_sent: bool,
}

impl TlsSession {
    pub(crate) fn new(
        config: Arc<ClientConfig>,
        host: &str,
        sock: TcpStream,
    ) -> Result<Self, rustls::Error> {
        let name = ServerName::try_from(host.to_string())
            .map_err(|e| rustls::Error::General(e.to_string()))?;
        let conn = ClientConnection::new(config, name)?;
        Ok(Self {
            conn,
            sock,
            peer_closed: false,
            close_sent: false,
        })
    }

    pub(crate) fn handshaking(&self) -> bool {
        self.conn.is_handshaking()
    }

    /// One bounded handshake step. `Ok(true)` once the handshake is
    /// done.
    pub(crate) fn drive_handshake(&mut self) -> io::Result<bool> {
        match self.conn.complete_io(&mut self.sock) {
            Ok(_) => Ok(!self.conn.is_handshaking()),
            Err(e) if would_block(&e) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub(crate) fn queue_plaintext(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.conn.writer().write_all(bytes)
    }

    /// Flush pending TLS records. `Ok(true)` when nothing is left to
    /// send.
    pub(crate) fn flush(&mut self) -> io::Result<bool> {
        while self.conn.wants_write() {
            match self.conn.write_tls(&mut self.sock) {
                Ok(_) => {}
                Err(e) if would_block(&e) => return Ok(false),
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }

    /// One bounded read step, decrypting whatever arrived. A TCP end of
    /// stream and a TLS close_notify both end up as `Eof` once the
    /// decrypted bytes have been drained.
    pub(crate) fn read_step(&mut self) -> io::Result<ReadStep> {
        if !self.peer_closed {
            match self.conn.read_tls(&mut self.sock) {
                Ok(0) => self.peer_closed = true,
                Ok(_) => {}
                Err(e) if would_block(&e) => return Ok(ReadStep::Blocked),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(ReadStep::Blocked),
                Err(e) => return Err(e),
            }
            let state = self
                .conn
                .process_new_packets()
                .map_err(|e| io::Error::other(e.to_string()))?;
            if state.peer_has_closed() {
                self.peer_closed = true;
            }
        }

        let mut plaintext = Vec::new();
        let mut chunk = [0u8; 8192];
        loop {
            match self.conn.reader().read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => plaintext.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }
        }

        if !plaintext.is_empty() {
            Ok(ReadStep::Data(plaintext))
        } else if self.peer_closed {
            Ok(ReadStep::Eof)
        } else {
            Ok(ReadStep::Blocked)
        }
    }

    /// Attempt a graceful close. `true` once the close_notify went out
    /// (or the attempt failed, in which case the socket is dropped
    /// anyway).
    pub(crate) fn close_step(&mut self) -> bool {
        if !self.close_sent {
            self.conn.send_close_notify();
            self.close_sent = true;
        }
        match self.flush() {
            Ok(done) => done,
            Err(_) => true,
        }
    }
}

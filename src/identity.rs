use std::fmt;
use std::path::Path;

use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("failed to load PEM material: {0}")]
    Pem(#[from] rustls_pki_types::pem::Error),
    #[error("certificate file contains no certificates")]
    EmptyCertificate,
}

/// A client certificate with its private key. Transient identities are
/// minted for the session and unrecoverable once cleared; persistent
/// ones come from the identity store on disk.
pub struct CryptoIdentity {
    pub certificate: Vec<CertificateDer<'static>>,
    pub private_key: PrivateKeyDer<'static>,
    pub is_persistent: bool,
    pub display_name: String,
}

impl CryptoIdentity {
    pub fn from_pem_files(
        cert_path: &Path,
        key_path: &Path,
        is_persistent: bool,
        display_name: String,
    ) -> Result<Self, IdentityError> {
        let certificate = CertificateDer::pem_file_iter(cert_path)?
            .collect::<Result<Vec<_>, _>>()?;
        if certificate.is_empty() {
            return Err(IdentityError::EmptyCertificate);
        }
        let private_key = PrivateKeyDer::from_pem_file(key_path)?;
        Ok(Self {
            certificate,
            private_key,
            is_persistent,
            display_name,
        })
    }

    /// Both halves must be present. Whether they actually belong
    /// together is checked when the identity is activated on a client.
    pub fn is_valid(&self) -> bool {
        !self.certificate.is_empty() && !self.private_key.secret_der().is_empty()
    }
}

impl Clone for CryptoIdentity {
    fn clone(&self) -> Self {
        Self {
            certificate: self.certificate.clone(),
            private_key: self.private_key.clone_key(),
            is_persistent: self.is_persistent,
            display_name: self.display_name.clone(),
        }
    }
}

impl fmt::Debug for CryptoIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoIdentity")
            .field("display_name", &self.display_name)
            .field("is_persistent", &self.is_persistent)
            .field("certificates", &self.certificate.len())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod test {
    use rustls_pki_types::PrivatePkcs8KeyDer;

    use super::*;

    pub(crate) fn dummy_identity(is_persistent: bool) -> CryptoIdentity {
        CryptoIdentity {
            certificate: vec![CertificateDer::from(vec![1u8, 2, 3])],
            private_key: PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(vec![4u8, 5, 6])),
            is_persistent,
            display_name: "test identity".to_string(),
        }
    }

    #[test]
    fn validity_requires_both_halves() {
        let identity = dummy_identity(false);
        assert!(identity.is_valid());

        let no_cert = CryptoIdentity {
            certificate: Vec::new(),
            ..dummy_identity(false)
        };
        assert!(!no_cert.is_valid());
    }

    #[test]
    fn clone_keeps_the_key_material() {
        let identity = dummy_identity(true);
        let cloned = identity.clone();
        assert_eq!(cloned.certificate, identity.certificate);
        assert_eq!(
            cloned.private_key.secret_der(),
            identity.private_key.secret_der()
        );
        assert!(cloned.is_persistent);
    }

    #[test]
    fn debug_does_not_leak_key_bytes() {
        let identity = dummy_identity(false);
        let printed = format!("{identity:?}");
        assert!(printed.contains("test identity"));
        assert!(!printed.contains('4'));
    }

    #[test]
    fn loading_garbage_pem_fails() {
        let dir = std::env::temp_dir();
        let cert = dir.join(format!("beryl-test-{}.crt", std::process::id()));
        let key = dir.join(format!("beryl-test-{}.key", std::process::id()));
        std::fs::write(&cert, "not a certificate").unwrap();
        std::fs::write(&key, "not a key").unwrap();
        let result =
            CryptoIdentity::from_pem_files(&cert, &key, false, "broken".to_string());
        assert!(result.is_err());
        std::fs::remove_file(cert).unwrap();
        std::fs::remove_file(key).unwrap();
    }

    #[test]
    fn loading_missing_files_fails() {
        let result = CryptoIdentity::from_pem_files(
            Path::new("/definitely/not/here.crt"),
            Path::new("/definitely/not/here.key"),
            true,
            "missing".to_string(),
        );
        assert!(result.is_err());
    }
}

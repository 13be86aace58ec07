//! Cryptographic services and factories for the security components.
//!
//! The controller never talks to RSA or SHA code directly. It asks a
//! [`SecurityComponents`] factory for a [`SignatureEngine`] (digests and
//! verification), a tree buffer and a buffering node, and signs through a
//! host-supplied [`SecurityContext`].

use super::certificate::subject_public_key_info;
use super::types::{DigestAlgorithm, SignatureAlgorithm};
use crate::chain::{C14nTreeBuffer, EventKeeper, SaxEventKeeper, TreeBuffer};
use crate::error::{Error, Result};
use crate::package::{uri_to_entry_name, SharedPackage};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use signature::{SignatureEncoding, Signer, Verifier};
use std::cell::RefCell;
use std::rc::Rc;

/// Digest computation and signature verification.
pub trait SignatureEngine {
    /// Digest `data`.
    fn digest(&self, algorithm: DigestAlgorithm, data: &[u8]) -> Vec<u8>;

    /// Check `signature` over `data` against the certificate's public key.
    fn verify(
        &self,
        algorithm: SignatureAlgorithm,
        certificate_der: &[u8],
        data: &[u8],
        signature: &[u8],
    ) -> Result<bool>;
}

/// RSA PKCS#1 v1.5 engine backed by RustCrypto.
#[derive(Debug, Default, Clone, Copy)]
pub struct RsaSignatureEngine;

impl SignatureEngine for RsaSignatureEngine {
    fn digest(&self, algorithm: DigestAlgorithm, data: &[u8]) -> Vec<u8> {
        match algorithm {
            DigestAlgorithm::Sha1 => Sha1::digest(data).to_vec(),
            DigestAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
        }
    }

    fn verify(
        &self,
        algorithm: SignatureAlgorithm,
        certificate_der: &[u8],
        data: &[u8],
        signature: &[u8],
    ) -> Result<bool> {
        use spki::DecodePublicKey;

        let spki = subject_public_key_info(certificate_der)?;
        let public_key = RsaPublicKey::from_public_key_der(&spki)
            .map_err(|e| Error::Crypto(format!("unsupported public key: {}", e)))?;
        let signature = match Signature::try_from(signature) {
            Ok(signature) => signature,
            Err(_) => return Ok(false),
        };
        let valid = match algorithm {
            SignatureAlgorithm::RsaSha1 => VerifyingKey::<Sha1>::new(public_key)
                .verify(data, &signature)
                .is_ok(),
            SignatureAlgorithm::RsaSha256 => VerifyingKey::<Sha256>::new(public_key)
                .verify(data, &signature)
                .is_ok(),
        };
        Ok(valid)
    }
}

/// Signing side, holding the private key.
pub trait SecurityContext {
    /// Sign `data`.
    fn sign(&self, algorithm: SignatureAlgorithm, data: &[u8]) -> Result<Vec<u8>>;
}

/// RSA private key used for signing.
#[derive(Clone)]
pub struct RsaSecurityContext {
    key: RsaPrivateKey,
}

impl RsaSecurityContext {
    /// Load a PKCS#8 PEM private key.
    pub fn from_pkcs8_pem(pem: &str) -> Result<Self> {
        use pkcs8::DecodePrivateKey;
        let key = RsaPrivateKey::from_pkcs8_pem(pem)
            .map_err(|e| Error::Crypto(format!("cannot load private key: {}", e)))?;
        Ok(Self { key })
    }

    /// Load a PKCS#8 DER private key.
    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self> {
        use pkcs8::DecodePrivateKey;
        let key = RsaPrivateKey::from_pkcs8_der(der)
            .map_err(|e| Error::Crypto(format!("cannot load private key: {}", e)))?;
        Ok(Self { key })
    }
}

impl std::fmt::Debug for RsaSecurityContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RsaSecurityContext")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl SecurityContext for RsaSecurityContext {
    fn sign(&self, algorithm: SignatureAlgorithm, data: &[u8]) -> Result<Vec<u8>> {
        let signature = match algorithm {
            SignatureAlgorithm::RsaSha1 => SigningKey::<Sha1>::new(self.key.clone())
                .try_sign(data)
                .map_err(|e| Error::Crypto(e.to_string()))?,
            SignatureAlgorithm::RsaSha256 => SigningKey::<Sha256>::new(self.key.clone())
                .try_sign(data)
                .map_err(|e| Error::Crypto(e.to_string()))?,
        };
        Ok(signature.to_vec())
    }
}

/// Factory for the three components a mission needs.
///
/// Returning `None` marks the component as unavailable; the controller then
/// stays in its failed state for the rest of the mission.
pub trait SecurityComponents {
    /// Digest and verification engine.
    fn create_engine(&self) -> Option<Box<dyn SignatureEngine>>;

    /// Canonicalizer for collected elements.
    fn create_tree_buffer(&self) -> Option<Box<dyn TreeBuffer>>;

    /// Buffering node.
    fn create_event_keeper(
        &self,
        tree_buffer: Box<dyn TreeBuffer>,
    ) -> Option<Rc<RefCell<dyn EventKeeper>>>;
}

/// Components backed by [`RsaSignatureEngine`], [`C14nTreeBuffer`] and
/// [`SaxEventKeeper`].
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultComponents;

impl SecurityComponents for DefaultComponents {
    fn create_engine(&self) -> Option<Box<dyn SignatureEngine>> {
        Some(Box::new(RsaSignatureEngine))
    }

    fn create_tree_buffer(&self) -> Option<Box<dyn TreeBuffer>> {
        Some(Box::new(C14nTreeBuffer))
    }

    fn create_event_keeper(
        &self,
        tree_buffer: Box<dyn TreeBuffer>,
    ) -> Option<Rc<RefCell<dyn EventKeeper>>> {
        let keeper: Rc<RefCell<dyn EventKeeper>> =
            Rc::new(RefCell::new(SaxEventKeeper::new(tree_buffer)));
        Some(keeper)
    }
}

/// Resolves reference URIs to entry bytes.
pub trait UriBinding {
    /// Bytes of the entry addressed by `uri`.
    fn resolve(&self, uri: &str) -> Result<Vec<u8>>;
}

/// URI binding over a document package.
#[derive(Clone)]
pub struct PackageUriBinding {
    package: SharedPackage,
}

impl PackageUriBinding {
    /// Bind to a package.
    pub fn new(package: SharedPackage) -> Self {
        Self { package }
    }
}

impl UriBinding for PackageUriBinding {
    fn resolve(&self, uri: &str) -> Result<Vec<u8>> {
        let name = uri_to_entry_name(uri);
        self.package.borrow().read_entry(&name)
    }
}

/// Base64-encode bytes.
pub fn encode_base64(data: &[u8]) -> String {
    BASE64.encode(data)
}

/// Base64-decode text, ignoring embedded whitespace.
pub fn decode_base64(text: &str) -> Result<Vec<u8>> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    BASE64
        .decode(compact.as_bytes())
        .map_err(|e| Error::Encoding(format!("invalid base64: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::MemoryPackage;

    const CERT: &[u8] = include_bytes!("../../tests/fixtures/signer_cert.der");
    const KEY: &str = include_str!("../../tests/fixtures/signer_key.pem");

    #[test]
    fn test_digest_lengths() {
        let engine = RsaSignatureEngine;
        assert_eq!(engine.digest(DigestAlgorithm::Sha1, b"abc").len(), 20);
        assert_eq!(engine.digest(DigestAlgorithm::Sha256, b"abc").len(), 32);
        assert_eq!(
            encode_base64(&engine.digest(DigestAlgorithm::Sha1, b"abc")),
            "qZk+NkcGgWq6PiVxeFDCbJzQ2J0="
        );
    }

    #[test]
    fn test_sign_and_verify() {
        let context = RsaSecurityContext::from_pkcs8_pem(KEY).unwrap();
        let engine = RsaSignatureEngine;
        for algorithm in [SignatureAlgorithm::RsaSha1, SignatureAlgorithm::RsaSha256] {
            let signature = context.sign(algorithm, b"signed info").unwrap();
            assert!(engine.verify(algorithm, CERT, b"signed info", &signature).unwrap());
            assert!(!engine.verify(algorithm, CERT, b"tampered", &signature).unwrap());
        }
    }

    #[test]
    fn test_verify_rejects_wrong_algorithm() {
        let context = RsaSecurityContext::from_pkcs8_pem(KEY).unwrap();
        let signature = context.sign(SignatureAlgorithm::RsaSha1, b"data").unwrap();
        assert!(!RsaSignatureEngine
            .verify(SignatureAlgorithm::RsaSha256, CERT, b"data", &signature)
            .unwrap());
    }

    #[test]
    fn test_bad_key() {
        assert!(matches!(
            RsaSecurityContext::from_pkcs8_pem("not a key"),
            Err(Error::Crypto(_))
        ));
    }

    #[test]
    fn test_package_binding() {
        let package: SharedPackage = Rc::new(RefCell::new(
            MemoryPackage::new().with_entry("Pictures/a b.png", vec![7u8]),
        ));
        let binding = PackageUriBinding::new(package);
        assert_eq!(binding.resolve("Pictures/a%20b.png").unwrap(), vec![7]);
        assert!(binding.resolve("missing.xml").is_err());
    }

    #[test]
    fn test_base64_helpers() {
        assert_eq!(decode_base64("AQID\n BA==").unwrap(), vec![1, 2, 3, 4]);
        assert!(decode_base64("***").is_err());
    }
}

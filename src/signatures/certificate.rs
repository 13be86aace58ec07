//! Signing certificates.

use crate::error::{Error, Result};
use sha2::{Digest, Sha256};

/// Certificate facts needed to write a signature.
pub trait Certificate {
    /// Issuer distinguished name.
    fn issuer_name(&self) -> String;

    /// Serial number as a decimal string, `None` when it cannot be encoded.
    fn serial_number(&self) -> Option<String>;

    /// DER encoding.
    fn encoded(&self) -> Vec<u8>;

    /// SHA-256 of the DER encoding, when the certificate source provides it.
    fn sha256_thumbprint(&self) -> Option<Vec<u8>> {
        None
    }
}

/// An X.509 certificate parsed from DER.
#[derive(Debug, Clone)]
pub struct X509Certificate {
    der: Vec<u8>,
    issuer: String,
    serial: String,
}

impl X509Certificate {
    /// Parse a DER-encoded certificate.
    pub fn from_der(der: Vec<u8>) -> Result<Self> {
        let (issuer, serial) = {
            let (_, cert) = x509_parser::parse_x509_certificate(&der)
                .map_err(|e| Error::InvalidCertificate(format!("cannot parse certificate: {}", e)))?;
            (
                cert.issuer().to_string(),
                cert.tbs_certificate.serial.to_string(),
            )
        };
        Ok(Self { der, issuer, serial })
    }
}

impl Certificate for X509Certificate {
    fn issuer_name(&self) -> String {
        self.issuer.clone()
    }

    fn serial_number(&self) -> Option<String> {
        Some(self.serial.clone())
    }

    fn encoded(&self) -> Vec<u8> {
        self.der.clone()
    }

    fn sha256_thumbprint(&self) -> Option<Vec<u8>> {
        Some(Sha256::digest(&self.der).to_vec())
    }
}

/// Certificate described by fixed values, for hosts that manage certificates
/// themselves.
#[derive(Debug, Clone, Default)]
pub struct StaticCertificate {
    /// Issuer distinguished name
    pub issuer: String,
    /// Decimal serial number
    pub serial: Option<String>,
    /// DER encoding
    pub der: Vec<u8>,
    /// SHA-256 of the DER encoding
    pub thumbprint: Option<Vec<u8>>,
}

impl Certificate for StaticCertificate {
    fn issuer_name(&self) -> String {
        self.issuer.clone()
    }

    fn serial_number(&self) -> Option<String> {
        self.serial.clone()
    }

    fn encoded(&self) -> Vec<u8> {
        self.der.clone()
    }

    fn sha256_thumbprint(&self) -> Option<Vec<u8>> {
        self.thumbprint.clone()
    }
}

/// DER SubjectPublicKeyInfo of a certificate.
pub fn subject_public_key_info(cert_der: &[u8]) -> Result<Vec<u8>> {
    let (_, cert) = x509_parser::parse_x509_certificate(cert_der)
        .map_err(|e| Error::InvalidCertificate(format!("cannot parse certificate: {}", e)))?;
    Ok(cert.public_key().raw.to_vec())
}

//! Signature data model.
//!
//! This module defines the records exchanged between the parser, the
//! serializers, the controller and the manager.

use super::ns;
use crate::error::{Error, Result};
use chrono::{DateTime, NaiveDateTime, Timelike, Utc};
use serde::Serialize;

/// Numeric handle of a signature within one controller.
pub type SecurityId = u32;

/// Digest algorithm of a reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum DigestAlgorithm {
    /// SHA-1 (canonical dialect)
    #[default]
    Sha1,
    /// SHA-256 (relationship dialect)
    Sha256,
}

impl DigestAlgorithm {
    /// Algorithm identifier URI.
    pub fn uri(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha1 => ns::ALGO_SHA1,
            DigestAlgorithm::Sha256 => ns::ALGO_SHA256,
        }
    }

    /// Parse an algorithm identifier URI.
    pub fn from_uri(uri: &str) -> Option<Self> {
        match uri {
            ns::ALGO_SHA1 => Some(DigestAlgorithm::Sha1),
            ns::ALGO_SHA256 => Some(DigestAlgorithm::Sha256),
            _ => None,
        }
    }

    /// Get the name of this algorithm.
    pub fn name(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha1 => "SHA-1",
            DigestAlgorithm::Sha256 => "SHA-256",
        }
    }
}

/// Signature algorithm of a `SignedInfo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum SignatureAlgorithm {
    /// RSA PKCS#1 v1.5 with SHA-1
    #[default]
    RsaSha1,
    /// RSA PKCS#1 v1.5 with SHA-256
    RsaSha256,
}

impl SignatureAlgorithm {
    /// Algorithm identifier URI.
    pub fn uri(&self) -> &'static str {
        match self {
            SignatureAlgorithm::RsaSha1 => ns::ALGO_RSA_SHA1,
            SignatureAlgorithm::RsaSha256 => ns::ALGO_RSA_SHA256,
        }
    }

    /// Parse an algorithm identifier URI.
    pub fn from_uri(uri: &str) -> Option<Self> {
        match uri {
            ns::ALGO_RSA_SHA1 => Some(SignatureAlgorithm::RsaSha1),
            ns::ALGO_RSA_SHA256 => Some(SignatureAlgorithm::RsaSha256),
            _ => None,
        }
    }

    /// Digest used inside the signature.
    pub fn digest(&self) -> DigestAlgorithm {
        match self {
            SignatureAlgorithm::RsaSha1 => DigestAlgorithm::Sha1,
            SignatureAlgorithm::RsaSha256 => DigestAlgorithm::Sha256,
        }
    }
}

/// Serialization dialect of a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SignatureDialect {
    /// Plain XML-DSig inside `document-signatures` (ODF)
    Canonical,
    /// Package signature with XAdES properties (OOXML)
    Relationship,
}

impl SignatureDialect {
    /// Algorithm used for the signature value.
    pub fn signature_algorithm(&self) -> SignatureAlgorithm {
        match self {
            SignatureDialect::Canonical => SignatureAlgorithm::RsaSha1,
            SignatureDialect::Relationship => SignatureAlgorithm::RsaSha256,
        }
    }

    /// Algorithm used for reference digests.
    pub fn digest_algorithm(&self) -> DigestAlgorithm {
        self.signature_algorithm().digest()
    }
}

/// What a reference points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReferenceKind {
    /// Element inside the signature itself, addressed by `#Id`
    SameDocument,
    /// Package entry digested as raw bytes
    BinaryStream,
    /// Package entry digested after canonicalization
    XmlStream,
}

/// One `ds:Reference`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReferenceRecord {
    /// Reference kind
    pub kind: ReferenceKind,
    /// Entry URI, or element id without `#` for same-document references
    pub uri: String,
    /// Digest algorithm
    pub digest_algorithm: DigestAlgorithm,
    /// Base64 digest value, empty until computed
    pub digest_value: String,
}

impl ReferenceRecord {
    /// Reference to a package entry.
    pub fn stream(uri: impl Into<String>, binary: bool) -> Self {
        Self {
            kind: if binary {
                ReferenceKind::BinaryStream
            } else {
                ReferenceKind::XmlStream
            },
            uri: uri.into(),
            digest_algorithm: DigestAlgorithm::default(),
            digest_value: String::new(),
        }
    }

    /// Reference to an element of the signature.
    pub fn same_document(id: impl Into<String>) -> Self {
        Self {
            kind: ReferenceKind::SameDocument,
            uri: id.into(),
            digest_algorithm: DigestAlgorithm::default(),
            digest_value: String::new(),
        }
    }

    /// Whether this is a same-document reference.
    pub fn is_same_document(&self) -> bool {
        self.kind == ReferenceKind::SameDocument
    }

    /// URI as written into the `URI` attribute.
    pub fn attribute_uri(&self) -> String {
        if self.is_same_document() {
            format!("#{}", self.uri)
        } else {
            self.uri.clone()
        }
    }
}

/// Verification outcome of a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum VerificationStatus {
    /// Every digest and the signature value check out
    Valid,
    /// A digest or the signature value does not match
    Invalid,
    /// Verification could not be carried out
    #[default]
    Unknown,
}

impl VerificationStatus {
    /// Check if the status indicates a valid signature.
    pub fn is_valid(&self) -> bool {
        matches!(self, VerificationStatus::Valid)
    }
}

/// Everything known about one signature.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SignatureRecord {
    /// Controller-assigned handle
    pub security_id: SecurityId,
    /// `Id` of the `Signature` element
    pub signature_id: Option<String>,
    /// `Id` of the date signature property
    pub property_id: Option<String>,
    /// `Id` of the description signature property
    pub description_property_id: Option<String>,
    /// Free-text comment
    pub description: String,
    /// Signing time
    pub date_time: Option<DateTime<Utc>>,
    /// Signing time exactly as stored, preferred on re-export
    pub date_time_text: Option<String>,
    /// Algorithm of the signature value
    pub signature_algorithm: SignatureAlgorithm,
    /// Base64 signature value
    pub signature_value: String,
    /// Certificate issuer distinguished name
    pub issuer_name: String,
    /// Certificate serial number, decimal
    pub serial_number: String,
    /// Base64 DER certificate
    pub certificate: String,
    /// Base64 SHA-256 of the DER certificate
    pub certificate_digest: Option<String>,
    /// References in document order
    pub references: Vec<ReferenceRecord>,
    /// Verification outcome
    pub status: VerificationStatus,
    /// Signature part bytes as read, rewritten verbatim on re-export
    #[serde(skip)]
    pub raw_bytes: Option<Vec<u8>>,
}

impl SignatureRecord {
    /// Empty record with the given handle.
    pub fn new(security_id: SecurityId) -> Self {
        Self {
            security_id,
            ..Self::default()
        }
    }

    /// Find a same-document reference by element id.
    pub fn same_document_reference(&self, id: &str) -> Option<&ReferenceRecord> {
        self.references
            .iter()
            .find(|r| r.is_same_document() && r.uri == id)
    }

    /// Signing time as written in the given dialect.
    ///
    /// Text read from a stored signature is reproduced unchanged in both
    /// dialects. Only a freshly set time is formatted.
    pub fn timestamp_text(&self, dialect: SignatureDialect) -> String {
        if let Some(text) = &self.date_time_text {
            return text.clone();
        }
        match (self.date_time, dialect) {
            (Some(dt), SignatureDialect::Canonical) => format_iso8601(&dt),
            (Some(dt), SignatureDialect::Relationship) => format_utc_designated(&dt),
            (None, _) => String::new(),
        }
    }

    /// Check that the record can be serialized.
    pub fn validate(&self) -> Result<()> {
        if self.references.is_empty() {
            return Err(Error::PreconditionViolated(format!(
                "signature {} has no references",
                self.security_id
            )));
        }
        Ok(())
    }
}

/// Format a timestamp as `YYYY-MM-DDThh:mm:ss[,nnnnnnnnn]` without zone.
pub fn format_iso8601(dt: &DateTime<Utc>) -> String {
    let base = dt.format("%Y-%m-%dT%H:%M:%S").to_string();
    match dt.timestamp_subsec_nanos() {
        0 => base,
        nanos => format!("{},{:09}", base, nanos),
    }
}

/// Whole seconds with the UTC designator, as relationship signatures store it.
fn format_utc_designated(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Parse a stored timestamp. Unparseable text yields `None`.
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    let text = text.trim_end_matches('Z');
    ["%Y-%m-%dT%H:%M:%S,%f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Current time as a UTC timestamp with whole seconds.
pub fn now_seconds() -> DateTime<Utc> {
    let now = Utc::now();
    now.with_nanosecond(0).unwrap_or(now)
}

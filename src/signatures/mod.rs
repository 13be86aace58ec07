//! XML digital signatures of document packages.
//!
//! This module creates, reads and verifies XML-DSig signatures in two
//! dialects:
//!
//! - **Canonical** (ODF): every signature lives in one
//!   `META-INF/documentsignatures.xml` stream, SHA-1 digests
//! - **Relationship** (OOXML): one `_xmlsignatures/sigN.xml` part per
//!   signature, addressed through relationships, SHA-256 digests and XAdES
//!   signed properties
//!
//! ## Example
//!
//! ```ignore
//! use docsig_oxide::config::SignatureConfig;
//! use docsig_oxide::package::MemoryPackage;
//! use docsig_oxide::signatures::{DocumentSignatureManager, RsaSecurityContext, X509Certificate};
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! let package = Rc::new(RefCell::new(MemoryPackage::open("report.odt")?));
//! let mut manager = DocumentSignatureManager::new(package.clone(), SignatureConfig::default());
//! manager.load_manifest()?;
//! manager.set_security_context(Rc::new(RsaSecurityContext::from_pkcs8_pem(&key_pem)?));
//!
//! let cert = X509Certificate::from_der(cert_der)?;
//! manager.add(Some(&cert), "Approved")?;
//! manager.read(true, false)?;
//! manager.commit()?;
//! package.borrow().save("report-signed.odt")?;
//! ```
//!
//! ## Standards Reference
//!
//! - W3C XML Signature Syntax and Processing (XML-DSig)
//! - ETSI TS 101 903 - XAdES
//! - ISO/IEC 29500-2 - Open Packaging Conventions, digital signatures

pub mod certificate;
pub mod controller;
pub mod engine;
pub mod export;
pub mod manager;
pub mod ns;
pub mod parser;
pub mod stream;
pub mod types;

pub use certificate::{Certificate, StaticCertificate, X509Certificate};
pub use controller::{ComponentStatus, SignatureController};
pub use engine::{
    DefaultComponents, PackageUriBinding, RsaSecurityContext, RsaSignatureEngine,
    SecurityComponents, SecurityContext, SignatureEngine, UriBinding,
};
pub use manager::DocumentSignatureManager;
pub use stream::{
    MemoryStream, OpenMode, SharedStream, SignatureStorage, SignatureStreamHandle,
    SignatureStreamResolver,
};
pub use types::{
    DigestAlgorithm, ReferenceKind, ReferenceRecord, SecurityId, SignatureAlgorithm,
    SignatureDialect, SignatureRecord, VerificationStatus,
};

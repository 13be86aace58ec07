//! Namespace and algorithm identifiers.

/// XML-DSig namespace.
pub const DSIG: &str = "http://www.w3.org/2000/09/xmldsig#";

/// ODF document-signatures namespace.
pub const DOCUMENT_SIGNATURES: &str = "urn:oasis:names:tc:opendocument:xmlns:digitalsignature:1.0";

/// Dublin Core elements namespace (signature date and description).
pub const DC: &str = "http://purl.org/dc/elements/1.1/";

/// XAdES 1.3.2 namespace.
pub const XADES: &str = "http://uri.etsi.org/01903/v1.3.2#";

/// OPC digital-signature namespace (`mdssi`).
pub const MDSSI: &str = "http://schemas.openxmlformats.org/package/2006/digital-signature";

/// Office signature-info namespace.
pub const OFFICE_DIGSIG: &str = "http://schemas.microsoft.com/office/2006/digsig";

/// Inclusive Canonical XML 1.0.
pub const ALGO_C14N: &str = "http://www.w3.org/TR/2001/REC-xml-c14n-20010315";

/// OPC relationship transform.
pub const ALGO_RELATIONSHIP_TRANSFORM: &str =
    "http://schemas.openxmlformats.org/package/2006/RelationshipTransform";

/// SHA-1 digest.
pub const ALGO_SHA1: &str = "http://www.w3.org/2000/09/xmldsig#sha1";

/// SHA-256 digest.
pub const ALGO_SHA256: &str = "http://www.w3.org/2001/04/xmlenc#sha256";

/// RSA with SHA-1.
pub const ALGO_RSA_SHA1: &str = "http://www.w3.org/2000/09/xmldsig#rsa-sha1";

/// RSA with SHA-256.
pub const ALGO_RSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";

/// Reference `Type` of the XAdES signed properties.
pub const TYPE_SIGNED_PROPERTIES: &str = "http://uri.etsi.org/01903#SignedProperties";

/// Reference `Type` of a signature object.
pub const TYPE_OBJECT: &str = "http://www.w3.org/2000/09/xmldsig#Object";

//! Relationship dialect: OPC package signatures with XAdES properties, one
//! signature per part.

use super::{algorithm, c14n_transforms, empty_element, text_element};
use crate::error::{Error, Result};
use crate::package::relationships::{
    is_relationships_uri, read_relationships, signed_relationships,
};
use crate::package::{uri_to_entry_name, Package};
use crate::signatures::ns;
use crate::signatures::types::{ReferenceRecord, SignatureDialect, SignatureRecord};
use crate::xml::{Attributes, DocumentHandler};

/// `Id` of every relationship-dialect `Signature` element.
pub const PACKAGE_SIGNATURE_ID: &str = "idPackageSignature";

/// `Id` of the object holding the manifest and signing time.
pub const PACKAGE_OBJECT_ID: &str = "idPackageObject";

/// `Id` of the object holding vendor metadata.
pub const OFFICE_OBJECT_ID: &str = "idOfficeObject";

/// `Id` of the XAdES signed properties.
pub const SIGNED_PROPERTIES_ID: &str = "idSignedProperties";

/// Reference URI prefixes never signed.
const URI_BLACKLIST: [&str; 4] = [
    "/%5BContent_Types%5D.xml",
    "/docProps/app.xml",
    "/docProps/core.xml",
    // Don't attempt to sign other signatures for now
    "/_xmlsignatures",
];

/// Whether a stream reference is excluded from the manifest.
pub fn is_blacklisted_uri(uri: &str) -> bool {
    URI_BLACKLIST.iter().any(|prefix| uri.starts_with(prefix))
}

/// Emit one relationship-dialect `Signature` element.
///
/// The XAdES signed properties are written when the record references
/// them from `SignedInfo`.
pub fn export_relationship_signature(
    handler: &mut dyn DocumentHandler,
    record: &SignatureRecord,
    package: &dyn Package,
) -> Result<()> {
    let target = format!("#{}", PACKAGE_SIGNATURE_ID);
    handler.start_element(
        "Signature",
        Attributes::new()
            .with("xmlns", ns::DSIG)
            .with("Id", PACKAGE_SIGNATURE_ID),
    )?;

    handler.start_element("SignedInfo", Attributes::new())?;
    empty_element(handler, "CanonicalizationMethod", algorithm(ns::ALGO_C14N))?;
    empty_element(handler, "SignatureMethod", algorithm(ns::ALGO_RSA_SHA256))?;
    for reference in record.references.iter().filter(|r| r.is_same_document()) {
        let reference_type = if reference.uri == SIGNED_PROPERTIES_ID {
            ns::TYPE_SIGNED_PROPERTIES
        } else {
            ns::TYPE_OBJECT
        };
        handler.start_element(
            "Reference",
            Attributes::new()
                .with("Type", reference_type)
                .with("URI", reference.attribute_uri()),
        )?;
        if reference.uri == SIGNED_PROPERTIES_ID {
            c14n_transforms(handler)?;
        }
        digest(handler, reference)?;
        handler.end_element("Reference")?;
    }
    handler.end_element("SignedInfo")?;

    text_element(handler, "SignatureValue", Attributes::new(), &record.signature_value)?;

    handler.start_element("KeyInfo", Attributes::new())?;
    handler.start_element("X509Data", Attributes::new())?;
    text_element(handler, "X509Certificate", Attributes::new(), &record.certificate)?;
    handler.end_element("X509Data")?;
    handler.end_element("KeyInfo")?;

    write_package_object(handler, record, package, &target)?;
    write_office_object(handler, record, &target)?;
    write_qualifying_properties(handler, record, &target)?;

    handler.end_element("Signature")
}

fn digest(handler: &mut dyn DocumentHandler, reference: &ReferenceRecord) -> Result<()> {
    empty_element(handler, "DigestMethod", algorithm(ns::ALGO_SHA256))?;
    text_element(handler, "DigestValue", Attributes::new(), &reference.digest_value)
}

fn write_package_object(
    handler: &mut dyn DocumentHandler,
    record: &SignatureRecord,
    package: &dyn Package,
    target: &str,
) -> Result<()> {
    handler.start_element("Object", Attributes::new().with("Id", PACKAGE_OBJECT_ID))?;

    handler.start_element("Manifest", Attributes::new())?;
    for reference in record
        .references
        .iter()
        .filter(|r| !r.is_same_document() && !is_blacklisted_uri(&r.uri))
    {
        handler.start_element("Reference", Attributes::new().with("URI", reference.uri.as_str()))?;
        if is_relationships_uri(&reference.uri) {
            let relationships = read_relationships(&package.read_entry(&uri_to_entry_name(
                &reference.uri,
            ))?)?;
            handler.start_element("Transforms", Attributes::new())?;
            handler.start_element("Transform", algorithm(ns::ALGO_RELATIONSHIP_TRANSFORM))?;
            for relationship in signed_relationships(&relationships) {
                empty_element(
                    handler,
                    "mdssi:RelationshipReference",
                    Attributes::new()
                        .with("xmlns:mdssi", ns::MDSSI)
                        .with("SourceId", relationship.id.as_str()),
                )?;
            }
            handler.end_element("Transform")?;
            empty_element(handler, "Transform", algorithm(ns::ALGO_C14N))?;
            handler.end_element("Transforms")?;
        }
        digest(handler, reference)?;
        handler.end_element("Reference")?;
    }
    handler.end_element("Manifest")?;

    handler.start_element("SignatureProperties", Attributes::new())?;
    handler.start_element(
        "SignatureProperty",
        Attributes::new()
            .with("Id", "idSignatureTime")
            .with("Target", target),
    )?;
    handler.start_element(
        "mdssi:SignatureTime",
        Attributes::new().with("xmlns:mdssi", ns::MDSSI),
    )?;
    text_element(handler, "mdssi:Format", Attributes::new(), "YYYY-MM-DDThh:mm:ssTZD")?;
    text_element(
        handler,
        "mdssi:Value",
        Attributes::new(),
        &record.timestamp_text(SignatureDialect::Relationship),
    )?;
    handler.end_element("mdssi:SignatureTime")?;
    handler.end_element("SignatureProperty")?;
    handler.end_element("SignatureProperties")?;

    handler.end_element("Object")
}

fn write_office_object(
    handler: &mut dyn DocumentHandler,
    record: &SignatureRecord,
    target: &str,
) -> Result<()> {
    handler.start_element("Object", Attributes::new().with("Id", OFFICE_OBJECT_ID))?;
    handler.start_element("SignatureProperties", Attributes::new())?;
    handler.start_element(
        "SignatureProperty",
        Attributes::new()
            .with("Id", "idOfficeV1Details")
            .with("Target", target),
    )?;
    handler.start_element(
        "SignatureInfoV1",
        Attributes::new().with("xmlns", ns::OFFICE_DIGSIG),
    )?;
    let details: [(&str, &str); 15] = [
        ("SetupId", ""),
        ("SignatureText", ""),
        ("SignatureImage", ""),
        ("SignatureComments", record.description.as_str()),
        ("WindowsVersion", "6.1"),
        ("OfficeVersion", "16.0"),
        ("ApplicationVersion", "16.0"),
        ("Monitors", "1"),
        ("HorizontalResolution", "1280"),
        ("VerticalResolution", "800"),
        ("ColorDepth", "32"),
        ("SignatureProviderId", "{00000000-0000-0000-0000-000000000000}"),
        ("SignatureProviderUrl", ""),
        ("SignatureProviderDetails", "9"),
        ("SignatureType", "1"),
    ];
    for (name, value) in details {
        text_element(handler, name, Attributes::new(), value)?;
    }
    handler.end_element("SignatureInfoV1")?;
    handler.end_element("SignatureProperty")?;
    handler.end_element("SignatureProperties")?;
    handler.end_element("Object")
}

fn write_qualifying_properties(
    handler: &mut dyn DocumentHandler,
    record: &SignatureRecord,
    target: &str,
) -> Result<()> {
    handler.start_element("Object", Attributes::new())?;
    handler.start_element(
        "xd:QualifyingProperties",
        Attributes::new()
            .with("xmlns:xd", ns::XADES)
            .with("Target", target),
    )?;

    if record.same_document_reference(SIGNED_PROPERTIES_ID).is_some() {
        let cert_digest = record.certificate_digest.as_deref().ok_or_else(|| {
            Error::InvalidCertificate("signed properties need a certificate digest".to_string())
        })?;

        handler.start_element(
            "xd:SignedProperties",
            Attributes::new().with("Id", SIGNED_PROPERTIES_ID),
        )?;
        handler.start_element("xd:SignedSignatureProperties", Attributes::new())?;
        text_element(
            handler,
            "xd:SigningTime",
            Attributes::new(),
            &record.timestamp_text(SignatureDialect::Relationship),
        )?;
        handler.start_element("xd:SigningCertificate", Attributes::new())?;
        handler.start_element("xd:Cert", Attributes::new())?;
        handler.start_element("xd:CertDigest", Attributes::new())?;
        empty_element(handler, "DigestMethod", algorithm(ns::ALGO_SHA256))?;
        text_element(handler, "DigestValue", Attributes::new(), cert_digest)?;
        handler.end_element("xd:CertDigest")?;
        handler.start_element("xd:IssuerSerial", Attributes::new())?;
        text_element(handler, "X509IssuerName", Attributes::new(), &record.issuer_name)?;
        text_element(handler, "X509SerialNumber", Attributes::new(), &record.serial_number)?;
        handler.end_element("xd:IssuerSerial")?;
        handler.end_element("xd:Cert")?;
        handler.end_element("xd:SigningCertificate")?;
        handler.start_element("xd:SignaturePolicyIdentifier", Attributes::new())?;
        empty_element(handler, "xd:SignaturePolicyImplied", Attributes::new())?;
        handler.end_element("xd:SignaturePolicyIdentifier")?;
        handler.end_element("xd:SignedSignatureProperties")?;
        handler.end_element("xd:SignedProperties")?;
    }

    handler.end_element("xd:QualifyingProperties")?;
    handler.end_element("Object")
}

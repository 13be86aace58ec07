//! Canonical dialect: XML-DSig signatures inside an ODF
//! `document-signatures` stream.

use super::{algorithm, c14n_transforms, empty_element, text_element};
use crate::error::Result;
use crate::signatures::ns;
use crate::signatures::types::{ReferenceKind, SignatureDialect, SignatureRecord};
use crate::xml::{Attributes, DocumentHandler};

/// Root element of the signature stream.
pub const DOCUMENT_SIGNATURES: &str = "document-signatures";

/// Open the signature stream document.
pub fn start_document_signatures(handler: &mut dyn DocumentHandler) -> Result<()> {
    handler.start_document()?;
    handler.start_element(
        DOCUMENT_SIGNATURES,
        Attributes::new().with("xmlns", ns::DOCUMENT_SIGNATURES),
    )
}

/// Close the signature stream document.
pub fn end_document_signatures(handler: &mut dyn DocumentHandler) -> Result<()> {
    handler.end_element(DOCUMENT_SIGNATURES)?;
    handler.end_document()
}

/// Emit one `Signature` element.
pub fn export_signature(handler: &mut dyn DocumentHandler, record: &SignatureRecord) -> Result<()> {
    let mut signature_attributes = Attributes::new().with("xmlns", ns::DSIG);
    if let Some(id) = &record.signature_id {
        signature_attributes.push("Id", id.as_str());
    }
    handler.start_element("Signature", signature_attributes)?;

    handler.start_element("SignedInfo", Attributes::new())?;
    empty_element(handler, "CanonicalizationMethod", algorithm(ns::ALGO_C14N))?;
    empty_element(handler, "SignatureMethod", algorithm(ns::ALGO_RSA_SHA1))?;
    for reference in &record.references {
        handler.start_element(
            "Reference",
            Attributes::new().with("URI", reference.attribute_uri()),
        )?;
        if reference.kind == ReferenceKind::XmlStream {
            c14n_transforms(handler)?;
        }
        empty_element(handler, "DigestMethod", algorithm(ns::ALGO_SHA1))?;
        text_element(handler, "DigestValue", Attributes::new(), &reference.digest_value)?;
        handler.end_element("Reference")?;
    }
    handler.end_element("SignedInfo")?;

    text_element(handler, "SignatureValue", Attributes::new(), &record.signature_value)?;

    handler.start_element("KeyInfo", Attributes::new())?;
    handler.start_element("X509Data", Attributes::new())?;
    handler.start_element("X509IssuerSerial", Attributes::new())?;
    text_element(handler, "X509IssuerName", Attributes::new(), &record.issuer_name)?;
    text_element(handler, "X509SerialNumber", Attributes::new(), &record.serial_number)?;
    handler.end_element("X509IssuerSerial")?;
    if !record.certificate.is_empty() {
        text_element(handler, "X509Certificate", Attributes::new(), &record.certificate)?;
    }
    handler.end_element("X509Data")?;
    handler.end_element("KeyInfo")?;

    handler.start_element("Object", Attributes::new())?;
    handler.start_element("SignatureProperties", Attributes::new())?;
    property(
        handler,
        record,
        record.property_id.as_deref(),
        "dc:date",
        &record.timestamp_text(SignatureDialect::Canonical),
    )?;
    if !record.description.is_empty() {
        property(
            handler,
            record,
            record.description_property_id.as_deref(),
            "dc:description",
            &record.description,
        )?;
    }
    handler.end_element("SignatureProperties")?;
    handler.end_element("Object")?;

    handler.end_element("Signature")
}

fn property(
    handler: &mut dyn DocumentHandler,
    record: &SignatureRecord,
    id: Option<&str>,
    element: &str,
    text: &str,
) -> Result<()> {
    let mut attributes = Attributes::new();
    if let Some(id) = id {
        attributes.push("Id", id);
    }
    if let Some(signature_id) = &record.signature_id {
        attributes.push("Target", format!("#{}", signature_id));
    }
    handler.start_element("SignatureProperty", attributes)?;
    text_element(handler, element, Attributes::new().with("xmlns:dc", ns::DC), text)?;
    handler.end_element("SignatureProperty")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signatures::types::ReferenceRecord;
    use crate::xml::XmlEventWriter;

    fn sample() -> SignatureRecord {
        let mut record = SignatureRecord::new(1);
        record.signature_id = Some("ID_sig".to_string());
        record.property_id = Some("ID_date".to_string());
        record.date_time_text = Some("2024-01-15T10:30:00".to_string());
        record.issuer_name = "CN=Test".to_string();
        record.serial_number = "4660".to_string();
        record.signature_value = "c2ln".to_string();
        let mut content = ReferenceRecord::stream("content.xml", false);
        content.digest_value = "ZGln".to_string();
        record.references = vec![
            content,
            ReferenceRecord::stream("Pictures/a.png", true),
            ReferenceRecord::same_document("ID_date"),
        ];
        record
    }

    fn export(record: &SignatureRecord) -> String {
        let mut writer = XmlEventWriter::new(Vec::new());
        export_signature(&mut writer, record).unwrap();
        String::from_utf8(writer.take_bytes()).unwrap()
    }

    #[test]
    fn test_element_order() {
        let xml = export(&sample());
        let order = [
            "<Signature xmlns=\"http://www.w3.org/2000/09/xmldsig#\" Id=\"ID_sig\">",
            "<SignedInfo>",
            "<CanonicalizationMethod",
            "<SignatureMethod Algorithm=\"http://www.w3.org/2000/09/xmldsig#rsa-sha1\">",
            "<Reference URI=\"content.xml\">",
            "<Reference URI=\"Pictures/a.png\">",
            "<Reference URI=\"#ID_date\">",
            "<SignatureValue>c2ln</SignatureValue>",
            "<X509IssuerName>CN=Test</X509IssuerName>",
            "<X509SerialNumber>4660</X509SerialNumber>",
            "<SignatureProperty Id=\"ID_date\" Target=\"#ID_sig\">",
            "<dc:date xmlns:dc=\"http://purl.org/dc/elements/1.1/\">2024-01-15T10:30:00</dc:date>",
        ];
        let mut last = 0;
        for needle in order {
            let pos = xml[last..].find(needle).unwrap_or_else(|| panic!("missing {}", needle));
            last += pos;
        }
    }

    #[test]
    fn test_transforms_only_for_xml_streams() {
        let xml = export(&sample());
        assert_eq!(xml.matches("<Transforms>").count(), 1);
        let content = xml.find("content.xml").unwrap();
        let transform = xml.find("<Transforms>").unwrap();
        let picture = xml.find("Pictures/a.png").unwrap();
        assert!(content < transform && transform < picture);
    }

    #[test]
    fn test_optional_parts() {
        let mut record = sample();
        assert!(!export(&record).contains("X509Certificate"));
        assert!(!export(&record).contains("dc:description"));

        record.certificate = "Y2VydA==".to_string();
        record.description = "Approved".to_string();
        record.description_property_id = Some("ID_desc".to_string());
        let xml = export(&record);
        assert!(xml.contains("<X509Certificate>Y2VydA==</X509Certificate>"));
        assert!(xml.contains("<SignatureProperty Id=\"ID_desc\" Target=\"#ID_sig\">"));
        assert!(xml.contains(">Approved</dc:description>"));
    }

    #[test]
    fn test_document_framing() {
        let mut writer = XmlEventWriter::new(Vec::new());
        start_document_signatures(&mut writer).unwrap();
        end_document_signatures(&mut writer).unwrap();
        let xml = String::from_utf8(writer.take_bytes()).unwrap();
        assert!(xml.contains(
            "<document-signatures xmlns=\"urn:oasis:names:tc:opendocument:xmlns:digitalsignature:1.0\"></document-signatures>"
        ));
    }
}

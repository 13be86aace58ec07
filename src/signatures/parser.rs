//! Builds [`SignatureRecord`]s from a SAX event stream.
//!
//! The parser is the upstream node of the read chain: every event it
//! receives is recorded into the element stack and forwarded to its current
//! target, which the controller switches between nothing and the buffering
//! node. Points where the controller must act (a signature begins, a
//! same-document reference is declared, a signature is complete) are queued
//! as [`ParseNotice`]s and drained by the controller after each event.

use super::ns;
use super::types::{
    parse_timestamp, DigestAlgorithm, ReferenceKind, ReferenceRecord, SignatureAlgorithm,
    SignatureRecord,
};
use crate::chain::{ChainSource, ElementStackKeeper};
use crate::error::Result;
use crate::xml::{local_name, Attributes, DocumentHandler, SaxEvent, SharedHandler};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

/// Something the controller must react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseNotice {
    /// A `Signature` element was opened
    SignatureStarted,
    /// A reference to an element of the signature (id without `#`)
    SameDocumentReference(String),
    /// A `Signature` element was closed
    SignatureFinished(SignatureRecord),
}

/// Streaming signature reader.
#[derive(Default)]
pub struct SignatureParser {
    target: Option<SharedHandler>,
    stack: Option<Rc<RefCell<ElementStackKeeper>>>,
    record: Option<SignatureRecord>,
    open: Vec<String>,
    text: String,
    property_id: Option<String>,
    notices: VecDeque<ParseNotice>,
}

impl SignatureParser {
    /// Create a parser forwarding to `target`.
    pub fn new(target: Option<SharedHandler>) -> Self {
        Self {
            target,
            ..Self::default()
        }
    }

    /// Record events into an element stack before forwarding them.
    pub fn with_element_stack(mut self, stack: Rc<RefCell<ElementStackKeeper>>) -> Self {
        self.stack = Some(stack);
        self
    }

    /// Next queued notice.
    pub fn next_notice(&mut self) -> Option<ParseNotice> {
        self.notices.pop_front()
    }

    /// The signature being read, if the input stopped inside one.
    pub fn take_partial(&mut self) -> Option<SignatureRecord> {
        self.record.take()
    }

    fn inside(&self, local: &str) -> bool {
        self.open.iter().any(|name| name == local)
    }

    fn current_reference(&mut self) -> Option<&mut ReferenceRecord> {
        if !self.inside("Reference") {
            return None;
        }
        self.record.as_mut().and_then(|r| r.references.last_mut())
    }

    fn open_element(&mut self, local: &str, attributes: &Attributes) {
        if local == "Signature" {
            self.record = Some(SignatureRecord {
                signature_id: attributes.get("Id").map(str::to_string),
                ..SignatureRecord::default()
            });
            self.property_id = None;
            self.notices.push_back(ParseNotice::SignatureStarted);
            return;
        }
        let Some(record) = self.record.as_mut() else {
            return;
        };

        match local {
            "Reference" => {
                let uri = attributes.get("URI").unwrap_or_default();
                if let Some(id) = uri.strip_prefix('#') {
                    record.references.push(ReferenceRecord::same_document(id));
                    self.notices
                        .push_back(ParseNotice::SameDocumentReference(id.to_string()));
                } else {
                    record.references.push(ReferenceRecord::stream(uri, true));
                }
            },
            "Transform" => {
                if attributes.get("Algorithm") == Some(ns::ALGO_C14N) {
                    if let Some(reference) = self.current_reference() {
                        if reference.kind == ReferenceKind::BinaryStream {
                            reference.kind = ReferenceKind::XmlStream;
                        }
                    }
                }
            },
            "DigestMethod" => {
                let algorithm = attributes
                    .get("Algorithm")
                    .and_then(DigestAlgorithm::from_uri)
                    .unwrap_or_default();
                if let Some(reference) = self.current_reference() {
                    reference.digest_algorithm = algorithm;
                }
            },
            "SignatureMethod" => {
                if let Some(algorithm) = attributes
                    .get("Algorithm")
                    .and_then(SignatureAlgorithm::from_uri)
                {
                    record.signature_algorithm = algorithm;
                }
            },
            "SignatureProperty" => {
                self.property_id = attributes.get("Id").map(str::to_string);
            },
            _ => {},
        }
    }

    fn close_element(&mut self, local: &str) {
        let text = std::mem::take(&mut self.text);
        let text = text.trim();

        if local == "Signature" {
            if let Some(record) = self.record.take() {
                self.notices.push_back(ParseNotice::SignatureFinished(record));
            }
            return;
        }

        let in_cert_digest = self.inside("CertDigest");
        let in_signature_time = self.inside("SignatureTime");
        let property_id = self.property_id.clone();
        if local == "DigestValue" && !in_cert_digest {
            if let Some(reference) = self.current_reference() {
                reference.digest_value = text.to_string();
            }
            return;
        }
        let Some(record) = self.record.as_mut() else {
            return;
        };

        match local {
            "DigestValue" => record.certificate_digest = Some(text.to_string()),
            "SignatureValue" => record.signature_value = text.to_string(),
            "X509IssuerName" if record.issuer_name.is_empty() => {
                record.issuer_name = text.to_string();
            },
            "X509SerialNumber" if record.serial_number.is_empty() => {
                record.serial_number = text.to_string();
            },
            "X509Certificate" if record.certificate.is_empty() => {
                record.certificate = text.to_string();
            },
            "date" => {
                record.property_id = property_id;
                set_time(record, text);
            },
            "Value" if in_signature_time => set_time(record, text),
            "SigningTime" if record.date_time_text.is_none() => set_time(record, text),
            "description" => {
                record.description_property_id = property_id;
                record.description = text.to_string();
            },
            "SignatureComments" => record.description = text.to_string(),
            "SignatureProperty" => self.property_id = None,
            _ => {},
        }
    }
}

fn set_time(record: &mut SignatureRecord, text: &str) {
    record.date_time = parse_timestamp(text);
    record.date_time_text = Some(text.to_string());
}

impl DocumentHandler for SignatureParser {
    fn handle(&mut self, event: &SaxEvent) -> Result<()> {
        match event {
            SaxEvent::StartElement { name, attributes } => {
                let local = local_name(name).to_string();
                self.text.clear();
                self.open_element(&local, attributes);
                self.open.push(local);
            },
            SaxEvent::EndElement { name } => {
                self.open.pop();
                self.close_element(local_name(name));
            },
            SaxEvent::Characters(text) => {
                if self.record.is_some() {
                    self.text.push_str(text);
                }
            },
            SaxEvent::StartDocument => {
                self.open.clear();
                self.record = None;
            },
            SaxEvent::EndDocument => {},
        }

        if let Some(stack) = &self.stack {
            stack.borrow_mut().record(event);
        }
        if let Some(target) = &self.target {
            target.borrow_mut().handle(event)?;
        }
        Ok(())
    }
}

impl ChainSource for SignatureParser {
    fn set_document_handler(&mut self, target: Option<SharedHandler>) {
        self.target = target;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::{parse_document, EventRecorder};

    const ODF_SIGNATURE: &str = r##"<?xml version="1.0" encoding="UTF-8"?>
<document-signatures xmlns="urn:oasis:names:tc:opendocument:xmlns:digitalsignature:1.0">
 <Signature xmlns="http://www.w3.org/2000/09/xmldsig#" Id="ID_s">
  <SignedInfo>
   <CanonicalizationMethod Algorithm="http://www.w3.org/TR/2001/REC-xml-c14n-20010315"/>
   <SignatureMethod Algorithm="http://www.w3.org/2000/09/xmldsig#rsa-sha1"/>
   <Reference URI="content.xml">
    <Transforms><Transform Algorithm="http://www.w3.org/TR/2001/REC-xml-c14n-20010315"/></Transforms>
    <DigestMethod Algorithm="http://www.w3.org/2000/09/xmldsig#sha1"/>
    <DigestValue>Y29udGVudA==</DigestValue>
   </Reference>
   <Reference URI="Pictures/a.png">
    <DigestMethod Algorithm="http://www.w3.org/2000/09/xmldsig#sha1"/>
    <DigestValue>cGljdHVyZQ==</DigestValue>
   </Reference>
   <Reference URI="#ID_d">
    <DigestMethod Algorithm="http://www.w3.org/2000/09/xmldsig#sha1"/>
    <DigestValue>ZGF0ZQ==</DigestValue>
   </Reference>
  </SignedInfo>
  <SignatureValue>
   c2lnbmF0dXJl
  </SignatureValue>
  <KeyInfo><X509Data><X509IssuerSerial>
   <X509IssuerName>CN=Test Signer</X509IssuerName>
   <X509SerialNumber>4660</X509SerialNumber>
  </X509IssuerSerial><X509Certificate>Y2VydA==</X509Certificate></X509Data></KeyInfo>
  <Object><SignatureProperties>
   <SignatureProperty Id="ID_d" Target="#ID_s"><dc:date xmlns:dc="http://purl.org/dc/elements/1.1/">2024-01-15T10:30:00,500000000</dc:date></SignatureProperty>
   <SignatureProperty Id="ID_c" Target="#ID_s"><dc:description xmlns:dc="http://purl.org/dc/elements/1.1/">Approved</dc:description></SignatureProperty>
  </SignatureProperties></Object>
 </Signature>
</document-signatures>"##;

    fn run(parser: &mut SignatureParser, xml: &str) -> Vec<ParseNotice> {
        let mut notices = Vec::new();
        for event in parse_document(xml.as_bytes()).unwrap() {
            parser.handle(&event).unwrap();
            while let Some(notice) = parser.next_notice() {
                notices.push(notice);
            }
        }
        notices
    }

    #[test]
    fn test_parse_canonical_signature() {
        let mut parser = SignatureParser::new(None);
        let notices = run(&mut parser, ODF_SIGNATURE);
        assert_eq!(notices.len(), 3);
        assert_eq!(notices[0], ParseNotice::SignatureStarted);
        assert_eq!(notices[1], ParseNotice::SameDocumentReference("ID_d".to_string()));

        let ParseNotice::SignatureFinished(record) = &notices[2] else {
            panic!("expected a finished signature");
        };
        assert_eq!(record.signature_id.as_deref(), Some("ID_s"));
        assert_eq!(record.references.len(), 3);
        assert_eq!(record.references[0].kind, ReferenceKind::XmlStream);
        assert_eq!(record.references[0].digest_value, "Y29udGVudA==");
        assert_eq!(record.references[1].kind, ReferenceKind::BinaryStream);
        assert_eq!(record.references[2].kind, ReferenceKind::SameDocument);
        assert_eq!(record.references[2].uri, "ID_d");
        assert_eq!(record.signature_value, "c2lnbmF0dXJl");
        assert_eq!(record.issuer_name, "CN=Test Signer");
        assert_eq!(record.serial_number, "4660");
        assert_eq!(record.certificate, "Y2VydA==");
        assert_eq!(record.property_id.as_deref(), Some("ID_d"));
        assert_eq!(
            record.date_time_text.as_deref(),
            Some("2024-01-15T10:30:00,500000000")
        );
        assert!(record.date_time.is_some());
        assert_eq!(record.description, "Approved");
        assert_eq!(record.description_property_id.as_deref(), Some("ID_c"));
        assert!(parser.take_partial().is_none());
    }

    #[test]
    fn test_parse_relationship_signature() {
        let xml = r##"<Signature xmlns="http://www.w3.org/2000/09/xmldsig#" Id="idPackageSignature">
<SignedInfo><SignatureMethod Algorithm="http://www.w3.org/2001/04/xmldsig-more#rsa-sha256"/>
<Reference Type="http://www.w3.org/2000/09/xmldsig#Object" URI="#idPackageObject"><DigestMethod Algorithm="http://www.w3.org/2001/04/xmlenc#sha256"/><DigestValue>AA==</DigestValue></Reference>
</SignedInfo><SignatureValue>AA==</SignatureValue>
<Object Id="idPackageObject"><Manifest><Reference URI="/word/document.xml?ContentType=x"><DigestMethod Algorithm="http://www.w3.org/2001/04/xmlenc#sha256"/><DigestValue>Ag==</DigestValue></Reference></Manifest>
<SignatureProperties><SignatureProperty Id="idSignatureTime" Target="#idPackageSignature"><mdssi:SignatureTime xmlns:mdssi="http://schemas.openxmlformats.org/package/2006/digital-signature"><mdssi:Format>YYYY-MM-DDThh:mm:ssTZD</mdssi:Format><mdssi:Value>2024-01-15T10:30:00Z</mdssi:Value></mdssi:SignatureTime></SignatureProperty></SignatureProperties></Object>
<Object Id="idOfficeObject"><SignatureProperties><SignatureProperty Id="idOfficeV1Details"><SignatureInfoV1 xmlns="http://schemas.microsoft.com/office/2006/digsig"><SignatureComments>Draft</SignatureComments></SignatureInfoV1></SignatureProperty></SignatureProperties></Object>
<Object><xd:QualifyingProperties xmlns:xd="http://uri.etsi.org/01903/v1.3.2#"><xd:SignedProperties Id="idSignedProperties"><xd:SignedSignatureProperties><xd:SigningTime>2024-01-15T10:30:00Z</xd:SigningTime>
<xd:SigningCertificate><xd:Cert><xd:CertDigest><DigestMethod Algorithm="http://www.w3.org/2001/04/xmlenc#sha256"/><DigestValue>dGh1bWI=</DigestValue></xd:CertDigest>
<xd:IssuerSerial><X509IssuerName>CN=Test Signer</X509IssuerName><X509SerialNumber>4660</X509SerialNumber></xd:IssuerSerial></xd:Cert></xd:SigningCertificate></xd:SignedSignatureProperties></xd:SignedProperties></xd:QualifyingProperties></Object>
</Signature>"##;
        let mut parser = SignatureParser::new(None);
        let notices = run(&mut parser, xml);
        let Some(ParseNotice::SignatureFinished(record)) = notices.last() else {
            panic!("expected a finished signature");
        };
        assert_eq!(record.signature_algorithm, SignatureAlgorithm::RsaSha256);
        assert_eq!(record.references.len(), 2);
        assert_eq!(record.references[0].digest_algorithm, DigestAlgorithm::Sha256);
        assert_eq!(record.references[1].digest_value, "Ag==");
        assert_eq!(record.certificate_digest.as_deref(), Some("dGh1bWI="));
        assert_eq!(record.date_time_text.as_deref(), Some("2024-01-15T10:30:00Z"));
        assert_eq!(record.description, "Draft");
        assert_eq!(record.issuer_name, "CN=Test Signer");
    }

    #[test]
    fn test_forwards_and_records_stack() {
        let sink = Rc::new(RefCell::new(EventRecorder::new()));
        let stack = Rc::new(RefCell::new(ElementStackKeeper::new()));
        let target: SharedHandler = sink.clone();
        let mut parser = SignatureParser::new(Some(target)).with_element_stack(stack.clone());
        parser.handle(&SaxEvent::StartDocument).unwrap();
        parser
            .handle(&SaxEvent::start("a", Attributes::new()))
            .unwrap();
        parser
            .handle(&SaxEvent::start("Signature", Attributes::new()))
            .unwrap();
        assert_eq!(stack.borrow().depth(), 2);
        assert_eq!(sink.borrow().events().len(), 3);
        assert!(parser.take_partial().is_some());
    }
}

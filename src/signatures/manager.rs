//! Document Signature Manager.
//!
//! Lifecycle of the signatures of one package: add, remove, read and
//! commit. Writes always go to a temporary stream (ODF) or storage (OOXML)
//! so the package itself only changes on [`DocumentSignatureManager::commit`],
//! with one exception: adding the first OOXML signature registers the
//! signature origin in the root relationships.

use super::certificate::Certificate;
use super::controller::SignatureController;
use super::engine::{
    encode_base64, DefaultComponents, PackageUriBinding, SecurityComponents, SecurityContext,
    UriBinding,
};
use super::export::odf::{end_document_signatures, export_signature, start_document_signatures};
use super::export::ooxml::export_relationship_signature;
use super::stream::{
    signature_part_name, OpenMode, SharedStream, SignatureStorage, SignatureStreamHandle,
    SignatureStreamResolver, ORIGIN_PART, ORIGIN_RELATIONSHIPS_PART,
};
use super::types::{now_seconds, SecurityId, SignatureDialect, SignatureRecord};
use crate::chain::{ChainHead, ElementStackKeeper, SharedSource};
use crate::config::SignatureConfig;
use crate::error::{Error, Result};
use crate::package::content_types::{SIGNATURE_ORIGIN_CONTENT_TYPE, SIGNATURE_XML_CONTENT_TYPE};
use crate::package::manifest::read_manifest;
use crate::package::relationships::{
    read_relationships, relationships_to_xml, RELATIONSHIPS_CONTENT_TYPE, TYPE_SIGNATURE,
    TYPE_SIGNATURE_ORIGIN,
};
use crate::package::{
    encode_uri_path, ContentTypes, ManifestClassifier, ManifestEntry, Package, PackageFormat,
    Relationship, SharedPackage, CONTENT_TYPES_ENTRY, MANIFEST_ENTRY, ROOT_RELATIONSHIPS_ENTRY,
    SIGNATURES_DIR,
};
use crate::xml::{DocumentHandler, SharedHandler, XmlEventWriter};
use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

/// Manages the signatures of one document package.
pub struct DocumentSignatureManager {
    package: SharedPackage,
    config: SignatureConfig,
    classifier: ManifestClassifier,
    resolver: SignatureStreamResolver,
    controller: SignatureController,
    security_context: Option<Rc<dyn SecurityContext>>,
    signatures: Vec<SignatureRecord>,
}

impl DocumentSignatureManager {
    /// Create a manager with the default RSA components.
    pub fn new(package: SharedPackage, config: SignatureConfig) -> Self {
        Self::with_components(package, config, Rc::new(DefaultComponents))
    }

    /// Create a manager with host-supplied security components.
    pub fn with_components(
        package: SharedPackage,
        config: SignatureConfig,
        components: Rc<dyn SecurityComponents>,
    ) -> Self {
        let classifier = ManifestClassifier::default().with_force_xml(config.test_mode);
        let controller = SignatureController::new(components).with_sticky(config.sticky);
        Self {
            package,
            config,
            classifier,
            resolver: SignatureStreamResolver::new(),
            controller,
            security_context: None,
            signatures: Vec::new(),
        }
    }

    /// Set the key material used to sign.
    pub fn set_security_context(&mut self, context: Rc<dyn SecurityContext>) {
        self.security_context = Some(context);
    }

    /// Load the classifier entries from the package manifest, if it has one.
    pub fn load_manifest(&mut self) -> Result<()> {
        let data = {
            let package = self.package.borrow();
            if !package.has_entry(MANIFEST_ENTRY) {
                return Ok(());
            }
            package.read_entry(MANIFEST_ENTRY)?
        };
        let entries = read_manifest(&data)?;
        log::debug!("Loaded {} manifest entries", entries.len());
        self.classifier.set_entries(entries);
        Ok(())
    }

    /// Replace the classifier entries.
    pub fn set_manifest(&mut self, entries: Vec<ManifestEntry>) {
        self.classifier.set_entries(entries);
    }

    /// Use a host-supplied signature stream instead of the package's own.
    pub fn set_signature_stream(&mut self, stream: Option<SharedStream>) {
        self.resolver.set_signature_stream(stream);
    }

    /// Container family of the package.
    pub fn format(&self) -> PackageFormat {
        PackageFormat::detect(&*self.package.borrow())
    }

    /// Whether the entry addressed by `uri` is digested as XML.
    pub fn is_xml(&self, uri: &str) -> bool {
        self.classifier.is_xml(uri)
    }

    /// Resolve the signature stream or storage.
    pub fn open_signature_stream(
        &mut self,
        mode: OpenMode,
        use_temporary: bool,
    ) -> Result<SignatureStreamHandle> {
        let package = self.package.borrow();
        self.resolver.open(&*package, mode, use_temporary)
    }

    /// Current signature list.
    pub fn signatures(&self) -> &[SignatureRecord] {
        &self.signatures
    }

    /// Sign the package and write all signatures to a fresh temporary.
    ///
    /// Nothing is touched when the certificate is missing or unusable.
    pub fn add(
        &mut self,
        certificate: Option<&dyn Certificate>,
        description: &str,
    ) -> Result<SecurityId> {
        let certificate = certificate.ok_or_else(|| {
            log::warn!("Cannot sign without a certificate");
            Error::InvalidCertificate("no certificate selected".to_string())
        })?;
        let serial_number = certificate
            .serial_number()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                Error::InvalidCertificate("serial number cannot be encoded".to_string())
            })?;
        let format = self.format();
        let thumbprint = certificate.sha256_thumbprint().map(|t| encode_base64(&t));
        if thumbprint.is_none() {
            if format == PackageFormat::Relationship && !self.config.test_mode {
                return Err(Error::InvalidCertificate(
                    "certificate has no SHA-256 thumbprint".to_string(),
                ));
            }
            log::warn!("Certificate has no SHA-256 thumbprint");
        }
        let context = self.security_context.clone().ok_or_else(|| {
            Error::PreconditionViolated("no security context to sign with".to_string())
        })?;

        let binding: Rc<dyn UriBinding> = Rc::new(PackageUriBinding::new(Rc::clone(&self.package)));
        self.controller.start_mission(Some(binding), Some(context));
        let result = self.add_in_mission(certificate, &serial_number, thumbprint, description, format);
        if let Ok(id) = result {
            if let Some(record) = self.controller.signature_record(id) {
                self.signatures.push(record.clone());
            }
        }
        self.controller.end_mission();
        result
    }

    fn add_in_mission(
        &mut self,
        certificate: &dyn Certificate,
        serial_number: &str,
        thumbprint: Option<String>,
        description: &str,
        format: PackageFormat,
    ) -> Result<SecurityId> {
        if format == PackageFormat::Relationship {
            self.ensure_signature_origin()?;
        }

        let id = self.controller.new_security_id();
        self.controller.set_x509_certificate(
            id,
            &certificate.issuer_name(),
            serial_number,
            &encode_base64(&certificate.encoded()),
            thumbprint,
        );
        for uri in self.element_list(format) {
            let binary = !self.is_xml(&uri);
            self.controller.add_for_signing(id, &uri, binary);
        }
        self.controller.set_date_time(id, now_seconds());
        self.controller.set_description(id, description);

        let handle = self.open_signature_stream(OpenMode::Truncate, true)?;
        match format {
            PackageFormat::Package => {
                let stream = handle.stream.ok_or_else(|| missing_target(format))?;
                let bytes = write_canonical_signatures(&mut self.controller, &self.signatures, Some(id))?;
                let mut stream = stream.borrow_mut();
                stream.write_all(&bytes)?;
                stream.rewind_to_start();
            },
            PackageFormat::Relationship => {
                let storage = handle.storage.ok_or_else(|| missing_target(format))?;
                let mut storage = storage.borrow_mut();
                let count = self.signatures.len() + 1;
                write_relationship_signatures(&mut storage, &self.package, &self.signatures, count)?;
                let bytes = {
                    let package = self.package.borrow();
                    self.controller.create_and_write_relationship_signature(
                        id,
                        &*package,
                        self.config.test_mode,
                    )?
                };
                storage.write_part(&signature_part_name(count), bytes);
                storage.commit()?;
            },
        }
        log::info!("Added signature {} ({} in total)", id, self.signatures.len() + 1);
        Ok(id)
    }

    /// Remove the signature at `index` and rewrite the rest to a fresh temporary.
    pub fn remove(&mut self, index: usize) -> Result<()> {
        if index >= self.signatures.len() {
            return Err(Error::IndexOutOfRange {
                index,
                len: self.signatures.len(),
            });
        }
        let mut remaining = self.signatures.clone();
        remaining.remove(index);

        let handle = self.open_signature_stream(OpenMode::Truncate, true)?;
        match handle.format {
            PackageFormat::Package => {
                let stream = handle.stream.ok_or_else(|| missing_target(handle.format))?;
                let bytes = write_canonical_signatures(&mut self.controller, &remaining, None)?;
                let mut stream = stream.borrow_mut();
                stream.write_all(&bytes)?;
                stream.rewind_to_start();
            },
            PackageFormat::Relationship => {
                let storage = handle.storage.ok_or_else(|| missing_target(handle.format))?;
                let mut storage = storage.borrow_mut();
                write_relationship_signatures(&mut storage, &self.package, &remaining, remaining.len())?;
                storage.commit()?;
            },
        }
        log::info!("Removed signature at index {}", index);
        self.signatures = remaining;
        Ok(())
    }

    /// Replace the signature list with what the stream holds, verifying
    /// each signature.
    ///
    /// With `use_temporary` the last written temporary is read instead of
    /// the package. With `cache_last` OOXML records keep their part bytes
    /// for verbatim re-export.
    pub fn read(&mut self, use_temporary: bool, cache_last: bool) -> Result<()> {
        self.signatures.clear();
        let binding: Rc<dyn UriBinding> = Rc::new(PackageUriBinding::new(Rc::clone(&self.package)));
        self.controller
            .start_mission(Some(binding), self.security_context.clone());
        let result = self.read_in_mission(use_temporary, cache_last);
        self.finish_read(result)
    }

    /// Keep whatever was collected, even when reading stopped early.
    fn finish_read(&mut self, result: Result<()>) -> Result<()> {
        self.signatures = self.controller.signature_records().to_vec();
        self.controller.end_mission();
        log::debug!("Read {} signatures", self.signatures.len());
        result
    }

    fn read_in_mission(&mut self, use_temporary: bool, cache_last: bool) -> Result<()> {
        let handle = self.open_signature_stream(OpenMode::Read, use_temporary)?;
        match handle.format {
            PackageFormat::Package => {
                if let Some(stream) = handle.stream {
                    let bytes = stream.borrow_mut().read_remaining()?;
                    if !bytes.is_empty() {
                        self.controller
                            .read_and_verify(&bytes, SignatureDialect::Canonical, false)?;
                    }
                }
            },
            PackageFormat::Relationship => {
                if let Some(storage) = handle.storage {
                    let storage = storage.borrow();
                    for part in signature_parts(&storage)? {
                        if !storage.has_part(&part) {
                            log::warn!("Signature part {} is missing", part);
                            continue;
                        }
                        let bytes = storage.read_part(&part)?;
                        self.controller.read_and_verify(
                            &bytes,
                            SignatureDialect::Relationship,
                            cache_last,
                        )?;
                    }
                }
            },
        }
        Ok(())
    }

    /// Copy the last written temporary into the package.
    pub fn commit(&mut self) -> Result<()> {
        match self.format() {
            PackageFormat::Package => {
                let stream = self.resolver.temp_stream().ok_or_else(nothing_to_commit)?;
                let bytes = stream.borrow().contents().to_vec();
                self.package
                    .borrow_mut()
                    .write_entry(crate::package::DOCUMENT_SIGNATURES_ENTRY, bytes)?;
            },
            PackageFormat::Relationship => {
                let storage = self.resolver.temp_storage().ok_or_else(nothing_to_commit)?;
                let storage = storage.borrow();
                let mut package = self.package.borrow_mut();
                let prefix = format!("{}/", SIGNATURES_DIR);
                for name in package.entry_names() {
                    if name.starts_with(&prefix) {
                        package.remove_entry(&name)?;
                    }
                }

                let mut content_types = ContentTypes::parse(&package.read_entry(CONTENT_TYPES_ENTRY)?)?;
                content_types.set_default("sigs", SIGNATURE_ORIGIN_CONTENT_TYPE);
                if content_types.content_type(ROOT_RELATIONSHIPS_ENTRY).is_none() {
                    content_types.set_default("rels", RELATIONSHIPS_CONTENT_TYPE);
                }
                content_types.remove_overrides_with_prefix(&format!("/{}", prefix));
                for part in storage.part_names() {
                    if is_signature_part(&part) {
                        content_types
                            .set_override(&format!("/{}{}", prefix, part), SIGNATURE_XML_CONTENT_TYPE);
                    }
                    package.write_entry(&format!("{}{}", prefix, part), storage.read_part(&part)?)?;
                }
                package.write_entry(CONTENT_TYPES_ENTRY, content_types.to_xml()?)?;
            },
        }
        log::info!("Committed {} signatures to the package", self.signatures.len());
        Ok(())
    }

    /// Reference URIs a new signature covers.
    fn element_list(&self, format: PackageFormat) -> Vec<String> {
        let package = self.package.borrow();
        match format {
            PackageFormat::Package => package
                .entry_names()
                .into_iter()
                .filter(|name| !name.ends_with('/') && name != "mimetype")
                .filter(|name| !name.starts_with("META-INF/") || name == MANIFEST_ENTRY)
                .map(|name| encode_uri_path(&name))
                .collect(),
            PackageFormat::Relationship => {
                let content_types = match package
                    .read_entry(CONTENT_TYPES_ENTRY)
                    .and_then(|data| ContentTypes::parse(&data))
                {
                    Ok(content_types) => content_types,
                    Err(e) => {
                        log::warn!("Cannot read content types: {}", e);
                        ContentTypes::default()
                    },
                };
                let prefix = format!("{}/", SIGNATURES_DIR);
                let mut uris: Vec<String> = package
                    .entry_names()
                    .into_iter()
                    .filter(|name| !name.ends_with('/') && !name.starts_with(&prefix))
                    .filter(|name| name != CONTENT_TYPES_ENTRY)
                    .filter_map(|name| match content_types.content_type(&name) {
                        Some(content_type) => Some(format!(
                            "/{}?ContentType={}",
                            encode_uri_path(&name),
                            content_type
                        )),
                        None => {
                            log::debug!("Skipping {}: no content type", name);
                            None
                        },
                    })
                    .collect();
                uris.push(format!("/{}", encode_uri_path(CONTENT_TYPES_ENTRY)));
                uris
            },
        }
    }

    /// Register `_xmlsignatures/origin.sigs` in the root relationships.
    fn ensure_signature_origin(&self) -> Result<()> {
        let mut package = self.package.borrow_mut();
        let mut relationships = if package.has_entry(ROOT_RELATIONSHIPS_ENTRY) {
            read_relationships(&package.read_entry(ROOT_RELATIONSHIPS_ENTRY)?)?
        } else {
            Vec::new()
        };
        if relationships
            .iter()
            .any(|r| r.rel_type == TYPE_SIGNATURE_ORIGIN)
        {
            return Ok(());
        }
        let id = next_relationship_id(&relationships);
        relationships.push(Relationship::new(
            id,
            TYPE_SIGNATURE_ORIGIN,
            format!("{}/{}", SIGNATURES_DIR, ORIGIN_PART),
        ));
        package.write_entry(ROOT_RELATIONSHIPS_ENTRY, relationships_to_xml(&relationships)?)
    }
}

fn missing_target(format: PackageFormat) -> Error {
    Error::FormatMismatch {
        expected: format.as_str().to_string(),
        found: "no signature target".to_string(),
    }
}

fn nothing_to_commit() -> Error {
    Error::PreconditionViolated("no signatures were written to commit".to_string())
}

/// Serialize the `document-signatures` stream: `records`, then optionally
/// a new signature created through the chain.
fn write_canonical_signatures(
    controller: &mut SignatureController,
    records: &[SignatureRecord],
    new_signature: Option<SecurityId>,
) -> Result<Vec<u8>> {
    let writer = Rc::new(RefCell::new(XmlEventWriter::new(Vec::new())));
    let stack = Rc::new(RefCell::new(ElementStackKeeper::new()));
    let downstream: SharedHandler = writer.clone();
    let head = Rc::new(RefCell::new(
        ChainHead::new(Some(Rc::clone(&downstream))).with_element_stack(Rc::clone(&stack)),
    ));

    {
        let mut head = head.borrow_mut();
        start_document_signatures(&mut *head)?;
        for record in records {
            export_signature(&mut *head, record)?;
        }
    }

    if let Some(id) = new_signature {
        let upstream: SharedSource = head.clone();
        controller.set_chain_connector(upstream, Some(downstream), Some(stack))?;
        let created = controller.create_and_write_signature(id);
        controller.clear_chain_connector();
        created?;
    }

    end_document_signatures(&mut *head.borrow_mut())?;
    let bytes = writer.borrow_mut().take_bytes();
    Ok(bytes)
}

/// Write the origin parts for `count` signatures and re-export `records`
/// as `sig1.xml` onward.
fn write_relationship_signatures(
    storage: &mut SignatureStorage,
    package: &SharedPackage,
    records: &[SignatureRecord],
    count: usize,
) -> Result<()> {
    storage.write_part(ORIGIN_PART, Vec::new());
    let relationships: Vec<Relationship> = (1..=count)
        .map(|i| Relationship::new(format!("rId{}", i), TYPE_SIGNATURE, signature_part_name(i)))
        .collect();
    storage.write_part(ORIGIN_RELATIONSHIPS_PART, relationships_to_xml(&relationships)?);

    let package = package.borrow();
    for (i, record) in records.iter().enumerate() {
        let bytes = relationship_part(record, &*package)?;
        storage.write_part(&signature_part_name(i + 1), bytes);
    }
    Ok(())
}

fn relationship_part(record: &SignatureRecord, package: &dyn Package) -> Result<Vec<u8>> {
    if let Some(raw) = &record.raw_bytes {
        return Ok(raw.clone());
    }
    let mut writer = XmlEventWriter::new(Vec::new());
    writer.start_document()?;
    export_relationship_signature(&mut writer, record, package)?;
    writer.end_document()?;
    Ok(writer.take_bytes())
}

/// Signature parts named by the origin relationships, in order.
fn signature_parts(storage: &SignatureStorage) -> Result<Vec<String>> {
    if !storage.has_part(ORIGIN_RELATIONSHIPS_PART) {
        return Ok(Vec::new());
    }
    let relationships = read_relationships(&storage.read_part(ORIGIN_RELATIONSHIPS_PART)?)?;
    let prefix = format!("{}/", SIGNATURES_DIR);
    Ok(relationships
        .into_iter()
        .filter(|r| r.rel_type == TYPE_SIGNATURE)
        .map(|r| {
            let target = r.target.trim_start_matches('/');
            target.strip_prefix(&prefix).unwrap_or(target).to_string()
        })
        .collect())
}

fn is_signature_part(name: &str) -> bool {
    name.starts_with("sig") && name.ends_with(".xml") && !name.contains('/')
}

fn next_relationship_id(relationships: &[Relationship]) -> String {
    let mut n = relationships.len() + 1;
    loop {
        let id = format!("rId{}", n);
        if relationships.iter().all(|r| r.id != id) {
            return id;
        }
        n += 1;
    }
}

//! Signature streams and storages.
//!
//! ODF packages keep all signatures in one XML stream; OOXML packages keep a
//! small storage of parts (origin, its relationships, one part per
//! signature). Edits go to a temporary stream or storage first and reach the
//! package only on commit.

use crate::error::{Error, Result};
use crate::package::{Package, PackageFormat, DOCUMENT_SIGNATURES_ENTRY, SIGNATURES_DIR};
use indexmap::IndexMap;
use std::cell::RefCell;
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::rc::Rc;

/// Growable in-memory byte stream.
#[derive(Debug, Default, Clone)]
pub struct MemoryStream {
    inner: Cursor<Vec<u8>>,
}

impl MemoryStream {
    /// Create an empty stream.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a stream positioned at the start of `data`.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self {
            inner: Cursor::new(data),
        }
    }

    /// Drop all content.
    pub fn truncate(&mut self) {
        self.inner.get_mut().clear();
        self.inner.set_position(0);
    }

    /// Move to the start.
    pub fn rewind_to_start(&mut self) {
        self.inner.set_position(0);
    }

    /// Current position.
    pub fn position(&self) -> u64 {
        self.inner.position()
    }

    /// Entire content, independent of the position.
    pub fn contents(&self) -> &[u8] {
        self.inner.get_ref()
    }

    /// Whether the stream holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.inner.get_ref().is_empty()
    }

    /// Read from the current position to the end.
    pub fn read_remaining(&mut self) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        self.inner.read_to_end(&mut data)?;
        Ok(data)
    }
}

impl Read for MemoryStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Write for MemoryStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Seek for MemoryStream {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.inner.seek(pos)
    }
}

/// Stream shared between the manager and its callers.
pub type SharedStream = Rc<RefCell<MemoryStream>>;

/// Name of the origin part inside a signature storage.
pub const ORIGIN_PART: &str = "origin.sigs";

/// Name of the origin relationships part inside a signature storage.
pub const ORIGIN_RELATIONSHIPS_PART: &str = "_rels/origin.sigs.rels";

/// Name of the n-th (1-based) signature part.
pub fn signature_part_name(index: usize) -> String {
    format!("sig{}.xml", index)
}

/// A set of named parts, optionally persisted as a zip in a stream.
#[derive(Debug, Default)]
pub struct SignatureStorage {
    parts: IndexMap<String, Vec<u8>>,
    backing: Option<SharedStream>,
}

impl SignatureStorage {
    /// Empty storage that commits into `stream`.
    pub fn create(stream: SharedStream) -> Self {
        Self {
            parts: IndexMap::new(),
            backing: Some(stream),
        }
    }

    /// Storage loaded from `stream`; an empty stream gives an empty storage.
    pub fn open(stream: SharedStream) -> Result<Self> {
        let mut parts = IndexMap::new();
        {
            let data = stream.borrow();
            if !data.is_empty() {
                let mut archive = zip::ZipArchive::new(Cursor::new(data.contents()))?;
                for i in 0..archive.len() {
                    let mut file = archive.by_index(i)?;
                    if file.is_dir() {
                        continue;
                    }
                    let name = file.name().to_string();
                    let mut bytes = Vec::new();
                    file.read_to_end(&mut bytes)?;
                    parts.insert(name, bytes);
                }
            }
        }
        Ok(Self {
            parts,
            backing: Some(stream),
        })
    }

    /// Read-only view of the signature directory of a package.
    pub fn from_package(package: &dyn Package) -> Result<Self> {
        let prefix = format!("{}/", SIGNATURES_DIR);
        let mut parts = IndexMap::new();
        for name in package.entry_names() {
            if let Some(part) = name.strip_prefix(&prefix) {
                parts.insert(part.to_string(), package.read_entry(&name)?);
            }
        }
        Ok(Self {
            parts,
            backing: None,
        })
    }

    /// Part names in insertion order.
    pub fn part_names(&self) -> Vec<String> {
        self.parts.keys().cloned().collect()
    }

    /// Whether a part exists.
    pub fn has_part(&self, name: &str) -> bool {
        self.parts.contains_key(name)
    }

    /// Bytes of a part.
    pub fn read_part(&self, name: &str) -> Result<Vec<u8>> {
        self.parts
            .get(name)
            .cloned()
            .ok_or_else(|| Error::EntryNotFound(format!("{}/{}", SIGNATURES_DIR, name)))
    }

    /// Create or replace a part.
    pub fn write_part(&mut self, name: &str, data: Vec<u8>) {
        self.parts.insert(name.to_string(), data);
    }

    /// Drop every part.
    pub fn clear(&mut self) {
        self.parts.clear();
    }

    /// Persist the parts into the backing stream.
    pub fn commit(&mut self) -> Result<()> {
        let stream = self.backing.as_ref().ok_or_else(|| {
            Error::PreconditionViolated("package signature storage is read-only".to_string())
        })?;
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);
        for (name, data) in &self.parts {
            writer.start_file(name.as_str(), options)?;
            writer.write_all(data)?;
        }
        let bytes = writer.finish()?.into_inner();

        let mut stream = stream.borrow_mut();
        stream.truncate();
        stream.write_all(&bytes)?;
        stream.rewind_to_start();
        Ok(())
    }
}

/// Shared signature storage.
pub type SharedStorage = Rc<RefCell<SignatureStorage>>;

/// How a signature stream is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Read existing signatures
    Read,
    /// Rewrite all signatures
    Truncate,
}

/// Result of resolving the signature stream of a package.
#[derive(Debug, Clone)]
pub struct SignatureStreamHandle {
    /// Which container family the handle serves
    pub format: PackageFormat,
    /// Plain signature stream (ODF)
    pub stream: Option<SharedStream>,
    /// Signature storage (OOXML)
    pub storage: Option<SharedStorage>,
    /// Opened directly from the package rather than a temporary
    pub read_only: bool,
}

impl SignatureStreamHandle {
    fn empty(format: PackageFormat) -> Self {
        Self {
            format,
            stream: None,
            storage: None,
            read_only: true,
        }
    }
}

/// Resolves where signatures are read from and written to.
#[derive(Debug, Default)]
pub struct SignatureStreamResolver {
    signature_stream: Option<SharedStream>,
    temp_stream: Option<SharedStream>,
    temp_storage: Option<SharedStorage>,
}

impl SignatureStreamResolver {
    /// Create a resolver with no temporaries.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a host-supplied signature stream instead of the package's own.
    pub fn set_signature_stream(&mut self, stream: Option<SharedStream>) {
        self.signature_stream = stream;
    }

    /// Temporary stream, once one was created.
    pub fn temp_stream(&self) -> Option<SharedStream> {
        self.temp_stream.clone()
    }

    /// Temporary storage, once one was created.
    pub fn temp_storage(&self) -> Option<SharedStorage> {
        self.temp_storage.clone()
    }

    /// Resolve the signature stream or storage for `mode`.
    pub fn open(
        &mut self,
        package: &dyn Package,
        mode: OpenMode,
        use_temporary: bool,
    ) -> Result<SignatureStreamHandle> {
        let format = PackageFormat::detect(package);
        let mut handle = SignatureStreamHandle::empty(format);
        let mut from_package = false;

        if use_temporary {
            match (mode, format) {
                (OpenMode::Truncate, PackageFormat::Package) => {
                    let stream = Rc::new(RefCell::new(MemoryStream::new()));
                    self.temp_stream = Some(Rc::clone(&stream));
                    handle.stream = Some(stream);
                },
                (OpenMode::Truncate, PackageFormat::Relationship) => {
                    let stream = Rc::new(RefCell::new(MemoryStream::new()));
                    let storage = Rc::new(RefCell::new(SignatureStorage::create(stream)));
                    self.temp_storage = Some(Rc::clone(&storage));
                    handle.storage = Some(storage);
                },
                (OpenMode::Read, PackageFormat::Package) => {
                    let stream = self.temp_stream.clone().ok_or_else(|| {
                        Error::PreconditionViolated("no temporary signature stream".to_string())
                    })?;
                    handle.stream = Some(stream);
                },
                (OpenMode::Read, PackageFormat::Relationship) => {
                    let storage = self.temp_storage.clone().ok_or_else(|| {
                        Error::PreconditionViolated("no temporary signature storage".to_string())
                    })?;
                    handle.storage = Some(storage);
                },
            }
            handle.read_only = false;
        } else if let Some(stream) = &self.signature_stream {
            match format {
                PackageFormat::Package => handle.stream = Some(Rc::clone(stream)),
                PackageFormat::Relationship => {
                    let storage = match mode {
                        OpenMode::Truncate => SignatureStorage::create(Rc::clone(stream)),
                        OpenMode::Read => SignatureStorage::open(Rc::clone(stream))?,
                    };
                    handle.storage = Some(Rc::new(RefCell::new(storage)));
                },
            }
            handle.read_only = false;
        } else {
            if mode == OpenMode::Truncate {
                return Err(Error::PreconditionViolated(
                    "signatures opened directly from the package are read-only".to_string(),
                ));
            }
            from_package = true;
            match format {
                PackageFormat::Package => {
                    if package.has_entry(DOCUMENT_SIGNATURES_ENTRY) {
                        let data = package.read_entry(DOCUMENT_SIGNATURES_ENTRY)?;
                        handle.stream = Some(Rc::new(RefCell::new(MemoryStream::from_bytes(data))));
                    }
                },
                PackageFormat::Relationship => {
                    let storage = SignatureStorage::from_package(package)?;
                    handle.storage = Some(Rc::new(RefCell::new(storage)));
                },
            }
        }

        if mode == OpenMode::Truncate {
            if let (Some(stream), PackageFormat::Package) = (&handle.stream, format) {
                stream.borrow_mut().truncate();
            }
        } else if !from_package {
            if let Some(stream) = &handle.stream {
                stream.borrow_mut().rewind_to_start();
            }
        }

        log::debug!(
            "Resolved {} signature stream (mode {:?}, temporary {})",
            format.as_str(),
            mode,
            use_temporary
        );
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::{MemoryPackage, CONTENT_TYPES_ENTRY};

    fn odf() -> MemoryPackage {
        MemoryPackage::new().with_entry("content.xml", "<a/>")
    }

    fn ooxml() -> MemoryPackage {
        MemoryPackage::new()
            .with_entry(CONTENT_TYPES_ENTRY, "<Types/>")
            .with_entry("_xmlsignatures/origin.sigs", Vec::new())
            .with_entry("_xmlsignatures/sig1.xml", "<Signature/>")
    }

    #[test]
    fn test_memory_stream() {
        let mut stream = MemoryStream::new();
        stream.write_all(b"hello").unwrap();
        assert_eq!(stream.position(), 5);
        stream.rewind_to_start();
        assert_eq!(stream.read_remaining().unwrap(), b"hello");
        stream.truncate();
        assert!(stream.is_empty());
    }

    #[test]
    fn test_storage_commit_and_reopen() {
        let stream = Rc::new(RefCell::new(MemoryStream::new()));
        let mut storage = SignatureStorage::create(Rc::clone(&stream));
        storage.write_part(ORIGIN_PART, Vec::new());
        storage.write_part(&signature_part_name(1), b"<Signature/>".to_vec());
        storage.commit().unwrap();
        assert!(!stream.borrow().is_empty());

        let reopened = SignatureStorage::open(stream).unwrap();
        assert_eq!(reopened.part_names(), vec!["origin.sigs", "sig1.xml"]);
        assert_eq!(reopened.read_part("sig1.xml").unwrap(), b"<Signature/>");
    }

    #[test]
    fn test_package_storage_is_read_only() {
        let mut storage = SignatureStorage::from_package(&ooxml()).unwrap();
        assert!(storage.has_part("sig1.xml"));
        assert!(matches!(
            storage.commit(),
            Err(Error::PreconditionViolated(_))
        ));
    }

    #[test]
    fn test_truncate_creates_temporary() {
        let mut resolver = SignatureStreamResolver::new();
        let handle = resolver.open(&odf(), OpenMode::Truncate, true).unwrap();
        assert_eq!(handle.format, PackageFormat::Package);
        assert!(handle.stream.is_some());
        assert!(!handle.read_only);
        assert!(resolver.temp_stream().is_some());

        let handle = resolver.open(&ooxml(), OpenMode::Truncate, true).unwrap();
        assert_eq!(handle.format, PackageFormat::Relationship);
        assert!(handle.storage.is_some());
        assert!(resolver.temp_storage().is_some());
    }

    #[test]
    fn test_read_temporary_requires_one() {
        let mut resolver = SignatureStreamResolver::new();
        assert!(matches!(
            resolver.open(&odf(), OpenMode::Read, true),
            Err(Error::PreconditionViolated(_))
        ));
    }

    #[test]
    fn test_read_temporary_rewinds() {
        let mut resolver = SignatureStreamResolver::new();
        let handle = resolver.open(&odf(), OpenMode::Truncate, true).unwrap();
        handle
            .stream
            .as_ref()
            .unwrap()
            .borrow_mut()
            .write_all(b"<x/>")
            .unwrap();
        let handle = resolver.open(&odf(), OpenMode::Read, true).unwrap();
        let stream = handle.stream.unwrap();
        assert_eq!(stream.borrow().position(), 0);
        assert_eq!(stream.borrow_mut().read_remaining().unwrap(), b"<x/>");
    }

    #[test]
    fn test_read_from_package() {
        let mut resolver = SignatureStreamResolver::new();
        let handle = resolver.open(&odf(), OpenMode::Read, false).unwrap();
        assert!(handle.stream.is_none());
        assert!(handle.read_only);

        let package = odf().with_entry(DOCUMENT_SIGNATURES_ENTRY, "<document-signatures/>");
        let handle = resolver.open(&package, OpenMode::Read, false).unwrap();
        assert!(handle.stream.is_some());

        let handle = resolver.open(&ooxml(), OpenMode::Read, false).unwrap();
        assert!(handle.storage.unwrap().borrow().has_part("sig1.xml"));

        assert!(matches!(
            resolver.open(&odf(), OpenMode::Truncate, false),
            Err(Error::PreconditionViolated(_))
        ));
    }

    #[test]
    fn test_dedicated_stream_preferred() {
        let mut resolver = SignatureStreamResolver::new();
        let dedicated = Rc::new(RefCell::new(MemoryStream::from_bytes(b"abc".to_vec())));
        dedicated.borrow_mut().read_remaining().unwrap();
        resolver.set_signature_stream(Some(Rc::clone(&dedicated)));
        let package = odf().with_entry(DOCUMENT_SIGNATURES_ENTRY, "<other/>");
        let handle = resolver.open(&package, OpenMode::Read, false).unwrap();
        let stream = handle.stream.unwrap();
        assert!(Rc::ptr_eq(&stream, &dedicated));
        assert_eq!(stream.borrow().position(), 0);
    }
}

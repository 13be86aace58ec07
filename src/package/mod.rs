//! Document packages (zip containers) and their metadata parts.
//!
//! A [`Package`] is a flat set of named entries. Both supported container
//! families live here:
//!
//! - ODF packages, described by `META-INF/manifest.xml` ([`manifest`])
//! - OOXML packages, described by `[Content_Types].xml` ([`content_types`])
//!   and relationship parts ([`relationships`])

pub mod content_types;
pub mod manifest;
pub mod relationships;

pub use content_types::ContentTypes;
pub use manifest::{ManifestClassifier, ManifestEntry};
pub use relationships::Relationship;

use crate::error::{Error, Result};
use indexmap::IndexMap;
use std::cell::RefCell;
use std::io::{Cursor, Read, Write};
use std::path::Path;
use std::rc::Rc;

/// Entry whose presence marks an OOXML package.
pub const CONTENT_TYPES_ENTRY: &str = "[Content_Types].xml";

/// ODF manifest entry.
pub const MANIFEST_ENTRY: &str = "META-INF/manifest.xml";

/// ODF signature stream entry.
pub const DOCUMENT_SIGNATURES_ENTRY: &str = "META-INF/documentsignatures.xml";

/// Root relationships part.
pub const ROOT_RELATIONSHIPS_ENTRY: &str = "_rels/.rels";

/// Directory holding OOXML signature parts.
pub const SIGNATURES_DIR: &str = "_xmlsignatures";

/// Container family of a package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum PackageFormat {
    /// ODF: one signature stream in `META-INF/`
    Package,
    /// OOXML: signature parts addressed through relationships
    Relationship,
}

impl PackageFormat {
    /// Detect the container family from the entry list.
    pub fn detect(package: &dyn Package) -> Self {
        if package.has_entry(CONTENT_TYPES_ENTRY) {
            PackageFormat::Relationship
        } else {
            PackageFormat::Package
        }
    }

    /// Human-readable name.
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageFormat::Package => "package",
            PackageFormat::Relationship => "relationship",
        }
    }
}

/// Random-access view of a document package.
pub trait Package {
    /// Entry names in container order.
    fn entry_names(&self) -> Vec<String>;

    /// Whether an entry exists.
    fn has_entry(&self, name: &str) -> bool {
        self.entry_names().iter().any(|n| n == name)
    }

    /// Read an entry's bytes.
    fn read_entry(&self, name: &str) -> Result<Vec<u8>>;

    /// Create or replace an entry.
    fn write_entry(&mut self, name: &str, data: Vec<u8>) -> Result<()>;

    /// Delete an entry. Removing a missing entry is not an error.
    fn remove_entry(&mut self, name: &str) -> Result<()>;
}

/// Package shared between the manager and URI bindings.
pub type SharedPackage = Rc<RefCell<dyn Package>>;

/// In-memory package, loaded from and saved to zip bytes.
#[derive(Debug, Clone, Default)]
pub struct MemoryPackage {
    entries: IndexMap<String, Vec<u8>>,
}

impl MemoryPackage {
    /// Create an empty package.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry (builder style).
    pub fn with_entry(mut self, name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        self.entries.insert(name.into(), data.into());
        self
    }

    /// Load a zip container from bytes.
    pub fn from_zip(bytes: &[u8]) -> Result<Self> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
        let mut entries = IndexMap::new();
        for i in 0..archive.len() {
            let mut file = archive.by_index(i)?;
            if file.is_dir() {
                continue;
            }
            let name = file.name().to_string();
            let mut data = Vec::new();
            file.read_to_end(&mut data)?;
            entries.insert(name, data);
        }
        log::debug!("Loaded package with {} entries", entries.len());
        Ok(Self { entries })
    }

    /// Load a zip container from a file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path.as_ref())?;
        Self::from_zip(&bytes)
    }

    /// Serialize the package as a zip container.
    ///
    /// An ODF `mimetype` entry is stored uncompressed.
    pub fn to_zip(&self) -> Result<Vec<u8>> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let deflated = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);
        let stored = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        for (name, data) in &self.entries {
            let options = if name == "mimetype" { stored } else { deflated };
            writer.start_file(name.as_str(), options)?;
            writer.write_all(data)?;
        }
        Ok(writer.finish()?.into_inner())
    }

    /// Write the package to a file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path.as_ref(), self.to_zip()?)?;
        Ok(())
    }
}

impl Package for MemoryPackage {
    fn entry_names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    fn has_entry(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    fn read_entry(&self, name: &str) -> Result<Vec<u8>> {
        self.entries
            .get(name)
            .cloned()
            .ok_or_else(|| Error::EntryNotFound(name.to_string()))
    }

    fn write_entry(&mut self, name: &str, data: Vec<u8>) -> Result<()> {
        self.entries.insert(name.to_string(), data);
        Ok(())
    }

    fn remove_entry(&mut self, name: &str) -> Result<()> {
        self.entries.shift_remove(name);
        Ok(())
    }
}

/// Decode `%XX` escapes. Malformed escapes are kept literally.
pub fn decode_uri(uri: &str) -> String {
    let bytes = uri.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && i + 2 < bytes.len()
            && bytes[i + 1].is_ascii_hexdigit()
            && bytes[i + 2].is_ascii_hexdigit()
        {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap_or("");
            if let Ok(value) = u8::from_str_radix(hex, 16) {
                out.push(value);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Percent-encode a package path for use as a reference URI.
///
/// Unreserved characters, `/` and a few sub-delimiters pass through.
pub fn encode_uri_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for byte in path.bytes() {
        match byte {
            b'A'..=b'Z'
            | b'a'..=b'z'
            | b'0'..=b'9'
            | b'-'
            | b'.'
            | b'_'
            | b'~'
            | b'/'
            | b'!'
            | b'$'
            | b'&'
            | b'\''
            | b'('
            | b')'
            | b'*'
            | b'+'
            | b','
            | b';'
            | b'='
            | b':'
            | b'@' => out.push(byte as char),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

/// Package entry name addressed by a reference URI.
///
/// Strips a leading `/` and any `?query`, then percent-decodes:
/// `/word/document.xml?ContentType=...` becomes `word/document.xml`.
pub fn uri_to_entry_name(uri: &str) -> String {
    let path = uri.split('?').next().unwrap_or(uri);
    decode_uri(path.trim_start_matches('/'))
}

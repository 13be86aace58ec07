//! ODF manifest and XML/binary classification of package entries.

use crate::error::Result;
use crate::xml::{local_name, read_events, SaxEvent};

/// Media type that marks an entry as XML.
const XML_MEDIA_TYPE: &str = "text/xml";

/// One `manifest:file-entry`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ManifestEntry {
    /// Entry path inside the package (not URI-encoded)
    pub full_path: String,
    /// Declared media type
    pub media_type: String,
    /// Entry carries `manifest:encryption-data`
    pub encrypted: bool,
}

impl ManifestEntry {
    /// Create an unencrypted entry.
    pub fn new(full_path: impl Into<String>, media_type: impl Into<String>) -> Self {
        Self {
            full_path: full_path.into(),
            media_type: media_type.into(),
            encrypted: false,
        }
    }
}

/// Parse `META-INF/manifest.xml`.
pub fn read_manifest(xml: &[u8]) -> Result<Vec<ManifestEntry>> {
    let mut entries: Vec<ManifestEntry> = Vec::new();
    read_events(xml, |event| {
        if let SaxEvent::StartElement { name, attributes } = &event {
            match local_name(name) {
                "file-entry" => entries.push(ManifestEntry {
                    full_path: attributes.get_local("full-path").unwrap_or_default().to_string(),
                    media_type: attributes.get_local("media-type").unwrap_or_default().to_string(),
                    encrypted: false,
                }),
                "encryption-data" => {
                    if let Some(last) = entries.last_mut() {
                        last.encrypted = true;
                    }
                },
                _ => {},
            }
        }
        Ok(())
    })?;
    Ok(entries)
}

/// Decides whether a reference URI names an XML entry.
///
/// XML entries are digested after canonicalization, everything else as raw
/// bytes. Lookup order: test mode, manifest media type, file extension.
/// Encrypted entries are never XML: their stored bytes are ciphertext.
#[derive(Debug, Clone, Default)]
pub struct ManifestClassifier {
    entries: Vec<ManifestEntry>,
    force_xml: bool,
}

impl ManifestClassifier {
    /// Classifier over the given manifest entries.
    pub fn new(entries: Vec<ManifestEntry>) -> Self {
        Self {
            entries,
            force_xml: false,
        }
    }

    /// Classifier built from manifest bytes.
    pub fn from_manifest_xml(xml: &[u8]) -> Result<Self> {
        Ok(Self::new(read_manifest(xml)?))
    }

    /// Classify every entry as XML.
    pub fn with_force_xml(mut self, force: bool) -> Self {
        self.force_xml = force;
        self
    }

    /// Replace the manifest entries.
    pub fn set_entries(&mut self, entries: Vec<ManifestEntry>) {
        self.entries = entries;
    }

    /// Known manifest entries.
    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    /// Whether the entry behind `uri` is XML.
    pub fn is_xml(&self, uri: &str) -> bool {
        if self.force_xml {
            return true;
        }

        let mut found_entry = false;
        let mut is_xml = false;
        for entry in &self.entries {
            if uri_matches_path(uri, &entry.full_path) {
                found_entry = true;
                is_xml = entry.media_type == XML_MEDIA_TYPE && !entry.encrypted;
                break;
            }
        }

        if !found_entry {
            // The extension is taken after the last '.' of the whole URI
            is_xml = uri
                .rsplit_once('.')
                .map(|(_, ext)| ext.eq_ignore_ascii_case("xml"))
                .unwrap_or(false);
        }
        is_xml
    }
}

/// Whether a reference URI and a manifest path name the same entry.
///
/// A leading `/` and any `?query` of the URI are ignored.
pub fn uri_matches_path(uri: &str, full_path: &str) -> bool {
    super::uri_to_entry_name(uri) == full_path
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<manifest:manifest xmlns:manifest="urn:oasis:names:tc:opendocument:xmlns:manifest:1.0">
 <manifest:file-entry manifest:full-path="/" manifest:media-type="application/vnd.oasis.opendocument.text"/>
 <manifest:file-entry manifest:full-path="content.xml" manifest:media-type="text/xml"/>
 <manifest:file-entry manifest:full-path="settings.xml" manifest:media-type="text/xml">
  <manifest:encryption-data manifest:checksum-type="SHA1/1K"/>
 </manifest:file-entry>
 <manifest:file-entry manifest:full-path="Pictures/a b.png" manifest:media-type="image/png"/>
 <manifest:file-entry manifest:full-path="data.xml" manifest:media-type="application/binary"/>
</manifest:manifest>"#;

    #[test]
    fn test_read_manifest() {
        let entries = read_manifest(MANIFEST.as_bytes()).unwrap();
        assert_eq!(entries.len(), 5);
        assert_eq!(entries[1], ManifestEntry::new("content.xml", "text/xml"));
        assert!(entries[2].encrypted);
        assert!(!entries[3].encrypted);
    }

    #[test]
    fn test_manifest_media_type_wins() {
        let classifier = ManifestClassifier::from_manifest_xml(MANIFEST.as_bytes()).unwrap();
        assert!(classifier.is_xml("content.xml"));
        assert!(classifier.is_xml("/content.xml"));
        assert!(!classifier.is_xml("settings.xml"));
        assert!(!classifier.is_xml("Pictures/a%20b.png"));
        // Declared binary despite the extension
        assert!(!classifier.is_xml("data.xml"));
    }

    #[test]
    fn test_extension_fallback() {
        let classifier = ManifestClassifier::default();
        assert!(classifier.is_xml("styles.xml"));
        assert!(classifier.is_xml("meta.XML"));
        assert!(!classifier.is_xml("Thumbnails/thumbnail.png"));
        assert!(!classifier.is_xml("mimetype"));
        // Last dot of the whole URI, including directories
        assert!(!classifier.is_xml("dir.xml/file"));
    }

    #[test]
    fn test_force_xml() {
        let classifier = ManifestClassifier::default().with_force_xml(true);
        assert!(classifier.is_xml("Pictures/a.png"));
    }
}

//! OOXML `[Content_Types].xml` handling.

use crate::error::Result;
use crate::xml::{local_name, read_events, Attributes, DocumentHandler, SaxEvent, XmlEventWriter};
use indexmap::IndexMap;

/// Content types namespace.
pub const NS_CONTENT_TYPES: &str = "http://schemas.openxmlformats.org/package/2006/content-types";

/// Content type of a signature origin part.
pub const SIGNATURE_ORIGIN_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-package.digital-signature-origin";

/// Content type of an XML signature part.
pub const SIGNATURE_XML_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-package.digital-signature-xmlsignature+xml";

/// Parsed `[Content_Types].xml`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentTypes {
    /// Lower-cased extension to content type
    defaults: IndexMap<String, String>,
    /// Normalized part name to (part name as written, content type)
    overrides: IndexMap<String, (String, String)>,
}

impl ContentTypes {
    /// Parse the content types part.
    pub fn parse(xml: &[u8]) -> Result<Self> {
        let mut types = Self::default();
        read_events(xml, |event| {
            if let SaxEvent::StartElement { name, attributes } = &event {
                match local_name(name) {
                    "Default" => {
                        if let (Some(ext), Some(ct)) =
                            (attributes.get("Extension"), attributes.get("ContentType"))
                        {
                            types.set_default(ext, ct);
                        }
                    },
                    "Override" => {
                        if let (Some(part), Some(ct)) =
                            (attributes.get("PartName"), attributes.get("ContentType"))
                        {
                            types.set_override(part, ct);
                        }
                    },
                    _ => {},
                }
            }
            Ok(())
        })?;
        Ok(types)
    }

    /// Register a default content type for an extension.
    pub fn set_default(&mut self, extension: &str, content_type: &str) {
        self.defaults
            .insert(extension.to_ascii_lowercase(), content_type.to_string());
    }

    /// Register an override for a part name.
    pub fn set_override(&mut self, part_name: &str, content_type: &str) {
        self.overrides.insert(
            normalize_part_name(part_name),
            (part_name.to_string(), content_type.to_string()),
        );
    }

    /// Drop overrides whose part name starts with the given prefix.
    pub fn remove_overrides_with_prefix(&mut self, prefix: &str) {
        let prefix = normalize_part_name(prefix);
        self.overrides.retain(|part, _| !part.starts_with(&prefix));
    }

    /// Content type of a package entry, overrides first.
    pub fn content_type(&self, entry_name: &str) -> Option<&str> {
        let part = normalize_part_name(entry_name);
        if let Some((_, ct)) = self.overrides.get(&part) {
            return Some(ct.as_str());
        }
        let extension = part.rsplit_once('.').map(|(_, ext)| ext)?;
        self.defaults.get(extension).map(String::as_str)
    }

    /// Serialize back to XML.
    pub fn to_xml(&self) -> Result<Vec<u8>> {
        let mut writer = XmlEventWriter::new(Vec::new());
        writer.start_document()?;
        writer.start_element("Types", Attributes::new().with("xmlns", NS_CONTENT_TYPES))?;
        for (extension, content_type) in &self.defaults {
            writer.start_element(
                "Default",
                Attributes::new()
                    .with("Extension", extension.as_str())
                    .with("ContentType", content_type.as_str()),
            )?;
            writer.end_element("Default")?;
        }
        for (part, content_type) in self.overrides.values() {
            writer.start_element(
                "Override",
                Attributes::new()
                    .with("PartName", part.as_str())
                    .with("ContentType", content_type.as_str()),
            )?;
            writer.end_element("Override")?;
        }
        writer.end_element("Types")?;
        writer.end_document()?;
        Ok(writer.into_inner())
    }
}

/// Part names compare case-insensitively and always start with `/`.
fn normalize_part_name(name: &str) -> String {
    format!("/{}", name.trim_start_matches('/')).to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">
  <Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>
  <Default Extension="XML" ContentType="application/xml"/>
  <Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/>
</Types>"#;

    #[test]
    fn test_lookup() {
        let types = ContentTypes::parse(SAMPLE.as_bytes()).unwrap();
        assert_eq!(
            types.content_type("word/document.xml"),
            Some("application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml")
        );
        assert_eq!(types.content_type("/word/styles.xml"), Some("application/xml"));
        assert_eq!(
            types.content_type("_rels/.rels"),
            Some("application/vnd.openxmlformats-package.relationships+xml")
        );
        assert_eq!(types.content_type("media/image.png"), None);
    }

    #[test]
    fn test_serialize_round_trip() {
        let mut types = ContentTypes::parse(SAMPLE.as_bytes()).unwrap();
        types.set_default("sigs", SIGNATURE_ORIGIN_CONTENT_TYPE);
        types.set_override("/_xmlsignatures/sig1.xml", SIGNATURE_XML_CONTENT_TYPE);

        let reparsed = ContentTypes::parse(&types.to_xml().unwrap()).unwrap();
        assert_eq!(reparsed, types);
        assert_eq!(
            reparsed.content_type("_xmlsignatures/origin.sigs"),
            Some(SIGNATURE_ORIGIN_CONTENT_TYPE)
        );

        let mut trimmed = reparsed;
        trimmed.remove_overrides_with_prefix("/_xmlsignatures/");
        assert_eq!(trimmed.content_type("_xmlsignatures/sig1.xml"), Some("application/xml"));
    }
}

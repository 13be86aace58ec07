//! OPC relationship parts (`*.rels`).
//!
//! Besides reading and writing relationship lists this module implements the
//! OPC relationship transform used when digesting a `.rels` part: signature
//! bookkeeping relationships are dropped and the rest are written in a
//! canonical order, so adding a signature does not invalidate earlier ones.

use crate::error::Result;
use crate::xml::{
    canonicalize, local_name, read_events, Attributes, DocumentHandler, EventRecorder, SaxEvent,
    XmlEventWriter,
};

/// Relationships namespace.
pub const NS_RELATIONSHIPS: &str = "http://schemas.openxmlformats.org/package/2006/relationships";

/// Relationship from the package root to the signature origin part.
pub const TYPE_SIGNATURE_ORIGIN: &str =
    "http://schemas.openxmlformats.org/package/2006/relationships/digital-signature/origin";

/// Relationship from the origin part to one signature part.
pub const TYPE_SIGNATURE: &str =
    "http://schemas.openxmlformats.org/package/2006/relationships/digital-signature/signature";

/// Extended (application) properties relationship.
pub const TYPE_EXTENDED_PROPERTIES: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/extended-properties";

/// Core properties relationship.
pub const TYPE_CORE_PROPERTIES: &str =
    "http://schemas.openxmlformats.org/package/2006/relationships/metadata/core-properties";

/// Content type of relationship parts.
pub const RELATIONSHIPS_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-package.relationships+xml";

/// Suffix of reference URIs that point at relationship parts.
pub const RELATIONSHIPS_URI_SUFFIX: &str =
    "?ContentType=application/vnd.openxmlformats-package.relationships+xml";

/// Relationship types excluded from signed relationship parts.
const TYPE_BLACKLIST: [&str; 3] = [
    TYPE_EXTENDED_PROPERTIES,
    TYPE_CORE_PROPERTIES,
    TYPE_SIGNATURE_ORIGIN,
];

/// One `<Relationship>` element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    /// Relationship id (`rId1`)
    pub id: String,
    /// Relationship type URI
    pub rel_type: String,
    /// Target URI
    pub target: String,
    /// `External` for targets outside the package
    pub target_mode: Option<String>,
}

impl Relationship {
    /// Create an internal relationship.
    pub fn new(id: impl Into<String>, rel_type: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            rel_type: rel_type.into(),
            target: target.into(),
            target_mode: None,
        }
    }

    fn attributes(&self, explicit_mode: bool) -> Attributes {
        let mut attributes = Attributes::new()
            .with("Id", self.id.as_str())
            .with("Type", self.rel_type.as_str())
            .with("Target", self.target.as_str());
        match (&self.target_mode, explicit_mode) {
            (Some(mode), _) => attributes.push("TargetMode", mode.as_str()),
            (None, true) => attributes.push("TargetMode", "Internal"),
            (None, false) => {},
        }
        attributes
    }
}

/// Whether a relationship type is excluded from signing.
pub fn is_blacklisted_type(rel_type: &str) -> bool {
    TYPE_BLACKLIST.contains(&rel_type)
}

/// Whether a reference URI points at a relationship part.
pub fn is_relationships_uri(uri: &str) -> bool {
    uri.ends_with(RELATIONSHIPS_URI_SUFFIX)
}

/// Parse a relationship part.
pub fn read_relationships(xml: &[u8]) -> Result<Vec<Relationship>> {
    let mut relationships = Vec::new();
    read_events(xml, |event| {
        if let SaxEvent::StartElement { name, attributes } = &event {
            if local_name(name) == "Relationship" {
                relationships.push(Relationship {
                    id: attributes.get("Id").unwrap_or_default().to_string(),
                    rel_type: attributes.get("Type").unwrap_or_default().to_string(),
                    target: attributes.get("Target").unwrap_or_default().to_string(),
                    target_mode: attributes.get("TargetMode").map(str::to_string),
                });
            }
        }
        Ok(())
    })?;
    Ok(relationships)
}

/// Emit a `<Relationships>` element (without document framing).
pub fn write_relationships(
    handler: &mut dyn DocumentHandler,
    relationships: &[Relationship],
) -> Result<()> {
    emit(handler, relationships.iter(), false)
}

/// Serialize a complete relationship part.
pub fn relationships_to_xml(relationships: &[Relationship]) -> Result<Vec<u8>> {
    let mut writer = XmlEventWriter::new(Vec::new());
    writer.start_document()?;
    write_relationships(&mut writer, relationships)?;
    writer.end_document()?;
    Ok(writer.into_inner())
}

/// Relationships of a part that take part in a signature, in part order.
pub fn signed_relationships(relationships: &[Relationship]) -> Vec<&Relationship> {
    relationships
        .iter()
        .filter(|r| !is_blacklisted_type(&r.rel_type))
        .collect()
}

/// Apply the relationship transform followed by canonicalization.
///
/// Keeps the non-blacklisted relationships, orders them by id, makes the
/// target mode explicit and returns the canonical bytes to digest.
pub fn relationship_transform(xml: &[u8]) -> Result<Vec<u8>> {
    let relationships = read_relationships(xml)?;
    let mut kept = signed_relationships(&relationships);
    kept.sort_by(|a, b| a.id.cmp(&b.id));

    let mut recorder = EventRecorder::new();
    emit(&mut recorder, kept.into_iter(), true)?;
    canonicalize(recorder.events(), &[])
}

fn emit<'a, I>(handler: &mut dyn DocumentHandler, relationships: I, explicit_mode: bool) -> Result<()>
where
    I: Iterator<Item = &'a Relationship>,
{
    handler.start_element(
        "Relationships",
        Attributes::new().with("xmlns", NS_RELATIONSHIPS),
    )?;
    for relationship in relationships {
        handler.start_element("Relationship", relationship.attributes(explicit_mode))?;
        handler.end_element("Relationship")?;
    }
    handler.end_element("Relationships")
}

//! SAX-style XML event model.
//!
//! Signatures are read and written as a flat stream of [`SaxEvent`]s pushed
//! into [`DocumentHandler`]s. Handlers are chained: a reader feeds the head of
//! the chain, each node forwards to the next, and the signature machinery can
//! splice a buffering node in and out of the chain while events are flowing.
//!
//! - [`reader`]: quick-xml backed event source
//! - [`writer`]: quick-xml backed event sink
//! - [`c14n`]: canonical serialization of buffered events for digesting

pub mod c14n;
pub mod reader;
pub mod writer;

pub use c14n::{canonicalize, canonicalize_document};
pub use reader::{parse_document, read_events};
pub use writer::XmlEventWriter;

use crate::error::Result;
use std::cell::RefCell;
use std::rc::Rc;

/// Ordered attribute list of a start element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes(Vec<(String, String)>);

impl Attributes {
    /// Create an empty attribute list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an attribute (builder style).
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(name, value);
        self
    }

    /// Append an attribute.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    /// Value of the attribute with the given qualified name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Value of the first attribute whose local name matches, ignoring prefixes.
    pub fn get_local(&self, local: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| local_name(key) == local && !key.starts_with("xmlns"))
            .map(|(_, value)| value.as_str())
    }

    /// Iterate over `(name, value)` pairs in document order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of attributes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One SAX event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaxEvent {
    /// Beginning of a document
    StartDocument,
    /// End of a document
    EndDocument,
    /// Opening tag
    StartElement {
        /// Qualified element name
        name: String,
        /// Attributes, including namespace declarations
        attributes: Attributes,
    },
    /// Closing tag
    EndElement {
        /// Qualified element name
        name: String,
    },
    /// Character data (already unescaped)
    Characters(String),
}

impl SaxEvent {
    /// Start element event.
    pub fn start(name: impl Into<String>, attributes: Attributes) -> Self {
        SaxEvent::StartElement {
            name: name.into(),
            attributes,
        }
    }

    /// End element event.
    pub fn end(name: impl Into<String>) -> Self {
        SaxEvent::EndElement { name: name.into() }
    }

    /// Whether this is a start element with the given local name.
    pub fn is_start_of(&self, local: &str) -> bool {
        matches!(self, SaxEvent::StartElement { name, .. } if local_name(name) == local)
    }

    /// Whether this is an end element with the given local name.
    pub fn is_end_of(&self, local: &str) -> bool {
        matches!(self, SaxEvent::EndElement { name } if local_name(name) == local)
    }
}

/// Receiver of SAX events.
///
/// Implementors only need [`DocumentHandler::handle`]; the remaining methods
/// are conveniences for emitters.
pub trait DocumentHandler {
    /// Receive one event.
    fn handle(&mut self, event: &SaxEvent) -> Result<()>;

    /// Emit a start-document event.
    fn start_document(&mut self) -> Result<()> {
        self.handle(&SaxEvent::StartDocument)
    }

    /// Emit an end-document event.
    fn end_document(&mut self) -> Result<()> {
        self.handle(&SaxEvent::EndDocument)
    }

    /// Emit a start-element event.
    fn start_element(&mut self, name: &str, attributes: Attributes) -> Result<()> {
        self.handle(&SaxEvent::start(name, attributes))
    }

    /// Emit an end-element event.
    fn end_element(&mut self, name: &str) -> Result<()> {
        self.handle(&SaxEvent::end(name))
    }

    /// Emit character data.
    fn characters(&mut self, text: &str) -> Result<()> {
        self.handle(&SaxEvent::Characters(text.to_string()))
    }
}

/// Shared, re-targetable link in a handler chain.
pub type SharedHandler = Rc<RefCell<dyn DocumentHandler>>;

/// Handler that records every event it receives.
#[derive(Debug, Default)]
pub struct EventRecorder {
    events: Vec<SaxEvent>,
}

impl EventRecorder {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded events in arrival order.
    pub fn events(&self) -> &[SaxEvent] {
        &self.events
    }

    /// Take the recorded events, leaving the recorder empty.
    pub fn take(&mut self) -> Vec<SaxEvent> {
        std::mem::take(&mut self.events)
    }
}

impl DocumentHandler for EventRecorder {
    fn handle(&mut self, event: &SaxEvent) -> Result<()> {
        self.events.push(event.clone());
        Ok(())
    }
}

/// Local part of a qualified name (`ds:Signature` -> `Signature`).
pub fn local_name(qname: &str) -> &str {
    qname.rsplit(':').next().unwrap_or(qname)
}

/// Replay a slice of events into a handler.
pub fn replay(events: &[SaxEvent], handler: &mut dyn DocumentHandler) -> Result<()> {
    for event in events {
        handler.handle(event)?;
    }
    Ok(())
}

//! Event source: turns an XML document into [`SaxEvent`]s.
//!
//! Whitespace text is preserved because it takes part in canonical digests.
//! Comments, processing instructions and the XML declaration are dropped.

use super::{Attributes, SaxEvent};
use crate::error::{Error, Result};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

/// Parse `xml` and push every event into `sink`.
///
/// The stream is framed by `StartDocument` / `EndDocument`. Empty elements
/// are expanded into a start/end pair. The sink may abort parsing by
/// returning an error.
pub fn read_events<F>(xml: &[u8], mut sink: F) -> Result<()>
where
    F: FnMut(SaxEvent) -> Result<()>,
{
    let text = std::str::from_utf8(xml)
        .map_err(|e| Error::Encoding(format!("document is not UTF-8: {}", e)))?;
    let mut reader = Reader::from_str(text);
    reader.trim_text(false);

    sink(SaxEvent::StartDocument)?;
    let mut depth = 0usize;
    loop {
        match reader.read_event()? {
            Event::Start(ref e) => {
                depth += 1;
                sink(start_event(e)?)?;
            },
            Event::Empty(ref e) => {
                let start = start_event(e)?;
                let name = match &start {
                    SaxEvent::StartElement { name, .. } => name.clone(),
                    _ => String::new(),
                };
                sink(start)?;
                sink(SaxEvent::EndElement { name })?;
            },
            Event::End(ref e) => {
                depth = depth.saturating_sub(1);
                sink(SaxEvent::EndElement {
                    name: utf8(e.name().as_ref())?,
                })?;
            },
            Event::Text(e) => {
                // Whitespace around the root element is not part of the document
                if depth > 0 {
                    sink(SaxEvent::Characters(e.unescape()?.into_owned()))?;
                }
            },
            Event::CData(e) => {
                if depth > 0 {
                    sink(SaxEvent::Characters(utf8(&e.into_inner())?))?;
                }
            },
            Event::Eof => {
                if depth > 0 {
                    return Err(Error::Xml(format!(
                        "document ended with {} unclosed elements",
                        depth
                    )));
                }
                break;
            },
            _ => {},
        }
    }
    sink(SaxEvent::EndDocument)
}

/// Parse a complete document into a vector of events.
pub fn parse_document(xml: &[u8]) -> Result<Vec<SaxEvent>> {
    let mut events = Vec::new();
    read_events(xml, |event| {
        events.push(event);
        Ok(())
    })?;
    Ok(events)
}

fn start_event(e: &BytesStart<'_>) -> Result<SaxEvent> {
    let mut attributes = Attributes::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| Error::Xml(err.to_string()))?;
        let key = utf8(attr.key.as_ref())?;
        let value = attr.unescape_value()?.into_owned();
        attributes.push(key, value);
    }
    Ok(SaxEvent::StartElement {
        name: utf8(e.name().as_ref())?,
        attributes,
    })
}

fn utf8(bytes: &[u8]) -> Result<String> {
    String::from_utf8(bytes.to_vec()).map_err(|e| Error::Encoding(e.to_string()))
}

//! Event sink: serializes [`SaxEvent`]s as XML text.

use super::{DocumentHandler, SaxEvent};
use crate::error::Result;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::io::Write;

/// Writes received events to an underlying byte sink.
pub struct XmlEventWriter<W: Write> {
    writer: Writer<W>,
}

impl<W: Write> XmlEventWriter<W> {
    /// Wrap a byte sink.
    pub fn new(inner: W) -> Self {
        Self {
            writer: Writer::new(inner),
        }
    }

    /// Unwrap the byte sink.
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl XmlEventWriter<Vec<u8>> {
    /// Bytes written so far.
    pub fn bytes(&self) -> &[u8] {
        self.writer.get_ref()
    }

    /// Take the bytes written so far, leaving the buffer empty.
    pub fn take_bytes(&mut self) -> Vec<u8> {
        std::mem::take(self.writer.get_mut())
    }
}

impl<W: Write> DocumentHandler for XmlEventWriter<W> {
    fn handle(&mut self, event: &SaxEvent) -> Result<()> {
        match event {
            SaxEvent::StartDocument => {
                self.writer
                    .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
            },
            SaxEvent::EndDocument => {
                self.writer.get_mut().flush()?;
            },
            SaxEvent::StartElement { name, attributes } => {
                let mut start = BytesStart::new(name.as_str());
                for (key, value) in attributes.iter() {
                    start.push_attribute((key, value));
                }
                self.writer.write_event(Event::Start(start))?;
            },
            SaxEvent::EndElement { name } => {
                self.writer
                    .write_event(Event::End(BytesEnd::new(name.as_str())))?;
            },
            SaxEvent::Characters(text) => {
                if !text.is_empty() {
                    self.writer.write_event(Event::Text(BytesText::new(text)))?;
                }
            },
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::{parse_document, Attributes};

    #[test]
    fn test_write_document() {
        let mut writer = XmlEventWriter::new(Vec::new());
        writer.start_document().unwrap();
        writer
            .start_element("a", Attributes::new().with("xmlns", "urn:x").with("k", "a\"b"))
            .unwrap();
        writer.characters("1 < 2").unwrap();
        writer.end_element("a").unwrap();
        writer.end_document().unwrap();

        let text = String::from_utf8(writer.take_bytes()).unwrap();
        assert!(text.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(text.contains("<a xmlns=\"urn:x\" k=\"a&quot;b\">1 &lt; 2</a>"));
    }

    #[test]
    fn test_written_events_parse_back() {
        let mut writer = XmlEventWriter::new(Vec::new());
        writer.start_document().unwrap();
        writer.start_element("root", Attributes::new()).unwrap();
        writer.start_element("child", Attributes::new().with("Id", "c1")).unwrap();
        writer.characters("text & more").unwrap();
        writer.end_element("child").unwrap();
        writer.end_element("root").unwrap();
        writer.end_document().unwrap();

        let events = parse_document(writer.bytes()).unwrap();
        assert!(events[2].is_start_of("child"));
        assert_eq!(events[3], SaxEvent::Characters("text & more".to_string()));
    }
}

//! Thin helpers over quick-xml shared by the Atom, plain XML and CSDL
//! writers and the Atom unmarshallers.

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::error::RenderError;

pub const ATOM_NS: &str = "http://www.w3.org/2005/Atom";
pub const APP_NS: &str = "http://www.w3.org/2007/app";
pub const DATA_NS: &str = "http://docs.oasis-open.org/odata/ns/data";
pub const METADATA_NS: &str = "http://docs.oasis-open.org/odata/ns/metadata";
pub const SCHEME_NS: &str = "http://docs.oasis-open.org/odata/ns/scheme";
pub const RELATED_NS: &str = "http://docs.oasis-open.org/odata/ns/related/";
pub const EDMX_NS: &str = "http://docs.oasis-open.org/odata/ns/edmx";
pub const EDM_NS: &str = "http://docs.oasis-open.org/odata/ns/edm";

// ============================================================================
// Writing
// ============================================================================

/// Event writer into an in-memory fragment.
///
/// Elements are not required to balance within one fragment: a streamed feed
/// opens `<feed>` in one fragment and closes it in another.
pub struct XmlWriter {
    inner: Writer<Vec<u8>>,
}

impl XmlWriter {
    pub fn new() -> Self {
        Self {
            inner: Writer::new(Vec::new()),
        }
    }

    pub fn declaration(&mut self) -> Result<(), RenderError> {
        self.event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
    }

    pub fn start(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<(), RenderError> {
        let start = BytesStart::new(name).with_attributes(attrs.iter().copied());
        self.event(Event::Start(start))
    }

    pub fn end(&mut self, name: &str) -> Result<(), RenderError> {
        self.event(Event::End(BytesEnd::new(name)))
    }

    pub fn empty(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<(), RenderError> {
        let start = BytesStart::new(name).with_attributes(attrs.iter().copied());
        self.event(Event::Empty(start))
    }

    pub fn text(&mut self, text: &str) -> Result<(), RenderError> {
        self.event(Event::Text(BytesText::new(text)))
    }

    /// `<name attrs>text</name>`
    pub fn text_element(
        &mut self,
        name: &str,
        attrs: &[(&str, &str)],
        text: &str,
    ) -> Result<(), RenderError> {
        self.start(name, attrs)?;
        self.text(text)?;
        self.end(name)
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.inner.into_inner()
    }

    fn event(&mut self, event: Event<'_>) -> Result<(), RenderError> {
        self.inner.write_event(event).map_err(RenderError::xml)
    }
}

impl Default for XmlWriter {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Reading
// ============================================================================

/// A parsed element with namespace prefixes stripped from element and
/// attribute names. Request bodies are small, so building a tree is fine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlNode {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlNode>,
    pub text: String,
}

impl XmlNode {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }

    /// `m:null="true"`
    pub fn is_null(&self) -> bool {
        self.attribute("null") == Some("true")
    }
}

fn local(name: &[u8]) -> String {
    String::from_utf8_lossy(name).into_owned()
}

fn open_node(start: &BytesStart<'_>) -> Result<XmlNode, String> {
    let mut node = XmlNode {
        name: local(start.local_name().as_ref()),
        ..XmlNode::default()
    };
    for attr in start.attributes() {
        let attr = attr.map_err(|e| e.to_string())?;
        let key = attr.key.local_name();
        // Namespace declarations carry no data.
        if attr.key.as_ref().starts_with(b"xmlns") {
            continue;
        }
        let value = attr.unescape_value().map_err(|e| e.to_string())?;
        node.attributes.push((local(key.as_ref()), value.into_owned()));
    }
    Ok(node)
}

/// Parse a document into its root element.
pub fn parse_document(text: &str) -> Result<XmlNode, String> {
    let mut reader = Reader::from_str(text);
    reader.trim_text(true);
    let mut stack: Vec<XmlNode> = Vec::new();

    loop {
        match reader.read_event().map_err(|e| e.to_string())? {
            Event::Start(start) => stack.push(open_node(&start)?),
            Event::Empty(start) => {
                let node = open_node(&start)?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => return Ok(node),
                }
            }
            Event::Text(t) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&t.unescape().map_err(|e| e.to_string())?);
                }
            }
            Event::CData(c) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Event::End(_) => {
                let node = stack.pop().ok_or("unexpected closing tag")?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => return Ok(node),
                }
            }
            Event::Eof => return Err("document ended before the root element closed".into()),
            _ => {}
        }
    }
}

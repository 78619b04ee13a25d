// TTML text model
//
// The parsed document is kept as a flat arena of XML events in document order.
// Every event that is not a translatable text slot is stored verbatim, so
// serialization reproduces untouched markup byte for byte. Translatable slots
// are addressed by their arena index (`NodeRef`), captured at extraction time.

pub mod extract;
pub mod reinsert;

use quick_xml::events::{BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use tracing::debug;

pub use extract::{TextUnit, extract_units};
pub use reinsert::apply_translations;

use crate::error::{Result, TtmlError};

/// Declaration written when the source document carries none
pub const XML_DECLARATION: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n";

/// Opaque handle to one text slot of one parsed document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeRef(usize);

#[derive(Debug, Clone)]
enum Node {
    /// Any event outside the translatable slots, kept as read
    Markup(Event<'static>),
    /// Leading text of a span (or of a span-less paragraph)
    Slot(TextSlot),
}

#[derive(Debug, Clone)]
struct TextSlot {
    /// Original escaped bytes; `None` when the slot was synthesized or rewritten
    raw: Option<BytesText<'static>>,
    /// Decoded source text
    original: String,
    /// Current decoded text
    value: String,
    /// Set for `<span/>`, which has to be expanded once it carries text
    empty_tag: Option<BytesStart<'static>>,
    /// Leading text of a span-less paragraph; only extracted while non-blank
    paragraph: bool,
}

impl TextSlot {
    fn from_text(raw: BytesText<'static>, decoded: String) -> Self {
        Self {
            raw: Some(raw),
            original: decoded.clone(),
            value: decoded,
            empty_tag: None,
            paragraph: false,
        }
    }

    fn paragraph_text(raw: BytesText<'static>, decoded: String) -> Self {
        Self {
            paragraph: true,
            ..Self::from_text(raw, decoded)
        }
    }

    fn synthesized() -> Self {
        Self {
            raw: None,
            original: String::new(),
            value: String::new(),
            empty_tag: None,
            paragraph: false,
        }
    }

    fn self_closing(tag: BytesStart<'static>) -> Self {
        Self {
            empty_tag: Some(tag),
            ..Self::synthesized()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ElementKind {
    Paragraph,
    Span,
    Other,
}

impl ElementKind {
    fn of(local_name: &[u8]) -> Self {
        match local_name {
            b"p" => Self::Paragraph,
            b"span" => Self::Span,
            _ => Self::Other,
        }
    }
}

#[derive(Debug)]
struct Frame {
    kind: ElementKind,
    name: Vec<u8>,
    in_paragraph: bool,
    /// The next event decides this element's leading-text slot
    awaiting_text: bool,
    /// Paragraph only: a span was seen somewhere below it
    has_span: bool,
    /// Paragraph only: node index of its provisional leading-text slot
    candidate: Option<usize>,
}

/// Parsed TTML document
#[derive(Debug, Clone)]
pub struct TtmlDocument {
    nodes: Vec<Node>,
    slots: Vec<usize>,
    has_declaration: bool,
}

impl TtmlDocument {
    /// Parse a TTML document, rejecting anything that is not well-formed XML
    pub fn parse(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(false);
        reader.check_end_names(true);

        let mut nodes: Vec<Node> = Vec::new();
        let mut slots: Vec<usize> = Vec::new();
        let mut stack: Vec<Frame> = Vec::new();
        let mut has_declaration = false;
        let mut saw_root = false;

        loop {
            let event = reader.read_event().map_err(|e| {
                TtmlError::Parse(format!("{} at byte {}", e, reader.buffer_position()))
            })?;

            if let Event::Eof = event {
                break;
            }

            // Resolve a pending leading-text slot before anything else
            if let Some(frame) = stack.last_mut() {
                if frame.awaiting_text {
                    frame.awaiting_text = false;
                    if let Event::Text(text) = &event {
                        let decoded = text
                            .unescape()
                            .map_err(|e| TtmlError::Parse(format!("invalid text content: {}", e)))?
                            .into_owned();
                        let raw = text.clone().into_owned();
                        match frame.kind {
                            ElementKind::Span => {
                                slots.push(nodes.len());
                                nodes.push(Node::Slot(TextSlot::from_text(raw, decoded)));
                                continue;
                            }
                            ElementKind::Paragraph if !decoded.trim().is_empty() => {
                                frame.candidate = Some(nodes.len());
                                nodes.push(Node::Slot(TextSlot::paragraph_text(raw, decoded)));
                                continue;
                            }
                            _ => {}
                        }
                    } else if frame.kind == ElementKind::Span {
                        slots.push(nodes.len());
                        nodes.push(Node::Slot(TextSlot::synthesized()));
                    }
                }
            }

            match event {
                Event::Decl(_) => {
                    has_declaration = true;
                    nodes.push(Node::Markup(event.into_owned()));
                }
                Event::Start(start) => {
                    if stack.is_empty() {
                        if saw_root {
                            return Err(TtmlError::Parse("multiple root elements".to_string()));
                        }
                        saw_root = true;
                    }
                    let name = start.local_name().as_ref().to_vec();
                    let kind = ElementKind::of(&name);
                    let in_paragraph = kind == ElementKind::Paragraph
                        || stack.last().is_some_and(|f| f.in_paragraph);

                    if kind == ElementKind::Span && in_paragraph {
                        mark_paragraphs_with_span(&mut stack);
                    }

                    stack.push(Frame {
                        kind,
                        name,
                        in_paragraph,
                        awaiting_text: in_paragraph
                            && matches!(kind, ElementKind::Paragraph | ElementKind::Span),
                        has_span: false,
                        candidate: None,
                    });
                    nodes.push(Node::Markup(Event::Start(start.into_owned())));
                }
                Event::Empty(start) => {
                    if stack.is_empty() {
                        if saw_root {
                            return Err(TtmlError::Parse("multiple root elements".to_string()));
                        }
                        saw_root = true;
                    }
                    let kind = ElementKind::of(start.local_name().as_ref());
                    let in_paragraph = stack.last().is_some_and(|f| f.in_paragraph);

                    if kind == ElementKind::Span && in_paragraph {
                        mark_paragraphs_with_span(&mut stack);
                        slots.push(nodes.len());
                        nodes.push(Node::Slot(TextSlot::self_closing(start.into_owned())));
                    } else {
                        nodes.push(Node::Markup(Event::Empty(start.into_owned())));
                    }
                }
                Event::End(end) => {
                    let frame = stack.pop().ok_or_else(|| {
                        TtmlError::Parse(format!(
                            "unexpected closing tag </{}>",
                            String::from_utf8_lossy(end.name().as_ref())
                        ))
                    })?;
                    if frame.name.as_slice() != end.local_name().as_ref() {
                        return Err(TtmlError::Parse(format!(
                            "closing tag </{}> does not match <{}>",
                            String::from_utf8_lossy(end.name().as_ref()),
                            String::from_utf8_lossy(&frame.name)
                        )));
                    }

                    if let Some(index) = frame.candidate {
                        if frame.has_span {
                            demote_slot(&mut nodes, index);
                        } else {
                            slots.push(index);
                        }
                    }
                    nodes.push(Node::Markup(Event::End(end.into_owned())));
                }
                Event::Text(text) => {
                    if stack.is_empty() && !text.iter().all(u8::is_ascii_whitespace) {
                        return Err(TtmlError::Parse(
                            "text content outside the root element".to_string(),
                        ));
                    }
                    nodes.push(Node::Markup(Event::Text(text.into_owned())));
                }
                other => nodes.push(Node::Markup(other.into_owned())),
            }
        }

        if let Some(frame) = stack.last() {
            return Err(TtmlError::Parse(format!(
                "unclosed element <{}>",
                String::from_utf8_lossy(&frame.name)
            )));
        }
        if !saw_root {
            return Err(TtmlError::Parse("document has no root element".to_string()));
        }

        slots.sort_unstable();
        debug!("Parsed TTML document: {} events, {} text slots", nodes.len(), slots.len());

        Ok(Self {
            nodes,
            slots,
            has_declaration,
        })
    }

    /// Number of translatable text slots
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Handles to every slot, in document order
    pub(crate) fn slot_refs(&self) -> impl Iterator<Item = NodeRef> + '_ {
        self.slots.iter().map(|&index| NodeRef(index))
    }

    /// Current text of a slot
    pub fn text(&self, node: NodeRef) -> Option<&str> {
        match self.nodes.get(node.0) {
            Some(Node::Slot(slot)) => Some(slot.value.as_str()),
            _ => None,
        }
    }

    /// Whether a blank value would make the slot disappear on re-parse
    pub(crate) fn requires_text(&self, node: NodeRef) -> bool {
        matches!(self.nodes.get(node.0), Some(Node::Slot(slot)) if slot.paragraph)
    }

    pub(crate) fn set_text(&mut self, node: NodeRef, value: &str) -> Result<()> {
        match self.nodes.get_mut(node.0) {
            Some(Node::Slot(slot)) => {
                slot.value = value.to_string();
                Ok(())
            }
            _ => Err(TtmlError::Parse(format!(
                "node reference {} does not point at a text slot",
                node.0
            ))),
        }
    }

    /// Serialize the document, adding an XML declaration if the source had none
    pub fn to_xml_string(&self) -> Result<String> {
        let mut writer = Writer::new(Vec::new());

        if !self.has_declaration {
            writer.get_mut().extend_from_slice(XML_DECLARATION.as_bytes());
        }

        for node in &self.nodes {
            match node {
                Node::Markup(event) => writer.write_event(event.clone())?,
                Node::Slot(slot) => write_slot(&mut writer, slot)?,
            }
        }

        String::from_utf8(writer.into_inner())
            .map_err(|e| TtmlError::Parse(format!("serialized document is not UTF-8: {}", e)))
    }
}

fn mark_paragraphs_with_span(stack: &mut [Frame]) {
    for frame in stack.iter_mut().filter(|f| f.kind == ElementKind::Paragraph) {
        frame.has_span = true;
    }
}

/// Turn a provisional paragraph slot back into plain markup
fn demote_slot(nodes: &mut [Node], index: usize) {
    if let Node::Slot(TextSlot { raw: Some(raw), .. }) = &nodes[index] {
        nodes[index] = Node::Markup(Event::Text(raw.clone()));
    }
}

fn write_slot(writer: &mut Writer<Vec<u8>>, slot: &TextSlot) -> Result<()> {
    let text = match &slot.raw {
        Some(raw) if slot.value == slot.original => raw.clone(),
        _ => BytesText::new(&slot.value).into_owned(),
    };

    match &slot.empty_tag {
        Some(tag) if slot.value.is_empty() => {
            writer.write_event(Event::Empty(tag.clone()))?;
        }
        Some(tag) => {
            writer.write_event(Event::Start(tag.clone()))?;
            writer.write_event(Event::Text(text))?;
            writer.write_event(Event::End(tag.to_end()))?;
        }
        None if slot.value.is_empty() && slot.raw.is_none() => {}
        None => writer.write_event(Event::Text(text))?,
    }

    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<tt xmlns="http://www.w3.org/ns/ttml" xmlns:tts="http://www.w3.org/ns/ttml#styling" xmlns:ttm="http://www.w3.org/ns/ttml#metadata" xml:lang="en">
  <head>
    <ttm:title>Episode 1</ttm:title>
    <styling>
      <style xml:id="s1" tts:color="white" tts:fontFamily="proportionalSansSerif"/>
    </styling>
    <layout>
      <region xml:id="bottom" tts:origin="10% 80%" tts:extent="80% 20%"/>
    </layout>
  </head>
  <body region="bottom">
    <div>
      <!-- first cue -->
      <p begin="00:00:01.000" end="00:00:02.500" style="s1"><span tts:fontStyle="italic">Hello</span></p>
      <p begin="00:00:03.000" end="00:00:04.000"><span>World</span></p>
      <p begin="00:00:05.000" end="00:00:06.000"><span></span></p>
    </div>
  </body>
</tt>
"#;

    #[test]
    fn test_parse_counts_span_slots() {
        let doc = TtmlDocument::parse(SAMPLE).unwrap();
        assert_eq!(doc.slot_count(), 3);
    }

    #[test]
    fn test_unchanged_document_is_byte_identical() {
        let doc = TtmlDocument::parse(SAMPLE).unwrap();
        assert_eq!(doc.to_xml_string().unwrap(), SAMPLE);
    }

    #[test]
    fn test_declaration_added_when_missing() {
        let xml = r#"<tt xmlns="http://www.w3.org/ns/ttml"><body><div><p><span>Hi</span></p></div></body></tt>"#;
        let doc = TtmlDocument::parse(xml).unwrap();
        let out = doc.to_xml_string().unwrap();
        assert!(out.starts_with(XML_DECLARATION));
        assert!(out.ends_with(xml));
    }

    #[test]
    fn test_malformed_xml_is_rejected() {
        let unclosed = "<tt><body><p><span>Hi</span></p></body>";
        assert!(matches!(TtmlDocument::parse(unclosed), Err(TtmlError::Parse(_))));

        let mismatched = "<tt><p><span>Hi</p></span></tt>";
        assert!(matches!(TtmlDocument::parse(mismatched), Err(TtmlError::Parse(_))));

        assert!(matches!(TtmlDocument::parse(""), Err(TtmlError::Parse(_))));
        assert!(matches!(TtmlDocument::parse("just text"), Err(TtmlError::Parse(_))));
    }

    #[test]
    fn test_spans_outside_paragraphs_are_ignored() {
        let xml = r#"<tt><head><span>metadata</span></head><body><p><span>cue</span></p></body></tt>"#;
        let doc = TtmlDocument::parse(xml).unwrap();
        assert_eq!(doc.slot_count(), 1);
    }

    #[test]
    fn test_prefixed_element_names() {
        let xml = r#"<tt:tt xmlns:tt="http://www.w3.org/ns/ttml"><tt:body><tt:p><tt:span>One</tt:span><tt:br/><tt:span>Two</tt:span></tt:p></tt:body></tt:tt>"#;
        let doc = TtmlDocument::parse(xml).unwrap();
        assert_eq!(doc.slot_count(), 2);
        assert_eq!(doc.to_xml_string().unwrap(), format!("{}{}", XML_DECLARATION, xml));
    }

    #[test]
    fn test_paragraph_text_without_spans_is_a_slot() {
        let xml = r#"<tt><body><p begin="1s">Plain cue</p><p>   </p><p>Lead<span>inner</span></p></body></tt>"#;
        let doc = TtmlDocument::parse(xml).unwrap();
        let texts: Vec<_> = doc.slot_refs().map(|n| doc.text(n).unwrap().to_string()).collect();
        assert_eq!(texts, vec!["Plain cue", "inner"]);
    }

    #[test]
    fn test_self_closing_span_expands_when_filled() {
        let xml = r#"<tt><body><p><span style="a"/></p></body></tt>"#;
        let mut doc = TtmlDocument::parse(xml).unwrap();
        let node = doc.slot_refs().next().unwrap();
        assert_eq!(doc.text(node), Some(""));

        doc.set_text(node, "Salut").unwrap();
        let out = doc.to_xml_string().unwrap();
        assert!(out.ends_with(r#"<tt><body><p><span style="a">Salut</span></p></body></tt>"#));
    }

    #[test]
    fn test_entities_are_decoded_and_reescaped() {
        let xml = r#"<tt><body><p><span>Tom &amp; Jerry</span></p></body></tt>"#;
        let mut doc = TtmlDocument::parse(xml).unwrap();
        let node = doc.slot_refs().next().unwrap();
        assert_eq!(doc.text(node), Some("Tom & Jerry"));

        doc.set_text(node, "Tom & Jerry <3").unwrap();
        let out = doc.to_xml_string().unwrap();
        assert!(out.contains("<span>Tom &amp; Jerry &lt;3</span>"));
    }

    #[test]
    fn test_set_text_rejects_non_slot_reference() {
        let mut doc = TtmlDocument::parse(SAMPLE).unwrap();
        assert!(doc.set_text(NodeRef(0), "x").is_err());
    }
}

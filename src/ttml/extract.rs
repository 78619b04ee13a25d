use super::{NodeRef, TtmlDocument};

/// One translatable piece of subtitle text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextUnit {
    /// Position in extraction order, `0..N-1`
    pub index: usize,
    pub source_text: String,
    /// Slot the translation is written back into
    pub node: NodeRef,
}

/// Collect every text slot of the document in document order.
///
/// Empty and whitespace-only slots are kept so that positions stay aligned
/// with the translation result.
pub fn extract_units(doc: &TtmlDocument) -> Vec<TextUnit> {
    doc.slot_refs()
        .enumerate()
        .map(|(index, node)| TextUnit {
            index,
            source_text: doc.text(node).unwrap_or_default().to_string(),
            node,
        })
        .collect()
}

/// Source texts of `units`, in order
pub fn source_texts(units: &[TextUnit]) -> Vec<String> {
    units.iter().map(|u| u.source_text.clone()).collect()
}

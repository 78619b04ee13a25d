use serde_json::Value;
use tracing::debug;

/// Parse a model response expected to be a JSON array of strings.
///
/// Tries the raw text, then the text with markdown code fences removed, then
/// the outermost `[...]` slice. `null` elements become empty strings and other
/// scalars their JSON text. Returns `None` when no array can be recovered.
pub fn parse_string_array(text: &str) -> Option<Vec<String>> {
    let text = text.trim();

    if let Some(items) = try_parse(text) {
        return Some(items);
    }

    let cleaned = remove_markdown_code_blocks(text);
    if cleaned != text {
        debug!("Removed markdown code blocks, trying to parse: {}", cleaned);
        if let Some(items) = try_parse(&cleaned) {
            return Some(items);
        }
    }

    let (start, end) = (cleaned.find('[')?, cleaned.rfind(']')?);
    if start < end {
        let slice = &cleaned[start..=end];
        debug!("Extracted JSON array from mixed text: {}", slice);
        return try_parse(slice);
    }

    None
}

fn try_parse(text: &str) -> Option<Vec<String>> {
    match serde_json::from_str::<Value>(text).ok()? {
        Value::Array(items) => Some(items.into_iter().map(value_to_line).collect()),
        _ => None,
    }
}

fn value_to_line(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Remove markdown code fences from text
fn remove_markdown_code_blocks(text: &str) -> String {
    let text = text.trim();

    if let Some(inner) = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
    {
        return inner.trim().to_string();
    }

    if let Some(inner) = text
        .strip_prefix('`')
        .and_then(|rest| rest.strip_suffix('`'))
    {
        return inner.trim_start_matches("json").trim().to_string();
    }

    text.to_string()
}

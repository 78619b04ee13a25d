use tracing::{debug, warn};

use super::{TextUnit, TtmlDocument};
use crate::error::{Result, TtmlError};

/// Write `translations[i]` into the slot captured for `units[i]`.
///
/// Lengths must match; on mismatch the document is left untouched. A blank
/// translation of paragraph text keeps the source, since an empty `<p>` would
/// no longer yield a unit.
pub fn apply_translations(
    doc: &mut TtmlDocument,
    units: &[TextUnit],
    translations: &[String],
) -> Result<()> {
    if units.len() != translations.len() {
        return Err(TtmlError::Alignment {
            expected: units.len(),
            actual: translations.len(),
        });
    }

    for (unit, translated) in units.iter().zip(translations) {
        if translated.trim().is_empty() && doc.requires_text(unit.node) {
            warn!("Unit {}: blank translation for paragraph text, keeping source", unit.index);
            continue;
        }
        doc.set_text(unit.node, translated)?;
    }

    debug!("Reinserted {} translated units", units.len());
    Ok(())
}

/// Textual encodings of a stable identifier
use std::collections::HashMap;
use uuid::Uuid;

/// Word-bounded 8-hex token, any case
pub const HEX8_PATTERN: &str = r"(?i:\b[0-9a-f]{8}\b)";

/// Every string form of `original` paired with the same form of `masked`
///
/// Dashed and compact, lower and upper case, plus the four-int array form
/// used by serialized data (`[I; a, b, c, d]`, big-endian signed 32-bit).
pub fn identifier_pairs(original: &Uuid, masked: &Uuid) -> Vec<(String, String)> {
    let original_dashed = original.hyphenated().to_string();
    let masked_dashed = masked.hyphenated().to_string();
    let original_compact = original.simple().to_string();
    let masked_compact = masked.simple().to_string();

    let candidates = [
        (original_dashed.clone(), masked_dashed.clone()),
        (original_dashed.to_uppercase(), masked_dashed.to_uppercase()),
        (original_compact.clone(), masked_compact.clone()),
        (original_compact.to_uppercase(), masked_compact.to_uppercase()),
        (int_array_form(original), int_array_form(masked)),
    ];

    candidates
        .into_iter()
        .filter(|(from, to)| !from.trim().is_empty() && from != to)
        .collect()
}

/// `[I; a, b, c, d]` rendering of an identifier
pub fn int_array_form(id: &Uuid) -> String {
    let value = id.as_u128();
    let words: Vec<i32> = (0..4)
        .map(|i| ((value >> (96 - 32 * i)) as u32) as i32)
        .collect();
    format!("[I; {}, {}, {}, {}]", words[0], words[1], words[2], words[3])
}

/// Lowercase 8-hex prefix of each real identifier mapped to its masked one
pub fn prefix_map(masks: &[(Uuid, Uuid)]) -> HashMap<String, String> {
    masks
        .iter()
        .map(|(original, masked)| (prefix8(original), prefix8(masked)))
        .filter(|(from, to)| from != to)
        .collect()
}

/// Masked replacement for a standalone 8-hex `token`
///
/// An all-uppercase token gets an uppercase replacement. The caller checks
/// the token is not the head of a dashed identifier.
pub fn masked_prefix(token: &str, prefixes: &HashMap<String, String>) -> Option<String> {
    let replacement = prefixes.get(&token.to_ascii_lowercase())?;
    if token == token.to_ascii_uppercase() {
        Some(replacement.to_ascii_uppercase())
    } else {
        Some(replacement.clone())
    }
}

fn prefix8(id: &Uuid) -> String {
    id.simple().to_string()[..8].to_string()
}

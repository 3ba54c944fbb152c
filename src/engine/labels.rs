//! Canonical control identifiers.
//!
//! Planner output uses human phrasing ("Pressure Cook", "keep-warm") while the
//! detector emits class names (`pressure_cook`, `keep_warm`). Both sides are
//! passed through [`canon`] before they are compared.

/// Normalized phrasing -> detector class name. Keys are already normalized
/// (lowercase, single spaces, no `-`/`_`).
const ALIASES: &[(&str, &str)] = &[
    ("pressure cook", "pressure_cook"),
    ("pressurecook", "pressure_cook"),
    ("keep warm", "keep_warm"),
    ("keepwarm", "keep_warm"),
    ("temp set", "temp_set"),
    ("temperature", "temp_set"),
    ("lid open", "lid_open"),
    ("sauté", "saute"),
    ("rice", "rice"),
    ("start", "start"),
    ("cancel", "cancel"),
    ("increase", "increase"),
    ("decrease", "decrease"),
    ("pressure", "pressure"),
    ("saute", "saute"),
    ("steam", "steam"),
];

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn normalize(label: &str) -> String {
    let lowered = collapse_whitespace(&label.trim().to_lowercase());
    collapse_whitespace(&lowered.replace(['-', '_'], " "))
}

/// Map a raw or free-text label to its canonical identifier.
///
/// Unknown labels fall back to the trimmed, lowercased input with separators
/// left as they were.
pub fn canon(label: &str) -> String {
    let key = normalize(label);
    match ALIASES.iter().find(|(phrase, _)| *phrase == key) {
        Some((_, canonical)) => (*canonical).to_string(),
        None => label.trim().to_lowercase(),
    }
}

use serde::Serialize;
use std::fmt;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::catalog::SubjectCatalog;

/// UTF-8 accented letters that were decoded as Windows-1252 (or Latin-1)
/// somewhere upstream. Each pair is `(artifact, intended)`.
const ENCODING_ARTIFACTS: &[(&str, &str)] = &[
    ("Ã¡", "á"),
    ("Ã©", "é"),
    ("Ã\u{AD}", "í"),
    ("Ã³", "ó"),
    ("Ãº", "ú"),
    ("Ã±", "ñ"),
    ("Ã¼", "ü"),
    ("Ã\u{81}", "Á"),
    ("Ã‰", "É"),
    ("Ã\u{89}", "É"),
    ("Ã\u{8D}", "Í"),
    ("Ã“", "Ó"),
    ("Ã\u{93}", "Ó"),
    ("Ãš", "Ú"),
    ("Ã\u{9A}", "Ú"),
    ("Ã‘", "Ñ"),
    ("Ã\u{91}", "Ñ"),
    ("Ãœ", "Ü"),
    ("Ã\u{9C}", "Ü"),
];

/// A subject label after cleanup: encoding repaired, upper-cased, whitespace
/// collapsed and, when a rewrite rule or a known spelling applies, replaced
/// by its canonical form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct NormalizedName(String);

impl NormalizedName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Accent-free comparison key for this name.
    pub fn folded(&self) -> String {
        fold_accents(&self.0)
    }
}

impl fmt::Display for NormalizedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NormalizedName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

pub fn repair_encoding(raw: &str) -> String {
    if !raw.contains('Ã') {
        return raw.to_string();
    }
    let mut out = raw.to_string();
    for (artifact, intended) in ENCODING_ARTIFACTS {
        if out.contains(artifact) {
            out = out.replace(artifact, intended);
        }
    }
    out
}

/// Repair, upper-case and collapse whitespace. No rule lookup.
pub fn clean_label(raw: &str) -> String {
    let mut current = collapse_whitespace(&repair_encoding(raw).to_uppercase());
    // Upper-casing can surface new artifacts ("ã©" -> "Ã©"); every repair
    // shortens the string so this settles quickly.
    loop {
        let next = collapse_whitespace(&repair_encoding(&current).to_uppercase());
        if next == current {
            return current;
        }
        current = next;
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Strips combining marks after canonical decomposition, so "FÍSICA" and
/// "FISICA" share a key. "Ñ" folds to "N".
pub fn fold_accents(s: &str) -> String {
    s.nfd().filter(|c| !is_combining_mark(*c)).collect()
}

/// Canonical display/comparison form of a raw subject label.
///
/// Rewrite rules are tried in catalog order against the accent-folded
/// cleaned label and the first match wins. Otherwise a label that is an
/// accent variant of a known canonical name takes that canonical spelling.
/// Anything else is returned cleaned but otherwise untouched.
pub fn normalize(catalog: &SubjectCatalog, raw: &str) -> NormalizedName {
    let cleaned = clean_label(raw);
    if cleaned.is_empty() {
        return NormalizedName(cleaned);
    }
    let key = fold_accents(&cleaned);
    if let Some(canonical) = catalog.rewrite(&key) {
        return NormalizedName(canonical.to_string());
    }
    if let Some(canonical) = catalog.canonical_spelling(&key) {
        return NormalizedName(canonical.to_string());
    }
    NormalizedName(cleaned)
}

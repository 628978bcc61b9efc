//! Decides whether two subject labels name the same subject.
//!
//! Stages run in order and the first that succeeds decides:
//! exact normalized equality, shared equivalence-table entry, keyword vs.
//! abbreviation, and finally substring containment. Stages after the first
//! compare accent-folded forms.

use serde::Serialize;

use crate::catalog::SubjectCatalog;
use crate::normalize::{normalize, NormalizedName};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MatchStage {
    Exact,
    Table,
    Keyword,
    Substring,
}

/// A label ready for comparison.
#[derive(Debug, Clone)]
pub struct PreparedName {
    pub normalized: NormalizedName,
    pub folded: String,
}

impl PreparedName {
    pub fn new(catalog: &SubjectCatalog, raw: &str) -> Self {
        let normalized = normalize(catalog, raw);
        let folded = normalized.folded();
        Self { normalized, folded }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution<'c> {
    pub index: usize,
    pub candidate: &'c str,
    pub stage: MatchStage,
}

pub fn are_equivalent(catalog: &SubjectCatalog, a: &str, b: &str) -> bool {
    match_stage(catalog, a, b).is_some()
}

/// First stage at which `a` and `b` are considered the same subject.
pub fn match_stage(catalog: &SubjectCatalog, a: &str, b: &str) -> Option<MatchStage> {
    let a = PreparedName::new(catalog, a);
    let b = PreparedName::new(catalog, b);
    match_prepared(catalog, &a, &b)
}

pub fn match_prepared(
    catalog: &SubjectCatalog,
    a: &PreparedName,
    b: &PreparedName,
) -> Option<MatchStage> {
    if exact_match(a, b) {
        return Some(MatchStage::Exact);
    }
    // Blank labels are only equal to each other.
    if a.folded.is_empty() || b.folded.is_empty() {
        return None;
    }
    if table_match(catalog, a, b) {
        return Some(MatchStage::Table);
    }
    if keyword_match(catalog, a, b) {
        return Some(MatchStage::Keyword);
    }
    if substring_match(catalog, a, b) {
        return Some(MatchStage::Substring);
    }
    None
}

fn exact_match(a: &PreparedName, b: &PreparedName) -> bool {
    a.normalized == b.normalized || a.folded == b.folded
}

fn table_match(catalog: &SubjectCatalog, a: &PreparedName, b: &PreparedName) -> bool {
    let left = catalog.equivalence_entries(&a.folded);
    if left.is_empty() {
        return false;
    }
    let right = catalog.equivalence_entries(&b.folded);
    left.iter().any(|i| right.contains(i))
}

fn keyword_match(catalog: &SubjectCatalog, a: &PreparedName, b: &PreparedName) -> bool {
    let one_way = |x: &str, y: &str| {
        catalog.keywords().iter().any(|k| {
            x.contains(k.word.as_str()) && k.abbreviations.iter().any(|abbr| y.contains(abbr.as_str()))
        })
    };
    one_way(&a.folded, &b.folded) || one_way(&b.folded, &a.folded)
}

fn substring_match(catalog: &SubjectCatalog, a: &PreparedName, b: &PreparedName) -> bool {
    let (shorter, longer) = if a.folded.chars().count() <= b.folded.chars().count() {
        (&a.folded, &b.folded)
    } else {
        (&b.folded, &a.folded)
    };
    if shorter.chars().count() < catalog.substring_min_len() {
        return false;
    }
    longer.contains(shorter.as_str())
}

/// Maps a raw label onto one of `candidates`.
///
/// A candidate with the same normalized form wins outright. Otherwise the
/// first candidate, in list order, that passes any stage is chosen.
pub fn resolve_to_canonical<'c, S: AsRef<str>>(
    catalog: &SubjectCatalog,
    raw: &str,
    candidates: &'c [S],
) -> Option<Resolution<'c>> {
    let name = PreparedName::new(catalog, raw);
    let prepared: Vec<PreparedName> = candidates
        .iter()
        .map(|c| PreparedName::new(catalog, c.as_ref()))
        .collect();

    if let Some(index) = prepared.iter().position(|c| c.normalized == name.normalized) {
        return Some(Resolution {
            index,
            candidate: candidates[index].as_ref(),
            stage: MatchStage::Exact,
        });
    }

    prepared.iter().enumerate().find_map(|(index, c)| {
        match_prepared(catalog, &name, c).map(|stage| Resolution {
            index,
            candidate: candidates[index].as_ref(),
            stage,
        })
    })
}

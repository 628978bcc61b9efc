use std::cmp::Ordering;

use crate::catalog::SubjectCatalog;
use crate::equivalence::resolve_to_canonical;
use crate::error::{Diagnostic, Diagnostics};
use crate::model::{CohortYear, Placement};

/// Anything that can be placed on a report card.
pub trait OrderedSubject {
    /// Label resolved against the cohort's ordering table.
    fn order_label(&self) -> &str;
    /// Key for the alphabetical buckets.
    fn sort_label(&self) -> &str;
    fn origin_year(&self) -> Option<CohortYear>;
    fn is_repeating(&self) -> bool;
    fn set_placement(&mut self, placement: Placement);
}

/// Case-insensitive comparison with a byte-order tiebreak so equal-ignoring-
/// case labels still sort deterministically.
pub fn compare_labels(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b))
}

/// Current subjects first, in the cohort's configured order with unmatched
/// ones after them alphabetically. Repeating subjects follow, by origin year
/// and then alphabetically.
pub fn order_subjects<T: OrderedSubject>(
    catalog: &SubjectCatalog,
    items: Vec<T>,
    cohort_year: CohortYear,
    diagnostics: &mut Diagnostics,
) -> Vec<T> {
    let (repeating, current): (Vec<T>, Vec<T>) = items.into_iter().partition(|i| i.is_repeating());

    let mut out = order_current(catalog, current, cohort_year, diagnostics);
    out.extend(order_repeating(repeating));
    out
}

fn order_current<T: OrderedSubject>(
    catalog: &SubjectCatalog,
    items: Vec<T>,
    cohort_year: CohortYear,
    diagnostics: &mut Diagnostics,
) -> Vec<T> {
    if items.is_empty() {
        return items;
    }
    let entries = catalog.cohort_order(cohort_year);
    if entries.is_empty() {
        diagnostics.push(Diagnostic::MissingCohortOrder { cohort_year });
        let mut items = items;
        items.sort_by(|a, b| compare_labels(a.sort_label(), b.sort_label()));
        return items;
    }

    let mut ranked: Vec<(usize, T)> = Vec::new();
    let mut unranked: Vec<T> = Vec::new();
    for mut item in items {
        match resolve_to_canonical(catalog, item.order_label(), entries) {
            Some(res) => {
                let rank = res.index;
                item.set_placement(Placement {
                    rank: Some(rank),
                    order_entry: Some(res.candidate.to_string()),
                });
                ranked.push((rank, item));
            }
            None => {
                diagnostics.push(Diagnostic::ResolutionFailure {
                    label: item.order_label().to_string(),
                    cohort_year,
                });
                unranked.push(item);
            }
        }
    }

    // Stable sorts keep input order for items sharing a rank.
    ranked.sort_by_key(|(rank, _)| *rank);
    unranked.sort_by(|a, b| compare_labels(a.sort_label(), b.sort_label()));

    ranked
        .into_iter()
        .map(|(_, item)| item)
        .chain(unranked)
        .collect()
}

fn order_repeating<T: OrderedSubject>(mut items: Vec<T>) -> Vec<T> {
    items.sort_by(|a, b| {
        a.origin_year()
            .unwrap_or(0)
            .cmp(&b.origin_year().unwrap_or(0))
            .then_with(|| compare_labels(a.sort_label(), b.sort_label()))
    });
    items
}

use serde::Serialize;

use crate::error::{Diagnostic, Diagnostics};
use crate::model::{
    AggregatedGroupGrade, BimesterGrade, CombinationRule, GradeField, GradeRecord, Qualitative,
    SubjectGroup, SubjectInstance, Term, TermGrades,
};

/// Failing grades are those at or below this value.
pub const PASSING_THRESHOLD: f64 = 6.0;

#[derive(Debug, Clone, PartialEq)]
pub enum GradeValue {
    Absent,
    Numeric(f64),
    Unreadable(String),
}

/// Blank and missing slots are absent. A comma is accepted as the decimal
/// separator. Anything else that does not parse to a finite number is
/// unreadable.
pub fn parse_grade(raw: Option<&str>) -> GradeValue {
    let Some(raw) = raw else {
        return GradeValue::Absent;
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return GradeValue::Absent;
    }
    match trimmed.replace(',', ".").parse::<f64>() {
        Ok(v) if v.is_finite() => GradeValue::Numeric(v),
        _ => GradeValue::Unreadable(trimmed.to_string()),
    }
}

/// Parses one slot and records a diagnostic when the text is not a number.
pub fn read_grade(
    record: &GradeRecord,
    field: GradeField,
    diagnostics: &mut Diagnostics,
) -> Option<f64> {
    match parse_grade(record.raw(field)) {
        GradeValue::Numeric(v) => Some(v),
        GradeValue::Absent => None,
        GradeValue::Unreadable(value) => {
            diagnostics.push(Diagnostic::InconsistentGradeInput {
                subject_id: record.subject_id.clone(),
                field,
                value,
            });
            None
        }
    }
}

pub fn combine(values: &[f64], rule: CombinationRule) -> Option<i64> {
    if values.is_empty() {
        return None;
    }
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let combined = match rule {
        CombinationRule::AverageWithMinimum { threshold } => {
            if min <= threshold {
                min
            } else {
                mean
            }
        }
        CombinationRule::Average => mean,
        CombinationRule::Minimum => min,
    };
    Some(combined.floor() as i64)
}

/// Integer part of the grade: 7 and up is TEA, 4 to 6 is TEP, below 4 is TED.
pub fn derive_qualitative(numeric: f64) -> Qualitative {
    let whole = numeric.trunc();
    if whole >= 7.0 {
        Qualitative::Tea
    } else if whole >= 4.0 {
        Qualitative::Tep
    } else {
        Qualitative::Ted
    }
}

/// Worst of the valid valuations, `None` when there are none.
pub fn worst_qualitative<I>(values: I) -> Option<Qualitative>
where
    I: IntoIterator<Item = Qualitative>,
{
    values.into_iter().max()
}

/// Valuation shown for an ungrouped subject in one term.
///
/// A blank stored value falls back to the term's bimester valuation. If the
/// result is still not TEA/TEP/TED it is derived from the term's numeric
/// grade, when there is one.
pub fn term_qualitative(
    record: &GradeRecord,
    term: Term,
    numeric: Option<f64>,
) -> Option<Qualitative> {
    let stored = record
        .raw_qualitative(term)
        .map(str::trim)
        .filter(|s| !s.is_empty());
    let candidate = stored.or_else(|| {
        record
            .bimester(term.fallback_bimester())
            .and_then(|b| b.qualitative.as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    });
    candidate
        .and_then(Qualitative::parse)
        .or_else(|| numeric.map(derive_qualitative))
}

/// Numeric slots of an ungrouped subject.
pub fn individual_grades(record: &GradeRecord, diagnostics: &mut Diagnostics) -> TermGrades<f64> {
    let mut grades = TermGrades::default();
    for field in GradeField::ALL {
        grades.set(field, read_grade(record, field, diagnostics));
    }
    grades
}

pub fn individual_qualitatives(
    record: &GradeRecord,
    grades: &TermGrades<f64>,
) -> (Option<Qualitative>, Option<Qualitative>) {
    (
        term_qualitative(record, Term::First, grades.get(Term::First.numeric_field())),
        term_qualitative(record, Term::Second, grades.get(Term::Second.numeric_field())),
    )
}

/// Combines the grade records of a group's members for one student.
///
/// Each numeric slot uses only members with a readable value there. The
/// term valuation is the worst valid stored valuation, never derived.
pub fn aggregate_group(
    group: &SubjectGroup,
    student_id: &str,
    members: &[(&SubjectInstance, &GradeRecord)],
    diagnostics: &mut Diagnostics,
) -> AggregatedGroupGrade {
    let mut grades = TermGrades::default();
    for field in GradeField::ALL {
        let values: Vec<f64> = members
            .iter()
            .filter_map(|(_, record)| read_grade(record, field, diagnostics))
            .collect();
        grades.set(field, combine(&values, group.combination_rule));
    }

    let term_valuation = |term: Term| {
        worst_qualitative(
            members
                .iter()
                .filter_map(|(_, record)| record.raw_qualitative(term))
                .filter_map(Qualitative::parse),
        )
    };

    let observations = members
        .iter()
        .filter_map(|(member, record)| {
            let text = record.observations.as_deref()?.trim();
            (!text.is_empty()).then(|| format!("{}: {}", member.raw_label.trim(), text))
        })
        .collect::<Vec<_>>()
        .join(" | ");

    AggregatedGroupGrade {
        group_id: group.id.clone(),
        student_id: student_id.to_string(),
        grades,
        qualitative_first_term: term_valuation(Term::First),
        qualitative_second_term: term_valuation(Term::Second),
        observations,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BimesterSummary {
    pub qualitative: Option<Qualitative>,
    pub performance: String,
    pub observations: String,
}

/// Merges member bimester entries of a group. `None` when no member has an
/// entry. The valuation is the worst valid one and is left empty when none
/// is valid.
pub fn consolidate_bimester(entries: &[(&SubjectInstance, &BimesterGrade)]) -> Option<BimesterSummary> {
    if entries.is_empty() {
        return None;
    }

    let qualitative = worst_qualitative(
        entries
            .iter()
            .filter_map(|(_, b)| b.qualitative.as_deref())
            .filter_map(Qualitative::parse),
    );

    let mut performance: Vec<&str> = Vec::new();
    for (_, b) in entries {
        if let Some(p) = b.performance.as_deref().map(str::trim) {
            if !p.is_empty() && !performance.contains(&p) {
                performance.push(p);
            }
        }
    }

    let observations = entries
        .iter()
        .filter_map(|(member, b)| {
            let text = b.observations.as_deref()?.trim();
            (!text.is_empty()).then(|| format!("{}: {}", member.raw_label.trim(), text))
        })
        .collect::<Vec<_>>()
        .join(" | ");

    Some(BimesterSummary {
        qualitative,
        performance: performance.join(", "),
        observations,
    })
}

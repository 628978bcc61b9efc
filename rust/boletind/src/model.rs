use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

use crate::calc::PASSING_THRESHOLD;
use crate::normalize::NormalizedName;

pub type CohortYear = i32;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    pub cohort_year: CohortYear,
}

/// One concrete subject offering. `group_id` is the single source of truth
/// for group membership, so an instance belongs to at most one group.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectInstance {
    pub id: String,
    pub raw_label: String,
    #[serde(default)]
    pub cohort_year: Option<CohortYear>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub group_id: Option<String>,
}

/// How member grades of a group collapse into one numeric value.
/// Every rule truncates toward negative infinity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum CombinationRule {
    /// Floor of the minimum when the minimum is at or below `threshold`,
    /// floor of the mean otherwise.
    AverageWithMinimum { threshold: f64 },
    Average,
    Minimum,
}

impl Default for CombinationRule {
    fn default() -> Self {
        CombinationRule::AverageWithMinimum { threshold: 6.0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectGroup {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub code: Option<String>,
    pub cohort_year: CohortYear,
    #[serde(default)]
    pub combination_rule: CombinationRule,
}

/// Subject instances and groups known to a workspace.
#[derive(Debug, Clone, Default)]
pub struct Curriculum {
    instances: Vec<SubjectInstance>,
    groups: Vec<SubjectGroup>,
    by_id: HashMap<String, usize>,
}

impl Curriculum {
    pub fn new(instances: Vec<SubjectInstance>, groups: Vec<SubjectGroup>) -> Self {
        let by_id = instances
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.clone(), i))
            .collect();
        Self {
            instances,
            groups,
            by_id,
        }
    }

    pub fn instance(&self, id: &str) -> Option<&SubjectInstance> {
        self.by_id.get(id).and_then(|i| self.instances.get(*i))
    }

    pub fn instances(&self) -> &[SubjectInstance] {
        &self.instances
    }

    pub fn groups(&self) -> &[SubjectGroup] {
        &self.groups
    }

    pub fn group(&self, id: &str) -> Option<&SubjectGroup> {
        self.groups.iter().find(|g| g.id == id)
    }

    pub fn members<'a>(&'a self, group_id: &'a str) -> impl Iterator<Item = &'a SubjectInstance> + 'a {
        self.instances
            .iter()
            .filter(move |s| s.group_id.as_deref() == Some(group_id))
    }
}

/// Numeric grade slots of a term record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GradeField {
    FirstTerm,
    SecondTerm,
    RemediationFirstTerm,
    RemediationDecember,
    RemediationFebruary,
    Final,
}

impl GradeField {
    pub const ALL: [GradeField; 6] = [
        GradeField::FirstTerm,
        GradeField::SecondTerm,
        GradeField::RemediationFirstTerm,
        GradeField::RemediationDecember,
        GradeField::RemediationFebruary,
        GradeField::Final,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            GradeField::FirstTerm => "firstTerm",
            GradeField::SecondTerm => "secondTerm",
            GradeField::RemediationFirstTerm => "remediationFirstTerm",
            GradeField::RemediationDecember => "remediationDecember",
            GradeField::RemediationFebruary => "remediationFebruary",
            GradeField::Final => "final",
        }
    }
}

/// Terms that carry a qualitative valuation next to the numeric grade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Term {
    First,
    Second,
}

impl Term {
    pub fn numeric_field(self) -> GradeField {
        match self {
            Term::First => GradeField::FirstTerm,
            Term::Second => GradeField::SecondTerm,
        }
    }

    /// Bimester whose valuation stands in when the term valuation is blank.
    pub fn fallback_bimester(self) -> u8 {
        match self {
            Term::First => 1,
            Term::Second => 3,
        }
    }
}

/// Qualitative valuation. Declaration order is severity order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Qualitative {
    /// Trayectoria educativa alcanzada.
    Tea,
    /// Trayectoria educativa en proceso.
    Tep,
    /// Trayectoria educativa discontinua.
    Ted,
}

impl Qualitative {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "TEA" => Some(Qualitative::Tea),
            "TEP" => Some(Qualitative::Tep),
            "TED" => Some(Qualitative::Ted),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Qualitative::Tea => "TEA",
            Qualitative::Tep => "TEP",
            Qualitative::Ted => "TED",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BimesterGrade {
    pub bimester: u8,
    #[serde(default)]
    pub qualitative: Option<String>,
    #[serde(default)]
    pub performance: Option<String>,
    #[serde(default)]
    pub observations: Option<String>,
}

/// One student's grades for one subject instance, as entered. Numeric slots
/// hold the raw text so inconsistent input can be reported rather than lost.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeRecord {
    pub student_id: String,
    pub subject_id: String,
    /// Enrollment kind: "C" (cursa) or "R" (recursa). Other kinds are not reported.
    #[serde(default)]
    pub enrollment: Option<String>,
    #[serde(default, deserialize_with = "raw_grade")]
    pub first_term: Option<String>,
    #[serde(default, deserialize_with = "raw_grade")]
    pub second_term: Option<String>,
    #[serde(default, deserialize_with = "raw_grade")]
    pub remediation_first_term: Option<String>,
    #[serde(default, deserialize_with = "raw_grade")]
    pub remediation_december: Option<String>,
    #[serde(default, deserialize_with = "raw_grade")]
    pub remediation_february: Option<String>,
    #[serde(default, deserialize_with = "raw_grade")]
    pub final_grade: Option<String>,
    #[serde(default)]
    pub qualitative_first_term: Option<String>,
    #[serde(default)]
    pub qualitative_second_term: Option<String>,
    #[serde(default)]
    pub observations: Option<String>,
    #[serde(default)]
    pub bimesters: Vec<BimesterGrade>,
}

impl GradeRecord {
    pub fn raw(&self, field: GradeField) -> Option<&str> {
        match field {
            GradeField::FirstTerm => self.first_term.as_deref(),
            GradeField::SecondTerm => self.second_term.as_deref(),
            GradeField::RemediationFirstTerm => self.remediation_first_term.as_deref(),
            GradeField::RemediationDecember => self.remediation_december.as_deref(),
            GradeField::RemediationFebruary => self.remediation_february.as_deref(),
            GradeField::Final => self.final_grade.as_deref(),
        }
    }

    pub fn raw_qualitative(&self, term: Term) -> Option<&str> {
        match term {
            Term::First => self.qualitative_first_term.as_deref(),
            Term::Second => self.qualitative_second_term.as_deref(),
        }
    }

    pub fn bimester(&self, bimester: u8) -> Option<&BimesterGrade> {
        self.bimesters.iter().find(|b| b.bimester == bimester)
    }

    /// True when the enrollment kind is absent or one that appears on reports.
    pub fn is_reportable(&self) -> bool {
        match self.enrollment.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(kind) => kind.eq_ignore_ascii_case("C") || kind.eq_ignore_ascii_case("R"),
        }
    }
}

/// Accepts a JSON string, number or null for a raw grade slot.
fn raw_grade<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExemptionRecord {
    pub student_id: String,
    pub subject_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Classification {
    Current,
    Repeating,
    Exempted,
}

/// Numeric values per grade slot. Individual rows keep entered precision,
/// group rows carry combined whole numbers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TermGrades<T> {
    pub first_term: Option<T>,
    pub second_term: Option<T>,
    pub remediation_first_term: Option<T>,
    pub remediation_december: Option<T>,
    pub remediation_february: Option<T>,
    #[serde(rename = "final")]
    pub final_grade: Option<T>,
}

impl<T> Default for TermGrades<T> {
    fn default() -> Self {
        Self {
            first_term: None,
            second_term: None,
            remediation_first_term: None,
            remediation_december: None,
            remediation_february: None,
            final_grade: None,
        }
    }
}

impl<T: Copy> TermGrades<T> {
    pub fn get(&self, field: GradeField) -> Option<T> {
        match field {
            GradeField::FirstTerm => self.first_term,
            GradeField::SecondTerm => self.second_term,
            GradeField::RemediationFirstTerm => self.remediation_first_term,
            GradeField::RemediationDecember => self.remediation_december,
            GradeField::RemediationFebruary => self.remediation_february,
            GradeField::Final => self.final_grade,
        }
    }

    pub fn set(&mut self, field: GradeField, value: Option<T>) {
        let slot = match field {
            GradeField::FirstTerm => &mut self.first_term,
            GradeField::SecondTerm => &mut self.second_term,
            GradeField::RemediationFirstTerm => &mut self.remediation_first_term,
            GradeField::RemediationDecember => &mut self.remediation_december,
            GradeField::RemediationFebruary => &mut self.remediation_february,
            GradeField::Final => &mut self.final_grade,
        };
        *slot = value;
    }

    pub fn any(&self) -> bool {
        GradeField::ALL.iter().any(|f| self.get(*f).is_some())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedGroupGrade {
    pub group_id: String,
    pub student_id: String,
    pub grades: TermGrades<i64>,
    pub qualitative_first_term: Option<Qualitative>,
    pub qualitative_second_term: Option<Qualitative>,
    /// "member: text" entries joined with " | ".
    pub observations: String,
}

/// Where a row landed in its cohort's display order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Placement {
    pub rank: Option<usize>,
    pub order_entry: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndividualSubjectRow {
    pub subject_id: String,
    pub raw_label: String,
    pub display_name: String,
    pub canonical_name: NormalizedName,
    /// Set when the subject is shown under its group's name.
    pub original_name: Option<String>,
    pub code: Option<String>,
    pub origin_year: CohortYear,
    pub classification: Classification,
    /// Year-based only; an exempted subject can still be repeating.
    pub repeating: bool,
    pub grades: TermGrades<f64>,
    pub qualitative_first_term: Option<Qualitative>,
    pub qualitative_second_term: Option<Qualitative>,
    pub observations: String,
    #[serde(flatten)]
    pub placement: Placement,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSubjectRow {
    pub group_id: String,
    pub display_name: String,
    pub canonical_name: NormalizedName,
    pub code: Option<String>,
    pub origin_year: CohortYear,
    pub classification: Classification,
    pub member_names: Vec<String>,
    pub exempted_members: Vec<String>,
    pub aggregate: AggregatedGroupGrade,
    #[serde(flatten)]
    pub placement: Placement,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ReportRow {
    Individual(IndividualSubjectRow),
    Group(GroupSubjectRow),
}

pub const NOTE_EXEMPTED: &str = "Se pospone la cursada de la materia";
pub const NOTE_NO_DATA: &str = "No cursa la materia";
pub const NOTE_EMPTY: &str = "-";

impl ReportRow {
    pub fn display_name(&self) -> &str {
        match self {
            ReportRow::Individual(r) => &r.display_name,
            ReportRow::Group(r) => &r.display_name,
        }
    }

    pub fn canonical_name(&self) -> &NormalizedName {
        match self {
            ReportRow::Individual(r) => &r.canonical_name,
            ReportRow::Group(r) => &r.canonical_name,
        }
    }

    pub fn classification(&self) -> Classification {
        match self {
            ReportRow::Individual(r) => r.classification,
            ReportRow::Group(r) => r.classification,
        }
    }

    pub fn origin_year(&self) -> CohortYear {
        match self {
            ReportRow::Individual(r) => r.origin_year,
            ReportRow::Group(r) => r.origin_year,
        }
    }

    pub fn is_repeating(&self) -> bool {
        match self {
            ReportRow::Individual(r) => r.repeating,
            ReportRow::Group(_) => false,
        }
    }

    pub fn numeric(&self, field: GradeField) -> Option<f64> {
        match self {
            ReportRow::Individual(r) => r.grades.get(field),
            ReportRow::Group(r) => r.aggregate.grades.get(field).map(|v| v as f64),
        }
    }

    pub fn qualitative(&self, term: Term) -> Option<Qualitative> {
        match (self, term) {
            (ReportRow::Individual(r), Term::First) => r.qualitative_first_term,
            (ReportRow::Individual(r), Term::Second) => r.qualitative_second_term,
            (ReportRow::Group(r), Term::First) => r.aggregate.qualitative_first_term,
            (ReportRow::Group(r), Term::Second) => r.aggregate.qualitative_second_term,
        }
    }

    pub fn observations(&self) -> &str {
        match self {
            ReportRow::Individual(r) => &r.observations,
            ReportRow::Group(r) => &r.aggregate.observations,
        }
    }

    pub fn set_placement(&mut self, placement: Placement) {
        match self {
            ReportRow::Individual(r) => r.placement = placement,
            ReportRow::Group(r) => r.placement = placement,
        }
    }

    pub fn has_any_data(&self) -> bool {
        GradeField::ALL.iter().any(|f| self.numeric(*f).is_some())
            || self.qualitative(Term::First).is_some()
            || self.qualitative(Term::Second).is_some()
            || !self.observations().trim().is_empty()
    }

    /// Text for the observations column of a printed report card.
    pub fn display_note(&self) -> String {
        if self.classification() == Classification::Exempted {
            return NOTE_EXEMPTED.to_string();
        }
        if !self.has_any_data() {
            return NOTE_NO_DATA.to_string();
        }
        let obs = self.observations().trim();
        if obs.is_empty() {
            NOTE_EMPTY.to_string()
        } else {
            obs.to_string()
        }
    }

    /// Numeric slots holding a failing grade.
    pub fn failing_fields(&self) -> Vec<GradeField> {
        GradeField::ALL
            .iter()
            .copied()
            .filter(|f| self.numeric(*f).map(|v| v <= PASSING_THRESHOLD).unwrap_or(false))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualitative_parse_is_trimmed_and_case_blind() {
        assert_eq!(Qualitative::parse(" tea "), Some(Qualitative::Tea));
        assert_eq!(Qualitative::parse("TED"), Some(Qualitative::Ted));
        assert_eq!(Qualitative::parse("MB"), None);
        assert!(Qualitative::Ted > Qualitative::Tep && Qualitative::Tep > Qualitative::Tea);
    }

    #[test]
    fn grade_record_accepts_numbers_and_strings() {
        let rec: GradeRecord = serde_json::from_value(serde_json::json!({
            "studentId": "s1",
            "subjectId": "m1",
            "firstTerm": 7,
            "secondTerm": "8.5",
            "finalGrade": null
        }))
        .expect("parse record");
        assert_eq!(rec.raw(GradeField::FirstTerm), Some("7"));
        assert_eq!(rec.raw(GradeField::SecondTerm), Some("8.5"));
        assert_eq!(rec.raw(GradeField::Final), None);
        assert!(rec.is_reportable());
    }

    #[test]
    fn only_c_and_r_enrollments_are_reportable() {
        let mut rec = GradeRecord::default();
        for (kind, expected) in [("C", true), ("r", true), ("", true), ("E", false), ("L", false)] {
            rec.enrollment = Some(kind.to_string());
            assert_eq!(rec.is_reportable(), expected, "kind {kind:?}");
        }
    }

    #[test]
    fn combination_rule_defaults_to_average_with_minimum_six() {
        let group: SubjectGroup = serde_json::from_value(serde_json::json!({
            "id": "g1", "displayName": "Taller", "cohortYear": 1
        }))
        .expect("parse group");
        assert_eq!(
            group.combination_rule,
            CombinationRule::AverageWithMinimum { threshold: 6.0 }
        );
        let rule: CombinationRule =
            serde_json::from_value(serde_json::json!({ "kind": "minimum" })).expect("parse rule");
        assert_eq!(rule, CombinationRule::Minimum);
    }

    #[test]
    fn curriculum_members_follow_group_id() {
        let curriculum = Curriculum::new(
            vec![
                SubjectInstance {
                    id: "a".into(),
                    raw_label: "Maderas".into(),
                    cohort_year: Some(1),
                    code: None,
                    group_id: Some("g".into()),
                },
                SubjectInstance {
                    id: "b".into(),
                    raw_label: "Ingles".into(),
                    cohort_year: Some(1),
                    code: None,
                    group_id: None,
                },
            ],
            vec![],
        );
        let ids: Vec<_> = curriculum.members("g").map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a"]);
        assert!(curriculum.instance("b").is_some());
        assert!(curriculum.instance("zz").is_none());
    }
}

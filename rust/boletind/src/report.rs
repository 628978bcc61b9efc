use serde::Serialize;
use std::collections::HashSet;

use crate::calc::{self, BimesterSummary};
use crate::catalog::SubjectCatalog;
use crate::classify::{self, ExemptionSet};
use crate::error::{Diagnostic, Diagnostics, EngineError};
use crate::model::{
    BimesterGrade, Classification, CohortYear, Curriculum, ExemptionRecord, GradeRecord,
    GroupSubjectRow, IndividualSubjectRow, Placement, Qualitative, ReportRow, Student,
    SubjectGroup, SubjectInstance,
};
use crate::normalize::{normalize, NormalizedName};
use crate::ordering::{order_subjects, OrderedSubject};
use crate::provider::DataProvider;

pub const BIMESTERS: std::ops::RangeInclusive<u8> = 1..=4;

/// Everything needed to build one student's reports.
#[derive(Debug, Clone)]
pub struct ReportInput {
    pub student: Student,
    pub curriculum: Curriculum,
    pub grades: Vec<GradeRecord>,
    pub exemptions: Vec<ExemptionRecord>,
}

impl ReportInput {
    pub fn load(provider: &dyn DataProvider, student_id: &str) -> Result<Self, EngineError> {
        let student = provider.student(student_id)?;
        let curriculum = provider.curriculum()?;
        let grades = provider.grades(student_id)?;
        let exemptions = provider.exemptions(student_id)?;
        Ok(Self {
            student,
            curriculum,
            grades,
            exemptions,
        })
    }

    /// Grade rows of this student whose enrollment kind appears on reports.
    fn reportable_grades(&self) -> Vec<&GradeRecord> {
        self.grades
            .iter()
            .filter(|g| g.student_id == self.student.id && g.is_reportable())
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportCard {
    pub student_id: String,
    pub display_name: String,
    pub cohort_year: CohortYear,
    pub rows: Vec<ReportRow>,
    pub diagnostics: Diagnostics,
}

impl OrderedSubject for ReportRow {
    fn order_label(&self) -> &str {
        self.display_name()
    }

    fn sort_label(&self) -> &str {
        self.canonical_name().as_str()
    }

    fn origin_year(&self) -> Option<CohortYear> {
        Some(ReportRow::origin_year(self))
    }

    fn is_repeating(&self) -> bool {
        ReportRow::is_repeating(self)
    }

    fn set_placement(&mut self, placement: Placement) {
        ReportRow::set_placement(self, placement)
    }
}

/// Groups of the student's own cohort year. Members of groups from other
/// years are reported individually under the group's name.
fn current_groups<'a>(
    curriculum: &'a Curriculum,
    cohort_year: CohortYear,
) -> impl Iterator<Item = (&'a SubjectGroup, Vec<&'a SubjectInstance>)> + 'a {
    curriculum
        .groups()
        .iter()
        .filter(move |g| g.cohort_year == cohort_year)
        .filter_map(move |g| {
            let members: Vec<&SubjectInstance> = curriculum.members(&g.id).collect();
            (!members.is_empty()).then_some((g, members))
        })
}

/// Label an ungrouped record is shown under, plus the original label when
/// that is a group's name.
struct Presentation {
    display_name: String,
    original_name: Option<String>,
    code: Option<String>,
}

fn present(curriculum: &Curriculum, instance: &SubjectInstance) -> Presentation {
    let group = instance
        .group_id
        .as_deref()
        .and_then(|id| curriculum.group(id))
        .filter(|g| !g.display_name.trim().is_empty());
    match group {
        Some(g) => Presentation {
            display_name: g.display_name.clone(),
            original_name: Some(instance.raw_label.clone()),
            code: g.code.clone().or_else(|| instance.code.clone()),
        },
        None => Presentation {
            display_name: instance.raw_label.clone(),
            original_name: None,
            code: instance.code.clone(),
        },
    }
}

/// Builds the term report card: grouped subjects aggregated, ungrouped ones
/// listed with derived valuations, everything classified and ordered.
pub fn build_report_card(catalog: &SubjectCatalog, input: &ReportInput) -> ReportCard {
    let mut diagnostics = Diagnostics::new();
    let student = &input.student;
    let year = student.cohort_year;
    let curriculum = &input.curriculum;
    let exemptions = ExemptionSet::for_student(&student.id, &input.exemptions);
    let records = input.reportable_grades();
    let record_for = |subject_id: &str| records.iter().copied().find(|r| r.subject_id == subject_id);

    let mut rows: Vec<ReportRow> = Vec::new();
    let mut grouped: HashSet<&str> = HashSet::new();

    for (group, members) in current_groups(curriculum, year) {
        grouped.extend(members.iter().copied().map(|m| m.id.as_str()));
        let with_records: Vec<(&SubjectInstance, &GradeRecord)> = members
            .iter()
            .filter_map(|m| record_for(&m.id).map(|r| (*m, r)))
            .collect();
        let aggregate = calc::aggregate_group(group, &student.id, &with_records, &mut diagnostics);
        let status = classify::classify_group(members.iter().copied(), &exemptions);
        rows.push(ReportRow::Group(GroupSubjectRow {
            group_id: group.id.clone(),
            display_name: group.display_name.clone(),
            canonical_name: normalize(catalog, &group.display_name),
            code: group.code.clone(),
            origin_year: year,
            classification: status.classification,
            member_names: members.iter().map(|m| m.raw_label.clone()).collect(),
            exempted_members: status.exempted_members,
            aggregate,
            placement: Placement::default(),
        }));
    }

    for record in &records {
        if grouped.contains(record.subject_id.as_str()) {
            continue;
        }
        let Some(instance) = curriculum.instance(&record.subject_id) else {
            diagnostics.push(Diagnostic::OrphanGrade {
                subject_id: record.subject_id.clone(),
            });
            continue;
        };
        let shown = present(curriculum, instance);
        let grades = calc::individual_grades(record, &mut diagnostics);
        let (q1, q2) = calc::individual_qualitatives(record, &grades);
        rows.push(ReportRow::Individual(IndividualSubjectRow {
            subject_id: instance.id.clone(),
            raw_label: instance.raw_label.clone(),
            canonical_name: normalize(catalog, &shown.display_name),
            display_name: shown.display_name,
            original_name: shown.original_name,
            code: shown.code,
            origin_year: classify::origin_year(instance, year),
            classification: classify::classify_instance(instance, year, &exemptions),
            repeating: classify::is_repeating(instance, year),
            grades,
            qualitative_first_term: q1,
            qualitative_second_term: q2,
            observations: record
                .observations
                .as_deref()
                .map(str::trim)
                .unwrap_or_default()
                .to_string(),
            placement: Placement::default(),
        }));
    }

    let rows = order_subjects(catalog, rows, year, &mut diagnostics);
    tracing::debug!(student_id = %student.id, rows = rows.len(), "report card built");

    ReportCard {
        student_id: student.id.clone(),
        display_name: student.display_name.clone(),
        cohort_year: year,
        rows,
        diagnostics,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum BimesterRowKind {
    Individual,
    Group,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BimesterRow {
    pub kind: BimesterRowKind,
    pub id: String,
    pub display_name: String,
    pub canonical_name: NormalizedName,
    pub original_name: Option<String>,
    pub code: Option<String>,
    pub origin_year: CohortYear,
    pub classification: Classification,
    pub repeating: bool,
    pub qualitative: Option<Qualitative>,
    /// Valuation text as entered, or the consolidated valuation for groups.
    pub valuation: String,
    pub performance: String,
    pub observations: String,
    #[serde(flatten)]
    pub placement: Placement,
}

impl OrderedSubject for BimesterRow {
    fn order_label(&self) -> &str {
        &self.display_name
    }

    fn sort_label(&self) -> &str {
        self.canonical_name.as_str()
    }

    fn origin_year(&self) -> Option<CohortYear> {
        Some(self.origin_year)
    }

    fn is_repeating(&self) -> bool {
        self.repeating
    }

    fn set_placement(&mut self, placement: Placement) {
        self.placement = placement;
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BimesterReport {
    pub student_id: String,
    pub display_name: String,
    pub cohort_year: CohortYear,
    pub bimester: u8,
    pub rows: Vec<BimesterRow>,
    pub diagnostics: Diagnostics,
}

fn check_bimester(bimester: u8) -> Result<(), EngineError> {
    if BIMESTERS.contains(&bimester) {
        Ok(())
    } else {
        Err(EngineError::BadParams(format!(
            "bimester must be between 1 and 4, got {bimester}"
        )))
    }
}

/// Builds the valuation report for one bimester (1 to 4).
///
/// A group appears when the student has a grade row for any member. An
/// ungrouped subject appears only when its bimester valuation is filled in.
pub fn build_bimester_report(
    catalog: &SubjectCatalog,
    input: &ReportInput,
    bimester: u8,
) -> Result<BimesterReport, EngineError> {
    check_bimester(bimester)?;

    let mut diagnostics = Diagnostics::new();
    let student = &input.student;
    let year = student.cohort_year;
    let curriculum = &input.curriculum;
    let exemptions = ExemptionSet::for_student(&student.id, &input.exemptions);
    let records = input.reportable_grades();
    let record_for = |subject_id: &str| records.iter().copied().find(|r| r.subject_id == subject_id);
    let blank = BimesterGrade {
        bimester,
        ..BimesterGrade::default()
    };

    let mut rows: Vec<BimesterRow> = Vec::new();
    let mut grouped: HashSet<&str> = HashSet::new();

    for (group, members) in current_groups(curriculum, year) {
        let entries: Vec<(&SubjectInstance, &BimesterGrade)> = members
            .iter()
            .filter_map(|m| {
                let record = record_for(&m.id)?;
                Some((*m, record.bimester(bimester).unwrap_or(&blank)))
            })
            .collect();
        grouped.extend(entries.iter().map(|&(m, _)| m.id.as_str()));
        let Some(summary) = calc::consolidate_bimester(&entries) else {
            continue;
        };
        let BimesterSummary {
            qualitative,
            performance,
            observations,
        } = summary;
        let status = classify::classify_group(members.iter().copied(), &exemptions);
        rows.push(BimesterRow {
            kind: BimesterRowKind::Group,
            id: group.id.clone(),
            canonical_name: normalize(catalog, &group.display_name),
            display_name: group.display_name.clone(),
            original_name: None,
            code: group.code.clone(),
            origin_year: year,
            classification: status.classification,
            repeating: false,
            qualitative,
            valuation: qualitative.map(|q| q.as_str().to_string()).unwrap_or_default(),
            performance,
            observations,
            placement: Placement::default(),
        });
    }

    for record in &records {
        if grouped.contains(record.subject_id.as_str()) {
            continue;
        }
        let Some(entry) = record.bimester(bimester) else {
            continue;
        };
        let valuation = entry.qualitative.as_deref().map(str::trim).unwrap_or_default();
        if valuation.is_empty() {
            continue;
        }
        let Some(instance) = curriculum.instance(&record.subject_id) else {
            diagnostics.push(Diagnostic::OrphanGrade {
                subject_id: record.subject_id.clone(),
            });
            continue;
        };
        let shown = present(curriculum, instance);
        rows.push(BimesterRow {
            kind: BimesterRowKind::Individual,
            id: instance.id.clone(),
            canonical_name: normalize(catalog, &shown.display_name),
            display_name: shown.display_name,
            original_name: shown.original_name,
            code: shown.code,
            origin_year: classify::origin_year(instance, year),
            classification: classify::classify_instance(instance, year, &exemptions),
            repeating: classify::is_repeating(instance, year),
            qualitative: Qualitative::parse(valuation),
            valuation: valuation.to_string(),
            performance: entry
                .performance
                .as_deref()
                .map(str::trim)
                .unwrap_or_default()
                .to_string(),
            observations: entry
                .observations
                .as_deref()
                .map(str::trim)
                .unwrap_or_default()
                .to_string(),
            placement: Placement::default(),
        });
    }

    let rows = order_subjects(catalog, rows, year, &mut diagnostics);

    Ok(BimesterReport {
        student_id: student.id.clone(),
        display_name: student.display_name.clone(),
        cohort_year: year,
        bimester,
        rows,
        diagnostics,
    })
}

/// Loads the student's data from `provider` and builds the term report card.
pub fn generate_report_card(
    provider: &dyn DataProvider,
    catalog: &SubjectCatalog,
    student_id: &str,
) -> Result<ReportCard, EngineError> {
    let input = ReportInput::load(provider, student_id)?;
    Ok(build_report_card(catalog, &input))
}

pub fn generate_bimester_report(
    provider: &dyn DataProvider,
    catalog: &SubjectCatalog,
    student_id: &str,
    bimester: u8,
) -> Result<BimesterReport, EngineError> {
    check_bimester(bimester)?;
    let input = ReportInput::load(provider, student_id)?;
    build_bimester_report(catalog, &input, bimester)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CombinationRule, GradeField, Term, NOTE_EXEMPTED, NOTE_NO_DATA};

    fn subject(id: &str, label: &str, year: i32, group: Option<&str>) -> SubjectInstance {
        SubjectInstance {
            id: id.into(),
            raw_label: label.into(),
            cohort_year: Some(year),
            code: None,
            group_id: group.map(str::to_string),
        }
    }

    fn grade(subject_id: &str, first: &str, second: &str) -> GradeRecord {
        GradeRecord {
            student_id: "s1".into(),
            subject_id: subject_id.into(),
            enrollment: Some("C".into()),
            first_term: Some(first.into()),
            second_term: Some(second.into()),
            ..GradeRecord::default()
        }
    }

    fn second_year_input() -> ReportInput {
        let curriculum = Curriculum::new(
            vec![
                subject("mat2", "Matematica", 2, None),
                subject("bio2", "Biologia", 2, None),
                subject("ing2", "Ingles", 2, None),
                subject("mad2", "Maderas", 2, Some("proc2")),
                subject("met2", "Metales", 2, Some("proc2")),
                subject("mat1", "Matemática", 1, None),
                subject("len1", "Lengua", 1, None),
                subject("tal1", "Taller de electricidad", 1, Some("proc1")),
                subject("rob2", "Robotica", 2, None),
            ],
            vec![
                SubjectGroup {
                    id: "proc2".into(),
                    display_name: "Procedimientos Técnicos".into(),
                    code: Some("PT2".into()),
                    cohort_year: 2,
                    combination_rule: CombinationRule::default(),
                },
                SubjectGroup {
                    id: "proc1".into(),
                    display_name: "Procedimientos Técnicos".into(),
                    code: Some("PT1".into()),
                    cohort_year: 1,
                    combination_rule: CombinationRule::default(),
                },
            ],
        );
        let mut mad = grade("mad2", "8", "9");
        mad.qualitative_first_term = Some("TEA".into());
        let mut met = grade("met2", "5", "7");
        met.qualitative_first_term = Some("TEP".into());
        met.observations = Some("Debe practicar soldadura".into());
        let mut pending = grade("mat1", "4", "");
        pending.enrollment = Some("R".into());
        let mut withdrawn = grade("len1", "9", "9");
        withdrawn.enrollment = Some("E".into());
        let mut ing = grade("ing2", "", "");
        ing.bimesters.push(BimesterGrade {
            bimester: 1,
            qualitative: Some("TEP".into()),
            performance: Some("Regular".into()),
            observations: None,
        });
        ReportInput {
            student: Student {
                id: "s1".into(),
                display_name: "Pérez, Ana".into(),
                cohort_year: 2,
            },
            curriculum,
            grades: vec![
                grade("mat2", "7", "8"),
                grade("bio2", "x", "6"),
                ing,
                mad,
                met,
                pending,
                withdrawn,
                grade("tal1", "6", "8"),
                grade("rob2", "", ""),
                grade("ghost", "7", "7"),
            ],
            exemptions: vec![ExemptionRecord {
                student_id: "s1".into(),
                subject_id: "rob2".into(),
            }],
        }
    }

    fn names(card: &ReportCard) -> Vec<&str> {
        card.rows.iter().map(|r| r.display_name()).collect()
    }

    #[test]
    fn report_card_orders_groups_and_subjects_together() {
        let card = build_report_card(&SubjectCatalog::builtin(), &second_year_input());
        assert_eq!(
            names(&card),
            vec![
                "Biologia",
                "Ingles",
                "Matematica",
                "Procedimientos Técnicos",
                "Robotica",
                "Matemática",
                "Procedimientos Técnicos",
            ]
        );
    }

    #[test]
    fn current_group_is_aggregated() {
        let card = build_report_card(&SubjectCatalog::builtin(), &second_year_input());
        let ReportRow::Group(group) = &card.rows[3] else {
            panic!("expected group row, got {:?}", card.rows[3]);
        };
        assert_eq!(group.aggregate.grades.first_term, Some(5));
        assert_eq!(group.aggregate.grades.second_term, Some(8));
        assert_eq!(group.aggregate.qualitative_first_term, Some(Qualitative::Tep));
        assert_eq!(
            group.aggregate.observations,
            "Metales: Debe practicar soldadura"
        );
        assert_eq!(group.member_names, vec!["Maderas", "Metales"]);
        assert_eq!(group.classification, Classification::Current);
        assert_eq!(group.placement.rank, Some(10));
        assert_eq!(card.rows[3].failing_fields(), vec![GradeField::FirstTerm]);
    }

    #[test]
    fn earlier_year_group_member_shows_under_group_name() {
        let card = build_report_card(&SubjectCatalog::builtin(), &second_year_input());
        let ReportRow::Individual(row) = &card.rows[6] else {
            panic!("expected individual row");
        };
        assert_eq!(row.subject_id, "tal1");
        assert_eq!(row.original_name.as_deref(), Some("Taller de electricidad"));
        assert_eq!(row.code.as_deref(), Some("PT1"));
        assert_eq!(row.classification, Classification::Repeating);
        assert_eq!(row.origin_year, 1);
    }

    #[test]
    fn individual_valuations_are_derived_or_taken_from_bimester() {
        let card = build_report_card(&SubjectCatalog::builtin(), &second_year_input());
        let mat = &card.rows[2];
        assert_eq!(mat.qualitative(Term::First), Some(Qualitative::Tea));
        assert_eq!(mat.display_note(), "-");
        let ing = &card.rows[1];
        assert_eq!(ing.qualitative(Term::First), Some(Qualitative::Tep));
        assert_eq!(ing.qualitative(Term::Second), None);
        let pending = &card.rows[5];
        assert_eq!(pending.qualitative(Term::First), Some(Qualitative::Tep));
        assert!(pending.is_repeating());
    }

    #[test]
    fn exempted_and_empty_rows_get_notes() {
        let card = build_report_card(&SubjectCatalog::builtin(), &second_year_input());
        let rob = &card.rows[4];
        assert_eq!(rob.classification(), Classification::Exempted);
        assert_eq!(rob.display_note(), NOTE_EXEMPTED);
        assert!(!rob.has_any_data());

        let mut input = second_year_input();
        input.exemptions.clear();
        let card = build_report_card(&SubjectCatalog::builtin(), &input);
        assert_eq!(card.rows[4].display_note(), NOTE_NO_DATA);
    }

    #[test]
    fn diagnostics_cover_bad_input() {
        let card = build_report_card(&SubjectCatalog::builtin(), &second_year_input());
        let diags = card.diagnostics.as_slice();
        assert!(diags.contains(&Diagnostic::InconsistentGradeInput {
            subject_id: "bio2".into(),
            field: GradeField::FirstTerm,
            value: "x".into(),
        }));
        assert!(diags.contains(&Diagnostic::OrphanGrade {
            subject_id: "ghost".into()
        }));
        assert!(diags.contains(&Diagnostic::ResolutionFailure {
            label: "Robotica".into(),
            cohort_year: 2,
        }));
        assert!(!names(&card).contains(&"Lengua"));
    }

    #[test]
    fn exempted_member_marks_group_exempted() {
        let mut input = second_year_input();
        input.exemptions.push(ExemptionRecord {
            student_id: "s1".into(),
            subject_id: "met2".into(),
        });
        let card = build_report_card(&SubjectCatalog::builtin(), &input);
        let ReportRow::Group(group) = &card.rows[3] else {
            panic!("expected group row");
        };
        assert_eq!(group.classification, Classification::Exempted);
        assert_eq!(group.exempted_members, vec!["Metales"]);
    }

    #[test]
    fn bimester_report_lists_groups_and_filled_subjects() {
        let mut input = second_year_input();
        for rec in input.grades.iter_mut() {
            if rec.subject_id == "mad2" || rec.subject_id == "met2" {
                rec.bimesters.push(BimesterGrade {
                    bimester: 1,
                    qualitative: Some(if rec.subject_id == "mad2" { "TEA" } else { "TED" }.into()),
                    performance: Some("Bueno".into()),
                    observations: None,
                });
            }
        }
        let report = build_bimester_report(&SubjectCatalog::builtin(), &input, 1).expect("report");
        let names: Vec<&str> = report.rows.iter().map(|r| r.display_name.as_str()).collect();
        assert_eq!(names, vec!["Ingles", "Procedimientos Técnicos"]);
        assert_eq!(report.rows[1].qualitative, Some(Qualitative::Ted));
        assert_eq!(report.rows[1].performance, "Bueno");
        assert_eq!(report.rows[0].valuation, "TEP");

        let report = build_bimester_report(&SubjectCatalog::builtin(), &input, 2).expect("report");
        assert_eq!(report.rows.len(), 1);
        assert_eq!(report.rows[0].kind, BimesterRowKind::Group);
        assert_eq!(report.rows[0].qualitative, None);
        assert_eq!(report.rows[0].valuation, "");
    }

    #[test]
    fn bimester_out_of_range_is_rejected() {
        let err = build_bimester_report(&SubjectCatalog::builtin(), &second_year_input(), 5)
            .expect_err("bimester 5");
        assert_eq!(err.code(), "bad_params");
    }
}

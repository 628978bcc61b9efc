use std::collections::HashSet;

use crate::model::{Classification, CohortYear, ExemptionRecord, SubjectInstance};

/// Subjects a student is exempted from. Exemptions are per instance.
#[derive(Debug, Clone, Default)]
pub struct ExemptionSet {
    subject_ids: HashSet<String>,
}

impl ExemptionSet {
    pub fn for_student<'a>(
        student_id: &str,
        records: impl IntoIterator<Item = &'a ExemptionRecord>,
    ) -> Self {
        let subject_ids = records
            .into_iter()
            .filter(|r| r.student_id == student_id)
            .map(|r| r.subject_id.clone())
            .collect();
        Self { subject_ids }
    }

    pub fn contains(&self, subject_id: &str) -> bool {
        self.subject_ids.contains(subject_id)
    }
}

/// An instance with no cohort year counts as belonging to the student's year.
pub fn origin_year(instance: &SubjectInstance, student_year: CohortYear) -> CohortYear {
    instance.cohort_year.unwrap_or(student_year)
}

pub fn is_repeating(instance: &SubjectInstance, student_year: CohortYear) -> bool {
    student_year > origin_year(instance, student_year)
}

pub fn classify_instance(
    instance: &SubjectInstance,
    student_year: CohortYear,
    exemptions: &ExemptionSet,
) -> Classification {
    if exemptions.contains(&instance.id) {
        Classification::Exempted
    } else if is_repeating(instance, student_year) {
        Classification::Repeating
    } else {
        Classification::Current
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupClassification {
    pub classification: Classification,
    pub exempted_members: Vec<String>,
}

/// Groups are never repeating. A group is exempted when any member is, and
/// the exempted members are listed by label.
pub fn classify_group<'a>(
    members: impl IntoIterator<Item = &'a SubjectInstance>,
    exemptions: &ExemptionSet,
) -> GroupClassification {
    let exempted_members: Vec<String> = members
        .into_iter()
        .filter(|m| exemptions.contains(&m.id))
        .map(|m| m.raw_label.clone())
        .collect();
    let classification = if exempted_members.is_empty() {
        Classification::Current
    } else {
        Classification::Exempted
    };
    GroupClassification {
        classification,
        exempted_members,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(id: &str, year: Option<i32>) -> SubjectInstance {
        SubjectInstance {
            id: id.to_string(),
            raw_label: format!("Materia {id}"),
            cohort_year: year,
            code: None,
            group_id: None,
        }
    }

    fn exemptions(ids: &[&str]) -> ExemptionSet {
        let records: Vec<ExemptionRecord> = ids
            .iter()
            .map(|id| ExemptionRecord {
                student_id: "s1".into(),
                subject_id: id.to_string(),
            })
            .collect();
        ExemptionSet::for_student("s1", &records)
    }

    #[test]
    fn earlier_cohort_is_repeating() {
        let none = ExemptionSet::default();
        assert_eq!(classify_instance(&instance("a", Some(2)), 3, &none), Classification::Repeating);
        assert_eq!(classify_instance(&instance("a", Some(3)), 3, &none), Classification::Current);
        assert_eq!(classify_instance(&instance("a", None), 3, &none), Classification::Current);
    }

    #[test]
    fn exemption_wins_over_repeating() {
        let ex = exemptions(&["a"]);
        let subject = instance("a", Some(1));
        assert_eq!(classify_instance(&subject, 3, &ex), Classification::Exempted);
        assert!(is_repeating(&subject, 3));
    }

    #[test]
    fn exemptions_are_scoped_to_the_student() {
        let records = vec![ExemptionRecord {
            student_id: "other".into(),
            subject_id: "a".into(),
        }];
        let ex = ExemptionSet::for_student("s1", &records);
        assert!(!ex.contains("a"));
    }

    #[test]
    fn group_exempted_when_any_member_is() {
        let members = [instance("a", Some(1)), instance("b", Some(1))];
        let ex = exemptions(&["b"]);
        let g = classify_group(&members, &ex);
        assert_eq!(g.classification, Classification::Exempted);
        assert_eq!(g.exempted_members, vec!["Materia b".to_string()]);

        let g = classify_group(&members, &ExemptionSet::default());
        assert_eq!(g.classification, Classification::Current);
        assert!(g.exempted_members.is_empty());
    }
}

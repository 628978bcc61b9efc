use rusqlite::Connection;

use crate::db;
use crate::error::EngineError;
use crate::model::{Curriculum, ExemptionRecord, GradeRecord, Student};

/// Source of the records a report is built from.
pub trait DataProvider {
    fn student(&self, student_id: &str) -> Result<Student, EngineError>;
    fn curriculum(&self) -> Result<Curriculum, EngineError>;
    fn grades(&self, student_id: &str) -> Result<Vec<GradeRecord>, EngineError>;
    fn exemptions(&self, student_id: &str) -> Result<Vec<ExemptionRecord>, EngineError>;
}

/// Reads from a workspace database opened with [`db::open_db`].
pub struct SqliteProvider<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteProvider<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl DataProvider for SqliteProvider<'_> {
    fn student(&self, student_id: &str) -> Result<Student, EngineError> {
        db::load_student(self.conn, student_id)
            .map_err(|e| EngineError::provider("student", e))?
            .ok_or_else(|| EngineError::NotFound {
                kind: "student",
                id: student_id.to_string(),
            })
    }

    fn curriculum(&self) -> Result<Curriculum, EngineError> {
        db::load_curriculum(self.conn).map_err(|e| EngineError::provider("curriculum", e))
    }

    fn grades(&self, student_id: &str) -> Result<Vec<GradeRecord>, EngineError> {
        db::load_grades(self.conn, student_id).map_err(|e| EngineError::provider("grades", e))
    }

    fn exemptions(&self, student_id: &str) -> Result<Vec<ExemptionRecord>, EngineError> {
        db::load_exemptions(self.conn, student_id)
            .map_err(|e| EngineError::provider("exemptions", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SubjectCatalog;
    use crate::report::generate_report_card;

    struct BrokenGrades;

    impl DataProvider for BrokenGrades {
        fn student(&self, student_id: &str) -> Result<Student, EngineError> {
            Ok(Student {
                id: student_id.to_string(),
                display_name: "Gómez, Luis".into(),
                cohort_year: 1,
            })
        }
        fn curriculum(&self) -> Result<Curriculum, EngineError> {
            Ok(Curriculum::default())
        }
        fn grades(&self, _student_id: &str) -> Result<Vec<GradeRecord>, EngineError> {
            Err(EngineError::provider(
                "grades",
                std::io::Error::other("grade sheet unavailable"),
            ))
        }
        fn exemptions(&self, _student_id: &str) -> Result<Vec<ExemptionRecord>, EngineError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn provider_failure_aborts_report() {
        let catalog = SubjectCatalog::builtin();
        let e = generate_report_card(&BrokenGrades, &catalog, "s1").unwrap_err();
        assert_eq!(e.code(), "data_provider_failed");
        assert!(e.to_string().contains("grades"));
    }

    #[test]
    fn unknown_student_is_not_found() {
        let conn = Connection::open_in_memory().expect("memory db");
        conn.execute(
            "CREATE TABLE students(id TEXT PRIMARY KEY, display_name TEXT NOT NULL, cohort_year INTEGER NOT NULL)",
            [],
        )
        .expect("create");
        let provider = SqliteProvider::new(&conn);
        let e = provider.student("ghost").unwrap_err();
        assert_eq!(e.code(), "not_found");
    }

    #[test]
    fn missing_tables_surface_as_provider_errors() {
        let conn = Connection::open_in_memory().expect("memory db");
        let provider = SqliteProvider::new(&conn);
        let e = provider.curriculum().unwrap_err();
        assert_eq!(e.code(), "data_provider_failed");
    }
}

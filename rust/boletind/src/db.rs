use anyhow::{bail, Context};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Transaction};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

use crate::model::{
    BimesterGrade, CombinationRule, Curriculum, ExemptionRecord, GradeRecord, Student,
    SubjectGroup, SubjectInstance,
};
use crate::report::BIMESTERS;

pub const DB_FILE_NAME: &str = "boletin.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            display_name TEXT NOT NULL,
            cohort_year INTEGER NOT NULL,
            updated_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subject_groups(
            id TEXT PRIMARY KEY,
            display_name TEXT NOT NULL,
            code TEXT,
            cohort_year INTEGER NOT NULL,
            updated_at TEXT
        )",
        [],
    )?;
    ensure_subject_groups_combination_rule(&conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            raw_label TEXT NOT NULL,
            cohort_year INTEGER,
            code TEXT,
            group_id TEXT,
            updated_at TEXT,
            FOREIGN KEY(group_id) REFERENCES subject_groups(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subjects_group ON subjects(group_id)",
        [],
    )?;

    // Grades may name subjects that were later removed from the curriculum;
    // reports flag those rows instead of the schema rejecting them.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS grades(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            enrollment TEXT,
            first_term TEXT,
            second_term TEXT,
            remediation_first_term TEXT,
            remediation_december TEXT,
            remediation_february TEXT,
            final_grade TEXT,
            qualitative_first_term TEXT,
            qualitative_second_term TEXT,
            observations TEXT,
            updated_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            UNIQUE(student_id, subject_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grades_student ON grades(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS bimester_grades(
            grade_id TEXT NOT NULL,
            bimester INTEGER NOT NULL,
            qualitative TEXT,
            performance TEXT,
            observations TEXT,
            PRIMARY KEY(grade_id, bimester),
            FOREIGN KEY(grade_id) REFERENCES grades(id) ON DELETE CASCADE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS exemptions(
            student_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            created_at TEXT,
            PRIMARY KEY(student_id, subject_id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;

    Ok(conn)
}

fn ensure_subject_groups_combination_rule(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "subject_groups", "combination_rule")? {
        return Ok(());
    }
    let default_rule = serde_json::to_string(&CombinationRule::default())?;
    conn.execute(
        "ALTER TABLE subject_groups ADD COLUMN combination_rule TEXT",
        [],
    )?;
    conn.execute(
        "UPDATE subject_groups SET combination_rule = ? WHERE combination_rule IS NULL",
        [&default_rule],
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

fn now_ts() -> String {
    Utc::now().to_rfc3339()
}

/// Records accepted by `records.import`. Everything is upserted by id, grade
/// rows by student and subject.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportBatch {
    #[serde(default)]
    pub students: Vec<Student>,
    #[serde(default)]
    pub groups: Vec<SubjectGroup>,
    #[serde(default)]
    pub subjects: Vec<SubjectInstance>,
    #[serde(default)]
    pub grades: Vec<GradeRecord>,
    #[serde(default)]
    pub exemptions: Vec<ExemptionRecord>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub students: usize,
    pub groups: usize,
    pub subjects: usize,
    pub grades: usize,
    pub exemptions: usize,
    pub imported_at: String,
}

pub fn import_records(conn: &mut Connection, batch: &ImportBatch) -> anyhow::Result<ImportSummary> {
    let ts = now_ts();
    let tx = conn.transaction()?;

    for s in &batch.students {
        tx.execute(
            "INSERT INTO students(id, display_name, cohort_year, updated_at)
             VALUES(?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
               display_name = excluded.display_name,
               cohort_year = excluded.cohort_year,
               updated_at = excluded.updated_at",
            (&s.id, &s.display_name, s.cohort_year, &ts),
        )
        .with_context(|| format!("student {}", s.id))?;
    }

    for g in &batch.groups {
        let rule = serde_json::to_string(&g.combination_rule)?;
        tx.execute(
            "INSERT INTO subject_groups(id, display_name, code, cohort_year, combination_rule, updated_at)
             VALUES(?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
               display_name = excluded.display_name,
               code = excluded.code,
               cohort_year = excluded.cohort_year,
               combination_rule = excluded.combination_rule,
               updated_at = excluded.updated_at",
            (&g.id, &g.display_name, &g.code, g.cohort_year, &rule, &ts),
        )
        .with_context(|| format!("group {}", g.id))?;
    }

    for s in &batch.subjects {
        tx.execute(
            "INSERT INTO subjects(id, raw_label, cohort_year, code, group_id, updated_at)
             VALUES(?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
               raw_label = excluded.raw_label,
               cohort_year = excluded.cohort_year,
               code = excluded.code,
               group_id = excluded.group_id,
               updated_at = excluded.updated_at",
            (&s.id, &s.raw_label, s.cohort_year, &s.code, &s.group_id, &ts),
        )
        .with_context(|| format!("subject {}", s.id))?;
    }

    for g in &batch.grades {
        upsert_grade(&tx, g, &ts)
            .with_context(|| format!("grade {}/{}", g.student_id, g.subject_id))?;
    }

    for e in &batch.exemptions {
        tx.execute(
            "INSERT OR IGNORE INTO exemptions(student_id, subject_id, created_at) VALUES(?, ?, ?)",
            (&e.student_id, &e.subject_id, &ts),
        )
        .with_context(|| format!("exemption {}/{}", e.student_id, e.subject_id))?;
    }

    tx.commit()?;

    Ok(ImportSummary {
        students: batch.students.len(),
        groups: batch.groups.len(),
        subjects: batch.subjects.len(),
        grades: batch.grades.len(),
        exemptions: batch.exemptions.len(),
        imported_at: ts,
    })
}

fn upsert_grade(tx: &Transaction<'_>, g: &GradeRecord, ts: &str) -> anyhow::Result<()> {
    for b in &g.bimesters {
        if !BIMESTERS.contains(&b.bimester) {
            bail!("bimester {} out of range", b.bimester);
        }
    }

    let existing: Option<String> = tx
        .query_row(
            "SELECT id FROM grades WHERE student_id = ? AND subject_id = ?",
            (&g.student_id, &g.subject_id),
            |r| r.get(0),
        )
        .optional()?;
    let grade_id = existing.unwrap_or_else(|| Uuid::new_v4().to_string());

    tx.execute(
        "INSERT INTO grades(
            id, student_id, subject_id, enrollment,
            first_term, second_term, remediation_first_term,
            remediation_december, remediation_february, final_grade,
            qualitative_first_term, qualitative_second_term, observations, updated_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
            enrollment = excluded.enrollment,
            first_term = excluded.first_term,
            second_term = excluded.second_term,
            remediation_first_term = excluded.remediation_first_term,
            remediation_december = excluded.remediation_december,
            remediation_february = excluded.remediation_february,
            final_grade = excluded.final_grade,
            qualitative_first_term = excluded.qualitative_first_term,
            qualitative_second_term = excluded.qualitative_second_term,
            observations = excluded.observations,
            updated_at = excluded.updated_at",
        rusqlite::params![
            grade_id,
            g.student_id,
            g.subject_id,
            g.enrollment,
            g.first_term,
            g.second_term,
            g.remediation_first_term,
            g.remediation_december,
            g.remediation_february,
            g.final_grade,
            g.qualitative_first_term,
            g.qualitative_second_term,
            g.observations,
            ts,
        ],
    )?;

    tx.execute("DELETE FROM bimester_grades WHERE grade_id = ?", [&grade_id])?;
    for b in &g.bimesters {
        tx.execute(
            "INSERT INTO bimester_grades(grade_id, bimester, qualitative, performance, observations)
             VALUES(?, ?, ?, ?, ?)",
            (&grade_id, b.bimester, &b.qualitative, &b.performance, &b.observations),
        )?;
    }
    Ok(())
}

pub fn load_student(conn: &Connection, student_id: &str) -> anyhow::Result<Option<Student>> {
    let student = conn
        .query_row(
            "SELECT id, display_name, cohort_year FROM students WHERE id = ?",
            [student_id],
            |r| {
                Ok(Student {
                    id: r.get(0)?,
                    display_name: r.get(1)?,
                    cohort_year: r.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(student)
}

pub fn load_curriculum(conn: &Connection) -> anyhow::Result<Curriculum> {
    let mut stmt = conn.prepare(
        "SELECT id, raw_label, cohort_year, code, group_id FROM subjects ORDER BY rowid",
    )?;
    let instances = stmt
        .query_map([], |r| {
            Ok(SubjectInstance {
                id: r.get(0)?,
                raw_label: r.get(1)?,
                cohort_year: r.get(2)?,
                code: r.get(3)?,
                group_id: r.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut stmt = conn.prepare(
        "SELECT id, display_name, code, cohort_year, combination_rule
         FROM subject_groups ORDER BY rowid",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, Option<String>>(2)?,
                r.get::<_, i32>(3)?,
                r.get::<_, Option<String>>(4)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    let mut groups = Vec::with_capacity(rows.len());
    for (id, display_name, code, cohort_year, rule_json) in rows {
        let combination_rule = match rule_json.as_deref() {
            Some(text) => serde_json::from_str(text)
                .with_context(|| format!("combination rule of group {id}"))?,
            None => CombinationRule::default(),
        };
        groups.push(SubjectGroup {
            id,
            display_name,
            code,
            cohort_year,
            combination_rule,
        });
    }

    Ok(Curriculum::new(instances, groups))
}

pub fn load_grades(conn: &Connection, student_id: &str) -> anyhow::Result<Vec<GradeRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, student_id, subject_id, enrollment,
                first_term, second_term, remediation_first_term,
                remediation_december, remediation_february, final_grade,
                qualitative_first_term, qualitative_second_term, observations
         FROM grades WHERE student_id = ? ORDER BY rowid",
    )?;
    let rows = stmt
        .query_map([student_id], |r| {
            let id: String = r.get(0)?;
            Ok((
                id,
                GradeRecord {
                    student_id: r.get(1)?,
                    subject_id: r.get(2)?,
                    enrollment: r.get(3)?,
                    first_term: r.get(4)?,
                    second_term: r.get(5)?,
                    remediation_first_term: r.get(6)?,
                    remediation_december: r.get(7)?,
                    remediation_february: r.get(8)?,
                    final_grade: r.get(9)?,
                    qualitative_first_term: r.get(10)?,
                    qualitative_second_term: r.get(11)?,
                    observations: r.get(12)?,
                    bimesters: Vec::new(),
                },
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut bim_stmt = conn.prepare(
        "SELECT bimester, qualitative, performance, observations
         FROM bimester_grades WHERE grade_id = ? ORDER BY bimester",
    )?;
    let mut out = Vec::with_capacity(rows.len());
    for (grade_id, mut record) in rows {
        record.bimesters = bim_stmt
            .query_map([&grade_id], |r| {
                Ok(BimesterGrade {
                    bimester: r.get(0)?,
                    qualitative: r.get(1)?,
                    performance: r.get(2)?,
                    observations: r.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        out.push(record);
    }
    Ok(out)
}

pub fn load_exemptions(conn: &Connection, student_id: &str) -> anyhow::Result<Vec<ExemptionRecord>> {
    let mut stmt = conn.prepare(
        "SELECT student_id, subject_id FROM exemptions WHERE student_id = ? ORDER BY rowid",
    )?;
    let rows = stmt
        .query_map([student_id], |r| {
            Ok(ExemptionRecord {
                student_id: r.get(0)?,
                subject_id: r.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_workspace(prefix: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!(
            "{}-{}",
            prefix,
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ))
    }

    fn batch() -> ImportBatch {
        serde_json::from_value(serde_json::json!({
            "students": [{ "id": "s1", "displayName": "Pérez, Ana", "cohortYear": 2 }],
            "groups": [{
                "id": "g1", "displayName": "Procedimientos Técnicos", "cohortYear": 2,
                "combinationRule": { "kind": "minimum" }
            }],
            "subjects": [
                { "id": "m1", "rawLabel": "Maderas", "cohortYear": 2, "groupId": "g1" },
                { "id": "m2", "rawLabel": "Ingles", "cohortYear": 2 }
            ],
            "grades": [{
                "studentId": "s1", "subjectId": "m2", "enrollment": "C",
                "firstTerm": 7, "secondTerm": "8",
                "bimesters": [{ "bimester": 1, "qualitative": "TEA", "performance": "Bueno" }]
            }],
            "exemptions": [{ "studentId": "s1", "subjectId": "m1" }]
        }))
        .expect("parse batch")
    }

    #[test]
    fn import_then_load_round_trips_records() {
        let ws = temp_workspace("boletind-db-import");
        let mut conn = open_db(&ws).expect("open db");
        let summary = import_records(&mut conn, &batch()).expect("import");
        assert_eq!(summary.grades, 1);

        let student = load_student(&conn, "s1").expect("query").expect("student");
        assert_eq!(student.cohort_year, 2);
        assert!(load_student(&conn, "nobody").expect("query").is_none());

        let curriculum = load_curriculum(&conn).expect("curriculum");
        assert_eq!(curriculum.instances().len(), 2);
        assert_eq!(curriculum.groups()[0].combination_rule, CombinationRule::Minimum);

        let grades = load_grades(&conn, "s1").expect("grades");
        assert_eq!(grades.len(), 1);
        assert_eq!(grades[0].first_term.as_deref(), Some("7"));
        assert_eq!(grades[0].bimesters.len(), 1);
        assert_eq!(grades[0].bimesters[0].performance.as_deref(), Some("Bueno"));

        assert_eq!(load_exemptions(&conn, "s1").expect("exemptions").len(), 1);
    }

    #[test]
    fn reimport_updates_in_place() {
        let ws = temp_workspace("boletind-db-reimport");
        let mut conn = open_db(&ws).expect("open db");
        import_records(&mut conn, &batch()).expect("first import");

        let mut second = batch();
        second.grades[0].first_term = Some("9".into());
        second.grades[0].bimesters.clear();
        import_records(&mut conn, &second).expect("second import");

        let grades = load_grades(&conn, "s1").expect("grades");
        assert_eq!(grades.len(), 1);
        assert_eq!(grades[0].first_term.as_deref(), Some("9"));
        assert!(grades[0].bimesters.is_empty());
    }

    #[test]
    fn out_of_range_bimester_aborts_import() {
        let ws = temp_workspace("boletind-db-bad-bimester");
        let mut conn = open_db(&ws).expect("open db");
        let mut bad = batch();
        bad.grades[0].bimesters[0].bimester = 7;
        assert!(import_records(&mut conn, &bad).is_err());
        assert!(load_student(&conn, "s1").expect("query").is_none());
    }

    #[test]
    fn reopening_existing_workspace_is_idempotent() {
        let ws = temp_workspace("boletind-db-reopen");
        drop(open_db(&ws).expect("first open"));
        let conn = open_db(&ws).expect("second open");
        assert!(table_has_column(&conn, "subject_groups", "combination_rule").expect("pragma"));
    }
}

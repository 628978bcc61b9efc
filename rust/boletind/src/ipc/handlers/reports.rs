use crate::error::EngineError;
use crate::ipc::error::{engine_err, err, ok};
use crate::ipc::helpers::{db_conn, required_i64, required_str};
use crate::ipc::types::{AppState, Request};
use crate::model::ReportRow;
use crate::provider::SqliteProvider;
use crate::report::{generate_bimester_report, generate_report_card};
use serde_json::json;

fn report_failed(req: &Request, e: &EngineError) -> serde_json::Value {
    if let EngineError::DataProvider { .. } = e {
        tracing::error!(method = %req.method, error = %e, "report aborted");
    }
    engine_err(&req.id, e)
}

/// Row JSON plus the values a renderer needs but the row does not store.
fn row_json(row: &ReportRow) -> serde_json::Value {
    let mut v = json!(row);
    if let Some(obj) = v.as_object_mut() {
        obj.insert("displayNote".into(), json!(row.display_note()));
        obj.insert("hasAnyData".into(), json!(row.has_any_data()));
        obj.insert("failingFields".into(), json!(row.failing_fields()));
    }
    v
}

fn handle_report_card(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let provider = SqliteProvider::new(conn);
    match generate_report_card(&provider, &state.catalog, &student_id) {
        Ok(card) => {
            if !card.diagnostics.is_empty() {
                tracing::info!(
                    student_id = %card.student_id,
                    count = card.diagnostics.as_slice().len(),
                    "report card built with diagnostics"
                );
            }
            let rows: Vec<serde_json::Value> = card.rows.iter().map(row_json).collect();
            ok(
                &req.id,
                json!({
                    "studentId": card.student_id,
                    "displayName": card.display_name,
                    "cohortYear": card.cohort_year,
                    "rows": rows,
                    "diagnostics": card.diagnostics,
                }),
            )
        }
        Err(e) => report_failed(req, &e),
    }
}

fn handle_bimester(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let raw = match required_i64(req, "bimester") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Ok(bimester) = u8::try_from(raw) else {
        return err(
            &req.id,
            "bad_params",
            "bimester must be between 1 and 4",
            Some(json!({ "bimester": raw })),
        );
    };

    let provider = SqliteProvider::new(conn);
    match generate_bimester_report(&provider, &state.catalog, &student_id, bimester) {
        Ok(report) => ok(&req.id, json!(report)),
        Err(e) => report_failed(req, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.reportCard" => Some(handle_report_card(state, req)),
        "reports.bimester" => Some(handle_bimester(state, req)),
        _ => None,
    }
}

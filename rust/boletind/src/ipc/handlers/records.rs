use crate::db::{self, ImportBatch};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::db_conn_mut;
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_records_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn_mut(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let batch: ImportBatch = match serde_json::from_value(req.params.clone()) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "bad_params", format!("invalid import batch: {e}"), None),
    };
    match db::import_records(conn, &batch) {
        Ok(summary) => {
            tracing::info!(
                students = summary.students,
                subjects = summary.subjects,
                grades = summary.grades,
                "records imported"
            );
            ok(&req.id, json!(summary))
        }
        Err(e) => err(&req.id, "import_failed", format!("{e:#}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "records.import" => Some(handle_records_import(state, req)),
        _ => None,
    }
}

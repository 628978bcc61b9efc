use crate::equivalence::{match_stage, resolve_to_canonical};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{optional_i64, required_i64, required_str};
use crate::ipc::types::{AppState, Request};
use crate::model::CohortYear;
use crate::normalize::normalize;
use serde_json::json;

fn cohort_year(req: &Request, raw: i64) -> Result<CohortYear, serde_json::Value> {
    CohortYear::try_from(raw).map_err(|_| {
        err(
            &req.id,
            "bad_params",
            "cohortYear out of range",
            Some(json!({ "cohortYear": raw })),
        )
    })
}

fn handle_normalize(state: &mut AppState, req: &Request) -> serde_json::Value {
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let normalized = normalize(&state.catalog, &name);
    ok(
        &req.id,
        json!({
            "normalized": normalized.as_str(),
            "folded": normalized.folded(),
        }),
    )
}

fn handle_equivalent(state: &mut AppState, req: &Request) -> serde_json::Value {
    let a = match required_str(req, "a") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let b = match required_str(req, "b") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let stage = match_stage(&state.catalog, &a, &b);
    ok(
        &req.id,
        json!({
            "equivalent": stage.is_some(),
            "stage": stage,
        }),
    )
}

fn candidate_list(req: &Request) -> Result<Option<Vec<String>>, serde_json::Value> {
    let Some(v) = req.params.get("candidates") else {
        return Ok(None);
    };
    if v.is_null() {
        return Ok(None);
    }
    let Some(arr) = v.as_array() else {
        return Err(err(&req.id, "bad_params", "candidates must be an array of strings", None));
    };
    arr.iter()
        .map(|c| c.as_str().map(str::to_string))
        .collect::<Option<Vec<_>>>()
        .map(Some)
        .ok_or_else(|| err(&req.id, "bad_params", "candidates must be an array of strings", None))
}

/// Explicit candidates win, then the cohort's ordering table, then every
/// principal name of the equivalence table.
fn handle_resolve(state: &mut AppState, req: &Request) -> serde_json::Value {
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let explicit = match candidate_list(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let year = match optional_i64(req, "cohortYear") {
        Ok(Some(raw)) => match cohort_year(req, raw) {
            Ok(y) => Some(y),
            Err(e) => return e,
        },
        Ok(None) => None,
        Err(e) => return e,
    };

    let catalog = &state.catalog;
    let candidates: Vec<String> = match (explicit, year) {
        (Some(list), _) => list,
        (None, Some(y)) => catalog.cohort_order(y).to_vec(),
        (None, None) => catalog.principal_names(),
    };

    match resolve_to_canonical(catalog, &name, &candidates) {
        Some(res) => ok(
            &req.id,
            json!({
                "canonical": res.candidate,
                "index": res.index,
                "stage": res.stage,
            }),
        ),
        None => {
            tracing::debug!(%name, "no candidate matched");
            ok(
                &req.id,
                json!({ "canonical": null, "index": null, "stage": null }),
            )
        }
    }
}

fn handle_order(state: &mut AppState, req: &Request) -> serde_json::Value {
    let raw = match required_i64(req, "cohortYear") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let year = match cohort_year(req, raw) {
        Ok(y) => y,
        Err(e) => return e,
    };
    let entries = state.catalog.cohort_order(year);
    let years: Vec<CohortYear> = state.catalog.cohort_years().collect();
    ok(
        &req.id,
        json!({
            "cohortYear": year,
            "configured": !entries.is_empty(),
            "entries": entries,
            "configuredYears": years,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "subjects.normalize" => Some(handle_normalize(state, req)),
        "subjects.equivalent" => Some(handle_equivalent(state, req)),
        "subjects.resolve" => Some(handle_resolve(state, req)),
        "subjects.order" => Some(handle_order(state, req)),
        _ => None,
    }
}

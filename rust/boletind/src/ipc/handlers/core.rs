use crate::catalog::{self, SubjectCatalog};
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string())
        }),
    )
}

struct LoadedCatalog {
    catalog: Arc<SubjectCatalog>,
    source: &'static str,
    warning: Option<String>,
}

/// Loads the workspace catalog, falling back to the built-in one.
fn load_catalog(workspace: &Path) -> LoadedCatalog {
    match SubjectCatalog::load_workspace(workspace) {
        Ok(Some(c)) => {
            tracing::info!(rules = c.rewrite_rule_count(), "loaded workspace catalog");
            LoadedCatalog {
                catalog: Arc::new(c),
                source: "workspace",
                warning: None,
            }
        }
        Ok(None) => LoadedCatalog {
            catalog: catalog::shared_builtin(),
            source: "builtin",
            warning: None,
        },
        Err(e) => {
            tracing::warn!(error = %e, "ignoring invalid {}", catalog::CATALOG_FILE_NAME);
            LoadedCatalog {
                catalog: catalog::shared_builtin(),
                source: "builtin",
                warning: Some(e.to_string()),
            }
        }
    }
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    match db::open_db(&path) {
        Ok(conn) => {
            // A bad catalog file must not prevent the workspace from opening.
            let loaded = load_catalog(&path);
            state.workspace = Some(path.clone());
            state.db = Some(conn);
            state.catalog = loaded.catalog;
            tracing::info!(workspace = %path.display(), catalog = loaded.source, "workspace selected");
            ok(
                &req.id,
                json!({
                    "workspacePath": path.to_string_lossy(),
                    "catalog": loaded.source,
                    "catalogWarning": loaded.warning,
                }),
            )
        }
        Err(e) => {
            tracing::error!(error = ?e, "failed to open workspace database");
            err(&req.id, "db_open_failed", format!("{e:?}"), None)
        }
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        _ => None,
    }
}

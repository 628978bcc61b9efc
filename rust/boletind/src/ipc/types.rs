use std::path::PathBuf;
use std::sync::Arc;

use rusqlite::Connection;
use serde::Deserialize;

use crate::catalog::{self, SubjectCatalog};

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    /// Replaced when a workspace with its own `catalog.json` is selected.
    pub catalog: Arc<SubjectCatalog>,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            workspace: None,
            db: None,
            catalog: catalog::shared_builtin(),
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

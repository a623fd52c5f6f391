use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

/// One request per stdin line: `{ "id", "method", "params" }`.
#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Daemon state. `db` is None until `workspace.select` opens the roster
/// database; handlers that need storage report `no_workspace` before then.
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
}

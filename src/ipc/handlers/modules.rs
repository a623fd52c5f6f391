use crate::db;
use crate::domain::Module;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn module_json(m: &Module) -> serde_json::Value {
    json!({
        "id": m.id,
        "code": m.code,
        "name": m.name,
        "mnc": m.mnc,
    })
}

fn handle_modules_submit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let code = match req.params.get("code").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing code", None),
    };
    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing name", None),
    };
    let mnc = req
        .params
        .get("mnc")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    // Upsert by code: an existing module keeps its id and gets new fields.
    match db::submit_module(conn, &code, &name, mnc) {
        Ok(module) => ok(&req.id, json!({ "module": module_json(&module) })),
        Err(e) => err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "modules" })),
        ),
    }
}

fn handle_modules_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "modules": [] }));
    };

    match db::list_modules(conn) {
        Ok(modules) => ok(
            &req.id,
            json!({ "modules": modules.iter().map(module_json).collect::<Vec<_>>() }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_modules_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let code = match req.params.get("code").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing code", None),
    };

    match db::find_module_by_code(conn, &code) {
        Ok(Some(module)) => ok(&req.id, json!({ "module": module_json(&module) })),
        Ok(None) => err(&req.id, "not_found", "module not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_modules_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let code = match req.params.get("code").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing code", None),
    };

    let module = match db::find_module_by_code(conn, &code) {
        Ok(Some(m)) => m,
        Ok(None) => return err(&req.id, "not_found", "module not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Explicit delete in dependency order (no ON DELETE CASCADE).
    for (table, sql) in [
        ("grades", "DELETE FROM grades WHERE module_id = ?"),
        (
            "registrations",
            "DELETE FROM registrations WHERE module_id = ?",
        ),
        ("modules", "DELETE FROM modules WHERE id = ?"),
    ] {
        if let Err(e) = tx.execute(sql, [&module.id]) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": table })),
            );
        }
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_tx_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "deleted": true, "code": code }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "modules.submit" => Some(handle_modules_submit(state, req)),
        "modules.list" => Some(handle_modules_list(state, req)),
        "modules.get" => Some(handle_modules_get(state, req)),
        "modules.delete" => Some(handle_modules_delete(state, req)),
        _ => None,
    }
}

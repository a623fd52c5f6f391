use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_registrations_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };
    let module_code = match req.params.get("moduleCode").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing moduleCode", None),
    };

    let module = match db::find_module_by_code(conn, &module_code) {
        Ok(Some(m)) => m,
        Ok(None) => return err(&req.id, "not_found", "module not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // Run the aggregate's dedup rule before touching storage; the stored
    // UNIQUE(student_id, module_id) backs the same invariant.
    let student = match db::load_student(conn, &student_id) {
        Ok(Some(s)) => s,
        Ok(None) => return err(&req.id, "not_found", "student not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if student.is_registered_for(&module) {
        return ok(
            &req.id,
            json!({ "created": false, "moduleCode": module_code }),
        );
    }

    match db::register_student(conn, &student_id, &module.id) {
        Ok((registration_id, created)) => ok(
            &req.id,
            json!({
                "created": created,
                "registrationId": registration_id,
                "moduleCode": module_code,
            }),
        ),
        Err(e) => err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "registrations" })),
        ),
    }
}

fn handle_registrations_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };

    let student = match db::load_student(conn, &student_id) {
        Ok(Some(s)) => s,
        Ok(None) => return err(&req.id, "not_found", "student not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let modules: Vec<serde_json::Value> = student
        .registered_modules()
        .iter()
        .map(|m| {
            json!({
                "id": m.id,
                "code": m.code,
                "name": m.name,
                "mnc": m.mnc,
            })
        })
        .collect();

    ok(&req.id, json!({ "modules": modules }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "registrations.create" => Some(handle_registrations_create(state, req)),
        "registrations.list" => Some(handle_registrations_list(state, req)),
        _ => None,
    }
}

use crate::db;
use crate::domain::Student;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn student_json(s: &Student) -> serde_json::Value {
    json!({
        "id": s.id,
        "firstName": s.first_name,
        "lastName": s.last_name,
        "username": s.username,
        "email": s.email,
    })
}

fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    match req.params.get(key).and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(err(&req.id, "bad_params", format!("missing {key}"), None)),
    }
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let first_name = match required_str(req, "firstName") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let last_name = match required_str(req, "lastName") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let username = match required_str(req, "username") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let email = match required_str(req, "email") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let student_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO students(id, first_name, last_name, username, email, updated_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &student_id,
            &first_name,
            &last_name,
            &username,
            &email,
            Utc::now().to_rfc3339(),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    ok(
        &req.id,
        json!({
            "student": {
                "id": student_id,
                "firstName": first_name,
                "lastName": last_name,
                "username": username,
                "email": email,
            }
        }),
    )
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "students": [] }));
    };

    let mut stmt = match conn.prepare(
        "SELECT id, first_name, last_name, username, email
         FROM students
         ORDER BY last_name, first_name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let first_name: String = row.get(1)?;
            let last_name: String = row.get(2)?;
            let username: String = row.get(3)?;
            let email: String = row.get(4)?;
            Ok(json!({
                "id": id,
                "firstName": first_name,
                "lastName": last_name,
                "username": username,
                "email": email,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_get(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let grades: Vec<serde_json::Value> = student
        .grades
        .iter()
        .map(|g| {
            json!({
                "id": g.id,
                "score": g.score,
                "moduleCode": g.module.code,
            })
        })
        .collect();
    let registrations: Vec<serde_json::Value> = student
        .registrations
        .iter()
        .map(|r| {
            json!({
                "id": r.id,
                "studentId": r.student_id,
                "moduleCode": r.module.code,
            })
        })
        .collect();
    let registered: Vec<&str> = student
        .registered_modules()
        .iter()
        .map(|m| m.code.as_str())
        .collect();

    ok(
        &req.id,
        json!({
            "student": student_json(&student),
            "grades": grades,
            "registrations": registrations,
            "registeredModules": registered,
        }),
    )
}

fn handle_students_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };
    let first_name = match required_str(req, "firstName") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let last_name = match required_str(req, "lastName") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let username = match required_str(req, "username") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let email = match required_str(req, "email") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let updated = match conn.execute(
        "UPDATE students
         SET first_name = ?, last_name = ?, username = ?, email = ?, updated_at = ?
         WHERE id = ?",
        (
            &first_name,
            &last_name,
            &username,
            &email,
            Utc::now().to_rfc3339(),
            &student_id,
        ),
    ) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };

    if updated == 0 {
        return err(&req.id, "not_found", "student not found", None);
    }

    ok(
        &req.id,
        json!({
            "student": {
                "id": student_id,
                "firstName": first_name,
                "lastName": last_name,
                "username": username,
                "email": email,
            }
        }),
    )
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "student not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // The student owns its grades and registrations; delete them first.
    for (table, sql) in [
        ("grades", "DELETE FROM grades WHERE student_id = ?"),
        (
            "registrations",
            "DELETE FROM registrations WHERE student_id = ?",
        ),
        ("students", "DELETE FROM students WHERE id = ?"),
    ] {
        if let Err(e) = tx.execute(sql, [&student_id]) {
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

    ok(&req.id, json!({ "deleted": true, "studentId": student_id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.create" => Some(handle_students_create(state, req)),
        "students.list" => Some(handle_students_list(state, req)),
        "students.get" => Some(handle_students_get(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        _ => None,
    }
}

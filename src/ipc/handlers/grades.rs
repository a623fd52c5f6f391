use crate::db;
use crate::domain::{self, DomainError};
use crate::ipc::error::{domain_err, err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn grade_json(g: &db::GradeRow) -> serde_json::Value {
    json!({
        "id": g.id,
        "score": g.score,
        "studentId": g.student_id,
        "moduleCode": g.module_code,
    })
}

/// Scores cross the boundary as strings ("72"); plain JSON integers are
/// accepted too. Anything else is a caller error.
fn parse_score(req: &Request) -> Result<i64, serde_json::Value> {
    let value = match req.params.get("score") {
        Some(v) => v,
        None => return Err(err(&req.id, "bad_params", "missing score", None)),
    };
    if let Some(n) = value.as_i64() {
        return Ok(n);
    }
    if let Some(s) = value.as_str() {
        if let Ok(n) = s.trim().parse::<i64>() {
            return Ok(n);
        }
    }
    Err(err(
        &req.id,
        "bad_params",
        format!("score is not an integer: {value}"),
        None,
    ))
}

fn handle_grades_submit(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let score = match parse_score(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let module = match db::find_module_by_code(conn, &module_code) {
        Ok(Some(m)) => m,
        Ok(None) => {
            return domain_err(
                &req.id,
                DomainError::NotFound(format!("module {module_code}")),
            )
        }
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // Registration is deliberately not required here: a grade may be recorded
    // for a module the student never registered for.
    let mut student = match db::load_student(conn, &student_id) {
        Ok(Some(s)) => s,
        Ok(None) => {
            return domain_err(
                &req.id,
                DomainError::NotFound(format!("student {student_id}")),
            )
        }
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let existing = match db::find_grade_by_student_and_module(conn, &student.id, &module.code) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // One conditional insert-or-update keyed by (student, module); a rescore
    // keeps the stored row and its id.
    let stored = match db::upsert_grade(conn, &student.id, &module.id, Some(score)) {
        Ok(g) => g,
        Err(e) => {
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "grades" })),
            )
        }
    };

    // Keep the hydrated aggregate in step with the stored row; its dedup rule
    // lands on the same single grade per module code.
    student.add_grade(domain::Grade {
        id: stored.id.clone(),
        score: stored.score,
        student_id: Some(stored.student_id.clone()),
        module: module.clone(),
    });

    ok(
        &req.id,
        json!({ "grade": grade_json(&stored), "created": existing.is_none() }),
    )
}

fn handle_grades_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "grades": [] }));
    };

    match db::list_grades(conn) {
        Ok(grades) => ok(
            &req.id,
            json!({ "grades": grades.iter().map(grade_json).collect::<Vec<_>>() }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_grades_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let grade_id = match req.params.get("gradeId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing gradeId", None),
    };

    match db::find_grade_by_id(conn, &grade_id) {
        Ok(Some(grade)) => ok(&req.id, json!({ "grade": grade_json(&grade) })),
        Ok(None) => err(&req.id, "not_found", "grade not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_grades_rescore(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let grade_id = match req.params.get("gradeId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing gradeId", None),
    };
    let score = match parse_score(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match db::set_grade_score(conn, &grade_id, Some(score)) {
        Ok(0) => return err(&req.id, "not_found", "grade not found", None),
        Ok(_) => {}
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    }

    match db::find_grade_by_id(conn, &grade_id) {
        Ok(Some(grade)) => ok(&req.id, json!({ "grade": grade_json(&grade) })),
        Ok(None) => err(&req.id, "not_found", "grade not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_grades_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let grade_id = match req.params.get("gradeId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing gradeId", None),
    };

    match db::delete_grade(conn, &grade_id) {
        Ok(0) => err(&req.id, "not_found", "grade not found", None),
        Ok(_) => ok(&req.id, json!({ "deleted": true, "gradeId": grade_id })),
        Err(e) => err(&req.id, "db_delete_failed", e.to_string(), None),
    }
}

fn handle_grades_student_average(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    match student.compute_average() {
        Ok(average) => ok(
            &req.id,
            json!({ "studentId": student_id, "average": average }),
        ),
        Err(e) => domain_err(&req.id, e),
    }
}

fn handle_grades_grade_for(state: &mut AppState, req: &Request) -> serde_json::Value {
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
        Ok(None) => {
            return domain_err(
                &req.id,
                DomainError::NotFound(format!("module {module_code}")),
            )
        }
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let student = match db::load_student(conn, &student_id) {
        Ok(Some(s)) => s,
        Ok(None) => {
            return domain_err(
                &req.id,
                DomainError::NotFound(format!("student {student_id}")),
            )
        }
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    match student.grade_for(&module) {
        Ok(grade) => ok(
            &req.id,
            json!({
                "grade": {
                    "id": grade.id,
                    "score": grade.score,
                    "studentId": grade.student_id,
                    "moduleCode": grade.module.code,
                }
            }),
        ),
        Err(e) => domain_err(&req.id, e),
    }
}

fn handle_grades_module_property(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let grade_id = match req.params.get("gradeId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing gradeId", None),
    };
    let property = match req.params.get("property").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing property", None),
    };

    let grade = match db::find_grade_by_id(conn, &grade_id) {
        Ok(Some(g)) => g,
        Ok(None) => return err(&req.id, "not_found", "grade not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let module = match db::find_module_by_code(conn, &grade.module_code) {
        Ok(Some(m)) => m,
        Ok(None) => return err(&req.id, "not_found", "module not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    match domain::module_property(&module, &property) {
        Ok(value) => ok(&req.id, json!({ "property": property, "value": value })),
        Err(e) => domain_err(&req.id, e),
    }
}

fn handle_grades_student_property(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let grade_id = match req.params.get("gradeId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing gradeId", None),
    };
    let property = match req.params.get("property").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing property", None),
    };

    let grade = match db::find_grade_by_id(conn, &grade_id) {
        Ok(Some(g)) => g,
        Ok(None) => return err(&req.id, "not_found", "grade not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let student = match db::load_student(conn, &grade.student_id) {
        Ok(Some(s)) => s,
        Ok(None) => return err(&req.id, "not_found", "student not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    match domain::student_property(&student, &property) {
        Ok(value) => ok(&req.id, json!({ "property": property, "value": value })),
        Err(e) => domain_err(&req.id, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.submit" => Some(handle_grades_submit(state, req)),
        "grades.list" => Some(handle_grades_list(state, req)),
        "grades.get" => Some(handle_grades_get(state, req)),
        "grades.rescore" => Some(handle_grades_rescore(state, req)),
        "grades.delete" => Some(handle_grades_delete(state, req)),
        "grades.studentAverage" => Some(handle_grades_student_average(state, req)),
        "grades.gradeFor" => Some(handle_grades_grade_for(state, req)),
        "grades.moduleProperty" => Some(handle_grades_module_property(state, req)),
        "grades.studentProperty" => Some(handle_grades_student_property(state, req)),
        _ => None,
    }
}

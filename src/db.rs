use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use uuid::Uuid;

use crate::domain::{Grade, Module, Registration, Student};

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("roster.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS modules(
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            mnc INTEGER NOT NULL,
            updated_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            username TEXT NOT NULL UNIQUE,
            email TEXT NOT NULL UNIQUE,
            updated_at TEXT
        )",
        [],
    )?;

    // seq preserves registration insertion order per student.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS registrations(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            module_id TEXT NOT NULL,
            seq INTEGER NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(module_id) REFERENCES modules(id),
            UNIQUE(student_id, module_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_registrations_student ON registrations(student_id, seq)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grades(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            module_id TEXT NOT NULL,
            score INTEGER,
            updated_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(module_id) REFERENCES modules(id),
            UNIQUE(student_id, module_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grades_student ON grades(student_id)",
        [],
    )?;

    Ok(conn)
}

/// Stored grade row. Module code is denormalized in so handlers can answer
/// without a second lookup.
#[derive(Debug, Clone)]
pub struct GradeRow {
    pub id: String,
    pub score: Option<i64>,
    pub student_id: String,
    pub module_id: String,
    pub module_code: String,
}

fn module_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Module> {
    Ok(Module {
        id: row.get(0)?,
        code: row.get(1)?,
        name: row.get(2)?,
        mnc: row.get::<_, i64>(3)? != 0,
    })
}

pub fn find_module_by_code(conn: &Connection, code: &str) -> rusqlite::Result<Option<Module>> {
    conn.query_row(
        "SELECT id, code, name, mnc FROM modules WHERE code = ?",
        [code],
        |row| module_from_row(row),
    )
    .optional()
}

pub fn list_modules(conn: &Connection) -> rusqlite::Result<Vec<Module>> {
    let mut stmt = conn.prepare("SELECT id, code, name, mnc FROM modules ORDER BY code")?;
    let rows = stmt.query_map([], |row| module_from_row(row))?;
    rows.collect()
}

/// Natural-key upsert for the module catalog: an existing code is updated in
/// place so the internal id (and anything pointing at it) survives.
pub fn submit_module(
    conn: &Connection,
    code: &str,
    name: &str,
    mnc: bool,
) -> rusqlite::Result<Module> {
    conn.execute(
        "INSERT INTO modules(id, code, name, mnc, updated_at)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(code) DO UPDATE SET
           name = excluded.name,
           mnc = excluded.mnc,
           updated_at = excluded.updated_at",
        (
            Uuid::new_v4().to_string(),
            code,
            name,
            mnc as i64,
            Utc::now().to_rfc3339(),
        ),
    )?;
    // Read back: on conflict the pre-existing id wins.
    conn.query_row(
        "SELECT id, code, name, mnc FROM modules WHERE code = ?",
        [code],
        |row| module_from_row(row),
    )
}

/// Hydrates the Student aggregate: base fields plus grades and registrations
/// (registration insertion order preserved).
pub fn load_student(conn: &Connection, student_id: &str) -> rusqlite::Result<Option<Student>> {
    let base = conn
        .query_row(
            "SELECT id, first_name, last_name, username, email FROM students WHERE id = ?",
            [student_id],
            |row| {
                let id: String = row.get(0)?;
                let first_name: String = row.get(1)?;
                let last_name: String = row.get(2)?;
                let username: String = row.get(3)?;
                let email: String = row.get(4)?;
                Ok(Student::new(
                    &id,
                    &first_name,
                    &last_name,
                    &username,
                    &email,
                ))
            },
        )
        .optional()?;
    let Some(mut student) = base else {
        return Ok(None);
    };

    let mut reg_stmt = conn.prepare(
        "SELECT r.id, m.id, m.code, m.name, m.mnc
         FROM registrations r
         JOIN modules m ON m.id = r.module_id
         WHERE r.student_id = ?
         ORDER BY r.seq",
    )?;
    let regs = reg_stmt.query_map([student_id], |row| {
        Ok(Registration {
            id: row.get(0)?,
            student_id: student_id.to_string(),
            module: Module {
                id: row.get(1)?,
                code: row.get(2)?,
                name: row.get(3)?,
                mnc: row.get::<_, i64>(4)? != 0,
            },
        })
    })?;
    student.registrations = regs.collect::<Result<Vec<_>, _>>()?;

    let mut grade_stmt = conn.prepare(
        "SELECT g.id, g.score, m.id, m.code, m.name, m.mnc
         FROM grades g
         JOIN modules m ON m.id = g.module_id
         WHERE g.student_id = ?
         ORDER BY g.rowid",
    )?;
    let grades = grade_stmt.query_map([student_id], |row| {
        Ok(Grade {
            id: row.get(0)?,
            score: row.get(1)?,
            student_id: Some(student_id.to_string()),
            module: Module {
                id: row.get(2)?,
                code: row.get(3)?,
                name: row.get(4)?,
                mnc: row.get::<_, i64>(5)? != 0,
            },
        })
    })?;
    student.grades = grades.collect::<Result<Vec<_>, _>>()?;

    Ok(Some(student))
}

fn grade_row_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<GradeRow> {
    Ok(GradeRow {
        id: row.get(0)?,
        score: row.get(1)?,
        student_id: row.get(2)?,
        module_id: row.get(3)?,
        module_code: row.get(4)?,
    })
}

pub fn find_grade_by_id(conn: &Connection, grade_id: &str) -> rusqlite::Result<Option<GradeRow>> {
    conn.query_row(
        "SELECT g.id, g.score, g.student_id, g.module_id, m.code
         FROM grades g
         JOIN modules m ON m.id = g.module_id
         WHERE g.id = ?",
        [grade_id],
        |row| grade_row_from_row(row),
    )
    .optional()
}

pub fn find_grade_by_student_and_module(
    conn: &Connection,
    student_id: &str,
    module_code: &str,
) -> rusqlite::Result<Option<GradeRow>> {
    conn.query_row(
        "SELECT g.id, g.score, g.student_id, g.module_id, m.code
         FROM grades g
         JOIN modules m ON m.id = g.module_id
         WHERE g.student_id = ? AND m.code = ?",
        [student_id, module_code],
        |row| grade_row_from_row(row),
    )
    .optional()
}

pub fn list_grades(conn: &Connection) -> rusqlite::Result<Vec<GradeRow>> {
    let mut stmt = conn.prepare(
        "SELECT g.id, g.score, g.student_id, g.module_id, m.code
         FROM grades g
         JOIN modules m ON m.id = g.module_id
         ORDER BY g.rowid",
    )?;
    let rows = stmt.query_map([], |row| grade_row_from_row(row))?;
    rows.collect()
}

/// Single conditional insert-or-update keyed by (student, module). A rescore
/// keeps the original row id; there is no delete-then-recreate window.
pub fn upsert_grade(
    conn: &Connection,
    student_id: &str,
    module_id: &str,
    score: Option<i64>,
) -> rusqlite::Result<GradeRow> {
    conn.execute(
        "INSERT INTO grades(id, student_id, module_id, score, updated_at)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(student_id, module_id) DO UPDATE SET
           score = excluded.score,
           updated_at = excluded.updated_at",
        (
            Uuid::new_v4().to_string(),
            student_id,
            module_id,
            score,
            Utc::now().to_rfc3339(),
        ),
    )?;
    conn.query_row(
        "SELECT g.id, g.score, g.student_id, g.module_id, m.code
         FROM grades g
         JOIN modules m ON m.id = g.module_id
         WHERE g.student_id = ? AND g.module_id = ?",
        [student_id, module_id],
        |row| grade_row_from_row(row),
    )
}

pub fn set_grade_score(
    conn: &Connection,
    grade_id: &str,
    score: Option<i64>,
) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE grades SET score = ?, updated_at = ? WHERE id = ?",
        (score, Utc::now().to_rfc3339(), grade_id),
    )
}

pub fn delete_grade(conn: &Connection, grade_id: &str) -> rusqlite::Result<usize> {
    conn.execute("DELETE FROM grades WHERE id = ?", [grade_id])
}

/// Creates a registration unless one already exists for the (student, module)
/// pair. Returns the registration id and whether a row was created.
pub fn register_student(
    conn: &Connection,
    student_id: &str,
    module_id: &str,
) -> rusqlite::Result<(String, bool)> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM registrations WHERE student_id = ? AND module_id = ?",
            [student_id, module_id],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(id) = existing {
        return Ok((id, false));
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO registrations(id, student_id, module_id, seq)
         VALUES(?1, ?2, ?3, COALESCE((SELECT MAX(seq) + 1 FROM registrations WHERE student_id = ?2), 0))",
        (&id, student_id, module_id),
    )?;
    Ok((id, true))
}

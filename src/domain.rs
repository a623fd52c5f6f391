use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, PartialEq)]
pub enum DomainError {
    #[error("no grade available: {0}")]
    NoGradeAvailable(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid property: {0}")]
    InvalidProperty(String),
}

impl DomainError {
    /// Stable error code used at the IPC boundary.
    pub fn code(&self) -> &'static str {
        match self {
            DomainError::NoGradeAvailable(_) => "no_grade_available",
            DomainError::NotFound(_) => "not_found",
            DomainError::InvalidProperty(_) => "invalid_property",
        }
    }
}

/// Catalog entry. Business identity is the code; `id` is the storage key.
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub id: String,
    pub code: String,
    pub name: String,
    pub mnc: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub id: String,
    pub student_id: String,
    pub module: Module,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Grade {
    pub id: String,
    pub score: Option<i64>,
    pub student_id: Option<String>,
    pub module: Module,
}

/// Aggregate root over a student's grades and registrations. Enforces one
/// registration and one grade per module code; callers serialize access per
/// instance.
#[derive(Debug, Clone, PartialEq)]
pub struct Student {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    pub email: String,
    pub grades: Vec<Grade>,
    pub registrations: Vec<Registration>,
}

impl Student {
    pub fn new(id: &str, first_name: &str, last_name: &str, username: &str, email: &str) -> Self {
        Student {
            id: id.to_string(),
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            username: username.to_string(),
            email: email.to_string(),
            grades: Vec::new(),
            registrations: Vec::new(),
        }
    }

    /// Registers the student for a module. Repeat calls with the same module
    /// code are a no-op. Returns the registration when one was created.
    pub fn register_module(&mut self, module: &Module) -> Option<&Registration> {
        if self.is_registered_for(module) {
            return None;
        }
        self.registrations.push(Registration {
            id: Uuid::new_v4().to_string(),
            student_id: self.id.clone(),
            module: module.clone(),
        });
        self.registrations.last()
    }

    pub fn is_registered_for(&self, module: &Module) -> bool {
        self.registrations
            .iter()
            .any(|r| r.module.code == module.code)
    }

    /// Modules from all registrations, in registration insertion order.
    pub fn registered_modules(&self) -> Vec<&Module> {
        self.registrations.iter().map(|r| &r.module).collect()
    }

    /// Attaches a grade to this student. If a grade for the same module code
    /// already exists, only its score is overwritten (the existing grade keeps
    /// its identity); otherwise the grade is appended. Registration for the
    /// module is NOT required.
    pub fn add_grade(&mut self, mut grade: Grade) {
        grade.student_id = Some(self.id.clone());

        if let Some(existing) = self
            .grades
            .iter_mut()
            .find(|g| g.module.code == grade.module.code)
        {
            existing.score = grade.score;
        } else {
            self.grades.push(grade);
        }
    }

    pub fn grade_for(&self, module: &Module) -> Result<&Grade, DomainError> {
        self.grades
            .iter()
            .find(|g| g.module.code == module.code)
            .ok_or_else(|| {
                DomainError::NoGradeAvailable(format!(
                    "no grade for student {} in module {}",
                    self.id, module.code
                ))
            })
    }

    /// Arithmetic mean of the scored grades. Grades with no score are skipped
    /// from both sum and count; fails when there is nothing to count.
    pub fn compute_average(&self) -> Result<f64, DomainError> {
        if self.grades.is_empty() {
            return Err(DomainError::NoGradeAvailable(format!(
                "no grades for student {}",
                self.id
            )));
        }

        let mut sum: i64 = 0;
        let mut count: u32 = 0;
        for grade in &self.grades {
            if let Some(score) = grade.score {
                sum += score;
                count += 1;
            }
        }

        if count == 0 {
            return Err(DomainError::NoGradeAvailable(format!(
                "no scored grades for student {}",
                self.id
            )));
        }

        Ok(sum as f64 / count as f64)
    }
}

pub fn module_property(module: &Module, key: &str) -> Result<String, DomainError> {
    match key {
        "code" => Ok(module.code.clone()),
        "name" => Ok(module.name.clone()),
        "mnc" => Ok(module.mnc.to_string()),
        _ => Err(DomainError::InvalidProperty(format!(
            "unknown module property: {key}"
        ))),
    }
}

pub fn student_property(student: &Student, key: &str) -> Result<String, DomainError> {
    match key {
        "first" => Ok(student.first_name.clone()),
        "last" => Ok(student.last_name.clone()),
        "username" => Ok(student.username.clone()),
        "email" => Ok(student.email.clone()),
        "id" => Ok(student.id.clone()),
        _ => Err(DomainError::InvalidProperty(format!(
            "unknown student property: {key}"
        ))),
    }
}

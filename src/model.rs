//! Domain records held by the gradebook store.
//!
//! Field names on the wire follow the school's vocabulary (`disciplina`,
//! `turma`, `modulo`, `descricao`, `valor`) so seed files and API payloads read
//! the same way teachers talk about them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type ActorId = i64;
pub type GradeId = i64;
pub type SubjectId = i64;
pub type ClassId = i64;

/// Lowest and highest grade value accepted on the 0–20 scale.
pub const GRADE_MIN: f64 = 0.0;
pub const GRADE_MAX: f64 = 20.0;

/// Accepts the Portuguese labels ("aluno", "professor") wherever a role is
/// read, including request bodies and query strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum Role {
    Student,
    Teacher,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Teacher => "teacher",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "student" | "aluno" => Ok(Role::Student),
            "teacher" | "professor" => Ok(Role::Teacher),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

impl TryFrom<String> for Role {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// A user of the system. The role is fixed at creation and is only ever read
/// back from the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: ActorId,
    pub name: String,
    pub role: Role,
}

impl Actor {
    pub fn is_teacher(&self) -> bool {
        self.role == Role::Teacher
    }
}

/// A school subject (`disciplina`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub id: SubjectId,
    pub name: String,
}

/// A class group (`turma`), e.g. "10A".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Class {
    pub id: ClassId,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Enrollment {
    pub student_id: ActorId,
    #[serde(alias = "turma_id")]
    pub class_id: ClassId,
}

/// A stored evaluation. `owner_student_id` never changes after insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeRecord {
    pub id: GradeId,
    #[serde(alias = "user_id", alias = "student_id")]
    pub owner_student_id: ActorId,
    #[serde(alias = "disciplina_id")]
    pub subject_id: SubjectId,
    #[serde(alias = "turma_id")]
    pub class_id: ClassId,
    #[serde(alias = "modulo")]
    pub module: String,
    #[serde(alias = "descricao")]
    pub description: String,
    #[serde(alias = "valor")]
    pub value: f64,
    #[serde(default = "Utc::now")]
    pub date: DateTime<Utc>,
    #[serde(default, alias = "updated_by")]
    pub last_modified_by: Option<ActorId>,
    #[serde(default = "Utc::now", alias = "updated_at")]
    pub last_modified_at: DateTime<Utc>,
}

/// Everything the store needs to insert a new evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct NewGrade {
    pub student_id: ActorId,
    pub subject_id: SubjectId,
    pub class_id: ClassId,
    pub module: String,
    pub description: String,
    pub value: f64,
    pub date: Option<DateTime<Utc>>,
}

pub fn value_in_range(value: f64) -> bool {
    (GRADE_MIN..=GRADE_MAX).contains(&value)
}

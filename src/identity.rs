//! Identity lookups and user administration.

use serde::{Deserialize, Serialize};

use crate::authz::AuthorizationService;
use crate::error::GradebookError;
use crate::model::{Actor, ActorId, Class, ClassId, Role};
use crate::store::Gradebook;

#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub name: String,
    pub role: Role,
    #[serde(default, alias = "turma_ids")]
    pub class_ids: Vec<ClassId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserDetails {
    #[serde(flatten)]
    pub user: Actor,
    /// Classes the user is enrolled in. Present for students only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classes: Option<Vec<Class>>,
}

/// Authoritative role and name for `actor_id`.
pub fn resolve_identity(book: &Gradebook, actor_id: ActorId) -> Result<Actor, GradebookError> {
    book.transaction(|tx| AuthorizationService::new(tx).actor(actor_id).cloned())
}

pub fn get_user(book: &Gradebook, id: ActorId) -> Result<Actor, GradebookError> {
    resolve_identity(book, id)
}

pub fn user_with_classes(book: &Gradebook, id: ActorId) -> Result<UserDetails, GradebookError> {
    book.transaction(|tx| {
        let user = AuthorizationService::new(tx).actor(id)?.clone();
        let classes = (user.role == Role::Student).then(|| tx.classes_of(user.id));
        Ok(UserDetails { user, classes })
    })
}

pub fn list_users(book: &Gradebook, role: Option<Role>) -> Result<Vec<Actor>, GradebookError> {
    book.transaction(|tx| Ok(tx.users(role)))
}

pub fn list_classes(book: &Gradebook) -> Result<Vec<Class>, GradebookError> {
    book.transaction(|tx| Ok(tx.classes()))
}

/// Create a user. Students are enrolled in every listed class; all class
/// ids must exist.
pub fn create_user(book: &Gradebook, new: &NewUser) -> Result<UserDetails, GradebookError> {
    let name = new.name.trim();
    if name.is_empty() {
        return Err(GradebookError::validation("name must not be empty"));
    }
    book.transaction(|tx| {
        for class_id in &new.class_ids {
            if tx.class(*class_id).is_none() {
                return Err(GradebookError::not_found("class", *class_id));
            }
        }
        let user = tx.insert_user(name, new.role);
        if user.role == Role::Student {
            for class_id in &new.class_ids {
                tx.enroll(user.id, *class_id);
            }
        }
        tracing::info!(user_id = user.id, role = %user.role, "user created");
        let classes = (user.role == Role::Student).then(|| tx.classes_of(user.id));
        Ok(UserDetails { user, classes })
    })
}

pub fn students_in_class(
    book: &Gradebook,
    requester_id: ActorId,
    class_id: ClassId,
) -> Result<Vec<Actor>, GradebookError> {
    book.transaction(|tx| {
        AuthorizationService::new(tx).require_teacher(requester_id, "list class students")?;
        if tx.class(class_id).is_none() {
            return Err(GradebookError::not_found("class", class_id));
        }
        Ok(tx.students_in_class(class_id))
    })
}

pub fn find_student_by_name(
    book: &Gradebook,
    requester_id: ActorId,
    name: &str,
) -> Result<Vec<Actor>, GradebookError> {
    book.transaction(|tx| {
        AuthorizationService::new(tx).require_teacher(requester_id, "search students")?;
        Ok(tx.find_students_by_name(name))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::fixtures;

    #[test]
    fn identity_comes_from_the_store() {
        let book = fixtures::school();
        let a = resolve_identity(&book, 2).unwrap();
        assert_eq!(a.role, Role::Student);
        assert_eq!(a.name, "João Silva");
        assert_eq!(
            resolve_identity(&book, 77).unwrap_err(),
            GradebookError::UnknownActor(77)
        );
    }

    #[test]
    fn create_student_enrolls_in_classes() {
        let book = fixtures::school();
        let created = create_user(
            &book,
            &NewUser {
                name: "  Rita Alves ".into(),
                role: Role::Student,
                class_ids: vec![2],
            },
        )
        .unwrap();
        assert_eq!(created.user.id, 5);
        assert_eq!(created.user.name, "Rita Alves");
        assert_eq!(created.classes.unwrap()[0].name, "11B");
        assert_eq!(students_in_class(&book, 1, 2).unwrap().len(), 2);
    }

    #[test]
    fn create_rejects_bad_input() {
        let book = fixtures::school();
        let blank = NewUser {
            name: " ".into(),
            role: Role::Teacher,
            class_ids: vec![],
        };
        assert!(matches!(
            create_user(&book, &blank),
            Err(GradebookError::Validation(_))
        ));
        let bad_class = NewUser {
            name: "Rui".into(),
            role: Role::Student,
            class_ids: vec![1, 42],
        };
        assert_eq!(
            create_user(&book, &bad_class).unwrap_err(),
            GradebookError::not_found("class", 42)
        );
        assert_eq!(list_users(&book, Some(Role::Student)).unwrap().len(), 3);
    }

    #[test]
    fn teacher_only_lookups() {
        let book = fixtures::school();
        assert!(matches!(
            students_in_class(&book, 2, 1),
            Err(GradebookError::RoleViolation { .. })
        ));
        let found = find_student_by_name(&book, 1, "maria").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, 3);
        assert!(find_student_by_name(&book, 3, "maria").is_err());
    }

    #[test]
    fn details_include_classes_for_students_only() {
        let book = fixtures::school();
        let s = user_with_classes(&book, 2).unwrap();
        assert_eq!(s.classes.as_ref().map(Vec::len), Some(1));
        let t = user_with_classes(&book, 1).unwrap();
        assert!(t.classes.is_none());
        let json = serde_json::to_value(&t).unwrap();
        assert_eq!(json["role"], "teacher");
        assert!(json.get("classes").is_none());
    }
}

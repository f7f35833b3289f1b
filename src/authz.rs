//! Authorization predicates. Every operation calls these again inside its own
//! transaction, regardless of what the pre-check decided.

use crate::error::GradebookError;
use crate::model::{Actor, ActorId, Role};
use crate::store::Tx;

pub struct AuthorizationService<'t, 'a> {
    tx: &'t Tx<'a>,
}

impl<'t, 'a> AuthorizationService<'t, 'a> {
    pub fn new(tx: &'t Tx<'a>) -> Self {
        Self { tx }
    }

    /// The actor as stored. Roles are never taken from the caller.
    pub fn actor(&self, actor_id: ActorId) -> Result<&'t Actor, GradebookError> {
        self.tx
            .actor(actor_id)
            .ok_or(GradebookError::UnknownActor(actor_id))
    }

    pub fn role_of(&self, actor_id: ActorId) -> Result<Role, GradebookError> {
        self.actor(actor_id).map(|a| a.role)
    }

    pub fn require_role(
        &self,
        actor_id: ActorId,
        required: Role,
        action: &'static str,
    ) -> Result<&'t Actor, GradebookError> {
        let actor = self.actor(actor_id)?;
        if actor.role != required {
            tracing::info!(actor_id, action, required = %required, "role check failed");
            return Err(GradebookError::RoleViolation {
                actor_id,
                required,
                action,
            });
        }
        Ok(actor)
    }

    pub fn require_teacher(
        &self,
        actor_id: ActorId,
        action: &'static str,
    ) -> Result<&'t Actor, GradebookError> {
        self.require_role(actor_id, Role::Teacher, action)
    }

    /// Teachers may access any student; students only themselves.
    pub fn require_same_or_teacher(
        &self,
        actor_id: ActorId,
        target_student_id: ActorId,
    ) -> Result<&'t Actor, GradebookError> {
        let actor = self.actor(actor_id)?;
        match actor.role {
            Role::Teacher => Ok(actor),
            Role::Student if actor_id == target_student_id => Ok(actor),
            Role::Student => {
                tracing::info!(actor_id, target_student_id, "ownership check failed");
                Err(GradebookError::OwnershipViolation {
                    requester_id: actor_id,
                    target_id: target_student_id,
                })
            }
        }
    }
}

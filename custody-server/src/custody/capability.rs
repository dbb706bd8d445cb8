//! Admin capability
//!
//! Admin-only operations take `&AdminCapability` instead of re-checking the
//! actor. The only constructor is [`AdminCapability::grant`], so holding one
//! proves the check already happened.

use shared::custody::Actor;

use super::error::{CustodyError, CustodyResult};

#[derive(Debug, Clone)]
pub struct AdminCapability {
    actor: Actor,
}

impl AdminCapability {
    pub fn grant(actor: &Actor) -> CustodyResult<Self> {
        if !actor.is_admin() {
            tracing::warn!(
                target: "security",
                actor = %actor,
                "Admin operation denied"
            );
            return Err(CustodyError::AdminRequired {
                actor_id: actor.id.clone(),
            });
        }
        Ok(Self {
            actor: actor.clone(),
        })
    }

    pub fn actor(&self) -> &Actor {
        &self.actor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_admins_are_granted() {
        assert!(AdminCapability::grant(&Actor::admin("ops-1")).is_ok());
        assert!(matches!(
            AdminCapability::grant(&Actor::user("u1")),
            Err(CustodyError::AdminRequired { .. })
        ));
        assert!(AdminCapability::grant(&Actor::system("monitor")).is_err());
    }

    #[test]
    fn test_capability_keeps_actor() {
        let cap = AdminCapability::grant(&Actor::admin("ops-1")).unwrap();
        assert_eq!(cap.actor().id, "ops-1");
    }
}

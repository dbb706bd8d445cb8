//! Caller identity
//!
//! Authentication happens upstream; this crate only carries who the caller
//! is and what kind of caller it is.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    User,
    System,
    Admin,
}

impl ActorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::System => "system",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for ActorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ActorType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(Self::User),
            "system" => Ok(Self::System),
            "admin" => Ok(Self::Admin),
            other => Err(format!("unknown actor type: {}", other)),
        }
    }
}

/// Identified caller of a custody operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub actor_type: ActorType,
}

impl Actor {
    pub fn new(id: impl Into<String>, actor_type: ActorType) -> Self {
        Self {
            id: id.into(),
            actor_type,
        }
    }

    pub fn user(id: impl Into<String>) -> Self {
        Self::new(id, ActorType::User)
    }

    pub fn admin(id: impl Into<String>) -> Self {
        Self::new(id, ActorType::Admin)
    }

    /// Internal workers (completion webhooks, reconciliation, monitors)
    pub fn system(id: impl Into<String>) -> Self {
        Self::new(id, ActorType::System)
    }

    pub fn is_admin(&self) -> bool {
        self.actor_type == ActorType::Admin
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.actor_type, self.id)
    }
}

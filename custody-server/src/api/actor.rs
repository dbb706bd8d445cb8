//! Caller identity extractor
//!
//! The gateway in front of this service authenticates the caller and
//! forwards the identity as headers:
//!
//! | Header | Required | Values |
//! |--------|----------|--------|
//! | `x-actor-id` | yes | caller id |
//! | `x-actor-type` | no (default `user`) | `user` / `system` / `admin` |

use axum::{extract::FromRequestParts, http::request::Parts};
use shared::custody::{Actor, ActorType};

use crate::custody::AdminCapability;
use crate::security_log;
use crate::utils::{AppError, ErrorCode};

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_TYPE_HEADER: &str = "x-actor-type";

/// Caller of the current request
#[derive(Debug, Clone)]
pub struct Caller(pub Actor);

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(caller) = parts.extensions.get::<Caller>() {
            return Ok(caller.clone());
        }

        let id = header(parts, ACTOR_ID_HEADER)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                security_log!("WARN", "actor_missing", uri = format!("{:?}", parts.uri));
                AppError::not_authenticated()
            })?;

        let actor_type = match header(parts, ACTOR_TYPE_HEADER) {
            None => ActorType::User,
            Some(raw) => raw.parse::<ActorType>().map_err(|e| {
                security_log!("WARN", "actor_type_invalid", actor_id = id.clone(), value = raw.clone());
                AppError::with_message(ErrorCode::ActorInvalid, e)
            })?,
        };

        let caller = Caller(Actor::new(id, actor_type));
        parts.extensions.insert(caller.clone());
        Ok(caller)
    }
}

/// Caller that passed the admin check
pub struct Admin(pub AdminCapability);

impl<S> FromRequestParts<S> for Admin
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Caller(actor) = Caller::from_request_parts(parts, state).await?;
        Ok(Admin(AdminCapability::grant(&actor)?))
    }
}

fn header(parts: &Parts, name: &str) -> Option<String> {
    parts
        .headers
        .get(name)
        .and_then(|h| h.to_str().ok())
        .map(|s| s.trim().to_string())
}

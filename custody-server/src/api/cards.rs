//! 卡片查询接口
//!
//! | 路径 | 方法 | 说明 |
//! |------|------|------|
//! | /api/cards/{id} | GET | 卡片当前状态 |
//! | /api/cards/{id}/audit | GET | 卡片审计历史 (升序) |

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::get,
};
use shared::custody::CardInstance;

use super::actor::Caller;
use crate::audit::AuditEntry;
use crate::core::ServerState;
use crate::utils::AppResult;

pub fn router() -> Router<ServerState> {
    Router::new().nest("/api/cards", routes())
}

fn routes() -> Router<ServerState> {
    Router::new()
        .route("/{id}", get(get_card))
        .route("/{id}/audit", get(card_audit))
}

/// GET /api/cards/{id}
pub async fn get_card(
    State(state): State<ServerState>,
    _caller: Caller,
    Path(id): Path<String>,
) -> AppResult<Json<CardInstance>> {
    Ok(Json(state.custody.card(&id).await?))
}

/// GET /api/cards/{id}/audit
pub async fn card_audit(
    State(state): State<ServerState>,
    _caller: Caller,
    Path(id): Path<String>,
) -> AppResult<Json<Vec<AuditEntry>>> {
    Ok(Json(state.custody.card_history(&id).await?))
}

//! Audit Log API (审计日志查询、验证)，仅管理员

use axum::{
    Json, Router,
    extract::{Query, State},
    routing::get,
};

use super::actor::Admin;
use crate::audit::{AuditChainVerification, AuditListResponse, AuditQuery};
use crate::core::ServerState;
use crate::utils::AppResult;

pub fn router() -> Router<ServerState> {
    Router::new().nest("/api/audit", routes())
}

fn routes() -> Router<ServerState> {
    Router::new()
        .route("/", get(list))
        .route("/verify", get(verify_chain))
}

/// GET /api/audit - 查询审计日志 (新到旧)
pub async fn list(
    State(state): State<ServerState>,
    _admin: Admin,
    Query(query): Query<AuditQuery>,
) -> AppResult<Json<AuditListResponse>> {
    let (items, total) = state.custody.audit().query(&query).await?;
    Ok(Json(AuditListResponse { items, total }))
}

/// GET /api/audit/verify - 验证审计链完整性
pub async fn verify_chain(
    State(state): State<ServerState>,
    _admin: Admin,
) -> AppResult<Json<AuditChainVerification>> {
    Ok(Json(state.custody.audit().verify_chain().await?))
}

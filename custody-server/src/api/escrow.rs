//! 托管补偿队列接口，仅管理员
//!
//! | 路径 | 方法 | 说明 |
//! |------|------|------|
//! | /api/escrow/pending | GET | 待重试条目 |
//! | /api/escrow/dead | GET | 重试耗尽条目 |
//! | /api/escrow/dead/{order_id}/requeue | POST | 重新入队 (重置重试次数) |

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};

use super::actor::Admin;
use crate::core::ServerState;
use crate::escrow::{DeadEscrow, PendingEscrow};
use crate::utils::AppResult;

pub fn router() -> Router<ServerState> {
    Router::new().nest("/api/escrow", routes())
}

fn routes() -> Router<ServerState> {
    Router::new()
        .route("/pending", get(pending))
        .route("/dead", get(dead))
        .route("/dead/{order_id}/requeue", post(requeue))
}

/// GET /api/escrow/pending
pub async fn pending(
    State(state): State<ServerState>,
    _admin: Admin,
) -> AppResult<Json<Vec<PendingEscrow>>> {
    Ok(Json(state.reconciler.pending().await?))
}

/// GET /api/escrow/dead
pub async fn dead(
    State(state): State<ServerState>,
    _admin: Admin,
) -> AppResult<Json<Vec<DeadEscrow>>> {
    Ok(Json(state.reconciler.dead().await?))
}

/// POST /api/escrow/dead/{order_id}/requeue
pub async fn requeue(
    State(state): State<ServerState>,
    Admin(cap): Admin,
    Path(order_id): Path<String>,
) -> AppResult<Json<PendingEscrow>> {
    Ok(Json(state.reconciler.requeue_dead(&cap, &order_id).await?))
}

//! 托管操作接口
//!
//! | 路径 | 方法 | 说明 |
//! |------|------|------|
//! | /api/custody | POST | 执行一个 `CustodyRequest` (按 `action` 区分) |
//!
//! ```json
//! {"action": "lock", "card_instance_id": "C1", "order_id": "O1"}
//! ```

use axum::{Json, Router, extract::State, routing::post};
use shared::custody::{CustodyRequest, CustodyResponse};

use super::actor::Caller;
use crate::core::ServerState;
use crate::utils::AppResult;

pub fn router() -> Router<ServerState> {
    Router::new().route("/api/custody", post(dispatch))
}

/// POST /api/custody
pub async fn dispatch(
    State(state): State<ServerState>,
    Caller(actor): Caller,
    Json(request): Json<CustodyRequest>,
) -> AppResult<Json<CustodyResponse>> {
    let response = state.custody.dispatch(request, &actor).await?;
    Ok(Json(response))
}

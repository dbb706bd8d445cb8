//! API 路由模块
//!
//! # 结构
//!
//! - [`health`] - 健康检查
//! - [`custody`] - 托管操作 (lock / unlock / complete_sale / repair ...)
//! - [`cards`] - 卡片状态与历史
//! - [`audit`] - 审计日志查询、链验证 (管理员)
//! - [`escrow`] - 托管补偿队列 (管理员)
//!
//! 调用方身份来自网关转发的 `x-actor-id` / `x-actor-type`，见 [`actor`]。

pub mod actor;
pub mod audit;
pub mod cards;
pub mod custody;
pub mod escrow;
pub mod health;

use axum::Router;
use http::{HeaderName, HeaderValue};
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::core::ServerState;

pub use actor::{Admin, Caller};

const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Clone)]
struct XRequestId;

impl MakeRequestId for XRequestId {
    fn make_request_id<B>(&mut self, _request: &http::Request<B>) -> Option<RequestId> {
        let id = shared::util::new_id();
        HeaderValue::from_str(&id).ok().map(RequestId::new)
    }
}

/// All routes, no middleware, no state
pub fn build_router() -> Router<ServerState> {
    Router::new()
        .merge(health::router())
        .merge(custody::router())
        .merge(cards::router())
        .merge(audit::router())
        .merge(escrow::router())
}

/// Router with middleware and state, ready to serve
pub fn build_app(state: ServerState) -> Router {
    build_router()
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(
            HeaderName::from_static(REQUEST_ID_HEADER),
            XRequestId,
        ))
        .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
            REQUEST_ID_HEADER,
        )))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Config;
    use crate::custody::{Collaborators, CustodyStorage};
    use crate::external::{BroadcastAlertSink, InMemoryLedgerService, InMemoryOrderService};
    use axum::body::Body;
    use http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use rust_decimal::Decimal;
    use shared::custody::{Actor, CardStatus, NewCard, OrderStatus};
    use std::sync::Arc;
    use tower::ServiceExt;

    struct TestApp {
        state: ServerState,
        orders: Arc<InMemoryOrderService>,
    }

    fn test_app() -> TestApp {
        let storage = Arc::new(CustodyStorage::open_in_memory().unwrap());
        let orders = Arc::new(InMemoryOrderService::new());
        let deps = Collaborators {
            orders: orders.clone(),
            ledger: Arc::new(InMemoryLedgerService::new()),
            alerts: Arc::new(BroadcastAlertSink::default()),
        };
        let config = Config::with_overrides("/tmp/custody-api-test", 0);
        TestApp {
            state: ServerState::new(config, storage, deps),
            orders,
        }
    }

    async fn send(
        app: &TestApp,
        method: &str,
        uri: &str,
        actor: Option<(&str, &str)>,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some((id, kind)) = actor {
            req = req.header("x-actor-id", id).header("x-actor-type", kind);
        }
        let req = match body {
            Some(json) => req
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };

        let resp = build_app(app.state.clone()).oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    async fn register(app: &TestApp, id: &str) {
        app.state
            .custody
            .register_card(
                NewCard {
                    id: id.to_string(),
                    owner_id: "seller-1".to_string(),
                    declared_value: Decimal::new(80, 0),
                    status: CardStatus::Listed,
                },
                &Actor::user("seller-1"),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_health() {
        let app = test_app();
        let (status, body) = send(&app, "GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["storage"]["status"], "ok");
    }

    #[tokio::test]
    async fn test_lock_then_conflict_over_http() {
        let app = test_app();
        register(&app, "C1").await;

        let lock = |order: &str| {
            serde_json::json!({"action": "lock", "card_instance_id": "C1", "order_id": order})
        };
        let (status, body) =
            send(&app, "POST", "/api/custody", Some(("buyer-1", "user")), Some(lock("O1"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["kind"], "locked");
        assert_eq!(body["data"]["card"]["status"], "locked");

        let (status, body) =
            send(&app, "POST", "/api/custody", Some(("buyer-2", "user")), Some(lock("O2"))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], 4003);
        assert_eq!(body["details"]["held_by"], "O1");
    }

    #[tokio::test]
    async fn test_missing_actor_is_unauthenticated() {
        let app = test_app();
        let (status, _) = send(&app, "GET", "/api/cards/C1", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_unknown_actor_type_rejected() {
        let app = test_app();
        let (status, body) =
            send(&app, "GET", "/api/cards/C1", Some(("u1", "root")), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], 1002);
    }

    #[tokio::test]
    async fn test_card_and_history_endpoints() {
        let app = test_app();
        register(&app, "C1").await;

        let (status, body) = send(&app, "GET", "/api/cards/C1", Some(("u1", "user")), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "listed");

        let (status, body) =
            send(&app, "GET", "/api/cards/C1/audit", Some(("u1", "user")), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["action"], "intake");

        let (status, _) = send(&app, "GET", "/api/cards/nope", Some(("u1", "user")), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_admin_routes_require_admin() {
        let app = test_app();
        register(&app, "C1").await;

        let (status, _) = send(&app, "GET", "/api/audit/verify", Some(("u1", "user")), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) =
            send(&app, "GET", "/api/audit/verify", Some(("ops-1", "admin")), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["chain_intact"], true);
        assert_eq!(body["total_entries"], 1);

        let (status, body) =
            send(&app, "GET", "/api/audit?action=intake", Some(("ops-1", "admin")), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 1);

        let (status, _) = send(&app, "GET", "/api/escrow/dead", Some(("u1", "user")), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, body) =
            send(&app, "GET", "/api/escrow/pending", Some(("ops-1", "admin")), None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_repair_over_http() {
        let app = test_app();
        register(&app, "C1").await;
        app.state
            .custody
            .lock("C1", "O1", &Actor::user("buyer-1"))
            .await
            .unwrap();
        app.orders.upsert("O1", OrderStatus::Cancelled, None);

        let repair = serde_json::json!({"action": "repair", "repair_type": {"type": "unlock_orphans"}});
        let (status, _) =
            send(&app, "POST", "/api/custody", Some(("u1", "user")), Some(repair.clone())).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) =
            send(&app, "POST", "/api/custody", Some(("ops-1", "admin")), Some(repair)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["kind"], "repaired");
        assert_eq!(body["data"]["fixed"], 1);

        let (_, card) = send(&app, "GET", "/api/cards/C1", Some(("u1", "user")), None).await;
        assert_eq!(card["status"], "in_vault");
    }

    #[tokio::test]
    async fn test_requeue_unknown_dead_entry() {
        let app = test_app();
        let (status, _) = send(
            &app,
            "POST",
            "/api/escrow/dead/O404/requeue",
            Some(("ops-1", "admin")),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}

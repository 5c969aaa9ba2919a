use std::sync::Arc;

use axum::middleware;
use axum::routing::get;
use axum::Router;
use qm_driver::DriverRegistry;
use qm_store::Repository;
use tower_http::trace::TraceLayer;

use crate::auth::require_auth;
use crate::handlers;
use crate::state::AppState;

pub fn build_app(
    repo: Arc<dyn Repository>,
    drivers: Arc<DriverRegistry>,
    auth_token: Arc<String>,
    server_base_url: String,
) -> Router {
    let state = AppState { repo, drivers, auth_token, server_base_url: Arc::new(server_base_url) };

    let authenticated = Router::new()
        .route(
            "/api/reservation/:resource_pk",
            get(handlers::get_reservation)
                .post(handlers::post_reservation)
                .delete(handlers::delete_reservation)
                .patch(handlers::refresh_reservation)
                .put(handlers::refresh_reservation)
                .head(handlers::head_reservation),
        )
        .route("/api/resource/:resource_pk", get(handlers::get_resource))
        .route(
            "/teamcity/build_reservation/:build_id",
            axum::routing::delete(handlers::delete_build_reservation)
                .get(handlers::redirect_build_reservation)
                .post(handlers::redirect_build_reservation)
                .put(handlers::redirect_build_reservation)
                .patch(handlers::redirect_build_reservation),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/ready", get(handlers::ready))
        .merge(authenticated)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use base64::Engine as _;
    use qm_domain::{Device, DeviceId, DriverKind, HostId, HostType, Pool, PoolId, RemoteHost, Resource, ResourceId};
    use qm_store::InMemoryRepository;
    use serde_json::Value;
    use tower::util::ServiceExt;

    const TEST_TOKEN: &str = "test-token";

    async fn seeded_repo() -> InMemoryRepository {
        let repo = InMemoryRepository::new();
        repo.upsert_pool(&Pool { id: PoolId::new("p1"), name: "pool".into() }).await.unwrap();
        repo.upsert_resource(&Resource::new(ResourceId::new("r1"), PoolId::new("p1"), "r1")).await.unwrap();
        repo.upsert_host(&RemoteHost {
            id: HostId::new("h1"),
            address: "10.0.0.1".into(),
            communicator: qm_domain::CommunicatorKind::Ssh,
            host_type: HostType::LinuxAmd64,
            config: serde_json::json!({}),
        })
        .await
        .unwrap();
        repo.upsert_device(&Device {
            id: DeviceId::new("d1"),
            resource_id: Some(ResourceId::new("r1")),
            host_id: HostId::new("h1"),
            name: "d1".into(),
            driver: DriverKind::Usbip,
            config: serde_json::json!({"bus_id": "1-1"}),
            online: true,
        })
        .await
        .unwrap();
        repo
    }

    async fn test_app() -> Router {
        let repo = Arc::new(seeded_repo().await);
        let drivers = Arc::new(DriverRegistry::new());
        build_app(repo, drivers, Arc::new(TEST_TOKEN.to_string()), "http://127.0.0.1:8000".into())
    }

    fn authed(req: axum::http::request::Builder) -> axum::http::request::Builder {
        req.header("Authorization", format!("Bearer {}", TEST_TOKEN))
    }

    fn authed_as(req: axum::http::request::Builder, user: &str) -> axum::http::request::Builder {
        let credentials = base64::engine::general_purpose::STANDARD.encode(format!("{user}:{TEST_TOKEN}"));
        req.header("Authorization", format!("Basic {credentials}"))
    }

    #[tokio::test]
    async fn unauthenticated_request_returns_401() {
        let app = test_app().await;
        let resp = app
            .oneshot(Request::builder().uri("/api/reservation/r1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn health_is_public_and_returns_200() {
        let app = test_app().await;
        let resp = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn post_reservation_on_free_resource_returns_201_with_use_password() {
        let app = test_app().await;
        let resp = app
            .oneshot(
                authed_as(Request::builder().method(Method::POST).uri("/api/reservation/r1"), "alice")
                    .header("content-type", "application/x-www-form-urlencoded")
                    .body(Body::from(""))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["user"], "alice");
        assert!(json["use_password"].as_str().unwrap().len() > 0);
    }

    #[tokio::test]
    async fn post_reservation_by_another_user_returns_403() {
        let app = test_app().await;
        app.clone()
            .oneshot(
                authed_as(Request::builder().method(Method::POST).uri("/api/reservation/r1"), "alice")
                    .header("content-type", "application/x-www-form-urlencoded")
                    .body(Body::from(""))
                    .unwrap(),
            )
            .await
            .unwrap();

        let resp = app
            .oneshot(
                authed_as(Request::builder().method(Method::POST).uri("/api/reservation/r1"), "bob")
                    .header("content-type", "application/x-www-form-urlencoded")
                    .body(Body::from(""))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn get_reservation_on_unreserved_resource_returns_404() {
        let app = test_app().await;
        let resp = app
            .oneshot(authed(Request::builder().uri("/api/reservation/r1")).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_reservation_returns_204() {
        let app = test_app().await;
        app.clone()
            .oneshot(
                authed_as(Request::builder().method(Method::POST).uri("/api/reservation/r1"), "alice")
                    .header("content-type", "application/x-www-form-urlencoded")
                    .body(Body::from(""))
                    .unwrap(),
            )
            .await
            .unwrap();

        let resp = app
            .oneshot(
                Request::builder()
                    .method(Method::DELETE)
                    .uri("/api/reservation/r1")
                    .header("Authorization", format!("Bearer {}", TEST_TOKEN))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn resource_password_header_authenticates_as_owner() {
        let app = test_app().await;
        let resp = app
            .clone()
            .oneshot(
                authed_as(Request::builder().method(Method::POST).uri("/api/reservation/r1"), "alice")
                    .header("content-type", "application/x-www-form-urlencoded")
                    .body(Body::from(""))
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap();
        let password = json["use_password"].as_str().unwrap();

        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/api/reservation/r1")
                    .header("Authorization", format!("Resource r1:{password}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn get_resource_is_a_reduced_projection() {
        let app = test_app().await;
        let resp = app
            .oneshot(authed(Request::builder().uri("/api/resource/r1")).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert!(json.get("use_password").is_none());
        assert!(json.get("devices").is_none());
    }

    #[tokio::test]
    async fn build_reservation_unknown_id_returns_404() {
        let app = test_app().await;
        let resp = app
            .oneshot(
                Request::builder()
                    .method(Method::DELETE)
                    .uri("/teamcity/build_reservation/999")
                    .header("Authorization", format!("Bearer {}", TEST_TOKEN))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}

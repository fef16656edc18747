//! HTTP surface tests: middleware layer and forward-auth endpoint

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    routing::get,
    Router,
};
use chrono::{Duration, Utc};
use dts_gate::auth::{mint, Role};
use dts_gate::server::{create_router, protect, REASON_HEADER};
use dts_gate::{AccessGate, GateConfig};
use tower::ServiceExt;

fn local_gate() -> AccessGate {
    let config = GateConfig::from_json(
        r#"{"resolver": {"strategy": "local"}, "redirects": {"unauthenticated": "login"}, "clear_cookies": ["token"]}"#,
    )
    .unwrap();
    config.build_gate().unwrap()
}

fn token(role: Role) -> String {
    mint(role, None, Utc::now() + Duration::hours(1), None)
}

fn app(gate: AccessGate) -> Router {
    let pages = Router::new()
        .route("/login", get(|| async { "login page" }))
        .route("/dashboard/doctor", get(|| async { "doctor dashboard" }))
        .route("/models", get(|| async { "models" }))
        .route("/api/patients", get(|| async { "[]" }))
        .fallback(|| async { "fallback page" });
    protect(pages, gate)
}

fn page_request(path: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(path);
    if let Some(token) = token {
        builder = builder.header(header::COOKIE, format!("token={}", token));
    }
    builder.body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_middleware_passes_allowed_requests() {
    let app = app(local_gate());
    let doctor = token(Role::Doctor);

    let response = app
        .clone()
        .oneshot(page_request("/dashboard/doctor", Some(&doctor)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.clone().oneshot(page_request("/login", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.oneshot(page_request("/api/patients", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_middleware_redirects_unauthenticated() {
    let app = app(local_gate());

    let response = app.oneshot(page_request("/models", None)).await.unwrap();

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(
        response.headers().get(header::LOCATION).unwrap(),
        "/login?redirect=%2Fmodels"
    );
    assert_eq!(response.headers().get(REASON_HEADER).unwrap(), "missing_credential");
    assert_eq!(
        response.headers().get(header::SET_COOKIE).unwrap(),
        "token=; Path=/; Max-Age=0"
    );
}

#[tokio::test]
async fn test_middleware_redirects_wrong_role_to_forbidden() {
    let app = app(local_gate());
    let doctor = token(Role::Doctor);

    let response = app.oneshot(page_request("/models", Some(&doctor))).await.unwrap();

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(response.headers().get(header::LOCATION).unwrap(), "/forbidden");
    assert!(response.headers().get(header::SET_COOKIE).is_none());
}

fn authz_request(forwarded: Option<&str>, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri("/authz");
    if let Some(uri) = forwarded {
        builder = builder.header("x-forwarded-uri", uri);
    }
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_forward_auth_allow_and_redirect() {
    let router = create_router(local_gate());
    let engineer = token(Role::MlEngineer);

    let response = router
        .clone()
        .oneshot(authz_request(Some("/models/7?tab=metrics"), Some(&engineer)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = router
        .clone()
        .oneshot(authz_request(Some("/patients/1"), Some(&engineer)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(response.headers().get(REASON_HEADER).unwrap(), "insufficient_role");

    let response = router
        .oneshot(authz_request(Some("/patients/1"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(
        response.headers().get(header::LOCATION).unwrap(),
        "/login?redirect=%2Fpatients%2F1"
    );
}

#[tokio::test]
async fn test_forward_auth_requires_forwarded_uri() {
    let router = create_router(local_gate());

    let response = router.oneshot(authz_request(None, None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_forward_auth_nginx_header_and_health() {
    let router = create_router(local_gate());

    let request = Request::builder()
        .uri("/authz")
        .header("x-original-uri", "/register")
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_forward_auth_normalizes_path_before_matching() {
    let router = create_router(local_gate());
    let doctor = token(Role::Doctor);

    for uri in [
        "/models",
        "/%6dodels/3",
        "//models",
        "/patients/../models",
        "/patients/%2e%2e/models",
        "https://dts.example.com//models/./3?tab=1",
    ] {
        let response = router
            .clone()
            .oneshot(authz_request(Some(uri), Some(&doctor)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT, "uri {}", uri);
        assert_eq!(response.headers().get(header::LOCATION).unwrap(), "/forbidden");
        assert_eq!(response.headers().get(REASON_HEADER).unwrap(), "insufficient_role");
    }

    // Normalized public route stays public
    let response = router
        .oneshot(authz_request(Some("/%6cogin/"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_forward_auth_rejects_undecodable_paths() {
    let router = create_router(local_gate());
    let engineer = token(Role::MlEngineer);

    for uri in ["/models%zz", "/models/%ff", "/models%00"] {
        let response = router
            .clone()
            .oneshot(authz_request(Some(uri), Some(&engineer)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT, "uri {}", uri);
        assert_eq!(response.headers().get(header::LOCATION).unwrap(), "/forbidden");
        assert_eq!(response.headers().get(REASON_HEADER).unwrap(), "malformed_path");
        assert!(response.headers().get(header::SET_COOKIE).is_none());
    }
}

#[tokio::test]
async fn test_middleware_normalizes_path_before_matching() {
    let app = app(local_gate());
    let doctor = token(Role::Doctor);

    for path in ["/%6dodels", "/dashboard/doctor/../../models", "/%2e/models"] {
        let response = app
            .clone()
            .oneshot(page_request(path, Some(&doctor)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT, "path {}", path);
        assert_eq!(response.headers().get(header::LOCATION).unwrap(), "/forbidden");
    }
}

use axum::http::{header, Method, Request, StatusCode};
use axum::body::Body;
use serde_json::{json, Value};
use tower::ServiceExt;

use crate::support::{read_json, send_request, setup_test_app, PASSWORD};

fn session_cookie(response: &axum::http::Response<Body>) -> String {
    let set_cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .expect("set-cookie header")
        .to_str()
        .expect("ascii cookie");
    set_cookie.split(';').next().expect("cookie pair").to_string()
}

#[tokio::test]
async fn health_is_public() {
    let app = setup_test_app().await;
    let response = send_request(&app, Method::GET, "/health", None, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = read_json(response).await;
    assert_eq!(body, json!({"status": "ok"}));
}

#[tokio::test]
async fn login_sets_cookie_that_authenticates_requests() {
    let app = setup_test_app().await;
    let user = app.create_user("alice", false).await;

    let response = send_request(
        &app,
        Method::POST,
        "/login",
        None,
        Some(json!({"username": "alice", "password": PASSWORD})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let cookie = session_cookie(&response);
    assert!(cookie.starts_with("warden_session="));
    let body: Value = read_json(response).await;
    assert_eq!(body["username"], "alice");
    assert!(body.get("password_hash").is_none());

    let request = Request::builder()
        .uri(format!("/users/{}", user.id))
        .header(header::COOKIE, &cookie)
        .body(Body::empty())
        .unwrap();
    let response = app.router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let request = Request::builder()
        .method(Method::POST)
        .uri("/logout")
        .header(header::COOKIE, &cookie)
        .body(Body::empty())
        .unwrap();
    let response = app.router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(app.state.sessions.is_empty());

    let request = Request::builder()
        .uri(format!("/users/{}", user.id))
        .header(header::COOKIE, &cookie)
        .body(Body::empty())
        .unwrap();
    let response = app.router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn bad_credentials_look_the_same_for_unknown_users() {
    let app = setup_test_app().await;
    app.create_user("alice", false).await;

    let wrong_password = send_request(
        &app,
        Method::POST,
        "/login",
        None,
        Some(json!({"username": "alice", "password": "not the password"})),
    )
    .await;
    let unknown_user = send_request(
        &app,
        Method::POST,
        "/login",
        None,
        Some(json!({"username": "mallory", "password": PASSWORD})),
    )
    .await;

    assert_eq!(wrong_password.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(unknown_user.status(), StatusCode::UNAUTHORIZED);
    let first: Value = read_json(wrong_password).await;
    let second: Value = read_json(unknown_user).await;
    assert_eq!(first, second);
}

#[tokio::test]
async fn password_change_invalidates_existing_session() {
    let app = setup_test_app().await;
    let user = app.create_user("alice", false).await;
    let (_, session) = app
        .state
        .accounts
        .login(warden::auth::account_service::LoginRequest {
            username: "alice".to_string(),
            password: PASSWORD.to_string(),
        })
        .await
        .unwrap();
    let cookie = format!("warden_session={}", session.id);

    app.state
        .accounts
        .update_user(
            &user.id,
            warden::auth::account_service::UpdateUserRequest {
                username: None,
                password: Some("a brand new password".to_string()),
            },
        )
        .await
        .unwrap();

    let request = Request::builder()
        .uri(format!("/users/{}", user.id))
        .header(header::COOKIE, cookie)
        .body(Body::empty())
        .unwrap();
    let response = app.router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(app.state.sessions.get(&session.id).is_none());
}

#[tokio::test]
async fn missing_credentials_are_rejected() {
    let app = setup_test_app().await;
    let response = send_request(&app, Method::GET, "/users", None, None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body: Value = read_json(response).await;
    assert_eq!(body["error"], "unauthorized");
}

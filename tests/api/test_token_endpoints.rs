use axum::http::{Method, StatusCode};
use serde_json::{json, Value};

use crate::support::{read_json, send_request, setup_test_app, token_of};

#[tokio::test]
async fn owner_reads_their_token() {
    let app = setup_test_app().await;
    let alice = app.create_user("alice", false).await;
    let token = token_of(&alice);

    let response = send_request(
        &app,
        Method::GET,
        &format!("/users/{}/api-token", alice.id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = read_json(response).await;
    assert_eq!(body["username"], "alice");
    assert_eq!(body["api_token"], token.as_str());
    assert_eq!(body["permanent"], false);
    assert_eq!(body["roles"], json!([]));
    assert!(body["expires_at"].as_str().unwrap().ends_with('Z'));
}

#[tokio::test]
async fn regenerating_replaces_the_token() {
    let app = setup_test_app().await;
    let alice = app.create_user("alice", false).await;
    let old = token_of(&alice);

    let response = send_request(
        &app,
        Method::DELETE,
        &format!("/users/{}/api-token", alice.id),
        Some(&old),
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = read_json(response).await;
    let new = body["api_token"].as_str().unwrap().to_string();
    assert_ne!(new, old);
    assert!(new.starts_with("API-TOK_"));

    let stale = send_request(&app, Method::GET, "/users", Some(&old), None).await;
    assert_eq!(stale.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn only_admins_flip_permanence() {
    let app = setup_test_app().await;
    let admin_token = token_of(&app.create_user("root", true).await);
    let alice = app.create_user("alice", false).await;
    let path = format!("/users/{}/api-token", alice.id);

    let denied = send_request(
        &app,
        Method::PUT,
        &path,
        Some(&token_of(&alice)),
        Some(json!({"permanent": true})),
    )
    .await;
    assert_eq!(denied.status(), StatusCode::FORBIDDEN);

    let response =
        send_request(&app, Method::PUT, &path, Some(&admin_token), Some(json!({"permanent": true})))
            .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = read_json(response).await;
    assert_eq!(body["permanent"], true);
    assert_eq!(body["api_token"], token_of(&alice).as_str());
}

use axum::http::{Method, StatusCode};
use serde_json::{json, Value};
use tokio_test::assert_ok;

use crate::support::{read_json, send_request, setup_test_app, token_of, PASSWORD};

#[tokio::test]
async fn admin_creates_and_lists_users() {
    let app = setup_test_app().await;
    let admin = app.create_user("root", true).await;
    let token = token_of(&admin);

    let response = send_request(
        &app,
        Method::POST,
        "/users",
        Some(&token),
        Some(json!({"username": "alice", "password": PASSWORD})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let created: Value = read_json(response).await;
    assert_eq!(created["username"], "alice");
    assert_eq!(created["roles"], json!([]));

    let response = send_request(&app, Method::GET, "/users", Some(&token), None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let users: Vec<Value> = read_json(response).await;
    let names: Vec<&str> = users.iter().filter_map(|u| u["username"].as_str()).collect();
    assert_eq!(names, vec!["alice", "root"]);

    let duplicate = send_request(
        &app,
        Method::POST,
        "/users",
        Some(&token),
        Some(json!({"username": "alice", "password": PASSWORD})),
    )
    .await;
    assert_eq!(duplicate.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn invalid_user_payload_is_rejected() {
    let app = setup_test_app().await;
    let token = token_of(&app.create_user("root", true).await);

    let response = send_request(
        &app,
        Method::POST,
        "/users",
        Some(&token),
        Some(json!({"username": "bad name!", "password": "short"})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = read_json(response).await;
    assert_eq!(body["error"], "bad_request");
}

#[tokio::test]
async fn non_admins_only_reach_their_own_account() {
    let app = setup_test_app().await;
    let alice = app.create_user("alice", false).await;
    let bob = app.create_user("bob", false).await;
    let token = token_of(&alice);

    let own = send_request(&app, Method::GET, &format!("/users/{}", alice.id), Some(&token), None).await;
    assert_eq!(own.status(), StatusCode::OK);

    let other = send_request(&app, Method::GET, &format!("/users/{}", bob.id), Some(&token), None).await;
    assert_eq!(other.status(), StatusCode::FORBIDDEN);

    let list = send_request(&app, Method::GET, "/users", Some(&token), None).await;
    assert_eq!(list.status(), StatusCode::FORBIDDEN);

    let bad_id = send_request(&app, Method::GET, "/users/not-a-uuid", Some(&token), None).await;
    assert_eq!(bad_id.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn user_can_delete_own_account() {
    let app = setup_test_app().await;
    let alice = app.create_user("alice", false).await;
    let token = token_of(&alice);

    let response =
        send_request(&app, Method::DELETE, &format!("/users/{}", alice.id), Some(&token), None).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    // The token went with the account.
    let response =
        send_request(&app, Method::GET, &format!("/users/{}", alice.id), Some(&token), None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn role_endpoints_manage_membership() {
    let app = setup_test_app().await;
    let admin_token = token_of(&app.create_user("root", true).await);
    let alice = app.create_user("alice", false).await;

    let response = send_request(
        &app,
        Method::PUT,
        &format!("/roles/ops/users/{}", alice.id),
        Some(&admin_token),
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = read_json(response).await;
    assert_eq!(body["roles"], json!(["ops"]));

    let response = send_request(
        &app,
        Method::PUT,
        "/roles/ops",
        Some(&admin_token),
        Some(json!({"name": "operators"})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let reloaded = assert_ok!(app.state.accounts.get_user(&alice.id).await);
    assert_eq!(reloaded.role_names(), vec!["operators".to_string()]);

    let response = send_request(
        &app,
        Method::DELETE,
        &format!("/roles/operators/users/{}", alice.id),
        Some(&admin_token),
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response =
        send_request(&app, Method::DELETE, "/roles/operators", Some(&admin_token), None).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let response =
        send_request(&app, Method::DELETE, "/roles/operators", Some(&admin_token), None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let alice_token = token_of(&alice);
    let response = send_request(&app, Method::DELETE, "/roles/admin", Some(&alice_token), None).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

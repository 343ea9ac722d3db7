use std::net::{IpAddr, Ipv4Addr};

use axum::http::{header, Method, StatusCode};
use serde_json::json;
use tower::ServiceExt;
use warden::auth::account_service::UpdateUserRequest;

use crate::support::{build_request, next_frame, send_request, setup_test_app, token_of};

#[tokio::test]
async fn watch_sends_snapshot_then_role_changes() {
    let app = setup_test_app().await;
    let alice = app.create_user("alice", false).await;
    let token = token_of(&alice);

    let response =
        send_request(&app, Method::POST, "/internal/authenticate/alice", Some(&token), None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/event-stream");
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache");
    assert_eq!(app.state.token_manager.subscriber_count("alice"), 1);

    let mut body = response.into_body();
    let first = next_frame(&mut body).await.expect("snapshot frame");
    assert_eq!(first["username"], "alice");
    assert_eq!(first["api_token"], token.as_str());
    assert_eq!(first["roles"], json!([]));

    app.state.accounts.add_role("ops", &alice.id).await.unwrap();
    let update = next_frame(&mut body).await.expect("role update frame");
    assert_eq!(update["roles"], json!(["ops"]));
    assert_eq!(update["api_token"], token.as_str());

    drop(body);
    assert_eq!(app.state.token_manager.subscriber_count("alice"), 0);
}

#[tokio::test]
async fn rename_ends_the_watch() {
    let app = setup_test_app().await;
    let alice = app.create_user("alice", false).await;

    let response = send_request(
        &app,
        Method::POST,
        "/internal/authenticate/alice",
        Some(&token_of(&alice)),
        None,
    )
    .await;
    let mut body = response.into_body();
    next_frame(&mut body).await.expect("snapshot frame");

    app.state
        .accounts
        .update_user(
            &alice.id,
            UpdateUserRequest { username: Some("alicia".to_string()), password: None },
        )
        .await
        .unwrap();

    assert!(next_frame(&mut body).await.is_none());
    drop(body);
    assert_eq!(app.state.token_manager.subscriber_count("alice"), 0);
    assert_eq!(app.state.token_manager.subscriber_count("alicia"), 0);
}

#[tokio::test]
async fn watching_another_account_is_unauthorized() {
    let app = setup_test_app().await;
    let alice = app.create_user("alice", false).await;
    app.create_user("bob", false).await;

    let response = send_request(
        &app,
        Method::POST,
        "/internal/authenticate/bob",
        Some(&token_of(&alice)),
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(app.state.token_manager.subscriber_count("bob"), 0);
}

#[tokio::test]
async fn external_peers_are_refused() {
    let app = setup_test_app().await;
    let alice = app.create_user("alice", false).await;
    let public = IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8));

    let request = build_request(
        Method::POST,
        "/internal/authenticate/alice",
        Some(&token_of(&alice)),
        None,
        public,
    );
    let response = app.router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // Refused before credentials are looked at.
    let request = build_request(Method::GET, "/internal/users", None, None, public);
    let response = app.router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let private = IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3));
    let request = build_request(Method::GET, "/internal/users", None, None, private);
    let response = app.router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn directory_feed_lists_users_then_follows_changes() {
    let app = setup_test_app().await;
    let alice = app.create_user("alice", false).await;
    app.create_user("bob", false).await;

    let response =
        send_request(&app, Method::GET, "/internal/users", Some(&token_of(&alice)), None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(app.state.token_manager.directory_subscriber_count(), 1);
    let mut body = response.into_body();

    let first = next_frame(&mut body).await.unwrap();
    let second = next_frame(&mut body).await.unwrap();
    assert_eq!(first, json!({"username": "alice", "removed": false}));
    assert_eq!(second, json!({"username": "bob", "removed": false}));

    let carol = app.create_user("carol", false).await;
    assert_eq!(
        next_frame(&mut body).await.unwrap(),
        json!({"username": "carol", "removed": false})
    );

    app.state.accounts.delete_user(&carol.id).await.unwrap();
    assert_eq!(
        next_frame(&mut body).await.unwrap(),
        json!({"username": "carol", "removed": true})
    );

    drop(body);
    assert_eq!(app.state.token_manager.directory_subscriber_count(), 0);
}

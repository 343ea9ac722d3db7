use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    extract::ConnectInfo,
    http::{Method, Request, Response},
    Router,
};
use bytes::Bytes;
use http_body_util::BodyExt;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tower::ServiceExt;
use warden::{
    api::{build_router, ApiState},
    auth::{account_service::CreateUserRequest, User},
    config::AppConfig,
    storage::create_pool,
};

pub const PASSWORD: &str = "correct horse battery";

pub struct TestApp {
    pub state: ApiState,
}

impl TestApp {
    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    pub async fn create_user(&self, username: &str, admin: bool) -> User {
        self.state
            .accounts
            .create_user(CreateUserRequest {
                username: username.to_string(),
                password: PASSWORD.to_string(),
                admin,
            })
            .await
            .expect("create user")
    }
}

pub fn token_of(user: &User) -> String {
    user.api_token.as_ref().expect("user has a token").token.clone()
}

pub async fn setup_test_app() -> TestApp {
    let mut config = AppConfig::default();
    config.database.url = "sqlite::memory:".to_string();
    let pool = create_pool(&config.database).await.expect("create sqlite pool");
    TestApp { state: ApiState::from_pool(pool, &config) }
}

pub fn loopback() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

pub fn build_request(
    method: Method,
    path: &str,
    token: Option<&str>,
    body: Option<Value>,
    peer: IpAddr,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(path);
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {}", token));
    }

    let mut request = if let Some(json) = body {
        let bytes = serde_json::to_vec(&json).expect("serialize body");
        builder
            .header("content-type", "application/json")
            .body(Body::from(bytes))
            .expect("build request")
    } else {
        builder.body(Body::empty()).expect("build request")
    };
    request.extensions_mut().insert(ConnectInfo(SocketAddr::new(peer, 40_000)));
    request
}

pub async fn send_request(
    app: &TestApp,
    method: Method,
    path: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> Response<Body> {
    let request = build_request(method, path, token, body, loopback());
    app.router().oneshot(request).await.expect("request")
}

pub async fn read_json<T: DeserializeOwned>(response: Response<Body>) -> T {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("read body");
    serde_json::from_slice(&bytes).expect("parse json")
}

/// Next non-keepalive frame of a streaming body, `None` once it ends.
pub async fn next_frame(body: &mut Body) -> Option<Value> {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), body.frame())
            .await
            .expect("frame within timeout")?
            .expect("body frame");
        let Ok(data) = frame.into_data() else { continue };
        if data == Bytes::from_static(b"\r\n") {
            continue;
        }
        assert!(data.ends_with(b"\r\n"), "frame must end with CRLF");
        return Some(serde_json::from_slice(&data[..data.len() - 2]).expect("frame json"));
    }
}

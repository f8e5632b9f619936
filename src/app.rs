use std::net::SocketAddr;

use axum::{routing::get, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{auth, contacts, state::AppState};

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .nest(
            "/api",
            Router::new()
                .merge(auth::router())
                .merge(contacts::router())
                .route("/health", get(|| async { "ok" })),
        )
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!(
                        "http_request",
                        %method,
                        uri = %uri,
                        status = tracing::field::Empty
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        let latency_ms = latency.as_millis() as u64;
                        if status.is_server_error() {
                            tracing::error!(%status, latency_ms, "response");
                        } else {
                            tracing::info!(%status, latency_ms, "response");
                        }
                    },
                ),
        )
}

pub async fn serve(app: Router) -> anyhow::Result<()> {
    let addr: SocketAddr = format!(
        "{}:{}",
        std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
        std::env::var("APP_PORT").unwrap_or_else(|_| "8080".into())
    )
    .parse()?;

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    // peer address feeds the rate limiter
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        extract::ConnectInfo,
        http::{header, Request, StatusCode},
        response::Response,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::{auth::jwt::JwtKeys, avatars::MAX_AVATAR_BYTES, state::fakes::test_config};

    const BOUNDARY: &str = "contactbook-test-boundary";

    async fn send(app: &Router, req: Request<Body>) -> Response {
        app.clone().oneshot(req).await.expect("router is infallible")
    }

    async fn body_json(res: Response) -> Value {
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    /// Attaches the socket peer the way `into_make_service_with_connect_info` does.
    fn from_peer(mut req: Request<Body>, ip: &str) -> Request<Body> {
        let addr: SocketAddr = format!("{ip}:40000").parse().unwrap();
        req.extensions_mut().insert(ConnectInfo(addr));
        req
    }

    fn json_req(method: &str, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
        let mut b = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(t) = token {
            b = b.header(header::AUTHORIZATION, format!("Bearer {t}"));
        }
        from_peer(b.body(Body::from(body.to_string())).unwrap(), "127.0.0.1")
    }

    fn get_req(uri: &str, token: Option<&str>, peer: &str) -> Request<Body> {
        let mut b = Request::builder().uri(uri);
        if let Some(t) = token {
            b = b.header(header::AUTHORIZATION, format!("Bearer {t}"));
        }
        from_peer(b.body(Body::empty()).unwrap(), peer)
    }

    fn me_req_forwarded(token: &str, peer: &str, forwarded_for: &str) -> Request<Body> {
        let req = Request::builder()
            .uri("/api/me")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .header("x-forwarded-for", forwarded_for)
            .body(Body::empty())
            .unwrap();
        from_peer(req, peer)
    }

    /// One-part multipart body; `content_type: None` omits the part header.
    fn avatar_upload(token: &str, field: &str, content_type: Option<&str>, data: &[u8]) -> Request<Body> {
        let mut body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"avatar.png\"\r\n"
        )
        .into_bytes();
        if let Some(ct) = content_type {
            body.extend_from_slice(format!("Content-Type: {ct}\r\n").as_bytes());
        }
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        let req = Request::builder()
            .method("POST")
            .uri("/api/avatar")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap();
        from_peer(req, "127.0.0.1")
    }

    async fn signup(app: &Router, username: &str, email: &str) -> String {
        let res = send(
            app,
            json_req(
                "POST",
                "/api/signup",
                None,
                json!({ "username": username, "email": email, "password": "password1" }),
            ),
        )
        .await;
        assert_eq!(res.status(), StatusCode::CREATED);
        let body = body_json(res).await;
        assert_eq!(body["pending_verification"], true);
        body["access_token"].as_str().unwrap().to_string()
    }

    /// Signs up, follows the verification link and logs in.
    async fn verified_login(app: &Router, st: &AppState, username: &str, email: &str) -> String {
        signup(app, username, email).await;

        let verify = JwtKeys::new(&st.config.jwt)
            .issue_verification_token(email)
            .unwrap();
        let res = send(
            app,
            get_req(&format!("/api/verify-email?token={verify}"), None, "127.0.0.1"),
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);

        let res = send(
            app,
            json_req(
                "POST",
                "/api/login",
                None,
                json!({ "email": email, "password": "password1" }),
            ),
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);
        body_json(res).await["access_token"]
            .as_str()
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn health_is_public() {
        let app = build_app(AppState::fake());
        let res = send(&app, get_req("/api/health", None, "1.1.1.1")).await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn contacts_require_a_bearer_token() {
        let app = build_app(AppState::fake());
        let res = send(&app, get_req("/api/contacts", None, "1.1.1.1")).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(res.headers().get(header::WWW_AUTHENTICATE).unwrap(), "Bearer");
    }

    #[tokio::test]
    async fn signup_conflict_and_unverified_login() {
        let app = build_app(AppState::fake());
        signup(&app, "ann", "ann@example.com").await;

        let res = send(
            &app,
            json_req(
                "POST",
                "/api/signup",
                None,
                json!({ "username": "ann2", "email": "ann@example.com", "password": "password1" }),
            ),
        )
        .await;
        assert_eq!(res.status(), StatusCode::CONFLICT);

        let res = send(
            &app,
            json_req(
                "POST",
                "/api/login",
                None,
                json!({ "email": "ann@example.com", "password": "password1" }),
            ),
        )
        .await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn me_is_rate_limited_per_peer() {
        let app = build_app(AppState::fake());
        let token = signup(&app, "ann", "ann@example.com").await;

        let res = send(&app, get_req("/api/me", Some(&token), "9.9.9.9")).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body_json(res).await["email"], "ann@example.com");

        let res = send(&app, get_req("/api/me", Some(&token), "9.9.9.9")).await;
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(res.headers().get(header::RETRY_AFTER).is_some());

        let res = send(&app, get_req("/api/me", Some(&token), "8.8.8.8")).await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn rotating_forwarded_for_does_not_evade_the_limit() {
        let app = build_app(AppState::fake());
        let token = signup(&app, "ann", "ann@example.com").await;

        let res = send(&app, me_req_forwarded(&token, "203.0.113.5", "10.0.0.0")).await;
        assert_eq!(res.status(), StatusCode::OK);

        for i in 1..5 {
            let res = send(
                &app,
                me_req_forwarded(&token, "203.0.113.5", &format!("10.0.0.{i}")),
            )
            .await;
            assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS, "forwarded 10.0.0.{i}");
        }
    }

    #[tokio::test]
    async fn forwarded_for_is_honoured_behind_a_trusted_proxy() {
        let mut st = AppState::fake();
        let mut config = test_config();
        config.trust_proxy_headers = true;
        st.config = Arc::new(config);
        let app = build_app(st);
        let token = signup(&app, "ann", "ann@example.com").await;

        let res = send(&app, me_req_forwarded(&token, "10.9.9.9", "198.51.100.1")).await;
        assert_eq!(res.status(), StatusCode::OK);
        let res = send(&app, me_req_forwarded(&token, "10.9.9.9", "198.51.100.2")).await;
        assert_eq!(res.status(), StatusCode::OK);
        let res = send(&app, me_req_forwarded(&token, "10.9.9.9", "198.51.100.1")).await;
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn rejected_tokens_do_not_spend_quota() {
        let app = build_app(AppState::fake());
        let token = signup(&app, "ann", "ann@example.com").await;

        for _ in 0..3 {
            let res = send(&app, get_req("/api/me", Some("junk"), "7.7.7.7")).await;
            assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        }

        let res = send(&app, get_req("/api/me", Some(&token), "7.7.7.7")).await;
        assert_eq!(res.status(), StatusCode::OK);
        let res = send(&app, get_req("/api/avatar", Some(&token), "7.7.7.7")).await;
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn unverified_users_can_read_but_not_write_contacts() {
        let app = build_app(AppState::fake());
        let token = signup(&app, "ann", "ann@example.com").await;

        let res = send(&app, get_req("/api/contacts", Some(&token), "1.1.1.1")).await;
        assert_eq!(res.status(), StatusCode::OK);

        let res = send(
            &app,
            json_req(
                "POST",
                "/api/contacts",
                Some(&token),
                json!({ "first_name": "Bob", "last_name": "Stone",
                        "email": "bob@example.com", "phone": "555" }),
            ),
        )
        .await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn verified_user_manages_contacts_end_to_end() {
        let st = AppState::fake();
        let app = build_app(st.clone());
        let token = verified_login(&app, &st, "ann", "ann@example.com").await;

        let res = send(
            &app,
            json_req(
                "POST",
                "/api/contacts",
                Some(&token),
                json!({ "first_name": "Bob", "last_name": "Stone", "email": "bob@example.com",
                        "phone": "555", "birthday": "1990-04-02" }),
            ),
        )
        .await;
        assert_eq!(res.status(), StatusCode::CREATED);
        let created = body_json(res).await;
        let id = created["id"].as_i64().unwrap();
        assert_eq!(created["birthday"], "1990-04-02");

        let res = send(
            &app,
            json_req("PUT", &format!("/api/contacts/{id}"), Some(&token), json!({ "phone": "777" })),
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);
        let updated = body_json(res).await;
        assert_eq!(updated["phone"], "777");
        assert_eq!(updated["first_name"], "Bob");
        assert_eq!(updated["birthday"], "1990-04-02");

        let res = send(&app, get_req("/api/contacts/search?q=STON", Some(&token), "1.1.1.1")).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body_json(res).await.as_array().unwrap().len(), 1);

        let res = send(
            &app,
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/contacts/{id}"))
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::NO_CONTENT);

        let res = send(&app, get_req(&format!("/api/contacts/{id}"), Some(&token), "1.1.1.1")).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn bad_verification_token_is_a_bad_request() {
        let app = build_app(AppState::fake());
        let res = send(&app, get_req("/api/verify-email?token=nope", None, "1.1.1.1")).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(res).await["detail"], "Invalid or expired token");
    }

    #[tokio::test]
    async fn verified_user_uploads_avatar_file() {
        let st = AppState::fake();
        let app = build_app(st.clone());
        let token = verified_login(&app, &st, "ann", "ann@example.com").await;

        let res = send(&app, avatar_upload(&token, "file", Some("image/png"), b"\x89PNG fake")).await;
        assert_eq!(res.status(), StatusCode::OK);
        let user = body_json(res).await;
        let id = user["id"].as_i64().unwrap();
        assert_eq!(
            user["avatar"],
            format!("https://fake.local/avatars-bucket/avatars/user-{id}")
        );

        let res = send(&app, get_req("/api/avatar", Some(&token), "5.5.5.5")).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body_json(res).await["avatar"], user["avatar"]);
    }

    #[tokio::test]
    async fn unverified_user_cannot_change_avatar() {
        let app = build_app(AppState::fake());
        let token = signup(&app, "ann", "ann@example.com").await;

        let res = send(&app, avatar_upload(&token, "file", Some("image/png"), b"png")).await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);

        let res = send(
            &app,
            json_req(
                "PATCH",
                "/api/avatar",
                Some(&token),
                json!({ "avatar_url": "https://cdn.example.com/a.png" }),
            ),
        )
        .await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn avatar_upload_rejects_bad_parts() {
        let st = AppState::fake();
        let app = build_app(st.clone());
        let token = verified_login(&app, &st, "ann", "ann@example.com").await;

        let res = send(&app, avatar_upload(&token, "picture", Some("image/png"), b"png")).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(res).await["detail"], "file is required");

        // no part content type falls back to application/octet-stream
        let res = send(&app, avatar_upload(&token, "file", None, b"png")).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        let detail = body_json(res).await["detail"].as_str().unwrap().to_string();
        assert!(detail.contains("application/octet-stream"), "{detail}");

        let oversized = vec![0u8; MAX_AVATAR_BYTES + 128 * 1024];
        let res = send(&app, avatar_upload(&token, "file", Some("image/png"), &oversized)).await;
        assert!(res.status().is_client_error(), "{}", res.status());
    }

    #[tokio::test]
    async fn verified_user_sets_avatar_url() {
        let st = AppState::fake();
        let app = build_app(st.clone());
        let token = verified_login(&app, &st, "ann", "ann@example.com").await;

        let res = send(
            &app,
            json_req(
                "PATCH",
                "/api/avatar",
                Some(&token),
                json!({ "avatar_url": "https://cdn.example.com/a.png" }),
            ),
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body_json(res).await["avatar"], "https://cdn.example.com/a.png");

        let res = send(
            &app,
            json_req("PATCH", "/api/avatar", Some(&token), json!({ "avatar_url": "ftp://x" })),
        )
        .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }
}

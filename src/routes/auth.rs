//! Auth routes for registration, login, logout, token refresh and user info.
//!
//! Tokens are handed to the browser as HTTP-only cookies; response bodies
//! never contain them.

use axum::{
    Extension, Json, Router,
    extract::State,
    http::StatusCode,
    middleware,
    routing::{get, post},
};
use axum_extra::extract::cookie::CookieJar;
use serde_json::{Value, json};

use crate::auth::middleware::require_auth;
use crate::auth::models::{LoginRequest, RegisterRequest, TokenResponse};
use crate::auth::{AuthUser, Role};
use crate::error::{ApiError, ApiResult};
use crate::server::AppState;
use crate::session;

/// POST /api/auth/register
///
/// Anyone may register a regular account, which is signed in straight away.
/// Only a signed-in admin may create accounts with another role; in that
/// case the admin's own cookies are left untouched.
pub async fn register(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(body): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, CookieJar, Json<TokenResponse>)> {
    let requester = session::current_user(&jar, state.auth.jwt());
    let by_admin = requester.as_ref().is_some_and(AuthUser::is_admin);
    let role = body.role.unwrap_or(Role::User);

    if role != Role::User && !by_admin {
        tracing::warn!("Rejected registration with role {}", role);
        return Err(ApiError::Forbidden("Only admins can assign roles".to_string()));
    }

    let auth_session = state.auth.sign_up(&body.email, &body.password, role).await?;
    let expires_in = state.auth.jwt().access_ttl().as_secs();

    let jar = if by_admin {
        jar
    } else {
        state.cookies.set_auth_cookies(jar, &auth_session.tokens)
    };
    Ok((
        StatusCode::CREATED,
        jar,
        Json(TokenResponse::new(auth_session.user, expires_in)),
    ))
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(body): Json<LoginRequest>,
) -> ApiResult<(CookieJar, Json<TokenResponse>)> {
    let Some(auth_session) = state.auth.sign_in(&body.email, &body.password).await else {
        return Err(ApiError::Unauthorized("Invalid email or password".to_string()));
    };

    let expires_in = state.auth.jwt().access_ttl().as_secs();
    let jar = state.cookies.set_auth_cookies(jar, &auth_session.tokens);
    Ok((jar, Json(TokenResponse::new(auth_session.user, expires_in))))
}

/// POST /api/auth/logout
///
/// There is no server-side session; clearing the cookies is all it takes.
pub async fn logout(State(state): State<AppState>, jar: CookieJar) -> (StatusCode, CookieJar) {
    (StatusCode::NO_CONTENT, state.cookies.clear_auth_cookies(jar))
}

/// POST /api/auth/refresh
///
/// Mints a new access cookie from the refresh cookie. A refresh token that
/// no longer verifies clears both cookies.
pub async fn refresh(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<Value>), (StatusCode, CookieJar, Json<Value>)> {
    let access_token = match session::refresh_token(&jar) {
        Some(token) => state.auth.refresh_access_token(token).await,
        None => None,
    };

    match access_token {
        Some(token) => {
            let expires_in = state.auth.jwt().access_ttl().as_secs();
            let jar = state.cookies.set_access_cookie(jar, token);
            Ok((jar, Json(json!({ "expires_in": expires_in }))))
        }
        None => Err((
            StatusCode::UNAUTHORIZED,
            state.cookies.clear_auth_cookies(jar),
            Json(json!({ "error": "Session expired", "status": 401 })),
        )),
    }
}

/// GET /api/auth/me
pub async fn me(Extension(user): Extension<AuthUser>) -> Json<AuthUser> {
    Json(user)
}

/// Creates the auth routes
pub fn create_auth_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/refresh", post(refresh))
        .route(
            "/api/auth/me",
            get(me).route_layer(middleware::from_fn_with_state(state.clone(), require_auth)),
        )
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, Response, header};
    use tower::ServiceExt;

    use super::*;
    use crate::server::{build_router, test_state};
    use crate::session::{ACCESS_COOKIE, REFRESH_COOKIE};

    fn json_request(uri: &str, body: Value, cookie: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn get_request(uri: &str, cookie: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        builder.body(Body::empty()).unwrap()
    }

    /// `name=value` pairs from every Set-Cookie header
    fn set_cookies(response: &Response<Body>) -> Vec<String> {
        response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or_default().to_string())
            .collect()
    }

    fn cookie_value(cookies: &[String], name: &str) -> Option<String> {
        cookies
            .iter()
            .find_map(|c| c.strip_prefix(&format!("{name}=")).map(String::from))
    }

    async fn body_json(response: Response<Body>) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_register_sets_cookies_and_me_reads_them() {
        let app = build_router(test_state(), &[]);

        let response = app
            .clone()
            .oneshot(json_request(
                "/api/auth/register",
                json!({ "email": "New@Example.com", "password": "secret" }),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let cookies = set_cookies(&response);
        let access = cookie_value(&cookies, ACCESS_COOKIE).unwrap();
        assert!(cookie_value(&cookies, REFRESH_COOKIE).is_some());

        let body = body_json(response).await;
        assert_eq!(body["user"]["email"], "new@example.com");
        assert_eq!(body["user"]["role"], "user");
        assert!(body.get("access_token").is_none());

        let me = app
            .oneshot(get_request("/api/auth/me", Some(&format!("{ACCESS_COOKIE}={access}"))))
            .await
            .unwrap();
        assert_eq!(me.status(), StatusCode::OK);
        assert_eq!(body_json(me).await["email"], "new@example.com");
    }

    #[tokio::test]
    async fn test_me_accepts_bearer_header() {
        let state = test_state();
        let session = state.auth.sign_up("cli@x.com", "pw", Role::User).await.unwrap();
        let app = build_router(state, &[]);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/auth/me")
                    .header(
                        header::AUTHORIZATION,
                        format!("Bearer {}", session.tokens.access_token),
                    )
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["email"], "cli@x.com");
    }

    #[tokio::test]
    async fn test_me_rejects_refresh_token_as_access() {
        let state = test_state();
        let session = state.auth.sign_up("a@x.com", "pw", Role::User).await.unwrap();
        let app = build_router(state, &[]);

        let cookie = format!("{ACCESS_COOKIE}={}", session.tokens.refresh_token);
        let response = app.oneshot(get_request("/api/auth/me", Some(&cookie))).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_register_duplicate_is_conflict() {
        let state = test_state();
        state.auth.sign_up("dup@x.com", "pw", Role::User).await.unwrap();
        let app = build_router(state, &[]);

        let response = app
            .oneshot(json_request(
                "/api/auth/register",
                json!({ "email": "dup@x.com", "password": "other" }),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_anonymous_cannot_register_admin() {
        let app = build_router(test_state(), &[]);
        let response = app
            .oneshot(json_request(
                "/api/auth/register",
                json!({ "email": "sneaky@x.com", "password": "pw", "role": "admin" }),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_admin_registers_admin_without_switching_session() {
        let state = test_state();
        let admin = state.auth.sign_up("root@x.com", "pw", Role::Admin).await.unwrap();
        let app = build_router(state, &[]);

        let cookie = format!("{ACCESS_COOKIE}={}", admin.tokens.access_token);
        let response = app
            .oneshot(json_request(
                "/api/auth/register",
                json!({ "email": "second@x.com", "password": "pw", "role": "admin" }),
                Some(&cookie),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert!(set_cookies(&response).is_empty());
        assert_eq!(body_json(response).await["user"]["role"], "admin");
    }

    #[tokio::test]
    async fn test_login_failures_look_the_same() {
        let state = test_state();
        state.auth.sign_up("a@x.com", "right", Role::User).await.unwrap();
        let app = build_router(state, &[]);

        let wrong_password = app
            .clone()
            .oneshot(json_request(
                "/api/auth/login",
                json!({ "email": "a@x.com", "password": "wrong" }),
                None,
            ))
            .await
            .unwrap();
        let unknown_email = app
            .oneshot(json_request(
                "/api/auth/login",
                json!({ "email": "nobody@x.com", "password": "right" }),
                None,
            ))
            .await
            .unwrap();

        assert_eq!(wrong_password.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(unknown_email.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(wrong_password).await, body_json(unknown_email).await);
    }

    #[tokio::test]
    async fn test_login_then_refresh() {
        let state = test_state();
        state.auth.sign_up("a@x.com", "right", Role::User).await.unwrap();
        let app = build_router(state.clone(), &[]);

        let response = app
            .clone()
            .oneshot(json_request(
                "/api/auth/login",
                json!({ "email": "a@x.com", "password": "right" }),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let refresh_token = cookie_value(&set_cookies(&response), REFRESH_COOKIE).unwrap();

        let response = app
            .oneshot(json_request(
                "/api/auth/refresh",
                json!({}),
                Some(&format!("{REFRESH_COOKIE}={refresh_token}")),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let cookies = set_cookies(&response);
        let access = cookie_value(&cookies, ACCESS_COOKIE).unwrap();
        assert!(cookie_value(&cookies, REFRESH_COOKIE).is_none());
        assert_eq!(state.auth.verify_token(&access).unwrap().email, "a@x.com");
    }

    #[tokio::test]
    async fn test_invalid_refresh_cookie_clears_session() {
        let app = build_router(test_state(), &[]);
        let cookie = format!("{ACCESS_COOKIE}=stale; {REFRESH_COOKIE}=garbage");
        let response = app
            .oneshot(json_request("/api/auth/refresh", json!({}), Some(&cookie)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let cookies = set_cookies(&response);
        assert_eq!(cookie_value(&cookies, ACCESS_COOKIE).as_deref(), Some(""));
        assert_eq!(cookie_value(&cookies, REFRESH_COOKIE).as_deref(), Some(""));
    }

    #[tokio::test]
    async fn test_refresh_without_cookie_is_unauthorized() {
        let app = build_router(test_state(), &[]);
        let response = app
            .oneshot(json_request("/api/auth/refresh", json!({}), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_logout_clears_cookies() {
        let state = test_state();
        let session = state.auth.sign_up("a@x.com", "pw", Role::User).await.unwrap();
        let app = build_router(state, &[]);
        let cookie = format!(
            "{ACCESS_COOKIE}={}; {REFRESH_COOKIE}={}",
            session.tokens.access_token, session.tokens.refresh_token
        );

        let response = app
            .clone()
            .oneshot(json_request("/api/auth/logout", json!({}), Some(&cookie)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let cookies = set_cookies(&response);
        assert_eq!(cookie_value(&cookies, ACCESS_COOKIE).as_deref(), Some(""));
        assert_eq!(cookie_value(&cookies, REFRESH_COOKIE).as_deref(), Some(""));

        let me = app.oneshot(get_request("/api/auth/me", None)).await.unwrap();
        assert_eq!(me.status(), StatusCode::UNAUTHORIZED);
    }
}

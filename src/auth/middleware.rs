//! Authentication Middleware
//!
//! Axum middleware that resolves the current user from the `auth_token`
//! cookie (or a Bearer header for scripted clients) and injects it into
//! the request extensions.

use axum::{
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;

use crate::auth::models::AuthUser;
use crate::server::AppState;
use crate::session;

fn bearer_token(req: &Request) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
}

fn resolve_user(state: &AppState, jar: &CookieJar, req: &Request) -> Option<AuthUser> {
    session::current_user(jar, state.auth.jwt())
        .or_else(|| bearer_token(req).and_then(|token| state.auth.verify_token(token)))
}

/// Reject requests without a valid access token
pub async fn require_auth(
    State(state): State<AppState>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(user) = resolve_user(&state, &jar, &req) else {
        tracing::warn!("[AuthMiddleware] Rejected {} {}: not signed in", req.method(), req.uri());
        return Err(StatusCode::UNAUTHORIZED);
    };

    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}

/// Reject requests unless the access token belongs to an admin
pub async fn require_admin(
    State(state): State<AppState>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let user = match resolve_user(&state, &jar, &req) {
        Some(user) if user.is_admin() => user,
        Some(user) => {
            tracing::warn!(
                "[AuthMiddleware] Rejected {} {}: user {} is not an admin",
                req.method(),
                req.uri(),
                user.id
            );
            return Err(StatusCode::FORBIDDEN);
        }
        None => {
            tracing::warn!("[AuthMiddleware] Rejected {} {}: not signed in", req.method(), req.uri());
            return Err(StatusCode::UNAUTHORIZED);
        }
    };

    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}

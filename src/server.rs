//! # Server Module
//!
//! HTTP server setup and route configuration.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Router,
    http::{HeaderValue, Method, header},
    routing::get,
};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::store::PgCredentialStore;
use crate::auth::{AuthError, AuthService, JwtService, Role};
use crate::config::Config;
use crate::database::migrations::run_migrations;
use crate::database::{Database, close_pool, init_pool};
use crate::error::ApiError;
use crate::routes::health::{health, ping};
use crate::routes::{auth, content};
use crate::session::SessionCookies;

/// Application state shared across all route handlers
#[derive(Clone)]
pub struct AppState {
    pub auth: AuthService,
    pub cookies: SessionCookies,
    /// `None` only when the router is built without a database, as in tests
    pub db: Option<Database>,
}

impl AppState {
    pub fn database(&self) -> Result<&Database, ApiError> {
        self.db.as_ref().ok_or(ApiError::Unavailable)
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::ORIGIN,
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::AUTHORIZATION,
        ])
        .allow_credentials(true) // Allow cookies for auth
}

/// Build the application router with every route and layer attached
pub fn build_router(state: AppState, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .route("/health", get(health))
        .merge(auth::create_auth_routes(&state))
        .merge(content::create_routes(&state))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(cors_origins)),
        )
        .with_state(state)
}

/// Create the configured admin account unless it already exists
async fn bootstrap_admin(auth: &AuthService, email: &str, password: &str) -> Result<()> {
    match auth.sign_up(email, password, Role::Admin).await {
        Ok(session) => {
            tracing::info!(user_id = %session.user.id, "👤 Created bootstrap admin account");
            Ok(())
        }
        Err(AuthError::EmailTaken) => {
            tracing::debug!("Bootstrap admin already exists");
            Ok(())
        }
        Err(e) => Err(e).context("Failed to create bootstrap admin"),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("🛑 Shutdown signal received");
}

/// Starts the HTTP server.
///
/// Connects the process-wide pool, applies pending migrations, then serves
/// until Ctrl+C. The pool is closed once in-flight requests finish.
pub async fn start(config: &Config) -> Result<()> {
    let db = init_pool(&config.database)
        .await
        .context("Failed to connect to database")?;
    run_migrations(&db).await?;

    let jwt = Arc::new(JwtService::from_config(&config.auth));
    let store = Arc::new(PgCredentialStore::new(db.clone()));
    let auth_service = AuthService::new(store, jwt);

    if let Some((email, password)) = &config.auth.bootstrap_admin {
        bootstrap_admin(&auth_service, email, password).await?;
    }

    let state = AppState {
        auth: auth_service,
        cookies: SessionCookies::from_config(&config.auth),
        db: Some(db),
    };
    let app = build_router(state, &config.server.cors_origins);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid SERVER_HOST/PORT")?;

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr} - port may already be in use"))?;

    tracing::info!("🚀 Community site server starting...");
    tracing::info!("📡 Listening on http://{}", addr);
    tracing::info!("🏥 Health check available at http://{}/ping", addr);
    tracing::info!("📰 Content endpoints available at http://{}/api/content/*", addr);
    tracing::info!("🔧 Environment: {}", config.environment);
    if !config.auth.secure_cookies && config.is_production() {
        tracing::warn!("USE_HTTPS is off in production; auth cookies are not marked Secure");
    }

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;
    close_pool();
    served.context("Server error")
}

#[cfg(test)]
pub(crate) fn test_state() -> AppState {
    use std::time::Duration;

    use crate::auth::store::MemoryCredentialStore;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    AppState {
        auth: AuthService::new(
            Arc::new(MemoryCredentialStore::default()),
            Arc::new(JwtService::new("test_secret", 7 * DAY, 30 * DAY)),
        ),
        cookies: SessionCookies::new(false, 7 * DAY, 30 * DAY),
        db: None,
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;

    #[tokio::test]
    async fn test_cors_allows_configured_origin_with_credentials() {
        let app = build_router(test_state(), &["http://localhost:3001".to_string()]);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/ping")
                    .header(header::ORIGIN, "http://localhost:3001")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(
            headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "http://localhost:3001"
        );
        assert_eq!(
            headers.get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS).unwrap(),
            "true"
        );
    }

    #[tokio::test]
    async fn test_cors_ignores_other_origins() {
        let app = build_router(test_state(), &["http://localhost:3001".to_string()]);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/ping")
                    .header(header::ORIGIN, "https://evil.example")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
    }

    #[tokio::test]
    async fn test_bootstrap_admin_is_idempotent() {
        let state = test_state();
        bootstrap_admin(&state.auth, "root@x.com", "pw").await.unwrap();
        bootstrap_admin(&state.auth, "root@x.com", "pw").await.unwrap();

        let session = state.auth.sign_in("root@x.com", "pw").await.unwrap();
        assert!(session.user.is_admin());
    }
}

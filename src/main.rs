//! # Community Site Server
//!
//! Backend for a bilingual (English/Arabic) community website: public
//! content listings, an admin dashboard API, and cookie-based sign-in.
//! Built with Axum, Tokio and PostgreSQL.
//!
//! ## Features
//! - Pooled PostgreSQL access with a parameterized query builder
//! - Embedded SQL migrations applied at startup
//! - Argon2 password hashing and JWT access/refresh tokens
//! - HTTP-only session cookies
//! - CRUD endpoints for activities, news, gallery, crafts, projects and
//!   scholarships
//!
//! ## Architecture
//! - `config`: Environment variable configuration management
//! - `database`: Connection pool, query builder, migrations
//! - `auth`: Password hashing, tokens, credential store, middleware
//! - `session`: Auth cookies
//! - `routes`: HTTP route handlers organized by functionality
//!   - `health`: Health check and monitoring endpoints
//!   - `auth`: Register, login, logout, refresh, current user
//!   - `content`: Content CRUD
//! - `server`: Router assembly and startup
//!
//! ## Environment Setup
//! Copy `.env.example` to `.env` and configure:
//! ```bash
//! cp .env.example .env
//! # Set JWT_SECRET and the DATABASE_* variables
//! ```
//!
//! ## Running the Server
//! ```bash
//! cargo run
//! ```
//!
//! The server will start on `http://0.0.0.0:3000` by default.
//!
//! ## Health Check
//! ```bash
//! curl http://localhost:3000/ping
//! curl http://localhost:3000/health
//! ```

use community_site::config::CONFIG;
use community_site::server;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Application entry point.
///
/// Initializes logging, then runs the server until Ctrl+C. Log levels come
/// from `RUST_LOG` and default to `info`.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false) // Don't show module targets for cleaner output
                .compact(),
        )
        .init();

    tracing::info!("🏁 Starting community site server...");
    tracing::info!("📦 Package: {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    tracing::info!(
        "🏗️  Build profile: {}",
        if cfg!(debug_assertions) { "debug" } else { "release" }
    );

    server::start(&CONFIG).await
}

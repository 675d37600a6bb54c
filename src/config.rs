//! Configuration module for environment variables and application settings

use std::env;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use once_cell::sync::Lazy;

/// Global application configuration loaded from environment variables
pub static CONFIG: Lazy<Config> = Lazy::new(|| {
    dotenv::dotenv().ok();
    Config::from_env().expect("Failed to load configuration from environment")
});

/// Lifetime of an access token when `JWT_EXPIRES_IN` is unset
const DEFAULT_ACCESS_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Lifetime of a refresh token
const REFRESH_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct Config {
    /// Database configuration
    pub database: DatabaseConfig,

    /// Token signing and cookie settings
    pub auth: AuthConfig,

    /// Server configuration
    pub server: ServerConfig,

    /// Value of `NODE_ENV`, kept for parity with the deployment scripts
    pub environment: String,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub dbname: String,
    pub ssl: bool,
    pub max_connections: usize,
    /// How long an acquirer waits for a free connection before failing
    pub connect_timeout: Duration,
    /// Connections unused for longer than this are closed by the reaper
    pub idle_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    /// Mark auth cookies `Secure`. Only safe when the site is served over HTTPS.
    pub secure_cookies: bool,
    /// `(email, password)` of an admin account created at startup if missing
    pub bootstrap_admin: Option<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Origins allowed to make credentialed cross-origin requests
    pub cors_origins: Vec<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: String::new(),
            dbname: "community_site".to_string(),
            ssl: false,
            max_connections: 20,
            connect_timeout: Duration::from_secs(2),
            idle_timeout: Duration::from_secs(30),
        }
    }
}

impl DatabaseConfig {
    /// Create configuration from a `postgres://` URL, keeping pool settings
    /// at their defaults
    pub fn from_url(url: &str) -> Result<Self> {
        let parsed = url::Url::parse(url).context("Failed to parse database URL")?;

        if parsed.scheme() != "postgresql" && parsed.scheme() != "postgres" {
            bail!("Invalid database URL scheme, expected postgresql or postgres");
        }

        let ssl = parsed
            .query_pairs()
            .any(|(k, v)| k == "sslmode" && v != "disable");

        Ok(Self {
            host: parsed.host_str().unwrap_or("localhost").to_string(),
            port: parsed.port().unwrap_or(5432),
            user: parsed.username().to_string(),
            password: parsed.password().unwrap_or("").to_string(),
            dbname: parsed.path().trim_start_matches('/').to_string(),
            ssl,
            ..Self::default()
        })
    }

    /// Create configuration from the `DATABASE_*` variables.
    ///
    /// `DATABASE_URL` takes precedence over the discrete host/port/user
    /// variables when set.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let mut config = match env::var("DATABASE_URL") {
            Ok(url) => Self::from_url(&url)?,
            Err(_) => Self {
                host: env::var("DATABASE_HOST").unwrap_or(defaults.host),
                port: parse_var("DATABASE_PORT", defaults.port)?,
                user: env::var("DATABASE_USER").unwrap_or(defaults.user),
                password: env::var("DATABASE_PASSWORD").unwrap_or(defaults.password),
                dbname: env::var("DATABASE_NAME").unwrap_or(defaults.dbname),
                ssl: flag("DATABASE_SSL"),
                ..Self::default()
            },
        };

        if env::var("DATABASE_SSL").is_ok() {
            config.ssl = flag("DATABASE_SSL");
        }
        config.max_connections = parse_var("DATABASE_MAX_CONNECTIONS", config.max_connections)?;
        config.connect_timeout = Duration::from_secs(parse_var(
            "DATABASE_CONNECT_TIMEOUT_SECS",
            config.connect_timeout.as_secs(),
        )?);
        config.idle_timeout = Duration::from_secs(parse_var(
            "DATABASE_IDLE_TIMEOUT_SECS",
            config.idle_timeout.as_secs(),
        )?);

        if config.max_connections == 0 {
            bail!("DATABASE_MAX_CONNECTIONS must be at least 1");
        }
        Ok(config)
    }
}

impl AuthConfig {
    pub fn from_env() -> Result<Self> {
        let jwt_secret = env::var("JWT_SECRET")
            .map_err(|_| anyhow!("JWT_SECRET environment variable is required"))?;
        if jwt_secret.trim().is_empty() {
            bail!("JWT_SECRET must not be empty");
        }

        let access_ttl = match env::var("JWT_EXPIRES_IN") {
            Ok(raw) => parse_lifetime(&raw)
                .with_context(|| format!("Invalid JWT_EXPIRES_IN value {raw:?}"))?,
            Err(_) => DEFAULT_ACCESS_TTL,
        };

        Ok(Self {
            jwt_secret,
            access_ttl,
            refresh_ttl: REFRESH_TTL,
            secure_cookies: flag("USE_HTTPS"),
            bootstrap_admin: match (env::var("ADMIN_EMAIL"), env::var("ADMIN_PASSWORD")) {
                (Ok(email), Ok(password)) if !password.is_empty() => Some((email, password)),
                _ => None,
            },
        })
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database: DatabaseConfig::from_env()?,
            auth: AuthConfig::from_env()?,
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: match env::var("PORT") {
                    Ok(_) => parse_var("PORT", 3000)?,
                    Err(_) => parse_var("SERVER_PORT", 3000)?,
                },
                cors_origins: env::var("CORS_ORIGINS")
                    .map(|raw| split_list(&raw))
                    .unwrap_or_else(|_| vec!["http://localhost:3000".to_string()]),
            },
            environment: env::var("NODE_ENV").unwrap_or_else(|_| "development".to_string()),
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

/// Parse a lifetime such as `7d`, `12h`, `30m`, `45s` or a bare number of
/// seconds.
pub fn parse_lifetime(raw: &str) -> Result<Duration> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);
    let amount: u64 = digits
        .parse()
        .map_err(|_| anyhow!("expected a number followed by an optional unit"))?;

    let seconds = match unit.trim() {
        "" | "s" => amount,
        "m" => amount * 60,
        "h" => amount * 60 * 60,
        "d" => amount * 24 * 60 * 60,
        "w" => amount * 7 * 24 * 60 * 60,
        other => bail!("unknown unit {other:?}"),
    };
    if seconds == 0 {
        bail!("lifetime must be positive");
    }
    Ok(Duration::from_secs(seconds))
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn flag(name: &str) -> bool {
    env::var(name)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(false)
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("{name} is not valid: {e}")),
        Err(_) => Ok(default),
    }
}

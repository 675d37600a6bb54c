//! Session cookies.
//!
//! Tokens live in two HTTP-only cookies; the server keeps no session table.
//! Logging out only clears the cookies.

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};

use crate::auth::{AuthUser, JwtService, TokenPair};
use crate::config::AuthConfig;

pub const ACCESS_COOKIE: &str = "auth_token";
pub const REFRESH_COOKIE: &str = "refresh_token";

#[derive(Debug, Clone, Copy)]
pub struct SessionCookies {
    secure: bool,
    access_max_age: time::Duration,
    refresh_max_age: time::Duration,
}

impl SessionCookies {
    /// `secure` must only be set when the site is served over HTTPS, or
    /// browsers drop the cookies
    pub fn new(secure: bool, access_max_age: std::time::Duration, refresh_max_age: std::time::Duration) -> Self {
        Self {
            secure,
            access_max_age: seconds(access_max_age),
            refresh_max_age: seconds(refresh_max_age),
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(config.secure_cookies, config.access_ttl, config.refresh_ttl)
    }

    fn cookie(&self, name: &'static str, value: String, max_age: time::Duration) -> Cookie<'static> {
        Cookie::build((name, value))
            .http_only(true)
            .same_site(SameSite::Lax)
            .path("/")
            .secure(self.secure)
            .max_age(max_age)
            .build()
    }

    pub fn set_auth_cookies(&self, jar: CookieJar, tokens: &TokenPair) -> CookieJar {
        jar.add(self.cookie(ACCESS_COOKIE, tokens.access_token.clone(), self.access_max_age))
            .add(self.cookie(REFRESH_COOKIE, tokens.refresh_token.clone(), self.refresh_max_age))
    }

    /// Replace only the access cookie, after a refresh
    pub fn set_access_cookie(&self, jar: CookieJar, access_token: String) -> CookieJar {
        jar.add(self.cookie(ACCESS_COOKIE, access_token, self.access_max_age))
    }

    pub fn clear_auth_cookies(&self, jar: CookieJar) -> CookieJar {
        jar.remove(Cookie::build(ACCESS_COOKIE).path("/"))
            .remove(Cookie::build(REFRESH_COOKIE).path("/"))
    }
}

fn seconds(duration: std::time::Duration) -> time::Duration {
    time::Duration::seconds(duration.as_secs() as i64)
}

pub fn access_token(jar: &CookieJar) -> Option<&str> {
    jar.get(ACCESS_COOKIE).map(|c| c.value())
}

pub fn refresh_token(jar: &CookieJar) -> Option<&str> {
    jar.get(REFRESH_COOKIE).map(|c| c.value())
}

/// The user whose access token is in the jar, if it verifies
pub fn current_user(jar: &CookieJar, jwt: &JwtService) -> Option<AuthUser> {
    access_token(jar).and_then(|token| jwt.verify_token(token))
}

pub fn is_authenticated(jar: &CookieJar, jwt: &JwtService) -> bool {
    current_user(jar, jwt).is_some()
}

pub fn is_admin(jar: &CookieJar, jwt: &JwtService) -> bool {
    current_user(jar, jwt).is_some_and(|user| user.is_admin())
}

//! Database access, token auth and cookie sessions for the community site,
//! plus the HTTP server that exposes them.

pub mod auth;
pub mod config;
pub mod database;
pub mod error;
pub mod routes;
pub mod server;
pub mod session;

//! # Routes Module
//!
//! HTTP route handlers organized by functionality.

pub mod auth;
pub mod content;
pub mod health;

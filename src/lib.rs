//! fablier: a self-hosted serial publishing platform.
//!
//! Authors write books chapter by chapter; readers browse a paged catalog,
//! rate, favorite, and pick up reading where they left off. Everything is
//! served from a single binary over one SQLite file.
//!
//! # Features
//!
//! - Books and chapters with publish/draft state and stable URL slugs
//! - Paged catalog with tag, category, and text filters
//! - Ratings, favorites, and per-chapter reading bookmarks
//! - Account registration (first account becomes admin) and sessions
//! - Password recovery by mail link
//! - Cover and avatar uploads

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Uploaded asset storage.
pub mod assets;
/// Authentication and authorization.
pub mod auth;
/// Catalog queries and view models.
pub mod catalog;
/// Configuration and CLI.
pub mod config;
/// Database operations.
pub mod db;
/// Error types.
pub mod error;
/// Outgoing mail.
pub mod mail;
/// HTTP server.
pub mod server;
/// Slug generation.
pub mod slug;

#[cfg(test)]
mod tests;

pub use config::{Cli, Command, Config};
pub use db::Database;
pub use error::{AppError, Result};
pub use server::AppState;

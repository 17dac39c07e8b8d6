//! Core data models for the document repository.
//!
//! These entities represent users and the folder/file namespace they own.
//! They map cleanly to database tables via `sqlx::FromRow` and serialize
//! naturally as JSON via `serde`.

pub mod file;
pub mod folder;
pub mod listing;
pub mod user;

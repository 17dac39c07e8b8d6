//! Multi-user PDF document repository.
//!
//! Users keep documents in a folder tree they own. Browsing and search are
//! public; every mutation is restricted to the owner of the folder or file.

pub mod auth;
pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;

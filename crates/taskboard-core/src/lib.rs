//! Core library for the taskboard client.
//!
//! - `auth`: credential store, persistence backends, refresh protocol client
//! - `api`: authenticated request gateway and the typed REST client
//! - `models`: boards, tasks and auth payloads
//! - `config`: user configuration and on-disk locations

pub mod api;
pub mod auth;
pub mod config;
pub mod models;

pub use api::{ApiClient, ApiError, RequestGateway};
pub use auth::{Credential, CredentialStore};
pub use config::Config;

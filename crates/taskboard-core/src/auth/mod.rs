//! Authentication module: token storage and the refresh protocol.
//!
//! This module provides:
//! - `Credential`: the access/refresh token pair
//! - `CredentialStore`: the single owner of the current credential, written
//!   through to a `TokenPersistence` backend on every change
//! - Persistence backends: JSON file, OS keychain, in-memory
//! - `RefreshClient` / `HttpRefreshClient`: exchanges a refresh token for a
//!   new access token

pub mod credentials;
pub mod keychain;
pub mod persistence;
pub mod refresh;
pub mod store;

pub use credentials::Credential;
pub use keychain::KeyringTokenPersistence;
pub use persistence::{FileTokenPersistence, MemoryTokenPersistence, TokenPersistence};
pub use refresh::{HttpRefreshClient, RefreshClient, RefreshError};
pub use store::CredentialStore;

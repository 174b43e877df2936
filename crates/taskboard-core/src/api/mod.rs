//! REST API client module for the taskboard server.
//!
//! This module provides:
//! - `RequestGateway`: attaches the bearer token to every request and
//!   recovers from an expired access token with a single shared refresh
//! - `ApiClient`: typed auth, board and task operations on top of the gateway
//! - `Navigator`: where the user is sent when the session cannot be recovered

pub mod client;
pub mod error;
pub mod gateway;
pub mod navigator;

pub use client::ApiClient;
pub use error::ApiError;
pub use gateway::RequestGateway;
pub use navigator::{Navigator, TracingNavigator};

//! HTTP server and daemon configuration.
//!
//! This module provides:
//! - Configuration types and loading (`config`)
//! - The axum router exposing the gateway (`http`)

pub mod config;
pub mod http;

pub use http::{ApiError, router};

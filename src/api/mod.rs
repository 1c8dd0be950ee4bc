//! HTTP surface: the health endpoint consumed by external health checks.
//!
//! # Modules
//!
//! - [`dto`] - Response serialization
//! - [`handlers`] - HTTP request handlers
//! - [`middleware`] - Request tracing
//! - [`routes`] - Route configuration

pub mod dto;
pub mod handlers;
pub mod middleware;
pub mod routes;

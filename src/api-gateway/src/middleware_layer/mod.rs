//! Middleware modules for the API Gateway

pub mod auth;
pub mod error_handling;
pub mod logging;
pub mod rate_limit;

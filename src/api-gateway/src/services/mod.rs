//! Core services of the API Gateway

pub mod auth;
pub mod proxy;
pub mod rate_limiter;
pub mod registry;

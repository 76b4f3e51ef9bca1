//! Route definitions for the API Gateway

pub mod gateway;
pub mod public;

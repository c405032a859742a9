//! Car Rental API - request admission layer
//!
//! This crate implements the rate limiting front of the car rental REST
//! backend: a per-client sliding-window limiter with exponential cooldowns
//! and offense tracking, mounted as axum middleware in front of the service
//! routes.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;

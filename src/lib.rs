//! License issuance, validation, device activation and entitlement metering
//! over SQLite, with an axum HTTP surface.

pub mod clock;
pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod licensing;
pub mod models;
pub mod plans;
pub mod util;

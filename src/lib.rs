//! Cache Manager - an in-memory cache management engine
//!
//! Rule-based entry classification, per-strategy eviction, optimization
//! tasks, alerting and persistence, served over a REST API.

pub mod alerts;
pub mod api;
pub mod cache;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod error;
pub mod hooks;
pub mod manager;
pub mod metrics;
pub mod models;
pub mod optimization;
pub mod persistence;
pub mod profile;
pub mod rules;
pub mod strategy;
pub mod tasks;

pub use api::{create_router, AppState};
pub use config::Config;
pub use error::{CacheError, Result};
pub use manager::{CacheManager, CacheManagerBuilder};

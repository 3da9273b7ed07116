// Kira Market - two-generation marketplace backend

// Core types and primitives
pub mod core;

// Infrastructure - database, identity, media and request plumbing
pub mod infrastructure;

// Domain stores - one module per aggregate
pub mod domains;

// Services - search, views, migration and thumbnails built over the stores
pub mod services;

// HTTP surface
pub mod image_interface;
pub mod market_interface;

// Common utilities
pub mod app_state;
pub mod config;
pub mod error;

// Re-exports for convenience
pub use error::{AppError, AppResult};

// Library exports for testing and embedding

// ===== Core engine modules =====
pub mod config;
pub mod engine;
pub mod matcher;
pub mod mock;

// ===== HTTP surfaces =====
pub mod admin_api;
pub mod push_api;

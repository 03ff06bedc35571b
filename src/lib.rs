// Library exports for testing
pub mod config;
pub mod handlers;
pub mod health;
pub mod kafka;
pub mod registry;

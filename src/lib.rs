pub mod auth;
pub mod catalog;
pub mod config;
pub mod error;
pub mod feed;
pub mod feedback;
pub mod models;
pub mod openapi;
pub mod reconcile;
pub mod repo;
pub mod routes;
pub mod storage;
pub mod upload;
pub mod users; // external account directory

// Re-export commonly used items for tests / external users
pub use routes::{config, AppState};

pub mod config;
pub mod error;
pub mod types;
pub mod record;
pub mod database;
pub mod manager;
pub mod stats;

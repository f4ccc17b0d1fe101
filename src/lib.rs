pub mod analytics;
pub mod app;
pub mod auth;
pub mod batches;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod employees;
pub mod entries;
pub mod error;
pub mod export;
pub mod local_time;
pub mod storage;
pub mod templates;
pub mod types;

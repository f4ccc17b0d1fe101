pub mod filter;
pub mod handler;
pub mod lifecycle;
pub mod store;

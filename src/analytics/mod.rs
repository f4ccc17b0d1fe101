pub mod consumption;
pub mod dashboard;
pub mod handler;
pub mod periodic;
pub mod queries;
pub mod types;

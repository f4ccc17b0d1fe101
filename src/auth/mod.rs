pub mod handler;
pub mod password;
pub mod session;

pub mod domain;
pub mod error;
pub mod querylog;
pub mod retry;

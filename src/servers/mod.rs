//! Server implementations
//!
//! - query: statement-timeout line-protocol server, the reference consumer
//!   of the timer service

pub mod query;

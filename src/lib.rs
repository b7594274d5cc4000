//! thrtimer - timer service for multi-threaded servers
//!
//! One-shot and periodic timers with microsecond deadlines, driven by one
//! dedicated thread, used for per-connection and per-statement timeouts.

// ============================================
// Core Modules
// ============================================

/// Server and timer configuration
pub mod config;
/// Timer service (heap, timer thread, handles)
pub mod timer;
/// Server implementations (statement-timeout server)
pub mod servers;

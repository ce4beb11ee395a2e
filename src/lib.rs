//! Tollgate - In-memory Request Throttling Engine
//!
//! This crate protects API endpoints from abuse while still admitting
//! legitimate bursts. Write and financial endpoints are guarded by a sliding
//! window counter that caps bursts at window boundaries; read-heavy
//! endpoints by a token bucket. Requests are keyed by network address and,
//! when authenticated, independently by wallet address.

pub mod config;
pub mod error;
pub mod ratelimit;

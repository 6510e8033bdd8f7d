//! Ratelog - Sliding Window Log Rate Limiting
//!
//! This crate decides whether a request identified by a key may proceed,
//! given at most `limit` requests per trailing `window`. Every request is
//! logged as a timestamped entry in a shared time-ordered store (Redis, or an
//! in-memory fake with the same semantics), so any number of processes can
//! enforce one limit without coordinating with each other.

pub mod clock;
pub mod config;
pub mod error;
pub mod ratelimit;
pub mod store;

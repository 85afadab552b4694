//! Resilience helpers for tier adapters.

pub mod retry;

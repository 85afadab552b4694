//! Tier storage.
//!
//! - [`local`]: the in-process L1 tier owned by the coordinator
//! - [`traits`]: the [`TierStore`](traits::TierStore) contract for L2/L3
//! - [`memory`], [`redis`], [`sql`]: shipped `TierStore` implementations

pub mod local;
pub mod memory;
pub mod redis;
pub mod sql;
pub mod traits;

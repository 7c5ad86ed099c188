// Normalized entity storage and the caches built on top of it.

pub mod adapter;
pub mod user_cache;

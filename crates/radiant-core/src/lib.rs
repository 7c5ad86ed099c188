// Library root for the synchronization core: normalized entity storage, the
// scoped user cache, domain models, the inbound wire protocol and config.

pub mod config;
pub mod entity;
pub mod model;
pub mod protocol;

pub use entity::adapter::{Entity, EntityAdapter, EntityState, IndexKey, Pk};
pub use entity::user_cache::{CacheContext, SharedUserCache, UserCache, UserEntry};

// Library root: the REST client and the per-screen domain stores that combine
// HTTP snapshots with pushed channel updates.

pub mod api;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{ApiClient, ApiError, BackendApi};
pub use store::{HeroDraftStore, Slice, SliceStatus, StoreUpdate, TeamDraftStore, TournamentStore};

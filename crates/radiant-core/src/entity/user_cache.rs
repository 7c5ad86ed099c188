// User cache: one normalized entry per user, merging global identity fields
// with facts that only hold inside one organization or league.
//
// Scoped slots are merged per scope and never replaced wholesale, so loading
// a league roster does not wipe the org ratings cached for the same users.
// Fetch timestamps are kept in a ledger beside the entity state; refreshing a
// user with identical data therefore leaves the cached `Arc<UserEntry>` alone.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use super::adapter::{Entity, EntityAdapter, EntityState, IndexKey, Pk};
use crate::model::{PositionPreferences, UserPayload};

/// Default staleness window (five minutes).
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(300);

pub const DISCORD_INDEX: &str = "discord_id";
pub const STEAM_INDEX: &str = "steam_id";

/// Cache handle shared between the stores of one session.
pub type SharedUserCache = Arc<RwLock<UserCache>>;

// ---------------------------------------------------------------------------
// Entry types
// ---------------------------------------------------------------------------

/// Identity fields that are the same whatever org or league is looking.
#[derive(Debug, Clone, PartialEq)]
pub struct UserCore {
    pub pk: Pk,
    pub username: Option<String>,
    pub nickname: Option<String>,
    pub avatar_url: Option<String>,
    pub discord_id: Option<String>,
    pub steam_id: Option<i64>,
    pub is_staff: bool,
    pub is_superuser: bool,
    pub positions: Option<PositionPreferences>,
    /// Unscoped rating, only written by payloads fetched without a context.
    pub mmr: Option<i32>,
}

/// A fact about the user that is relative to one org or league.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopedData {
    pub id: Pk,
    pub mmr: Option<i32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserEntry {
    pub core: UserCore,
    pub org_data: BTreeMap<Pk, ScopedData>,
    pub league_data: BTreeMap<Pk, ScopedData>,
}

impl Entity for UserEntry {
    fn pk(&self) -> Pk {
        self.core.pk
    }
}

impl UserEntry {
    pub fn org_mmr(&self, org_id: Pk) -> Option<i32> {
        self.org_data.get(&org_id).and_then(|d| d.mmr)
    }

    pub fn league_mmr(&self, league_id: Pk) -> Option<i32> {
        self.league_data.get(&league_id).and_then(|d| d.mmr)
    }

    /// Most specific rating available for `context`: league, then org, then
    /// the unscoped value.
    pub fn mmr_in(&self, context: CacheContext) -> Option<i32> {
        context
            .league_id
            .and_then(|id| self.league_mmr(id))
            .or_else(|| context.org_id.and_then(|id| self.org_mmr(id)))
            .or(self.core.mmr)
    }

    pub fn display_name(&self) -> &str {
        self.core
            .nickname
            .as_deref()
            .or(self.core.username.as_deref())
            .unwrap_or("")
    }

    /// Build the next version of a user from a payload. Core fields are
    /// copied verbatim; the payload's rating lands in the scoped slots named
    /// by `context`, or in the core when there is no context.
    fn merge(existing: Option<&UserEntry>, pk: Pk, payload: &UserPayload, context: CacheContext) -> Self {
        let mut core = UserCore {
            pk,
            username: payload.username.clone(),
            nickname: payload.nickname.clone(),
            avatar_url: payload.avatar_url.clone(),
            discord_id: payload.discord_id.clone(),
            steam_id: payload.steam_id,
            is_staff: payload.is_staff,
            is_superuser: payload.is_superuser,
            positions: payload.positions,
            mmr: payload.mmr,
        };

        let (mut org_data, mut league_data) = match existing {
            Some(e) => (e.org_data.clone(), e.league_data.clone()),
            None => (BTreeMap::new(), BTreeMap::new()),
        };

        if context.is_scoped() {
            core.mmr = existing.and_then(|e| e.core.mmr);
            if let Some(mmr) = payload.mmr {
                if let Some(org_id) = context.org_id {
                    org_data.insert(org_id, ScopedData { id: org_id, mmr: Some(mmr) });
                }
                if let Some(league_id) = context.league_id {
                    league_data.insert(league_id, ScopedData { id: league_id, mmr: Some(mmr) });
                }
            }
        }

        Self {
            core,
            org_data,
            league_data,
        }
    }

    /// Observable difference for an update made under `context`: core fields
    /// plus the scoped slots that context names. Other scopes are ignored.
    fn differs_in(&self, next: &UserEntry, context: CacheContext) -> bool {
        if self.core != next.core {
            return true;
        }
        if let Some(org_id) = context.org_id {
            if self.org_data.get(&org_id) != next.org_data.get(&org_id) {
                return true;
            }
        }
        if let Some(league_id) = context.league_id {
            if self.league_data.get(&league_id) != next.league_data.get(&league_id) {
                return true;
            }
        }
        false
    }
}

/// The org and/or league a payload was fetched under.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CacheContext {
    pub org_id: Option<Pk>,
    pub league_id: Option<Pk>,
}

impl CacheContext {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn org(org_id: Pk) -> Self {
        Self {
            org_id: Some(org_id),
            league_id: None,
        }
    }

    pub fn league(league_id: Pk) -> Self {
        Self {
            org_id: None,
            league_id: Some(league_id),
        }
    }

    pub fn is_scoped(&self) -> bool {
        self.org_id.is_some() || self.league_id.is_some()
    }
}

/// When each part of a user was last fetched.
#[derive(Debug, Clone, Default)]
struct Freshness {
    core: Option<DateTime<Utc>>,
    orgs: HashMap<Pk, DateTime<Utc>>,
    leagues: HashMap<Pk, DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// UserCache
// ---------------------------------------------------------------------------

pub struct UserCache {
    adapter: EntityAdapter<UserEntry>,
    state: EntityState<UserEntry>,
    freshness: HashMap<Pk, Freshness>,
    stale_after: Duration,
}

impl std::fmt::Debug for UserCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserCache")
            .field("users", &self.state.len())
            .field("stale_after", &self.stale_after)
            .finish()
    }
}

impl Default for UserCache {
    fn default() -> Self {
        Self::new()
    }
}

impl UserCache {
    pub fn new() -> Self {
        Self::with_stale_after(DEFAULT_STALE_AFTER)
    }

    pub fn with_stale_after(stale_after: Duration) -> Self {
        let adapter = EntityAdapter::<UserEntry>::new()
            .with_index(DISCORD_INDEX, |u: &UserEntry| {
                u.core.discord_id.as_deref().map(IndexKey::from)
            })
            .with_index(STEAM_INDEX, |u: &UserEntry| u.core.steam_id.map(IndexKey::from));
        let state = adapter.initial_state();
        Self {
            adapter,
            state,
            freshness: HashMap::new(),
            stale_after,
        }
    }

    /// Wrap the cache for sharing between stores.
    pub fn shared(self) -> SharedUserCache {
        Arc::new(RwLock::new(self))
    }

    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    /// Merge a batch of payloads fetched under `context`. Returns how many
    /// entries actually changed.
    pub fn upsert<I>(&mut self, users: I, context: CacheContext) -> usize
    where
        I: IntoIterator<Item = UserPayload>,
    {
        self.upsert_at(users, context, Utc::now())
    }

    pub fn upsert_one(&mut self, user: UserPayload, context: CacheContext) -> bool {
        self.upsert(std::iter::once(user), context) > 0
    }

    /// `upsert` with an explicit fetch time.
    pub fn upsert_at<I>(&mut self, users: I, context: CacheContext, fetched_at: DateTime<Utc>) -> usize
    where
        I: IntoIterator<Item = UserPayload>,
    {
        let mut next = self.state.clone();
        let mut changed = 0;

        for payload in users {
            let Some(pk) = payload.pk else {
                debug!(username = ?payload.username, "Dropping user payload without pk");
                continue;
            };

            self.touch(pk, context, fetched_at);

            let existing = next.get(pk).cloned();
            let entry = UserEntry::merge(existing.as_deref(), pk, &payload, context);
            if let Some(current) = existing.as_deref() {
                if !current.differs_in(&entry, context) {
                    continue;
                }
            }
            self.adapter.write_entity(&mut next, entry);
            changed += 1;
        }

        if changed > 0 {
            self.state = next;
        }
        changed
    }

    pub fn remove(&mut self, pk: Pk) -> bool {
        self.freshness.remove(&pk);
        if !self.state.contains(pk) {
            return false;
        }
        self.state = self.adapter.remove_one(&self.state, pk);
        true
    }

    pub fn get_by_id(&self, pk: Pk) -> Option<Arc<UserEntry>> {
        self.adapter.select_by_id(&self.state, pk).cloned()
    }

    pub fn get_by_discord_id(&self, discord_id: &str) -> Option<Arc<UserEntry>> {
        self.adapter
            .select_by_index(&self.state, DISCORD_INDEX, &IndexKey::from(discord_id))
            .cloned()
    }

    pub fn get_by_steam_id(&self, steam_id: i64) -> Option<Arc<UserEntry>> {
        self.adapter
            .select_by_index(&self.state, STEAM_INDEX, &IndexKey::from(steam_id))
            .cloned()
    }

    /// True when the user, or the scope requested by `context`, was never
    /// fetched or was fetched longer ago than the staleness window.
    pub fn is_stale(&self, pk: Pk, context: CacheContext) -> bool {
        self.is_stale_at(pk, context, Utc::now())
    }

    pub fn is_stale_at(&self, pk: Pk, context: CacheContext, now: DateTime<Utc>) -> bool {
        let Some(fresh) = self.freshness.get(&pk) else {
            return true;
        };
        if self.expired(fresh.core, now) {
            return true;
        }
        if let Some(org_id) = context.org_id {
            if self.expired(fresh.orgs.get(&org_id).copied(), now) {
                return true;
            }
        }
        if let Some(league_id) = context.league_id {
            if self.expired(fresh.leagues.get(&league_id).copied(), now) {
                return true;
            }
        }
        false
    }

    /// Drop every entry (logout or session change).
    pub fn reset(&mut self) {
        self.state = self.adapter.initial_state();
        self.freshness.clear();
    }

    /// Current immutable snapshot; later writes never touch it.
    pub fn snapshot(&self) -> EntityState<UserEntry> {
        self.state.clone()
    }

    pub fn len(&self) -> usize {
        self.state.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }

    fn touch(&mut self, pk: Pk, context: CacheContext, at: DateTime<Utc>) {
        let fresh = self.freshness.entry(pk).or_default();
        fresh.core = Some(at);
        if let Some(org_id) = context.org_id {
            fresh.orgs.insert(org_id, at);
        }
        if let Some(league_id) = context.league_id {
            fresh.leagues.insert(league_id, at);
        }
    }

    fn expired(&self, fetched_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match fetched_at {
            None => true,
            // A fetch time in the future (clock skew) counts as fresh.
            Some(at) => (now - at).to_std().map(|age| age > self.stale_after).unwrap_or(false),
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn user(pk: Pk, name: &str) -> UserPayload {
        UserPayload::new(pk, name)
    }

    #[test]
    fn scoped_upserts_merge_instead_of_replacing() {
        let mut cache = UserCache::new();
        cache.upsert_one(user(1, "ana").with_mmr(20), CacheContext::org(5));
        cache.upsert_one(user(1, "ana").with_mmr(30), CacheContext::league(9));

        let entry = cache.get_by_id(1).unwrap();
        assert_eq!(entry.org_mmr(5), Some(20));
        assert_eq!(entry.league_mmr(9), Some(30));
        assert_eq!(entry.core.mmr, None);
    }

    #[test]
    fn unscoped_mmr_lands_in_core_and_survives_scoped_updates() {
        let mut cache = UserCache::new();
        cache.upsert_one(user(1, "ana").with_mmr(4000), CacheContext::none());
        cache.upsert_one(user(1, "ana").with_mmr(2500), CacheContext::org(5));

        let entry = cache.get_by_id(1).unwrap();
        assert_eq!(entry.core.mmr, Some(4000));
        assert_eq!(entry.org_mmr(5), Some(2500));
        assert_eq!(entry.mmr_in(CacheContext::org(5)), Some(2500));
        assert_eq!(entry.mmr_in(CacheContext::org(6)), Some(4000));
    }

    #[test]
    fn mmr_only_change_replaces_the_entry() {
        let mut cache = UserCache::new();
        cache.upsert_one(user(1, "ana").with_mmr(20), CacheContext::org(5));
        let before = cache.get_by_id(1).unwrap();

        assert!(cache.upsert_one(user(1, "ana").with_mmr(25), CacheContext::org(5)));
        let after = cache.get_by_id(1).unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(after.org_mmr(5), Some(25));
    }

    #[test]
    fn identical_update_keeps_references() {
        let mut cache = UserCache::new();
        cache.upsert_one(user(1, "ana").with_mmr(20), CacheContext::org(5));
        let snapshot = cache.snapshot();

        assert!(!cache.upsert_one(user(1, "ana").with_mmr(20), CacheContext::org(5)));
        assert!(cache.snapshot().same_entities(&snapshot));
    }

    #[test]
    fn other_scopes_do_not_count_as_changes() {
        let mut cache = UserCache::new();
        cache.upsert_one(user(1, "ana").with_mmr(20), CacheContext::org(5));
        cache.upsert_one(user(1, "ana").with_mmr(30), CacheContext::league(9));
        let snapshot = cache.snapshot();

        // Same league value again; the org slot is untouched and irrelevant.
        assert_eq!(cache.upsert([user(1, "ana").with_mmr(30)], CacheContext::league(9)), 0);
        assert!(cache.snapshot().same_entities(&snapshot));
    }

    #[test]
    fn display_name_prefers_nickname() {
        let mut cache = UserCache::new();
        let mut nicked = user(1, "ana");
        nicked.nickname = Some("Ana the Carry".into());
        cache.upsert_one(nicked, CacheContext::none());
        cache.upsert_one(user(2, "bo"), CacheContext::none());
        cache.upsert_one(UserPayload { pk: Some(3), ..UserPayload::default() }, CacheContext::none());

        assert_eq!(cache.get_by_id(1).unwrap().display_name(), "Ana the Carry");
        assert_eq!(cache.get_by_id(2).unwrap().display_name(), "bo");
        assert_eq!(cache.get_by_id(3).unwrap().display_name(), "");
    }

    #[test]
    fn payload_without_pk_is_dropped() {
        let mut cache = UserCache::new();
        let anonymous = UserPayload {
            username: Some("ghost".into()),
            ..UserPayload::default()
        };
        assert_eq!(cache.upsert([anonymous, user(2, "bo")], CacheContext::none()), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn secondary_lookups_follow_relinking() {
        let mut cache = UserCache::new();
        let mut payload = user(1, "ana");
        payload.discord_id = Some("ana#1".into());
        payload.steam_id = Some(7656);
        cache.upsert_one(payload.clone(), CacheContext::none());

        assert_eq!(cache.get_by_discord_id("ana#1").unwrap().core.pk, 1);
        assert_eq!(cache.get_by_steam_id(7656).unwrap().core.pk, 1);

        payload.discord_id = Some("ana#2".into());
        payload.steam_id = None;
        cache.upsert_one(payload, CacheContext::none());

        assert!(cache.get_by_discord_id("ana#1").is_none());
        assert_eq!(cache.get_by_discord_id("ana#2").unwrap().core.pk, 1);
        assert!(cache.get_by_steam_id(7656).is_none());
    }

    #[test]
    fn staleness_tracks_core_and_requested_scope() {
        let mut cache = UserCache::new();
        cache.upsert_at([user(1, "ana").with_mmr(20)], CacheContext::org(5), t0());

        let soon = t0() + chrono::Duration::minutes(1);
        let later = t0() + chrono::Duration::minutes(6);

        assert!(!cache.is_stale_at(1, CacheContext::none(), soon));
        assert!(!cache.is_stale_at(1, CacheContext::org(5), soon));
        // Never fetched under league 9.
        assert!(cache.is_stale_at(1, CacheContext::league(9), soon));
        assert!(cache.is_stale_at(1, CacheContext::none(), later));
        assert!(cache.is_stale_at(2, CacheContext::none(), soon));
    }

    #[test]
    fn refetch_with_same_data_still_refreshes_timestamps() {
        let mut cache = UserCache::new();
        cache.upsert_at([user(1, "ana")], CacheContext::none(), t0());
        let later = t0() + chrono::Duration::minutes(4);
        cache.upsert_at([user(1, "ana")], CacheContext::none(), later);

        assert!(!cache.is_stale_at(1, CacheContext::none(), t0() + chrono::Duration::minutes(8)));
    }

    #[test]
    fn remove_and_reset_clear_entries() {
        let mut cache = UserCache::new();
        cache.upsert([user(1, "ana"), user(2, "bo")], CacheContext::none());

        assert!(cache.remove(1));
        assert!(!cache.remove(1));
        assert!(cache.get_by_id(1).is_none());
        assert!(cache.is_stale(1, CacheContext::none()));

        cache.reset();
        assert!(cache.is_empty());
        assert!(cache.is_stale(2, CacheContext::none()));
    }
}

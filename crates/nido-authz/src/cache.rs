//! Read-through cache for `is_admin` answers.

use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

/// Admin status keyed by (community, user).
#[derive(Debug, Default)]
pub struct AdminCache {
    entries: DashMap<(Uuid, Uuid), bool>,
}

impl AdminCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, community_id: Uuid, user_id: Uuid) -> Option<bool> {
        let hit = self.entries.get(&(community_id, user_id)).map(|e| *e);
        if hit.is_some() {
            debug!(%community_id, %user_id, "Admin cache hit");
        }
        hit
    }

    pub fn insert(&self, community_id: Uuid, user_id: Uuid, is_admin: bool) {
        self.entries.insert((community_id, user_id), is_admin);
    }

    pub fn invalidate(&self, community_id: Uuid, user_id: Uuid) {
        self.entries.remove(&(community_id, user_id));
    }

    /// Drop every entry of one community.
    pub fn invalidate_community(&self, community_id: Uuid) {
        self.entries.retain(|(community, _), _| *community != community_id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

//! Delegation service configuration.

use serde::Deserialize;

/// Configuration for the delegation service.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthzConfig {
    /// Cache `is_admin` answers per (community, user). Entries are
    /// dropped on every membership change of that user and whenever an
    /// org unit of the community is deleted.
    pub admin_cache_enabled: bool,
    /// Name given to the org unit bound to a new community's root
    /// authorization (default: `Board`).
    pub root_unit_name: String,
}

impl Default for AuthzConfig {
    fn default() -> Self {
        Self {
            admin_cache_enabled: true,
            root_unit_name: "Board".into(),
        }
    }
}
